use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::Deserialize;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_NAME: &str = "ghub-profiles";
const HUB_DIR_NAME: &str = "LGHUB";
const DATABASE_FILE_NAME: &str = "settings.db";
const ICON_CACHE_DIR_NAME: &str = "icon_cache";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_NEW_PROFILE_NAME: &str = "New Entry";

#[derive(Debug, Clone)]
pub struct Config {
    /// Config file that was read, if any.
    pub config_path: Option<PathBuf>,
    pub hub_dir: PathBuf,
    pub database: PathBuf,
    pub icon_cache: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub new_profile: NewProfileConfig,
    /// Problems found while reading the file; reported once logging is up.
    pub warnings: Vec<String>,
}

/// Values used to seed profiles created from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfileConfig {
    pub name: String,
    pub application_path: String,
}

impl Default for NewProfileConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NEW_PROFILE_NAME.to_string(),
            application_path: String::new(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub icon_cache: Option<PathBuf>,
}

// =============================================================================
// Config file structure
// =============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    hub_dir: Option<PathBuf>,
    database: Option<PathBuf>,
    icon_cache: Option<PathBuf>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    new_profile: NewProfileFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct NewProfileFile {
    name: Option<String>,
    application_path: Option<String>,
}

impl From<NewProfileFile> for NewProfileConfig {
    fn from(file: NewProfileFile) -> Self {
        let defaults = NewProfileConfig::default();
        Self {
            name: file
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.name),
            application_path: file.application_path.unwrap_or(defaults.application_path),
        }
    }
}

/// Expand ~ to home directory in paths
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

/// G HUB keeps its data under the local application data directory
/// (`%LOCALAPPDATA%\LGHUB` on Windows).
fn default_hub_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine data directories")?;
    Ok(base.data_local_dir().join(HUB_DIR_NAME))
}

/// Load the configuration.
///
/// An explicit `path` must exist; the default location is optional and
/// falls back to built-in defaults when absent.
pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let (file_path, required) = match path {
        Some(path) => (expand_tilde(path), true),
        None => (config_path()?, false),
    };

    if !file_path.exists() {
        if required {
            bail!("configuration file not found at {}", file_path.display());
        }
        return resolve(ConfigFile::default(), None, Vec::new(), overrides);
    }

    let raw = fs::read_to_string(&file_path)
        .with_context(|| format!("failed to read configuration file at {}", file_path.display()))?;
    let (cfg_file, warnings) = parse(&raw)
        .with_context(|| format!("failed to parse configuration file at {}", file_path.display()))?;

    resolve(cfg_file, Some(file_path), warnings, overrides)
}

fn parse(raw: &str) -> Result<(ConfigFile, Vec<String>)> {
    let value: toml::Value = toml::from_str(raw).context("invalid TOML")?;
    let warnings = unknown_keys(&value);
    let cfg_file: ConfigFile = value.try_into().context("unexpected configuration value")?;
    Ok((cfg_file, warnings))
}

fn resolve(
    file: ConfigFile,
    config_path: Option<PathBuf>,
    warnings: Vec<String>,
    overrides: Overrides,
) -> Result<Config> {
    let hub_dir = match file.hub_dir {
        Some(dir) => expand_tilde(&dir),
        None => default_hub_dir()?,
    };

    let database = overrides
        .database
        .or(file.database)
        .map(|path| expand_tilde(&path))
        .unwrap_or_else(|| hub_dir.join(DATABASE_FILE_NAME));
    let icon_cache = overrides
        .icon_cache
        .or(file.icon_cache)
        .map(|path| expand_tilde(&path))
        .unwrap_or_else(|| hub_dir.join(ICON_CACHE_DIR_NAME));

    let log_level = file
        .log_level
        .map(|level| level.trim().to_ascii_lowercase())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    Ok(Config {
        config_path,
        hub_dir,
        database,
        icon_cache,
        log_level,
        log_file: file.log_file.map(|path| expand_tilde(&path)),
        new_profile: file.new_profile.into(),
        warnings,
    })
}

// =============================================================================
// Unknown key warnings
// =============================================================================

const KNOWN_TOP_LEVEL: &[&str] = &[
    "hub_dir",
    "database",
    "icon_cache",
    "log_level",
    "log_file",
    "new_profile",
];
const KNOWN_NEW_PROFILE: &[&str] = &["name", "application_path"];

fn unknown_keys(value: &toml::Value) -> Vec<String> {
    let Some(table) = value.as_table() else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    for (key, entry) in table {
        if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
            warnings.push(format!("unknown configuration key `{key}`"));
            continue;
        }
        if key == "new_profile" {
            if let Some(section) = entry.as_table() {
                for sub in section.keys() {
                    if !KNOWN_NEW_PROFILE.contains(&sub.as_str()) {
                        warnings.push(format!("unknown new_profile entry `{sub}`"));
                    }
                }
            }
        }
    }
    warnings
}
