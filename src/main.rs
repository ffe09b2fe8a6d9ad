mod config;
mod db;
mod error;
mod icon;
mod logging;
mod profiles;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use image::GenericImageView;
use log::{debug, info, warn};

use config::{Config, Overrides};
use db::Database;
use icon::Preview;
use profiles::{seed_record, ProfileChanges, ProfileEntry, ProfileStore};

#[derive(Parser, Debug)]
#[command(name = "ghub-profiles", about = "Inspect and edit G HUB application profiles")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// settings.db to operate on
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Directory receiving newly imported icons
    #[arg(long, global = true, value_name = "DIR")]
    icon_cache: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List profiles in alphabetical order
    List,
    /// Print a profile's full record
    Show(ProfileArg),
    /// Add a new profile to the first settings row
    Add(AddArgs),
    /// Change a profile's name, application path or icon path
    Set(SetArgs),
    /// Remove a profile
    Delete(ProfileArg),
    /// Manage a profile's icon
    #[command(subcommand)]
    Icon(IconCommand),
}

#[derive(Subcommand, Debug)]
enum IconCommand {
    /// Convert an image to a bitmap and bind it to the profile
    Import(ImportArgs),
    /// Unbind the profile's icon (the file is kept)
    Clear(ProfileArg),
    /// Report whether the bound icon can be displayed
    Preview(ProfileArg),
}

#[derive(Args, Debug)]
struct ProfileArg {
    /// Profile name (case-insensitive) or index from `list`
    profile: String,
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    app_path: Option<String>,
}

#[derive(Args, Debug)]
struct SetArgs {
    /// Profile name (case-insensitive) or index from `list`
    profile: String,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    app_path: Option<String>,

    #[arg(long)]
    icon_path: Option<String>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Profile name (case-insensitive) or index from `list`
    profile: String,

    #[arg(value_name = "IMAGE")]
    image: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = Overrides {
        database: cli.db.clone(),
        icon_cache: cli.icon_cache.clone(),
    };
    let config = config::load(cli.config.as_deref(), overrides)?;
    logging::init(&config, cli.verbose)?;

    for warning in &config.warnings {
        warn!("{warning}");
    }
    if let Some(path) = &config.config_path {
        info!("loaded configuration from {}", path.display());
    }
    debug!("G HUB directory {}", config.hub_dir.display());

    let db = Database::open(&config.database)?;
    let mut store = ProfileStore::open(db, &config.icon_cache)?;
    debug!("icons are written to {}", store.icon_cache().display());

    match cli.command {
        Command::List => handle_list(&store),
        Command::Show(args) => handle_show(&store, &args.profile),
        Command::Add(args) => handle_add(&mut store, &config, args),
        Command::Set(args) => handle_set(&mut store, args),
        Command::Delete(args) => handle_delete(&mut store, &args.profile),
        Command::Icon(IconCommand::Import(args)) => {
            handle_icon_import(&mut store, &args.profile, &args.image)
        }
        Command::Icon(IconCommand::Clear(args)) => handle_icon_clear(&mut store, &args.profile),
        Command::Icon(IconCommand::Preview(args)) => handle_icon_preview(&store, &args.profile),
    }
}

/// Resolve a `<PROFILE>` argument to an entry of the current collection.
fn resolve_profile<'a>(store: &'a ProfileStore, selector: &str) -> Result<&'a ProfileEntry> {
    let index = store
        .find_by_name(selector)
        .or_else(|| selector.trim().parse::<usize>().ok());
    index
        .and_then(|index| store.select(index))
        .ok_or_else(|| anyhow!("no profile matches \"{selector}\""))
}

fn handle_list(store: &ProfileStore) -> Result<()> {
    let entries = store.list();
    if entries.is_empty() {
        println!("No profiles found.");
        return Ok(());
    }

    // index<TAB>name<TAB>row<TAB>application path
    for (index, entry) in entries.iter().enumerate() {
        let name = if entry.record.contains_key("name") {
            entry.name()
        } else {
            "(Unnamed)"
        };
        println!(
            "{index}\t{name}\t{}\t{}",
            entry.row_id,
            entry.application_path()
        );
    }
    Ok(())
}

fn handle_show(store: &ProfileStore, selector: &str) -> Result<()> {
    let entry = resolve_profile(store, selector)?;
    println!("row: {}", entry.row_id);
    println!("icon: {}", describe_preview(&icon::resolve_preview(entry.poster_path())));
    println!("{}", serde_json::to_string_pretty(&entry.record)?);
    Ok(())
}

fn handle_add(store: &mut ProfileStore, config: &Config, args: AddArgs) -> Result<()> {
    let name = args.name.unwrap_or_else(|| config.new_profile.name.clone());
    let app_path = args
        .app_path
        .unwrap_or_else(|| config.new_profile.application_path.clone());

    store.create(seed_record(&name, &app_path))?;

    match store.find_by_name(&name) {
        Some(index) => println!("Added profile '{name}' at index {index}."),
        None => println!("Added profile '{name}'."),
    }
    Ok(())
}

fn handle_set(store: &mut ProfileStore, args: SetArgs) -> Result<()> {
    let changes = ProfileChanges {
        name: args.name,
        application_path: args.app_path,
        poster_path: args.icon_path,
    };
    if changes.is_empty() {
        println!("Nothing to change.");
        return Ok(());
    }

    let entry = resolve_profile(store, &args.profile)?.clone();
    store.update(&entry, &changes)?;

    let new_name = changes.name.as_deref().unwrap_or(entry.name());
    info!("changes saved for profile '{new_name}' (row {})", entry.row_id);
    println!("Profile '{new_name}' updated.");
    Ok(())
}

fn handle_delete(store: &mut ProfileStore, selector: &str) -> Result<()> {
    let entry = resolve_profile(store, selector)?.clone();
    if store.delete(&entry)? {
        println!("Deleted profile '{}'.", entry.name());
    } else {
        println!("Profile '{}' was not found in row {}; nothing deleted.", entry.name(), entry.row_id);
    }
    Ok(())
}

fn handle_icon_import(store: &mut ProfileStore, selector: &str, image: &Path) -> Result<()> {
    let entry = resolve_profile(store, selector)?.clone();
    let bound = store.import_icon(&entry, image)?;
    println!("Icon for '{}' written to {}", entry.name(), bound.display());
    Ok(())
}

fn handle_icon_clear(store: &mut ProfileStore, selector: &str) -> Result<()> {
    let entry = resolve_profile(store, selector)?.clone();
    store.clear_icon(&entry)?;
    println!("Icon cleared for '{}'.", entry.name());
    Ok(())
}

fn handle_icon_preview(store: &ProfileStore, selector: &str) -> Result<()> {
    let entry = resolve_profile(store, selector)?;
    let preview = icon::resolve_preview(entry.poster_path());
    println!("{}", describe_preview(&preview));
    Ok(())
}

fn describe_preview(preview: &Preview) -> String {
    match preview {
        Preview::Empty => "(No icon loaded)".to_string(),
        Preview::Missing => "(File not found)".to_string(),
        Preview::Invalid => "(Invalid image)".to_string(),
        Preview::Loaded(image) => {
            let (width, height) = image.dimensions();
            format!("{width}x{height} bitmap")
        }
    }
}
