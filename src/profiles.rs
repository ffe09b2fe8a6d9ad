//! Flattened, sorted view over every profile stored in the settings rows.
//!
//! Entries are owned snapshots: mutations never go through a reference into
//! a loaded document. Each operation clones the owning document, edits the
//! clone, and only reloads once the row has been written successfully.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::db::{Database, Row};
use crate::error::{Result, StoreError};
use crate::icon;

const APPLICATIONS_KEY: &str = "applications";
const NAME_FIELD: &str = "name";
const APPLICATION_PATH_FIELD: &str = "applicationPath";
const POSTER_PATH_FIELD: &str = "posterPath";

/// A profile as seen at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub row_id: i64,
    /// Position inside the row's application list when loaded.
    pub slot: usize,
    pub record: Map<String, Value>,
}

impl ProfileEntry {
    pub fn name(&self) -> &str {
        str_field(&self.record, NAME_FIELD)
    }

    pub fn application_path(&self) -> &str {
        str_field(&self.record, APPLICATION_PATH_FIELD)
    }

    pub fn poster_path(&self) -> &str {
        str_field(&self.record, POSTER_PATH_FIELD)
    }
}

fn str_field<'a>(record: &'a Map<String, Value>, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Field values settable through [`ProfileStore::update`]. `None` leaves a
/// field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub application_path: Option<String>,
    pub poster_path: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.application_path.is_none() && self.poster_path.is_none()
    }

    fn apply(&self, record: &mut Map<String, Value>) {
        let fields = [
            (NAME_FIELD, &self.name),
            (APPLICATION_PATH_FIELD, &self.application_path),
            (POSTER_PATH_FIELD, &self.poster_path),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                record.insert(key.to_string(), Value::String(value.clone()));
            }
        }
    }
}

/// Record appended by [`ProfileStore::create`], shaped like the entries the
/// desktop application writes for custom profiles.
pub fn seed_record(name: &str, application_path: &str) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert(
        "applicationId".into(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );
    record.insert(APPLICATION_PATH_FIELD.into(), application_path.into());
    record.insert("isCustom".into(), Value::Bool(true));
    record.insert(NAME_FIELD.into(), name.into());
    record.insert(POSTER_PATH_FIELD.into(), "".into());
    record
}

/// Application list of a document, if it has one.
fn profile_list(document: &Value) -> Option<&Vec<Value>> {
    document
        .get(APPLICATIONS_KEY)?
        .as_object()?
        .get(APPLICATIONS_KEY)?
        .as_array()
}

fn profile_list_mut(document: &mut Value) -> Option<&mut Vec<Value>> {
    document
        .get_mut(APPLICATIONS_KEY)?
        .as_object_mut()?
        .get_mut(APPLICATIONS_KEY)?
        .as_array_mut()
}

/// Application list of a document, creating the `applications` section and
/// its list when absent. Fails if something else already sits at either key.
fn ensure_profile_list(row_id: i64, document: &mut Value) -> Result<&mut Vec<Value>> {
    let malformed = || StoreError::MalformedDocument { row_id };

    let root = document.as_object_mut().ok_or_else(malformed)?;
    let section = root
        .entry(APPLICATIONS_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(malformed)?;
    section
        .entry(APPLICATIONS_KEY)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(malformed)
}

/// Index of the entry's record in `list`: its load-time slot if that element
/// is unchanged, else the first structurally equal element.
fn locate(list: &[Value], entry: &ProfileEntry) -> Option<usize> {
    let matches = |value: &Value| value.as_object() == Some(&entry.record);
    if list.get(entry.slot).is_some_and(matches) {
        return Some(entry.slot);
    }
    list.iter().position(matches)
}

/// Flatten rows into entries sorted case-insensitively by name.
pub fn index_rows(rows: &[Row]) -> Vec<ProfileEntry> {
    let mut entries = Vec::new();
    for row in rows {
        let Some(list) = profile_list(&row.document) else {
            continue;
        };
        for (slot, value) in list.iter().enumerate() {
            match value.as_object() {
                Some(record) => entries.push(ProfileEntry {
                    row_id: row.id,
                    slot,
                    record: record.clone(),
                }),
                None => debug!("row {}: ignoring non-object profile at {slot}", row.id),
            }
        }
    }
    entries.sort_by_cached_key(|entry| entry.name().to_lowercase());
    entries
}

/// Owns the loaded rows and the sorted profile collection.
pub struct ProfileStore {
    db: Database,
    icon_cache: PathBuf,
    rows: Vec<Row>,
    entries: Vec<ProfileEntry>,
}

impl ProfileStore {
    /// Open the database and build the initial collection.
    pub fn open(db: Database, icon_cache: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            db,
            icon_cache: icon_cache.into(),
            rows: Vec::new(),
            entries: Vec::new(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn icon_cache(&self) -> &Path {
        &self.icon_cache
    }

    /// Rebuild the collection from disk.
    pub fn load(&mut self) -> Result<&[ProfileEntry]> {
        let rows = self.db.load_all()?;
        self.entries = index_rows(&rows);
        self.rows = rows;
        info!(
            "loaded {} profiles across {} rows",
            self.entries.len(),
            self.rows.len()
        );
        Ok(&self.entries)
    }

    pub fn list(&self) -> &[ProfileEntry] {
        &self.entries
    }

    pub fn select(&self, index: usize) -> Option<&ProfileEntry> {
        self.entries.get(index)
    }

    /// Position of the first entry whose name matches, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.entries
            .iter()
            .position(|entry| entry.name().to_lowercase() == wanted)
    }

    /// Append `seed` to the first row's list and persist that row.
    pub fn create(&mut self, seed: Map<String, Value>) -> Result<()> {
        let row_id = self.rows.first().ok_or(StoreError::NoRowsAvailable)?.id;
        self.mutate_row(row_id, |document| {
            ensure_profile_list(row_id, document)?.push(Value::Object(seed));
            Ok(true)
        })?;
        Ok(())
    }

    /// Set the given fields on the entry's record and persist its row.
    pub fn update(&mut self, entry: &ProfileEntry, changes: &ProfileChanges) -> Result<()> {
        self.mutate_row(entry.row_id, |document| {
            let stale = || StoreError::StaleEntry {
                row_id: entry.row_id,
                name: entry.name().to_string(),
            };
            let list = profile_list_mut(document).ok_or_else(stale)?;
            let index = locate(list, entry).ok_or_else(stale)?;
            if let Some(record) = list[index].as_object_mut() {
                changes.apply(record);
            }
            Ok(true)
        })?;
        Ok(())
    }

    /// Remove the entry's record from its row. Returns `false` without
    /// writing when no matching record is left to remove.
    pub fn delete(&mut self, entry: &ProfileEntry) -> Result<bool> {
        self.mutate_row(entry.row_id, |document| {
            let Some(list) = profile_list_mut(document) else {
                return Ok(false);
            };
            match locate(list, entry) {
                Some(index) => {
                    list.remove(index);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Convert `source` to a bitmap for the entry and bind it as its icon.
    pub fn import_icon(&mut self, entry: &ProfileEntry, source: &Path) -> Result<PathBuf> {
        let bound = icon::import_icon(source, entry.name(), entry.poster_path(), &self.icon_cache)?;
        let changes = ProfileChanges {
            poster_path: Some(bound.to_string_lossy().into_owned()),
            ..Default::default()
        };
        self.update(entry, &changes)?;
        Ok(bound)
    }

    /// Unbind the entry's icon. The file itself is kept.
    pub fn clear_icon(&mut self, entry: &ProfileEntry) -> Result<()> {
        self.update(entry, &icon::clear_icon())?;
        info!("icon cleared for profile '{}'", entry.name());
        Ok(())
    }

    /// Run `edit` on a copy of the row's document, persist the copy if the
    /// edit reports a change, then reload. Memory is untouched on failure.
    fn mutate_row<F>(&mut self, row_id: i64, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Value) -> Result<bool>,
    {
        let row = self
            .rows
            .iter()
            .find(|row| row.id == row_id)
            .ok_or_else(|| StoreError::save_failed(row_id, "row is not loaded"))?;

        let mut document = row.document.clone();
        if !edit(&mut document)? {
            warn!("row {row_id}: nothing to change");
            return Ok(false);
        }

        self.db.save_row(row_id, &document, &row.raw)?;
        self.load()?;
        Ok(true)
    }
}
