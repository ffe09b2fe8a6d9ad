use std::path::PathBuf;

use log::{debug, error, warn};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use crate::error::{Result, StoreError};

const TABLE_NAME: &str = "DATA";
const ID_COLUMN: &str = "_id";
const JSON_COLUMN: &str = "FILE";

/// One record of the settings table with its decoded document.
#[derive(Debug, Clone)]
pub struct Row {
    pub id: i64,
    pub document: Value,
    /// Bytes exactly as read, used to detect writes by another process.
    pub raw: Vec<u8>,
}

/// Key -> document storage over the single-table settings database.
///
/// Every call opens its own connection and drops it before returning, so no
/// handle outlives an operation.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Check that the database exists and the settings table is readable.
    ///
    /// The file is never created: a missing database is reported as
    /// [`StoreError::StorageUnavailable`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let db = Self { path: path.into() };
        if !db.path.is_file() {
            return Err(db.unavailable("file not found"));
        }

        let conn = db.connect()?;
        conn.query_row(
            &format!("SELECT count(*) FROM {TABLE_NAME}"),
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| db.unavailable(e))?;
        Ok(db)
    }

    fn connect(&self) -> Result<Connection> {
        debug!("opening database {}", self.path.display());
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, reason: impl ToString) -> StoreError {
        StoreError::StorageUnavailable {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Read every row that holds a parsable JSON document, in storage order.
    ///
    /// Empty rows are skipped silently; rows that fail to decode are logged
    /// and skipped without affecting the others.
    pub fn load_all(&self) -> Result<Vec<Row>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {ID_COLUMN}, {JSON_COLUMN} FROM {TABLE_NAME}"))
            .map_err(|e| self.unavailable(e))?;
        let raw_rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let data = blob_bytes(row.get_ref(1)?);
                Ok((id, data))
            })
            .map_err(|e| self.unavailable(e))?;

        let mut rows = Vec::new();
        for raw_row in raw_rows {
            let (id, data) = raw_row.map_err(|e| self.unavailable(e))?;
            let Some(raw) = data.filter(|bytes| !bytes.is_empty()) else {
                continue;
            };
            match decode_document(id, &raw) {
                Ok(document) => rows.push(Row { id, document, raw }),
                Err(err) => warn!("skipping row: {err}"),
            }
        }
        Ok(rows)
    }

    /// Overwrite the document of `row_id`, returning the bytes written.
    ///
    /// `expected` holds the bytes the caller loaded; if the stored value
    /// differs, nothing is written and [`StoreError::RowConflict`] is returned.
    pub fn save_row(&self, row_id: i64, document: &Value, expected: &[u8]) -> Result<Vec<u8>> {
        let result = self.write_row(row_id, document, expected);
        if let Err(err) = &result {
            error!("{err}");
        }
        result
    }

    fn write_row(&self, row_id: i64, document: &Value, expected: &[u8]) -> Result<Vec<u8>> {
        let blob = encode_document(document).map_err(|e| StoreError::save_failed(row_id, e))?;

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::save_failed(row_id, e))?;

        let current = tx
            .query_row(
                &format!("SELECT {JSON_COLUMN} FROM {TABLE_NAME} WHERE {ID_COLUMN} = ?1"),
                params![row_id],
                |row| Ok(blob_bytes(row.get_ref(0)?)),
            )
            .optional()
            .map_err(|e| StoreError::save_failed(row_id, e))?;

        match current {
            None => return Err(StoreError::save_failed(row_id, "row no longer exists")),
            Some(stored) if stored.as_deref().unwrap_or_default() != expected => {
                return Err(StoreError::RowConflict { row_id });
            }
            Some(_) => {}
        }

        let changed = tx
            .execute(
                &format!("UPDATE {TABLE_NAME} SET {JSON_COLUMN} = ?1 WHERE {ID_COLUMN} = ?2"),
                params![blob, row_id],
            )
            .map_err(|e| StoreError::save_failed(row_id, e))?;
        if changed == 0 {
            return Err(StoreError::save_failed(row_id, "no rows updated"));
        }
        tx.commit().map_err(|e| StoreError::save_failed(row_id, e))?;

        debug!("row {row_id} updated in database");
        Ok(blob)
    }
}

/// Accept BLOB and TEXT storage alike; anything else counts as empty.
fn blob_bytes(value: ValueRef<'_>) -> Option<Vec<u8>> {
    match value {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Some(bytes.to_vec()),
        _ => None,
    }
}

fn decode_document(row_id: i64, raw: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(raw).map_err(|e| StoreError::RowDecode {
        row_id,
        reason: e.to_string(),
    })?;
    serde_json::from_str(text).map_err(|e| StoreError::RowDecode {
        row_id,
        reason: e.to_string(),
    })
}

/// Pretty-printed with two-space indentation, like the desktop application.
pub fn encode_document(document: &Value) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(document)
}


#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_open_missing_database() {
        let dir = TempDir::new().unwrap();
        let err = Database::open(dir.path().join("absent.db")).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
        assert!(!dir.path().join("absent.db").exists());
    }

    #[test]
    fn test_open_without_settings_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (x INTEGER);")
            .unwrap();

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_load_all_skips_empty_and_undecodable_rows() {
        let dir = TempDir::new().unwrap();
        let path = settings_db(
            dir.path(),
            &[
                json_blob(&json!({"a": 1})),
                None,
                Some(Vec::new()),
                Some(b"{not json".to_vec()),
                Some(vec![0xff, 0xfe, 0x00]),
                json_blob(&json!({"b": 2})),
            ],
        );

        let db = Database::open(&path).unwrap();
        let rows = db.load_all().unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 6]);
        assert_eq!(rows[0].document, json!({"a": 1}));
        assert_eq!(rows[1].document, json!({"b": 2}));
    }

    #[test]
    fn test_load_all_accepts_text_column_values() {
        let dir = TempDir::new().unwrap();
        let path = settings_db(dir.path(), &[]);
        Connection::open(&path)
            .unwrap()
            .execute("INSERT INTO DATA (FILE) VALUES ('{\"t\": true}')", [])
            .unwrap();

        let rows = Database::open(&path).unwrap().load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].document, json!({"t": true}));
    }

    #[test]
    fn test_save_row_round_trips_document() {
        let dir = TempDir::new().unwrap();
        let original = json!({"z": [1, 2, {"k": null}], "a": {"nested": "v"}, "n": 1.5});
        let path = settings_db(dir.path(), &[json_blob(&original)]);
        let db = Database::open(&path).unwrap();

        let row = db.load_all().unwrap().remove(0);
        let written = db.save_row(row.id, &row.document, &row.raw).unwrap();
        assert_eq!(written, read_blob(&path, row.id));

        let reloaded = db.load_all().unwrap().remove(0);
        assert_eq!(reloaded.document, original);
        // two-space indentation
        assert!(String::from_utf8(written).unwrap().contains("\n  \"z\""));
    }

    #[test]
    fn test_save_row_detects_external_write() {
        let dir = TempDir::new().unwrap();
        let path = settings_db(dir.path(), &[json_blob(&json!({"v": 1}))]);
        let db = Database::open(&path).unwrap();
        let row = db.load_all().unwrap().remove(0);

        write_blob(&path, row.id, br#"{"v": 2}"#);

        let err = db.save_row(row.id, &json!({"v": 3}), &row.raw).unwrap_err();
        assert!(matches!(err, StoreError::RowConflict { row_id: 1 }));
        assert_eq!(read_blob(&path, row.id), br#"{"v": 2}"#.to_vec());
    }

    #[test]
    fn test_save_row_missing_row_fails() {
        let dir = TempDir::new().unwrap();
        let path = settings_db(dir.path(), &[json_blob(&json!({}))]);
        let db = Database::open(&path).unwrap();

        let err = db.save_row(42, &json!({}), b"{}").unwrap_err();
        assert!(matches!(err, StoreError::SaveFailed { row_id: 42, .. }));
    }
}
