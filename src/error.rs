// Profile store error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database not available at {}: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("row {row_id} could not be decoded: {reason}")]
    RowDecode { row_id: i64, reason: String },

    #[error("no database rows found to attach a new profile to")]
    NoRowsAvailable,

    #[error("row {row_id} has an `applications` section that is not a profile list")]
    MalformedDocument { row_id: i64 },

    #[error("profile '{name}' no longer matches any record in row {row_id}")]
    StaleEntry { row_id: i64, name: String },

    #[error("row {row_id} was modified by another writer since it was loaded")]
    RowConflict { row_id: i64 },

    #[error("failed to save row {row_id}: {reason}")]
    SaveFailed { row_id: i64, reason: String },

    #[error("could not open image {}: {source}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("could not write bitmap {}: {source}", path.display())]
    ImageWriteFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl StoreError {
    pub(crate) fn save_failed(row_id: i64, reason: impl ToString) -> Self {
        StoreError::SaveFailed {
            row_id,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
