//! History import pipeline: format detection, normalization into the
//! canonical payload, idempotent bulk persistence and run orchestration.

mod format;
mod manager;
mod normalizer;
mod writer;

pub use format::{detect_file, merge_files, DetectedFile, NameBasedEntry, UriBasedEntry};
pub use manager::{ImportConfig, ImportManager};
pub use normalizer::ImportNormalizer;
pub use writer::{BulkUpsertWriter, ImportCounts};

use crate::provider::ProviderError;
use thiserror::Error;

/// Payloads (single or cumulative multi-file) above this size are rejected
/// before parsing.
pub const MAX_PAYLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Plays with less listened time than this are too short to count as an
/// intentional listen and are dropped before normalization.
pub const MIN_PLAY_MS: i64 = 30_000;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Payload too large: uploads are limited to 200 MB")]
    PayloadTooLarge,

    #[error(
        "Unrecognized import format; accepted formats: canonical library export, \
         privacy export (name-based entries), extended privacy export (track-URI entries)"
    )]
    UnsupportedFormat,

    #[error("Uploaded files use different import formats and cannot be merged")]
    MixedFormats,

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Import data failed a consistency check")]
    DataConsistency,

    #[error("Import transaction timed out; retry with a smaller file")]
    RetrySmaller,

    #[error("An import for this user is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    /// Classify a store failure: constraint violations are data-consistency
    /// failures, busy/locked databases ask the caller for a smaller file.
    pub(crate) fn from_store_error(err: anyhow::Error) -> Self {
        if let Some(sqlite_err) = err.downcast_ref::<rusqlite::Error>() {
            if let rusqlite::Error::SqliteFailure(code, _) = sqlite_err {
                return match code.code {
                    rusqlite::ErrorCode::ConstraintViolation => ImportError::DataConsistency,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        ImportError::RetrySmaller
                    }
                    _ => ImportError::Store(err),
                };
            }
        }
        ImportError::Store(err)
    }
}
