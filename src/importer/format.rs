//! Import format detection.
//!
//! Every uploaded file is classified exactly once, before any parsing side
//! effects (network lookups) begin. Detection tries the supported schemas
//! in order: canonical, name-based privacy export, URI-based privacy export.

use super::ImportError;
use crate::library_store::CanonicalPayload;
use serde::Deserialize;

/// Name-based privacy export row (the account-data download).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameBasedEntry {
    pub end_time: String,
    pub artist_name: String,
    pub track_name: String,
    pub ms_played: i64,
}

/// Extended privacy export row. `spotify_track_uri` is null for podcast
/// episodes, which are dropped downstream.
#[derive(Debug, Clone, Deserialize)]
pub struct UriBasedEntry {
    pub ts: String,
    #[serde(default)]
    pub ms_played: i64,
    #[serde(default)]
    pub spotify_track_uri: Option<String>,
}

/// One uploaded file, classified.
#[derive(Debug)]
pub enum DetectedFile {
    Native(CanonicalPayload),
    NameBased(Vec<NameBasedEntry>),
    UriBased(Vec<UriBasedEntry>),
}

impl DetectedFile {
    fn kind(&self) -> &'static str {
        match self {
            DetectedFile::Native(_) => "native",
            DetectedFile::NameBased(_) => "name-based",
            DetectedFile::UriBased(_) => "uri-based",
        }
    }
}

pub fn detect_file(bytes: &[u8]) -> Result<DetectedFile, ImportError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    match &value {
        serde_json::Value::Object(map) => {
            let has_canonical_key = ["albums", "artists", "tracks", "plays"]
                .iter()
                .any(|k| map.contains_key(*k));
            if !has_canonical_key {
                return Err(ImportError::UnsupportedFormat);
            }
            let payload: CanonicalPayload = serde_json::from_value(value)?;
            Ok(DetectedFile::Native(payload))
        }
        serde_json::Value::Array(_) => {
            if let Ok(entries) =
                serde_json::from_value::<Vec<NameBasedEntry>>(value.clone())
            {
                return Ok(DetectedFile::NameBased(entries));
            }
            if let Ok(entries) = serde_json::from_value::<Vec<UriBasedEntry>>(value) {
                return Ok(DetectedFile::UriBased(entries));
            }
            Err(ImportError::UnsupportedFormat)
        }
        _ => Err(ImportError::UnsupportedFormat),
    }
}

/// Merge multiple uploaded files. Arrays concatenate only when every file
/// matched the same format; mixing shapes is refused rather than merged
/// best-effort.
pub fn merge_files(mut files: Vec<DetectedFile>) -> Result<DetectedFile, ImportError> {
    let first = match files.len() {
        0 => return Err(ImportError::UnsupportedFormat),
        1 => return Ok(files.remove(0)),
        _ => files.remove(0),
    };

    match first {
        DetectedFile::Native(mut payload) => {
            for file in files {
                match file {
                    DetectedFile::Native(other) => {
                        payload.albums.extend(other.albums);
                        payload.artists.extend(other.artists);
                        payload.tracks.extend(other.tracks);
                        payload.plays.extend(other.plays);
                    }
                    other => {
                        tracing::warn!(
                            "Refusing to merge {} file into native import",
                            other.kind()
                        );
                        return Err(ImportError::MixedFormats);
                    }
                }
            }
            Ok(DetectedFile::Native(payload))
        }
        DetectedFile::NameBased(mut entries) => {
            for file in files {
                match file {
                    DetectedFile::NameBased(other) => entries.extend(other),
                    _ => return Err(ImportError::MixedFormats),
                }
            }
            Ok(DetectedFile::NameBased(entries))
        }
        DetectedFile::UriBased(mut entries) => {
            for file in files {
                match file {
                    DetectedFile::UriBased(other) => entries.extend(other),
                    _ => return Err(ImportError::MixedFormats),
                }
            }
            Ok(DetectedFile::UriBased(entries))
        }
    }
}
