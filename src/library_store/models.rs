//! Row and payload types for the listening library database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Canonical import payload. This is the one shape every supported import
/// format is normalized into before it reaches the bulk writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanonicalPayload {
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub tracks: Vec<Track>,
    pub plays: Vec<Play>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub album_id: Option<String>,
    #[serde(default)]
    pub artist_ids: Vec<String>,
    #[serde(default)]
    pub popularity: Option<i64>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub danceability: Option<f64>,
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub tempo: Option<f64>,
}

impl Track {
    /// All four feature values, or None when any is missing. Partial feature
    /// sets never contribute to the taste mean.
    pub fn audio_features(&self) -> Option<AudioFeatures> {
        Some(AudioFeatures {
            energy: self.energy?,
            danceability: self.danceability?,
            valence: self.valence?,
            tempo: self.tempo?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    pub tempo: f64,
}

impl AudioFeatures {
    /// Fallback vector for candidates without provider features.
    pub fn neutral() -> Self {
        AudioFeatures {
            energy: 0.5,
            danceability: 0.5,
            valence: 0.5,
            tempo: 120.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub track_id: String,
    pub played_at: DateTime<Utc>,
}

/// Where a play event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSource {
    FileNative,
    FilePrivacy,
    ProviderSync,
}

impl ImportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportSource::FileNative => "file_native",
            ImportSource::FilePrivacy => "file_privacy",
            ImportSource::ProviderSync => "provider_sync",
        }
    }
}

/// One user's play event joined to its track, artists, album and genres.
/// Everything the aggregation engine needs in a single pass.
#[derive(Debug, Clone)]
pub struct PlayWithTrack {
    pub played_at: DateTime<Utc>,
    pub track_id: String,
    pub track_name: String,
    pub duration_ms: i64,
    pub image_url: Option<String>,
    pub album: Option<(String, String)>,
    pub artists: Vec<(String, String)>,
    pub genres: Vec<String>,
    pub features: Option<AudioFeatures>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub rowid: i64,
    pub handle: String,
    pub last_import_at: Option<DateTime<Utc>>,
    pub last_import_status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportRunStatus {
    Running,
    Completed,
    Failed,
}

impl ImportRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportRunStatus::Running => "running",
            ImportRunStatus::Completed => "completed",
            ImportRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ImportRunStatus::Running),
            "completed" => Some(ImportRunStatus::Completed),
            "failed" => Some(ImportRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: String,
    #[serde(skip)]
    pub user_rowid: i64,
    pub status: ImportRunStatus,
    pub message: Option<String>,
    pub imported_plays: i64,
    pub imported_tracks: i64,
    pub rate_limited_hits: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Cached daily recommendation run, one live row per (user, UTC date).
#[derive(Debug, Clone)]
pub struct RecRun {
    pub user_rowid: i64,
    pub date: NaiveDate,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
