//! Normalizes detected import files into the canonical payload.
//!
//! Native payloads pass through untouched. Privacy exports need track
//! identity resolved against the provider: name-based entries through one
//! search per distinct (track, artist) pair, URI-based entries through
//! batched id lookups with a per-id fallback so one bad id never sinks a
//! whole batch.

use super::format::{DetectedFile, NameBasedEntry, UriBasedEntry};
use super::{ImportError, MIN_PLAY_MS};
use crate::library_store::{Album, Artist, CanonicalPayload, Play, Track};
use crate::provider::{models::ProviderTrack, ProviderGateway};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Track-id batch size for `/tracks?ids=` lookups.
const TRACK_LOOKUP_BATCH: usize = 50;

lazy_static! {
    static ref TRACK_URI_RE: Regex =
        Regex::new(r"^spotify:track:([0-9A-Za-z]{22})$").expect("invalid track URI regex");
}

/// Parse a track URI into its bare 22-character base62 id.
pub fn parse_track_uri(uri: &str) -> Option<&str> {
    TRACK_URI_RE
        .captures(uri)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Privacy exports write local-looking `YYYY-MM-DD HH:MM:SS` timestamps;
/// they are UTC, so a `T` separator and `Z` suffix make them ISO-8601.
pub fn normalize_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let candidate = if raw.contains(' ') && !raw.ends_with('Z') {
        format!("{}Z", raw.replacen(' ', "T", 1))
    } else {
        raw.to_string()
    };
    DateTime::parse_from_rfc3339(&candidate)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub struct ImportNormalizer<'a> {
    gateway: &'a ProviderGateway,
}

impl<'a> ImportNormalizer<'a> {
    pub fn new(gateway: &'a ProviderGateway) -> Self {
        Self { gateway }
    }

    pub async fn normalize(
        &self,
        user_rowid: i64,
        file: DetectedFile,
    ) -> Result<CanonicalPayload, ImportError> {
        match file {
            DetectedFile::Native(payload) => Ok(payload),
            DetectedFile::NameBased(entries) => self.normalize_name_based(user_rowid, entries).await,
            DetectedFile::UriBased(entries) => self.normalize_uri_based(user_rowid, entries).await,
        }
    }

    async fn normalize_name_based(
        &self,
        user_rowid: i64,
        entries: Vec<NameBasedEntry>,
    ) -> Result<CanonicalPayload, ImportError> {
        let entries: Vec<NameBasedEntry> = entries
            .into_iter()
            .filter(|e| e.ms_played >= MIN_PLAY_MS)
            .collect();

        // One search per distinct (track, artist) pair; misses are cached
        // too so a pair is never searched twice.
        let mut resolved: HashMap<(String, String), Option<ProviderTrack>> = HashMap::new();
        for entry in &entries {
            let key = (entry.track_name.clone(), entry.artist_name.clone());
            if resolved.contains_key(&key) {
                continue;
            }
            let hit = self
                .gateway
                .search_track(user_rowid, &entry.track_name, &entry.artist_name)
                .await?;
            if hit.is_none() {
                debug!(
                    "No search match for '{}' by '{}', dropping its plays",
                    entry.track_name, entry.artist_name
                );
            }
            resolved.insert(key, hit);
        }

        let mut builder = PayloadBuilder::default();
        for track in resolved.values().flatten() {
            builder.add_track(track);
        }
        for entry in &entries {
            let key = (entry.track_name.clone(), entry.artist_name.clone());
            let Some(Some(track)) = resolved.get(&key) else {
                continue;
            };
            let Some(played_at) = normalize_timestamp(&entry.end_time) else {
                warn!("Unparseable play timestamp '{}', dropping play", entry.end_time);
                continue;
            };
            builder.add_play(&track.id, played_at);
        }
        Ok(builder.build())
    }

    async fn normalize_uri_based(
        &self,
        user_rowid: i64,
        entries: Vec<UriBasedEntry>,
    ) -> Result<CanonicalPayload, ImportError> {
        let entries: Vec<UriBasedEntry> = entries
            .into_iter()
            .filter(|e| e.ms_played >= MIN_PLAY_MS)
            .collect();

        let mut distinct_ids: Vec<String> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();
        for entry in &entries {
            if let Some(id) = entry.spotify_track_uri.as_deref().and_then(parse_track_uri) {
                if seen.insert(id.to_string(), ()).is_none() {
                    distinct_ids.push(id.to_string());
                }
            }
        }

        let mut resolved: HashMap<String, ProviderTrack> = HashMap::new();
        for batch in distinct_ids.chunks(TRACK_LOOKUP_BATCH) {
            for track in self.lookup_batch(user_rowid, batch).await? {
                resolved.insert(track.id.clone(), track);
            }
        }

        let mut builder = PayloadBuilder::default();
        for track in resolved.values() {
            builder.add_track(track);
        }
        for entry in &entries {
            let Some(id) = entry.spotify_track_uri.as_deref().and_then(parse_track_uri) else {
                continue;
            };
            if !resolved.contains_key(id) {
                continue;
            }
            let Some(played_at) = normalize_timestamp(&entry.ts) else {
                warn!("Unparseable play timestamp '{}', dropping play", entry.ts);
                continue;
            };
            builder.add_play(id, played_at);
        }
        Ok(builder.build())
    }

    /// Batch lookup with per-id fallback: when the provider rejects the whole
    /// batch with a 4xx, each id is retried alone and only the bad ones are
    /// dropped. Auth and availability errors propagate.
    async fn lookup_batch(
        &self,
        user_rowid: i64,
        ids: &[String],
    ) -> Result<Vec<ProviderTrack>, ImportError> {
        match self.gateway.tracks(user_rowid, ids).await {
            Ok(tracks) => Ok(tracks),
            Err(err) if err.is_client_rejection() => {
                warn!(
                    "Batch track lookup of {} ids rejected ({}), retrying per id",
                    ids.len(),
                    err
                );
                let mut tracks = Vec::new();
                for id in ids {
                    match self.gateway.tracks(user_rowid, std::slice::from_ref(id)).await {
                        Ok(mut found) => tracks.append(&mut found),
                        Err(e) if e.is_client_rejection() => {
                            debug!("Dropping unresolvable track id {}: {}", id, e);
                        }
                        Err(e) => return Err(ImportError::Provider(e)),
                    }
                }
                Ok(tracks)
            }
            Err(err) => Err(ImportError::Provider(err)),
        }
    }
}

/// Accumulates provider tracks into a deduplicated canonical payload.
#[derive(Default)]
struct PayloadBuilder {
    albums: HashMap<String, Album>,
    artists: HashMap<String, Artist>,
    tracks: HashMap<String, Track>,
    plays: Vec<Play>,
}

impl PayloadBuilder {
    fn add_track(&mut self, track: &ProviderTrack) {
        if let Some(album) = track.canonical_album() {
            self.albums.insert(album.id.clone(), album);
        }
        for artist in track.canonical_artists() {
            self.artists.entry(artist.id.clone()).or_insert(artist);
        }
        self.tracks.insert(track.id.clone(), track.to_canonical());
    }

    fn add_play(&mut self, track_id: &str, played_at: DateTime<Utc>) {
        self.plays.push(Play {
            track_id: track_id.to_string(),
            played_at,
        });
    }

    fn build(self) -> CanonicalPayload {
        CanonicalPayload {
            albums: self.albums.into_values().collect(),
            artists: self.artists.into_values().collect(),
            tracks: self.tracks.into_values().collect(),
            plays: self.plays,
        }
    }
}
