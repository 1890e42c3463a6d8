//! Bulk-upserts a canonical payload into the library store.
//!
//! Write order is albums, artists, tracks, plays so foreign references
//! always land after their targets. Tracks that point at entities missing
//! from both the payload and the store get those references pruned rather
//! than failing the whole import.

use super::ImportError;
use crate::library_store::{CanonicalPayload, ImportSource, SqliteLibraryStore, Track};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub imported_plays: i64,
    pub skipped_plays: i64,
    pub imported_tracks: i64,
    pub imported_albums: i64,
    pub imported_artists: i64,
}

pub struct BulkUpsertWriter {
    store: SqliteLibraryStore,
    chunk_size: usize,
}

impl BulkUpsertWriter {
    pub fn new(store: SqliteLibraryStore, chunk_size: usize) -> Self {
        Self { store, chunk_size }
    }

    /// Write one payload for one user. Idempotent: re-running the same
    /// payload upserts the same entities and skips every duplicate play.
    pub fn write(
        &self,
        user_rowid: i64,
        payload: CanonicalPayload,
        source: ImportSource,
    ) -> Result<ImportCounts, ImportError> {
        let CanonicalPayload {
            albums,
            artists,
            mut tracks,
            plays,
        } = payload;

        // Last occurrence wins within the payload.
        let albums = dedup_by_id(albums, |a| a.id.clone());
        let artists = dedup_by_id(artists, |a| a.id.clone());
        tracks = dedup_by_id(tracks, |t| t.id.clone());

        let referenced_albums: Vec<&str> = tracks
            .iter()
            .filter_map(|t| t.album_id.as_deref())
            .collect();
        let referenced_artists: Vec<&str> = tracks
            .iter()
            .flat_map(|t| t.artist_ids.iter().map(|s| s.as_str()))
            .collect();
        let album_accept = self
            .accept_set(
                albums.iter().map(|a| a.id.as_str()),
                referenced_albums,
                |ids| self.store.existing_album_ids(ids),
            )
            .map_err(ImportError::from_store_error)?;
        let artist_accept = self
            .accept_set(
                artists.iter().map(|a| a.id.as_str()),
                referenced_artists,
                |ids| self.store.existing_artist_ids(ids),
            )
            .map_err(ImportError::from_store_error)?;

        prune_dangling_refs(&mut tracks, &album_accept, &artist_accept);

        let track_ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
        let known_albums = self
            .store
            .existing_album_ids(&albums.iter().map(|a| a.id.clone()).collect::<Vec<_>>())
            .map_err(ImportError::from_store_error)?;
        let known_artists = self
            .store
            .existing_artist_ids(&artists.iter().map(|a| a.id.clone()).collect::<Vec<_>>())
            .map_err(ImportError::from_store_error)?;
        let known_tracks = self
            .store
            .existing_track_ids(&track_ids)
            .map_err(ImportError::from_store_error)?;

        for chunk in albums.chunks(self.chunk_size) {
            self.store
                .upsert_albums(chunk)
                .map_err(ImportError::from_store_error)?;
        }
        for chunk in artists.chunks(self.chunk_size) {
            self.store
                .upsert_artists(chunk)
                .map_err(ImportError::from_store_error)?;
        }
        for chunk in tracks.chunks(self.chunk_size) {
            self.store
                .upsert_tracks(chunk)
                .map_err(ImportError::from_store_error)?;
        }

        let mut inserted = 0;
        let mut skipped = 0;
        for chunk in plays.chunks(self.chunk_size) {
            let (i, s) = self
                .store
                .insert_plays(user_rowid, chunk, source)
                .map_err(ImportError::from_store_error)?;
            inserted += i;
            skipped += s;
        }

        let counts = ImportCounts {
            imported_plays: inserted,
            skipped_plays: skipped,
            imported_tracks: (tracks.len() - known_tracks.len()) as i64,
            imported_albums: (albums.len() - known_albums.len()) as i64,
            imported_artists: (artists.len() - known_artists.len()) as i64,
        };

        self.store
            .update_last_import(user_rowid, &Utc::now(), "completed")
            .map_err(ImportError::from_store_error)?;

        info!(
            "Imported for user {}: {} plays ({} duplicates skipped), {} new tracks, {} new albums, {} new artists [{}]",
            user_rowid,
            counts.imported_plays,
            counts.skipped_plays,
            counts.imported_tracks,
            counts.imported_albums,
            counts.imported_artists,
            source.as_str(),
        );
        Ok(counts)
    }

    /// Ids acceptable as a reference target: everything in this payload plus
    /// every referenced id already stored from a prior import.
    fn accept_set<'a>(
        &self,
        payload_ids: impl Iterator<Item = &'a str>,
        referenced: Vec<&str>,
        existing: impl Fn(&[String]) -> anyhow::Result<HashSet<String>>,
    ) -> anyhow::Result<HashSet<String>> {
        let mut accept: HashSet<String> = payload_ids.map(|s| s.to_string()).collect();
        let absent: Vec<String> = referenced
            .into_iter()
            .filter(|id| !accept.contains(*id))
            .map(|s| s.to_string())
            .collect();
        if !absent.is_empty() {
            accept.extend(existing(&absent)?);
        }
        Ok(accept)
    }
}

fn dedup_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> String) -> Vec<T> {
    let mut by_id: HashMap<String, T> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for item in items {
        let key = id(&item);
        if by_id.insert(key.clone(), item).is_none() {
            order.push(key);
        }
    }
    order
        .into_iter()
        .filter_map(|key| by_id.remove(&key))
        .collect()
}

pub(crate) fn prune_dangling_refs(
    tracks: &mut [Track],
    album_accept: &HashSet<String>,
    artist_accept: &HashSet<String>,
) {
    for track in tracks.iter_mut() {
        if let Some(album_id) = &track.album_id {
            if !album_accept.contains(album_id) {
                warn!(
                    "Track {} references unknown album {}, dropping the reference",
                    track.id, album_id
                );
                track.album_id = None;
            }
        }
        let before = track.artist_ids.len();
        track.artist_ids.retain(|id| artist_accept.contains(id));
        if track.artist_ids.len() != before {
            warn!(
                "Track {} referenced {} unknown artists, dropped",
                track.id,
                before - track.artist_ids.len()
            );
        }
    }
}
