//! Orchestrates file imports and background provider syncs.

use super::format::{detect_file, merge_files, DetectedFile};
use super::normalizer::{normalize_timestamp, ImportNormalizer};
use super::writer::{BulkUpsertWriter, ImportCounts};
use super::{ImportError, MAX_PAYLOAD_BYTES};
use crate::library_store::{
    CanonicalPayload, ImportRun, ImportRunStatus, ImportSource, Play, SqliteLibraryStore,
};
use crate::provider::ProviderGateway;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Recently-played pages fetched per sync run.
    pub max_sync_pages: usize,
    /// Rows per upsert transaction.
    pub chunk_size: usize,
    /// A running import younger than this blocks a new sync for the same
    /// user; older running rows are treated as crashed and ignored.
    pub run_guard_minutes: i64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            max_sync_pages: 20,
            chunk_size: 500,
            run_guard_minutes: 15,
        }
    }
}

pub struct ImportManager {
    store: SqliteLibraryStore,
    gateway: Arc<ProviderGateway>,
    config: ImportConfig,
}

const ARTIST_LOOKUP_BATCH: usize = 50;
const FEATURES_LOOKUP_BATCH: usize = 100;

impl ImportManager {
    pub fn new(
        store: SqliteLibraryStore,
        gateway: Arc<ProviderGateway>,
        config: ImportConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    fn writer(&self) -> BulkUpsertWriter {
        BulkUpsertWriter::new(self.store.clone(), self.config.chunk_size)
    }

    /// Import one or more uploaded files for a user. All files of one upload
    /// must share a format; the merged payload is normalized and written as
    /// a single unit.
    pub async fn import_files(
        &self,
        user_rowid: i64,
        files: Vec<Vec<u8>>,
    ) -> Result<ImportCounts, ImportError> {
        let total: usize = files.iter().map(|f| f.len()).sum();
        if total > MAX_PAYLOAD_BYTES {
            return Err(ImportError::PayloadTooLarge);
        }

        let mut detected: Vec<DetectedFile> = Vec::with_capacity(files.len());
        for file in &files {
            detected.push(detect_file(file)?);
        }
        let merged = merge_files(detected)?;
        let source = match &merged {
            DetectedFile::Native(_) => ImportSource::FileNative,
            _ => ImportSource::FilePrivacy,
        };

        let normalizer = ImportNormalizer::new(&self.gateway);
        let payload = normalizer.normalize(user_rowid, merged).await?;
        self.writer().write(user_rowid, payload, source)
    }

    /// Kick off a background provider sync. Returns the run record
    /// immediately; progress is queried through the import status endpoint.
    pub fn start_provider_sync(
        self: &Arc<Self>,
        user_rowid: i64,
    ) -> Result<ImportRun, ImportError> {
        let cutoff = Utc::now() - Duration::minutes(self.config.run_guard_minutes);
        if self
            .store
            .has_running_import_since(user_rowid, &cutoff)
            .map_err(ImportError::from_store_error)?
        {
            return Err(ImportError::AlreadyRunning);
        }

        let run = ImportRun {
            id: Uuid::new_v4().to_string(),
            user_rowid,
            status: ImportRunStatus::Running,
            message: None,
            imported_plays: 0,
            imported_tracks: 0,
            rate_limited_hits: 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.store
            .insert_import_run(&run)
            .map_err(ImportError::from_store_error)?;

        let manager = Arc::clone(self);
        let run_id = run.id.clone();
        tokio::spawn(async move {
            manager.run_provider_sync(user_rowid, run_id).await;
        });
        Ok(run)
    }

    async fn run_provider_sync(&self, user_rowid: i64, run_id: String) {
        let throttle_before = self.gateway.throttle_hits();
        let outcome = self.sync_once(user_rowid).await;
        let throttled = (self.gateway.throttle_hits() - throttle_before) as i64;
        let finished_at = Utc::now();

        let result = match outcome {
            Ok(counts) => {
                info!(
                    "Provider sync {} finished: {} plays, {} tracks, {} throttle hits",
                    run_id, counts.imported_plays, counts.imported_tracks, throttled
                );
                self.store.finish_import_run(
                    &run_id,
                    ImportRunStatus::Completed,
                    None,
                    counts.imported_plays,
                    counts.imported_tracks,
                    throttled,
                    &finished_at,
                )
            }
            Err(err) => {
                warn!("Provider sync {} failed: {}", run_id, err);
                self.store.finish_import_run(
                    &run_id,
                    ImportRunStatus::Failed,
                    Some(&err.to_string()),
                    0,
                    0,
                    throttled,
                    &finished_at,
                )
            }
        };
        if let Err(err) = result {
            error!("Could not record outcome of sync run {}: {}", run_id, err);
        }
    }

    /// One full sync pass: page through recently-played history, merge in the
    /// user's top tracks and artists, enrich the collected tracks with audio
    /// features and full artist objects, then hand everything to the bulk
    /// writer.
    async fn sync_once(&self, user_rowid: i64) -> Result<ImportCounts, ImportError> {
        let mut page = self.gateway.recently_played_first_page(user_rowid).await?;
        let mut items = page.items;
        let mut pages_fetched = 1;
        while let Some(next) = page.next.take() {
            if pages_fetched >= self.config.max_sync_pages {
                break;
            }
            page = self
                .gateway
                .recently_played_next_page(user_rowid, &next)
                .await?;
            items.append(&mut page.items);
            pages_fetched += 1;
        }

        let mut collector = PayloadCollector::default();
        for item in &items {
            collector.collect_track(&item.track);
            match normalize_timestamp(&item.played_at) {
                Some(played_at) => collector.payload.plays.push(Play {
                    track_id: item.track.id.clone(),
                    played_at,
                }),
                None => warn!(
                    "Provider returned unparseable played_at '{}', dropping play",
                    item.played_at
                ),
            }
        }

        // Top lists round out the library beyond the recent-history window:
        // favorite tracks, plus artist objects whose genre tags feed the
        // recommendation seeds.
        let top_tracks = self.gateway.top_tracks(user_rowid, "medium_term").await?;
        for track in &top_tracks.items {
            collector.collect_track(track);
        }
        // Top artists arrive as full objects; only the remainder of the
        // collected artist ids needs a lookup round-trip.
        let top_artists = self.gateway.top_artists(user_rowid).await?;
        let covered: HashSet<&str> = top_artists.items.iter().map(|a| a.id.as_str()).collect();
        let missing: Vec<String> = collector
            .artist_ids
            .iter()
            .filter(|id| !covered.contains(id.as_str()))
            .cloned()
            .collect();

        let mut payload = collector.payload;
        for artist in &top_artists.items {
            payload.artists.push(artist.to_canonical());
        }

        self.enrich_features(user_rowid, &mut payload).await?;
        self.enrich_artists(user_rowid, &mut payload, &missing).await?;

        self.writer()
            .write(user_rowid, payload, ImportSource::ProviderSync)
    }

    async fn enrich_features(
        &self,
        user_rowid: i64,
        payload: &mut CanonicalPayload,
    ) -> Result<(), ImportError> {
        let ids: Vec<String> = payload.tracks.iter().map(|t| t.id.clone()).collect();
        for batch in ids.chunks(FEATURES_LOOKUP_BATCH) {
            for features in self.gateway.audio_features(user_rowid, batch).await? {
                if let Some(track) = payload.tracks.iter_mut().find(|t| t.id == features.id) {
                    track.energy = Some(features.energy);
                    track.danceability = Some(features.danceability);
                    track.valence = Some(features.valence);
                    track.tempo = Some(features.tempo);
                }
            }
        }
        Ok(())
    }

    async fn enrich_artists(
        &self,
        user_rowid: i64,
        payload: &mut CanonicalPayload,
        ids: &[String],
    ) -> Result<(), ImportError> {
        for batch in ids.chunks(ARTIST_LOOKUP_BATCH) {
            for artist in self.gateway.artists(user_rowid, batch).await? {
                payload.artists.push(artist.to_canonical());
            }
        }
        Ok(())
    }
}

/// Accumulates provider tracks into a canonical payload, deduplicating
/// tracks, albums and artist ids across the history and top-list sources.
#[derive(Default)]
struct PayloadCollector {
    payload: CanonicalPayload,
    seen_tracks: HashSet<String>,
    seen_albums: HashSet<String>,
    seen_artists: HashSet<String>,
    artist_ids: Vec<String>,
}

impl PayloadCollector {
    fn collect_track(&mut self, track: &crate::provider::models::ProviderTrack) {
        for artist in &track.artists {
            if self.seen_artists.insert(artist.id.clone()) {
                self.artist_ids.push(artist.id.clone());
            }
        }
        if self.seen_tracks.insert(track.id.clone()) {
            self.payload.tracks.push(track.to_canonical());
            if let Some(album) = track.canonical_album() {
                if self.seen_albums.insert(album.id.clone()) {
                    self.payload.albums.push(album);
                }
            }
        }
    }
}
