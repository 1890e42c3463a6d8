//! SQLite-backed store for users, catalog metadata, play history,
//! import runs and the daily recommendation cache.

use super::models::*;
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::migrate_if_needed;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// How many ids go into a single `IN (...)` existence lookup.
const ID_LOOKUP_CHUNK: usize = 500;

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp in db: {}", s))?
        .with_timezone(&Utc))
}

#[derive(Clone)]
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .context("Failed to open library database")?;
        migrate_if_needed(&mut conn, LIBRARY_VERSIONED_SCHEMAS, "library")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let track_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))
            .unwrap_or(0);
        let play_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM play_events", [], |r| r.get(0))
            .unwrap_or(0);
        info!(
            "Opened library: {} tracks, {} play events",
            track_count, play_count
        );

        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate_if_needed(&mut conn, LIBRARY_VERSIONED_SCHEMAS, "library")?;
        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // =========================================================================
    // Users & tokens
    // =========================================================================

    /// Look up a user by handle, creating the row on first touch.
    pub fn ensure_user(&self, handle: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO users (handle) VALUES (?1)",
            params![handle],
        )?;
        let rowid = conn.query_row(
            "SELECT rowid FROM users WHERE handle = ?1",
            params![handle],
            |r| r.get(0),
        )?;
        Ok(rowid)
    }

    pub fn get_user(&self, handle: &str) -> Result<Option<UserRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT rowid, handle, last_import_at, last_import_status
                 FROM users WHERE handle = ?1",
                params![handle],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((rowid, handle, at, status)) => Ok(Some(UserRow {
                rowid,
                handle,
                last_import_at: at.as_deref().map(parse_ts).transpose()?,
                last_import_status: status,
            })),
        }
    }

    pub fn update_last_import(
        &self,
        user_rowid: i64,
        at: &DateTime<Utc>,
        status: &str,
    ) -> Result<()> {
        self.lock().execute(
            "UPDATE users SET last_import_at = ?1, last_import_status = ?2 WHERE rowid = ?3",
            params![fmt_ts(at), status, user_rowid],
        )?;
        Ok(())
    }

    pub fn get_token(&self, user_rowid: i64) -> Result<Option<StoredToken>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at
                 FROM provider_tokens WHERE user_rowid = ?1",
                params![user_rowid],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(access, refresh, expires)| StoredToken {
            access_token: access,
            refresh_token: refresh,
            expires_at: DateTime::<Utc>::from_timestamp(expires, 0).unwrap_or_default(),
        }))
    }

    pub fn save_token(&self, user_rowid: i64, token: &StoredToken) -> Result<()> {
        self.lock().execute(
            "INSERT INTO provider_tokens (user_rowid, access_token, refresh_token, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_rowid) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at",
            params![
                user_rowid,
                token.access_token,
                token.refresh_token,
                token.expires_at.timestamp()
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Catalog upserts (called in chunks by the bulk writer)
    // =========================================================================

    fn existing_ids(&self, table: &str, ids: &[String]) -> Result<HashSet<String>> {
        let conn = self.lock();
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT id FROM {} WHERE id IN ({})", table, placeholders);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |r| {
                r.get::<_, String>(0)
            })?;
            for row in rows {
                found.insert(row?);
            }
        }
        Ok(found)
    }

    pub fn existing_album_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("albums", ids)
    }

    pub fn existing_artist_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("artists", ids)
    }

    pub fn existing_track_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_ids("tracks", ids)
    }

    /// Upsert a chunk of albums in one transaction. Last write wins for the
    /// name; optional fields never get wiped by a null.
    pub fn upsert_albums(&self, albums: &[Album]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO albums (id, name, release_date, image_url)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    release_date = coalesce(excluded.release_date, albums.release_date),
                    image_url = coalesce(excluded.image_url, albums.image_url)",
            )?;
            for album in albums {
                stmt.execute(params![
                    album.id,
                    album.name,
                    album.release_date,
                    album.image_url
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_artists(&self, artists: &[Artist]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO artists (id, name, image_url)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    image_url = coalesce(excluded.image_url, artists.image_url)",
            )?;
            let mut genre_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO artist_genres (artist_rowid, genre)
                 SELECT rowid, ?2 FROM artists WHERE id = ?1",
            )?;
            for artist in artists {
                stmt.execute(params![artist.id, artist.name, artist.image_url])?;
                for genre in &artist.genres {
                    genre_stmt.execute(params![artist.id, genre])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert a chunk of tracks with their artist join rows. Caller must have
    /// pruned album/artist references down to ids that exist in the store or
    /// in a previously written chunk.
    pub fn upsert_tracks(&self, tracks: &[Track]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tracks (id, name, duration_ms, album_rowid, popularity,
                                     preview_url, image_url, energy, danceability, valence, tempo)
                 VALUES (?1, ?2, ?3, (SELECT rowid FROM albums WHERE id = ?4), ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    duration_ms = excluded.duration_ms,
                    album_rowid = coalesce(excluded.album_rowid, tracks.album_rowid),
                    popularity = coalesce(excluded.popularity, tracks.popularity),
                    preview_url = coalesce(excluded.preview_url, tracks.preview_url),
                    image_url = coalesce(excluded.image_url, tracks.image_url),
                    energy = coalesce(excluded.energy, tracks.energy),
                    danceability = coalesce(excluded.danceability, tracks.danceability),
                    valence = coalesce(excluded.valence, tracks.valence),
                    tempo = coalesce(excluded.tempo, tracks.tempo)",
            )?;
            let mut join_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO track_artists (track_rowid, artist_rowid, position)
                 SELECT t.rowid, a.rowid, ?3 FROM tracks t, artists a
                 WHERE t.id = ?1 AND a.id = ?2",
            )?;
            for track in tracks {
                stmt.execute(params![
                    track.id,
                    track.name,
                    track.duration_ms,
                    track.album_id,
                    track.popularity,
                    track.preview_url,
                    track.image_url,
                    track.energy,
                    track.danceability,
                    track.valence,
                    track.tempo
                ])?;
                for (position, artist_id) in track.artist_ids.iter().enumerate() {
                    join_stmt.execute(params![track.id, artist_id, position as i64])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert a chunk of play events with duplicate-skip semantics.
    /// Returns (inserted, skipped); a play whose track isn't in the store
    /// counts as skipped, never as an error.
    pub fn insert_plays(
        &self,
        user_rowid: i64,
        plays: &[Play],
        source: ImportSource,
    ) -> Result<(i64, i64)> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0i64;
        let mut skipped = 0i64;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO play_events (user_rowid, track_rowid, played_at, source)
                 SELECT ?1, rowid, ?3, ?4 FROM tracks WHERE id = ?2",
            )?;
            for play in plays {
                let changed = stmt.execute(params![
                    user_rowid,
                    play.track_id,
                    fmt_ts(&play.played_at),
                    source.as_str()
                ])?;
                if changed == 1 {
                    inserted += 1;
                } else {
                    skipped += 1;
                }
            }
        }
        tx.commit()?;
        Ok((inserted, skipped))
    }

    // =========================================================================
    // Play history reads
    // =========================================================================

    /// All play events of a user in [from, to], joined to track, album,
    /// artists and genres. One query for the events, batched lookups for the
    /// joins.
    pub fn plays_with_tracks(
        &self,
        user_rowid: i64,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> Result<Vec<PlayWithTrack>> {
        let conn = self.lock();

        struct RawPlay {
            played_at: String,
            track_rowid: i64,
            track_id: String,
            track_name: String,
            duration_ms: i64,
            image_url: Option<String>,
            album_rowid: Option<i64>,
            features: (Option<f64>, Option<f64>, Option<f64>, Option<f64>),
        }

        let mut stmt = conn.prepare_cached(
            "SELECT p.played_at, t.rowid, t.id, t.name, t.duration_ms, t.image_url,
                    t.album_rowid, t.energy, t.danceability, t.valence, t.tempo
             FROM play_events p JOIN tracks t ON t.rowid = p.track_rowid
             WHERE p.user_rowid = ?1 AND p.played_at >= ?2 AND p.played_at <= ?3
             ORDER BY p.played_at",
        )?;
        let raw: Vec<RawPlay> = stmt
            .query_map(params![user_rowid, fmt_ts(from), fmt_ts(to)], |r| {
                Ok(RawPlay {
                    played_at: r.get(0)?,
                    track_rowid: r.get(1)?,
                    track_id: r.get(2)?,
                    track_name: r.get(3)?,
                    duration_ms: r.get(4)?,
                    image_url: r.get(5)?,
                    album_rowid: r.get(6)?,
                    features: (r.get(7)?, r.get(8)?, r.get(9)?, r.get(10)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let track_rowids: HashSet<i64> = raw.iter().map(|p| p.track_rowid).collect();
        let album_rowids: HashSet<i64> = raw.iter().filter_map(|p| p.album_rowid).collect();

        // track_rowid -> ordered artists, artist_rowid -> genres
        let mut track_artists: HashMap<i64, Vec<(i64, String, String)>> = HashMap::new();
        let mut artist_genres: HashMap<i64, Vec<String>> = HashMap::new();
        {
            let ids: Vec<i64> = track_rowids.iter().copied().collect();
            for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT ta.track_rowid, a.rowid, a.id, a.name
                     FROM track_artists ta JOIN artists a ON a.rowid = ta.artist_rowid
                     WHERE ta.track_rowid IN ({}) ORDER BY ta.position",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                })?;
                for row in rows {
                    let (track, artist_rowid, artist_id, artist_name) = row?;
                    track_artists
                        .entry(track)
                        .or_default()
                        .push((artist_rowid, artist_id, artist_name));
                }
            }

            let artist_rowids: Vec<i64> = track_artists
                .values()
                .flatten()
                .map(|(rowid, _, _)| *rowid)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            for chunk in artist_rowids.chunks(ID_LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT artist_rowid, genre FROM artist_genres WHERE artist_rowid IN ({})",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (artist, genre) = row?;
                    artist_genres.entry(artist).or_default().push(genre);
                }
            }
        }

        let mut albums: HashMap<i64, (String, String)> = HashMap::new();
        {
            let ids: Vec<i64> = album_rowids.into_iter().collect();
            for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT rowid, id, name FROM albums WHERE rowid IN ({})",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                })?;
                for row in rows {
                    let (rowid, id, name) = row?;
                    albums.insert(rowid, (id, name));
                }
            }
        }

        raw.into_iter()
            .map(|p| {
                let artists = track_artists
                    .get(&p.track_rowid)
                    .cloned()
                    .unwrap_or_default();
                let genres: Vec<String> = artists
                    .iter()
                    .flat_map(|(rowid, _, _)| {
                        artist_genres.get(rowid).cloned().unwrap_or_default()
                    })
                    .collect();
                let features = match p.features {
                    (Some(energy), Some(danceability), Some(valence), Some(tempo)) => {
                        Some(AudioFeatures {
                            energy,
                            danceability,
                            valence,
                            tempo,
                        })
                    }
                    _ => None,
                };
                Ok(PlayWithTrack {
                    played_at: parse_ts(&p.played_at)?,
                    track_id: p.track_id,
                    track_name: p.track_name,
                    duration_ms: p.duration_ms,
                    image_url: p.image_url,
                    album: p.album_rowid.and_then(|rowid| albums.get(&rowid).cloned()),
                    artists: artists
                        .into_iter()
                        .map(|(_, id, name)| (id, name))
                        .collect(),
                    genres,
                    features,
                })
            })
            .collect()
    }

    /// External ids of every track the user has ever played.
    pub fn played_track_ids(&self, user_rowid: i64) -> Result<HashSet<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT t.id FROM play_events p JOIN tracks t ON t.rowid = p.track_rowid
             WHERE p.user_rowid = ?1",
        )?;
        let ids = stmt
            .query_map(params![user_rowid], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// External ids of every album appearing in the user's play history.
    pub fn played_album_ids(&self, user_rowid: i64) -> Result<HashSet<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT al.id
             FROM play_events p
             JOIN tracks t ON t.rowid = p.track_rowid
             JOIN albums al ON al.rowid = t.album_rowid
             WHERE p.user_rowid = ?1",
        )?;
        let ids = stmt
            .query_map(params![user_rowid], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Most-played track ids, descending by play count.
    pub fn track_play_counts(&self, user_rowid: i64, limit: usize) -> Result<Vec<(String, i64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT t.id, COUNT(*) AS plays
             FROM play_events p JOIN tracks t ON t.rowid = p.track_rowid
             WHERE p.user_rowid = ?1
             GROUP BY t.id ORDER BY plays DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_rowid, limit as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most-played artist ids, descending by play count.
    pub fn artist_play_counts(&self, user_rowid: i64, limit: usize) -> Result<Vec<(String, i64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, COUNT(*) AS plays
             FROM play_events p
             JOIN track_artists ta ON ta.track_rowid = p.track_rowid
             JOIN artists a ON a.rowid = ta.artist_rowid
             WHERE p.user_rowid = ?1
             GROUP BY a.id ORDER BY plays DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_rowid, limit as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn genres_for_artists(&self, artist_ids: &[String]) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut genres = Vec::new();
        for chunk in artist_ids.chunks(ID_LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT g.genre FROM artist_genres g
                 JOIN artists a ON a.rowid = g.artist_rowid
                 WHERE a.id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |r| {
                r.get::<_, String>(0)
            })?;
            for row in rows {
                genres.push(row?);
            }
        }
        Ok(genres)
    }

    // =========================================================================
    // Import runs
    // =========================================================================

    pub fn insert_import_run(&self, run: &ImportRun) -> Result<()> {
        self.lock().execute(
            "INSERT INTO import_runs (id, user_rowid, status, message, imported_plays,
                                      imported_tracks, rate_limited_hits, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.user_rowid,
                run.status.as_str(),
                run.message,
                run.imported_plays,
                run.imported_tracks,
                run.rate_limited_hits,
                fmt_ts(&run.started_at),
                run.finished_at.as_ref().map(fmt_ts)
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_import_run(
        &self,
        id: &str,
        status: ImportRunStatus,
        message: Option<&str>,
        imported_plays: i64,
        imported_tracks: i64,
        rate_limited_hits: i64,
        finished_at: &DateTime<Utc>,
    ) -> Result<()> {
        self.lock().execute(
            "UPDATE import_runs SET status = ?2, message = ?3, imported_plays = ?4,
                    imported_tracks = ?5, rate_limited_hits = ?6, finished_at = ?7
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                message,
                imported_plays,
                imported_tracks,
                rate_limited_hits,
                fmt_ts(finished_at)
            ],
        )?;
        Ok(())
    }

    pub fn latest_import_run(&self, user_rowid: i64) -> Result<Option<ImportRun>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, user_rowid, status, message, imported_plays, imported_tracks,
                        rate_limited_hits, started_at, finished_at
                 FROM import_runs WHERE user_rowid = ?1
                 ORDER BY started_at DESC LIMIT 1",
                params![user_rowid],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                        r.get::<_, i64>(6)?,
                        r.get::<_, String>(7)?,
                        r.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, user, status, message, plays, tracks, hits, started, finished)) => {
                Ok(Some(ImportRun {
                    id,
                    user_rowid: user,
                    status: ImportRunStatus::parse(&status)
                        .with_context(|| format!("Bad import run status: {}", status))?,
                    message,
                    imported_plays: plays,
                    imported_tracks: tracks,
                    rate_limited_hits: hits,
                    started_at: parse_ts(&started)?,
                    finished_at: finished.as_deref().map(parse_ts).transpose()?,
                }))
            }
        }
    }

    /// Best-effort in-flight guard: is there a `running` run for this user
    /// started after `cutoff`?
    pub fn has_running_import_since(
        &self,
        user_rowid: i64,
        cutoff: &DateTime<Utc>,
    ) -> Result<bool> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM import_runs
             WHERE user_rowid = ?1 AND status = 'running' AND started_at >= ?2",
            params![user_rowid, fmt_ts(cutoff)],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn prune_import_runs_older_than(&self, cutoff: &DateTime<Utc>) -> Result<usize> {
        let deleted = self.lock().execute(
            "DELETE FROM import_runs WHERE started_at < ?1 AND status != 'running'",
            params![fmt_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    // =========================================================================
    // Daily recommendation cache
    // =========================================================================

    pub fn get_rec_run(&self, user_rowid: i64, date: NaiveDate) -> Result<Option<RecRun>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT payload, created_at FROM rec_runs WHERE user_rowid = ?1 AND date = ?2",
                params![user_rowid, date.to_string()],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((payload, created)) => Ok(Some(RecRun {
                user_rowid,
                date,
                payload: serde_json::from_str(&payload)
                    .context("Corrupt recommendation cache payload")?,
                created_at: parse_ts(&created)?,
            })),
        }
    }

    /// Create or overwrite the day's cache row.
    pub fn upsert_rec_run(&self, run: &RecRun) -> Result<()> {
        self.lock().execute(
            "INSERT INTO rec_runs (user_rowid, date, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_rowid, date) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at",
            params![
                run.user_rowid,
                run.date.to_string(),
                run.payload.to_string(),
                fmt_ts(&run.created_at)
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Counts (metrics)
    // =========================================================================

    pub fn count_rows(&self, table: &str) -> i64 {
        self.lock()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn track(id: &str, album: Option<&str>, artists: &[&str]) -> Track {
        Track {
            id: id.to_string(),
            name: format!("Track {}", id),
            duration_ms: 240_000,
            album_id: album.map(|s| s.to_string()),
            artist_ids: artists.iter().map(|s| s.to_string()).collect(),
            popularity: Some(50),
            preview_url: None,
            image_url: None,
            energy: Some(0.8),
            danceability: Some(0.6),
            valence: Some(0.4),
            tempo: Some(120.0),
        }
    }

    fn seeded_store() -> (SqliteLibraryStore, i64) {
        let store = SqliteLibraryStore::in_memory().unwrap();
        let user = store.ensure_user("alice").unwrap();
        store
            .upsert_albums(&[Album {
                id: "al1".into(),
                name: "First Album".into(),
                release_date: Some("2020-01-01".into()),
                image_url: None,
            }])
            .unwrap();
        store
            .upsert_artists(&[Artist {
                id: "ar1".into(),
                name: "Artist One".into(),
                image_url: None,
                genres: vec!["indie rock".into()],
            }])
            .unwrap();
        store
            .upsert_tracks(&[track("t1", Some("al1"), &["ar1"])])
            .unwrap();
        (store, user)
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        let a = store.ensure_user("bob").unwrap();
        let b = store.ensure_user("bob").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn insert_plays_skips_duplicates_and_unknown_tracks() {
        let (store, user) = seeded_store();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let plays = vec![
            Play {
                track_id: "t1".into(),
                played_at: at,
            },
            Play {
                track_id: "t1".into(),
                played_at: at,
            },
            Play {
                track_id: "missing".into(),
                played_at: at,
            },
        ];
        let (inserted, skipped) = store
            .insert_plays(user, &plays, ImportSource::FileNative)
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(skipped, 2);

        // replaying the same payload never grows history
        let (inserted, skipped) = store
            .insert_plays(user, &plays, ImportSource::FileNative)
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(skipped, 3);
    }

    #[test]
    fn plays_with_tracks_joins_album_artists_genres() {
        let (store, user) = seeded_store();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        store
            .insert_plays(
                user,
                &[Play {
                    track_id: "t1".into(),
                    played_at: at,
                }],
                ImportSource::FilePrivacy,
            )
            .unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let plays = store.plays_with_tracks(user, &from, &to).unwrap();
        assert_eq!(plays.len(), 1);
        let play = &plays[0];
        assert_eq!(play.track_id, "t1");
        assert_eq!(play.album.as_ref().unwrap().1, "First Album");
        assert_eq!(play.artists, vec![("ar1".to_string(), "Artist One".to_string())]);
        assert_eq!(play.genres, vec!["indie rock".to_string()]);
        assert!(play.features.is_some());
    }

    #[test]
    fn track_upsert_keeps_features_when_reimport_has_none() {
        let (store, _) = seeded_store();
        let mut plain = track("t1", Some("al1"), &["ar1"]);
        plain.energy = None;
        plain.danceability = None;
        plain.valence = None;
        plain.tempo = None;
        store.upsert_tracks(&[plain]).unwrap();

        let user = store.ensure_user("carol").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        store
            .insert_plays(
                user,
                &[Play {
                    track_id: "t1".into(),
                    played_at: at,
                }],
                ImportSource::FileNative,
            )
            .unwrap();
        let plays = store
            .plays_with_tracks(
                user,
                &Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                &Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert!(plays[0].features.is_some());
    }

    #[test]
    fn rec_run_upsert_overwrites_in_place() {
        let (store, user) = seeded_store();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let first = RecRun {
            user_rowid: user,
            date,
            payload: serde_json::json!({"v": 1}),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        };
        store.upsert_rec_run(&first).unwrap();
        let second = RecRun {
            payload: serde_json::json!({"v": 2}),
            ..first.clone()
        };
        store.upsert_rec_run(&second).unwrap();

        let cached = store.get_rec_run(user, date).unwrap().unwrap();
        assert_eq!(cached.payload["v"], 2);
    }

    #[test]
    fn import_run_lifecycle() {
        let (store, user) = seeded_store();
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let run = ImportRun {
            id: "run-1".into(),
            user_rowid: user,
            status: ImportRunStatus::Running,
            message: None,
            imported_plays: 0,
            imported_tracks: 0,
            rate_limited_hits: 0,
            started_at: started,
            finished_at: None,
        };
        store.insert_import_run(&run).unwrap();
        assert!(store
            .has_running_import_since(user, &(started - chrono::Duration::minutes(15)))
            .unwrap());

        let finished = started + chrono::Duration::minutes(3);
        store
            .finish_import_run(
                "run-1",
                ImportRunStatus::Completed,
                Some("ok"),
                42,
                7,
                1,
                &finished,
            )
            .unwrap();
        let latest = store.latest_import_run(user).unwrap().unwrap();
        assert_eq!(latest.status, ImportRunStatus::Completed);
        assert_eq!(latest.imported_plays, 42);
        assert!(!store
            .has_running_import_since(user, &(started - chrono::Duration::minutes(15)))
            .unwrap());
    }
}
