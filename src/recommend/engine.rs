//! Daily "new-to-me" recommendations.
//!
//! One cached result per (user, UTC date); a forced regenerate is allowed
//! once the one-hour cooldown has elapsed. Candidates come from the
//! provider's recommendations endpoint through the seed-strategy fallback,
//! are filtered down to tracks the user has never played, scored against
//! the taste vector with a novelty boost, and the ranked list feeds both
//! the track and the album picks.

use super::genres::{normalize_genre, validate_genres, GenreSeedCache};
use super::seeds::{strategies, SeedSelection, SeedStrategy};
use crate::aggregation::aggregate;
use crate::library_store::{AudioFeatures, RecRun, SqliteLibraryStore};
use crate::provider::models::ProviderTrack;
use crate::provider::{try_strategies, FallbackFailure, ProviderError, ProviderGateway};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const REGEN_COOLDOWN_MINUTES: i64 = 60;
const GENRE_CACHE_TTL_HOURS: u64 = 24;
const TOP_TRACKS: usize = 10;
const TOP_ALBUMS: usize = 3;
const NOVELTY_ARTIST_BOOST: f64 = 0.07;
const NOVELTY_GENRE_BOOST: f64 = 0.04;
const ARTIST_LOOKUP_BATCH: usize = 50;
const FEATURES_LOOKUP_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("Recommendations were regenerated recently; try again later")]
    Throttled,

    #[error("Not enough listening history to build recommendation seeds")]
    NoSeeds,

    #[error("The provider returned no candidates for any seed combination")]
    NoCandidates,

    #[error("No seed combination was accepted by the provider")]
    NoStrategyWorked,

    #[error("Every candidate is already in your listening history")]
    AllCandidatesKnown,

    #[error("Corrupt cached recommendation payload: {0}")]
    Cache(#[from] serde_json::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedTrack {
    pub id: String,
    pub name: String,
    pub artist_names: Vec<String>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub image_url: Option<String>,
    pub preview_url: Option<String>,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedAlbum {
    pub id: String,
    pub name: String,
    pub artist_names: Vec<String>,
    pub image_url: Option<String>,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSet {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub from_cache: bool,
    pub tracks: Vec<RecommendedTrack>,
    pub albums: Vec<RecommendedAlbum>,
}

pub struct RecommendationEngine {
    store: SqliteLibraryStore,
    gateway: Arc<ProviderGateway>,
    genre_cache: GenreSeedCache,
}

impl RecommendationEngine {
    pub fn new(store: SqliteLibraryStore, gateway: Arc<ProviderGateway>) -> Self {
        Self {
            store,
            gateway,
            genre_cache: GenreSeedCache::new(std::time::Duration::from_secs(
                GENRE_CACHE_TTL_HOURS * 3600,
            )),
        }
    }

    /// Return today's cached set, or generate a fresh one. `force` bypasses
    /// the cache but not the regeneration cooldown.
    pub async fn generate(
        &self,
        user_rowid: i64,
        force: bool,
    ) -> Result<RecommendationSet, RecommendError> {
        let now = Utc::now();
        let today = now.date_naive();

        if let Some(run) = self.store.get_rec_run(user_rowid, today)? {
            if !force {
                let mut set: RecommendationSet = serde_json::from_value(run.payload)?;
                set.from_cache = true;
                return Ok(set);
            }
            if cooldown_blocks(&run.created_at, &now) {
                return Err(RecommendError::Throttled);
            }
        }

        let set = self.generate_fresh(user_rowid, today, now).await?;
        self.store.upsert_rec_run(&RecRun {
            user_rowid,
            date: today,
            payload: serde_json::to_value(&set)?,
            created_at: now,
        })?;
        Ok(set)
    }

    async fn generate_fresh(
        &self,
        user_rowid: i64,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<RecommendationSet, RecommendError> {
        let events = self
            .store
            .plays_with_tracks(user_rowid, &DateTime::UNIX_EPOCH, &now)?;
        let rollups = aggregate(&events);

        let raw_tracks = self.store.track_play_counts(user_rowid, 10)?;
        let raw_artists = self.store.artist_play_counts(user_rowid, 10)?;
        let mut seeds = SeedSelection::from_rollups(&rollups, &raw_tracks, &raw_artists);
        if seeds.genres.is_empty() && !seeds.artists.is_empty() {
            seeds.genres = self
                .store
                .genres_for_artists(&seeds.artists)?
                .into_iter()
                .take(5)
                .collect();
        }
        if seeds.is_empty() {
            return Err(RecommendError::NoSeeds);
        }

        let supported = self.genre_cache.supported(&self.gateway, user_rowid).await?;
        let validated_genres = validate_genres(&seeds.genres, &supported);
        let strategy_list = strategies(&seeds, &validated_genres);
        if strategy_list.is_empty() {
            return Err(RecommendError::NoSeeds);
        }

        let taste = rollups.taste.unwrap_or_else(AudioFeatures::neutral);
        let taste_ref = &taste;
        let (winner, candidates) =
            try_strategies(&strategy_list, |s: &SeedStrategy| {
                let s = s.clone();
                let gateway = &self.gateway;
                async move {
                    gateway
                        .recommendations(user_rowid, &s.tracks, &s.artists, &s.genres, Some(taste_ref))
                        .await
                }
            })
            .await
            .map_err(|failure| match failure {
                FallbackFailure::AllEmpty => RecommendError::NoCandidates,
                FallbackFailure::AllRejected => RecommendError::NoStrategyWorked,
                FallbackFailure::Aborted(err) => RecommendError::Provider(err),
            })?;
        debug!(
            "Seed strategy #{} produced {} candidates",
            winner,
            candidates.len()
        );

        let played = self.store.played_track_ids(user_rowid)?;
        let candidates: Vec<ProviderTrack> = candidates
            .into_iter()
            .filter(|t| !played.contains(&t.id))
            .collect();
        if candidates.is_empty() {
            return Err(RecommendError::AllCandidatesKnown);
        }

        let features = self.candidate_features(user_rowid, &candidates).await?;
        let artist_genres = self.candidate_artist_genres(user_rowid, &candidates).await?;

        let seed_artists: HashSet<String> = seeds.artists.iter().cloned().collect();
        let seed_genres: HashSet<String> = validated_genres.iter().cloned().collect();
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|track| {
                let genres = resolved_genres(&track, &artist_genres);
                let vector = features
                    .get(&track.id)
                    .copied()
                    .unwrap_or_else(AudioFeatures::neutral);
                let score = score_candidate(&taste, &vector, &track, &genres, &seed_artists, &seed_genres);
                ScoredCandidate {
                    track,
                    genres,
                    score,
                }
            })
            .collect();
        // Stable: equal scores keep the provider's order.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let played_albums = self.store.played_album_ids(user_rowid)?;
        let tracks = pick_tracks(&scored, &seed_artists, &seed_genres);
        let albums = pick_albums(&scored, &played_albums, &seed_artists, &seed_genres);

        info!(
            "Generated {} track and {} album recommendations for user {}",
            tracks.len(),
            albums.len(),
            user_rowid
        );
        Ok(RecommendationSet {
            date: today,
            generated_at: now,
            from_cache: false,
            tracks,
            albums,
        })
    }

    async fn candidate_features(
        &self,
        user_rowid: i64,
        candidates: &[ProviderTrack],
    ) -> Result<HashMap<String, AudioFeatures>, RecommendError> {
        let ids: Vec<String> = candidates.iter().map(|t| t.id.clone()).collect();
        let mut map = HashMap::new();
        for batch in ids.chunks(FEATURES_LOOKUP_BATCH) {
            for entry in self.gateway.audio_features(user_rowid, batch).await? {
                map.insert(entry.id.clone(), entry.to_features());
            }
        }
        Ok(map)
    }

    async fn candidate_artist_genres(
        &self,
        user_rowid: i64,
        candidates: &[ProviderTrack],
    ) -> Result<HashMap<String, Vec<String>>, RecommendError> {
        let mut seen = HashSet::new();
        let mut ids: Vec<String> = Vec::new();
        for track in candidates {
            for artist in &track.artists {
                if seen.insert(artist.id.clone()) {
                    ids.push(artist.id.clone());
                }
            }
        }
        let mut map = HashMap::new();
        for batch in ids.chunks(ARTIST_LOOKUP_BATCH) {
            for artist in self.gateway.artists(user_rowid, batch).await? {
                let genres = artist.genres.iter().map(|g| normalize_genre(g)).collect();
                map.insert(artist.id.clone(), genres);
            }
        }
        Ok(map)
    }
}

struct ScoredCandidate {
    track: ProviderTrack,
    genres: Vec<String>,
    score: f64,
}

fn resolved_genres(
    track: &ProviderTrack,
    artist_genres: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut genres = Vec::new();
    for artist in &track.artists {
        if let Some(list) = artist_genres.get(&artist.id) {
            for genre in list {
                if !genres.contains(genre) {
                    genres.push(genre.clone());
                }
            }
        }
    }
    genres
}

/// Taste distance folded into [0, 1]-ish similarity, plus novelty boosts,
/// rounded to four decimals.
fn score_candidate(
    taste: &AudioFeatures,
    vector: &AudioFeatures,
    track: &ProviderTrack,
    genres: &[String],
    seed_artists: &HashSet<String>,
    seed_genres: &HashSet<String>,
) -> f64 {
    let mut score = similarity(taste, vector);
    let known_artist = track.artists.iter().any(|a| seed_artists.contains(&a.id));
    if !known_artist {
        score += NOVELTY_ARTIST_BOOST;
    }
    if genres.iter().any(|g| !seed_genres.contains(g)) {
        score += NOVELTY_GENRE_BOOST;
    }
    round4(score)
}

fn similarity(taste: &AudioFeatures, vector: &AudioFeatures) -> f64 {
    let distance = (taste.energy - vector.energy).abs()
        + (taste.danceability - vector.danceability).abs()
        + (taste.valence - vector.valence).abs()
        + (taste.tempo - vector.tempo).abs() / 220.0;
    1.0 - distance / 4.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Cooldown gate for forced regeneration.
fn cooldown_blocks(created_at: &DateTime<Utc>, now: &DateTime<Utc>) -> bool {
    *now - *created_at < Duration::minutes(REGEN_COOLDOWN_MINUTES)
}

fn reason_for(
    track: &ProviderTrack,
    genres: &[String],
    seed_artists: &HashSet<String>,
    seed_genres: &HashSet<String>,
) -> String {
    if let Some(artist) = track.artists.iter().find(|a| seed_artists.contains(&a.id)) {
        return format!("because you like {}", artist.name);
    }
    if let Some(genre) = genres.iter().find(|g| seed_genres.contains(*g)) {
        return format!("because you listen to {}", genre);
    }
    "matches your taste profile".to_string()
}

fn pick_tracks(
    scored: &[ScoredCandidate],
    seed_artists: &HashSet<String>,
    seed_genres: &HashSet<String>,
) -> Vec<RecommendedTrack> {
    scored
        .iter()
        .take(TOP_TRACKS)
        .map(|c| RecommendedTrack {
            id: c.track.id.clone(),
            name: c.track.name.clone(),
            artist_names: c.track.artists.iter().map(|a| a.name.clone()).collect(),
            album_id: c.track.album.as_ref().map(|a| a.id.clone()),
            album_name: c.track.album.as_ref().map(|a| a.name.clone()),
            image_url: c.track.album.as_ref().and_then(|a| a.image_url()),
            preview_url: c.track.preview_url.clone(),
            score: c.score,
            reason: reason_for(&c.track, &c.genres, seed_artists, seed_genres),
        })
        .collect()
}

/// Walk the ranked list and keep the first distinct albums the user has
/// never listened to. A seen or already-chosen album is skipped, never
/// replaced by a lower-ranked duplicate.
fn pick_albums(
    scored: &[ScoredCandidate],
    played_albums: &HashSet<String>,
    seed_artists: &HashSet<String>,
    seed_genres: &HashSet<String>,
) -> Vec<RecommendedAlbum> {
    let mut chosen: Vec<RecommendedAlbum> = Vec::new();
    let mut chosen_ids: HashSet<String> = HashSet::new();
    for candidate in scored {
        if chosen.len() >= TOP_ALBUMS {
            break;
        }
        let Some(album) = &candidate.track.album else {
            continue;
        };
        if played_albums.contains(&album.id) || !chosen_ids.insert(album.id.clone()) {
            continue;
        }
        chosen.push(RecommendedAlbum {
            id: album.id.clone(),
            name: album.name.clone(),
            artist_names: candidate
                .track
                .artists
                .iter()
                .map(|a| a.name.clone())
                .collect(),
            image_url: album.image_url(),
            score: candidate.score,
            reason: reason_for(&candidate.track, &candidate.genres, seed_artists, seed_genres),
        });
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::models::{ProviderAlbum, ProviderArtistRef};
    use chrono::TimeZone;

    fn track(id: &str, artist: &str, album: Option<&str>) -> ProviderTrack {
        ProviderTrack {
            id: id.to_string(),
            name: format!("track {}", id),
            duration_ms: 200_000,
            album: album.map(|a| ProviderAlbum {
                id: a.to_string(),
                name: format!("album {}", a),
                release_date: None,
                images: vec![],
            }),
            artists: vec![ProviderArtistRef {
                id: artist.to_string(),
                name: format!("artist {}", artist),
            }],
            popularity: None,
            preview_url: None,
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        let taste = AudioFeatures::neutral();
        assert!((similarity(&taste, &taste) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_artist_scores_exactly_seven_points_higher() {
        let taste = AudioFeatures::neutral();
        let vector = AudioFeatures::neutral();
        let seed_artists: HashSet<String> = ["known".to_string()].into_iter().collect();
        let seed_genres: HashSet<String> = HashSet::new();

        let known = score_candidate(
            &taste,
            &vector,
            &track("t1", "known", None),
            &[],
            &seed_artists,
            &seed_genres,
        );
        let unknown = score_candidate(
            &taste,
            &vector,
            &track("t2", "stranger", None),
            &[],
            &seed_artists,
            &seed_genres,
        );
        assert!((unknown - known - NOVELTY_ARTIST_BOOST).abs() < 1e-9);
    }

    #[test]
    fn outside_genre_adds_four_points() {
        let taste = AudioFeatures::neutral();
        let seed_artists: HashSet<String> = ["a".to_string()].into_iter().collect();
        let seed_genres: HashSet<String> = ["rock".to_string()].into_iter().collect();

        let inside = score_candidate(
            &taste,
            &taste,
            &track("t1", "a", None),
            &["rock".to_string()],
            &seed_artists,
            &seed_genres,
        );
        let outside = score_candidate(
            &taste,
            &taste,
            &track("t2", "a", None),
            &["zydeco".to_string()],
            &seed_artists,
            &seed_genres,
        );
        assert!((outside - inside - NOVELTY_GENRE_BOOST).abs() < 1e-9);
    }

    #[test]
    fn scores_are_rounded_to_four_decimals() {
        assert_eq!(round4(0.123456789), 0.1235);
        assert_eq!(round4(1.07), 1.07);
    }

    #[test]
    fn cooldown_blocks_within_the_hour() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ten_min = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap();
        let hour_plus = Utc.with_ymd_and_hms(2024, 5, 1, 13, 1, 0).unwrap();
        assert!(cooldown_blocks(&created, &ten_min));
        assert!(!cooldown_blocks(&created, &hour_plus));
    }

    #[test]
    fn reasons_prefer_known_artist_then_genre() {
        let seed_artists: HashSet<String> = ["a1".to_string()].into_iter().collect();
        let seed_genres: HashSet<String> = ["rock".to_string()].into_iter().collect();

        let by_artist = reason_for(&track("t", "a1", None), &[], &seed_artists, &seed_genres);
        assert_eq!(by_artist, "because you like artist a1");

        let by_genre = reason_for(
            &track("t", "a2", None),
            &["rock".to_string()],
            &seed_artists,
            &seed_genres,
        );
        assert_eq!(by_genre, "because you listen to rock");

        let generic = reason_for(
            &track("t", "a2", None),
            &["zydeco".to_string()],
            &seed_artists,
            &seed_genres,
        );
        assert_eq!(generic, "matches your taste profile");
    }

    #[test]
    fn album_walk_skips_seen_and_duplicate_albums() {
        let scored: Vec<ScoredCandidate> = [
            ("t1", "al1"),
            ("t2", "al1"),
            ("t3", "al2"),
            ("t4", "al3"),
            ("t5", "al4"),
        ]
        .iter()
        .map(|(t, al)| ScoredCandidate {
            track: track(t, "a", Some(al)),
            genres: vec![],
            score: 1.0,
        })
        .collect();
        let played: HashSet<String> = ["al2".to_string()].into_iter().collect();

        let picked = pick_albums(&scored, &played, &HashSet::new(), &HashSet::new());
        let ids: Vec<&str> = picked.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["al1", "al3", "al4"]);
    }

    #[test]
    fn equal_scores_keep_stable_order() {
        let mut scored: Vec<ScoredCandidate> = ["t1", "t2", "t3"]
            .iter()
            .map(|t| ScoredCandidate {
                track: track(t, "a", None),
                genres: vec![],
                score: 0.9,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let ids: Vec<&str> = scored.iter().map(|c| c.track.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }
}
