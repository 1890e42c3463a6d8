//! Time-windowed listening rollups.
//!
//! One pass over the joined play events of a window produces ranked top
//! lists for tracks, artists, albums and genres, a daily time series, the
//! averaged taste vector and the window totals. Re-sorting and filtered
//! views reuse the same rollup through [`sort_entries`] and
//! [`filter_entries`] so every consumer reports identical numbers.

use crate::library_store::{AudioFeatures, PlayWithTrack, SqliteLibraryStore};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Genre bucket for plays whose artists carry no genre tags.
pub const UNKNOWN_GENRE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Plays,
    Minutes,
    Recent,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plays" => Some(SortKey::Plays),
            "minutes" => Some(SortKey::Minutes),
            "recent" => Some(SortKey::Recent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: usize,
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub plays: i64,
    pub minutes: f64,
    pub last_listened: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    pub plays: i64,
    pub minutes: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollups {
    pub tracks: Vec<RankedEntry>,
    pub artists: Vec<RankedEntry>,
    pub albums: Vec<RankedEntry>,
    pub genres: Vec<RankedEntry>,
    pub daily: BTreeMap<NaiveDate, DailyBucket>,
    pub taste: Option<AudioFeatures>,
    pub total_plays: i64,
    pub total_minutes: f64,
    pub total_hours: f64,
    pub total_unique_tracks: usize,
    pub total_unique_artists: usize,
    pub total_unique_albums: usize,
}

#[derive(Default)]
struct Counter {
    name: String,
    image_url: Option<String>,
    plays: i64,
    minutes: f64,
    last_listened: Option<DateTime<Utc>>,
}

impl Counter {
    fn bump(&mut self, minutes: f64, played_at: DateTime<Utc>) {
        self.plays += 1;
        self.minutes += minutes;
        if self.last_listened.map_or(true, |prev| played_at > prev) {
            self.last_listened = Some(played_at);
        }
    }
}

fn bump<'a>(
    counters: &'a mut HashMap<String, Counter>,
    id: &str,
    name: &str,
    image_url: Option<&str>,
) -> &'a mut Counter {
    let entry = counters.entry(id.to_string()).or_default();
    if entry.name.is_empty() {
        entry.name = name.to_string();
    }
    if entry.image_url.is_none() {
        entry.image_url = image_url.map(|s| s.to_string());
    }
    entry
}

/// Aggregate a window of joined play events into rollups. Pure; an empty
/// window yields all-zero rollups. Daily buckets use the UTC calendar date.
pub fn aggregate(events: &[PlayWithTrack]) -> Rollups {
    let mut tracks: HashMap<String, Counter> = HashMap::new();
    let mut artists: HashMap<String, Counter> = HashMap::new();
    let mut albums: HashMap<String, Counter> = HashMap::new();
    let mut genres: HashMap<String, Counter> = HashMap::new();
    let mut daily: BTreeMap<NaiveDate, DailyBucket> = BTreeMap::new();

    let mut feature_sum = AudioFeatures {
        energy: 0.0,
        danceability: 0.0,
        valence: 0.0,
        tempo: 0.0,
    };
    let mut feature_tracks: HashSet<String> = HashSet::new();

    let mut total_plays = 0i64;
    let mut total_minutes = 0f64;

    for event in events {
        let minutes = event.duration_ms as f64 / 60_000.0;
        total_plays += 1;
        total_minutes += minutes;

        bump(
            &mut tracks,
            &event.track_id,
            &event.track_name,
            event.image_url.as_deref(),
        )
        .bump(minutes, event.played_at);

        for (artist_id, artist_name) in &event.artists {
            bump(&mut artists, artist_id, artist_name, None).bump(minutes, event.played_at);
        }

        if let Some((album_id, album_name)) = &event.album {
            bump(&mut albums, album_id, album_name, event.image_url.as_deref())
                .bump(minutes, event.played_at);
        }

        if event.genres.is_empty() {
            bump(&mut genres, UNKNOWN_GENRE, UNKNOWN_GENRE, None).bump(minutes, event.played_at);
        } else {
            for genre in &event.genres {
                bump(&mut genres, genre, genre, None).bump(minutes, event.played_at);
            }
        }

        let bucket = daily.entry(event.played_at.date_naive()).or_default();
        bucket.plays += 1;
        bucket.minutes += minutes;

        // Each track contributes to the taste mean once, and only with a
        // complete feature tuple.
        if let Some(features) = event.features {
            if feature_tracks.insert(event.track_id.clone()) {
                feature_sum.energy += features.energy;
                feature_sum.danceability += features.danceability;
                feature_sum.valence += features.valence;
                feature_sum.tempo += features.tempo;
            }
        }
    }

    let taste = if feature_tracks.is_empty() {
        None
    } else {
        let n = feature_tracks.len() as f64;
        Some(AudioFeatures {
            energy: feature_sum.energy / n,
            danceability: feature_sum.danceability / n,
            valence: feature_sum.valence / n,
            tempo: feature_sum.tempo / n,
        })
    };

    Rollups {
        total_unique_tracks: tracks.len(),
        total_unique_artists: artists.len(),
        total_unique_albums: albums.len(),
        tracks: sort_entries(into_entries(tracks), SortKey::Plays),
        artists: sort_entries(into_entries(artists), SortKey::Plays),
        albums: sort_entries(into_entries(albums), SortKey::Plays),
        genres: sort_entries(into_entries(genres), SortKey::Plays),
        daily,
        taste,
        total_plays,
        total_minutes,
        total_hours: total_minutes / 60.0,
    }
}

fn into_entries(counters: HashMap<String, Counter>) -> Vec<RankedEntry> {
    let mut entries: Vec<RankedEntry> = counters
        .into_iter()
        .map(|(id, c)| RankedEntry {
            rank: 0,
            id,
            name: c.name,
            image_url: c.image_url,
            plays: c.plays,
            minutes: c.minutes,
            last_listened: c.last_listened,
        })
        .collect();
    // Deterministic base order before any stable re-sort.
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

/// Re-sort a rollup list by the given key and re-assign contiguous 1-based
/// ranks. Stable: equal keys keep their relative order.
pub fn sort_entries(mut entries: Vec<RankedEntry>, key: SortKey) -> Vec<RankedEntry> {
    match key {
        SortKey::Plays => entries.sort_by(|a, b| b.plays.cmp(&a.plays)),
        SortKey::Minutes => {
            entries.sort_by(|a, b| b.minutes.partial_cmp(&a.minutes).unwrap_or(std::cmp::Ordering::Equal))
        }
        // Entries that were never listened to sort last.
        SortKey::Recent => entries.sort_by(|a, b| match (b.last_listened, a.last_listened) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => std::cmp::Ordering::Equal,
        }),
    }
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

/// Case-insensitive substring filter on entry names; applied before ranking
/// so filtered views get their own contiguous ranks.
pub fn filter_entries(entries: Vec<RankedEntry>, query: &str) -> Vec<RankedEntry> {
    let needle = query.to_lowercase();
    entries
        .into_iter()
        .filter(|e| e.name.to_lowercase().contains(&needle))
        .collect()
}

pub struct AggregationEngine {
    store: SqliteLibraryStore,
}

impl AggregationEngine {
    pub fn new(store: SqliteLibraryStore) -> Self {
        Self { store }
    }

    pub fn aggregate(
        &self,
        user_rowid: i64,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> anyhow::Result<Rollups> {
        let events = self.store.plays_with_tracks(user_rowid, from, to)?;
        Ok(aggregate(&events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(
        track: &str,
        day: u32,
        duration_ms: i64,
        genres: &[&str],
        features: Option<AudioFeatures>,
    ) -> PlayWithTrack {
        PlayWithTrack {
            played_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            track_id: track.to_string(),
            track_name: format!("track {}", track),
            duration_ms,
            image_url: None,
            album: Some(("al1".to_string(), "Album One".to_string())),
            artists: vec![("ar1".to_string(), "Artist One".to_string())],
            genres: genres.iter().map(|s| s.to_string()).collect(),
            features,
        }
    }

    #[test]
    fn empty_window_yields_zero_rollups() {
        let rollups = aggregate(&[]);
        assert_eq!(rollups.total_plays, 0);
        assert!(rollups.tracks.is_empty());
        assert!(rollups.daily.is_empty());
        assert!(rollups.taste.is_none());
    }

    #[test]
    fn counts_plays_minutes_and_uniques() {
        let events = vec![
            event("t1", 1, 180_000, &["rock"], None),
            event("t1", 2, 180_000, &["rock"], None),
            event("t2", 2, 60_000, &[], None),
        ];
        let rollups = aggregate(&events);

        assert_eq!(rollups.total_plays, 3);
        assert_eq!(rollups.total_unique_tracks, 2);
        assert_eq!(rollups.total_unique_artists, 1);
        assert_eq!(rollups.total_unique_albums, 1);
        assert!((rollups.total_minutes - 7.0).abs() < 1e-9);

        let t1 = rollups.tracks.iter().find(|e| e.id == "t1").unwrap();
        assert_eq!(t1.plays, 2);
        assert_eq!(t1.rank, 1);
        assert_eq!(
            t1.last_listened.unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap()
        );

        assert_eq!(rollups.daily.len(), 2);
        let day2 = rollups.daily[&NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()];
        assert_eq!(day2.plays, 2);
    }

    #[test]
    fn untagged_plays_land_in_unknown_genre() {
        let rollups = aggregate(&[event("t1", 1, 60_000, &[], None)]);
        assert_eq!(rollups.genres.len(), 1);
        assert_eq!(rollups.genres[0].id, UNKNOWN_GENRE);
    }

    #[test]
    fn taste_mean_skips_incomplete_feature_tracks() {
        let complete = AudioFeatures {
            energy: 0.8,
            danceability: 0.8,
            valence: 0.8,
            tempo: 120.0,
        };
        // t2 joined with no feature tuple at all, the store already gates on
        // completeness.
        let events = vec![
            event("t1", 1, 60_000, &[], Some(complete)),
            event("t2", 1, 60_000, &[], None),
        ];
        let taste = aggregate(&events).taste.unwrap();
        assert!((taste.energy - 0.8).abs() < 1e-9);
        assert!((taste.tempo - 120.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_plays_count_track_features_once() {
        let complete = AudioFeatures {
            energy: 0.6,
            danceability: 0.4,
            valence: 0.5,
            tempo: 100.0,
        };
        let other = AudioFeatures {
            energy: 1.0,
            danceability: 1.0,
            valence: 1.0,
            tempo: 200.0,
        };
        let events = vec![
            event("t1", 1, 60_000, &[], Some(complete)),
            event("t1", 2, 60_000, &[], Some(complete)),
            event("t2", 2, 60_000, &[], Some(other)),
        ];
        let taste = aggregate(&events).taste.unwrap();
        assert!((taste.energy - 0.8).abs() < 1e-9);
        assert!((taste.tempo - 150.0).abs() < 1e-9);
    }

    #[test]
    fn ranks_are_contiguous_for_every_key() {
        let events = vec![
            event("t1", 1, 180_000, &[], None),
            event("t1", 3, 180_000, &[], None),
            event("t2", 2, 600_000, &[], None),
            event("t3", 4, 30_000, &[], None),
        ];
        let rollups = aggregate(&events);
        for key in [SortKey::Plays, SortKey::Minutes, SortKey::Recent] {
            let sorted = sort_entries(rollups.tracks.clone(), key);
            let ranks: Vec<usize> = sorted.iter().map(|e| e.rank).collect();
            assert_eq!(ranks, vec![1, 2, 3]);
        }

        let by_minutes = sort_entries(rollups.tracks.clone(), SortKey::Minutes);
        assert_eq!(by_minutes[0].id, "t2");
        let by_recent = sort_entries(rollups.tracks.clone(), SortKey::Recent);
        assert_eq!(by_recent[0].id, "t3");
    }

    #[test]
    fn filter_applies_before_ranking() {
        let events = vec![
            event("t1", 1, 180_000, &[], None),
            event("t2", 2, 60_000, &[], None),
        ];
        let mut rollups = aggregate(&events);
        rollups.tracks[0].name = "Morning Song".to_string();
        rollups.tracks[1].name = "Evening Song".to_string();

        let filtered = sort_entries(
            filter_entries(rollups.tracks.clone(), "evening"),
            SortKey::Plays,
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].rank, 1);
    }
}
