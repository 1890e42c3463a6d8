//! Seed selection and the prioritized seed-strategy list.

use crate::aggregation::{Rollups, UNKNOWN_GENRE};

/// Provider limits on one recommendations call.
const MAX_TOTAL_SEEDS: usize = 5;
const MAX_TRACK_SEEDS: usize = 2;
const MAX_ARTIST_SEEDS: usize = 2;

/// How many of each seed kind are collected before clamping.
const SEED_TRACKS: usize = 3;
const SEED_ARTISTS: usize = 3;
const SEED_GENRES: usize = 5;
const MERGED_SEED_CAP: usize = 5;

/// The user's taste distilled into candidate seed ids, ordered by play
/// frequency. Genres are raw library tags at this point; validation against
/// the provider's seed list happens later.
#[derive(Debug, Clone, Default)]
pub struct SeedSelection {
    pub tracks: Vec<String>,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
}

impl SeedSelection {
    /// Top plays from the all-time rollup, merged with high-frequency ids
    /// from raw history that the rollup's top slice missed.
    pub fn from_rollups(
        rollups: &Rollups,
        raw_track_counts: &[(String, i64)],
        raw_artist_counts: &[(String, i64)],
    ) -> Self {
        let mut tracks: Vec<String> = rollups
            .tracks
            .iter()
            .take(SEED_TRACKS)
            .map(|e| e.id.clone())
            .collect();
        merge_frequency_ranked(&mut tracks, raw_track_counts, MERGED_SEED_CAP);

        let mut artists: Vec<String> = rollups
            .artists
            .iter()
            .take(SEED_ARTISTS)
            .map(|e| e.id.clone())
            .collect();
        merge_frequency_ranked(&mut artists, raw_artist_counts, MERGED_SEED_CAP);

        let genres: Vec<String> = rollups
            .genres
            .iter()
            .filter(|e| e.id != UNKNOWN_GENRE)
            .take(SEED_GENRES)
            .map(|e| e.id.clone())
            .collect();

        SeedSelection {
            tracks,
            artists,
            genres,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty() && self.artists.is_empty() && self.genres.is_empty()
    }
}

fn merge_frequency_ranked(seeds: &mut Vec<String>, counts: &[(String, i64)], cap: usize) {
    for (id, _) in counts {
        if seeds.len() >= cap {
            break;
        }
        if !seeds.contains(id) {
            seeds.push(id.clone());
        }
    }
    seeds.truncate(cap);
}

/// One combination of seeds to offer the recommendations endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedStrategy {
    pub tracks: Vec<String>,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
}

impl SeedStrategy {
    fn clamp(tracks: &[String], artists: &[String], genres: &[String]) -> Self {
        let tracks: Vec<String> = tracks.iter().take(MAX_TRACK_SEEDS).cloned().collect();
        let artists: Vec<String> = artists.iter().take(MAX_ARTIST_SEEDS).cloned().collect();
        let remainder = MAX_TOTAL_SEEDS - tracks.len() - artists.len();
        let genres: Vec<String> = genres.iter().take(remainder).cloned().collect();
        SeedStrategy {
            tracks,
            artists,
            genres,
        }
    }

    fn is_empty(&self) -> bool {
        self.tracks.is_empty() && self.artists.is_empty() && self.genres.is_empty()
    }
}

/// Priority-ordered strategies: tracks+artists+genres, tracks+artists,
/// tracks only, artists only. Each clamped to the provider's seed limits,
/// de-duplicated by content, empty combinations skipped.
pub fn strategies(seeds: &SeedSelection, validated_genres: &[String]) -> Vec<SeedStrategy> {
    let candidates = [
        SeedStrategy::clamp(&seeds.tracks, &seeds.artists, validated_genres),
        SeedStrategy::clamp(&seeds.tracks, &seeds.artists, &[]),
        SeedStrategy::clamp(&seeds.tracks, &[], &[]),
        SeedStrategy::clamp(&[], &seeds.artists, &[]),
    ];
    let mut out: Vec<SeedStrategy> = Vec::new();
    for candidate in candidates {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{aggregate, sort_entries, RankedEntry, SortKey};
    use chrono::Utc;

    fn entry(id: &str, plays: i64) -> RankedEntry {
        RankedEntry {
            rank: 0,
            id: id.to_string(),
            name: id.to_string(),
            image_url: None,
            plays,
            minutes: plays as f64,
            last_listened: Some(Utc::now()),
        }
    }

    fn rollups(tracks: &[(&str, i64)], artists: &[(&str, i64)], genres: &[&str]) -> Rollups {
        let mut r = aggregate(&[]);
        r.tracks = sort_entries(
            tracks.iter().map(|(id, p)| entry(id, *p)).collect(),
            SortKey::Plays,
        );
        r.artists = sort_entries(
            artists.iter().map(|(id, p)| entry(id, *p)).collect(),
            SortKey::Plays,
        );
        r.genres = sort_entries(
            genres.iter().map(|g| entry(g, 1)).collect(),
            SortKey::Plays,
        );
        r
    }

    #[test]
    fn takes_top_seeds_and_skips_unknown_genre() {
        let r = rollups(
            &[("t1", 9), ("t2", 8), ("t3", 7), ("t4", 6)],
            &[("a1", 9), ("a2", 8)],
            &["Unknown", "rock", "pop"],
        );
        let seeds = SeedSelection::from_rollups(&r, &[], &[]);
        assert_eq!(seeds.tracks, vec!["t1", "t2", "t3"]);
        assert_eq!(seeds.artists, vec!["a1", "a2"]);
        assert_eq!(seeds.genres, vec!["rock", "pop"]);
    }

    #[test]
    fn merges_raw_history_ids_up_to_cap() {
        let r = rollups(&[("t1", 9), ("t2", 8), ("t3", 7)], &[], &[]);
        let raw = vec![
            ("t2".to_string(), 20),
            ("t4".to_string(), 15),
            ("t5".to_string(), 12),
            ("t6".to_string(), 10),
        ];
        let seeds = SeedSelection::from_rollups(&r, &raw, &[]);
        assert_eq!(seeds.tracks, vec!["t1", "t2", "t3", "t4", "t5"]);
    }

    #[test]
    fn strategies_are_clamped_deduped_and_ordered() {
        let seeds = SeedSelection {
            tracks: vec!["t1".into(), "t2".into(), "t3".into()],
            artists: vec!["a1".into(), "a2".into(), "a3".into()],
            genres: vec![],
        };
        let genres = vec!["rock".to_string(), "pop".to_string()];
        let list = strategies(&seeds, &genres);

        assert_eq!(list.len(), 4);
        assert_eq!(list[0].tracks, vec!["t1", "t2"]);
        assert_eq!(list[0].artists, vec!["a1", "a2"]);
        assert_eq!(list[0].genres, vec!["rock"]);
        assert_eq!(list[1].genres, Vec::<String>::new());
        assert_eq!(list[2].artists, Vec::<String>::new());
        assert_eq!(list[3].tracks, Vec::<String>::new());
        for strategy in &list {
            assert!(strategy.tracks.len() + strategy.artists.len() + strategy.genres.len() <= 5);
        }
    }

    #[test]
    fn duplicate_and_empty_strategies_are_skipped() {
        let seeds = SeedSelection {
            tracks: vec!["t1".into()],
            artists: vec![],
            genres: vec![],
        };
        let list = strategies(&seeds, &[]);
        // TAG == TA == T once genres and artists are empty.
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].tracks, vec!["t1"]);
    }

    #[test]
    fn no_seeds_at_all_yields_no_strategies() {
        let seeds = SeedSelection::default();
        assert!(seeds.is_empty());
        assert!(strategies(&seeds, &[]).is_empty());
    }
}
