//! Genre normalization and the cached provider seed-genre list.

use crate::provider::{ProviderError, ProviderGateway};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

lazy_static! {
    static ref NON_GENRE_CHARS: Regex = Regex::new(r"[^a-z0-9 \-]").expect("invalid genre regex");
    static ref MULTI_SPACE: Regex = Regex::new(r"  +").expect("invalid whitespace regex");
    static ref GENRE_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("hip hop", "hip-hop");
        m.insert("hiphop", "hip-hop");
        m.insert("rnb", "r-n-b");
        m.insert("r and b", "r-n-b");
        m.insert("drum and bass", "drum-and-bass");
        m.insert("drum n bass", "drum-and-bass");
        m
    };
}

/// Lower-case, strip punctuation, collapse whitespace and resolve known
/// aliases so user-library genre tags line up with the provider's seed ids.
pub fn normalize_genre(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = NON_GENRE_CHARS.replace_all(&lowered, "");
    let collapsed = MULTI_SPACE.replace_all(stripped.trim(), " ").to_string();
    match GENRE_ALIASES.get(collapsed.as_str()) {
        Some(alias) => alias.to_string(),
        None => collapsed,
    }
}

/// Provider seed-genre list, fetched once and reused until the TTL lapses.
pub struct GenreSeedCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, HashSet<String>)>>,
}

impl GenreSeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn supported(
        &self,
        gateway: &ProviderGateway,
        user_rowid: i64,
    ) -> Result<HashSet<String>, ProviderError> {
        let mut cached = self.cached.lock().await;
        if let Some((fetched_at, genres)) = cached.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(genres.clone());
            }
        }
        let genres: HashSet<String> = gateway
            .available_genre_seeds(user_rowid)
            .await?
            .into_iter()
            .collect();
        debug!("Fetched {} provider seed genres", genres.len());
        *cached = Some((Instant::now(), genres.clone()));
        Ok(genres)
    }
}

/// Normalize candidates and keep those present in the supported set,
/// preserving order and dropping duplicates.
pub fn validate_genres(candidates: &[String], supported: &HashSet<String>) -> Vec<String> {
    let mut kept = Vec::new();
    let mut seen = HashSet::new();
    for raw in candidates {
        let normalized = normalize_genre(raw);
        if !normalized.is_empty() && supported.contains(&normalized) && seen.insert(normalized.clone())
        {
            kept.push(normalized);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_aliases() {
        assert_eq!(normalize_genre("Hip Hop"), "hip-hop");
        assert_eq!(normalize_genre("RnB"), "r-n-b");
        assert_eq!(normalize_genre("Indie Rock"), "indie rock");
    }

    #[test]
    fn strips_punctuation() {
        assert_eq!(normalize_genre("synth-pop!"), "synth-pop");
        assert_eq!(normalize_genre("Rock & Roll"), "rock roll");
    }

    #[test]
    fn validation_keeps_supported_normalized_genres() {
        let supported: HashSet<String> = ["hip-hop", "indie rock"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let kept = validate_genres(
            &[
                "Hip Hop".to_string(),
                "hip hop".to_string(),
                "vaporwave".to_string(),
                "Indie Rock".to_string(),
            ],
            &supported,
        );
        assert_eq!(kept, vec!["hip-hop".to_string(), "indie rock".to_string()]);
    }
}
