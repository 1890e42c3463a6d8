//! Gateway to the music provider's Web API.
//!
//! Owns the access-token lifecycle and the retry/backoff loop; every
//! external call in the pipeline goes through here. Outer components treat
//! gateway errors as terminal for the current attempt — retry policy lives
//! only in this module.

use super::backoff::BackoffPolicy;
use super::models::*;
use crate::library_store::{AudioFeatures, SqliteLibraryStore, StoredToken};
use crate::server::metrics;
use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Refresh the access token when it expires within this many seconds.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider authorization expired, user must re-authenticate")]
    AuthExpired,

    #[error("No provider account linked for this user")]
    NotLinked,

    #[error("Provider retry limit reached while rate limited")]
    RetryLimitReached,

    #[error("Provider rejected the request ({status}): {body}")]
    ClientRejected { status: u16, body: String },

    #[error("Provider unavailable ({status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("Provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ProviderError {
    /// A 4xx the provider returned for this particular request; safe to
    /// swallow when a fallback strategy exists.
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, ProviderError::ClientRejected { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

pub struct ProviderGateway {
    http: reqwest::Client,
    config: ProviderConfig,
    store: SqliteLibraryStore,
    backoff: BackoffPolicy,
    throttle_hits: AtomicU64,
}

impl ProviderGateway {
    pub fn new(
        config: ProviderConfig,
        store: SqliteLibraryStore,
        backoff: BackoffPolicy,
        timeout_sec: u64,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_sec))
            .build()?;
        Ok(Self {
            http,
            config,
            store,
            backoff,
            throttle_hits: AtomicU64::new(0),
        })
    }

    /// Total 429 responses absorbed since process start. Callers snapshot
    /// this around an operation to report per-run throttle counts.
    pub fn throttle_hits(&self) -> u64 {
        self.throttle_hits.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Token lifecycle
    // =========================================================================

    async fn bearer_token(&self, user_rowid: i64) -> Result<String, ProviderError> {
        let stored = self
            .store
            .get_token(user_rowid)?
            .ok_or(ProviderError::NotLinked)?;
        let remaining = stored.expires_at - Utc::now();
        if remaining < ChronoDuration::seconds(TOKEN_EXPIRY_SLACK_SECS) {
            debug!("Access token for user {} is stale, refreshing", user_rowid);
            self.refresh_token(user_rowid, &stored).await
        } else {
            Ok(stored.access_token)
        }
    }

    /// Exchange the refresh token for a fresh access token and persist the
    /// pair. The refresh token rotates only when the provider sends a new
    /// one.
    async fn refresh_token(
        &self,
        user_rowid: i64,
        stored: &StoredToken,
    ) -> Result<String, ProviderError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", stored.refresh_token.as_str()),
        ];
        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token refresh failed ({}): {}", status, body);
            return if status.is_server_error() {
                Err(ProviderError::Unavailable {
                    status: status.as_u16(),
                    body,
                })
            } else {
                Err(ProviderError::AuthExpired)
            };
        }

        let token: TokenResponse = response.json().await?;
        let new = StoredToken {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| stored.refresh_token.clone()),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        };
        self.store.save_token(user_rowid, &new)?;
        Ok(new.access_token)
    }

    /// Seed a user's token pair (e.g. from an out-of-band OAuth exchange).
    pub fn link_account(&self, user_rowid: i64, token: &StoredToken) -> anyhow::Result<()> {
        self.store.save_token(user_rowid, token)
    }

    // =========================================================================
    // Request core
    // =========================================================================

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        user_rowid: i64,
        path_and_query: &str,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.config.api_base, path_and_query);
        self.get_absolute(user_rowid, &url).await
    }

    /// GET an absolute URL (used for cursor `next` pages). Retries on 429
    /// within the backoff budget, refreshes once on 401, fails fast on
    /// everything else.
    pub async fn get_absolute<T: DeserializeOwned>(
        &self,
        user_rowid: i64,
        url: &str,
    ) -> Result<T, ProviderError> {
        let mut refreshed = false;
        for _attempt in 0..self.backoff.max_retries {
            let token = self.bearer_token(user_rowid).await?;
            let response = self.http.get(url).bearer_auth(&token).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.json().await?);
            }

            match status.as_u16() {
                401 => {
                    if refreshed {
                        return Err(ProviderError::AuthExpired);
                    }
                    let stored = self
                        .store
                        .get_token(user_rowid)?
                        .ok_or(ProviderError::NotLinked)?;
                    self.refresh_token(user_rowid, &stored).await?;
                    refreshed = true;
                }
                429 => {
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(1);
                    self.throttle_hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_provider_throttle();
                    let delay = self.backoff.throttle_delay(retry_after);
                    debug!(
                        "Provider throttled us (Retry-After: {}s), sleeping {:?}",
                        retry_after, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                s if status.is_client_error() => {
                    return Err(ProviderError::ClientRejected {
                        status: s,
                        body: response.text().await.unwrap_or_default(),
                    });
                }
                s => {
                    return Err(ProviderError::Unavailable {
                        status: s,
                        body: response.text().await.unwrap_or_default(),
                    });
                }
            }
        }
        Err(ProviderError::RetryLimitReached)
    }

    // =========================================================================
    // Typed endpoints
    // =========================================================================

    pub async fn recently_played_first_page(
        &self,
        user_rowid: i64,
    ) -> Result<RecentlyPlayedPage, ProviderError> {
        self.get_json(user_rowid, "/me/player/recently-played?limit=50")
            .await
    }

    pub async fn recently_played_next_page(
        &self,
        user_rowid: i64,
        next_url: &str,
    ) -> Result<RecentlyPlayedPage, ProviderError> {
        self.get_absolute(user_rowid, next_url).await
    }

    pub async fn top_tracks(
        &self,
        user_rowid: i64,
        time_range: &str,
    ) -> Result<TopTracksPage, ProviderError> {
        self.get_json(
            user_rowid,
            &format!("/me/top/tracks?limit=50&time_range={}", time_range),
        )
        .await
    }

    pub async fn top_artists(&self, user_rowid: i64) -> Result<TopArtistsPage, ProviderError> {
        self.get_json(user_rowid, "/me/top/artists?limit=50&time_range=medium_term")
            .await
    }

    /// Batch track lookup, at most 50 ids per call.
    pub async fn tracks(
        &self,
        user_rowid: i64,
        ids: &[String],
    ) -> Result<Vec<ProviderTrack>, ProviderError> {
        let response: TracksResponse = self
            .get_json(user_rowid, &format!("/tracks?ids={}", ids.join(",")))
            .await?;
        Ok(response.tracks.into_iter().flatten().collect())
    }

    /// Batch artist lookup, at most 50 ids per call.
    pub async fn artists(
        &self,
        user_rowid: i64,
        ids: &[String],
    ) -> Result<Vec<ProviderArtist>, ProviderError> {
        let response: ArtistsResponse = self
            .get_json(user_rowid, &format!("/artists?ids={}", ids.join(",")))
            .await?;
        Ok(response.artists.into_iter().flatten().collect())
    }

    /// Batch audio-features lookup, at most 100 ids per call. Tracks the
    /// provider has no analysis for come back as nulls and are dropped.
    pub async fn audio_features(
        &self,
        user_rowid: i64,
        ids: &[String],
    ) -> Result<Vec<AudioFeaturesObject>, ProviderError> {
        let response: AudioFeaturesResponse = self
            .get_json(user_rowid, &format!("/audio-features?ids={}", ids.join(",")))
            .await?;
        Ok(response.audio_features.into_iter().flatten().collect())
    }

    /// Top-1 track search by name and artist name.
    pub async fn search_track(
        &self,
        user_rowid: i64,
        track_name: &str,
        artist_name: &str,
    ) -> Result<Option<ProviderTrack>, ProviderError> {
        let query = format!("track:{} artist:{}", track_name, artist_name);
        let response: SearchResponse = self
            .get_json(
                user_rowid,
                &format!(
                    "/search?q={}&type=track&limit=1",
                    urlencoding::encode(&query)
                ),
            )
            .await?;
        Ok(response
            .tracks
            .map(|t| t.items)
            .unwrap_or_default()
            .into_iter()
            .next())
    }

    pub async fn recommendations(
        &self,
        user_rowid: i64,
        seed_tracks: &[String],
        seed_artists: &[String],
        seed_genres: &[String],
        target: Option<&AudioFeatures>,
    ) -> Result<Vec<ProviderTrack>, ProviderError> {
        let mut query = vec!["limit=50".to_string()];
        if !seed_tracks.is_empty() {
            query.push(format!("seed_tracks={}", seed_tracks.join(",")));
        }
        if !seed_artists.is_empty() {
            query.push(format!("seed_artists={}", seed_artists.join(",")));
        }
        if !seed_genres.is_empty() {
            query.push(format!(
                "seed_genres={}",
                urlencoding::encode(&seed_genres.join(","))
            ));
        }
        if let Some(t) = target {
            query.push(format!("target_energy={}", t.energy));
            query.push(format!("target_danceability={}", t.danceability));
            query.push(format!("target_valence={}", t.valence));
            query.push(format!("target_tempo={}", t.tempo));
        }
        let response: RecommendationsResponse = self
            .get_json(user_rowid, &format!("/recommendations?{}", query.join("&")))
            .await?;
        Ok(response.tracks)
    }

    pub async fn available_genre_seeds(
        &self,
        user_rowid: i64,
    ) -> Result<Vec<String>, ProviderError> {
        let response: GenreSeedsResponse = self
            .get_json(user_rowid, "/recommendations/available-genre-seeds")
            .await?;
        Ok(response.genres)
    }
}
