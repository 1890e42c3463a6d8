//! Wire types for the music provider's Web API.
//!
//! Only the fields the pipeline actually touches are deserialized.

use crate::library_store::{Album, Artist, AudioFeatures, Track};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub images: Vec<ProviderImage>,
}

impl ProviderAlbum {
    /// Largest cover image, the provider lists them widest first.
    pub fn image_url(&self) -> Option<String> {
        self.images.first().map(|i| i.url.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTrack {
    pub id: String,
    pub name: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub album: Option<ProviderAlbum>,
    #[serde(default)]
    pub artists: Vec<ProviderArtistRef>,
    #[serde(default)]
    pub popularity: Option<i64>,
    #[serde(default)]
    pub preview_url: Option<String>,
}

impl ProviderTrack {
    /// Canonical track row (feature columns empty; enrichment fills them).
    pub fn to_canonical(&self) -> Track {
        Track {
            id: self.id.clone(),
            name: self.name.clone(),
            duration_ms: self.duration_ms,
            album_id: self.album.as_ref().map(|a| a.id.clone()),
            artist_ids: self.artists.iter().map(|a| a.id.clone()).collect(),
            popularity: self.popularity,
            preview_url: self.preview_url.clone(),
            image_url: self.album.as_ref().and_then(|a| a.image_url()),
            energy: None,
            danceability: None,
            valence: None,
            tempo: None,
        }
    }

    pub fn canonical_album(&self) -> Option<Album> {
        self.album.as_ref().map(|a| Album {
            id: a.id.clone(),
            name: a.name.clone(),
            release_date: a.release_date.clone(),
            image_url: a.image_url(),
        })
    }

    /// Artist stubs known from the track object alone; genres arrive later
    /// through the artists endpoint.
    pub fn canonical_artists(&self) -> Vec<Artist> {
        self.artists
            .iter()
            .map(|a| Artist {
                id: a.id.clone(),
                name: a.name.clone(),
                image_url: None,
                genres: Vec::new(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub images: Vec<ProviderImage>,
}

impl ProviderArtist {
    pub fn to_canonical(&self) -> Artist {
        Artist {
            id: self.id.clone(),
            name: self.name.clone(),
            image_url: self.images.first().map(|i| i.url.clone()),
            genres: self.genres.clone(),
        }
    }
}

/// Per-track feature vector; the provider returns null for tracks it has no
/// analysis for, so entries are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeaturesObject {
    pub id: String,
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    pub tempo: f64,
}

impl AudioFeaturesObject {
    pub fn to_features(&self) -> AudioFeatures {
        AudioFeatures {
            energy: self.energy,
            danceability: self.danceability,
            valence: self.valence,
            tempo: self.tempo,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayHistoryItem {
    pub track: ProviderTrack,
    pub played_at: String,
}

/// Cursor-paginated recently-played page; `next` is an absolute URL.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentlyPlayedPage {
    pub items: Vec<PlayHistoryItem>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopTracksPage {
    pub items: Vec<ProviderTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopArtistsPage {
    pub items: Vec<ProviderArtist>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracksResponse {
    pub tracks: Vec<Option<ProviderTrack>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistsResponse {
    pub artists: Vec<Option<ProviderArtist>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeaturesResponse {
    pub audio_features: Vec<Option<AudioFeaturesObject>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchTracks {
    pub items: Vec<ProviderTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub tracks: Option<SearchTracks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationsResponse {
    pub tracks: Vec<ProviderTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenreSeedsResponse {
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
