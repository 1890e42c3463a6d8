//! Mock music provider
//!
//! A small axum app standing in for the real provider API. Every response
//! is driven by the shared [`MockProviderState`], so tests can stage tracks,
//! search hits, feature vectors and recommendation candidates, and assert on
//! call counts afterwards.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Default)]
pub struct MockProviderState {
    /// Full track objects by id, served by /tracks and /search.
    pub tracks: HashMap<String, Value>,
    /// (track name, artist name) -> track id resolved by /search.
    pub search_index: HashMap<(String, String), String>,
    /// Audio feature objects by track id.
    pub features: HashMap<String, Value>,
    /// Full artist objects by id.
    pub artists: HashMap<String, Value>,
    /// Play history items for /me/player/recently-played (single page).
    pub recently_played: Vec<Value>,
    /// Track objects for /me/top/tracks.
    pub top_tracks: Vec<Value>,
    /// Artist objects for /me/top/artists.
    pub top_artists: Vec<Value>,
    /// Candidate tracks returned by /recommendations.
    pub recommendations: Vec<Value>,
    /// Supported seed genres.
    pub genre_seeds: Vec<String>,
    /// When true the token endpoint rejects every refresh.
    pub reject_token_refresh: bool,
    /// When true /recommendations rejects calls that carry seed_genres.
    pub reject_genre_seeds: bool,

    pub search_calls: usize,
    pub recommendations_calls: usize,
    pub token_calls: usize,
}

type SharedState = Arc<Mutex<MockProviderState>>;

fn split_ids(params: &HashMap<String, String>) -> Vec<String> {
    params
        .get("ids")
        .map(|ids| ids.split(',').map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

async fn token(State(state): State<SharedState>) -> Response {
    let mut state = state.lock().unwrap();
    state.token_calls += 1;
    if state.reject_token_refresh {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response();
    }
    Json(json!({
        "access_token": "fresh-access-token",
        "expires_in": 3600,
        "refresh_token": "fresh-refresh-token",
    }))
    .into_response()
}

async fn tracks(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let state = state.lock().unwrap();
    let tracks: Vec<Value> = split_ids(&params)
        .iter()
        .map(|id| state.tracks.get(id).cloned().unwrap_or(Value::Null))
        .collect();
    Json(json!({ "tracks": tracks }))
}

async fn artists(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let state = state.lock().unwrap();
    let artists: Vec<Value> = split_ids(&params)
        .iter()
        .filter_map(|id| state.artists.get(id).cloned())
        .collect();
    Json(json!({ "artists": artists }))
}

async fn audio_features(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let state = state.lock().unwrap();
    let features: Vec<Value> = split_ids(&params)
        .iter()
        .map(|id| state.features.get(id).cloned().unwrap_or(Value::Null))
        .collect();
    Json(json!({ "audio_features": features }))
}

/// Parses the `track:{name} artist:{name}` query shape the gateway sends.
fn parse_search_query(q: &str) -> Option<(String, String)> {
    let rest = q.strip_prefix("track:")?;
    let (track, artist) = rest.split_once(" artist:")?;
    Some((track.to_string(), artist.to_string()))
}

async fn search(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.search_calls += 1;
    let hit = params
        .get("q")
        .and_then(|q| parse_search_query(q))
        .and_then(|key| state.search_index.get(&key).cloned())
        .and_then(|id| state.tracks.get(&id).cloned());
    let items: Vec<Value> = hit.into_iter().collect();
    Json(json!({ "tracks": { "items": items } }))
}

async fn recently_played(State(state): State<SharedState>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(json!({ "items": state.recently_played, "next": null }))
}

async fn top_tracks(State(state): State<SharedState>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(json!({ "items": state.top_tracks }))
}

async fn top_artists(State(state): State<SharedState>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(json!({ "items": state.top_artists }))
}

async fn recommendations(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.recommendations_calls += 1;
    if state.reject_genre_seeds && params.contains_key("seed_genres") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported seed genre"})),
        )
            .into_response();
    }
    Json(json!({ "tracks": state.recommendations })).into_response()
}

async fn genre_seeds(State(state): State<SharedState>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(json!({ "genres": state.genre_seeds }))
}

/// A running mock provider bound to a random local port.
pub struct MockProvider {
    pub base_url: String,
    pub token_url: String,
    pub state: SharedState,
}

impl MockProvider {
    pub async fn spawn() -> Self {
        let state: SharedState = Arc::new(Mutex::new(MockProviderState::default()));

        let app = Router::new()
            .route("/token", post(token))
            .route("/tracks", get(tracks))
            .route("/artists", get(artists))
            .route("/audio-features", get(audio_features))
            .route("/search", get(search))
            .route("/me/player/recently-played", get(recently_played))
            .route("/me/top/tracks", get(top_tracks))
            .route("/me/top/artists", get(top_artists))
            .route("/recommendations", get(recommendations))
            .route("/recommendations/available-genre-seeds", get(genre_seeds))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock provider port");
        let port = listener
            .local_addr()
            .expect("Failed to get mock provider address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);
        let token_url = format!("{}/token", base_url);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock provider stopped");
        });

        MockProvider {
            base_url,
            token_url,
            state,
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockProviderState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}
