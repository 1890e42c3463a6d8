//! Daily recommendation endpoints.

use super::error::ApiError;
use super::metrics::record_recommendation;
use super::state::ServerState;
use crate::recommend::{RecommendError, RecommendationSet};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RegenerateBody {
    force: bool,
}

fn outcome_label(result: &Result<RecommendationSet, RecommendError>) -> &'static str {
    match result {
        Ok(set) if set.from_cache => "cached",
        Ok(_) => "generated",
        Err(RecommendError::Throttled) => "throttled",
        Err(_) => "failed",
    }
}

/// GET /user/{user_id}/recommendations - cached-or-generated daily set.
async fn get_recommendations(
    State(state): State<ServerState>,
    Path(user_handle): Path<String>,
) -> Result<Json<RecommendationSet>, ApiError> {
    let user_rowid = state.store.ensure_user(&user_handle)?;
    let result = state.recommender.generate(user_rowid, false).await;
    record_recommendation(outcome_label(&result));
    Ok(Json(result?))
}

/// POST /user/{user_id}/recommendations - regenerate, subject to cooldown.
async fn regenerate_recommendations(
    State(state): State<ServerState>,
    Path(user_handle): Path<String>,
    body: Option<Json<RegenerateBody>>,
) -> Result<Json<RecommendationSet>, ApiError> {
    let user_rowid = state.store.ensure_user(&user_handle)?;
    let force = body.map(|Json(b)| b.force).unwrap_or(true);
    let result = state.recommender.generate(user_rowid, force).await;
    record_recommendation(outcome_label(&result));
    Ok(Json(result?))
}

pub fn make_recommendation_routes() -> Router<ServerState> {
    Router::new().route(
        "/user/{user_id}/recommendations",
        get(get_recommendations).post(regenerate_recommendations),
    )
}
