//! Listening statistics endpoint.

use super::error::ApiError;
use super::state::ServerState;
use crate::aggregation::{filter_entries, sort_entries, AggregationEngine, Rollups, SortKey};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_TOP_N: usize = 50;

#[derive(Debug, Deserialize, Default)]
struct StatsQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    sort: Option<String>,
    filter: Option<String>,
    limit: Option<usize>,
}

/// GET /user/{user_id}/stats?from=&to=&sort=&filter=&limit=
async fn get_stats(
    State(state): State<ServerState>,
    Path(user_handle): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Rollups>, ApiError> {
    let user_rowid = state.store.ensure_user(&user_handle)?;

    let from = query.from.unwrap_or(DateTime::UNIX_EPOCH);
    let to = query.to.unwrap_or_else(Utc::now);

    let sort = match query.sort.as_deref() {
        None => SortKey::Plays,
        Some(raw) => SortKey::parse(raw)
            .ok_or_else(|| ApiError::bad_request("sort must be one of plays, minutes, recent"))?,
    };
    let limit = query.limit.unwrap_or(DEFAULT_TOP_N);

    let engine = AggregationEngine::new(state.store.clone());
    let mut rollups = engine.aggregate(user_rowid, &from, &to)?;

    for list in [
        &mut rollups.tracks,
        &mut rollups.artists,
        &mut rollups.albums,
        &mut rollups.genres,
    ] {
        let mut entries = std::mem::take(list);
        if let Some(filter) = &query.filter {
            entries = filter_entries(entries, filter);
        }
        entries = sort_entries(entries, sort);
        entries.truncate(limit);
        *list = entries;
    }

    Ok(Json(rollups))
}

pub fn make_stats_routes() -> Router<ServerState> {
    Router::new().route("/user/{user_id}/stats", get(get_stats))
}
