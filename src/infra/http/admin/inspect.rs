use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::cache::{CacheInfo, RegenerationFailure, Renderer, Stats};

use super::super::{ApiError, HttpState, codes};

#[derive(Debug, Deserialize)]
pub(super) struct InfoQuery {
    url: Option<String>,
}

pub(super) async fn stats<R: Renderer>(State(state): State<HttpState<R>>) -> Json<Stats> {
    Json(state.cache.stats())
}

pub(super) async fn info<R: Renderer>(
    State(state): State<HttpState<R>>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<CacheInfo>, ApiError> {
    let url = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request(
                codes::INVALID_URL,
                "Query parameter `url` is required",
                None,
            )
        })?;
    Ok(Json(state.cache.cache_info(url)))
}

pub(super) async fn failures<R: Renderer>(
    State(state): State<HttpState<R>>,
) -> Json<Vec<RegenerationFailure>> {
    Json(state.cache.recent_failures())
}
