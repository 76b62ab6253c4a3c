use std::collections::BTreeSet;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::cache::{PageConfig, Pattern, Renderer};

use super::super::{ApiError, HttpState, codes};

#[derive(Debug, Deserialize)]
pub(super) struct RevalidateRequest {
    url: String,
    #[serde(default)]
    revalidate: Option<u64>,
    #[serde(default)]
    stale_while_revalidate: Option<u64>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl RevalidateRequest {
    fn page_config(&self) -> Option<PageConfig> {
        let page = PageConfig {
            revalidate: self.revalidate,
            stale_while_revalidate: self.stale_while_revalidate,
            tags: self.tags.clone(),
        };
        (page != PageConfig::default()).then_some(page)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct PageRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct PatternRequest {
    pattern: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct TagRequest {
    tag: String,
}

#[derive(Debug, Serialize)]
pub(super) struct Removed<T> {
    removed: T,
}

pub(super) async fn revalidate<R>(
    State(state): State<HttpState<R>>,
    Json(payload): Json<RevalidateRequest>,
) -> Result<Response, ApiError>
where
    R: Renderer,
    R::Request: Default,
{
    let url = relative_url(&payload.url)?;
    let page = payload.page_config();
    let result = state
        .cache
        .revalidate_page(url, &R::Request::default(), page.as_ref())
        .await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(result)).into_response())
}

pub(super) async fn invalidate_page<R: Renderer>(
    State(state): State<HttpState<R>>,
    Json(payload): Json<PageRequest>,
) -> Result<Json<Removed<bool>>, ApiError> {
    let url = non_blank_url(&payload.url)?;
    let removed = state.cache.invalidate_page(url).await;
    Ok(Json(Removed { removed }))
}

pub(super) async fn invalidate_pattern<R: Renderer>(
    State(state): State<HttpState<R>>,
    Json(payload): Json<PatternRequest>,
) -> Result<Json<Removed<usize>>, ApiError> {
    let pattern = Pattern::regex(&payload.pattern).map_err(|err| {
        ApiError::bad_request(
            codes::INVALID_PATTERN,
            "Pattern is not a valid regular expression",
            Some(err.to_string()),
        )
    })?;
    let removed = state.cache.invalidate_pattern(&pattern).await;
    Ok(Json(Removed { removed }))
}

pub(super) async fn invalidate_tag<R: Renderer>(
    State(state): State<HttpState<R>>,
    Json(payload): Json<TagRequest>,
) -> Result<Json<Removed<usize>>, ApiError> {
    let tag = payload.tag.trim();
    if tag.is_empty() {
        return Err(ApiError::bad_request(
            codes::BAD_REQUEST,
            "Tag must not be empty",
            None,
        ));
    }
    let removed = state.cache.invalidate_tag(tag);
    Ok(Json(Removed { removed }))
}

pub(super) async fn invalidate_all<R: Renderer>(State(state): State<HttpState<R>>) -> Response {
    state.cache.invalidate_all().await;
    StatusCode::NO_CONTENT.into_response()
}

pub(super) async fn prune<R: Renderer>(
    State(state): State<HttpState<R>>,
) -> Json<Removed<usize>> {
    Json(Removed {
        removed: state.cache.prune_expired(),
    })
}

fn non_blank_url(url: &str) -> Result<&str, ApiError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request(
            codes::INVALID_URL,
            "URL must not be empty",
            None,
        ));
    }
    Ok(url)
}

/// Revalidation renders the target, so it must name a path on the origin.
fn relative_url(url: &str) -> Result<&str, ApiError> {
    let url = non_blank_url(url)?;
    if !url.starts_with('/') || url.starts_with("//") {
        return Err(ApiError::bad_request(
            codes::INVALID_URL,
            "URL must be a path on the origin",
            Some(format!("got `{url}`; use a path such as `/blog/post`")),
        ));
    }
    Ok(url)
}
