//! Operator API for inspecting and steering the regeneration cache.

mod cache;
mod health;
mod inspect;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::cache::Renderer;

use super::{
    HttpState,
    middleware::{log_responses, set_request_context},
};

pub fn build_admin_router<R>(state: HttpState<R>) -> Router
where
    R: Renderer,
    R::Request: Default,
{
    Router::new()
        .route("/_health", get(health::admin_health))
        .route("/revalidate", post(cache::revalidate::<R>))
        .route("/invalidate/page", post(cache::invalidate_page::<R>))
        .route("/invalidate/pattern", post(cache::invalidate_pattern::<R>))
        .route("/invalidate/tag", post(cache::invalidate_tag::<R>))
        .route("/invalidate/all", post(cache::invalidate_all::<R>))
        .route("/prune", post(cache::prune::<R>))
        .route("/stats", get(inspect::stats::<R>))
        .route("/info", get(inspect::info::<R>))
        .route("/failures", get(inspect::failures::<R>))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
