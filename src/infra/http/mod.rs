//! HTTP surfaces: the cached public site and the operator API.

mod admin;
mod error;
mod middleware;
mod public;

pub use admin::build_admin_router;
pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use public::build_public_router;

use crate::cache::{CacheManager, Renderer};

/// Response header reporting how the cache answered (`hit`, `stale`, `miss`, `bypass`).
pub const CACHE_STATUS_HEADER: &str = "x-regencache";

pub struct HttpState<R: Renderer> {
    pub cache: CacheManager<R>,
}

impl<R: Renderer> HttpState<R> {
    pub fn new(cache: CacheManager<R>) -> Self {
        Self { cache }
    }
}

impl<R: Renderer> Clone for HttpState<R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}
