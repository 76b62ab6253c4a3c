//! Render invoker boundary.
//!
//! The cache never produces page output itself; it calls a [`Renderer`]
//! owned by the caller and decides what to keep.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::config::PageConfig;
use super::stats::METRIC_RENDER_MS;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("render failed: {0}")]
    Failed(String),
    #[error("render timed out after {0:?}")]
    TimedOut(Duration),
}

impl RenderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Produces page output for a URL.
///
/// Implementations must be idempotent and must not touch the cache.
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    /// Opaque per-request context handed through to the renderer.
    type Request: Clone + Send + Sync + 'static;
    /// Rendered payload stored in both cache tiers.
    type Output: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    async fn render(&self, url: &str, request: &Self::Request)
    -> Result<Self::Output, RenderError>;

    /// Freshness hints carried by the output itself, used when the caller
    /// supplies no page override.
    fn page_config(&self, _output: &Self::Output) -> Option<PageConfig> {
        None
    }
}

/// Which code path asked for a render; used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderPath {
    Sync,
    Background,
    Explicit,
}

impl RenderPath {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Background => "background",
            Self::Explicit => "explicit",
        }
    }
}

/// Run a render, enforcing the optional timeout.
pub(crate) async fn invoke<R: Renderer>(
    renderer: &R,
    url: &str,
    request: &R::Request,
    timeout: Option<Duration>,
    path: RenderPath,
) -> Result<R::Output, RenderError> {
    let started_at = Instant::now();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, renderer.render(url, request)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::TimedOut(limit)),
        },
        None => renderer.render(url, request).await,
    };
    histogram!(METRIC_RENDER_MS, "path" => path.as_str())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
    result
}
