//! Origin-backed renderer.
//!
//! Pages are rendered by fetching them from an origin server. Only 2xx
//! responses count as rendered output; anything else is a render failure and
//! is never cached.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{PageConfig, RenderError, Renderer, RevalidateDirectives, cache_key};

use super::error::InfraError;

pub const REVALIDATE_HEADER: &str = "x-revalidate";
pub const CACHE_TAGS_HEADER: &str = "x-cache-tags";

/// Origin response headers kept on a rendered page.
const STORED_HEADERS: &[&str] = &[
    "content-type",
    "content-language",
    REVALIDATE_HEADER,
    CACHE_TAGS_HEADER,
];

/// Client request headers passed through to the origin.
const FORWARDED_HEADERS: &[&str] = &["accept", "accept-language", "user-agent"];

/// Request context forwarded to the origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub headers: Vec<(String, String)>,
}

impl UpstreamRequest {
    /// Keep the forwardable subset of an incoming request's headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let headers = FORWARDED_HEADERS
            .iter()
            .filter_map(|name| {
                let value = headers.get(*name)?.to_str().ok()?;
                Some(((*name).to_string(), value.to_string()))
            })
            .collect();
        Self { headers }
    }
}

/// A page as returned by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl RenderedPage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

pub struct UpstreamRenderer {
    client: Client,
    origin: Url,
    timeout: Duration,
}

impl UpstreamRenderer {
    pub fn new(origin: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("regencache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::upstream(format!("failed to build client: {err}")))?;
        Ok(Self {
            client,
            origin: with_trailing_slash(origin),
            timeout,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolve a request target against the origin. Only the path and query
    /// the cache keys the page under are kept, so an absolute URL cannot
    /// point at another host.
    fn target(&self, url: &str) -> Result<Url, RenderError> {
        let key = cache_key(url);
        self.origin
            .join(key.as_str().trim_start_matches('/'))
            .map_err(|err| RenderError::failed(format!("invalid target `{url}`: {err}")))
    }

    fn map_error(&self, err: reqwest::Error) -> RenderError {
        if err.is_timeout() {
            RenderError::TimedOut(self.timeout)
        } else {
            RenderError::failed(format!("origin request failed: {err}"))
        }
    }
}

#[async_trait]
impl Renderer for UpstreamRenderer {
    type Request = UpstreamRequest;
    type Output = RenderedPage;

    async fn render(
        &self,
        url: &str,
        request: &UpstreamRequest,
    ) -> Result<RenderedPage, RenderError> {
        let target = self.target(url)?;
        let mut builder = self.client.get(target.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|err| self.map_error(err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::failed(format!(
                "origin responded {status} for {target}"
            )));
        }

        let headers = STORED_HEADERS
            .iter()
            .filter_map(|name| {
                let value = response.headers().get(*name)?.to_str().ok()?;
                Some(((*name).to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|err| self.map_error(err))?;
        debug!(%target, status = status.as_u16(), bytes = body.len(), "origin rendered page");

        Ok(RenderedPage {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn page_config(&self, output: &RenderedPage) -> Option<PageConfig> {
        let directives = output
            .header(REVALIDATE_HEADER)
            .map(RevalidateDirectives::parse)
            .unwrap_or_default();
        let tags = output
            .header(CACHE_TAGS_HEADER)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut page = directives.into_page_config();
        page.tags = tags;
        (page != PageConfig::default()).then_some(page)
    }
}

fn with_trailing_slash(mut origin: Url) -> Url {
    if !origin.path().ends_with('/') {
        let path = format!("{}/", origin.path());
        origin.set_path(&path);
    }
    origin
}

mod body_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
