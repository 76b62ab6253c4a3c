#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use regencache::cache::{
    CacheConfig, CacheManager, Clock, ManualClock, RemoteStore, RenderError, Renderer,
};
use regencache::infra::upstream::{RenderedPage, UpstreamRequest};
use tokio::sync::Semaphore;

/// Shared controls for a [`ScriptedRenderer`] owned by a cache manager.
pub struct Script {
    calls: AtomicUsize,
    fail: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
    urls: Mutex<Vec<String>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::default(),
            fail: AtomicBool::default(),
            gated: AtomicBool::default(),
            gate: Semaphore::new(0),
            urls: Mutex::default(),
        }
    }
}

impl Script {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rendered_urls(&self) -> Vec<String> {
        self.urls.lock().expect("urls lock").clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent render until [`release`](Self::release) is called.
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, renders: usize) {
        self.gate.add_permits(renders);
    }
}

/// Renders `"<url> v<n>"`, where `n` counts render calls.
pub struct ScriptedRenderer {
    script: Arc<Script>,
}

impl ScriptedRenderer {
    pub fn new() -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        (
            Self {
                script: Arc::clone(&script),
            },
            script,
        )
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    type Request = UpstreamRequest;
    type Output = RenderedPage;

    async fn render(
        &self,
        url: &str,
        _request: &UpstreamRequest,
    ) -> Result<RenderedPage, RenderError> {
        let call = self.script.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.script
            .urls
            .lock()
            .expect("urls lock")
            .push(url.to_string());

        if self.script.gated.load(Ordering::SeqCst) {
            self.script
                .gate
                .acquire()
                .await
                .expect("gate open")
                .forget();
        }
        if self.script.fail.load(Ordering::SeqCst) {
            return Err(RenderError::failed("scripted failure"));
        }

        Ok(RenderedPage {
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Bytes::from(format!("{url} v{call}")),
        })
    }
}

pub fn body(page: &RenderedPage) -> String {
    String::from_utf8_lossy(&page.body).into_owned()
}

pub fn config(revalidate: u64, stale_while_revalidate: u64) -> CacheConfig {
    CacheConfig {
        default_revalidate_seconds: revalidate,
        stale_while_revalidate_seconds: stale_while_revalidate,
        ..CacheConfig::default()
    }
}

pub struct Harness {
    pub cache: CacheManager<ScriptedRenderer>,
    pub script: Arc<Script>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_remote(config: CacheConfig, remote: Arc<dyn RemoteStore>) -> Self {
        Self::build(config, Some(remote))
    }

    fn build(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let (renderer, script) = ScriptedRenderer::new();
        let clock = Arc::new(ManualClock::new(0));
        let shared: Arc<dyn Clock> = clock.clone();
        let mut builder = CacheManager::builder(config, renderer).clock(shared);
        if let Some(remote) = remote {
            builder = builder.remote(remote);
        }
        let cache = builder.build().expect("valid cache config");
        Self {
            cache,
            script,
            clock,
        }
    }

    pub async fn get(&self, url: &str) -> String {
        let page = self
            .cache
            .get_page(url, &UpstreamRequest::default(), None)
            .await
            .expect("render succeeds");
        body(&page)
    }
}
