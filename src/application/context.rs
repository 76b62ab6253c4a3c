use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    cache::{CacheManager, RemoteStore},
    config::{RemoteSettings, Settings},
    infra::{
        http::HttpState,
        upstream::UpstreamRenderer,
    },
};

use super::error::AppError;

/// Everything `serve` needs, built once from resolved settings.
pub struct ApplicationContext {
    pub cache: CacheManager<UpstreamRenderer>,
}

impl ApplicationContext {
    pub async fn build(settings: &Settings) -> Result<Self, AppError> {
        let renderer =
            UpstreamRenderer::new(settings.upstream.origin.clone(), settings.upstream.timeout)?;
        info!(
            origin = %renderer.origin(),
            timeout_secs = settings.upstream.timeout.as_secs(),
            "Upstream renderer configured"
        );

        let mut builder = CacheManager::builder(settings.cache.clone(), renderer);
        if settings.cache.enabled
            && let Some(store) = connect_remote(&settings.remote).await
        {
            builder = builder.remote(store);
        }
        let cache = builder.build()?;

        Ok(Self { cache })
    }

    pub fn http_state(&self) -> HttpState<UpstreamRenderer> {
        HttpState::new(self.cache.clone())
    }
}

/// The shared tier is optional: a failed connection is logged and the cache
/// runs local-only.
#[cfg(feature = "redis")]
async fn connect_remote(remote: &RemoteSettings) -> Option<Arc<dyn RemoteStore>> {
    use crate::cache::RedisRemoteStore;

    let url = remote.redis_url.as_deref()?;
    let store = match RedisRemoteStore::connect(url).await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "Remote cache tier unavailable; continuing local-only");
            return None;
        }
    };
    if let Err(err) = store.ping().await {
        warn!(error = %err, "Remote cache tier did not answer PING; continuing local-only");
        return None;
    }
    Some(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_remote(remote: &RemoteSettings) -> Option<Arc<dyn RemoteStore>> {
    if remote.redis_url.is_some() {
        warn!("remote.redis_url is set but redis support was not compiled in; continuing local-only");
    }
    None
}
