//! Incremental regeneration cache.
//!
//! Serves rendered pages from a bounded in-process store, optionally backed
//! by a shared remote tier, and refreshes stale entries in the background:
//!
//! - **Fresh** entries are returned as-is.
//! - **Stale** entries are returned immediately while one background
//!   regeneration per key refreshes them.
//! - **Expired** or missing entries are rendered synchronously.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_cache_size = 1000
//! default_revalidate_seconds = 3600
//! stale_while_revalidate_seconds = 60
//! remote_key_prefix = "irc:"
//! ```
//!
//! At-most-one regeneration holds per process only; several processes
//! sharing a remote tier may each regenerate the same key.

mod config;
mod coordinator;
mod directives;
mod entry;
mod keys;
mod lock;
mod manager;
mod pending;
#[cfg(feature = "redis")]
mod redis_store;
mod remote;
mod render;
mod stats;
mod store;

pub use config::{CacheConfig, ConfigError, EntryPolicy, PageConfig};
pub use coordinator::{Freshness, RegenerationFailure, RevalidationResult, classify};
pub use directives::{
    RevalidateDirectives, RevalidateWindows, cache_control_header, parse_revalidate_header,
};
pub use entry::{CacheEntry, Clock, ManualClock, SystemClock};
pub use keys::{CacheKey, Pattern, cache_key};
pub use manager::{CacheInfo, CacheManager, CacheManagerBuilder, CacheStatus, PageOutcome};
pub use pending::{PendingRegenerations, RegenerationGuard};
#[cfg(feature = "redis")]
pub use redis_store::RedisRemoteStore;
pub use remote::{MemoryRemoteStore, RemoteError, RemoteStore, RemoteTier};
pub use render::{RenderError, Renderer};
pub use stats::{
    METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_REMOTE_ERROR_TOTAL,
    METRIC_RENDER_MS, METRIC_REVALIDATION_TOTAL, METRIC_STALE_HIT_TOTAL, Stats,
};
pub use store::EntryStore;
