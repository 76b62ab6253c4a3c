//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, ConfigError};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "regencache";
const ENV_PREFIX: &str = "REGENCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_ORIGIN: &str = "http://127.0.0.1:8080/";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 300;

/// Command-line arguments for the regencache binary.
#[derive(Debug, Parser)]
#[command(
    name = "regencache",
    version,
    about = "Stale-while-revalidate page cache in front of an origin"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "REGENCACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and operator HTTP services.
    Serve(Box<ServeArgs>),
    /// Resolve and validate configuration, then exit.
    #[command(name = "check-config")]
    CheckConfig(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the operator listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the operator listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Enable or disable the regeneration cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the maximum number of locally cached pages.
    #[arg(long = "cache-max-size", value_name = "COUNT")]
    pub cache_max_size: Option<usize>,

    /// Override the default revalidate window.
    #[arg(long = "cache-default-revalidate-seconds", value_name = "SECONDS")]
    pub cache_default_revalidate_seconds: Option<u64>,

    /// Override the default stale-while-revalidate window.
    #[arg(long = "cache-stale-while-revalidate-seconds", value_name = "SECONDS")]
    pub cache_stale_while_revalidate_seconds: Option<u64>,

    /// Override the remote key prefix.
    #[arg(long = "cache-remote-key-prefix", value_name = "PREFIX")]
    pub cache_remote_key_prefix: Option<String>,

    /// Override the per-render timeout.
    #[arg(long = "cache-render-timeout-ms", value_name = "MS")]
    pub cache_render_timeout_ms: Option<u64>,

    /// Override the Redis URL of the shared tier.
    #[arg(long = "remote-redis-url", value_name = "URL")]
    pub remote_redis_url: Option<String>,

    /// Override the origin that renders pages.
    #[arg(long = "upstream-origin", value_name = "URL")]
    pub upstream_origin: Option<String>,

    /// Override the origin request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

    /// Override the expired-entry prune interval.
    #[arg(long = "housekeeping-prune-interval-seconds", value_name = "SECONDS")]
    pub housekeeping_prune_interval_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub remote: RemoteSettings,
    pub upstream: UpstreamSettings,
    pub housekeeping: HousekeepingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    /// Shared tier is disabled when unset.
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub origin: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HousekeepingSettings {
    pub prune_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Cache(#[from] ConfigError),
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) | Some(Command::CheckConfig(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    remote: RawRemoteSettings,
    upstream: RawUpstreamSettings,
    housekeeping: RawHousekeepingSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(size) = overrides.cache_max_size {
            self.cache.max_cache_size = Some(size);
        }
        if let Some(seconds) = overrides.cache_default_revalidate_seconds {
            self.cache.default_revalidate_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_stale_while_revalidate_seconds {
            self.cache.stale_while_revalidate_seconds = Some(seconds);
        }
        if let Some(prefix) = overrides.cache_remote_key_prefix.as_ref() {
            self.cache.remote_key_prefix = Some(prefix.clone());
        }
        if let Some(ms) = overrides.cache_render_timeout_ms {
            self.cache.render_timeout_ms = Some(ms);
        }
        if let Some(url) = overrides.remote_redis_url.as_ref() {
            self.remote.redis_url = Some(url.clone());
        }
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.housekeeping_prune_interval_seconds {
            self.housekeeping.prune_interval_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            remote,
            upstream,
            housekeeping,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_config(cache)?;
        let remote = build_remote_settings(remote);
        let upstream = build_upstream_settings(upstream)?;
        let housekeeping = build_housekeeping_settings(housekeeping)?;

        Ok(Self {
            server,
            logging,
            cache,
            remote,
            upstream,
            housekeeping,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "public and operator listeners must not share an address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();
    let config = CacheConfig {
        cache_dir: cache.cache_dir.or(defaults.cache_dir),
        default_revalidate_seconds: cache
            .default_revalidate_seconds
            .unwrap_or(defaults.default_revalidate_seconds),
        stale_while_revalidate_seconds: cache
            .stale_while_revalidate_seconds
            .unwrap_or(defaults.stale_while_revalidate_seconds),
        max_cache_size: cache.max_cache_size.unwrap_or(defaults.max_cache_size),
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        remote_key_prefix: cache
            .remote_key_prefix
            .unwrap_or(defaults.remote_key_prefix),
        render_timeout_ms: cache.render_timeout_ms.or(defaults.render_timeout_ms),
    };
    config.validate()?;
    Ok(config)
}

fn build_remote_settings(remote: RawRemoteSettings) -> RemoteSettings {
    let redis_url = remote.redis_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    RemoteSettings { redis_url }
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_origin = upstream
        .origin
        .unwrap_or_else(|| DEFAULT_UPSTREAM_ORIGIN.to_string());
    let origin = Url::parse(raw_origin.trim())
        .map_err(|err| LoadError::invalid("upstream.origin", format!("invalid url: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.origin",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        origin,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_housekeeping_settings(
    housekeeping: RawHousekeepingSettings,
) -> Result<HousekeepingSettings, LoadError> {
    let interval_secs = housekeeping
        .prune_interval_seconds
        .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS);
    if interval_secs == 0 {
        return Err(LoadError::invalid(
            "housekeeping.prune_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(HousekeepingSettings {
        prune_interval: Duration::from_secs(interval_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    cache_dir: Option<PathBuf>,
    default_revalidate_seconds: Option<u64>,
    stale_while_revalidate_seconds: Option<u64>,
    max_cache_size: Option<usize>,
    enabled: Option<bool>,
    remote_key_prefix: Option<String>,
    render_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    origin: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHousekeepingSettings {
    prune_interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
