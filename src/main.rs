use std::{process, time::Duration};

use regencache::{
    application::{context::ApplicationContext, error::AppError},
    cache::CacheManager,
    config,
    infra::{error::InfraError, http, telemetry, upstream::UpstreamRenderer},
};
use tokio::{sync::watch, task::JoinHandle, try_join};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => {
            run_check_config(&settings);
            Ok(())
        }
    }
}

fn run_check_config(settings: &config::Settings) {
    info!(
        target = "regencache::check_config",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        origin = %settings.upstream.origin,
        cache_enabled = settings.cache.enabled,
        max_cache_size = settings.cache.max_cache_size,
        default_revalidate_seconds = settings.cache.default_revalidate_seconds,
        stale_while_revalidate_seconds = settings.cache.stale_while_revalidate_seconds,
        remote_tier = settings.remote.redis_url.is_some(),
        prune_interval_secs = settings.housekeeping.prune_interval.as_secs(),
        "Configuration is valid"
    );
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = ApplicationContext::build(&settings).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let housekeeping = spawn_housekeeping(
        app.cache.clone(),
        settings.housekeeping.prune_interval,
        shutdown_rx.clone(),
    );
    let signal = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let result = serve_http(&settings, &app, shutdown_rx).await;

    signal.abort();
    let _ = signal.await;
    housekeeping.abort();
    let _ = housekeeping.await;

    drain_regenerations(&app.cache, settings.server.graceful_shutdown).await;
    result
}

/// Periodically drop entries that can no longer be served.
fn spawn_housekeeping(
    cache: CacheManager<UpstreamRenderer>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = cache.prune_expired();
                    debug!(target = "regencache::housekeeping", removed, "prune pass finished");
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn wait_for_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn drain_regenerations(cache: &CacheManager<UpstreamRenderer>, limit: Duration) {
    let pending = cache.pending_count();
    if pending == 0 {
        return;
    }
    info!(pending, "Waiting for in-flight regenerations");
    if tokio::time::timeout(limit, cache.wait_idle()).await.is_err() {
        warn!(
            pending = cache.pending_count(),
            "Regenerations still running at shutdown; abandoning them"
        );
    }
}

async fn serve_http(
    settings: &config::Settings,
    app: &ApplicationContext,
    shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let public_router = http::build_public_router(app.http_state());
    let admin_router = http::build_admin_router(app.http_state());

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "Listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown));

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
