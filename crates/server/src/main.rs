//! ecolearn-sync entry point.
//!
//! Mounts the public climate-action feed and the impact widget against the
//! configured store and logs every re-render and notice until shutdown.

use std::sync::Arc;

use anyhow::Context;
use ecolearn_common::{Config, LogFormat, StoreBackend};
use ecolearn_core::{
    ImpactStats, LiveView, MemoryStore, Notice, NoticeLevel, PostView, StoreHandle, SyncContext,
    Table,
};
use ecolearn_db::{PgStore, RedisRelay};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ecolearn=debug,sea_orm=warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Build the configured store. The relay is returned so it can be shut down.
async fn connect_store(config: &Config) -> anyhow::Result<(StoreHandle, Option<Arc<RedisRelay>>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok((Arc::new(MemoryStore::new()), None))
        }
        StoreBackend::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("store.backend = \"postgres\" requires a [database] section")?;

            let db = ecolearn_db::init(database).await?;
            info!("Connected to database");

            info!("Running database migrations...");
            ecolearn_db::migrate(&db).await?;
            info!("Migrations completed");

            let mut store = PgStore::new(Arc::new(db));
            let relay = match &config.redis {
                Some(redis) => {
                    let relay = Arc::new(RedisRelay::connect(redis).await?);
                    relay.start(store.hub()).await?;
                    store = store.with_relay(relay.clone());
                    Some(relay)
                }
                None => {
                    info!("No Redis configured, inserts stay process-local");
                    None
                }
            };
            Ok((Arc::new(store), relay))
        }
    }
}

fn log_feed(feed: &LiveView<PostView>, render: u64) {
    let posts = feed.snapshot();
    info!(
        render,
        posts = posts.len(),
        newest = ?posts.first().map(|view| view.post.id.as_str()),
        "Climate action feed rendered"
    );
}

fn log_impact(widget: &LiveView<ImpactStats>, render: u64) {
    if let Some(stats) = widget.snapshot().first() {
        info!(
            render,
            profiles = stats.profiles,
            climate_actions = stats.climate_actions,
            challenge_completions = stats.challenge_completions,
            "Impact widget rendered"
        );
    }
}

fn log_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Info => info!(code = notice.code, "{}", notice.message),
        NoticeLevel::Warning => warn!(code = notice.code, "{}", notice.message),
        NoticeLevel::Error => error!(code = notice.code, "{}", notice.message),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;
    init_tracing(config.logging.format);

    info!("Starting ecolearn-sync...");

    let (store, relay) = connect_store(&config).await?;
    let context = SyncContext::new(store, config.sync.clone());
    let mut notices = context.notifier().subscribe();

    let feed = context.public_feed(Table::ClimateAction).await?;
    let impact = context.impact_widget().await?;
    log_feed(&feed, 0);
    log_impact(&impact, 0);

    let mut feed_renders = feed.watch_renders();
    let mut impact_renders = impact.watch_renders();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Ok(()) = feed_renders.changed() => {
                let render = *feed_renders.borrow_and_update();
                log_feed(&feed, render);
            }
            Ok(()) = impact_renders.changed() => {
                let render = *impact_renders.borrow_and_update();
                log_impact(&impact, render);
            }
            notice = notices.recv() => match notice {
                Ok(notice) => log_notice(&notice),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notice consumer lagged"),
                Err(RecvError::Closed) => {}
            },
        }
    }

    feed.unmount().await;
    impact.unmount().await;
    if let Some(relay) = relay {
        if let Err(e) = relay.shutdown().await {
            e.log();
        }
    }

    info!("Shutdown complete");
    Ok(())
}
