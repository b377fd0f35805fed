/// Aurora Gambit - ATProto AppView for correspondence chess
///
/// Binary entry point: loads configuration, brings up the SQLite cache,
/// and runs the feed ingesters until ctrl-c.
use aurora_gambit::config::AppConfig;
use aurora_gambit::context::AppContext;
use aurora_gambit::ingest::firehose::FirehoseIngester;
use aurora_gambit::ingest::jetstream::JetstreamIngester;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("aurora_gambit={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner();

    // Create application context
    let ctx = AppContext::new(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut feeds = Vec::new();

    if ctx.config.feeds.firehose_enabled {
        let mut ingester = FirehoseIngester::new(
            &ctx.config.feeds,
            ctx.applier.clone(),
            ctx.firehose_cursor.clone(),
            shutdown_rx.clone(),
        );
        feeds.push(tokio::spawn(async move {
            if let Err(e) = ingester.run().await {
                error!(error = %e, "firehose ingester exited with error");
            }
        }));
    }

    if ctx.config.feeds.jetstream_enabled {
        let mut ingester = JetstreamIngester::new(
            &ctx.config.feeds,
            ctx.applier.clone(),
            ctx.jetstream_cursor.clone(),
            shutdown_rx.clone(),
        );
        feeds.push(tokio::spawn(async move {
            // Jetstream does not self-reconnect; the firehose replay
            // covers anything missed after it closes
            if let Err(e) = ingester.run().await {
                error!(error = %e, "jetstream subscription exited with error");
            }
        }));
    }

    info!(
        firehose = ctx.config.feeds.firehose_enabled,
        jetstream = ctx.config.feeds.jetstream_enabled,
        "ingestion running, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining feeds");

    let _ = shutdown_tx.send(true);
    for feed in feeds {
        let _ = feed.await;
    }

    info!("shutdown complete");
    Ok(())
}

fn print_banner() {
    let title = format!("Aurora Gambit v{}", env!("CARGO_PKG_VERSION"));
    println!("╔════════════════════════════════════════════╗");
    println!("║  {:<42}║", title);
    println!("║  {:<42}║", "ATProto Correspondence Chess AppView");
    println!("╚════════════════════════════════════════════╝");
}
