use std::sync::Arc;

use anyhow::Context;

use outreach_engine::admin::{AppState, admin_routes};
use outreach_engine::config::AppConfig;
use outreach_engine::replies::{ReplyIngestor, spawn_reply_poller};
use outreach_engine::sequence::{SequenceEngine, spawn_ticker};
use outreach_engine::store::{Database, LibSqlBackend};
use outreach_engine::templates::seed_default_templates;
use outreach_engine::transport::build_transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("📬 Outreach Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Admin API: http://0.0.0.0:{}", config.http_port);
    eprintln!(
        "   Scheduler: every {}s, default delay {} days",
        config.sequence.tick_interval.as_secs(),
        config.sequence.default_delay_days
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    seed_default_templates(db.as_ref()).await?;

    // ── Engine ───────────────────────────────────────────────────────────
    let transport = build_transport(&config.transport, config.sequence.send_timeout)?;
    let engine = Arc::new(SequenceEngine::new(
        config.sequence.clone(),
        Arc::clone(&db),
        transport,
    ));
    let replies = Arc::new(ReplyIngestor::new(Arc::clone(&engine)));

    let _ticker = spawn_ticker(Arc::clone(&engine), config.sequence.tick_interval);

    match config.imap.clone() {
        Some(imap) => {
            eprintln!("   Reply poller: {} (every {}s)", imap.host, imap.poll_interval.as_secs());
            let _poller = spawn_reply_poller(imap, Arc::clone(&replies));
        }
        None => eprintln!("   Reply poller: disabled (IMAP_HOST not set)"),
    }

    // Catch up on anything that came due while the process was down.
    if let Err(e) = engine.run_due().await {
        tracing::error!("Startup sequence run failed: {e}");
    }

    // ── Admin API ────────────────────────────────────────────────────────
    let app = admin_routes(AppState {
        engine,
        replies,
        test_recipient: config.test_recipient.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Admin API started");
    axum::serve(listener, app).await?;

    Ok(())
}
