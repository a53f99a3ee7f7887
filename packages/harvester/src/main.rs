// Main entry point for the harvester service.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester::http::{router, AppState};
use harvester::admission::AdmissionQueue;
use harvester::jobs::{HarvestWorker, PostgresJobSource, WorkerConfig};
use harvester::scheduler::start_sweeper;
use harvester::site::{PortalPort, SitePort};
use harvester::storage::{PostgresQuestionStore, QuestionStore};
use harvester::vault::Base64Vault;
use harvester::{Config, ExamFilter, Harvester, JobSource, RetryExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting exam harvester");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Connect to database
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database ready");

    // Wire up the engine
    let source: Arc<dyn JobSource> = Arc::new(PostgresJobSource::new(pool.clone()));
    let store: Arc<dyn QuestionStore> = Arc::new(PostgresQuestionStore::new(pool.clone()));
    let port: Arc<dyn SitePort> = Arc::new(
        PortalPort::new(&config.portal_base_url).context("Invalid PORTAL_BASE_URL")?,
    );
    let harvester = Arc::new(Harvester::new(
        port,
        store,
        RetryExecutor::new(3, config.retry_base_delay),
        ExamFilter::new(config.exam_allow.clone(), config.exam_deny.clone()),
    ));

    let shutdown = CancellationToken::new();

    // Background worker for queued jobs
    let worker = HarvestWorker::new(
        source.clone(),
        harvester.clone(),
        Arc::new(Base64Vault),
        WorkerConfig {
            poll_interval: config.worker_poll_interval,
            status_poll_interval: config.status_poll_interval,
        },
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.child_token()));

    // Crash-recovery sweep
    let _scheduler = start_sweeper(source.clone(), &config.sweep_schedule, config.stuck_after)
        .await
        .context("Failed to start the stuck-job sweeper")?;

    // HTTP surface
    let state = AppState {
        harvester,
        admissions: AdmissionQueue::new(config.admission_limit),
    };
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = worker_handle.await;

    Ok(())
}
