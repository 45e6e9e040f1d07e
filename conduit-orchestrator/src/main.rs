use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conduit_orchestrator::config::OrchestratorConfig;
use conduit_orchestrator::poller::StatusPoller;
use conduit_orchestrator::provider::ProviderRegistry;
use conduit_orchestrator::provider::gitlab::GitLabFactory;
use conduit_orchestrator::repository::Repositories;
use conduit_orchestrator::service::{ChannelEventSink, PipelineService};
use conduit_orchestrator::{api, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conduit Orchestrator...");

    let config = OrchestratorConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let repos = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Repositories::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Repositories::in_memory()
        }
    };

    let registry = ProviderRegistry::new().with_factory(Arc::new(GitLabFactory));
    let events = Arc::new(ChannelEventSink::spawn_logging(1024));

    let service = PipelineService::new(
        repos,
        registry,
        events,
        config.service_settings(),
        config.log_stream_config(),
    );

    let poller = StatusPoller::new(
        service.clone(),
        config.poll_interval,
        config.max_parallel_syncs,
    );
    let poller_handle = poller.spawn();

    // Build router with all API endpoints
    let app = api::create_router(service);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    poller_handle.abort();
    tracing::info!("Conduit Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
