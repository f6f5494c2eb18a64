use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::conversion::broadcaster::ProgressBroadcaster;
use crate::modules::conversion::engine::FfmpegEngine;
use crate::modules::conversion::notifier::{DisabledNotifier, QueueNotifier, StatusNotifier};
use crate::modules::conversion::orchestrator::{Collaborators, JobOrchestrator};
use crate::modules::conversion::repository::VideoRepository;
use crate::state::AppState;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod middleware;
mod modules;
mod routes;
mod state;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting server...");

    let config = AppConfig::new().context("Missing required environment variable")?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    );
    let table = VideoRepository::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    let notifier: Arc<dyn StatusNotifier> = match &config.rabbitmq_url {
        Some(url) => Arc::new(QueueNotifier::new(RabbitMqService::new(url), &config.status_queue)),
        None => {
            warn!("RABBITMQ_URL not set, status notifications disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let (orchestrator, queue) = JobOrchestrator::new(
        Collaborators {
            store: Arc::new(storage),
            table: Arc::new(table),
            engine: Arc::new(FfmpegEngine::new(&config.ffmpeg_path)),
            notifier,
            broadcaster: ProgressBroadcaster::new(config.progress_buffer),
        },
        config.work_dir.clone(),
        config.job_queue_capacity,
        Duration::from_secs(config.job_retention_secs),
    );

    let workers = workers::transcoder::start_transcoder_workers(
        orchestrator.clone(),
        queue,
        config.max_concurrent_jobs,
    );

    let addr = format!("0.0.0.0:{}", config.server_port);
    let state = AppState::new(config, orchestrator.clone());
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Draining queued conversions...");
    orchestrator.close_queue();
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Transcoder worker panicked: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
