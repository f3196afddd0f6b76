//! Face Authentication Service
//!
//! Receives `authenticate` CloudEvents, embeds the submitted face on a fixed
//! pool of OpenVINO workers while the reference embedding is fetched from the
//! store, and answers with the distance-based decision.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use face_authenticator::api::{create_router, AppState};
use face_authenticator::config::Config;
use face_authenticator::engine::WorkerPool;
use face_authenticator::service::{AuthSettings, Authenticator, ReferenceFetcher};
use face_authenticator::transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting Face Authenticator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load(&Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Workers: {} on {}", config.workers.count, config.workers.device);
    info!("  Model dir: {}", config.models.dir.display());
    info!(
        "  Threshold: {} ({})",
        config.authentication.threshold,
        config.authentication.metric.as_str()
    );
    info!("  Deadline: {:?}", config.authentication.deadline());
    info!("  Reference target: {:?}", config.reference.target);
    info!("  Response sink: {:?}", config.reference.sink);
    if config.reference.target.is_none() {
        warn!("No reference target configured (K_SINK); every authentication will fail");
    }

    // Start workers, each loading its own models
    let pool = start_workers(&config).await?;

    let transport = Arc::new(HttpTransport::with_timeout(config.authentication.deadline())?);
    let fetcher = ReferenceFetcher::new(
        transport.clone(),
        config.reference.target.clone(),
        config.reference.source.clone(),
    );
    let authenticator = Authenticator::new(
        pool.clone(),
        fetcher,
        AuthSettings::from(&config.authentication),
    );

    let app_state = Arc::new(AppState {
        authenticator,
        transport,
        sink: config.reference.sink.clone(),
        source: config.reference.source.clone(),
    });
    let router = create_router(app_state, config.server.body_limit_mb * 1024 * 1024);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening for events on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping workers...");
    pool.shutdown();
    let workers = pool.clone();
    tokio::task::spawn_blocking(move || workers.join()).await?;

    info!("Goodbye!");
    Ok(())
}

#[cfg(feature = "openvino")]
async fn start_workers(config: &Config) -> Result<Arc<WorkerPool>> {
    use face_authenticator::engine::OpenVinoRecognizer;

    let models = config.models.clone();
    let device = config.workers.device.clone();
    let count = config.workers.count;

    let pool = tokio::task::spawn_blocking(move || {
        WorkerPool::start(count, move |_| OpenVinoRecognizer::load(&models, &device))
    })
    .await??;
    Ok(Arc::new(pool))
}

#[cfg(not(feature = "openvino"))]
async fn start_workers(_config: &Config) -> Result<Arc<WorkerPool>> {
    anyhow::bail!("built without the `openvino` feature, no recognition engine available")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
    }
}
