use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

mod catalog;
mod chunker;
mod config;
mod embedder;
mod error;
mod events;
mod indexer;
mod maintenance;
mod orchestrator;
mod progress;
mod reconciler;
mod routes;
mod server;
mod session;
mod state;
mod vector_gateway;

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::var("MOVESIA_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("movesia-indexer").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".movesia-data/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "movesia-indexer.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "movesia_indexer=info,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "movesia_indexer::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    routes::health::init_start_time();

    let config = Arc::new(config::AppConfig::from_env());
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        vector_base_url = %config.vector_base_url,
        vector_collection = %config.vector_collection,
        embedding_dim = config.embedding_dim,
        log_dir = %log_dir,
        "movesia-indexer starting"
    );

    // IMPORTANT: bind the listener and start serving before the slow Orchestrator
    // bring-up (catalog open, vector backend readiness probe) completes, so /health
    // responds immediately.
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("movesia-indexer listening on {}", addr);

    routes::health::init_shutdown_notify();

    let candidate_source: Box<dyn session::RootCandidateSource> =
        Box::new(session::StaticRootCandidates(Vec::new()));
    let orchestrator = orchestrator::Orchestrator::start_once(config, candidate_source).await?;
    let app_state = state::AppState { orchestrator };
    let app = server::create_app(app_state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("movesia-indexer shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c().await.expect("failed to install secondary Ctrl+C handler");
    };

    let http_shutdown = routes::health::wait_for_shutdown();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, initiating shutdown"); },
        _ = terminate => { info!("Received terminate signal, initiating shutdown"); },
        _ = http_shutdown => { info!("Received HTTP shutdown request, initiating shutdown"); },
    }

    info!("Shutdown signal received");
}
