//! sceneforge - worker process: task processor plus HTTP/SSE surface.

mod config;
mod error;
mod http;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sceneforge_core::agents::PIPELINE_AGENTS;
use sceneforge_core::app::AppBuilder;
use sceneforge_core::impls::{InMemoryObjectStore, LocalObjectStore, NodeSandbox, StructuralSandbox};
use sceneforge_core::ports::{ObjectStore, Sandbox};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// How long open streams may keep the server alive after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    match run(config).await {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "sceneforge stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let node = NodeSandbox::new(&config.node_bin).with_timeout(config.sandbox_timeout());
    let sandbox: Arc<dyn Sandbox> = if node.probe().await {
        info!(node = ?node.program(), "executing generated components with node");
        Arc::new(node)
    } else {
        warn!(node = %config.node_bin.display(), "node not available; falling back to structural checks only");
        Arc::new(StructuralSandbox)
    };

    let objects: Arc<dyn ObjectStore> = match &config.storage_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating storage dir {}", dir.display()))?;
            info!(dir = %dir.display(), base_url = %config.public_base_url, "storing components on disk");
            Arc::new(LocalObjectStore::new(dir, config.public_base_url.as_str()))
        }
        None => {
            warn!("SCENEFORGE_STORAGE_DIR not set; compiled components are kept in memory");
            Arc::new(InMemoryObjectStore::new())
        }
    };

    let app = Arc::new(
        AppBuilder::new()
            .sandbox(sandbox)
            .object_store(objects)
            .retry_policy(config.retry_policy())
            .expect_agents(PIPELINE_AGENTS)
            .build()
            .context("wiring the application")?,
    );
    let processor = app.init(config.processor());
    let gateway = app.gateway(config.gateway());
    let state = http::AppState::new(Arc::clone(&app), gateway, Some(processor.heartbeat()));

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(addr = %config.bind, "listening");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, http::router(state))
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = stop_tx.send(());

    let served = match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined.context("server task").and_then(|r| r.context("server")),
        Err(_) => {
            warn!(grace = ?SHUTDOWN_GRACE, "open connections did not finish in time");
            Ok(())
        }
    };
    let stopped = processor.shutdown().await.context("stopping the task processor");
    served.and(stopped)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
