//! HTTP and WebSocket surface for livecc.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use axum::routing::post;
use livecc_core::Config;
use livecc_core::RunService;
use tokio::net::TcpListener;
use tracing::info;
use tracing::warn;

mod files;
mod ws;

#[derive(Debug, Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<RunService>,
}

pub fn router(service: Arc<RunService>) -> Router {
    Router::new()
        .route("/terminal", get(ws::batch_socket))
        .route("/pty", get(ws::terminal_socket))
        .route("/api/files/create", post(files::create))
        .route("/api/files/save", post(files::save))
        .route("/api/files/compile", post(files::compile))
        .with_state(AppState { service })
}

/// A bound listener plus the service behind it. Binding and serving are
/// separate so callers can learn the address before accepting connections.
pub struct Server {
    listener: TcpListener,
    service: Arc<RunService>,
}

impl Server {
    pub async fn bind(config: &Config) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.workspace_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create workspace dir {}",
                    config.workspace_dir.display()
                )
            })?;
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        Ok(Self {
            listener,
            service: Arc::new(RunService::new(config)),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(%addr, "livecc server listening");
        axum::serve(self.listener, router(self.service))
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error")
    }
}

/// Binds according to `config` and serves until Ctrl-C.
pub async fn run_main(config: Config) -> anyhow::Result<()> {
    let server = Server::bind(&config).await?;
    server
        .serve_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(err) => {
                    warn!(error = %err, "ctrl-c handler unavailable; serving until killed");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}
