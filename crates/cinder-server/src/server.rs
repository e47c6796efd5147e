//! Websocket listener and its lifecycle.
//!
//! [`WebsocketServer::run`] binds the listener and drives two tasks: the
//! axum serve loop, and a watcher that waits for either external
//! cancellation or the shared [`ShutdownSignal`]. Whichever fires first,
//! the watcher closes the signal (so every connection and update task
//! drains) and tells the listener to stop accepting. `run` returns once
//! both tasks are done.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use cinder_core::{ClientId, CommandSet, ShardManager, WorkerId};
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::{CinderConfig, ConfigError};
use crate::connection;
use crate::shutdown::ShutdownSignal;
use crate::transcode::Transcoder;
use crate::write::WritePolicy;

/// Prefix of every connection's worker identity.
pub const WORKER_NAME: &str = "wsServer";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Serve(#[source] io::Error),

    #[error("server stopped by ABORT")]
    Aborted,

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// State shared by every connection.
#[derive(Debug)]
pub struct ServerContext {
    pub manager: ShardManager,
    pub transcoder: Transcoder,
    pub unimplemented: CommandSet,
    pub write_policy: WritePolicy,
    pub shutdown: ShutdownSignal,
    next_worker: AtomicU64,
    next_client: AtomicU32,
}

impl ServerContext {
    pub fn new(manager: ShardManager, config: &CinderConfig, shutdown: ShutdownSignal) -> Self {
        // the transcoder must classify exactly like the engine encodes
        let transcoder = Transcoder::new(manager.migrated().clone());
        Self {
            manager,
            transcoder,
            unimplemented: config.unimplemented(),
            write_policy: config.write_policy(),
            shutdown,
            next_worker: AtomicU64::new(1),
            next_client: AtomicU32::new(1),
        }
    }

    pub fn next_worker_id(&self) -> WorkerId {
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
        WorkerId::new(format!("{WORKER_NAME}:{n}"))
    }

    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.next_client.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct WebsocketServer {
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    metrics: Option<PrometheusHandle>,
}

impl WebsocketServer {
    pub fn new(
        config: &CinderConfig,
        manager: ShardManager,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ConfigError> {
        let addr = config.bind_addr()?;
        let ctx = ServerContext::new(manager, config, ShutdownSignal::new());
        Ok(Self {
            addr,
            ctx: Arc::new(ctx),
            metrics,
        })
    }

    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/", get(ws_handler))
            .route("/health", get(health))
            .with_state(Arc::clone(&self.ctx));

        match self.metrics.clone() {
            Some(handle) => router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            ),
            None => router,
        }
    }

    /// Binds and serves until `cancel` resolves or a client sends ABORT.
    ///
    /// Returns `Ok(())` after external cancellation, [`ServerError::Aborted`]
    /// after an ABORT, or the listener's own error.
    pub async fn run<F>(self, cancel: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        self.serve(listener, cancel).await
    }

    /// Like [`run`](Self::run) on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, cancel: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match listener.local_addr() {
            Ok(addr) => info!("websocket server listening on {addr}"),
            Err(_) => info!("websocket server listening"),
        }

        let shutdown = self.ctx.shutdown.clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let watcher = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let external = tokio::select! {
                    _ = cancel => true,
                    _ = shutdown.closed() => false,
                };
                if external {
                    info!("shutdown requested, draining connections");
                } else {
                    info!("ABORT received, draining connections");
                }
                shutdown.close();
                let _ = stop_tx.send(());
                external
            }
        });

        let app = self.router();
        let serving = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await;
            if let Err(ref e) = result {
                error!("websocket listener failed: {e}");
                // unblock the watcher
                shutdown.close();
            }
            result
        });

        let (external, served) = tokio::join!(watcher, serving);
        served?.map_err(ServerError::Serve)?;
        if external? {
            Ok(())
        } else {
            Err(ServerError::Aborted)
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<Arc<ServerContext>>) -> Response {
    if ctx.shutdown.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    ws.on_upgrade(move |socket| connection::handle_socket(socket, ctx))
}

async fn health() -> &'static str {
    "ok"
}
