//! TCP accept loop with the deferred-startup lifecycle: `new()` allocates
//! shared state, `start()` binds the listener, `serve()` accepts
//! connections until shutdown is signalled.
//!
//! This mirrors the split used for the teacher's HTTP/WebSocket listener,
//! minus the axum router and TLS termination -- this protocol has no HTTP
//! surface, just raw newline-delimited TCP.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chat_core::{AppConfig, Registry};
use tokio::net::TcpListener;

use crate::shutdown::ShutdownController;

/// Owns the listener and the shared registry/shutdown state for one server
/// instance.
pub struct ChatServer {
    config: Arc<AppConfig>,
    listener: Option<TcpListener>,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownController>,
}

/// Bound on each connection's outbound channel (SPEC_FULL.md §5): a peer
/// whose reader falls this far behind starts missing best-effort sends
/// rather than growing the server's memory without limit.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

impl ChatServer {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            listener: None,
            registry: Arc::new(Registry::new(OUTBOUND_CHANNEL_CAPACITY)),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port, returning
    /// the actual bound port (useful when the configured port is `0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        tracing::info!(%addr, bound_port = port, "TCP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Accepts connections until `shutdown` resolves, then drains in-flight
    /// connections (SPEC_FULL.md §4.8) before returning.
    ///
    /// # Errors
    ///
    /// Never returns an error itself; the `Result` return type matches the
    /// teacher's lifecycle shape so callers can `?` it uniformly alongside
    /// other startup fallibility.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called first.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self.listener.expect("start() must be called before serve()");
        let registry = self.registry;
        let config = self.config;
        let shutdown_ctrl = self.shutdown;

        shutdown_ctrl.set_ready();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let registry = Arc::clone(&registry);
                            let config = Arc::clone(&config);
                            let shutdown_ctrl = Arc::clone(&shutdown_ctrl);
                            tokio::spawn(async move {
                                crate::handler::handle_connection(stream, addr, registry, config, shutdown_ctrl).await;
                            });
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept connection");
                        }
                    }
                }
                () = &mut shutdown => {
                    tracing::info!("shutdown signal received, no longer accepting new connections");
                    break;
                }
            }
        }

        drain_connections(&registry, &shutdown_ctrl).await;
        Ok(())
    }
}

async fn drain_connections(registry: &Registry, shutdown_ctrl: &ShutdownController) {
    shutdown_ctrl.trigger_shutdown();

    let connected = registry.stats().connected_clients;
    if connected > 0 {
        tracing::info!(count = connected, "draining connections");
        registry.close_all();
    }

    if shutdown_ctrl.wait_for_drain(Duration::from_secs(30)).await {
        tracing::info!("all connections drained successfully");
    } else {
        tracing::warn!("drain timeout expired with in-flight connections remaining");
    }
}
