//! Relay Lifecycle
//!
//! The orchestrator consumes the relay only through this contract; the
//! relay's session logic lives elsewhere. `LocalRelay` is the concrete
//! lifecycle the binary wires in: it binds the relay port and serves the
//! identification document consumers probe for.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::discovery::{IdentityDocument, RelayMode};
use crate::error::{Error, Result};

/// Lifecycle contract of the relay server
#[async_trait]
pub trait RelayLifecycle: Send + Sync {
    /// Start serving; returns the bound address. Idempotent: a second call
    /// while running returns the existing address.
    async fn start(&self) -> Result<SocketAddr>;

    /// Stop serving and release the port before returning. Idempotent and
    /// safe to call when not running.
    async fn stop(&self) -> Result<()>;
}

struct RunningRelay {
    addr: SocketAddr,
    server: JoinHandle<()>,
}

/// Minimal local relay host answering identification probes
pub struct LocalRelay {
    port: u16,
    mode: RelayMode,
    running: Mutex<Option<RunningRelay>>,
}

impl LocalRelay {
    pub fn new(port: u16, mode: RelayMode) -> Self {
        Self {
            port,
            mode,
            running: Mutex::new(None),
        }
    }

    fn router(&self) -> Router {
        let document = Arc::new(IdentityDocument::local(self.mode));
        Router::new()
            .route("/api/relay-discovery", get(handle_identify))
            .with_state(document)
    }
}

async fn handle_identify(State(document): State<Arc<IdentityDocument>>) -> Json<IdentityDocument> {
    Json(document.as_ref().clone())
}

#[async_trait]
impl RelayLifecycle for LocalRelay {
    async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(relay) = running.as_ref() {
            return Ok(relay.addr);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| Error::Relay(format!("failed to bind relay port {}: {e}", self.port)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Relay(format!("relay listener has no address: {e}")))?;

        let app = self.router();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!("local relay server exited: {e}");
            }
        });

        tracing::info!("local relay listening on {addr}");
        *running = Some(RunningRelay { addr, server });
        Ok(addr)
    }

    async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(relay) = running.take() {
            relay.server.abort();
            // Wait for the task to wind down so the port is free on return
            let _ = relay.server.await;
            tracing::info!("local relay stopped");
        }
        Ok(())
    }
}
