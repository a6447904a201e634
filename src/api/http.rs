//! HTTP Control API
//!
//! Small REST surface for status queries and operator-triggered
//! re-discovery.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{FailoverOrchestrator, ResolvedEndpoint};

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<FailoverOrchestrator>,
    pub started_at: std::time::Instant,
}

/// HTTP control API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: ApiConfig, orchestrator: Arc<FailoverOrchestrator>) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                orchestrator,
                started_at: std::time::Instant::now(),
            }),
        }
    }

    /// Create the router
    fn create_router(&self, state: Arc<AppState>) -> Router {
        let mut router = Router::new()
            .route("/status", get(handle_status))
            .route("/endpoint", get(handle_endpoint))
            .route("/health", get(handle_health))
            .route("/rediscover", post(handle_rediscover))
            .with_state(state);

        if self.config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the HTTP server; runs until the process exits
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP control API disabled");
            return Ok(());
        }

        let app = self.create_router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP control API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {e}")))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub address: IpAddr,
    pub class: String,
    pub priority: u64,
    /// leader | follower | unresolved
    pub role: String,
    pub endpoint: Option<ResolvedEndpoint>,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub resolved: bool,
}

/// Rediscover response
#[derive(Debug, Serialize)]
pub struct RediscoverResponse {
    pub accepted: bool,
}

// ============ Handlers ============

fn role_of(endpoint: Option<&ResolvedEndpoint>) -> &'static str {
    match endpoint {
        Some(ep) if ep.address.is_loopback() => "leader",
        Some(_) => "follower",
        None => "unresolved",
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let identity = state.orchestrator.identity();
    let endpoint = *state.orchestrator.endpoint().borrow();

    Json(StatusResponse {
        address: IpAddr::V4(identity.address),
        class: identity.class.to_string(),
        priority: identity.priority,
        role: role_of(endpoint.as_ref()).to_string(),
        endpoint,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let endpoint = *state.orchestrator.endpoint().borrow();
    match endpoint {
        Some(endpoint) => (StatusCode::OK, Json(Some(endpoint))),
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(None)),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let resolved = state.orchestrator.endpoint().borrow().is_some();
    Json(HealthResponse {
        healthy: true,
        resolved,
    })
}

async fn handle_rediscover(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.rediscover().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(RediscoverResponse { accepted: true })),
        Err(e) => {
            tracing::error!("re-discovery failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RediscoverResponse { accepted: false }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_role_classification() {
        use crate::discovery::Transport;

        assert_eq!(role_of(None), "unresolved");

        let local = ResolvedEndpoint {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3001,
            transport: Transport::Http,
        };
        assert_eq!(role_of(Some(&local)), "leader");

        let remote = ResolvedEndpoint {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77)),
            port: 3001,
            transport: Transport::Https,
        };
        assert_eq!(role_of(Some(&remote)), "follower");
    }
}
