//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::transcript::TranscriptService;

use super::middleware::{cors_layer, RequestLogging};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TranscriptService>,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<TranscriptService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ServerConfig, service: Arc<TranscriptService>) -> Self {
        Self {
            config,
            state: AppState::new(service),
        }
    }

    /// Build the router with its middleware stack
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(axum::middleware::from_fn(RequestLogging::log_request))
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` flips
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| RelayError::InvalidConfig(format!("invalid server address: {}", e)))?;

        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| RelayError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::service::tests::FakeFetcher;
    use crate::transcript::service::FetchMode;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_serves_root_with_cors() {
        let service = TranscriptService::new(FakeFetcher::new(|_, _| Ok(())), FetchMode::Direct, "en");
        let server = ApiServer::new(ServerConfig::default(), Arc::new(service));

        let response = server
            .build_router()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("Origin", "https://client.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_run_rejects_bad_address() {
        let service = TranscriptService::new(FakeFetcher::new(|_, _| Ok(())), FetchMode::Direct, "en");
        let config = ServerConfig {
            host: "not an address".to_string(),
            request_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let server = ApiServer::new(config, Arc::new(service));
        let (_tx, rx) = watch::channel(false);

        assert!(matches!(
            server.run(rx).await,
            Err(RelayError::InvalidConfig(_))
        ));
    }
}
