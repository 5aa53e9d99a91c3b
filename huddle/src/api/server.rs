//! API server setup and configuration.

use axum::Router;
use axum::extract::Request;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::api::routes;
use crate::config::{env_bool, env_parse, env_string};
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::notification::NotificationService;
use crate::scheduler::CampaignService;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8787;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Load from `API_BIND_ADDRESS` and `API_PORT`, falling back to defaults.
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_string("API_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: env_parse("API_PORT", defaults.port),
            enable_cors: env_bool("API_CORS_ENABLED", defaults.enable_cors),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub notification_service: Arc<NotificationService>,
    pub campaign_service: Arc<CampaignService>,
    /// Logging configuration for dynamic log level changes
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(
        notification_service: Arc<NotificationService>,
        campaign_service: Arc<CampaignService>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            notification_service,
            campaign_service,
            logging_config: None,
        }
    }

    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn with_state(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone())
            .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        // No spans for health checks or the docs UI.
        let trace = TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                let path = req.uri().path();
                if path.starts_with("/api/health") || path.starts_with("/api/docs") {
                    Span::none()
                } else {
                    tracing::info_span!("http", method = %req.method(), path = %path)
                }
            })
            .on_response(|res: &Response, latency: Duration, span: &Span| {
                if !span.is_disabled() {
                    tracing::info!(
                        parent: span,
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "request finished"
                    );
                }
            });

        router.layer(trace)
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(%addr, "Notification API listening");

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("Notification API draining connections");
            })
            .await?;

        Ok(())
    }
}
