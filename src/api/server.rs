//! HTTP server assembly

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{handlers, websocket};
use crate::compile::{CompilationPipeline, Muxer};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::session::SessionRegistry;

/// Shared state behind every handler
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub pipeline: Arc<CompilationPipeline>,
}

impl AppState {
    pub fn new(config: ServerConfig, muxer: Arc<dyn Muxer>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(config.clone()));
        let pipeline = Arc::new(CompilationPipeline::new(registry.clone(), muxer));
        Self {
            config,
            registry,
            pipeline,
        }
    }
}

/// Web server for stream ingest and session management
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Build the router with CORS and request tracing applied
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/ws/:channel", get(websocket::stream_upgrade))
            .route("/api/sessions", get(handlers::list_sessions))
            .route(
                "/api/sessions/:id",
                get(handlers::get_session).delete(handlers::delete_session),
            )
            .route("/api/sessions/:id/chunks/:channel", get(handlers::get_chunks))
            .route("/api/sessions/:id/compile", post(handlers::compile_session))
            .route("/api/sessions/:id/download", get(handlers::download))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer(&self.state.config.allowed_origins)),
            )
            .with_state(self.state.clone())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.state.config.bind_address, self.state.config.port);
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {}: {}", addr, e)))?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve until the process ends
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Web server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
