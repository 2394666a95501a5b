//! HTTP surface of the node.

mod error;
mod handlers;

pub use error::{ApiError, ApiErrorDetail, ApiErrorResponse, ApiErrorType};
pub use handlers::source_metadata;

use crate::constants::server::MAX_IMAGE_BYTES;
use crate::engine::{DecisionEngine, WorkerPool};
use crate::error::{Error, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Decision engine.
    pub engine: Arc<DecisionEngine>,
    /// Worker pool in front of the engine.
    pub pool: Arc<WorkerPool>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/v1/image-queries", post(handlers::submit_image_query))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(addr: &str, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ServerBind {
            addr: addr.to_string(),
            source: e,
        })?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
