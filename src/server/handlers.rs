//! Request handlers.

use super::AppState;
use super::error::ApiError;
use crate::constants::server::SOURCE_HEADER_PREFIX;
use crate::engine::{EngineStatus, HumanReview, ImageQuery, QueryOutcome};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Query string of `POST /v1/image-queries`.
#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    /// Target detector.
    pub detector_id: Option<String>,
    /// Answer with 202 and let the cloud decide.
    #[serde(default)]
    pub want_async: bool,
    /// Human review override.
    #[serde(default)]
    pub human_review: HumanReview,
}

/// Submit an image for a decision.
pub async fn submit_image_query(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let detector_id = params
        .detector_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing detector_id query parameter"))?;
    if body.is_empty() {
        return Err(ApiError::bad_request("request body must contain an image"));
    }

    let query = ImageQuery::new(detector_id, body)
        .with_async(params.want_async)
        .with_human_review(params.human_review)
        .with_metadata(source_metadata(&headers));

    match state.pool.submit(query).await? {
        QueryOutcome::Answered(response) => Ok((StatusCode::OK, Json(response)).into_response()),
        QueryOutcome::Accepted(accepted) => {
            Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
        }
    }
}

/// `X-Source-*` headers keyed by the rest of the header name.
pub fn source_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(SOURCE_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Liveness body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Liveness probe. Always 200 while the process serves requests.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness body.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Always `ready`.
    pub status: &'static str,
    /// Engine summary.
    pub engine: EngineStatus,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Free queue slots.
    pub queue_available: usize,
}

/// Readiness probe with cache and registry summary.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    Json(ReadyResponse {
        status: "ready",
        engine: state.engine.status(),
        queue_capacity: state.pool.capacity(),
        queue_available: state.pool.available(),
    })
}
