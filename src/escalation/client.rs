//! HTTP client for the cloud escalation service.

use super::EscalationReason;
use super::retry::RetryPolicy;
use crate::config::CloudConfig;
use crate::constants::cloud;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;
use tracing::debug;

/// Why an escalation call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloudError {
    /// The service did not answer in time.
    #[error("cloud request timed out after {attempts} attempt(s)")]
    Timeout {
        /// Attempts made, including retries.
        attempts: u32,
    },

    /// The connection could not be established.
    #[error("could not reach cloud service after {attempts} attempt(s): {reason}")]
    Connect {
        /// Attempts made, including retries.
        attempts: u32,
        /// Transport error description.
        reason: String,
    },

    /// The service answered with a 5xx status.
    #[error("cloud service error (HTTP {status})")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The service refused the request with a non-5xx error status.
    #[error("cloud service rejected escalation (HTTP {status})")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The response body was not a valid acknowledgement.
    #[error("invalid cloud response: {reason}")]
    Decode {
        /// Parse error description.
        reason: String,
    },

    /// No cloud endpoint is configured on this node.
    #[error("no cloud endpoint configured")]
    NotConfigured,
}

impl CloudError {
    /// Timeouts and connection failures are worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connect { .. })
    }

    fn with_attempts(self, attempts: u32) -> Self {
        match self {
            Self::Timeout { .. } => Self::Timeout { attempts },
            Self::Connect { reason, .. } => Self::Connect { attempts, reason },
            other => other,
        }
    }
}

/// Local answer attached to an escalation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalResult {
    /// Predicted label.
    pub label: String,
    /// Combined confidence.
    pub confidence: f32,
    /// Whether the out-of-domain model flagged the input.
    pub out_of_domain: bool,
}

/// Body of `POST /v1/escalations`.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationRequest {
    /// Image query identifier.
    pub query_id: String,
    /// Detector that produced the query.
    pub detector_id: String,
    /// Raw image bytes, base64 on the wire.
    #[serde(serialize_with = "serialize_base64")]
    pub image: Bytes,
    /// Local answer, absent when local inference was skipped.
    pub local_result: Option<LocalResult>,
    /// Why the query is escalated.
    pub reason: EscalationReason,
    /// How long the cloud may take to answer.
    pub patience_time_secs: f64,
}

fn serialize_base64<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Answer produced by the cloud for an escalated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAnswer {
    /// Label decided by the cloud.
    pub label: String,
    /// Confidence of the cloud decision.
    pub confidence: f32,
}

/// Response to an escalation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EscalationAck {
    /// Whether the service took the escalation.
    pub accepted: bool,
    /// Identifier assigned by the service.
    #[serde(default)]
    pub escalation_id: Option<String>,
    /// Answer, when the service produced one synchronously.
    #[serde(default)]
    pub result: Option<CloudAnswer>,
}

/// Something that can forward queries to the cloud.
#[async_trait]
pub trait CloudEscalator: Send + Sync {
    /// Submit one escalation. Never panics; all failures are a [`CloudError`].
    async fn escalate(&self, request: &EscalationRequest) -> Result<EscalationAck, CloudError>;
}

/// Escalator for nodes without a cloud endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineEscalator;

#[async_trait]
impl CloudEscalator for OfflineEscalator {
    async fn escalate(&self, _request: &EscalationRequest) -> Result<EscalationAck, CloudError> {
        Err(CloudError::NotConfigured)
    }
}

/// reqwest-backed escalation client.
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    client: Client,
    url: String,
    api_token: Option<String>,
    node: String,
    retry: RetryPolicy,
}

impl HttpCloudClient {
    /// Build a client for `endpoint`.
    pub fn new(
        endpoint: &str,
        api_token: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
        retry: RetryPolicy,
    ) -> crate::Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| crate::Error::Internal {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), cloud::ESCALATIONS_PATH),
            api_token,
            node: hostname::get().map_or_else(
                |_| "unknown".to_string(),
                |h| h.to_string_lossy().into_owned(),
            ),
            retry,
        })
    }

    /// Build from node configuration. Returns `None` when no endpoint is set.
    pub fn from_config(config: &CloudConfig) -> crate::Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };
        let retry = RetryPolicy::exponential(
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(cloud::MAX_BACKOFF_MS),
        );
        Self::new(
            endpoint,
            config.api_token.clone(),
            Duration::from_millis(config.request_timeout_ms),
            Duration::from_millis(config.connect_timeout_ms),
            retry,
        )
        .map(Some)
    }

    /// Escalation URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn attempt(&self, request: &EscalationRequest) -> Result<EscalationAck, CloudError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(cloud::EDGE_NODE_HEADER, &self.node)
            .json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if status.is_server_error() {
            return Err(CloudError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(CloudError::Rejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<EscalationAck>()
            .await
            .map_err(|e| CloudError::Decode {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl CloudEscalator for HttpCloudClient {
    async fn escalate(&self, request: &EscalationRequest) -> Result<EscalationAck, CloudError> {
        debug!(
            query_id = %request.query_id,
            detector_id = %request.detector_id,
            reason = %request.reason,
            "sending escalation"
        );
        self.retry
            .run(|| self.attempt(request), CloudError::is_retryable)
            .await
            .map_err(|(e, attempts)| e.with_attempts(attempts))
    }
}

fn classify(e: reqwest::Error) -> CloudError {
    if e.is_timeout() {
        CloudError::Timeout { attempts: 1 }
    } else if e.is_decode() {
        CloudError::Decode {
            reason: e.to_string(),
        }
    } else if let Some(status) = e.status() {
        if status.is_server_error() {
            CloudError::Server {
                status: status.as_u16(),
            }
        } else {
            CloudError::Rejected {
                status: status.as_u16(),
            }
        }
    } else {
        CloudError::Connect {
            attempts: 1,
            reason: e.to_string(),
        }
    }
}
