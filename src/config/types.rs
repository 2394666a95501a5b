//! Configuration type definitions.

use crate::constants::{audit, cache, cloud, confidence, detectors, engine, escalation, server};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Decision engine and worker pool settings.
    pub engine: EngineConfig,

    /// Model cache settings.
    pub cache: CacheConfig,

    /// Where model binaries come from.
    pub model_store: ModelStoreConfig,

    /// Cloud escalation service settings.
    pub cloud: CloudConfig,

    /// Audit sampling settings.
    pub audit: AuditConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Configured detectors by id.
    pub detectors: BTreeMap<String, DetectorConfig>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Seconds between detector configuration re-reads.
    pub detector_refresh_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            detector_refresh_secs: detectors::DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

/// Decision engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count (defaults to available parallelism).
    pub workers: Option<usize>,
    /// Pending query capacity.
    pub queue_capacity: usize,
    /// In-domain score below which an input is out of domain.
    pub out_of_domain_threshold: f32,
    /// How long the aggressive profile waits on the cloud, in milliseconds.
    pub aggressive_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: engine::DEFAULT_QUEUE_CAPACITY,
            out_of_domain_threshold: confidence::DEFAULT_OUT_OF_DOMAIN_THRESHOLD,
            aggressive_timeout_ms: escalation::DEFAULT_AGGRESSIVE_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(engine::FALLBACK_WORKERS, usize::from)
        })
    }
}

/// Model cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum loaded model pairs.
    pub capacity: usize,
    /// Fetch timeout in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: cache::DEFAULT_CAPACITY,
            fetch_timeout_ms: cache::DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

/// Model store backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelStoreConfig {
    /// Models on local disk, one directory per detector.
    Filesystem {
        /// Root directory.
        root: PathBuf,
    },
    /// Models served over HTTP.
    Http {
        /// Base URL of the model service.
        base_url: String,
        /// Optional bearer token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_token: Option<String>,
    },
}

impl Default for ModelStoreConfig {
    fn default() -> Self {
        Self::Filesystem {
            root: PathBuf::from("models"),
        }
    }
}

/// Cloud escalation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL of the escalation service. Unset on offline nodes.
    pub endpoint: Option<String>,
    /// Optional bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Retries for timeouts and connect failures.
    pub max_retries: u32,
    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            request_timeout_ms: cloud::DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: cloud::DEFAULT_CONNECT_TIMEOUT_MS,
            max_retries: cloud::DEFAULT_MAX_RETRIES,
            initial_backoff_ms: cloud::DEFAULT_INITIAL_BACKOFF_MS,
        }
    }
}

/// Audit sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Probability that a local answer is forwarded for auditing.
    pub probability: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            probability: audit::DEFAULT_PROBABILITY,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Configuration of a single detector as delivered by the configuration source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Answer shape.
    pub mode: DetectorMode,
    /// Class names (empty for binary detectors).
    pub class_names: Vec<String>,
    /// Minimum confidence for a local answer.
    pub confidence_threshold: f32,
    /// How long the cloud may take to answer, in seconds.
    pub patience_time_secs: f64,
    /// Minimum spacing between escalations, in seconds.
    pub min_time_between_escalations_secs: f64,
    /// Edge inference profile.
    pub edge_inference_profile: InferenceProfile,
    /// Whether the out-of-domain model gates confidence.
    pub oodd_enabled: bool,
    /// Whether every query must be answered by human review.
    pub human_review_required: bool,
    /// Optional model version pin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Binary,
            class_names: Vec::new(),
            confidence_threshold: confidence::DEFAULT_THRESHOLD,
            patience_time_secs: escalation::DEFAULT_PATIENCE_TIME_SECS,
            min_time_between_escalations_secs: escalation::DEFAULT_MIN_TIME_BETWEEN_SECS,
            edge_inference_profile: InferenceProfile::Default,
            oodd_enabled: true,
            human_review_required: false,
            model_version: None,
        }
    }
}

/// Detector answer shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorMode {
    /// Yes/no question.
    #[default]
    Binary,
    /// One of several classes.
    Multiclass,
    /// Object count of a class.
    Counting,
    /// Object regions of a class.
    BoundingBox,
}

impl std::fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "BINARY"),
            Self::Multiclass => write!(f, "MULTICLASS"),
            Self::Counting => write!(f, "COUNTING"),
            Self::BoundingBox => write!(f, "BOUNDING_BOX"),
        }
    }
}

impl std::str::FromStr for DetectorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "BINARY" => Ok(Self::Binary),
            "MULTICLASS" | "MULTI_CLASS" => Ok(Self::Multiclass),
            "COUNTING" | "COUNT" => Ok(Self::Counting),
            "BOUNDING_BOX" | "BBOX" => Ok(Self::BoundingBox),
            other => Err(format!("unknown detector mode: {other}")),
        }
    }
}

/// How a detector trades latency against cloud involvement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceProfile {
    /// Answer locally, escalate in the background.
    #[default]
    Default,
    /// Never use the network.
    Offline,
    /// Wait a bounded time for the cloud before answering.
    Aggressive,
}

impl std::fmt::Display for InferenceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Offline => write!(f, "offline"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for InferenceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "offline" | "edge_answers_only" => Ok(Self::Offline),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown edge inference profile: {other}")),
        }
    }
}
