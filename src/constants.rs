//! Application-wide constants.
//!
//! All magic numbers and strings are defined here to ensure consistency
//! and make changes easy to track.

/// Application name used for config directories and user-facing messages.
pub const APP_NAME: &str = "edgelens";

/// Prefix for generated image query identifiers.
pub const IMAGE_QUERY_ID_PREFIX: &str = "iq_";

/// Confidence value bounds.
pub mod confidence {
    /// Minimum valid confidence value.
    pub const MIN: f32 = 0.0;
    /// Maximum valid confidence value.
    pub const MAX: f32 = 1.0;
    /// Default per-detector confidence threshold.
    pub const DEFAULT_THRESHOLD: f32 = 0.9;
    /// Default in-domain score below which an input counts as out of domain.
    pub const DEFAULT_OUT_OF_DOMAIN_THRESHOLD: f32 = 0.5;
}

/// Model cache defaults.
pub mod cache {
    /// Maximum number of loaded model pairs kept in memory.
    pub const DEFAULT_CAPACITY: usize = 5;
    /// Upper bound on a single model fetch, in milliseconds.
    pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
}

/// Escalation defaults.
pub mod escalation {
    /// Default minimum spacing between escalations for one detector, in seconds.
    pub const DEFAULT_MIN_TIME_BETWEEN_SECS: f64 = 30.0;
    /// Default patience time for a detector, in seconds.
    pub const DEFAULT_PATIENCE_TIME_SECS: f64 = 30.0;
    /// How long the aggressive profile waits for the cloud before answering locally.
    pub const DEFAULT_AGGRESSIVE_TIMEOUT_MS: u64 = 3_000;
    /// Number of escalation records kept in the in-memory journal.
    pub const JOURNAL_CAPACITY: usize = 1024;
}

/// Audit sampling defaults.
pub mod audit {
    /// Probability that a local answer is forwarded for auditing.
    pub const DEFAULT_PROBABILITY: f64 = 1e-5;
}

/// Cloud client defaults.
pub mod cloud {
    /// Path of the escalation endpoint relative to the configured base URL.
    pub const ESCALATIONS_PATH: &str = "/v1/escalations";
    /// Header carrying the hostname of the escalating node.
    pub const EDGE_NODE_HEADER: &str = "x-edge-node";
    /// Per-request timeout, in milliseconds.
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
    /// Connect timeout, in milliseconds.
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
    /// Retries after the first attempt for timeouts and connect failures.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// First backoff delay, in milliseconds. Doubles on every retry.
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
    /// Backoff ceiling, in milliseconds.
    pub const MAX_BACKOFF_MS: u64 = 5_000;
}

/// Worker pool defaults.
pub mod engine {
    /// Bounded queue capacity between submitters and workers.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
    /// Worker count used when available parallelism cannot be determined.
    pub const FALLBACK_WORKERS: usize = 4;
}

/// Model store layout.
pub mod store {
    /// Filename of the primary model inside a detector directory.
    pub const PRIMARY_FILENAME: &str = "primary.onnx";
    /// Filename of the out-of-domain model inside a detector directory.
    pub const OODD_FILENAME: &str = "oodd.onnx";
}

/// ONNX model input and output conventions.
pub mod onnx {
    /// Square input edge length images are resized to.
    pub const DEFAULT_INPUT_SIZE: u32 = 224;
    /// Probability at or above which a binary model answers YES.
    pub const BINARY_DECISION: f32 = 0.5;
    /// Minimum score for a region to be reported.
    pub const ROI_SCORE_THRESHOLD: f32 = 0.5;
    /// Values per region row: left, top, right, bottom, score.
    pub const ROI_STRIDE: usize = 5;
}

/// HTTP server defaults.
pub mod server {
    /// Default bind host.
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    /// Default bind port.
    pub const DEFAULT_PORT: u16 = 30101;
    /// Largest accepted image body, in bytes.
    pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;
    /// Header prefix whose values are captured as query source metadata.
    pub const SOURCE_HEADER_PREFIX: &str = "x-source-";
}

/// Detector registry defaults.
pub mod detectors {
    /// Seconds between configuration re-reads while serving.
    pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
}

/// Labels produced by binary detectors.
pub mod labels {
    /// Positive binary answer.
    pub const YES: &str = "YES";
    /// Negative binary answer.
    pub const NO: &str = "NO";
}
