//! Model storage, loading, and the in-memory model cache.

mod cache;
mod loader;
mod store;

pub use cache::ModelCache;
pub use loader::{ModelLoader, UnsupportedLoader, default_loader};
pub use store::{FsModelStore, HttpModelStore, ModelStore, store_from_config};

use crate::constants::store as layout;
use crate::inference::{OutOfDomainModel, PrimaryModel};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Which model of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    /// Main classifier.
    Primary,
    /// Out-of-domain gate.
    Oodd,
}

impl ModelRole {
    /// Path segment used by remote stores.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Oodd => "oodd",
        }
    }

    /// File name inside a detector directory.
    pub const fn filename(self) -> &'static str {
        match self {
            Self::Primary => layout::PRIMARY_FILENAME,
            Self::Oodd => layout::OODD_FILENAME,
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key. The version is the detector fingerprint, so configuration
/// changes land on a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    /// Detector identifier.
    pub detector_id: String,
    /// Detector fingerprint.
    pub version: String,
}

impl ModelKey {
    /// Build a key.
    pub fn new(detector_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            detector_id: detector_id.into(),
            version: version.into(),
        }
    }
}

/// Loaded models for one detector version.
pub struct ModelPair {
    /// Detector identifier.
    pub detector_id: String,
    /// Detector fingerprint the pair was loaded for.
    pub version: String,
    /// Hex SHA-256 over the fetched model binaries.
    pub checksum: String,
    /// When the pair finished loading.
    pub loaded_at: DateTime<Utc>,
    /// Main classifier.
    pub primary: Arc<dyn PrimaryModel>,
    /// Out-of-domain gate, when the store has one.
    pub oodd: Option<Arc<dyn OutOfDomainModel>>,
    missing_oodd_reported: AtomicBool,
}

impl ModelPair {
    /// Assemble a pair.
    pub fn new(
        detector_id: impl Into<String>,
        version: impl Into<String>,
        checksum: impl Into<String>,
        primary: Arc<dyn PrimaryModel>,
        oodd: Option<Arc<dyn OutOfDomainModel>>,
    ) -> Self {
        Self {
            detector_id: detector_id.into(),
            version: version.into(),
            checksum: checksum.into(),
            loaded_at: Utc::now(),
            primary,
            oodd,
            missing_oodd_reported: AtomicBool::new(false),
        }
    }

    /// Cache key of this pair.
    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.detector_id.clone(), self.version.clone())
    }

    /// Returns true the first time it is called for this pair.
    pub(crate) fn note_missing_oodd(&self) -> bool {
        !self.missing_oodd_reported.swap(true, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ModelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPair")
            .field("detector_id", &self.detector_id)
            .field("version", &self.version)
            .field("checksum", &self.checksum)
            .field("loaded_at", &self.loaded_at)
            .field("has_oodd", &self.oodd.is_some())
            .finish_non_exhaustive()
    }
}
