//! Validated detector definitions and the registry that serves them.

mod registry;

pub use registry::{DetectorRegistry, DetectorState, RefreshSummary};

use crate::config::{DetectorConfig, DetectorMode, InferenceProfile};
use crate::constants::{confidence, labels};
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A detector whose configuration passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detector {
    /// Detector identifier.
    pub id: String,
    /// Answer shape.
    pub mode: DetectorMode,
    /// Class names, empty for binary detectors.
    pub class_names: Vec<String>,
    /// Minimum combined confidence for a local answer.
    pub confidence_threshold: f32,
    /// How long the cloud may take on a synchronous answer.
    pub patience_time: Duration,
    /// Minimum spacing between escalations.
    pub min_time_between_escalations: Duration,
    /// Edge inference profile.
    pub profile: InferenceProfile,
    /// Whether the out-of-domain model gates confidence.
    pub oodd_enabled: bool,
    /// Whether every query goes to human review.
    pub human_review_required: bool,
    /// Model version pin, if any.
    pub model_version: Option<String>,
    /// Hex SHA-256 over the model-affecting fields. Used as the cache version.
    pub fingerprint: String,
}

impl Detector {
    /// Validate `config` and build a detector.
    ///
    /// Class name cardinality must match the mode: none for BINARY, at least
    /// two for MULTICLASS, at least one for COUNTING and BOUNDING_BOX.
    pub fn from_config(id: &str, config: &DetectorConfig) -> Result<Self> {
        let invalid = |reason: String| Error::ConfigInvalid {
            detector_id: id.to_string(),
            reason,
        };

        if id.trim().is_empty() {
            return Err(invalid("detector id must not be empty".to_string()));
        }

        let classes = config.class_names.len();
        match config.mode {
            DetectorMode::Binary if classes != 0 => {
                return Err(invalid(format!(
                    "BINARY detectors take no class names, got {classes}"
                )));
            }
            DetectorMode::Multiclass if classes < 2 => {
                return Err(invalid(format!(
                    "MULTICLASS requires at least 2 class names, got {classes}"
                )));
            }
            DetectorMode::Counting | DetectorMode::BoundingBox if classes < 1 => {
                return Err(invalid(format!(
                    "{} requires at least 1 class name, got 0",
                    config.mode
                )));
            }
            _ => {}
        }

        if let Some(name) = config.class_names.iter().find(|n| n.trim().is_empty()) {
            return Err(invalid(format!("class name '{name}' is blank")));
        }

        if !(confidence::MIN..=confidence::MAX).contains(&config.confidence_threshold) {
            return Err(invalid(format!(
                "confidence_threshold must be between {} and {}, got {}",
                confidence::MIN,
                confidence::MAX,
                config.confidence_threshold
            )));
        }

        if config.human_review_required && config.edge_inference_profile == InferenceProfile::Offline {
            return Err(invalid(
                "human review needs the cloud but the profile is offline".to_string(),
            ));
        }

        let patience_time = seconds(config.patience_time_secs)
            .ok_or_else(|| invalid(format!("invalid patience_time_secs: {}", config.patience_time_secs)))?;
        let min_time_between_escalations = seconds(config.min_time_between_escalations_secs)
            .ok_or_else(|| {
                invalid(format!(
                    "invalid min_time_between_escalations_secs: {}",
                    config.min_time_between_escalations_secs
                ))
            })?;

        Ok(Self {
            id: id.to_string(),
            mode: config.mode,
            class_names: config.class_names.clone(),
            confidence_threshold: config.confidence_threshold,
            patience_time,
            min_time_between_escalations,
            profile: config.edge_inference_profile,
            oodd_enabled: config.oodd_enabled,
            human_review_required: config.human_review_required,
            model_version: config.model_version.clone(),
            fingerprint: fingerprint(config),
        })
    }
}

impl Detector {
    /// Label reported when the models produced nothing: `NO` for binary
    /// detectors, otherwise the first class.
    pub fn fallback_label(&self) -> &str {
        match self.mode {
            DetectorMode::Binary => labels::NO,
            _ => self.class_names.first().map_or(labels::NO, String::as_str),
        }
    }
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

/// SHA-256 over the fields that decide which models a detector runs.
pub fn fingerprint(config: &DetectorConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.model_version.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(config.mode.to_string().as_bytes());
    hasher.update([0]);
    for name in &config.class_names {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0, u8::from(config.oodd_enabled)]);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(mode: DetectorMode, classes: &[&str]) -> DetectorConfig {
        DetectorConfig {
            mode,
            class_names: classes.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_multiclass_with_one_class_is_rejected() {
        let err = Detector::from_config("det_door", &config(DetectorMode::Multiclass, &["open"]))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { ref detector_id, .. } if detector_id == "det_door"));
    }

    #[test]
    fn test_class_cardinality_per_mode() {
        assert!(Detector::from_config("a", &config(DetectorMode::Binary, &[])).is_ok());
        assert!(Detector::from_config("a", &config(DetectorMode::Binary, &["x"])).is_err());
        assert!(Detector::from_config("a", &config(DetectorMode::Multiclass, &["x", "y"])).is_ok());
        assert!(Detector::from_config("a", &config(DetectorMode::Counting, &[])).is_err());
        assert!(Detector::from_config("a", &config(DetectorMode::Counting, &["car"])).is_ok());
        assert!(Detector::from_config("a", &config(DetectorMode::BoundingBox, &[])).is_err());
        assert!(Detector::from_config("a", &config(DetectorMode::BoundingBox, &["person"])).is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let mut cfg = config(DetectorMode::Binary, &[]);
        cfg.confidence_threshold = 1.2;
        assert!(Detector::from_config("a", &cfg).is_err());
        cfg.confidence_threshold = f32::NAN;
        assert!(Detector::from_config("a", &cfg).is_err());
    }

    #[test]
    fn test_offline_human_review_is_contradictory() {
        let mut cfg = config(DetectorMode::Binary, &[]);
        cfg.human_review_required = true;
        cfg.edge_inference_profile = InferenceProfile::Offline;
        assert!(Detector::from_config("a", &cfg).is_err());
    }

    #[test]
    fn test_negative_patience_is_rejected() {
        let mut cfg = config(DetectorMode::Binary, &[]);
        cfg.patience_time_secs = -1.0;
        assert!(Detector::from_config("a", &cfg).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_model_fields_only() {
        let base = config(DetectorMode::Multiclass, &["a", "b"]);

        let mut threshold_changed = base.clone();
        threshold_changed.confidence_threshold = 0.5;
        assert_eq!(fingerprint(&base), fingerprint(&threshold_changed));

        let mut classes_changed = base.clone();
        classes_changed.class_names.push("c".to_string());
        assert_ne!(fingerprint(&base), fingerprint(&classes_changed));

        let mut version_changed = base.clone();
        version_changed.model_version = Some("v2".to_string());
        assert_ne!(fingerprint(&base), fingerprint(&version_changed));

        let mut oodd_changed = base.clone();
        oodd_changed.oodd_enabled = false;
        assert_ne!(fingerprint(&base), fingerprint(&oodd_changed));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&DetectorConfig::default());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
