//! Gates primary confidence with the out-of-domain score.

use super::Prediction;
use crate::config::DetectorMode;
use crate::constants::{confidence, labels};
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::models::ModelPair;
use tracing::warn;

/// Local answer after confidence composition.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedResult {
    /// Primary model output. `confidence` holds the raw score.
    pub prediction: Prediction,
    /// Out-of-domain score, when the gate ran.
    pub in_domain_score: Option<f32>,
    /// Gated confidence used for the threshold decision.
    pub final_confidence: f32,
    /// Whether the input looks unfamiliar.
    pub is_out_of_domain: bool,
}

impl CombinedResult {
    /// Zero-confidence stand-in for an inference that failed.
    pub fn failed(label: impl Into<String>) -> Self {
        Self {
            prediction: Prediction::new(label, 0.0),
            in_domain_score: None,
            final_confidence: 0.0,
            is_out_of_domain: false,
        }
    }

    /// Raw primary confidence.
    pub const fn raw_confidence(&self) -> f32 {
        self.prediction.confidence
    }
}

/// Compose a raw primary confidence with an optional in-domain score.
///
/// Returns `(final_confidence, is_out_of_domain)`. Without a score the raw
/// confidence passes through unchanged and the input is in domain.
pub fn combine_scores(
    raw_confidence: f32,
    in_domain_score: Option<f32>,
    out_of_domain_threshold: f32,
) -> Result<(f32, bool)> {
    check_unit("primary confidence", raw_confidence)?;
    let Some(score) = in_domain_score else {
        return Ok((raw_confidence, false));
    };
    check_unit("in-domain score", score)?;

    let gated = (raw_confidence * score).clamp(confidence::MIN, confidence::MAX);
    Ok((gated, score < out_of_domain_threshold))
}

fn check_unit(what: &str, value: f32) -> Result<()> {
    if (confidence::MIN..=confidence::MAX).contains(&value) {
        Ok(())
    } else {
        Err(Error::InferenceExecution {
            reason: format!("{what} {value} is outside [0, 1]"),
        })
    }
}

/// Runs a model pair for a detector and composes the result.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceCombiner {
    out_of_domain_threshold: f32,
}

impl ConfidenceCombiner {
    /// Combiner flagging inputs whose in-domain score is below `out_of_domain_threshold`.
    pub const fn new(out_of_domain_threshold: f32) -> Self {
        Self {
            out_of_domain_threshold,
        }
    }

    /// Configured out-of-domain threshold.
    pub const fn out_of_domain_threshold(&self) -> f32 {
        self.out_of_domain_threshold
    }

    /// Run the primary model and, when enabled, the out-of-domain model.
    pub fn run(&self, detector: &Detector, pair: &ModelPair, image: &[u8]) -> Result<CombinedResult> {
        let prediction = pair.primary.predict(image)?;
        check_label(detector, &prediction)?;

        let in_domain_score = match (&pair.oodd, detector.oodd_enabled) {
            (Some(oodd), true) => Some(oodd.in_domain_score(image)?),
            (None, true) => {
                if pair.note_missing_oodd() {
                    warn!(
                        detector_id = %detector.id,
                        "out-of-domain gating enabled but no model loaded; using raw confidence"
                    );
                }
                None
            }
            (_, false) => None,
        };

        let (final_confidence, is_out_of_domain) =
            combine_scores(prediction.confidence, in_domain_score, self.out_of_domain_threshold)?;

        Ok(CombinedResult {
            prediction,
            in_domain_score,
            final_confidence,
            is_out_of_domain,
        })
    }
}

fn check_label(detector: &Detector, prediction: &Prediction) -> Result<()> {
    let known = match detector.mode {
        DetectorMode::Binary => prediction.label == labels::YES || prediction.label == labels::NO,
        _ => detector.class_names.contains(&prediction.label),
    };
    if known {
        Ok(())
    } else {
        Err(Error::InferenceExecution {
            reason: format!(
                "model produced label '{}' which is not valid for detector '{}'",
                prediction.label, detector.id
            ),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_product_of_scores() {
        let (gated, ood) = combine_scores(0.9, Some(0.97), 0.5).unwrap();
        assert!((gated - 0.873).abs() < 1e-6);
        assert!(!ood);
    }

    #[test]
    fn test_low_in_domain_score_flags_out_of_domain() {
        let (gated, ood) = combine_scores(0.889, Some(0.079), 0.5).unwrap();
        assert!((gated - 0.070_231).abs() < 1e-5);
        assert!(ood);
    }

    #[test]
    fn test_without_gate_raw_passes_through_exactly() {
        for raw in [0.0, 0.123_456_7, 0.5, 1.0] {
            assert_eq!(combine_scores(raw, None, 0.5).unwrap(), (raw, false));
        }
    }

    #[test]
    fn test_result_stays_in_unit_interval() {
        for raw in [0.0_f32, 0.25, 0.5, 0.75, 1.0] {
            for score in [0.0_f32, 0.1, 0.5, 0.9, 1.0] {
                let (gated, _) = combine_scores(raw, Some(score), 0.5).unwrap();
                assert!((0.0..=1.0).contains(&gated));
                assert_eq!(gated, raw * score);
            }
        }
    }

    #[test]
    fn test_score_at_threshold_is_in_domain() {
        let (_, ood) = combine_scores(0.9, Some(0.5), 0.5).unwrap();
        assert!(!ood);
    }

    #[test]
    fn test_invalid_scores_are_execution_errors() {
        assert!(matches!(
            combine_scores(f32::NAN, None, 0.5),
            Err(Error::InferenceExecution { .. })
        ));
        assert!(matches!(
            combine_scores(0.5, Some(1.5), 0.5),
            Err(Error::InferenceExecution { .. })
        ));
        assert!(combine_scores(-0.1, Some(0.5), 0.5).is_err());
    }
}
