//! Model abstractions and confidence composition.

mod combiner;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use combiner::{CombinedResult, ConfidenceCombiner, combine_scores};

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One detected region, normalized to `[0, 1]` image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge.
    pub left: f32,
    /// Top edge.
    pub top: f32,
    /// Right edge.
    pub right: f32,
    /// Bottom edge.
    pub bottom: f32,
    /// Detection score.
    pub score: f32,
}

/// Output of a primary model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// `YES`/`NO` for binary detectors, otherwise a class name.
    pub label: String,
    /// Raw model confidence in `[0, 1]`.
    pub confidence: f32,
    /// Object count for counting detectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Regions for bounding box detectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rois: Vec<Roi>,
}

impl Prediction {
    /// Prediction with only a label and confidence.
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            count: None,
            rois: Vec::new(),
        }
    }
}

/// The main classifier of a detector.
///
/// Implementations are called from blocking worker threads and may take
/// as long as the model needs.
pub trait PrimaryModel: Send + Sync {
    /// Run the model on encoded image bytes.
    fn predict(&self, image: &[u8]) -> Result<Prediction>;
}

/// Estimates how closely an input resembles the training distribution.
pub trait OutOfDomainModel: Send + Sync {
    /// Score in `[0, 1]`, higher meaning more familiar.
    fn in_domain_score(&self, image: &[u8]) -> Result<f32>;
}
