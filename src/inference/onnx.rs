//! ONNX Runtime backed models.
//!
//! Output conventions by detector mode:
//! - BINARY: one sigmoid probability of YES, or two softmax values `[no, yes]`
//! - MULTICLASS: one probability per class name, in configuration order
//! - COUNTING: `[count, confidence]`
//! - BOUNDING_BOX: rows of `[left, top, right, bottom, score]`
//!
//! Out-of-domain models output a single in-domain probability.

use super::{OutOfDomainModel, Prediction, PrimaryModel, Roi};
use crate::config::DetectorMode;
use crate::constants::{labels, onnx as conventions};
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::models::ModelLoader;
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

fn execution(reason: impl std::fmt::Display) -> Error {
    Error::InferenceExecution {
        reason: reason.to_string(),
    }
}

/// Decode and resize an image into a `[1, 3, size, size]` tensor scaled to `[0, 1]`.
pub fn preprocess(image: &[u8], size: u32) -> Result<Array4<f32>> {
    let decoded = image::load_from_memory(image).map_err(|e| Error::InvalidImage {
        reason: e.to_string(),
    })?;
    let rgb = decoded.resize_exact(size, size, FilterType::Triangle).to_rgb8();

    let edge = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, edge, edge));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] = f32::from(pixel[channel]) / 255.0;
        }
    }
    Ok(tensor)
}

struct OnnxSession {
    session: Mutex<Session>,
    output_name: String,
    input_size: u32,
}

impl OnnxSession {
    fn from_bytes(detector: &Detector, bytes: &[u8], input_size: u32) -> Result<Self> {
        let unavailable = |e: ort::Error| Error::ModelUnavailable {
            detector_id: detector.id.clone(),
            reason: format!("ONNX Runtime rejected model: {e}"),
        };

        let session = Session::builder()
            .map_err(unavailable)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable)?
            .commit_from_memory(bytes)
            .map_err(unavailable)?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::ModelUnavailable {
                detector_id: detector.id.clone(),
                reason: "model declares no outputs".to_string(),
            })?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            input_size,
        })
    }

    fn run(&self, image: &[u8]) -> Result<Vec<f32>> {
        let input = preprocess(image, self.input_size)?;
        let tensor = Value::from_array(input).map_err(execution)?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![tensor]).map_err(execution)?;
        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| execution(format!("missing output '{}'", self.output_name)))?;
        let (_, data) = output.try_extract_tensor::<f32>().map_err(execution)?;
        Ok(data.to_vec())
    }
}

/// Interpret raw primary model output for a detector mode.
pub fn decode_output(mode: DetectorMode, class_names: &[String], data: &[f32]) -> Result<Prediction> {
    match mode {
        DetectorMode::Binary => {
            let p_yes = match data {
                [p] | [_, p] => *p,
                _ => return Err(execution(format!("binary model produced {} values", data.len()))),
            };
            let label = if p_yes >= conventions::BINARY_DECISION {
                labels::YES
            } else {
                labels::NO
            };
            Ok(Prediction::new(label, p_yes.max(1.0 - p_yes)))
        }
        DetectorMode::Multiclass => {
            if data.len() != class_names.len() {
                return Err(execution(format!(
                    "model produced {} class scores for {} classes",
                    data.len(),
                    class_names.len()
                )));
            }
            let (best, score) = data
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .ok_or_else(|| execution("model produced no class scores"))?;
            Ok(Prediction::new(class_names[best].clone(), score))
        }
        DetectorMode::Counting => {
            let [count, confidence] = data else {
                return Err(execution(format!("counting model produced {} values", data.len())));
            };
            let label = first_class(class_names)?;
            let mut prediction = Prediction::new(label, *confidence);
            prediction.count = Some(round_count(*count));
            Ok(prediction)
        }
        DetectorMode::BoundingBox => {
            if data.len() % conventions::ROI_STRIDE != 0 {
                return Err(execution(format!(
                    "region output length {} is not a multiple of {}",
                    data.len(),
                    conventions::ROI_STRIDE
                )));
            }
            let rows: Vec<Roi> = data
                .chunks_exact(conventions::ROI_STRIDE)
                .map(|r| Roi {
                    left: r[0],
                    top: r[1],
                    right: r[2],
                    bottom: r[3],
                    score: r[4],
                })
                .collect();
            let best = rows.iter().map(|r| r.score).fold(0.0_f32, f32::max);
            let rois: Vec<Roi> = rows
                .into_iter()
                .filter(|r| r.score >= conventions::ROI_SCORE_THRESHOLD)
                .collect();

            // With no regions the model is confident in proportion to how weak its best guess was.
            #[allow(clippy::cast_precision_loss)]
            let confidence = if rois.is_empty() {
                1.0 - best
            } else {
                rois.iter().map(|r| r.score).sum::<f32>() / rois.len() as f32
            };

            let mut prediction = Prediction::new(first_class(class_names)?, confidence);
            prediction.count = u32::try_from(rois.len()).ok();
            prediction.rois = rois;
            Ok(prediction)
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_count(raw: f32) -> u32 {
    raw.max(0.0).round() as u32
}

fn first_class(class_names: &[String]) -> Result<String> {
    class_names
        .first()
        .cloned()
        .ok_or_else(|| execution("detector has no class names"))
}

/// Primary classifier running in ONNX Runtime.
pub struct OnnxPrimaryModel {
    session: OnnxSession,
    mode: DetectorMode,
    class_names: Vec<String>,
}

impl PrimaryModel for OnnxPrimaryModel {
    fn predict(&self, image: &[u8]) -> Result<Prediction> {
        let data = self.session.run(image)?;
        decode_output(self.mode, &self.class_names, &data)
    }
}

/// Out-of-domain gate running in ONNX Runtime.
pub struct OnnxOutOfDomainModel {
    session: OnnxSession,
}

impl OutOfDomainModel for OnnxOutOfDomainModel {
    fn in_domain_score(&self, image: &[u8]) -> Result<f32> {
        let data = self.session.run(image)?;
        data.first()
            .copied()
            .ok_or_else(|| execution("out-of-domain model produced no output"))
    }
}

/// Loads ONNX models from memory.
#[derive(Debug, Clone, Copy)]
pub struct OnnxModelLoader {
    input_size: u32,
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self {
            input_size: conventions::DEFAULT_INPUT_SIZE,
        }
    }
}

impl OnnxModelLoader {
    /// Loader resizing inputs to `input_size` squared.
    pub const fn with_input_size(input_size: u32) -> Self {
        Self { input_size }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load_primary(&self, detector: &Detector, bytes: &[u8]) -> Result<Arc<dyn PrimaryModel>> {
        debug!(detector_id = %detector.id, bytes = bytes.len(), "creating primary session");
        Ok(Arc::new(OnnxPrimaryModel {
            session: OnnxSession::from_bytes(detector, bytes, self.input_size)?,
            mode: detector.mode,
            class_names: detector.class_names.clone(),
        }))
    }

    fn load_oodd(&self, detector: &Detector, bytes: &[u8]) -> Result<Arc<dyn OutOfDomainModel>> {
        debug!(detector_id = %detector.id, bytes = bytes.len(), "creating out-of-domain session");
        Ok(Arc::new(OnnxOutOfDomainModel {
            session: OnnxSession::from_bytes(detector, bytes, self.input_size)?,
        }))
    }
}
