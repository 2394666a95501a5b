//! Turning fetched model binaries into runnable models.

use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::inference::{OutOfDomainModel, PrimaryModel};
use std::sync::Arc;

/// Builds runnable models from raw bytes. Called on the blocking pool.
pub trait ModelLoader: Send + Sync {
    /// Load the primary classifier for `detector`.
    fn load_primary(&self, detector: &Detector, bytes: &[u8]) -> Result<Arc<dyn PrimaryModel>>;

    /// Load the out-of-domain gate for `detector`.
    fn load_oodd(&self, detector: &Detector, bytes: &[u8]) -> Result<Arc<dyn OutOfDomainModel>>;
}

/// Loader for builds without a model runtime. Every load fails, so queries
/// surface as unavailable and the gateway routes them to the cloud.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedLoader;

impl UnsupportedLoader {
    fn refuse(detector: &Detector) -> Error {
        Error::ModelUnavailable {
            detector_id: detector.id.clone(),
            reason: "this build has no model runtime (enable the 'onnx' feature)".to_string(),
        }
    }
}

impl ModelLoader for UnsupportedLoader {
    fn load_primary(&self, detector: &Detector, _bytes: &[u8]) -> Result<Arc<dyn PrimaryModel>> {
        Err(Self::refuse(detector))
    }

    fn load_oodd(&self, detector: &Detector, _bytes: &[u8]) -> Result<Arc<dyn OutOfDomainModel>> {
        Err(Self::refuse(detector))
    }
}

/// Loader for this build.
#[cfg(feature = "onnx")]
pub fn default_loader() -> Arc<dyn ModelLoader> {
    Arc::new(crate::inference::onnx::OnnxModelLoader::default())
}

/// Loader for this build.
#[cfg(not(feature = "onnx"))]
pub fn default_loader() -> Arc<dyn ModelLoader> {
    Arc::new(UnsupportedLoader)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;

    #[test]
    fn test_unsupported_loader_reports_unavailable() {
        let detector = Detector::from_config("det_a", &DetectorConfig::default()).unwrap();
        let result = UnsupportedLoader.load_primary(&detector, b"model");
        assert!(matches!(result, Err(Error::ModelUnavailable { .. })));
    }
}
