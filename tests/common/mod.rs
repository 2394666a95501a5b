//! Fakes shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use bytes::Bytes;
use edgelens::config::{DetectorConfig, DetectorMode, InferenceProfile};
use edgelens::detector::{Detector, DetectorRegistry};
use edgelens::engine::{DecisionEngine, EngineBuilder};
use edgelens::escalation::{
    AuditSampler, CloudAnswer, CloudError, CloudEscalator, EscalationAck, EscalationRequest,
};
use edgelens::inference::{OutOfDomainModel, Prediction, PrimaryModel};
use edgelens::models::{ModelLoader, ModelRole, ModelStore};
use edgelens::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Store that has both models for every detector unless told otherwise.
#[derive(Default)]
pub struct StaticStore {
    pub empty: bool,
    pub fetches: AtomicUsize,
}

impl StaticStore {
    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ModelStore for StaticStore {
    async fn fetch(&self, _detector_id: &str, role: ModelRole) -> Result<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.empty {
            return Ok(None);
        }
        Ok(Some(Bytes::from(role.as_str().as_bytes().to_vec())))
    }
}

/// Loader whose models always answer the same thing.
#[derive(Clone)]
pub struct ScriptedLoader {
    /// `None` makes the primary model fail.
    pub prediction: Option<Prediction>,
    pub in_domain: f32,
}

impl ScriptedLoader {
    pub fn new(label: &str, confidence: f32, in_domain: f32) -> Self {
        Self {
            prediction: Some(Prediction::new(label, confidence)),
            in_domain,
        }
    }

    pub const fn failing() -> Self {
        Self {
            prediction: None,
            in_domain: 1.0,
        }
    }
}

struct ScriptedPrimary(Option<Prediction>);

impl PrimaryModel for ScriptedPrimary {
    fn predict(&self, _image: &[u8]) -> Result<Prediction> {
        self.0.clone().ok_or_else(|| Error::InferenceExecution {
            reason: "scripted failure".to_string(),
        })
    }
}

struct ScriptedOodd(f32);

impl OutOfDomainModel for ScriptedOodd {
    fn in_domain_score(&self, _image: &[u8]) -> Result<f32> {
        Ok(self.0)
    }
}

impl ModelLoader for ScriptedLoader {
    fn load_primary(&self, _detector: &Detector, _bytes: &[u8]) -> Result<Arc<dyn PrimaryModel>> {
        Ok(Arc::new(ScriptedPrimary(self.prediction.clone())))
    }

    fn load_oodd(&self, _detector: &Detector, _bytes: &[u8]) -> Result<Arc<dyn OutOfDomainModel>> {
        Ok(Arc::new(ScriptedOodd(self.in_domain)))
    }
}

/// Cloud that records requests and answers after `delay`.
#[derive(Default)]
pub struct FakeCloud {
    pub answer: Option<CloudAnswer>,
    pub error: Option<CloudError>,
    pub delay: Duration,
    pub requests: Mutex<Vec<EscalationRequest>>,
}

impl FakeCloud {
    pub fn answering(label: &str, confidence: f32) -> Self {
        Self {
            answer: Some(CloudAnswer {
                label: label.to_string(),
                confidence,
            }),
            ..Self::default()
        }
    }

    pub fn failing(error: CloudError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<EscalationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CloudEscalator for FakeCloud {
    async fn escalate(&self, request: &EscalationRequest) -> std::result::Result<EscalationAck, CloudError> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(EscalationAck {
            accepted: true,
            escalation_id: Some(format!("esc_{}", request.query_id)),
            result: self.answer.clone(),
        })
    }
}

/// Binary detector with the given threshold and profile.
pub fn binary_detector(threshold: f32, profile: InferenceProfile) -> DetectorConfig {
    DetectorConfig {
        mode: DetectorMode::Binary,
        confidence_threshold: threshold,
        edge_inference_profile: profile,
        min_time_between_escalations_secs: 30.0,
        patience_time_secs: 5.0,
        ..DetectorConfig::default()
    }
}

pub fn detectors(entries: &[(&str, DetectorConfig)]) -> BTreeMap<String, DetectorConfig> {
    entries
        .iter()
        .map(|(id, config)| ((*id).to_string(), config.clone()))
        .collect()
}

/// Engine over the given fakes with auditing off.
pub fn engine(
    configs: &BTreeMap<String, DetectorConfig>,
    store: Arc<StaticStore>,
    loader: ScriptedLoader,
    cloud: Arc<FakeCloud>,
) -> DecisionEngine {
    EngineBuilder::new(Arc::new(DetectorRegistry::load(configs)), store)
        .loader(Arc::new(loader))
        .cloud(cloud)
        .audit(AuditSampler::new(0.0))
        .aggressive_timeout(Duration::from_millis(200))
        .build()
}
