//! Per-query decision engine.
//!
//! Every query walks an explicit [`Stage`] sequence. Only the model cache and
//! the escalation limiter hold shared state; nothing is locked across the
//! whole pipeline.

mod pool;
mod query;
mod state;

pub use pool::WorkerPool;
pub use query::{
    AcceptedResponse, HumanReview, ImageQuery, QueryOutcome, QueryResponse, QueryResult,
    ResultSource,
};
pub use state::{Stage, ThresholdDecision, decide};

use crate::config::{Config, DetectorConfig, InferenceProfile};
use crate::constants::{audit, cache, confidence, escalation as escalation_defaults};
use crate::detector::{Detector, DetectorRegistry, RefreshSummary};
use crate::error::{Error, Result};
use crate::escalation::{
    AuditSampler, CloudError, CloudEscalator, EscalationAck, EscalationJournal, EscalationLimiter,
    EscalationReason, EscalationRecord, EscalationRequest, HttpCloudClient, LocalResult,
    OfflineEscalator,
};
use crate::inference::{CombinedResult, ConfidenceCombiner};
use crate::models::{ModelCache, ModelLoader, ModelStore, default_loader, store_from_config};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type EscalationHandle = JoinHandle<std::result::Result<EscalationAck, CloudError>>;

/// Assembles a [`DecisionEngine`].
pub struct EngineBuilder {
    registry: Arc<DetectorRegistry>,
    store: Arc<dyn ModelStore>,
    loader: Arc<dyn ModelLoader>,
    cloud: Arc<dyn CloudEscalator>,
    audit: AuditSampler,
    cache_capacity: usize,
    fetch_timeout: Duration,
    out_of_domain_threshold: f32,
    aggressive_timeout: Duration,
    journal_capacity: usize,
}

impl EngineBuilder {
    /// Builder with default settings, the build's model loader and no cloud.
    pub fn new(registry: Arc<DetectorRegistry>, store: Arc<dyn ModelStore>) -> Self {
        Self {
            registry,
            store,
            loader: default_loader(),
            cloud: Arc::new(OfflineEscalator),
            audit: AuditSampler::new(audit::DEFAULT_PROBABILITY),
            cache_capacity: cache::DEFAULT_CAPACITY,
            fetch_timeout: Duration::from_millis(cache::DEFAULT_FETCH_TIMEOUT_MS),
            out_of_domain_threshold: confidence::DEFAULT_OUT_OF_DOMAIN_THRESHOLD,
            aggressive_timeout: Duration::from_millis(escalation_defaults::DEFAULT_AGGRESSIVE_TIMEOUT_MS),
            journal_capacity: escalation_defaults::JOURNAL_CAPACITY,
        }
    }

    /// Builder wired from node configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetch_timeout = Duration::from_millis(config.cache.fetch_timeout_ms);
        let registry = Arc::new(DetectorRegistry::load(&config.detectors));
        let store = store_from_config(&config.model_store, fetch_timeout)?;

        let cloud: Arc<dyn CloudEscalator> = match HttpCloudClient::from_config(&config.cloud)? {
            Some(client) => {
                info!(url = client.url(), "cloud escalation enabled");
                Arc::new(client)
            }
            None => {
                info!("no cloud endpoint configured, running edge-only");
                Arc::new(OfflineEscalator)
            }
        };

        Ok(Self::new(registry, store)
            .cloud(cloud)
            .audit(AuditSampler::new(config.audit.probability))
            .cache_capacity(config.cache.capacity)
            .fetch_timeout(fetch_timeout)
            .out_of_domain_threshold(config.engine.out_of_domain_threshold)
            .aggressive_timeout(Duration::from_millis(config.engine.aggressive_timeout_ms)))
    }

    /// Use a specific model loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Use a specific cloud escalator.
    #[must_use]
    pub fn cloud(mut self, cloud: Arc<dyn CloudEscalator>) -> Self {
        self.cloud = cloud;
        self
    }

    /// Use a specific audit sampler.
    #[must_use]
    pub fn audit(mut self, audit: AuditSampler) -> Self {
        self.audit = audit;
        self
    }

    /// Maximum loaded model pairs.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Upper bound on a model fetch.
    #[must_use]
    pub const fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// In-domain score below which inputs are out of domain.
    #[must_use]
    pub const fn out_of_domain_threshold(mut self, threshold: f32) -> Self {
        self.out_of_domain_threshold = threshold;
        self
    }

    /// How long the aggressive profile waits on the cloud.
    #[must_use]
    pub const fn aggressive_timeout(mut self, timeout: Duration) -> Self {
        self.aggressive_timeout = timeout;
        self
    }

    /// Finish building.
    pub fn build(self) -> DecisionEngine {
        DecisionEngine {
            registry: self.registry,
            cache: ModelCache::new(self.cache_capacity, self.fetch_timeout, self.store, self.loader),
            combiner: ConfidenceCombiner::new(self.out_of_domain_threshold),
            limiter: EscalationLimiter::new(),
            audit: self.audit,
            cloud: self.cloud,
            journal: Arc::new(EscalationJournal::new(self.journal_capacity)),
            aggressive_timeout: self.aggressive_timeout,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }
}

/// Readiness summary.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Configured detectors.
    pub detectors: usize,
    /// Detectors that can serve queries.
    pub ready_detectors: usize,
    /// Detectors with a loaded model pair.
    pub cached_models: Vec<String>,
    /// Model cache capacity.
    pub cache_capacity: usize,
    /// Escalations not yet acknowledged by the cloud.
    pub unresolved_escalations: usize,
    /// Escalation calls still running.
    pub in_flight_escalations: usize,
}

/// Decides, per query, between a local answer and the cloud.
pub struct DecisionEngine {
    registry: Arc<DetectorRegistry>,
    cache: ModelCache,
    combiner: ConfidenceCombiner,
    limiter: EscalationLimiter,
    audit: AuditSampler,
    cloud: Arc<dyn CloudEscalator>,
    journal: Arc<EscalationJournal>,
    aggressive_timeout: Duration,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl DecisionEngine {
    /// Run one query to completion.
    pub async fn process(&self, mut query: ImageQuery) -> Result<QueryOutcome> {
        let detector = self.registry.lookup(&query.detector_id)?;
        if query.image.is_empty() {
            return Err(Error::InvalidImage {
                reason: "image is empty".to_string(),
            });
        }

        let mut path: Vec<&'static str> = Vec::with_capacity(8);
        let mut inference_failure: Option<String> = None;
        let mut stage = Stage::Received;

        let outcome = loop {
            path.push(stage.name());
            stage = match stage {
                Stage::Done(outcome) => break outcome,

                Stage::Received => Stage::CheckAsync,

                Stage::CheckAsync => {
                    if query.want_async {
                        require_network(&detector, "asynchronous submission")?;
                        let reason = if wants_human_review(&detector, &query) {
                            EscalationReason::HumanReviewRequired
                        } else {
                            EscalationReason::LowConfidence
                        };
                        drop(self.spawn_escalation(&query, &detector, None, reason));
                        query.mark_escalated();
                        Stage::Done(QueryOutcome::Accepted(query.to_accepted()))
                    } else {
                        Stage::CheckHumanReview
                    }
                }

                Stage::CheckHumanReview => {
                    if wants_human_review(&detector, &query) {
                        Stage::Done(self.human_review(&mut query, &detector).await?)
                    } else {
                        Stage::CheckInferenceAvailable
                    }
                }

                Stage::CheckInferenceAvailable => {
                    Stage::LocalInference(self.cache.get_or_load(&detector).await?)
                }

                Stage::LocalInference(pair) => match self.infer(&detector, pair, &query).await {
                    Ok(result) => Stage::CheckThreshold(result),
                    Err(Error::InferenceExecution { reason }) => {
                        warn!(
                            query_id = %query.id,
                            detector_id = %detector.id,
                            %reason,
                            "local inference failed"
                        );
                        if detector.profile == InferenceProfile::Offline {
                            return Err(Error::InferenceExecution { reason });
                        }
                        inference_failure = Some(reason);
                        Stage::Escalate {
                            result: CombinedResult::failed(detector.fallback_label()),
                            reason: EscalationReason::LowConfidence,
                        }
                    }
                    Err(e) => return Err(e),
                },

                Stage::CheckThreshold(result) => match decide(
                    result.final_confidence,
                    result.is_out_of_domain,
                    detector.confidence_threshold,
                    detector.profile,
                ) {
                    ThresholdDecision::Confident => Stage::ReturnLocal {
                        result,
                        reason: None,
                    },
                    ThresholdDecision::BestEffortOffline => Stage::ReturnLocal {
                        result,
                        reason: Some(EscalationReason::LowConfidence),
                    },
                    ThresholdDecision::Escalate(reason) => Stage::Escalate { result, reason },
                },

                Stage::ReturnLocal { result, reason } => {
                    query.attach_result(QueryResult::local(result, reason))?;
                    Stage::CheckAudit
                }

                Stage::Escalate { result, reason } => {
                    if self.limiter.allow(
                        &detector.id,
                        detector.min_time_between_escalations,
                        Instant::now(),
                    ) {
                        let inference_failed = inference_failure.is_some();
                        self.escalate_with_local(
                            &mut query,
                            &detector,
                            result,
                            reason,
                            inference_failed,
                        )
                        .await?;
                        Stage::CheckAudit
                    } else if let Some(reason) = inference_failure.take() {
                        return Err(Error::InferenceExecution { reason });
                    } else {
                        Stage::ReturnLocal {
                            result,
                            reason: Some(EscalationReason::LowConfidence),
                        }
                    }
                }

                Stage::CheckAudit => {
                    if !query.escalated()
                        && detector.profile != InferenceProfile::Offline
                        && self.audit.sample()
                    {
                        debug!(query_id = %query.id, "query selected for audit");
                        drop(self.spawn_escalation(
                            &query,
                            &detector,
                            None,
                            EscalationReason::AuditSample,
                        ));
                    }
                    Stage::Done(QueryOutcome::Answered(query.to_response()?))
                }
            };
        };

        debug!(
            query_id = %query.id,
            detector_id = %detector.id,
            path = %path.join(" -> "),
            "query decided"
        );
        Ok(outcome)
    }

    /// Forward a query while keeping `result` as the fallback. Only the
    /// aggressive profile waits for the cloud. A failed inference is not
    /// shared with the cloud as a local answer.
    async fn escalate_with_local(
        &self,
        query: &mut ImageQuery,
        detector: &Detector,
        result: CombinedResult,
        reason: EscalationReason,
        inference_failed: bool,
    ) -> Result<()> {
        let shared = (!inference_failed).then_some(&result);
        let handle = self.spawn_escalation(query, detector, shared, reason);
        query.mark_escalated();

        match detector.profile {
            InferenceProfile::Aggressive => {
                match wait_for_cloud(handle, self.aggressive_timeout).await {
                    Ok(EscalationAck {
                        result: Some(answer),
                        ..
                    }) => query.attach_result(QueryResult::cloud(answer, reason)),
                    _ => {
                        debug!(query_id = %query.id, "cloud did not answer in time, using local result");
                        query.attach_result(QueryResult::local(result, Some(reason)))
                    }
                }
            }
            InferenceProfile::Default | InferenceProfile::Offline => {
                query.attach_result(QueryResult::local(result, Some(reason)))
            }
        }
    }

    async fn human_review(&self, query: &mut ImageQuery, detector: &Detector) -> Result<QueryOutcome> {
        require_network(detector, "human review")?;
        let reason = EscalationReason::HumanReviewRequired;
        let handle = self.spawn_escalation(query, detector, None, reason);
        query.mark_escalated();

        match wait_for_cloud(handle, detector.patience_time).await {
            Ok(EscalationAck {
                result: Some(answer),
                ..
            }) => {
                query.attach_result(QueryResult::cloud(answer, reason))?;
                Ok(QueryOutcome::Answered(query.to_response()?))
            }
            Ok(ack) if ack.accepted => Ok(QueryOutcome::Accepted(query.to_accepted())),
            Ok(_) => Err(Error::ServiceUnavailable {
                reason: "cloud declined human review".to_string(),
            }),
            Err(source) => Err(Error::CloudUnreachable { source }),
        }
    }

    async fn infer(
        &self,
        detector: &Arc<Detector>,
        pair: Arc<crate::models::ModelPair>,
        query: &ImageQuery,
    ) -> Result<CombinedResult> {
        let combiner = self.combiner;
        let detector = Arc::clone(detector);
        let image = query.image.clone();
        tokio::task::spawn_blocking(move || combiner.run(&detector, &pair, &image))
            .await
            .map_err(|e| Error::InferenceExecution {
                reason: format!("inference task failed: {e}"),
            })?
    }

    /// Forward a query in the background. The returned handle may be dropped
    /// without cancelling the call.
    fn spawn_escalation(
        &self,
        query: &ImageQuery,
        detector: &Detector,
        local: Option<&CombinedResult>,
        reason: EscalationReason,
    ) -> EscalationHandle {
        let request = EscalationRequest {
            query_id: query.id.clone(),
            detector_id: detector.id.clone(),
            image: query.image.clone(),
            local_result: local.map(|r| LocalResult {
                label: r.prediction.label.clone(),
                confidence: r.final_confidence,
                out_of_domain: r.is_out_of_domain,
            }),
            reason,
            patience_time_secs: detector.patience_time.as_secs_f64(),
        };
        self.journal
            .record(EscalationRecord::new(&query.id, &detector.id, reason));

        let cloud = Arc::clone(&self.cloud);
        let journal = Arc::clone(&self.journal);
        let pending = Arc::clone(&self.pending);
        let idle = Arc::clone(&self.idle);
        pending.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let outcome = cloud.escalate(&request).await;
            match &outcome {
                Ok(ack) if ack.accepted => {
                    journal.resolve(&request.query_id, ack.escalation_id.clone());
                    info!(
                        query_id = %request.query_id,
                        escalation_id = ack.escalation_id.as_deref().unwrap_or("-"),
                        reason = %request.reason,
                        "escalation accepted"
                    );
                }
                Ok(_) => warn!(query_id = %request.query_id, "cloud declined escalation"),
                Err(e) => warn!(
                    query_id = %request.query_id,
                    reason = %request.reason,
                    error = %e,
                    "escalation failed"
                ),
            }
            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                idle.notify_waiters();
            }
            outcome
        })
    }

    /// Wait for background escalations to finish, at most `timeout`.
    /// Returns how many are still running.
    pub async fn drain_escalations(&self, timeout: Duration) -> usize {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                if self.pending.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(timeout, drained).await.is_err() {
            warn!(
                pending = self.pending.load(Ordering::Acquire),
                "gave up waiting for escalations"
            );
        }
        self.pending.load(Ordering::Acquire)
    }

    /// Apply a new detector configuration. Detectors with a new fingerprint
    /// and removed detectors lose their limiter state and cached models.
    /// Settings-only edits keep both.
    pub fn refresh_detectors(&self, configs: &BTreeMap<String, DetectorConfig>) -> RefreshSummary {
        let summary = self.registry.refresh(configs);
        for id in summary.changed.iter().chain(&summary.removed) {
            self.limiter.reset(id);
            self.cache.invalidate(id);
        }
        summary
    }

    /// Readiness summary.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            detectors: self.registry.len(),
            ready_detectors: self.registry.ready_count(),
            cached_models: self
                .cache
                .keys()
                .into_iter()
                .map(|key| key.detector_id)
                .collect(),
            cache_capacity: self.cache.capacity(),
            unresolved_escalations: self.journal.unresolved(),
            in_flight_escalations: self.pending.load(Ordering::Acquire),
        }
    }

    /// Detector registry.
    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Model cache.
    pub const fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Escalation limiter.
    pub const fn limiter(&self) -> &EscalationLimiter {
        &self.limiter
    }

    /// Recent escalations.
    pub fn journal(&self) -> &EscalationJournal {
        &self.journal
    }
}

fn require_network(detector: &Detector, what: &str) -> Result<()> {
    if detector.profile == InferenceProfile::Offline {
        return Err(Error::ServiceUnavailable {
            reason: format!(
                "detector '{}' is offline-only but {what} needs the cloud",
                detector.id
            ),
        });
    }
    Ok(())
}

fn wants_human_review(detector: &Detector, query: &ImageQuery) -> bool {
    detector.human_review_required || query.human_review == HumanReview::Always
}

async fn wait_for_cloud(
    handle: EscalationHandle,
    limit: Duration,
) -> std::result::Result<EscalationAck, CloudError> {
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => Err(CloudError::Connect {
            attempts: 1,
            reason: format!("escalation task failed: {e}"),
        }),
        Err(_) => Err(CloudError::Timeout { attempts: 1 }),
    }
}
