//! Escalation to the cloud: rate limiting, audit sampling, the HTTP client,
//! and an in-memory journal of recent escalations.

mod audit;
mod client;
mod limiter;
mod retry;

pub use audit::AuditSampler;
pub use client::{
    CloudAnswer, CloudError, CloudEscalator, EscalationAck, EscalationRequest, HttpCloudClient,
    LocalResult, OfflineEscalator,
};
pub use limiter::EscalationLimiter;
pub use retry::RetryPolicy;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// Why a query was forwarded to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Combined confidence fell below the detector threshold.
    LowConfidence,
    /// The out-of-domain model flagged the input.
    OutOfDomain,
    /// Randomly selected for passive quality auditing.
    AuditSample,
    /// The detector or request demands a human answer.
    HumanReviewRequired,
}

impl EscalationReason {
    /// Wire name of the reason.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::OutOfDomain => "out_of_domain",
            Self::AuditSample => "audit_sample",
            Self::HumanReviewRequired => "human_review_required",
        }
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One escalation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationRecord {
    /// Escalated query.
    pub query_id: String,
    /// Detector of the query.
    pub detector_id: String,
    /// Why it was escalated.
    pub reason: EscalationReason,
    /// When the attempt was made.
    pub created_at: DateTime<Utc>,
    /// Whether the cloud acknowledged it.
    pub resolved: bool,
    /// Identifier assigned by the cloud on acknowledgement.
    pub escalation_id: Option<String>,
}

impl EscalationRecord {
    /// Unresolved record stamped with the current time.
    pub fn new(query_id: &str, detector_id: &str, reason: EscalationReason) -> Self {
        Self {
            query_id: query_id.to_string(),
            detector_id: detector_id.to_string(),
            reason,
            created_at: Utc::now(),
            resolved: false,
            escalation_id: None,
        }
    }
}

/// Bounded ring of recent escalation records. The oldest record is dropped when full.
#[derive(Debug)]
pub struct EscalationJournal {
    capacity: usize,
    records: Mutex<VecDeque<EscalationRecord>>,
}

impl EscalationJournal {
    /// Journal that keeps at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.clamp(1, 1024))),
        }
    }

    /// Append a record.
    pub fn record(&self, record: EscalationRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Mark the most recent record for `query_id` as acknowledged.
    /// Returns false if no such record is still in the journal.
    pub fn resolve(&self, query_id: &str, escalation_id: Option<String>) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.iter_mut().rev().find(|r| r.query_id == query_id) else {
            return false;
        };
        record.resolved = true;
        record.escalation_id = escalation_id;
        true
    }

    /// Copy of the current records, oldest first.
    pub fn snapshot(&self) -> Vec<EscalationRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of records not yet acknowledged.
    pub fn unresolved(&self) -> usize {
        self.records.lock().iter().filter(|r| !r.resolved).count()
    }
}
