//! Image queries and the responses built from them.

use crate::constants::IMAGE_QUERY_ID_PREFIX;
use crate::error::{Error, Result};
use crate::escalation::{CloudAnswer, EscalationReason};
use crate::inference::{CombinedResult, Roi};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Who produced a query's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Local inference on this node.
    Edge,
    /// The cloud service.
    Cloud,
}

/// Per-request human review override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HumanReview {
    /// Follow the detector configuration.
    #[default]
    Default,
    /// Always send this query to human review.
    Always,
}

impl std::str::FromStr for HumanReview {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown human_review value: {other}")),
        }
    }
}

/// Answer attached to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Final label.
    pub label: String,
    /// Final confidence.
    pub confidence: f32,
    /// Object count for counting and bounding box detectors.
    pub count: Option<u32>,
    /// Regions for bounding box detectors.
    pub rois: Vec<Roi>,
    /// Who produced the answer.
    pub source: ResultSource,
    /// Why the answer is not a confident local one, if it is not.
    pub reason: Option<EscalationReason>,
}

impl QueryResult {
    /// Local answer from a combined result.
    pub fn local(result: CombinedResult, reason: Option<EscalationReason>) -> Self {
        Self {
            label: result.prediction.label,
            confidence: result.final_confidence,
            count: result.prediction.count,
            rois: result.prediction.rois,
            source: ResultSource::Edge,
            reason,
        }
    }

    /// Answer decided by the cloud.
    pub fn cloud(answer: CloudAnswer, reason: EscalationReason) -> Self {
        Self {
            label: answer.label,
            confidence: answer.confidence,
            count: None,
            rois: Vec::new(),
            source: ResultSource::Cloud,
            reason: Some(reason),
        }
    }
}

/// One image submitted against one detector.
///
/// The result can be attached once. After that only the escalated flag may change.
#[derive(Debug, Clone)]
pub struct ImageQuery {
    /// Query identifier.
    pub id: String,
    /// Target detector.
    pub detector_id: String,
    /// Encoded image.
    pub image: Bytes,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Whether the caller wants a 202 and no local answer.
    pub want_async: bool,
    /// Human review override.
    pub human_review: HumanReview,
    /// Caller-supplied source metadata.
    pub metadata: HashMap<String, String>,
    result: Option<QueryResult>,
    escalated: bool,
}

impl ImageQuery {
    /// New synchronous query with a generated id.
    pub fn new(detector_id: impl Into<String>, image: impl Into<Bytes>) -> Self {
        Self {
            id: format!("{IMAGE_QUERY_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()),
            detector_id: detector_id.into(),
            image: image.into(),
            created_at: Utc::now(),
            want_async: false,
            human_review: HumanReview::Default,
            metadata: HashMap::new(),
            result: None,
            escalated: false,
        }
    }

    /// Request asynchronous handling.
    #[must_use]
    pub fn with_async(mut self, want_async: bool) -> Self {
        self.want_async = want_async;
        self
    }

    /// Set the human review override.
    #[must_use]
    pub fn with_human_review(mut self, human_review: HumanReview) -> Self {
        self.human_review = human_review;
        self
    }

    /// Attach source metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach the answer. Fails if one is already attached.
    pub fn attach_result(&mut self, result: QueryResult) -> Result<()> {
        if self.result.is_some() {
            return Err(Error::ResultAlreadyAttached {
                query_id: self.id.clone(),
            });
        }
        self.result = Some(result);
        Ok(())
    }

    /// Record that the query was forwarded to the cloud.
    pub const fn mark_escalated(&mut self) {
        self.escalated = true;
    }

    /// Attached answer, if any.
    pub const fn result(&self) -> Option<&QueryResult> {
        self.result.as_ref()
    }

    /// Whether the query was forwarded to the cloud.
    pub const fn escalated(&self) -> bool {
        self.escalated
    }

    /// Response body for an answered query.
    pub fn to_response(&self) -> Result<QueryResponse> {
        let result = self.result.as_ref().ok_or_else(|| Error::Internal {
            message: format!("image query '{}' has no result", self.id),
        })?;
        Ok(QueryResponse {
            id: self.id.clone(),
            detector_id: self.detector_id.clone(),
            label: result.label.clone(),
            confidence: result.confidence,
            count: result.count,
            rois: (!result.rois.is_empty()).then(|| result.rois.clone()),
            escalated: self.escalated,
            source: result.source,
            reason: result.reason,
            created_at: self.created_at,
        })
    }

    /// Response body for an accepted asynchronous query.
    pub fn to_accepted(&self) -> AcceptedResponse {
        AcceptedResponse {
            id: self.id.clone(),
            detector_id: self.detector_id.clone(),
            status: "accepted",
        }
    }
}

/// Body returned for an answered query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    /// Query identifier.
    pub id: String,
    /// Detector identifier.
    pub detector_id: String,
    /// Final label.
    pub label: String,
    /// Final confidence.
    pub confidence: f32,
    /// Object count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Detected regions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rois: Option<Vec<Roi>>,
    /// Whether the query was forwarded to the cloud.
    pub escalated: bool,
    /// Who produced the answer.
    pub source: ResultSource,
    /// Why the answer is not a confident local one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EscalationReason>,
    /// Query creation time.
    pub created_at: DateTime<Utc>,
}

/// Body returned for an accepted asynchronous query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedResponse {
    /// Query identifier.
    pub id: String,
    /// Detector identifier.
    pub detector_id: String,
    /// Always `accepted`.
    pub status: &'static str,
}

/// What the engine did with a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The query has an answer.
    Answered(QueryResponse),
    /// The query was handed to the cloud; the answer arrives there.
    Accepted(AcceptedResponse),
}

impl QueryOutcome {
    /// The answer, if the query was answered.
    pub const fn answered(&self) -> Option<&QueryResponse> {
        match self {
            Self::Answered(response) => Some(response),
            Self::Accepted(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn result() -> QueryResult {
        QueryResult {
            label: "YES".to_string(),
            confidence: 0.95,
            count: None,
            rois: Vec::new(),
            source: ResultSource::Edge,
            reason: None,
        }
    }

    #[test]
    fn test_ids_are_prefixed_and_unique() {
        let a = ImageQuery::new("det", Bytes::new());
        let b = ImageQuery::new("det", Bytes::new());
        assert!(a.id.starts_with("iq_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_result_attaches_once() {
        let mut query = ImageQuery::new("det", Bytes::new());
        query.attach_result(result()).unwrap();
        assert!(matches!(
            query.attach_result(result()),
            Err(Error::ResultAlreadyAttached { .. })
        ));
        assert_eq!(query.result().unwrap().confidence, 0.95);
    }

    #[test]
    fn test_escalated_flag_can_change_after_result() {
        let mut query = ImageQuery::new("det", Bytes::new());
        query.attach_result(result()).unwrap();
        query.mark_escalated();
        assert!(query.to_response().unwrap().escalated);
    }

    #[test]
    fn test_response_without_result_is_an_error() {
        let query = ImageQuery::new("det", Bytes::new());
        assert!(query.to_response().is_err());
    }

    #[test]
    fn test_response_json_omits_empty_fields() {
        let mut query = ImageQuery::new("det_a", Bytes::new());
        query.attach_result(result()).unwrap();
        let json = serde_json::to_value(query.to_response().unwrap()).unwrap();
        assert_eq!(json["source"], "edge");
        assert!(json.get("rois").is_none());
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_human_review_from_str() {
        assert_eq!("ALWAYS".parse::<HumanReview>().ok(), Some(HumanReview::Always));
        assert!("sometimes".parse::<HumanReview>().is_err());
    }
}
