//! Decision stages and the threshold rule.

use crate::config::InferenceProfile;
use crate::escalation::EscalationReason;
use crate::inference::CombinedResult;
use crate::models::ModelPair;
use std::sync::Arc;

use super::query::QueryOutcome;

/// Where a query is in the decision pipeline.
#[derive(Debug)]
pub enum Stage {
    /// Query accepted by the engine.
    Received,
    /// Asynchronous submissions go straight to the cloud.
    CheckAsync,
    /// Human review bypasses local inference.
    CheckHumanReview,
    /// Obtain the model pair.
    CheckInferenceAvailable,
    /// Run the models.
    LocalInference(Arc<ModelPair>),
    /// Compare the combined confidence with the detector threshold.
    CheckThreshold(CombinedResult),
    /// Answer with the local prediction.
    ReturnLocal {
        /// Local answer.
        result: CombinedResult,
        /// Why the answer is not confident, if it is not.
        reason: Option<EscalationReason>,
    },
    /// Forward to the cloud. A failed inference arrives here as a
    /// zero-confidence result.
    Escalate {
        /// Local answer to fall back on.
        result: CombinedResult,
        /// Why the query is escalated.
        reason: EscalationReason,
    },
    /// Possibly forward a local answer for auditing.
    CheckAudit,
    /// Finished.
    Done(QueryOutcome),
}

impl Stage {
    /// Stage name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::CheckAsync => "CHECK_ASYNC",
            Self::CheckHumanReview => "CHECK_HUMAN_REVIEW",
            Self::CheckInferenceAvailable => "CHECK_INFERENCE_AVAILABLE",
            Self::LocalInference(_) => "LOCAL_INFERENCE",
            Self::CheckThreshold(_) => "CHECK_THRESHOLD",
            Self::ReturnLocal { .. } => "RETURN_LOCAL",
            Self::Escalate { .. } => "ESCALATE",
            Self::CheckAudit => "CHECK_AUDIT",
            Self::Done(_) => "DONE",
        }
    }
}

/// Outcome of the threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDecision {
    /// Confident and in domain.
    Confident,
    /// Not confident, but the detector never uses the network.
    BestEffortOffline,
    /// Not confident; forward to the cloud.
    Escalate(EscalationReason),
}

/// Decide what to do with a local answer.
///
/// Meeting the threshold exactly counts as confident.
pub fn decide(
    final_confidence: f32,
    is_out_of_domain: bool,
    threshold: f32,
    profile: InferenceProfile,
) -> ThresholdDecision {
    if final_confidence >= threshold && !is_out_of_domain {
        return ThresholdDecision::Confident;
    }
    if profile == InferenceProfile::Offline {
        return ThresholdDecision::BestEffortOffline;
    }
    if is_out_of_domain {
        ThresholdDecision::Escalate(EscalationReason::OutOfDomain)
    } else {
        ThresholdDecision::Escalate(EscalationReason::LowConfidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_to_threshold_is_confident() {
        assert_eq!(
            decide(0.85, false, 0.85, InferenceProfile::Default),
            ThresholdDecision::Confident
        );
    }

    #[test]
    fn test_below_threshold_escalates_with_low_confidence() {
        assert_eq!(
            decide(0.84, false, 0.85, InferenceProfile::Aggressive),
            ThresholdDecision::Escalate(EscalationReason::LowConfidence)
        );
    }

    #[test]
    fn test_out_of_domain_escalates_even_when_confident() {
        assert_eq!(
            decide(0.95, true, 0.85, InferenceProfile::Default),
            ThresholdDecision::Escalate(EscalationReason::OutOfDomain)
        );
    }

    #[test]
    fn test_offline_profile_never_escalates() {
        assert_eq!(
            decide(0.1, true, 0.85, InferenceProfile::Offline),
            ThresholdDecision::BestEffortOffline
        );
    }
}
