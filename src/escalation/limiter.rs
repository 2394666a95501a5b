//! Per-detector escalation debounce.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Tracks the last escalation per detector and enforces a minimum spacing.
///
/// Each detector owns one atomic timestamp. `allow` claims the window with a
/// compare-and-swap, so two concurrent callers can never both win it.
#[derive(Debug)]
pub struct EscalationLimiter {
    base: Instant,
    last: DashMap<String, Arc<AtomicU64>>,
}

/// Sentinel for "never escalated".
const NEVER: u64 = 0;

impl Default for EscalationLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl EscalationLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            last: DashMap::new(),
        }
    }

    /// Returns true iff at least `min_interval` has passed since the last
    /// allowed escalation for `detector_id`, recording `now` when it does.
    ///
    /// The first call for a detector is always allowed.
    pub fn allow(&self, detector_id: &str, min_interval: Duration, now: Instant) -> bool {
        let slot = self.slot(detector_id);
        let stamp = self.stamp(now);
        let interval = u64::try_from(min_interval.as_nanos()).unwrap_or(u64::MAX);

        loop {
            let last = slot.load(Ordering::Acquire);
            if last != NEVER && stamp.saturating_sub(last) < interval {
                info!(detector_id, "escalation suppressed by rate limit");
                return false;
            }
            if slot
                .compare_exchange(last, stamp, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Forget the escalation history of one detector.
    pub fn reset(&self, detector_id: &str) {
        self.last.remove(detector_id);
    }

    /// Forget all escalation history.
    pub fn clear(&self) {
        self.last.clear();
    }

    /// When `detector_id` last escalated, if ever.
    pub fn last_escalation(&self, detector_id: &str) -> Option<Instant> {
        let stamp = self.last.get(detector_id)?.load(Ordering::Acquire);
        (stamp != NEVER).then(|| self.base + Duration::from_nanos(stamp - 1))
    }

    fn slot(&self, detector_id: &str) -> Arc<AtomicU64> {
        if let Some(slot) = self.last.get(detector_id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.last
                .entry(detector_id.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(NEVER)))
                .value(),
        )
    }

    // Offset by one so the limiter's own creation instant is distinguishable from NEVER.
    fn stamp(&self, now: Instant) -> u64 {
        let nanos = now.saturating_duration_since(self.base).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX - 1) + 1
    }
}
