//! Snapshot of the configured detectors.

use super::{Detector, fingerprint};
use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Load outcome for one detector.
#[derive(Debug, Clone)]
pub enum DetectorState {
    /// Configuration is valid.
    Ready(Arc<Detector>),
    /// Configuration was rejected. Queries get `ConfigInvalid` until it is fixed.
    Unusable {
        /// Why the configuration was rejected.
        reason: String,
    },
}

impl DetectorState {
    /// Whether queries can be served.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    configs: BTreeMap<String, DetectorConfig>,
    states: HashMap<String, DetectorState>,
}

/// Detectors that a refresh added, removed, or edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Newly configured detectors.
    pub added: Vec<String>,
    /// Detectors no longer configured.
    pub removed: Vec<String>,
    /// Detectors whose fingerprint changed. Their models and escalation
    /// history no longer apply.
    pub changed: Vec<String>,
    /// Detectors with edited settings (threshold, profile, spacing) under the
    /// same fingerprint.
    pub updated: Vec<String>,
}

impl RefreshSummary {
    /// Whether the refresh changed anything.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.updated.is_empty()
    }
}

/// Holds the current detector snapshot. Refreshes replace it wholesale.
#[derive(Debug, Default)]
pub struct DetectorRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl DetectorRegistry {
    /// Validate and load a detector set.
    pub fn load(configs: &BTreeMap<String, DetectorConfig>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(build(configs))),
        }
    }

    /// Resolve a detector for a query.
    pub fn lookup(&self, detector_id: &str) -> Result<Arc<Detector>> {
        let snapshot = self.current();
        match snapshot.states.get(detector_id) {
            Some(DetectorState::Ready(detector)) => Ok(Arc::clone(detector)),
            Some(DetectorState::Unusable { reason }) => Err(Error::ConfigInvalid {
                detector_id: detector_id.to_string(),
                reason: reason.clone(),
            }),
            None => Err(Error::DetectorNotFound {
                detector_id: detector_id.to_string(),
            }),
        }
    }

    /// Replace the snapshot with a freshly validated one.
    pub fn refresh(&self, configs: &BTreeMap<String, DetectorConfig>) -> RefreshSummary {
        let next = Arc::new(build(configs));
        let previous = std::mem::replace(&mut *self.snapshot.write(), Arc::clone(&next));

        let mut summary = RefreshSummary::default();
        for (id, config) in &next.configs {
            match previous.configs.get(id) {
                None => summary.added.push(id.clone()),
                Some(old) if fingerprint(old) != fingerprint(config) => {
                    summary.changed.push(id.clone());
                }
                Some(old) if old != config => summary.updated.push(id.clone()),
                Some(_) => {}
            }
        }
        summary.removed = previous
            .configs
            .keys()
            .filter(|id| !next.configs.contains_key(*id))
            .cloned()
            .collect();

        if !summary.is_empty() {
            info!(
                added = summary.added.len(),
                removed = summary.removed.len(),
                changed = summary.changed.len(),
                updated = summary.updated.len(),
                "detector configuration refreshed"
            );
        }
        summary
    }

    /// All detectors sorted by id.
    pub fn list(&self) -> Vec<(String, DetectorState)> {
        let snapshot = self.current();
        let mut entries: Vec<_> = snapshot
            .states
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of configured detectors, usable or not.
    pub fn len(&self) -> usize {
        self.current().states.len()
    }

    /// Whether no detectors are configured.
    pub fn is_empty(&self) -> bool {
        self.current().states.is_empty()
    }

    /// Number of detectors that can serve queries.
    pub fn ready_count(&self) -> usize {
        self.current().states.values().filter(|s| s.is_ready()).count()
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }
}

fn build(configs: &BTreeMap<String, DetectorConfig>) -> Snapshot {
    let states = configs
        .iter()
        .map(|(id, config)| {
            let state = match Detector::from_config(id, config) {
                Ok(detector) => DetectorState::Ready(Arc::new(detector)),
                Err(e) => {
                    warn!(detector_id = %id, error = %e, "detector marked unusable");
                    DetectorState::Unusable {
                        reason: match e {
                            Error::ConfigInvalid { reason, .. } => reason,
                            other => other.to_string(),
                        },
                    }
                }
            };
            (id.clone(), state)
        })
        .collect();

    Snapshot {
        configs: configs.clone(),
        states,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DetectorMode;

    fn configs() -> BTreeMap<String, DetectorConfig> {
        let mut map = BTreeMap::new();
        map.insert("det_ok".to_string(), DetectorConfig::default());
        map.insert(
            "det_bad".to_string(),
            DetectorConfig {
                mode: DetectorMode::Multiclass,
                class_names: vec!["one".to_string()],
                ..Default::default()
            },
        );
        map
    }

    #[test]
    fn test_lookup_outcomes() {
        let registry = DetectorRegistry::load(&configs());

        assert!(registry.lookup("det_ok").is_ok());
        assert!(matches!(
            registry.lookup("det_bad"),
            Err(Error::ConfigInvalid { .. })
        ));
        assert!(matches!(
            registry.lookup("det_missing"),
            Err(Error::DetectorNotFound { .. })
        ));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ready_count(), 1);
    }

    #[test]
    fn test_refresh_reports_changes() {
        let registry = DetectorRegistry::load(&configs());

        let mut next = configs();
        next.remove("det_bad");
        next.get_mut("det_ok").unwrap().model_version = Some("v2".to_string());
        next.insert("det_new".to_string(), DetectorConfig::default());

        let summary = registry.refresh(&next);
        assert_eq!(summary.added, ["det_new"]);
        assert_eq!(summary.removed, ["det_bad"]);
        assert_eq!(summary.changed, ["det_ok"]);
        assert!(summary.updated.is_empty());

        let detector = registry.lookup("det_ok").unwrap();
        assert_eq!(detector.model_version.as_deref(), Some("v2"));
        assert!(matches!(
            registry.lookup("det_bad"),
            Err(Error::DetectorNotFound { .. })
        ));
    }

    #[test]
    fn test_threshold_edit_is_an_update_not_a_change() {
        let registry = DetectorRegistry::load(&configs());

        let mut next = configs();
        next.get_mut("det_ok").unwrap().confidence_threshold = 0.5;

        let summary = registry.refresh(&next);
        assert!(summary.changed.is_empty());
        assert_eq!(summary.updated, ["det_ok"]);

        let detector = registry.lookup("det_ok").unwrap();
        assert!((detector.confidence_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_refresh_fixing_config_makes_detector_usable() {
        let registry = DetectorRegistry::load(&configs());

        let mut next = configs();
        next.get_mut("det_bad")
            .unwrap()
            .class_names
            .push("two".to_string());
        registry.refresh(&next);

        assert!(registry.lookup("det_bad").is_ok());
    }

    #[test]
    fn test_identical_refresh_is_empty() {
        let registry = DetectorRegistry::load(&configs());
        assert!(registry.refresh(&configs()).is_empty());
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = DetectorRegistry::load(&configs());
        let ids: Vec<_> = registry.list().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["det_bad", "det_ok"]);
    }
}
