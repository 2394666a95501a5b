//! Bounded LRU of loaded model pairs with single-flight loading.
//!
//! Hits take the LRU lock only long enough to bump a use counter and clone an
//! `Arc`. Misses are coalesced per key: the first caller spawns the load, later
//! callers await the same shared future. Loads run as their own tasks, so a
//! caller going away does not abandon a half-finished fetch.

use super::{ModelKey, ModelLoader, ModelPair, ModelRole, ModelStore};
use crate::detector::Detector;
use crate::error::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

type LoadOutcome = std::result::Result<Arc<ModelPair>, String>;
type InflightLoad = Shared<BoxFuture<'static, LoadOutcome>>;

struct Slot {
    pair: Arc<ModelPair>,
    last_used: u64,
}

#[derive(Default)]
struct Lru {
    slots: HashMap<ModelKey, Slot>,
    clock: u64,
    /// Bumped by `invalidate`; a load started under an older generation must
    /// not publish its pair.
    generations: HashMap<String, u64>,
}

impl Lru {
    fn generation(&self, detector_id: &str) -> u64 {
        self.generations.get(detector_id).copied().unwrap_or(0)
    }

    fn get(&mut self, key: &ModelKey) -> Option<Arc<ModelPair>> {
        self.clock += 1;
        let clock = self.clock;
        self.slots.get_mut(key).map(|slot| {
            slot.last_used = clock;
            Arc::clone(&slot.pair)
        })
    }

    fn insert(&mut self, capacity: usize, pair: Arc<ModelPair>) -> Option<ModelKey> {
        self.clock += 1;
        let key = pair.key();
        let mut evicted = None;
        if !self.slots.contains_key(&key) && self.slots.len() >= capacity {
            evicted = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = &evicted {
                self.slots.remove(oldest);
            }
        }
        self.slots.insert(
            key,
            Slot {
                pair,
                last_used: self.clock,
            },
        );
        evicted
    }
}

struct Inner {
    capacity: usize,
    fetch_timeout: Duration,
    store: Arc<dyn ModelStore>,
    loader: Arc<dyn ModelLoader>,
    lru: Mutex<Lru>,
    inflight: DashMap<ModelKey, InflightLoad>,
}

/// Shared handle to the model cache.
#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .field("inflight", &self.inner.inflight.len())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    /// Cache holding at most `capacity` pairs (minimum 1).
    pub fn new(
        capacity: usize,
        fetch_timeout: Duration,
        store: Arc<dyn ModelStore>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                fetch_timeout,
                store,
                loader,
                lru: Mutex::new(Lru::default()),
                inflight: DashMap::new(),
            }),
        }
    }

    /// Return the loaded pair for the detector's current fingerprint, loading
    /// it on a miss.
    pub async fn get_or_load(&self, detector: &Arc<Detector>) -> Result<Arc<ModelPair>> {
        let key = ModelKey::new(detector.id.clone(), detector.fingerprint.clone());
        if let Some(pair) = self.inner.lru.lock().get(&key) {
            return Ok(pair);
        }

        let load = match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(detector_id = %detector.id, "joining in-flight model load");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // A load may have finished between the first check and taking the entry.
                if let Some(pair) = self.inner.lru.lock().get(&key) {
                    return Ok(pair);
                }
                let load = self.spawn_load(key, Arc::clone(detector));
                entry.insert(load.clone());
                load
            }
        };

        load.await.map_err(|reason| Error::ModelUnavailable {
            detector_id: detector.id.clone(),
            reason,
        })
    }

    fn spawn_load(&self, key: ModelKey, detector: Arc<Detector>) -> InflightLoad {
        let inner = Arc::clone(&self.inner);
        let generation = inner.lru.lock().generation(&detector.id);
        let handle = tokio::spawn(async move {
            let outcome = inner.load(&detector).await.map(|pair| {
                let pair = Arc::new(pair);
                let mut lru = inner.lru.lock();
                if lru.generation(&detector.id) != generation {
                    debug!(
                        detector_id = %detector.id,
                        "detector invalidated during load, not caching pair"
                    );
                    return pair;
                }
                if let Some(evicted) = lru.insert(inner.capacity, Arc::clone(&pair)) {
                    info!(
                        detector_id = %evicted.detector_id,
                        "evicted least recently used model pair"
                    );
                }
                pair
            });
            inner.inflight.remove(&key);
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(format!("model load task failed: {e}")))
        }
        .boxed()
        .shared()
    }

    /// Drop every cached version of a detector. Returns how many were dropped.
    ///
    /// Loads for the detector still in flight finish for their waiters but are
    /// not cached.
    pub fn invalidate(&self, detector_id: &str) -> usize {
        let mut lru = self.inner.lru.lock();
        *lru.generations.entry(detector_id.to_string()).or_insert(0) += 1;
        let before = lru.slots.len();
        lru.slots.retain(|key, _| key.detector_id != detector_id);
        let dropped = before - lru.slots.len();
        if dropped > 0 {
            debug!(detector_id, dropped, "invalidated cached model pairs");
        }
        dropped
    }

    /// Whether a pair for `key` is loaded. Does not count as a use.
    pub fn contains(&self, key: &ModelKey) -> bool {
        self.inner.lru.lock().slots.contains_key(key)
    }

    /// Loaded keys, sorted.
    pub fn keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<_> = self.inner.lru.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of loaded pairs.
    pub fn len(&self) -> usize {
        self.inner.lru.lock().slots.len()
    }

    /// Whether nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of loaded pairs.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Inner {
    async fn load(&self, detector: &Arc<Detector>) -> std::result::Result<ModelPair, String> {
        let started = Instant::now();

        let fetch = async {
            let primary = self.store.fetch(&detector.id, ModelRole::Primary).await?;
            let oodd = if detector.oodd_enabled {
                self.store.fetch(&detector.id, ModelRole::Oodd).await?
            } else {
                None
            };
            Ok::<_, Error>((primary, oodd))
        };

        let (primary, oodd) = tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .map_err(|_| {
                format!(
                    "model fetch timed out after {} ms",
                    self.fetch_timeout.as_millis()
                )
            })?
            .map_err(reason_of)?;
        let primary = primary.ok_or_else(|| "model store has no primary model".to_string())?;

        let loader = Arc::clone(&self.loader);
        let detector = Arc::clone(detector);
        let pair = tokio::task::spawn_blocking(move || {
            build_pair(loader.as_ref(), &detector, &primary, oodd.as_deref())
        })
        .await
        .map_err(|e| format!("model load task failed: {e}"))?
        .map_err(reason_of)?;

        info!(
            detector_id = %pair.detector_id,
            checksum = %pair.checksum,
            has_oodd = pair.oodd.is_some(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "model pair loaded"
        );
        Ok(pair)
    }
}

fn build_pair(
    loader: &dyn ModelLoader,
    detector: &Detector,
    primary: &[u8],
    oodd: Option<&[u8]>,
) -> Result<ModelPair> {
    let mut hasher = Sha256::new();
    hasher.update(primary);
    if let Some(oodd) = oodd {
        hasher.update(oodd);
    }
    let checksum = format!("{:x}", hasher.finalize());

    let primary = loader.load_primary(detector, primary)?;
    let oodd = oodd
        .map(|bytes| loader.load_oodd(detector, bytes))
        .transpose()?;

    Ok(ModelPair::new(
        detector.id.clone(),
        detector.fingerprint.clone(),
        checksum,
        primary,
        oodd,
    ))
}

fn reason_of(e: Error) -> String {
    match e {
        Error::ModelUnavailable { reason, .. } => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::inference::{OutOfDomainModel, Prediction, PrimaryModel};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed;

    impl PrimaryModel for Fixed {
        fn predict(&self, _image: &[u8]) -> Result<Prediction> {
            Ok(Prediction::new("YES", 0.9))
        }
    }

    impl OutOfDomainModel for Fixed {
        fn in_domain_score(&self, _image: &[u8]) -> Result<f32> {
            Ok(1.0)
        }
    }

    struct FixedLoader;

    impl ModelLoader for FixedLoader {
        fn load_primary(&self, _d: &Detector, _b: &[u8]) -> Result<Arc<dyn PrimaryModel>> {
            Ok(Arc::new(Fixed))
        }

        fn load_oodd(&self, _d: &Detector, _b: &[u8]) -> Result<Arc<dyn OutOfDomainModel>> {
            Ok(Arc::new(Fixed))
        }
    }

    #[derive(Default)]
    struct CountingStore {
        primary_fetches: AtomicUsize,
        delay: Duration,
        missing: bool,
    }

    #[async_trait]
    impl ModelStore for CountingStore {
        async fn fetch(&self, _detector_id: &str, role: ModelRole) -> Result<Option<Bytes>> {
            if role == ModelRole::Primary {
                self.primary_fetches.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            if self.missing {
                return Ok(None);
            }
            Ok(Some(Bytes::from_static(b"model")))
        }
    }

    fn detector(id: &str) -> Arc<Detector> {
        Arc::new(Detector::from_config(id, &DetectorConfig::default()).unwrap())
    }

    fn cache(capacity: usize, store: Arc<CountingStore>) -> ModelCache {
        ModelCache::new(capacity, Duration::from_secs(1), store, Arc::new(FixedLoader))
    }

    #[tokio::test]
    async fn test_hit_does_not_refetch() {
        let store = Arc::new(CountingStore::default());
        let cache = cache(2, Arc::clone(&store));
        let det = detector("det_a");

        cache.get_or_load(&det).await.unwrap();
        cache.get_or_load(&det).await.unwrap();
        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_and_reload() {
        let store = Arc::new(CountingStore::default());
        let cache = cache(2, Arc::clone(&store));
        let (a, b, c) = (detector("det_a"), detector("det_b"), detector("det_c"));

        cache.get_or_load(&a).await.unwrap();
        cache.get_or_load(&b).await.unwrap();
        cache.get_or_load(&a).await.unwrap();
        cache.get_or_load(&c).await.unwrap();

        let ids: Vec<_> = cache.keys().into_iter().map(|k| k.detector_id).collect();
        assert_eq!(ids, ["det_a", "det_c"]);

        cache.get_or_load(&b).await.unwrap();
        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 4);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_fetch() {
        let store = Arc::new(CountingStore {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = cache(2, Arc::clone(&store));
        let det = detector("det_a");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let det = Arc::clone(&det);
                tokio::spawn(async move { cache.get_or_load(&det).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_model_is_unavailable_and_not_cached() {
        let store = Arc::new(CountingStore {
            missing: true,
            ..Default::default()
        });
        let cache = cache(2, Arc::clone(&store));
        let det = detector("det_a");

        assert!(matches!(
            cache.get_or_load(&det).await,
            Err(Error::ModelUnavailable { .. })
        ));
        assert!(cache.get_or_load(&det).await.is_err());
        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let store = Arc::new(CountingStore {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let cache = cache(2, store);

        let err = cache.get_or_load(&detector("det_a")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_fingerprint_change_loads_new_version() {
        let store = Arc::new(CountingStore::default());
        let cache = cache(4, Arc::clone(&store));

        let v1 = detector("det_a");
        let v2 = Arc::new(
            Detector::from_config(
                "det_a",
                &DetectorConfig {
                    model_version: Some("v2".to_string()),
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let first = cache.get_or_load(&v1).await.unwrap();
        let second = cache.get_or_load(&v2).await.unwrap();
        assert_ne!(first.version, second.version);
        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 2);

        assert_eq!(cache.invalidate("det_a"), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_load_discards_stale_pair() {
        let store = Arc::new(CountingStore {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let cache = cache(2, Arc::clone(&store));
        let det = detector("det_a");

        let pending = {
            let cache = cache.clone();
            let det = Arc::clone(&det);
            tokio::spawn(async move { cache.get_or_load(&det).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 1);

        assert_eq!(cache.invalidate("det_a"), 0);
        pending.await.unwrap().unwrap();
        assert!(cache.is_empty());

        cache.get_or_load(&det).await.unwrap();
        assert_eq!(store.primary_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }
}
