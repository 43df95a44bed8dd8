use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::FaceIdError;
use crate::artifact::{ArtifactStore, NoArtifacts};
use crate::cosine::{check_embedding, cosine_distance};
use crate::identity::{Identities, Identity, IdentityKind, generate_label};
use crate::store::{IdentityStore, MemoryStore};

/// Default cosine distance below which a face matches a stored identity.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

const EVENT_CAPACITY: usize = 64;

/// Controls matching behavior.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum cosine distance (exclusive) for a match.
    /// Lower = stricter (more new identities), higher = more lenient.
    /// Default: 0.6.
    pub threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Config {
    fn with_defaults(mut self) -> Self {
        if self.threshold == 0.0 || !self.threshold.is_finite() {
            self.threshold = DEFAULT_THRESHOLD;
        }
        self
    }
}

/// Result of [`Registry::match_or_create`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// The resolved identity label.
    pub label: String,
    /// Distance to the nearest stored identity before any insert;
    /// `None` when the store was empty.
    pub distance: Option<f32>,
    /// True if a new identity was created for this embedding.
    pub created: bool,
}

/// A committed change to the identity set, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Renamed { from: String, to: String },
    Deleted { labels: Vec<String> },
    Merged { sources: Vec<String>, into: String },
}

pub(crate) struct RegistryInner {
    pub(crate) cfg: Config,
    pub(crate) identities: Identities,
}

/// Authoritative in-memory mirror of the identity store.
///
/// Every read and write of the store goes through one mutex, so the
/// matching loop and administrative operations can share a registry
/// without losing updates.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    pub(crate) store: Box<dyn IdentityStore>,
    pub(crate) artifacts: Box<dyn ArtifactStore>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Registry {
    /// Opens a registry, loading the current contents of `store`.
    pub fn open(
        cfg: Config,
        store: Box<dyn IdentityStore>,
        artifacts: Box<dyn ArtifactStore>,
    ) -> Result<Self, FaceIdError> {
        let identities = store.load()?;
        info!(count = identities.len(), "identity store loaded");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Mutex::new(RegistryInner {
                cfg: cfg.with_defaults(),
                identities,
            }),
            store,
            artifacts,
            events,
        })
    }

    /// Creates an empty registry backed by an in-memory store and no artifacts.
    pub fn with_memory_store(cfg: Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(RegistryInner {
                cfg: cfg.with_defaults(),
                identities: Identities::new(),
            }),
            store: Box::new(MemoryStore::new()),
            artifacts: Box::new(NoArtifacts),
            events,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock()
    }

    /// Queues a committed change for subscribers. Called with the lock
    /// held, so a change is visible before any later match result.
    pub(crate) fn publish(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Subscribes to committed lifecycle changes.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Resolves `emb` to an identity label, creating and persisting a new
    /// identity when nothing stored is strictly closer than the threshold.
    ///
    /// Matching never modifies stored vectors.
    pub fn match_or_create(&self, emb: &[f32]) -> Result<MatchOutcome, FaceIdError> {
        check_embedding(emb).map_err(|e| FaceIdError::InvalidEmbedding(e.to_string()))?;

        let mut inner = self.lock();

        let nearest = nearest_in(&inner.identities, emb);
        if let Some((label, dist)) = &nearest {
            if *dist < inner.cfg.threshold {
                return Ok(MatchOutcome {
                    label: label.clone(),
                    distance: Some(*dist),
                    created: false,
                });
            }
        }

        let label = generate_label();
        inner.identities.insert(
            label.clone(),
            Identity {
                kind: IdentityKind::Generated,
                embedding: emb.to_vec(),
            },
        );
        if let Err(e) = self.store.save(&inner.identities) {
            inner.identities.remove(&label);
            warn!(error = %e, "failed to persist new identity");
            return Err(e);
        }

        info!(%label, distance = ?nearest.as_ref().map(|n| n.1), "new identity");
        Ok(MatchOutcome {
            label,
            distance: nearest.map(|n| n.1),
            created: true,
        })
    }

    /// Returns the nearest stored identity and its cosine distance,
    /// without touching the store.
    pub fn nearest(&self, emb: &[f32]) -> Option<(String, f32)> {
        nearest_in(&self.lock().identities, emb)
    }

    /// Returns the identity stored under `label`.
    pub fn get(&self, label: &str) -> Option<Identity> {
        self.lock().identities.get(label).cloned()
    }

    /// Reports whether `label` is a stored identity.
    pub fn contains(&self, label: &str) -> bool {
        self.lock().identities.contains_key(label)
    }

    /// Returns the name shown for `label` in logs and UIs.
    ///
    /// Names are labels, so this is the label itself; it is resolved at
    /// call time so that renames show up immediately.
    pub fn display_name(&self, label: &str) -> String {
        label.to_string()
    }

    /// Returns a copy of all identities.
    pub fn snapshot(&self) -> Identities {
        self.lock().identities.clone()
    }

    /// Returns the number of stored identities.
    pub fn len(&self) -> usize {
        self.lock().identities.len()
    }

    /// Returns true if no identities are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the active threshold.
    pub fn threshold(&self) -> f32 {
        self.lock().cfg.threshold
    }

    /// Adjusts matching strictness at runtime.
    pub fn set_threshold(&self, t: f32) {
        let mut inner = self.lock();
        inner.cfg = Config { threshold: t }.with_defaults();
    }

    /// Stores a face crop for `label` unless one exists. Failures are logged.
    pub fn save_artifact(&self, label: &str, jpeg: &[u8]) {
        if let Err(e) = self.artifacts.save_if_absent(label, jpeg) {
            warn!(%label, error = %e, "failed to save face crop");
        }
    }

    /// Reports whether `label` has a face crop.
    pub fn has_artifact(&self, label: &str) -> bool {
        self.artifacts.exists(label)
    }
}

/// Linear scan for the minimum cosine distance. Ties keep the first
/// label in iteration order, which for [`Identities`] is lexicographic.
fn nearest_in(identities: &Identities, emb: &[f32]) -> Option<(String, f32)> {
    let mut best: Option<(&String, f32)> = None;
    for (label, ident) in identities {
        let dist = cosine_distance(emb, &ident.embedding);
        match best {
            Some((_, d)) if dist >= d => {}
            _ => best = Some((label, dist)),
        }
    }
    best.map(|(l, d)| (l.clone(), d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(v: &[f32]) -> Identity {
        Identity {
            kind: IdentityKind::Named,
            embedding: v.to_vec(),
        }
    }

    fn registry_with(entries: &[(&str, &[f32])]) -> Registry {
        let mut ids = Identities::new();
        for (label, v) in entries {
            ids.insert(label.to_string(), ident(v));
        }
        Registry::open(
            Config::default(),
            Box::new(MemoryStore::with_identities(ids)),
            Box::new(NoArtifacts),
        )
        .unwrap()
    }

    /// Unit vector in the xy-plane at cosine distance `d` from [1, 0].
    fn at_distance(d: f32) -> Vec<f32> {
        let cos = 1.0 - d;
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn empty_store_creates_identity() {
        let reg = Registry::with_memory_store(Config::default());
        let out = reg.match_or_create(&[0.3, 0.4, 0.5]).unwrap();
        assert!(out.created);
        assert_eq!(out.distance, None);
        assert_eq!(reg.len(), 1);
        let stored = reg.get(&out.label).unwrap();
        assert_eq!(stored.kind, IdentityKind::Generated);
        assert_eq!(stored.embedding, vec![0.3, 0.4, 0.5]);
        assert_eq!(reg.store.load().unwrap().len(), 1, "new identity is persisted");
    }

    #[test]
    fn close_embedding_matches_without_mutation() {
        let reg = registry_with(&[("Alice", &[1.0, 0.0])]);
        let out = reg.match_or_create(&at_distance(0.2)).unwrap();
        assert_eq!(out.label, "Alice");
        assert!(!out.created);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("Alice").unwrap().embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn far_embedding_creates_identity() {
        let reg = registry_with(&[("Alice", &[1.0, 0.0])]);
        let out = reg.match_or_create(&[0.0, 1.0]).unwrap();
        assert!(out.created);
        assert_ne!(out.label, "Alice");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        // [4, 3] vs [1, 0]: cosine similarity 0.8, distance exactly 0.2.
        let reg = registry_with(&[("Alice", &[1.0, 0.0])]);
        reg.set_threshold(0.2);
        let out = reg.match_or_create(&[4.0, 3.0]).unwrap();
        assert_eq!(out.distance, Some(0.2));
        assert!(out.created, "distance == threshold must not match");

        // Same check at the default threshold, using whatever distance
        // the probe actually lands on.
        let probe = at_distance(0.6);
        let d = cosine_distance(&probe, &[1.0, 0.0]);
        let reg = registry_with(&[("Alice", &[1.0, 0.0])]);
        reg.set_threshold(d);
        assert!(reg.match_or_create(&probe).unwrap().created);

        let reg = registry_with(&[("Alice", &[1.0, 0.0])]);
        let out = reg.match_or_create(&at_distance(0.59)).unwrap();
        assert_eq!(out.label, "Alice");
        let out = reg.match_or_create(&at_distance(0.61)).unwrap();
        assert!(out.created);
    }

    #[test]
    fn nearest_picks_minimum() {
        let reg = registry_with(&[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0]), ("c", &[-1.0, 0.0])]);
        let (label, dist) = reg.nearest(&[0.1, 1.0]).unwrap();
        assert_eq!(label, "b");
        assert!(dist < 0.01);
    }

    #[test]
    fn ties_resolve_to_smallest_label() {
        let reg = registry_with(&[("zed", &[1.0, 0.0]), ("amy", &[1.0, 0.0])]);
        let out = reg.match_or_create(&[2.0, 0.0]).unwrap();
        assert_eq!(out.label, "amy");
    }

    #[test]
    fn dimension_mismatch_never_matches() {
        let reg = registry_with(&[("Alice", &[1.0, 0.0])]);
        let out = reg.match_or_create(&[1.0, 0.0, 0.0]).unwrap();
        assert!(out.created);
        assert_eq!(out.distance, Some(2.0));
    }

    #[test]
    fn rejects_invalid_embeddings() {
        let reg = Registry::with_memory_store(Config::default());
        assert!(matches!(
            reg.match_or_create(&[]),
            Err(FaceIdError::InvalidEmbedding(_))
        ));
        assert!(matches!(
            reg.match_or_create(&[0.0, 0.0]),
            Err(FaceIdError::InvalidEmbedding(_))
        ));
        assert!(reg.is_empty());
    }

    struct FailingStore;

    impl IdentityStore for FailingStore {
        fn load(&self) -> Result<Identities, FaceIdError> {
            Ok(Identities::new())
        }

        fn save(&self, _: &Identities) -> Result<(), FaceIdError> {
            Err(FaceIdError::Write("disk full".into()))
        }
    }

    #[test]
    fn failed_persist_rolls_back() {
        let reg = Registry::open(Config::default(), Box::new(FailingStore), Box::new(NoArtifacts))
            .unwrap();
        assert!(matches!(
            reg.match_or_create(&[1.0, 0.0]),
            Err(FaceIdError::Write(_))
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn config_defaults() {
        let reg = Registry::with_memory_store(Config { threshold: 0.0 });
        assert_eq!(reg.threshold(), DEFAULT_THRESHOLD);
        reg.set_threshold(f32::NAN);
        assert_eq!(reg.threshold(), DEFAULT_THRESHOLD);
        reg.set_threshold(0.3);
        assert_eq!(reg.threshold(), 0.3);
    }
}
