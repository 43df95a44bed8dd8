//! Rename, delete and merge.
//!
//! Each operation validates against the current identities, writes the
//! complete new mapping to the store, and only then swaps it in. Artifact
//! updates follow the commit and are best-effort.

use tracing::{info, warn};

use crate::FaceIdError;
use crate::cosine::mean_vector;
use crate::identity::{Identity, IdentityKind, normalize_name};
use crate::registry::{LifecycleEvent, Registry};

impl Registry {
    /// Moves `old` to the human-assigned name `new`.
    ///
    /// Fails with [`FaceIdError::InvalidRename`] if `old` is unknown, `new`
    /// is blank or unusable as a label, or `new` is already taken.
    /// The embedding is unchanged. Returns the stored (trimmed) name.
    pub fn rename(&self, old: &str, new: &str) -> Result<String, FaceIdError> {
        let new = normalize_name(new).map_err(|e| FaceIdError::InvalidRename(e.to_string()))?;

        let mut inner = self.lock();
        if !inner.identities.contains_key(old) {
            return Err(FaceIdError::InvalidRename(format!("identity {old:?} not found")));
        }
        if inner.identities.contains_key(&new) {
            return Err(FaceIdError::InvalidRename(format!("name {new:?} is already in use")));
        }

        let mut next = inner.identities.clone();
        if let Some(ident) = next.remove(old) {
            next.insert(
                new.clone(),
                Identity {
                    kind: IdentityKind::Named,
                    embedding: ident.embedding,
                },
            );
        }
        self.store.save(&next)?;
        inner.identities = next;

        if let Err(e) = self.artifacts.rename(old, &new) {
            warn!(%old, %new, error = %e, "failed to rename face crop");
        }
        self.publish(LifecycleEvent::Renamed {
            from: old.to_string(),
            to: new.clone(),
        });
        drop(inner);

        info!(%old, %new, "identity renamed");
        Ok(new)
    }

    /// Removes every listed label. Unknown labels are ignored, so deleting
    /// is idempotent. Returns the labels that were actually removed; only
    /// their face crops are touched.
    pub fn delete<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<String>, FaceIdError> {
        let mut inner = self.lock();

        let mut next = inner.identities.clone();
        let mut removed = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if next.remove(label).is_some() {
                removed.push(label.to_string());
            }
        }
        if removed.is_empty() {
            return Ok(removed);
        }
        self.store.save(&next)?;
        inner.identities = next;

        for label in &removed {
            if let Err(e) = self.artifacts.remove(label) {
                warn!(%label, error = %e, "failed to remove face crop");
            }
        }
        self.publish(LifecycleEvent::Deleted {
            labels: removed.clone(),
        });
        drop(inner);

        info!(labels = ?removed, "identities deleted");
        Ok(removed)
    }

    /// Collapses `labels` into a single identity named `new_label`, whose
    /// embedding is the element-wise mean of the inputs found in the store.
    ///
    /// Duplicate input labels count once and unknown ones are skipped.
    /// The face crop of the first input found becomes the merged
    /// identity's crop; the others are discarded. Returns the stored
    /// (trimmed) name.
    pub fn merge<S: AsRef<str>>(&self, labels: &[S], new_label: &str) -> Result<String, FaceIdError> {
        let mut sources: Vec<&str> = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_ref();
            if !sources.contains(&label) {
                sources.push(label);
            }
        }
        if sources.len() < 2 {
            return Err(FaceIdError::InvalidMerge(
                "at least two distinct identities are required".into(),
            ));
        }
        let new_label = normalize_name(new_label).map_err(|e| FaceIdError::InvalidMerge(e.to_string()))?;

        let mut inner = self.lock();
        if inner.identities.contains_key(&new_label) {
            return Err(FaceIdError::InvalidMerge(format!(
                "name {new_label:?} is already in use"
            )));
        }

        let found: Vec<&str> = sources
            .iter()
            .copied()
            .filter(|l| inner.identities.contains_key(*l))
            .collect();
        if found.is_empty() {
            return Err(FaceIdError::NoValidSource);
        }
        let vectors: Vec<&[f32]> = found
            .iter()
            .filter_map(|l| inner.identities.get(*l))
            .map(|ident| ident.embedding.as_slice())
            .collect();
        let merged = mean_vector(&vectors).ok_or_else(|| FaceIdError::DimensionMismatch {
            expected: vectors[0].len(),
            got: vectors
                .iter()
                .map(|v| v.len())
                .find(|&n| n != vectors[0].len())
                .unwrap_or(0),
        })?;

        let mut next = inner.identities.clone();
        for label in &found {
            next.remove(*label);
        }
        next.insert(
            new_label.clone(),
            Identity {
                kind: IdentityKind::Named,
                embedding: merged,
            },
        );
        self.store.save(&next)?;
        inner.identities = next;

        if let Err(e) = self.artifacts.rename(found[0], &new_label) {
            warn!(label = found[0], %new_label, error = %e, "failed to move face crop");
        }
        for label in &found[1..] {
            if let Err(e) = self.artifacts.remove(label) {
                warn!(%label, error = %e, "failed to remove face crop");
            }
        }
        self.publish(LifecycleEvent::Merged {
            sources: found.iter().map(|s| s.to_string()).collect(),
            into: new_label.clone(),
        });
        drop(inner);

        info!(sources = ?found, into = %new_label, "identities merged");
        Ok(new_label)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifact::{ArtifactStore, FsArtifacts};
    use crate::identity::Identities;
    use crate::registry::Config;
    use crate::store::{IdentityStore, JsonFileStore, MemoryStore};

    fn seeded(entries: &[(&str, &[f32])]) -> Registry {
        let mut ids = Identities::new();
        for (label, v) in entries {
            ids.insert(
                label.to_string(),
                Identity {
                    kind: IdentityKind::Generated,
                    embedding: v.to_vec(),
                },
            );
        }
        Registry::open(
            Config::default(),
            Box::new(MemoryStore::with_identities(ids)),
            Box::new(crate::artifact::NoArtifacts),
        )
        .unwrap()
    }

    #[test]
    fn rename_moves_vector_unchanged() {
        let reg = seeded(&[("a", &[1.0, 2.0, 3.0])]);
        let name = reg.rename("a", "  Alice  ").unwrap();
        assert_eq!(name, "Alice");
        assert!(!reg.contains("a"));
        let alice = reg.get("Alice").unwrap();
        assert_eq!(alice.embedding, vec![1.0, 2.0, 3.0]);
        assert_eq!(alice.kind, IdentityKind::Named);
        assert!(reg.store.load().unwrap().contains_key("Alice"));
    }

    #[test]
    fn rename_failures_do_not_mutate() {
        let reg = seeded(&[("a", &[1.0]), ("b", &[2.0])]);
        let before = reg.snapshot();

        assert!(matches!(reg.rename("missing", "X"), Err(FaceIdError::InvalidRename(_))));
        assert!(matches!(reg.rename("a", "b"), Err(FaceIdError::InvalidRename(_))));
        assert!(matches!(reg.rename("a", "   "), Err(FaceIdError::InvalidRename(_))));
        assert!(matches!(reg.rename("a", "../etc"), Err(FaceIdError::InvalidRename(_))));

        assert_eq!(reg.snapshot(), before);
        assert_eq!(reg.store.load().unwrap(), before);
    }

    #[test]
    fn delete_is_idempotent() {
        let reg = seeded(&[("a", &[1.0]), ("b", &[2.0])]);
        assert_eq!(reg.delete(&["a"]).unwrap(), vec!["a".to_string()]);
        assert!(reg.delete(&["a", "nobody"]).unwrap().is_empty());
        assert_eq!(reg.len(), 1);
        assert!(reg.contains("b"));
        assert_eq!(reg.store.load().unwrap().len(), 1);
    }

    #[test]
    fn merge_averages_vectors() {
        let reg = seeded(&[("a", &[1.0, 0.0, 4.0]), ("b", &[3.0, 2.0, 0.0]), ("c", &[9.0, 9.0, 9.0])]);
        let name = reg.merge(&["a", "b", "ghost"], "Bob").unwrap();
        assert_eq!(name, "Bob");
        assert!(!reg.contains("a"));
        assert!(!reg.contains("b"));
        assert!(reg.contains("c"));
        let bob = reg.get("Bob").unwrap();
        assert_eq!(bob.embedding, vec![2.0, 1.0, 2.0]);
        assert_eq!(bob.kind, IdentityKind::Named);
        assert_eq!(reg.store.load().unwrap(), reg.snapshot());
    }

    #[test]
    fn merge_failures_do_not_mutate() {
        let reg = seeded(&[("a", &[1.0]), ("b", &[2.0]), ("Taken", &[3.0])]);
        let before = reg.snapshot();

        assert!(matches!(reg.merge(&["a"], "X"), Err(FaceIdError::InvalidMerge(_))));
        assert!(matches!(reg.merge(&["a", "a"], "X"), Err(FaceIdError::InvalidMerge(_))));
        assert!(matches!(reg.merge(&["a", "b"], ""), Err(FaceIdError::InvalidMerge(_))));
        assert!(matches!(reg.merge(&["a", "b"], "Taken"), Err(FaceIdError::InvalidMerge(_))));
        assert!(matches!(reg.merge(&["x", "y"], "X"), Err(FaceIdError::NoValidSource)));

        assert_eq!(reg.snapshot(), before);
    }

    #[test]
    fn merge_rejects_mixed_dimensions() {
        let reg = seeded(&[("a", &[1.0, 2.0]), ("b", &[1.0])]);
        assert!(matches!(
            reg.merge(&["a", "b"], "X"),
            Err(FaceIdError::DimensionMismatch { expected: 2, got: 1 })
        ));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn artifacts_follow_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let faces = dir.path().join("faces");
        let arts = FsArtifacts::new(&faces);
        for l in ["a", "b", "c", "d"] {
            arts.save_if_absent(l, l.as_bytes()).unwrap();
        }
        let store = JsonFileStore::new(dir.path().join("embeddings.json"));
        let mut ids = Identities::new();
        for (l, v) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            ids.insert(
                l.to_string(),
                Identity {
                    kind: IdentityKind::Generated,
                    embedding: vec![v, 1.0],
                },
            );
        }
        store.save(&ids).unwrap();

        let reg = Registry::open(
            Config::default(),
            Box::new(store),
            Box::new(FsArtifacts::new(&faces)),
        )
        .unwrap();

        reg.rename("a", "Alice").unwrap();
        assert!(arts.exists("Alice") && !arts.exists("a"));

        reg.merge(&["b", "c"], "Bea").unwrap();
        assert_eq!(std::fs::read(arts.path_of("Bea").unwrap()).unwrap(), b"b");
        assert!(!arts.exists("b") && !arts.exists("c"));

        reg.delete(&["d"]).unwrap();
        assert!(!arts.exists("d"));
        assert!(reg.has_artifact("Alice"));
    }

    #[test]
    fn events_are_published() {
        let reg = seeded(&[("a", &[1.0]), ("b", &[2.0]), ("c", &[3.0])]);
        let mut rx = reg.subscribe();

        reg.rename("a", "A").unwrap();
        reg.merge(&["b", "c"], "BC").unwrap();
        reg.delete(&["A", "nobody"]).unwrap();
        reg.delete(&["nobody"]).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::Renamed { from: "a".into(), to: "A".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::Merged { sources: vec!["b".into(), "c".into()], into: "BC".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::Deleted { labels: vec!["A".into()] }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_mutations_are_serialized() {
        let reg = Arc::new(Registry::with_memory_store(Config::default()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let mut v = vec![0.0f32; 100];
                        v[(t * 25 + i) as usize] = 1.0;
                        reg.match_or_create(&v).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 100);
        assert_eq!(reg.store.load().unwrap().len(), 100);
    }

    #[test]
    fn unknown_labels_never_touch_files() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("victim.jpg");
        std::fs::write(&victim, b"keep").unwrap();
        let faces = dir.path().join("faces");
        let arts = FsArtifacts::new(&faces);
        arts.save_if_absent("a", b"a").unwrap();
        arts.save_if_absent("b", b"b").unwrap();

        let mut ids = Identities::new();
        for (l, v) in [("a", 1.0), ("b", 2.0)] {
            ids.insert(
                l.to_string(),
                Identity {
                    kind: IdentityKind::Generated,
                    embedding: vec![v, 1.0],
                },
            );
        }
        let reg = Registry::open(
            Config::default(),
            Box::new(MemoryStore::with_identities(ids)),
            Box::new(FsArtifacts::new(&faces)),
        )
        .unwrap();
        let mut rx = reg.subscribe();

        assert!(reg.delete(&["../victim", "ghost"]).unwrap().is_empty());
        assert!(victim.exists());
        assert!(rx.try_recv().is_err());

        reg.merge(&["../victim", "a", "b"], "M").unwrap();
        assert_eq!(std::fs::read(&victim).unwrap(), b"keep");
        assert_eq!(std::fs::read(arts.path_of("M").unwrap()).unwrap(), b"a");
        assert!(!arts.exists("a") && !arts.exists("b"));
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::Merged { sources: vec!["a".into(), "b".into()], into: "M".into() }
        );
    }

    struct ReadOnlyStore(Identities);

    impl IdentityStore for ReadOnlyStore {
        fn load(&self) -> Result<Identities, FaceIdError> {
            Ok(self.0.clone())
        }

        fn save(&self, _: &Identities) -> Result<(), FaceIdError> {
            Err(FaceIdError::Write("read-only".into()))
        }
    }

    /// Registry over "a" and "b" whose saves always fail, with a crop per label.
    fn read_only_registry() -> (tempfile::TempDir, FsArtifacts, Identities, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let arts = FsArtifacts::new(dir.path());
        let mut ids = Identities::new();
        for (l, v) in [("a", 1.0), ("b", 2.0)] {
            arts.save_if_absent(l, l.as_bytes()).unwrap();
            ids.insert(
                l.to_string(),
                Identity {
                    kind: IdentityKind::Generated,
                    embedding: vec![v, 1.0],
                },
            );
        }
        let reg = Registry::open(
            Config::default(),
            Box::new(ReadOnlyStore(ids.clone())),
            Box::new(FsArtifacts::new(dir.path())),
        )
        .unwrap();
        (dir, arts, ids, reg)
    }

    #[test]
    fn failed_rename_save_changes_nothing() {
        let (_dir, arts, ids, reg) = read_only_registry();
        let mut rx = reg.subscribe();

        assert!(matches!(reg.rename("a", "Alice"), Err(FaceIdError::Write(_))));

        assert_eq!(reg.snapshot(), ids);
        assert!(rx.try_recv().is_err());
        assert!(arts.exists("a"));
        assert!(!arts.exists("Alice"));
    }

    #[test]
    fn failed_delete_save_changes_nothing() {
        let (_dir, arts, ids, reg) = read_only_registry();
        let mut rx = reg.subscribe();

        assert!(matches!(reg.delete(&["a"]), Err(FaceIdError::Write(_))));

        assert_eq!(reg.snapshot(), ids);
        assert!(rx.try_recv().is_err());
        assert!(arts.exists("a"));
    }

    #[test]
    fn failed_merge_save_changes_nothing() {
        let (_dir, arts, ids, reg) = read_only_registry();
        let mut rx = reg.subscribe();

        assert!(matches!(reg.merge(&["a", "b"], "AB"), Err(FaceIdError::Write(_))));

        assert_eq!(reg.snapshot(), ids);
        assert!(rx.try_recv().is_err());
        assert!(arts.exists("a") && arts.exists("b"));
        assert!(!arts.exists("AB"));
    }
}
