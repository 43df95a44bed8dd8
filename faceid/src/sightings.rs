use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::FaceIdError;
use crate::registry::LifecycleEvent;
use crate::store::write_json_atomic;

/// Last time an identity was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: String,
    pub name: String,
    pub last_seen: DateTime<Utc>,
}

/// Index of when each identity was last seen, kept in a JSON array file.
///
/// The index is a convenience view for the admin listing: it is derived
/// data, so an unreadable file starts an empty index instead of failing.
pub struct Sightings {
    path: Option<PathBuf>,
    inner: Mutex<SightingsInner>,
}

#[derive(Default)]
struct SightingsInner {
    entries: BTreeMap<String, Sighting>,
    dirty: bool,
}

impl Sightings {
    /// Creates an index that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(SightingsInner::default()),
        }
    }

    /// Loads the index at `path`; a missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(list) => list.into_iter().map(|s| (s.id.clone(), s)).collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable sightings index");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            inner: Mutex::new(SightingsInner {
                entries,
                dirty: false,
            }),
        }
    }

    /// Records that `id` was seen at `at` under `name`.
    pub fn touch(&self, id: &str, name: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let entry = inner.entries.entry(id.to_string()).or_insert_with(|| Sighting {
            id: id.to_string(),
            name: name.to_string(),
            last_seen: at,
        });
        entry.name = name.to_string();
        entry.last_seen = entry.last_seen.max(at);
        inner.dirty = true;
    }

    /// Returns when `id` was last seen.
    pub fn last_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().entries.get(id).map(|s| s.last_seen)
    }

    /// Returns all sightings ordered by id.
    pub fn all(&self) -> Vec<Sighting> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Mirrors a committed identity change into the index.
    pub fn apply(&self, event: &LifecycleEvent) {
        let mut inner = self.inner.lock();
        match event {
            LifecycleEvent::Renamed { from, to } => {
                if let Some(mut s) = inner.entries.remove(from) {
                    s.id = to.clone();
                    s.name = to.clone();
                    inner.entries.insert(to.clone(), s);
                }
            }
            LifecycleEvent::Merged { sources, into } => {
                let latest = sources
                    .iter()
                    .filter_map(|src| inner.entries.remove(src))
                    .map(|s| s.last_seen)
                    .max();
                if let Some(last_seen) = latest {
                    inner.entries.insert(
                        into.clone(),
                        Sighting {
                            id: into.clone(),
                            name: into.clone(),
                            last_seen,
                        },
                    );
                }
            }
            LifecycleEvent::Deleted { labels } => {
                for label in labels {
                    inner.entries.remove(label);
                }
            }
        }
        inner.dirty = true;
    }

    /// Writes the index if it changed since the last flush.
    pub fn flush(&self) -> Result<(), FaceIdError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(());
        }
        let list: Vec<&Sighting> = inner.entries.values().collect();
        write_json_atomic(path, &list)?;
        inner.dirty = false;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<Sighting>, FaceIdError> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data).map_err(|e| FaceIdError::CorruptStore {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
