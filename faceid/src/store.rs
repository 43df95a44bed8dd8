use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::FaceIdError;
use crate::cosine::check_embedding;
use crate::identity::{Identities, Identity, IdentityKind, looks_generated};

/// Persists the label -> embedding mapping.
///
/// Implementations must be safe for concurrent use, though the
/// [`Registry`](crate::Registry) already serializes every call.
pub trait IdentityStore: Send + Sync {
    /// Returns the persisted identities, or an empty map if nothing has
    /// been saved yet. Malformed individual entries are dropped.
    fn load(&self) -> Result<Identities, FaceIdError>;

    /// Atomically replaces the persisted identities.
    fn save(&self, identities: &Identities) -> Result<(), FaceIdError>;
}

/// On-disk value: the tagged form is written, the bare array is the
/// legacy form still accepted on load.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Tagged {
        kind: IdentityKind,
        embedding: Vec<f32>,
    },
    Bare(Vec<f32>),
}

#[derive(Serialize)]
struct StoredEntryRef<'a> {
    kind: IdentityKind,
    embedding: &'a [f32],
}

/// JSON file [`IdentityStore`].
///
/// Writes go to a temporary sibling that is renamed over the target on
/// commit, so a failed save never leaves a partial file behind.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for JsonFileStore {
    fn load(&self) -> Result<Identities, FaceIdError> {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no identity store yet");
                return Ok(Identities::new());
            }
            Err(e) => return Err(e.into()),
        };

        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&data)
            .map_err(|e| FaceIdError::CorruptStore {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        Ok(decode_entries(raw))
    }

    fn save(&self, identities: &Identities) -> Result<(), FaceIdError> {
        let out: BTreeMap<&str, StoredEntryRef<'_>> = identities
            .iter()
            .map(|(label, ident)| {
                (
                    label.as_str(),
                    StoredEntryRef {
                        kind: ident.kind,
                        embedding: &ident.embedding,
                    },
                )
            })
            .collect();
        write_json_atomic(&self.path, &out)
    }
}

fn decode_entries(raw: serde_json::Map<String, serde_json::Value>) -> Identities {
    let mut identities = Identities::new();
    for (label, value) in raw {
        let (kind, embedding) = match serde_json::from_value::<StoredEntry>(value) {
            Ok(StoredEntry::Tagged { kind, embedding }) => (kind, embedding),
            Ok(StoredEntry::Bare(embedding)) => {
                let kind = if looks_generated(&label) {
                    IdentityKind::Generated
                } else {
                    IdentityKind::Named
                };
                (kind, embedding)
            }
            Err(e) => {
                warn!(%label, error = %e, "dropping malformed store entry");
                continue;
            }
        };
        if let Err(reason) = check_embedding(&embedding) {
            warn!(%label, %reason, "dropping unusable store entry");
            continue;
        }
        identities.insert(label, Identity { kind, embedding });
    }
    identities
}

/// Serializes `value` as pretty JSON and atomically replaces `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), FaceIdError> {
    let write_err = |e: io::Error| FaceIdError::Write(format!("{}: {e}", path.display()));

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(write_err)?;
    }

    let mut file = AtomicWriteFile::open(path).map_err(write_err)?;
    let written = serde_json::to_writer_pretty(&mut file, value)
        .map_err(io::Error::from)
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.flush());
    match written {
        Ok(()) => file.commit().map_err(write_err),
        Err(e) => {
            let _ = file.discard();
            Err(write_err(e))
        }
    }
}

/// In-memory [`IdentityStore`].
/// Data is lost on restart. Suitable for testing or ephemeral use.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Identities>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `identities`.
    pub fn with_identities(identities: Identities) -> Self {
        Self {
            data: Mutex::new(identities),
        }
    }
}

impl IdentityStore for MemoryStore {
    fn load(&self) -> Result<Identities, FaceIdError> {
        Ok(self.data.lock().clone())
    }

    fn save(&self, identities: &Identities) -> Result<(), FaceIdError> {
        *self.data.lock() = identities.clone();
        Ok(())
    }
}
