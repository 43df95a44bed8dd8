//! Stable face identities via nearest-neighbor matching against a small
//! persisted identity store.
//!
//! # Pipeline
//!
//! 1. [`FaceDetector::detect`]: frame -> bounding boxes + embeddings
//! 2. [`Registry::match_or_create`]: embedding -> identity label
//! 3. [`PresenceTracker`]: label sightings -> presence start/end records
//!
//! [`Watcher`] runs steps 2 and 3 for each frame and writes the
//! presence log, face crops and the sightings index.
//!
//! # Usage
//!
//! ```
//! use giztoy_faceid::{Config, Registry};
//!
//! let reg = Registry::with_memory_store(Config::default());
//!
//! let first = reg.match_or_create(&[1.0, 0.0, 0.0]).unwrap();
//! assert!(first.created);
//!
//! // Close enough (cosine distance < 0.6): same identity.
//! let again = reg.match_or_create(&[0.9, 0.1, 0.0]).unwrap();
//! assert_eq!(again.label, first.label);
//!
//! reg.rename(&first.label, "Alice").unwrap();
//! assert!(reg.contains("Alice"));
//! ```
//!
//! # Design
//!
//! Matching is a linear scan with a single global threshold; a match
//! never updates the stored vector. Only creation and merge write
//! vectors. All store access goes through the registry's mutex, and
//! every mutation is persisted before it becomes visible.

mod admin;
mod artifact;
mod cosine;
mod detect;
mod error;
mod identity;
mod lifecycle;
mod presence;
mod presence_log;
mod registry;
mod sightings;
mod store;
mod watcher;

pub use admin::{
    Admin, AdminResponse, DeleteRequest, IdentityListing, IdentitySummary, MergeRequest,
    RenameRequest,
};
pub use artifact::{ArtifactStore, FsArtifacts, NoArtifacts, artifact_file_name};
pub use cosine::{cosine_distance, mean_vector};
pub use detect::{BoundingBox, Detection, FaceDetector, Frame, FrameSource};
pub use error::FaceIdError;
pub use identity::{Identities, Identity, IdentityKind, generate_label, looks_generated, normalize_name};
pub use presence::{PresenceConfig, PresenceEvent, PresenceKind, PresenceTracker};
pub use presence_log::PresenceLog;
pub use registry::{Config, DEFAULT_THRESHOLD, LifecycleEvent, MatchOutcome, Registry};
pub use sightings::{Sighting, Sightings};
pub use store::{IdentityStore, JsonFileStore, MemoryStore};
pub use watcher::{FrameReport, Watcher};
