//! Administrative surface used by the web layer.
//!
//! Operations never fail at this level: every outcome becomes an
//! [`AdminResponse`] so a bad request cannot disturb the matching loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::FaceIdError;
use crate::artifact::artifact_file_name;
use crate::identity::IdentityKind;
use crate::registry::{LifecycleEvent, Registry};
use crate::sightings::Sightings;

/// Result of an administrative operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdminResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

impl<T> From<Result<T, FaceIdError>> for AdminResponse {
    fn from(r: Result<T, FaceIdError>) -> Self {
        match r {
            Ok(_) => Self::ok(),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub old_id: String,
    #[serde(default)]
    pub new_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub new_id: String,
}

/// One row of the identity listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    pub kind: IdentityKind,
    pub dim: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Artifact file name, if the identity has a face crop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<String>,
}

/// Identities split by how their label was assigned, each sorted by label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdentityListing {
    pub named: Vec<IdentitySummary>,
    pub generated: Vec<IdentitySummary>,
}

/// Admin operations over a shared registry.
#[derive(Clone)]
pub struct Admin {
    registry: Arc<Registry>,
    sightings: Arc<Sightings>,
}

impl Admin {
    pub fn new(registry: Arc<Registry>, sightings: Arc<Sightings>) -> Self {
        Self {
            registry,
            sightings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sightings(&self) -> &Arc<Sightings> {
        &self.sightings
    }

    pub fn list_identities(&self) -> IdentityListing {
        let mut listing = IdentityListing::default();
        for (label, ident) in self.registry.snapshot() {
            let summary = IdentitySummary {
                face: self
                    .registry
                    .has_artifact(&label)
                    .then(|| artifact_file_name(&label)),
                last_seen: self.sightings.last_seen(&label),
                dim: ident.embedding.len(),
                kind: ident.kind,
                id: label,
            };
            match ident.kind {
                IdentityKind::Named => listing.named.push(summary),
                IdentityKind::Generated => listing.generated.push(summary),
            }
        }
        listing
    }

    pub fn rename(&self, req: &RenameRequest) -> AdminResponse {
        info!(old = %req.old_id, new = %req.new_id, "admin rename");
        let result = self.registry.rename(&req.old_id, &req.new_id);
        if let Ok(to) = &result {
            self.sync_sightings(&LifecycleEvent::Renamed {
                from: req.old_id.clone(),
                to: to.clone(),
            });
        }
        result.into()
    }

    pub fn delete(&self, req: &DeleteRequest) -> AdminResponse {
        info!(ids = ?req.ids, "admin delete");
        let result = self.registry.delete(req.ids.as_slice());
        if let Ok(removed) = &result {
            if !removed.is_empty() {
                self.sync_sightings(&LifecycleEvent::Deleted {
                    labels: removed.clone(),
                });
            }
        }
        result.into()
    }

    pub fn merge(&self, req: &MergeRequest) -> AdminResponse {
        info!(ids = ?req.ids, new = %req.new_id, "admin merge");
        let result = self.registry.merge(req.ids.as_slice(), &req.new_id);
        if let Ok(into) = &result {
            self.sync_sightings(&LifecycleEvent::Merged {
                sources: req.ids.clone(),
                into: into.clone(),
            });
        }
        result.into()
    }

    fn sync_sightings(&self, change: &LifecycleEvent) {
        self.sightings.apply(change);
        if let Err(e) = self.sightings.flush() {
            warn!(error = %e, "failed to write sightings index");
        }
    }
}
