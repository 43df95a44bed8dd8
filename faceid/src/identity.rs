use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an identity label came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Label minted by the matcher for an unmatched face.
    Generated,
    /// Label assigned by a person (rename or merge).
    Named,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated => write!(f, "generated"),
            Self::Named => write!(f, "named"),
        }
    }
}

/// A known face: exactly one embedding per label.
#[derive(Clone, PartialEq)]
pub struct Identity {
    pub kind: IdentityKind,
    pub embedding: Vec<f32>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("kind", &self.kind)
            .field("dim", &self.embedding.len())
            .finish()
    }
}

/// Label -> identity. Ordered so scans and ties are deterministic.
pub type Identities = BTreeMap<String, Identity>;

/// Returns a fresh label for a system-generated identity.
pub fn generate_label() -> String {
    Uuid::new_v4().to_string()
}

/// Reports whether a label has the shape of a generated one.
///
/// Only used to classify entries of stores written before kinds were
/// recorded explicitly.
pub fn looks_generated(label: &str) -> bool {
    Uuid::parse_str(label).is_ok()
}

/// Trims a human-assigned name and checks it can serve as a label.
///
/// Labels double as artifact file names, so path separators, NUL and
/// the `.` / `..` entries are rejected along with blank names.
pub fn normalize_name(name: &str) -> Result<String, &'static str> {
    let name = name.trim();
    check_label(name)?;
    Ok(name.to_string())
}

/// Checks that `label` is safe to use as an artifact file stem.
pub(crate) fn check_label(label: &str) -> Result<(), &'static str> {
    if label.is_empty() {
        return Err("name is empty");
    }
    if label == "." || label == ".." {
        return Err("name is a reserved path component");
    }
    if label.contains(['/', '\\', '\0']) {
        return Err("name contains a path separator or NUL");
    }
    Ok(())
}
