use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::FaceIdError;
use crate::identity::check_label;

/// Cache of face crops, one image per identity label.
///
/// Artifacts are derived data: the [`Registry`](crate::Registry) calls
/// these after committing a store mutation and only logs failures.
/// A missing artifact is never an error.
pub trait ArtifactStore: Send + Sync {
    /// Writes `jpeg` for `label` unless an artifact already exists.
    /// Returns true if a file was written.
    fn save_if_absent(&self, label: &str, jpeg: &[u8]) -> Result<bool, FaceIdError>;

    /// Moves the artifact of `old` to `new`, replacing any stale one.
    fn rename(&self, old: &str, new: &str) -> Result<(), FaceIdError>;

    /// Removes the artifact of `label`.
    fn remove(&self, label: &str) -> Result<(), FaceIdError>;

    /// Reports whether `label` has an artifact.
    fn exists(&self, label: &str) -> bool;
}

/// Keeps artifacts as `<dir>/<label>.jpg`.
pub struct FsArtifacts {
    dir: PathBuf,
}

impl FsArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path for `label`'s artifact.
    ///
    /// Labels that could escape the directory are rejected with
    /// [`FaceIdError::InvalidLabel`].
    pub fn path_of(&self, label: &str) -> Result<PathBuf, FaceIdError> {
        check_label(label).map_err(|e| FaceIdError::InvalidLabel(format!("{label:?}: {e}")))?;
        Ok(self.dir.join(artifact_file_name(label)))
    }
}

/// File name of a label's artifact.
pub fn artifact_file_name(label: &str) -> String {
    format!("{label}.jpg")
}

fn ignore_missing(r: io::Result<()>) -> io::Result<()> {
    match r {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl ArtifactStore for FsArtifacts {
    fn save_if_absent(&self, label: &str, jpeg: &[u8]) -> Result<bool, FaceIdError> {
        let path = self.path_of(label)?;
        if path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, jpeg)?;
        debug!(path = %path.display(), "saved face crop");
        Ok(true)
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), FaceIdError> {
        ignore_missing(fs::rename(self.path_of(old)?, self.path_of(new)?))?;
        Ok(())
    }

    fn remove(&self, label: &str) -> Result<(), FaceIdError> {
        ignore_missing(fs::remove_file(self.path_of(label)?))?;
        Ok(())
    }

    fn exists(&self, label: &str) -> bool {
        self.path_of(label).is_ok_and(|p| p.is_file())
    }
}

/// [`ArtifactStore`] that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArtifacts;

impl ArtifactStore for NoArtifacts {
    fn save_if_absent(&self, _label: &str, _jpeg: &[u8]) -> Result<bool, FaceIdError> {
        Ok(false)
    }

    fn rename(&self, _old: &str, _new: &str) -> Result<(), FaceIdError> {
        Ok(())
    }

    fn remove(&self, _label: &str) -> Result<(), FaceIdError> {
        Ok(())
    }

    fn exists(&self, _label: &str) -> bool {
        false
    }
}
