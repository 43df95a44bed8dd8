use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::FaceIdError;
use crate::presence::PresenceEvent;

/// Append-only text log of presence records, one line per record.
pub struct PresenceLog {
    path: PathBuf,
}

impl PresenceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `events` in order.
    pub fn append(&self, events: &[PresenceEvent]) -> Result<(), FaceIdError> {
        if events.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file: File = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut w = BufWriter::new(file);
        for ev in events {
            writeln!(w, "{ev}")?;
        }
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::presence::PresenceKind;

    #[test]
    fn appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = PresenceLog::new(dir.path().join("passages.txt"));
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let begin = PresenceEvent {
            label: "a".into(),
            name: "Alice".into(),
            at,
            kind: PresenceKind::Begin,
        };
        let end = PresenceEvent {
            kind: PresenceKind::End {
                duration: TimeDelta::seconds(61),
            },
            ..begin.clone()
        };

        log.append(std::slice::from_ref(&begin)).unwrap();
        log.append(&[end]).unwrap();
        log.append(&[]).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Alice : presence start"));
        assert!(lines[1].ends_with("Alice : presence end (duration: 1 min 1 s)"));
    }
}
