use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Local, TimeDelta, Utc};

use crate::registry::LifecycleEvent;

/// Derives presence intervals from a stream of sightings.
///
/// Each label is either absent or has one open interval. An interval
/// opens on the first observation and closes on a [`PresenceTracker::tick`]
/// where the label was not observed and has been unseen for longer than
/// the timeout.
///
/// # Usage per frame
///
/// ```text
/// for each face: tracker.observe(label, name, now)   -> maybe Begin
/// tracker.tick(now)                                  -> End records
/// ```
pub struct PresenceTracker {
    timeout: TimeDelta,
    active: BTreeMap<String, Interval>,
    seen: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct Interval {
    name: String,
    start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Configuration for [`PresenceTracker`].
#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// How long a label may go unseen before its interval closes
    /// (default: 3 seconds).
    pub timeout: TimeDelta,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            timeout: TimeDelta::seconds(3),
        }
    }
}

/// What happened to an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Begin,
    /// `duration` runs from the first to the last confirmed sighting.
    End { duration: TimeDelta },
}

/// A presence record, one line of the presence log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub label: String,
    /// Display name at the time the record was produced.
    pub name: String,
    /// When the record was produced.
    pub at: DateTime<Utc>,
    pub kind: PresenceKind,
}

impl fmt::Display for PresenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        match self.kind {
            PresenceKind::Begin => write!(f, "[{ts}] {} : presence start", self.name),
            PresenceKind::End { duration } => {
                let secs = duration.num_seconds().max(0);
                write!(
                    f,
                    "[{ts}] {} : presence end (duration: {} min {} s)",
                    self.name,
                    secs / 60,
                    secs % 60
                )
            }
        }
    }
}

impl PresenceTracker {
    /// Creates a tracker with the default 3 second timeout.
    pub fn new() -> Self {
        Self::with_config(PresenceConfig::default())
    }

    /// Creates a tracker with the given configuration.
    /// A negative timeout falls back to the default.
    pub fn with_config(cfg: PresenceConfig) -> Self {
        let timeout = if cfg.timeout >= TimeDelta::zero() {
            cfg.timeout
        } else {
            PresenceConfig::default().timeout
        };
        Self {
            timeout,
            active: BTreeMap::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Records that `label` was seen at `now` under the display name `name`.
    /// Returns a Begin record if this opens a new interval.
    pub fn observe(&mut self, label: &str, name: &str, now: DateTime<Utc>) -> Option<PresenceEvent> {
        self.seen.insert(label.to_string());
        if let Some(iv) = self.active.get_mut(label) {
            iv.last_seen = iv.last_seen.max(now);
            iv.name = name.to_string();
            return None;
        }
        self.active.insert(
            label.to_string(),
            Interval {
                name: name.to_string(),
                start: now,
                last_seen: now,
            },
        );
        Some(PresenceEvent {
            label: label.to_string(),
            name: name.to_string(),
            at: now,
            kind: PresenceKind::Begin,
        })
    }

    /// Ends the current tick: closes every interval that was not observed
    /// since the previous tick and has been unseen for longer than the
    /// timeout. Records are ordered by label.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        let expired: Vec<String> = self
            .active
            .iter()
            .filter(|(label, iv)| !self.seen.contains(*label) && now - iv.last_seen > self.timeout)
            .map(|(label, _)| label.clone())
            .collect();
        self.seen.clear();

        expired
            .into_iter()
            .filter_map(|label| self.close(&label, now))
            .collect()
    }

    /// Closes the interval of `label` immediately.
    pub fn close(&mut self, label: &str, now: DateTime<Utc>) -> Option<PresenceEvent> {
        let iv = self.active.remove(label)?;
        self.seen.remove(label);
        Some(PresenceEvent {
            label: label.to_string(),
            name: iv.name,
            at: now,
            kind: PresenceKind::End {
                duration: iv.last_seen - iv.start,
            },
        })
    }

    /// Closes every open interval, e.g. on shutdown.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        let labels: Vec<String> = self.active.keys().cloned().collect();
        labels
            .into_iter()
            .filter_map(|label| self.close(&label, now))
            .collect()
    }

    /// Moves the interval of `from` to `to` under the display name `name`.
    /// If `to` already has an interval the two are combined, keeping the
    /// earliest start and the latest sighting.
    pub fn relabel(&mut self, from: &str, to: &str, name: &str) {
        let Some(mut iv) = self.active.remove(from) else {
            return;
        };
        if self.seen.remove(from) {
            self.seen.insert(to.to_string());
        }
        if let Some(existing) = self.active.remove(to) {
            iv.start = iv.start.min(existing.start);
            iv.last_seen = iv.last_seen.max(existing.last_seen);
        }
        iv.name = name.to_string();
        self.active.insert(to.to_string(), iv);
    }

    /// Applies a committed identity change: renames and merges carry open
    /// intervals over to the new label, deletes close them.
    pub fn apply(&mut self, event: &LifecycleEvent, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        match event {
            LifecycleEvent::Renamed { from, to } => {
                self.relabel(from, to, to);
                Vec::new()
            }
            LifecycleEvent::Merged { sources, into } => {
                for src in sources {
                    self.relabel(src, into, into);
                }
                Vec::new()
            }
            LifecycleEvent::Deleted { labels } => labels
                .iter()
                .filter_map(|label| self.close(label, now))
                .collect(),
        }
    }

    /// Reports whether `label` has an open interval.
    pub fn is_active(&self, label: &str) -> bool {
        self.active.contains_key(label)
    }

    /// Returns the number of open intervals.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> TimeDelta {
        self.timeout
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
