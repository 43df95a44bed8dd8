use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::FaceIdError;
use crate::detect::Detection;
use crate::presence::{PresenceEvent, PresenceTracker};
use crate::presence_log::PresenceLog;
use crate::registry::{LifecycleEvent, Registry};
use crate::sightings::Sightings;

/// What one processed frame produced.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Resolved label per detection, in detection order.
    pub labels: Vec<String>,
    /// Number of identities created for this frame.
    pub created: usize,
    /// Presence records emitted while handling this frame.
    pub events: Vec<PresenceEvent>,
}

/// Runs matching and presence tracking for a stream of frames.
///
/// Holds a subscription to the registry's lifecycle events so that
/// renames, merges and deletes made elsewhere (e.g. the admin API) are
/// reflected in open intervals before each frame and again before each
/// matched face is observed. The sightings index is kept in step with
/// those changes by [`Admin`](crate::Admin); the watcher only touches
/// labels that still exist.
pub struct Watcher {
    registry: Arc<Registry>,
    tracker: PresenceTracker,
    log: Option<PresenceLog>,
    sightings: Arc<Sightings>,
    changes: broadcast::Receiver<LifecycleEvent>,
}

impl Watcher {
    pub fn new(
        registry: Arc<Registry>,
        tracker: PresenceTracker,
        log: Option<PresenceLog>,
        sightings: Arc<Sightings>,
    ) -> Self {
        let changes = registry.subscribe();
        Self {
            registry,
            tracker,
            log,
            sightings,
            changes,
        }
    }

    /// Handles the detections of one frame captured at `now`.
    ///
    /// Faces with unusable embeddings are skipped. A store failure aborts
    /// the frame; presence log and sightings failures are only logged.
    pub fn process(&mut self, detections: &[Detection], now: DateTime<Utc>) -> Result<FrameReport, FaceIdError> {
        let mut report = FrameReport::default();
        report.events.extend(self.drain_changes(now, None));

        for det in detections {
            self.handle_face(det, now, &mut report)?;
        }

        report.events.extend(self.tracker.tick(now));
        self.record(&report.events);
        if let Err(e) = self.sightings.flush() {
            warn!(error = %e, "failed to write sightings index");
        }
        Ok(report)
    }

    /// Closes all open intervals, e.g. when capture stops.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        let mut events = self.drain_changes(now, None);
        events.extend(self.tracker.finish(now));
        self.record(&events);
        if let Err(e) = self.sightings.flush() {
            warn!(error = %e, "failed to write sightings index");
        }
        events
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    fn handle_face(&mut self, det: &Detection, now: DateTime<Utc>, report: &mut FrameReport) -> Result<(), FaceIdError> {
        let outcome = match self.registry.match_or_create(&det.embedding) {
            Ok(o) => o,
            Err(FaceIdError::InvalidEmbedding(reason)) => {
                warn!(bbox = ?det.bbox, %reason, "skipping face");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if outcome.created {
            report.created += 1;
        }
        debug!(label = %outcome.label, distance = ?outcome.distance, bbox = ?det.bbox, "face matched");
        self.record_sighting(outcome.label, det.crop.as_deref(), now, report);
        Ok(())
    }

    /// Observes a matched label. Changes committed since the match are
    /// applied first, so the label follows a rename or merge and a
    /// deleted label is dropped.
    fn record_sighting(&mut self, mut label: String, crop: Option<&[u8]>, now: DateTime<Utc>, report: &mut FrameReport) {
        report.events.extend(self.drain_changes(now, Some(&mut label)));
        if !self.registry.contains(&label) {
            debug!(%label, "identity removed while matching");
            return;
        }

        let name = self.registry.display_name(&label);
        report.events.extend(self.tracker.observe(&label, &name, now));
        self.sightings.touch(&label, &name, now);
        if let Some(crop) = crop {
            self.registry.save_artifact(&label, crop);
        }
        report.labels.push(label);
    }

    /// Applies pending lifecycle changes to the tracker, updating
    /// `follow` when its label is renamed or merged away.
    fn drain_changes(&mut self, now: DateTime<Utc>, mut follow: Option<&mut String>) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        loop {
            match self.changes.try_recv() {
                Ok(change) => {
                    if let Some(label) = follow.as_deref_mut() {
                        follow_change(label, &change);
                    }
                    events.extend(self.tracker.apply(&change, now));
                }
                Err(TryRecvError::Lagged(n)) => {
                    warn!(missed = n, "lifecycle events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        events
    }

    fn record(&self, events: &[PresenceEvent]) {
        for ev in events {
            info!("{ev}");
        }
        if let Some(log) = &self.log {
            if let Err(e) = log.append(events) {
                warn!(path = %log.path().display(), error = %e, "failed to append presence log");
            }
        }
    }
}

fn follow_change(label: &mut String, change: &LifecycleEvent) {
    match change {
        LifecycleEvent::Renamed { from, to } if *from == *label => *label = to.clone(),
        LifecycleEvent::Merged { sources, into } if sources.iter().any(|s| *s == *label) => {
            *label = into.clone();
        }
        _ => {}
    }
}
