//! Capture loop: frame -> detections -> watcher, until the source ends,
//! capture fails, or shutdown is requested.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use giztoy_faceid::{FaceDetector, FrameSource, Watcher};
use tracing::{debug, error, info};

/// Totals for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub faces: u64,
    pub created: usize,
    pub presence_records: usize,
}

/// Processes frames one at a time until the source is exhausted or `stop`
/// is set. Capture and detector failures end the run after closing all
/// open presence intervals.
pub fn run(
    watcher: &mut Watcher,
    source: &mut dyn FrameSource,
    detector: &mut dyn FaceDetector,
    stop: &AtomicBool,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let mut last_at: Option<DateTime<Utc>> = None;

    let outcome: Result<()> = loop {
        if stop.load(Ordering::Relaxed) {
            info!("shutdown requested");
            break Ok(());
        }

        let frame = match source.next_frame() {
            Ok(Some(f)) => f,
            Ok(None) => {
                info!("frame source exhausted");
                break Ok(());
            }
            Err(e) => {
                error!(error = %e, "capture failed");
                break Err(e.into());
            }
        };

        let detections = match detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                error!(frame = frame.index, error = %e, "detection failed");
                break Err(e.into());
            }
        };

        let report = match watcher.process(&detections, frame.captured_at) {
            Ok(r) => r,
            Err(e) => {
                error!(frame = frame.index, error = %e, "matching failed");
                break Err(e.into());
            }
        };
        debug!(frame = frame.index, labels = ?report.labels, "frame processed");

        summary.frames += 1;
        summary.faces += detections.len() as u64;
        summary.created += report.created;
        summary.presence_records += report.events.len();
        last_at = Some(frame.captured_at);
    };

    let closed = watcher.finish(last_at.unwrap_or_else(Utc::now));
    summary.presence_records += closed.len();
    outcome.map(|_| summary)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use giztoy_faceid::{
        Config, FaceIdError, Frame, PresenceLog, PresenceTracker, Registry, Sightings,
    };

    use super::*;
    use crate::replay::{ReplayDetector, ReplaySource};

    fn watcher(log: Option<PresenceLog>) -> (Arc<Registry>, Watcher) {
        let reg = Arc::new(Registry::with_memory_store(Config::default()));
        let w = Watcher::new(
            reg.clone(),
            PresenceTracker::new(),
            log,
            Arc::new(Sightings::in_memory()),
        );
        (reg, w)
    }

    #[test]
    fn runs_recording_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("passages.txt");
        let (reg, mut w) = watcher(Some(PresenceLog::new(&log_path)));

        let mut rec = String::new();
        for i in 0..3 {
            rec.push_str(&format!(
                "{{\"ts\": {i}, \"faces\": [{{\"bbox\": [0,0,1,1], \"embedding\": [1.0, 0.0]}}]}}\n"
            ));
        }
        for i in 3..8 {
            rec.push_str(&format!("{{\"ts\": {i}, \"faces\": []}}\n"));
        }
        rec.push_str("{\"ts\": 8, \"faces\": [{\"bbox\": [0,0,1,1], \"embedding\": [0.0, 1.0]}]}\n");

        let mut src = ReplaySource::new(Cursor::new(rec), false);
        let summary = run(&mut w, &mut src, &mut ReplayDetector, &AtomicBool::new(false)).unwrap();

        assert_eq!(summary.frames, 9);
        assert_eq!(summary.faces, 4);
        assert_eq!(summary.created, 2);
        // begin + end for the first face, begin + shutdown end for the second.
        assert_eq!(summary.presence_records, 4);
        assert_eq!(reg.len(), 2);

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 4);
    }

    #[test]
    fn stop_flag_ends_run() {
        let (_, mut w) = watcher(None);
        let mut src = ReplaySource::new(Cursor::new("{\"faces\": []}\n"), false);
        let summary = run(&mut w, &mut src, &mut ReplayDetector, &AtomicBool::new(true)).unwrap();
        assert_eq!(summary.frames, 0);
    }

    struct BrokenCamera;

    impl FrameSource for BrokenCamera {
        fn next_frame(&mut self) -> Result<Option<Frame>, FaceIdError> {
            Err(FaceIdError::Io(std::io::Error::other("device unplugged")))
        }
    }

    #[test]
    fn capture_failure_is_fatal() {
        let (_, mut w) = watcher(None);
        let err = run(&mut w, &mut BrokenCamera, &mut ReplayDetector, &AtomicBool::new(false));
        assert!(err.is_err());
    }
}
