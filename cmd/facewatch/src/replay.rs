//! Replays precomputed detector output.
//!
//! Input is JSON Lines, one frame per line:
//!
//! ```text
//! {"ts": 0.5, "faces": [{"bbox": [x, y, w, h], "embedding": [...], "crop": "<base64 jpeg>"}]}
//! ```
//!
//! `ts` (seconds from the start of the recording) and `crop` are optional.
//! [`ReplaySource`] hands each line to [`ReplayDetector`] as frame data,
//! so the pair stands in for a camera and a face model.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use giztoy_faceid::{BoundingBox, Detection, FaceDetector, FaceIdError, Frame, FrameSource};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    ts: Option<f64>,
    #[serde(default)]
    faces: Vec<ReplayFace>,
}

#[derive(Debug, Deserialize)]
struct ReplayFace {
    bbox: [i32; 4],
    embedding: Vec<f32>,
    #[serde(default)]
    crop: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineTimestamp {
    #[serde(default)]
    ts: Option<f64>,
}

/// Reads frames from a JSON Lines recording.
pub struct ReplaySource<R> {
    lines: Lines<R>,
    index: u64,
    started_at: DateTime<Utc>,
    started: Instant,
    realtime: bool,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path, realtime: bool) -> Result<Self, FaceIdError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), realtime))
    }
}

impl<R: BufRead> ReplaySource<R> {
    /// With `realtime`, frames are released no faster than their `ts`.
    pub fn new(reader: R, realtime: bool) -> Self {
        Self {
            lines: reader.lines(),
            index: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            realtime,
        }
    }
}

impl<R: BufRead> FrameSource for ReplaySource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FaceIdError> {
        let line = loop {
            match self.lines.next() {
                None => return Ok(None),
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
            }
        };

        let ts = serde_json::from_str::<LineTimestamp>(&line)
            .map_err(|e| FaceIdError::Detector(format!("frame {}: {e}", self.index)))?
            .ts
            .filter(|t| t.is_finite() && *t >= 0.0);

        let captured_at = match ts {
            Some(secs) => {
                let out_of_range =
                    || FaceIdError::Detector(format!("frame {}: ts {secs} out of range", self.index));
                let captured_at = TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)
                    .and_then(|offset| self.started_at.checked_add_signed(offset))
                    .ok_or_else(out_of_range)?;
                if self.realtime {
                    let due = Duration::try_from_secs_f64(secs)
                        .ok()
                        .and_then(|offset| self.started.checked_add(offset))
                        .ok_or_else(out_of_range)?;
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                }
                captured_at
            }
            None => Utc::now(),
        };

        let frame = Frame {
            index: self.index,
            captured_at,
            data: line.into_bytes(),
        };
        self.index += 1;
        Ok(Some(frame))
    }
}

/// Decodes the detections carried in a replayed frame.
#[derive(Debug, Default)]
pub struct ReplayDetector;

impl FaceDetector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, FaceIdError> {
        let line: ReplayLine = serde_json::from_slice(&frame.data)
            .map_err(|e| FaceIdError::Detector(format!("frame {}: {e}", frame.index)))?;

        line.faces
            .into_iter()
            .map(|f| {
                let crop = match f.crop {
                    Some(b64) => Some(STANDARD.decode(b64.as_bytes()).map_err(|e| {
                        FaceIdError::Detector(format!("frame {}: bad crop: {e}", frame.index))
                    })?),
                    None => None,
                };
                Ok(Detection {
                    bbox: BoundingBox::from(f.bbox),
                    embedding: f.embedding,
                    crop,
                })
            })
            .collect()
    }
}
