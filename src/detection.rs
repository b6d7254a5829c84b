// src/detection.rs - Contract for the external landmark detector
use crate::data::CaptureGroup;
use crate::transform::Point3;
use anyhow::{Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityTag {
    Body,
    Left,
    Right,
}

/// One detected body or hand with its landmarks in pixel coordinates
/// (z is the detector's own relative depth estimate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub tag: EntityTag,
    pub landmarks: Vec<Point3>,
}

impl DetectedEntity {
    pub fn new(tag: EntityTag, landmarks: Vec<Point3>) -> Self {
        Self { tag, landmarks }
    }
}

pub trait Detector {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedEntity>>;
}

/// Creates detectors on demand. Sessions call this lazily on their first
/// frame, so a missing backend only shows up once tracking actually runs.
pub trait DetectorProvider {
    fn create(&self, group: CaptureGroup, max_hands: usize, min_confidence: f32) -> Result<Box<dyn Detector>>;
}

/// Stands in for a detector backend that is not installed.
pub struct UnavailableProvider;

impl DetectorProvider for UnavailableProvider {
    fn create(&self, group: CaptureGroup, _max_hands: usize, _min_confidence: f32) -> Result<Box<dyn Detector>> {
        Err(anyhow::anyhow!("no {:?} detector backend is installed", group))
    }
}

/// Serves detections recorded ahead of time, one frame per call.
pub struct ReplayDetector {
    frames: VecDeque<Vec<DetectedEntity>>,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<DetectedEntity>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _frame: &DynamicImage) -> Result<Vec<DetectedEntity>> {
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplayProvider {
    recording: Vec<Vec<DetectedEntity>>,
}

impl ReplayProvider {
    pub fn new(recording: Vec<Vec<DetectedEntity>>) -> Self {
        Self { recording }
    }

    /// Reads a JSON list of frames, each a list of `{tag, landmarks}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections from {}", path.display()))?;
        let recording: Vec<Vec<DetectedEntity>> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid detection recording {}", path.display()))?;
        Ok(Self { recording })
    }

    pub fn frame_count(&self) -> usize {
        self.recording.len()
    }
}

impl DetectorProvider for ReplayProvider {
    fn create(&self, _group: CaptureGroup, _max_hands: usize, _min_confidence: f32) -> Result<Box<dyn Detector>> {
        Ok(Box::new(ReplayDetector::new(self.recording.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_serves_frames_in_order() {
        let frames = vec![
            vec![DetectedEntity::new(EntityTag::Right, vec![Point3::new(1.0, 2.0, 3.0)])],
            vec![],
        ];
        let mut detector = ReplayDetector::new(frames);
        let img = DynamicImage::new_rgb8(4, 4);

        let first = detector.detect(&img).unwrap();
        assert_eq!(first[0].tag, EntityTag::Right);
        assert!(detector.detect(&img).unwrap().is_empty());
        // past the end the detector keeps reporting nothing
        assert!(detector.detect(&img).unwrap().is_empty());
        assert_eq!(detector.remaining(), 0);
    }

    #[test]
    fn test_recording_json_shape() {
        let json = r#"[[{"tag":"Left","landmarks":[[10.0,20.0,-3.0]]}],[]]"#;
        let recording: Vec<Vec<DetectedEntity>> = serde_json::from_str(json).unwrap();
        assert_eq!(recording.len(), 2);
        assert_eq!(recording[0][0].tag, EntityTag::Left);
        assert_eq!(recording[0][0].landmarks[0], Point3::new(10.0, 20.0, -3.0));
    }

    #[test]
    fn test_unavailable_provider_errors() {
        assert!(UnavailableProvider.create(CaptureGroup::Pose, 1, 0.5).is_err());
    }
}
