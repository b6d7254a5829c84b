use mocap_rig::detection::{DetectedEntity, EntityTag};
use mocap_rig::transform::Point3;

/// A standing figure in pixel space; `shift` slides it along x so front and
/// side recordings are told apart.
pub fn body(shift: f64) -> DetectedEntity {
    let landmarks = (0..33)
        .map(|i| {
            let i = i as f64;
            Point3::new(200.0 + shift + 7.0 * i, 60.0 + 11.0 * i, -3.0 * i)
        })
        .collect();
    DetectedEntity::new(EntityTag::Body, landmarks)
}

pub fn hand(tag: EntityTag, shift: f64) -> DetectedEntity {
    let landmarks = (0..21)
        .map(|i| {
            let i = i as f64;
            Point3::new(300.0 + shift + 4.0 * i, 200.0 - 5.0 * i, 2.0 * i)
        })
        .collect();
    DetectedEntity::new(tag, landmarks)
}

/// `frames` frames of one body each, the figure drifting right by one pixel
/// per frame.
pub fn body_recording(frames: usize, shift: f64) -> Vec<Vec<DetectedEntity>> {
    (0..frames).map(|f| vec![body(shift + f as f64)]).collect()
}

pub fn hand_recording(frames: usize, tags: &[EntityTag]) -> Vec<Vec<DetectedEntity>> {
    (0..frames)
        .map(|f| tags.iter().map(|&tag| hand(tag, f as f64)).collect())
        .collect()
}
