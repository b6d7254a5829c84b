// src/animation.rs - Writes landmark frames onto rig joints
use crate::data::LandmarkBuffer;
use crate::scene::SceneSink;
use crate::skeleton::Rig;
use crate::transform::{to_scene_axes, Point3};
use tracing::debug;

/// Last timeline frame for buffers of the given lengths, never below 1.
pub fn timeline_end(lengths: &[usize]) -> i32 {
    lengths.iter().copied().max().unwrap_or(0).max(1) as i32
}

/// Sets the playback range to `[1, end]` at the rounded capture fps.
pub fn apply_timeline(scene: &mut dyn SceneSink, end: i32, fps: f64) {
    let fps = if fps.is_finite() && fps >= 1.0 { fps.round() as u32 } else { 1 };
    scene.set_timeline(1, end, fps);
    debug!("Timeline set to 1..={} at {} fps", end, fps);
}

/// Keyframes every buffered frame on the rig's joints, frame `k` of the
/// buffer landing on timeline frame `k + 1`. Positions are relative to the
/// root. Returns the number of frames written.
pub fn write_offline(scene: &mut dyn SceneSink, rig: &Rig, buffer: &LandmarkBuffer) -> usize {
    let root = scene.world_position(rig.root);

    for (k, frame) in buffer.frames().iter().enumerate() {
        let timeline_frame = k as i32 + 1;
        for (xyz, &joint) in frame.chunks_exact(3).zip(rig.joints.iter()) {
            let position = to_scene_axes(&Point3::new(xyz[0], xyz[1], xyz[2])) - root;
            scene.set_transform(joint, position);
            scene.keyframe(joint, timeline_frame);
        }
    }

    buffer.len()
}

/// Moves the joints straight to the latest live landmarks without keyframing.
pub fn write_live(scene: &mut dyn SceneSink, rig: &Rig, points: &[Point3]) -> usize {
    let root = scene.world_position(rig.root);
    let mut written = 0;
    for (point, &joint) in points.iter().zip(rig.joints.iter()) {
        scene.set_transform(joint, to_scene_axes(point) - root);
        written += 1;
    }
    written
}
