// src/data.rs - Landmark buffers and the capture store that owns them
use crate::error::{MocapError, Result};
use crate::transform::{Point3, BODY_Z_SCALE, HAND_Z_SCALE};
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One time-step of landmarks flattened as `x0,y0,z0,x1,y1,z1,...`.
pub type Frame = Vec<f64>;

/// Timeline fps used until a capture source reports its own.
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Entity {
    Body,
    LeftHand,
    RightHand,
}

impl Entity {
    /// Landmarks reported by the body detector.
    pub const RAW_BODY_POINTS: usize = 33;
    /// Raw body landmarks plus the derived centroids.
    pub const BODY_POINTS: usize = 40;
    pub const HAND_POINTS: usize = 21;

    pub fn point_count(self) -> usize {
        match self {
            Entity::Body => Self::BODY_POINTS,
            Entity::LeftHand | Entity::RightHand => Self::HAND_POINTS,
        }
    }

    pub fn z_scale(self) -> f64 {
        match self {
            Entity::Body => BODY_Z_SCALE,
            Entity::LeftHand | Entity::RightHand => HAND_Z_SCALE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Entity::Body => "body",
            Entity::LeftHand => "left hand",
            Entity::RightHand => "right hand",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum View {
    /// Primary camera, facing the subject.
    Front,
    /// Secondary camera, used only as a depth proxy.
    Side,
}

/// Append-only sequence of frames for one (entity, view) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkBuffer {
    frames: Vec<Frame>,
}

impl LandmarkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Frame length is the caller's responsibility.
    pub fn append(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Swaps the whole content, used when fused frames replace the primary view.
    pub fn replace(&mut self, frames: Vec<Frame>) {
        self.frames = frames;
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityBuffers {
    pub primary: LandmarkBuffer,
    pub secondary: LandmarkBuffer,
}

impl EntityBuffers {
    pub fn view(&self, view: View) -> &LandmarkBuffer {
        match view {
            View::Front => &self.primary,
            View::Side => &self.secondary,
        }
    }

    pub fn view_mut(&mut self, view: View) -> &mut LandmarkBuffer {
        match view {
            View::Front => &mut self.primary,
            View::Side => &mut self.secondary,
        }
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        self.secondary.clear();
    }
}

/// Latest landmarks per entity for realtime mode, overwritten every tick.
#[derive(Debug, Clone, Default)]
pub struct LiveLandmarks {
    body: Vec<Point3>,
    left_hand: Vec<Point3>,
    right_hand: Vec<Point3>,
}

impl LiveLandmarks {
    pub fn get(&self, entity: Entity) -> &[Point3] {
        match entity {
            Entity::Body => &self.body,
            Entity::LeftHand => &self.left_hand,
            Entity::RightHand => &self.right_hand,
        }
    }

    pub fn set(&mut self, entity: Entity, points: &[Point3]) {
        let slot = match entity {
            Entity::Body => &mut self.body,
            Entity::LeftHand => &mut self.left_hand,
            Entity::RightHand => &mut self.right_hand,
        };
        slot.clear();
        slot.extend_from_slice(points);
    }

    pub fn clear(&mut self, entity: Entity) {
        self.set(entity, &[]);
    }
}

/// Which tracked subject a cache or fusion operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureGroup {
    Pose,
    Hand,
}

impl CaptureGroup {
    pub fn entities(self) -> &'static [Entity] {
        match self {
            CaptureGroup::Pose => &[Entity::Body],
            CaptureGroup::Hand => &[Entity::RightHand, Entity::LeftHand],
        }
    }
}

impl FromStr for CaptureGroup {
    type Err = MocapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pose" => Ok(CaptureGroup::Pose),
            "hand" => Ok(CaptureGroup::Hand),
            other => Err(MocapError::UnknownMode(other.to_string())),
        }
    }
}

/// Every buffer a capture run writes to, owned by the caller and passed to
/// the tracking sessions.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    body: EntityBuffers,
    left_hand: EntityBuffers,
    right_hand: EntityBuffers,
    live: LiveLandmarks,
    fps: f64,
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self {
            body: EntityBuffers::default(),
            left_hand: EntityBuffers::default(),
            right_hand: EntityBuffers::default(),
            live: LiveLandmarks::default(),
            fps: DEFAULT_FPS,
        }
    }
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffers(&self, entity: Entity) -> &EntityBuffers {
        match entity {
            Entity::Body => &self.body,
            Entity::LeftHand => &self.left_hand,
            Entity::RightHand => &self.right_hand,
        }
    }

    pub fn buffers_mut(&mut self, entity: Entity) -> &mut EntityBuffers {
        match entity {
            Entity::Body => &mut self.body,
            Entity::LeftHand => &mut self.left_hand,
            Entity::RightHand => &mut self.right_hand,
        }
    }

    pub fn live(&self) -> &LiveLandmarks {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut LiveLandmarks {
        &mut self.live
    }

    /// Playback rate recorded from the most recently opened capture source.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: f64) {
        self.fps = fps;
    }

    pub fn clear_group(&mut self, group: CaptureGroup) {
        for &entity in group.entities() {
            self.buffers_mut(entity).clear();
            self.live.clear(entity);
        }
    }
}

#[derive(Debug, Serialize)]
struct LandmarkRecord {
    frame: usize,
    landmark: usize,
    x: f64,
    y: f64,
    z: f64,
}

/// Writes one CSV row per (frame, landmark). Frames are numbered from 1 to
/// line up with the timeline.
pub fn export_csv(buffer: &LandmarkBuffer, path: impl AsRef<Path>) -> Result<PathBuf> {
    let csv_path = path.as_ref().to_path_buf();

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(&csv_path)?;
    let mut writer = Writer::from_writer(file);

    for (i, frame) in buffer.frames().iter().enumerate() {
        for (landmark, xyz) in frame.chunks_exact(3).enumerate() {
            writer.serialize(LandmarkRecord {
                frame: i + 1,
                landmark,
                x: xyz[0],
                y: xyz[1],
                z: xyz[2],
            })?;
        }
    }

    writer.flush()?;
    Ok(csv_path)
}
