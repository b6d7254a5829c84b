pub mod detections;

use mocap_rig::config::MocapSettings;
use mocap_rig::detection::ReplayProvider;
use mocap_rig::video::SyntheticBackend;
use mocap_rig::{MemoryScene, MocapStudio};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const FPS: f64 = 25.0;

/// Studio over an empty in-memory scene whose captures produce `frames`
/// blank images.
pub fn studio(frames: usize) -> MocapStudio<MemoryScene> {
    let settings = MocapSettings {
        output_directory: std::env::temp_dir().join(format!("mocap_rig_{}", uuid::Uuid::new_v4())),
        ..MocapSettings::default()
    };
    MocapStudio::new(settings, MemoryScene::new(), backend(frames), ReplayProvider::default())
}

pub fn backend(frames: usize) -> SyntheticBackend {
    SyntheticBackend {
        width: WIDTH,
        height: HEIGHT,
        fps: FPS,
        frames,
    }
}
