// src/main.rs
use anyhow::{bail, Context, Result};
use chrono::Local;
use mocap_rig::bake::{BakeRequest, BoneFilter};
use mocap_rig::data::{export_csv, CaptureGroup, View};
use mocap_rig::detection::ReplayProvider;
use mocap_rig::skeleton::RigKind;
use mocap_rig::tracking::{Feed, TrackingMode};
use mocap_rig::video::{SyntheticBackend, VideoBackend};
use mocap_rig::{MemoryScene, MocapSettings, MocapStudio};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: mocap_rig <pose|hand> <front_detections.json> [side_detections.json] \
[--front-video FILE] [--side-video FILE] [--out DIR] [--config FILE]";

struct Args {
    group: CaptureGroup,
    front: PathBuf,
    side: Option<PathBuf>,
    front_video: Option<PathBuf>,
    side_video: Option<PathBuf>,
    out: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf> {
    args.next()
        .map(PathBuf::from)
        .with_context(|| format!("{} needs a value\n{}", flag, USAGE))
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut front_video = None;
    let mut side_video = None;
    let mut out = None;
    let mut config = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--front-video" => front_video = Some(flag_value(&mut args, &arg)?),
            "--side-video" => side_video = Some(flag_value(&mut args, &arg)?),
            "--out" => out = Some(flag_value(&mut args, &arg)?),
            "--config" => config = Some(flag_value(&mut args, &arg)?),
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    if positional.len() < 2 || positional.len() > 3 {
        bail!(USAGE);
    }
    let group: CaptureGroup = positional[0].parse()?;

    Ok(Args {
        group,
        front: PathBuf::from(&positional[1]),
        side: positional.get(2).map(PathBuf::from),
        front_video,
        side_video,
        out,
        config,
    })
}

fn track_view(
    studio: &mut MocapStudio<MemoryScene>,
    group: CaptureGroup,
    view: View,
    detections: &PathBuf,
    video: Option<&PathBuf>,
) -> Result<usize> {
    let provider = ReplayProvider::load(detections)?;
    info!("Loaded {} frame(s) of detections from {}", provider.frame_count(), detections.display());

    // without a video the recorded detections are replayed over blank frames
    let video_path = match video {
        Some(path) => {
            studio.set_capture_backend(VideoBackend);
            path.clone()
        }
        None => {
            let settings = studio.settings();
            let backend = SyntheticBackend {
                width: settings.preview_width,
                height: settings.preview_height,
                fps: settings.fallback_fps,
                frames: provider.frame_count(),
            };
            studio.set_capture_backend(backend);
            detections.with_extension("mp4")
        }
    };
    studio.set_detector_provider(provider);
    studio.select_video(group, view, &video_path)?;

    let feed = match view {
        View::Front => Feed::Front,
        View::Side => Feed::Side,
    };
    studio.start_tracking(TrackingMode::new(group, feed))?;
    Ok(studio.run_to_end(group))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args()?;
    let settings = match &args.config {
        Some(path) => MocapSettings::load(path)?,
        None => MocapSettings::load_or_default(),
    };
    let output_dir = args
        .out
        .clone()
        .unwrap_or_else(|| settings.output_directory.clone())
        .join(format!("session_{}", Local::now().format("%Y%m%d_%H%M%S")));

    let mut studio = MocapStudio::new(
        settings,
        MemoryScene::new(),
        VideoBackend,
        ReplayProvider::default(),
    );

    let frames = track_view(&mut studio, args.group, View::Front, &args.front, args.front_video.as_ref())?;
    info!("Front view: {} frame(s)", frames);

    if let Some(side) = &args.side {
        let frames = track_view(&mut studio, args.group, View::Side, side, args.side_video.as_ref())?;
        info!("Side view: {} frame(s)", frames);
        for (entity, count) in studio.combine(args.group) {
            info!("Fused {} into {} frame(s)", entity.label(), count);
        }
    }

    for &entity in args.group.entities() {
        let buffer = &studio.store().buffers(entity).primary;
        if buffer.is_empty() {
            continue;
        }
        let name = entity.label().replace(' ', "_");
        let path = export_csv(buffer, output_dir.join(format!("{}.csv", name)))?;
        info!("Landmarks written to {}", path.display());
    }

    let kinds: Vec<RigKind> = match args.group {
        CaptureGroup::Pose => {
            studio.animate_pose();
            vec![RigKind::Body]
        }
        CaptureGroup::Hand => studio
            .animate_hands()
            .into_iter()
            .map(RigKind::from_entity)
            .collect(),
    };

    let timeline = studio.scene().timeline();
    for kind in kinds {
        let request = BakeRequest {
            rig: kind.root_name().to_string(),
            start: timeline.start,
            end: timeline.end,
            filter: BoneFilter::All,
        };
        match studio.bake(&request) {
            Ok(report) => info!("Baked {} bone(s) of {}", report.bones, report.rig),
            Err(e) => warn!("Skipping bake of {}: {}", request.rig, e),
        }
    }

    let scene_path = output_dir.join("scene.json");
    studio.scene().save(&scene_path)?;
    info!("Scene written to {}", scene_path.display());
    Ok(())
}
