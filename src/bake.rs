// src/bake.rs - Bakes constraint-driven bone motion into keyframes
use crate::error::{MocapError, Result};
use crate::scene::{BoneTransform, NodeId, RigHost};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoneFilter {
    #[default]
    All,
    /// Only selected bones. With nothing selected every bone is baked.
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BakeRequest {
    pub rig: String,
    pub start: i32,
    pub end: i32,
    pub filter: BoneFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BakeReport {
    pub rig: String,
    pub bones: usize,
    pub frames: usize,
}

/// Samples each bone's effective world transform over the frame range and
/// stores it as a baked track. Constraints are left in place. Nothing is
/// written when the request is rejected.
pub fn bake(host: &mut dyn RigHost, request: &BakeRequest) -> Result<BakeReport> {
    if request.start > request.end {
        return Err(MocapError::FrameRange {
            start: request.start,
            end: request.end,
        });
    }

    let all = host
        .rig_bones(&request.rig)
        .ok_or_else(|| MocapError::InvalidRig(request.rig.clone()))?;

    let bones: Vec<NodeId> = match request.filter {
        BoneFilter::All => all,
        BoneFilter::Selected => {
            let selected: Vec<NodeId> = all.iter().copied().filter(|&b| host.is_selected(b)).collect();
            if selected.is_empty() {
                warn!("No bones selected on {}, baking all bones", request.rig);
                all
            } else {
                selected
            }
        }
    };

    if bones.is_empty() {
        return Err(MocapError::NoBones);
    }

    let mut samples: Vec<(NodeId, i32, BoneTransform)> = Vec::new();
    for frame in request.start..=request.end {
        for &bone in &bones {
            samples.push((bone, frame, host.effective_transform(bone, frame)));
        }
    }
    for (bone, frame, transform) in samples {
        host.store_baked(bone, frame, transform);
    }

    let report = BakeReport {
        rig: request.rig.clone(),
        bones: bones.len(),
        frames: (request.end - request.start + 1) as usize,
    };
    info!(
        "Baked {} bone(s) of {} over frames {}..={}",
        report.bones, report.rig, request.start, request.end
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MemoryScene, SceneSink, TrackAxis};
    use crate::skeleton::{ensure_rig, RigKind};
    use crate::transform::Point3;
    use nalgebra::Vector3;

    fn request(rig: &str, start: i32, end: i32, filter: BoneFilter) -> BakeRequest {
        BakeRequest {
            rig: rig.to_string(),
            start,
            end,
            filter,
        }
    }

    #[test]
    fn test_bake_all_bones() {
        let mut scene = MemoryScene::new();
        let rig = ensure_rig(&mut scene, RigKind::RightHand, TrackAxis::Y, &[]);
        scene.set_transform(rig.joints[1], Point3::new(0.0, 0.0, 1.0));
        scene.keyframe(rig.joints[1], 1);
        scene.set_transform(rig.joints[1], Point3::new(1.0, 0.0, 0.0));
        scene.keyframe(rig.joints[1], 3);

        let report = bake(&mut scene, &request("RightHandRoot", 1, 3, BoneFilter::All)).unwrap();
        assert_eq!(report.bones, 24);
        assert_eq!(report.frames, 3);

        let baked = &scene.node(rig.bones[0].node).baked;
        assert_eq!(baked.len(), 3);
        let aimed_first = baked[&1].rotation * Vector3::y();
        let aimed_last = baked[&3].rotation * Vector3::y();
        assert!((aimed_first - Vector3::z()).norm() < 1e-9);
        assert!((aimed_last - Vector3::x()).norm() < 1e-9);
        // constraints survive the bake
        assert!(!SceneSink::constraint_muted(&scene, rig.bones[0].node));
    }

    #[test]
    fn test_bake_selected_only() {
        let mut scene = MemoryScene::new();
        let rig = ensure_rig(&mut scene, RigKind::LeftHand, TrackAxis::Y, &[]);
        scene.select(rig.bones[2].node, true);
        scene.select(rig.bones[5].node, true);

        let report = bake(&mut scene, &request("LeftHandRoot", 1, 1, BoneFilter::Selected)).unwrap();
        assert_eq!(report.bones, 2);
        assert!(scene.node(rig.bones[0].node).baked.is_empty());
        assert_eq!(scene.node(rig.bones[5].node).baked.len(), 1);
    }

    #[test]
    fn test_bake_selected_falls_back_to_all() {
        let mut scene = MemoryScene::new();
        ensure_rig(&mut scene, RigKind::LeftHand, TrackAxis::Y, &[]);
        let report = bake(&mut scene, &request("LeftHandRoot", 1, 2, BoneFilter::Selected)).unwrap();
        assert_eq!(report.bones, 24);
    }

    #[test]
    fn test_bake_rejects_bad_targets() {
        let mut scene = MemoryScene::new();
        assert!(matches!(
            bake(&mut scene, &request("BodyRoot", 1, 5, BoneFilter::All)),
            Err(MocapError::InvalidRig(_))
        ));

        scene.create_point("Empty", "Roots", None, Point3::zeros());
        assert!(matches!(
            bake(&mut scene, &request("Empty", 1, 5, BoneFilter::All)),
            Err(MocapError::NoBones)
        ));

        ensure_rig(&mut scene, RigKind::Body, TrackAxis::Y, &[]);
        assert!(matches!(
            bake(&mut scene, &request("BodyRoot", 5, 1, BoneFilter::All)),
            Err(MocapError::FrameRange { start: 5, end: 1 })
        ));
        assert!(scene.nodes().all(|(_, n)| n.baked.is_empty()));
    }
}
