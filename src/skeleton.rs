// src/skeleton.rs - Procedural rig construction from bone-pair topologies
use crate::data::Entity;
use crate::error::{MocapError, Result};
use crate::scene::{LinkSpec, NodeId, RigHost, SceneSink, TrackAxis};
use crate::transform::Point3;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info};

pub const ROOT_COLLECTION: &str = "Roots";

/// Body bone pairs over the 33 raw and 7 derived landmarks.
pub const BODY_TOPOLOGY: [(usize, usize); 18] = [
    (7, 8),
    (11, 12),
    (23, 24),
    (16, 35),
    (15, 36),
    (11, 13),
    (13, 15),
    (33, 34),
    (38, 39),
    (12, 14),
    (14, 16),
    (34, 37),
    (24, 26),
    (26, 28),
    (28, 32),
    (23, 25),
    (25, 27),
    (27, 31),
];

pub const HAND_TOPOLOGY: [(usize, usize); 24] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (5, 6),
    (6, 7),
    (7, 8),
    (9, 10),
    (10, 11),
    (11, 12),
    (13, 14),
    (14, 15),
    (15, 16),
    (17, 18),
    (18, 19),
    (19, 20),
    (0, 5),
    (0, 9),
    (0, 13),
    (0, 17),
    (5, 9),
    (9, 13),
    (13, 17),
    (1, 5),
];

/// Per-pair adjustment applied once after a bone is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneOverride {
    pub pair: (usize, usize),
    pub axis: Option<TrackAxis>,
    /// Half turn about local Y, for segments whose rest orientation is inverted.
    pub flip: bool,
}

const fn axis_override(a: usize, b: usize, axis: TrackAxis) -> BoneOverride {
    BoneOverride {
        pair: (a, b),
        axis: Some(axis),
        flip: false,
    }
}

const fn flip_override(a: usize, b: usize) -> BoneOverride {
    BoneOverride {
        pair: (a, b),
        axis: None,
        flip: true,
    }
}

pub const BODY_OVERRIDES: [BoneOverride; 9] = [
    // ears, shoulders, hips span sideways
    axis_override(7, 8, TrackAxis::NegX),
    axis_override(11, 12, TrackAxis::NegX),
    axis_override(23, 24, TrackAxis::NegX),
    // arms
    flip_override(12, 14),
    flip_override(11, 13),
    flip_override(13, 15),
    flip_override(14, 16),
    flip_override(16, 35),
    flip_override(15, 36),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RigKind {
    Body,
    RightHand,
    LeftHand,
}

impl RigKind {
    pub fn from_entity(entity: Entity) -> Self {
        match entity {
            Entity::Body => RigKind::Body,
            Entity::RightHand => RigKind::RightHand,
            Entity::LeftHand => RigKind::LeftHand,
        }
    }

    pub fn entity(self) -> Entity {
        match self {
            RigKind::Body => Entity::Body,
            RigKind::RightHand => Entity::RightHand,
            RigKind::LeftHand => Entity::LeftHand,
        }
    }

    pub fn point_count(self) -> usize {
        self.entity().point_count()
    }

    pub fn topology(self) -> &'static [(usize, usize)] {
        match self {
            RigKind::Body => &BODY_TOPOLOGY,
            RigKind::RightHand | RigKind::LeftHand => &HAND_TOPOLOGY,
        }
    }

    pub fn overrides(self) -> &'static [BoneOverride] {
        match self {
            RigKind::Body => &BODY_OVERRIDES,
            RigKind::RightHand | RigKind::LeftHand => &[],
        }
    }

    pub fn root_name(self) -> &'static str {
        match self {
            RigKind::Body => "BodyRoot",
            RigKind::RightHand => "RightHandRoot",
            RigKind::LeftHand => "LeftHandRoot",
        }
    }

    pub fn joint_collection(self) -> &'static str {
        match self {
            RigKind::Body => "BodyJoints",
            RigKind::RightHand => "RightHandJoints",
            RigKind::LeftHand => "LeftHandJoints",
        }
    }

    pub fn bone_collection(self) -> &'static str {
        match self {
            RigKind::Body => "BodyBones",
            RigKind::RightHand => "RightHandBones",
            RigKind::LeftHand => "LeftHandBones",
        }
    }

    pub fn joint_name(self, index: usize) -> String {
        match self {
            RigKind::Body => format!("P_j{}", index),
            RigKind::RightHand => format!("R_j{}", index),
            RigKind::LeftHand => format!("L_j{}", index),
        }
    }

    pub fn bone_name(self, a: usize, b: usize) -> String {
        match self {
            RigKind::Body => format!("bone_{}_{}", a, b),
            RigKind::RightHand => format!("R_bone_{}_{}", a, b),
            RigKind::LeftHand => format!("L_bone_{}_{}", a, b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bone {
    pub pair: (usize, usize),
    pub node: NodeId,
}

/// Handles to one rig instance in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Rig {
    pub kind: RigKind,
    pub root: NodeId,
    pub joints: Vec<NodeId>,
    pub bones: Vec<Bone>,
}

/// Creates one bone per topology pair, in table order. Each bone is parented
/// to joint `a`, hooked to joint `b` and tracks `b` along `axis`.
///
/// Panics if a pair references a joint outside `joints`.
pub fn build_skeleton(
    scene: &mut dyn SceneSink,
    topology: &[(usize, usize)],
    joints: &[NodeId],
    axis: TrackAxis,
    bone_name: &dyn Fn(usize, usize) -> String,
    collection: &str,
) -> Vec<Bone> {
    topology
        .iter()
        .map(|&(a, b)| {
            assert!(
                a < joints.len() && b < joints.len(),
                "bone ({}, {}) out of range for {} joints",
                a,
                b,
                joints.len()
            );
            let tail = joints[a];
            let head = joints[b];
            let direction = scene.position(head) - scene.position(tail);
            let node = scene.create_link(&LinkSpec {
                name: bone_name(a, b),
                collection: collection.to_string(),
                tail,
                head,
                direction,
                axis,
            });
            Bone { pair: (a, b), node }
        })
        .collect()
}

fn apply_overrides(scene: &mut dyn SceneSink, bones: &[Bone], overrides: &[BoneOverride]) {
    let half_turn = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::PI);

    for bone in bones {
        let Some(o) = overrides.iter().find(|o| o.pair == bone.pair) else {
            continue;
        };
        if let Some(axis) = o.axis {
            scene.set_constraint_axis(bone.node, axis);
        }
        if o.flip {
            scene.set_rest_rotation(bone.node, half_turn);
        }
    }
}

/// Returns the rig of `kind`, creating whatever part of it is missing. Joints
/// are placed at `rest` (scene axes, relative to the root) when given. Calling
/// this on a complete rig only looks the nodes up.
pub fn ensure_rig(scene: &mut dyn SceneSink, kind: RigKind, axis: TrackAxis, rest: &[Point3]) -> Rig {
    let root = match scene.find(kind.root_name()) {
        Some(root) => root,
        None => scene.create_point(kind.root_name(), ROOT_COLLECTION, None, Point3::zeros()),
    };

    let joints: Vec<NodeId> = (0..kind.point_count())
        .map(|i| {
            let name = kind.joint_name(i);
            match scene.find(&name) {
                Some(joint) => joint,
                None => {
                    let position = rest.get(i).copied().unwrap_or_else(Point3::zeros);
                    scene.create_point(&name, kind.joint_collection(), Some(root), position)
                }
            }
        })
        .collect();

    let mut bones = Vec::with_capacity(kind.topology().len());
    let mut missing = Vec::new();
    for &(a, b) in kind.topology() {
        match scene.find(&kind.bone_name(a, b)) {
            Some(node) => bones.push(Bone { pair: (a, b), node }),
            None => missing.push((a, b)),
        }
    }

    if missing.is_empty() {
        debug!("{} already built", kind.root_name());
    } else {
        let built = build_skeleton(
            scene,
            &missing,
            &joints,
            axis,
            &|a, b| kind.bone_name(a, b),
            kind.bone_collection(),
        );
        apply_overrides(scene, &built, kind.overrides());
        info!(
            "Built {} with {} joints and {} bones",
            kind.root_name(),
            joints.len(),
            built.len()
        );
        bones.extend(built);
        let order = kind.topology();
        bones.sort_by_key(|bone| order.iter().position(|&p| p == bone.pair));
    }

    Rig {
        kind,
        root,
        joints,
        bones,
    }
}

/// Mutes every track constraint of the rig if any is active, otherwise
/// unmutes all. A muted bone stops following its head joint and stays at its
/// rest orientation while the joints keep moving.
/// Returns the number of constraints and whether they are now muted.
pub fn toggle_constraints(host: &mut dyn RigHost, rig: &str) -> Result<(usize, bool)> {
    let bones = host
        .rig_bones(rig)
        .ok_or_else(|| MocapError::InvalidRig(rig.to_string()))?;
    if bones.is_empty() {
        return Err(MocapError::NoBones);
    }

    let mute = bones.iter().any(|&b| !host.constraint_muted(b));
    for &bone in &bones {
        host.set_constraint_muted(bone, mute);
    }

    info!(
        "{} {} constraint(s) on {}",
        if mute { "Muted" } else { "Unmuted" },
        bones.len(),
        rig
    );
    Ok((bones.len(), mute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryScene;

    #[test]
    fn test_topologies_stay_in_range() {
        for kind in [RigKind::Body, RigKind::RightHand, RigKind::LeftHand] {
            let n = kind.point_count();
            assert!(kind.topology().iter().all(|&(a, b)| a < n && b < n));
        }
        assert_eq!(BODY_TOPOLOGY.len(), 18);
        assert_eq!(HAND_TOPOLOGY.len(), 24);
    }

    #[test]
    fn test_bone_directions() {
        let mut scene = MemoryScene::new();
        let root = scene.create_point("Root", ROOT_COLLECTION, None, Point3::zeros());
        let joints: Vec<NodeId> = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 1.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, p)| scene.create_point(&format!("j{}", i), "Joints", Some(root), *p))
        .collect();

        let bones = build_skeleton(
            &mut scene,
            &[(0, 1), (1, 2)],
            &joints,
            TrackAxis::Y,
            &|a, b| format!("b{}{}", a, b),
            "Bones",
        );

        assert_eq!(bones.len(), 2);
        let first = scene.link(bones[0].node).unwrap();
        assert_eq!(first.direction, Point3::new(0.0, 1.0, 0.0));
        assert_eq!(first.tail, joints[0]);
        assert_eq!(first.head, joints[1]);
        assert_eq!(scene.node(bones[0].node).parent, Some(joints[0]));
        assert_eq!(scene.link(bones[1].node).unwrap().direction, Point3::new(0.0, 0.0, 1.0));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_pair_panics() {
        let mut scene = MemoryScene::new();
        let j = scene.create_point("j0", "Joints", None, Point3::zeros());
        build_skeleton(&mut scene, &[(0, 1)], &[j], TrackAxis::Y, &|a, b| format!("{}{}", a, b), "Bones");
    }

    #[test]
    fn test_ensure_rig_is_idempotent() {
        let mut scene = MemoryScene::new();
        let first = ensure_rig(&mut scene, RigKind::Body, TrackAxis::Y, &[]);
        let count = scene.len();
        assert_eq!(count, 1 + 40 + 18);

        let second = ensure_rig(&mut scene, RigKind::Body, TrackAxis::Y, &[]);
        assert_eq!(scene.len(), count);
        assert_eq!(first, second);

        ensure_rig(&mut scene, RigKind::LeftHand, TrackAxis::Y, &[]);
        assert_eq!(scene.len(), count + 1 + 21 + 24);
        assert_eq!(scene.collection("LeftHandBones").len(), 24);
    }

    #[test]
    fn test_ensure_rig_restores_missing_bones_only() {
        let mut scene = MemoryScene::new();
        ensure_rig(&mut scene, RigKind::RightHand, TrackAxis::Y, &[]);
        // rename a bone away so it no longer resolves
        let json = scene.to_json().unwrap().replace("\"R_bone_0_1\"", "\"old\"");
        let mut scene: MemoryScene = serde_json::from_str(&json).unwrap();
        let before = scene.len();

        let rig = ensure_rig(&mut scene, RigKind::RightHand, TrackAxis::Y, &[]);
        assert_eq!(scene.len(), before + 1);
        assert_eq!(rig.bones.len(), 24);
        assert_eq!(rig.bones[0].pair, (0, 1));
    }

    #[test]
    fn test_body_overrides_applied() {
        let mut scene = MemoryScene::new();
        let rig = ensure_rig(&mut scene, RigKind::Body, TrackAxis::Y, &[]);
        let node = |pair| rig.bones.iter().find(|b| b.pair == pair).unwrap().node;

        assert_eq!(scene.link(node((11, 12))).unwrap().axis, TrackAxis::NegX);
        assert_eq!(scene.link(node((26, 28))).unwrap().axis, TrackAxis::Y);

        let flipped = scene.link(node((13, 15))).unwrap().rest_rotation;
        assert!((flipped.angle() - std::f64::consts::PI).abs() < 1e-9);
        assert_eq!(scene.link(node((24, 26))).unwrap().rest_rotation, UnitQuaternion::identity());
    }

    #[test]
    fn test_joints_start_at_rest_positions() {
        let mut scene = MemoryScene::new();
        let rest: Vec<Point3> = (0..21).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let rig = ensure_rig(&mut scene, RigKind::LeftHand, TrackAxis::Y, &rest);
        assert_eq!(scene.position(rig.joints[4]), Point3::new(4.0, 0.0, 0.0));
        assert_eq!(scene.node(rig.joints[4]).name, "L_j4");
        let link = scene.link(rig.bones[0].node).unwrap();
        assert_eq!(link.direction, Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_toggle_constraints() {
        let mut scene = MemoryScene::new();
        let rig = ensure_rig(&mut scene, RigKind::RightHand, TrackAxis::Y, &[]);

        assert_eq!(toggle_constraints(&mut scene, "RightHandRoot").unwrap(), (24, true));
        assert!(RigHost::constraint_muted(&scene, rig.bones[3].node));

        // one active constraint is enough to mute all again
        RigHost::set_constraint_muted(&mut scene, rig.bones[3].node, false);
        assert_eq!(toggle_constraints(&mut scene, "RightHandRoot").unwrap(), (24, true));
        assert_eq!(toggle_constraints(&mut scene, "RightHandRoot").unwrap(), (24, false));

        assert!(matches!(
            toggle_constraints(&mut scene, "NoSuchRig"),
            Err(MocapError::InvalidRig(_))
        ));
    }
}
