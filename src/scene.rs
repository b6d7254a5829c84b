// src/scene.rs - Scene sink abstraction and the in-memory scene
use crate::error::Result;
use crate::transform::Point3;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Local axis a bone's track constraint points at its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackAxis {
    X,
    Y,
    Z,
    NegX,
    NegY,
    NegZ,
}

impl TrackAxis {
    pub fn vector(self) -> Point3 {
        match self {
            TrackAxis::X => Vector3::x(),
            TrackAxis::Y => Vector3::y(),
            TrackAxis::Z => Vector3::z(),
            TrackAxis::NegX => -Vector3::x(),
            TrackAxis::NegY => -Vector3::y(),
            TrackAxis::NegZ => -Vector3::z(),
        }
    }
}

impl Default for TrackAxis {
    fn default() -> Self {
        TrackAxis::Y
    }
}

/// A bone between two joints. The link is parented to `tail`, its far end is
/// hooked to `head`, and a track constraint aims `axis` at `head`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSpec {
    pub name: String,
    pub collection: String,
    pub tail: NodeId,
    pub head: NodeId,
    /// `head - tail` at creation time.
    pub direction: Point3,
    pub axis: TrackAxis,
}

/// Everything the rig and animation code needs from a host scene.
pub trait SceneSink {
    fn find(&self, name: &str) -> Option<NodeId>;
    fn create_point(&mut self, name: &str, collection: &str, parent: Option<NodeId>, position: Point3) -> NodeId;
    /// Position relative to the parent.
    fn position(&self, node: NodeId) -> Point3;
    fn world_position(&self, node: NodeId) -> Point3;
    fn set_transform(&mut self, node: NodeId, position: Point3);
    /// Records the node's current position at `frame`.
    fn keyframe(&mut self, node: NodeId, frame: i32);
    fn create_link(&mut self, spec: &LinkSpec) -> NodeId;
    fn set_constraint_axis(&mut self, link: NodeId, axis: TrackAxis);
    fn set_rest_rotation(&mut self, link: NodeId, rotation: UnitQuaternion<f64>);
    fn constraint_muted(&self, link: NodeId) -> bool;
    fn set_constraint_muted(&mut self, link: NodeId, muted: bool);
    fn set_timeline(&mut self, start: i32, end: i32, fps: u32);
    /// Members of the named collection, empty if there is no such collection.
    fn collection_nodes(&self, collection: &str) -> Vec<NodeId>;
    fn is_hidden(&self, node: NodeId) -> bool;
    fn set_hidden(&mut self, node: NodeId, hidden: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneTransform {
    pub location: Point3,
    pub rotation: UnitQuaternion<f64>,
    pub length: f64,
}

/// Armature-like view of the scene used by bake and constraint toggling.
pub trait RigHost {
    /// Bones under the rig root called `rig`, `None` if there is no such rig.
    fn rig_bones(&self, rig: &str) -> Option<Vec<NodeId>>;
    fn is_selected(&self, node: NodeId) -> bool;
    fn node_name(&self, node: NodeId) -> &str;
    /// World transform with the track constraint resolved at `frame`.
    fn effective_transform(&self, bone: NodeId, frame: i32) -> BoneTransform;
    fn store_baked(&mut self, bone: NodeId, frame: i32, transform: BoneTransform);
    fn constraint_muted(&self, link: NodeId) -> bool;
    fn set_constraint_muted(&mut self, link: NodeId, muted: bool);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub tail: NodeId,
    pub head: NodeId,
    pub direction: Point3,
    pub axis: TrackAxis,
    pub muted: bool,
    pub rest_rotation: UnitQuaternion<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub name: String,
    pub collection: String,
    pub parent: Option<NodeId>,
    pub position: Point3,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keyframes: BTreeMap<i32, Point3>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baked: BTreeMap<i32, BoneTransform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub start: i32,
    pub end: i32,
    pub fps: u32,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            start: 1,
            end: 250,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryScene {
    nodes: Vec<SceneNode>,
    timeline: Timeline,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &SceneNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn collection(&self, name: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.collection == name)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn timeline(&self) -> Timeline {
        self.timeline
    }

    pub fn select(&mut self, node: NodeId, selected: bool) {
        self.nodes[node.0].selected = selected;
    }

    pub fn link(&self, node: NodeId) -> Option<&Link> {
        self.nodes[node.0].link.as_ref()
    }

    /// Local position at `frame`, linearly interpolated between keyframes and
    /// held constant outside them. Nodes without keyframes keep their current
    /// position.
    pub fn sample(&self, node: NodeId, frame: i32) -> Point3 {
        let n = &self.nodes[node.0];
        let before = n.keyframes.range(..=frame).next_back();
        let after = n.keyframes.range(frame..).next();

        match (before, after) {
            (Some((&f0, p0)), Some((&f1, p1))) if f1 != f0 => {
                let t = (frame - f0) as f64 / (f1 - f0) as f64;
                p0 + (p1 - p0) * t
            }
            (Some((_, p)), _) | (None, Some((_, p))) => *p,
            (None, None) => n.position,
        }
    }

    pub fn world_position_at(&self, node: NodeId, frame: i32) -> Point3 {
        let mut position = self.sample(node, frame);
        let mut parent = self.nodes[node.0].parent;
        while let Some(p) = parent {
            position += self.sample(p, frame);
            parent = self.nodes[p.0].parent;
        }
        position
    }

    fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut parent = self.nodes[node.0].parent;
        while let Some(p) = parent {
            if p == ancestor {
                return true;
            }
            parent = self.nodes[p.0].parent;
        }
        false
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    fn push(&mut self, node: SceneNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        debug!("Created {} in {}", node.name, node.collection);
        self.nodes.push(node);
        id
    }
}

impl SceneSink for MemoryScene {
    fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    fn create_point(&mut self, name: &str, collection: &str, parent: Option<NodeId>, position: Point3) -> NodeId {
        self.push(SceneNode {
            name: name.to_string(),
            collection: collection.to_string(),
            parent,
            position,
            keyframes: BTreeMap::new(),
            selected: false,
            hidden: false,
            link: None,
            baked: BTreeMap::new(),
        })
    }

    fn position(&self, node: NodeId) -> Point3 {
        self.nodes[node.0].position
    }

    fn world_position(&self, node: NodeId) -> Point3 {
        let mut position = self.nodes[node.0].position;
        let mut parent = self.nodes[node.0].parent;
        while let Some(p) = parent {
            position += self.nodes[p.0].position;
            parent = self.nodes[p.0].parent;
        }
        position
    }

    fn set_transform(&mut self, node: NodeId, position: Point3) {
        self.nodes[node.0].position = position;
    }

    fn keyframe(&mut self, node: NodeId, frame: i32) {
        let n = &mut self.nodes[node.0];
        n.keyframes.insert(frame, n.position);
    }

    fn create_link(&mut self, spec: &LinkSpec) -> NodeId {
        self.push(SceneNode {
            name: spec.name.clone(),
            collection: spec.collection.clone(),
            parent: Some(spec.tail),
            position: Point3::zeros(),
            keyframes: BTreeMap::new(),
            selected: false,
            hidden: false,
            link: Some(Link {
                tail: spec.tail,
                head: spec.head,
                direction: spec.direction,
                axis: spec.axis,
                muted: false,
                rest_rotation: UnitQuaternion::identity(),
            }),
            baked: BTreeMap::new(),
        })
    }

    fn set_constraint_axis(&mut self, link: NodeId, axis: TrackAxis) {
        if let Some(l) = self.nodes[link.0].link.as_mut() {
            l.axis = axis;
        }
    }

    fn set_rest_rotation(&mut self, link: NodeId, rotation: UnitQuaternion<f64>) {
        if let Some(l) = self.nodes[link.0].link.as_mut() {
            l.rest_rotation = rotation;
        }
    }

    fn constraint_muted(&self, link: NodeId) -> bool {
        self.nodes[link.0].link.as_ref().map(|l| l.muted).unwrap_or(false)
    }

    fn set_constraint_muted(&mut self, link: NodeId, muted: bool) {
        if let Some(l) = self.nodes[link.0].link.as_mut() {
            l.muted = muted;
        }
    }

    fn set_timeline(&mut self, start: i32, end: i32, fps: u32) {
        self.timeline = Timeline { start, end, fps };
    }

    fn collection_nodes(&self, collection: &str) -> Vec<NodeId> {
        self.collection(collection)
    }

    fn is_hidden(&self, node: NodeId) -> bool {
        self.nodes[node.0].hidden
    }

    fn set_hidden(&mut self, node: NodeId, hidden: bool) {
        self.nodes[node.0].hidden = hidden;
    }
}

impl RigHost for MemoryScene {
    fn rig_bones(&self, rig: &str) -> Option<Vec<NodeId>> {
        let root = SceneSink::find(self, rig)?;
        if self.nodes[root.0].link.is_some() {
            return None;
        }
        Some(
            self.nodes()
                .filter(|(id, n)| n.link.is_some() && self.is_descendant_of(*id, root))
                .map(|(id, _)| id)
                .collect(),
        )
    }

    fn is_selected(&self, node: NodeId) -> bool {
        self.nodes[node.0].selected
    }

    fn node_name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].name
    }

    fn effective_transform(&self, bone: NodeId, frame: i32) -> BoneTransform {
        let location = self.world_position_at(bone, frame);
        let Some(link) = self.nodes[bone.0].link.as_ref() else {
            return BoneTransform {
                location,
                rotation: UnitQuaternion::identity(),
                length: 0.0,
            };
        };

        let target = self.world_position_at(link.head, frame) - self.world_position_at(link.tail, frame);
        let length = target.norm();
        let rest = link.rest_rotation;

        let rotation = if link.muted || length <= f64::EPSILON {
            rest
        } else {
            let aimed = rest * link.axis.vector();
            match UnitQuaternion::rotation_between(&aimed, &target) {
                Some(track) => track * rest,
                // antiparallel: any half turn about an axis orthogonal to `aimed`
                None => {
                    let ortho = aimed.cross(&Vector3::x());
                    let ortho = if ortho.norm() > 1e-9 { ortho } else { aimed.cross(&Vector3::y()) };
                    UnitQuaternion::from_axis_angle(&Unit::new_normalize(ortho), std::f64::consts::PI) * rest
                }
            }
        };

        BoneTransform {
            location,
            rotation,
            length,
        }
    }

    fn store_baked(&mut self, bone: NodeId, frame: i32, transform: BoneTransform) {
        self.nodes[bone.0].baked.insert(frame, transform);
    }

    fn constraint_muted(&self, link: NodeId) -> bool {
        SceneSink::constraint_muted(self, link)
    }

    fn set_constraint_muted(&mut self, link: NodeId, muted: bool) {
        SceneSink::set_constraint_muted(self, link, muted)
    }
}
