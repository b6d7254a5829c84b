// src/studio.rs - Capture, fusion and rig operations behind one context
use crate::animation::{apply_timeline, timeline_end, write_live, write_offline};
use crate::bake::{bake, BakeReport, BakeRequest};
use crate::config::MocapSettings;
use crate::data::{CaptureGroup, CaptureStore, Entity, Frame, View};
use crate::detection::DetectorProvider;
use crate::error::{MocapError, Result};
use crate::fusion::combine_group;
use crate::scene::{RigHost, SceneSink};
use crate::skeleton::{ensure_rig, toggle_constraints, Rig, RigKind};
use crate::tracking::{Feed, Poll, TrackingMode, TrackingSession};
use crate::transform::{to_scene_axes, Point3};
use crate::video::{
    validate_video_path, CaptureBackend, HeadlessPreview, PreviewSurface, RecordingPreview, SourceSpec,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

type PreviewFactory = Box<dyn Fn(TrackingMode) -> Box<dyn PreviewSurface>>;

/// Owns the capture store, the running sessions and the scene the rigs live
/// in. Every operation the host exposes goes through here.
pub struct MocapStudio<S: SceneSink + RigHost> {
    settings: MocapSettings,
    store: CaptureStore,
    scene: S,
    backend: Box<dyn CaptureBackend>,
    provider: Rc<dyn DetectorProvider>,
    preview: PreviewFactory,
    sessions: HashMap<CaptureGroup, TrackingSession>,
    videos: HashMap<(CaptureGroup, View), PathBuf>,
    rigs: HashMap<RigKind, Rig>,
}

impl<S: SceneSink + RigHost> MocapStudio<S> {
    pub fn new(
        settings: MocapSettings,
        scene: S,
        backend: impl CaptureBackend + 'static,
        provider: impl DetectorProvider + 'static,
    ) -> Self {
        let record = settings.record_previews;
        let output = settings.output_directory.clone();
        let preview: PreviewFactory = Box::new(move |mode: TrackingMode| -> Box<dyn PreviewSurface> {
            if record {
                Box::new(RecordingPreview::new(&output, &mode.to_string()))
            } else {
                Box::new(HeadlessPreview::default())
            }
        });

        Self {
            settings,
            store: CaptureStore::new(),
            scene,
            backend: Box::new(backend),
            provider: Rc::new(provider),
            preview,
            sessions: HashMap::new(),
            videos: HashMap::new(),
            rigs: HashMap::new(),
        }
    }

    /// Replaces how preview surfaces are created for new sessions.
    pub fn with_preview<F>(mut self, factory: F) -> Self
    where
        F: Fn(TrackingMode) -> Box<dyn PreviewSurface> + 'static,
    {
        self.preview = Box::new(factory);
        self
    }

    /// Used by sessions started after this call.
    pub fn set_detector_provider(&mut self, provider: impl DetectorProvider + 'static) {
        self.provider = Rc::new(provider);
    }

    pub fn set_capture_backend(&mut self, backend: impl CaptureBackend + 'static) {
        self.backend = Box::new(backend);
    }

    pub fn settings(&self) -> &MocapSettings {
        &self.settings
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CaptureStore {
        &mut self.store
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn into_scene(self) -> S {
        self.scene
    }

    pub fn rig(&self, kind: RigKind) -> Option<&Rig> {
        self.rigs.get(&kind)
    }

    pub fn is_tracking(&self, group: CaptureGroup) -> bool {
        self.sessions.get(&group).map(|s| s.is_running()).unwrap_or(false)
    }

    pub fn video_path(&self, group: CaptureGroup, view: View) -> Option<&Path> {
        self.videos.get(&(group, view)).map(|p| p.as_path())
    }

    pub fn select_video(&mut self, group: CaptureGroup, view: View, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = validate_video_path(path).map_err(|e| {
            warn!("{}", e);
            e
        })?;
        info!("{:?} {:?} video set to {}", view, group, path.display());
        self.videos.insert((group, view), path.clone());
        Ok(path)
    }

    pub fn clear_video_path(&mut self, group: CaptureGroup, view: View) {
        if self.videos.remove(&(group, view)).is_some() {
            info!("Cleared {:?} {:?} video", view, group);
        }
    }

    /// Starts a session for `mode`. Once the new source is open, any session
    /// of the same group is stopped and the view buffers the new session
    /// writes to are emptied. A source that fails to open leaves the running
    /// session and the captured frames untouched.
    pub fn start_tracking(&mut self, mode: TrackingMode) -> Result<()> {
        let source = match mode.feed {
            Feed::Live => SourceSpec::Device(self.settings.camera_index),
            Feed::Front | Feed::Side => {
                let view = mode.feed.view();
                match self.videos.get(&(mode.group, view)) {
                    Some(path) => SourceSpec::File(path.clone()),
                    None => {
                        warn!("No {:?} video selected for {}", view, mode);
                        return Err(MocapError::CaptureOpen(format!("no video selected for {}", mode)));
                    }
                }
            }
        };

        let session = TrackingSession::start(
            mode,
            source,
            self.backend.as_ref(),
            self.provider.clone(),
            (self.preview)(mode),
            self.settings.session_options(),
        );
        if !session.is_running() {
            return Err(MocapError::CaptureOpen(session.source().to_string()));
        }

        if let Some(mut previous) = self.sessions.remove(&mode.group) {
            previous.stop();
        }
        for &entity in mode.group.entities() {
            self.store.buffers_mut(entity).view_mut(mode.feed.view()).clear();
            if mode.is_live() {
                self.store.live_mut().clear(entity);
            }
        }

        self.store.set_fps(session.fps());
        self.sessions.insert(mode.group, session);
        Ok(())
    }

    /// Same as [`start_tracking`](Self::start_tracking) for a textual mode tag.
    pub fn start_tracking_tag(&mut self, tag: &str) -> Result<()> {
        let mode: TrackingMode = tag.parse().map_err(|e| {
            warn!("{}", e);
            e
        })?;
        self.start_tracking(mode)
    }

    pub fn stop_tracking(&mut self, group: CaptureGroup) -> bool {
        match self.sessions.remove(&group) {
            Some(mut session) if session.is_running() => {
                session.stop();
                true
            }
            _ => {
                warn!("No tracking running");
                false
            }
        }
    }

    /// Runs one pump tick of the group's session. Live sessions also push the
    /// latest landmarks onto any rig already built for the group.
    pub fn tick(&mut self, group: CaptureGroup) -> Poll {
        let Some(session) = self.sessions.get_mut(&group) else {
            return Poll::Done;
        };

        let poll = session.advance(&mut self.store);
        let live = session.mode().is_live();
        if poll == Poll::Done {
            self.sessions.remove(&group);
        }

        if live {
            for &entity in group.entities() {
                let points = self.store.live().get(entity);
                if points.is_empty() {
                    continue;
                }
                if let Some(rig) = self.rigs.get(&RigKind::from_entity(entity)) {
                    write_live(&mut self.scene, rig, points);
                }
            }
        }

        poll
    }

    /// Ticks the group's session until it finishes, without waiting between
    /// ticks. Returns the number of frames pumped.
    pub fn run_to_end(&mut self, group: CaptureGroup) -> usize {
        let mut ticks = 0;
        while let Poll::Continue(_) = self.tick(group) {
            ticks += 1;
        }
        ticks
    }

    pub fn combine(&mut self, group: CaptureGroup) -> Vec<(Entity, usize)> {
        if self.is_tracking(group) {
            warn!("Stop tracking before combining views");
            return Vec::new();
        }
        combine_group(&mut self.store, group)
    }

    /// Keyframes the body buffer onto the body rig. Returns the frame count.
    pub fn animate_pose(&mut self) -> usize {
        let buffer = &self.store.buffers(Entity::Body).primary;
        let rest = rest_pose(buffer.get(0));
        let rig = ensure_rig(&mut self.scene, RigKind::Body, self.settings.bone_axis, &rest);

        let frames = write_offline(&mut self.scene, &rig, buffer);
        apply_timeline(&mut self.scene, timeline_end(&[buffer.len()]), self.store.fps());
        info!("Animated body over {} frame(s)", frames);

        self.rigs.insert(RigKind::Body, rig);
        frames
    }

    /// Keyframes each hand that has frames. Returns the hands animated.
    pub fn animate_hands(&mut self) -> Vec<Entity> {
        let mut animated = Vec::new();
        let mut lengths = Vec::new();

        for &entity in CaptureGroup::Hand.entities() {
            let buffer = &self.store.buffers(entity).primary;
            lengths.push(buffer.len());
            if buffer.is_empty() {
                continue;
            }

            let kind = RigKind::from_entity(entity);
            let rest = rest_pose(buffer.get(0));
            let rig = ensure_rig(&mut self.scene, kind, self.settings.bone_axis, &rest);
            let frames = write_offline(&mut self.scene, &rig, buffer);
            info!("Animated {} over {} frame(s)", entity.label(), frames);

            self.rigs.insert(kind, rig);
            animated.push(entity);
        }

        if animated.is_empty() {
            warn!("No hand frames to animate");
        }
        apply_timeline(&mut self.scene, timeline_end(&lengths), self.store.fps());
        animated
    }

    /// Builds both hand rigs and starts realtime hand tracking on the camera.
    pub fn start_live_hands(&mut self) -> Result<()> {
        for kind in [RigKind::RightHand, RigKind::LeftHand] {
            let rig = ensure_rig(&mut self.scene, kind, self.settings.bone_axis, &[]);
            self.rigs.insert(kind, rig);
        }
        self.start_tracking(TrackingMode::new(CaptureGroup::Hand, Feed::Live))
    }

    /// Empties the group's buffers and forgets its rig handles.
    pub fn clear_cache(&mut self, group: CaptureGroup) {
        self.store.clear_group(group);
        for &entity in group.entities() {
            self.rigs.remove(&RigKind::from_entity(entity));
        }
        info!("Cleared {:?} cache", group);
    }

    pub fn bake(&mut self, request: &BakeRequest) -> Result<BakeReport> {
        bake(&mut self.scene, request).map_err(|e| {
            warn!("Bake failed: {}", e);
            e
        })
    }

    pub fn toggle_constraints(&mut self, rig: &str) -> Result<(usize, bool)> {
        toggle_constraints(&mut self.scene, rig)
    }

    /// Flips the hidden flag of every node in `collection` (for example
    /// `BodyJoints` or `RightHandBones`). Returns how many nodes changed.
    pub fn toggle_collection_visibility(&mut self, collection: &str) -> usize {
        let nodes = self.scene.collection_nodes(collection);
        if nodes.is_empty() {
            warn!("Collection {} not found", collection);
            return 0;
        }
        for &node in &nodes {
            let hidden = self.scene.is_hidden(node);
            self.scene.set_hidden(node, !hidden);
        }
        debug!("Toggled visibility of {} node(s) in {}", nodes.len(), collection);
        nodes.len()
    }
}

/// Joint rest positions from the first buffered frame, in scene axes.
fn rest_pose(frame: Option<&Frame>) -> Vec<Point3> {
    frame
        .map(|f| {
            f.chunks_exact(3)
                .map(|xyz| to_scene_axes(&Point3::new(xyz[0], xyz[1], xyz[2])))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectedEntity, EntityTag, ReplayProvider};
    use crate::scene::MemoryScene;
    use crate::video::SyntheticBackend;

    fn hand(tag: EntityTag, offset: f64) -> DetectedEntity {
        DetectedEntity::new(
            tag,
            (0..21).map(|i| Point3::new(offset + i as f64, 10.0 * i as f64, 1.0)).collect(),
        )
    }

    fn studio(frames: Vec<Vec<DetectedEntity>>) -> MocapStudio<MemoryScene> {
        let backend = SyntheticBackend {
            width: 640,
            height: 480,
            fps: 24.0,
            frames: frames.len(),
        };
        MocapStudio::new(
            MocapSettings::default(),
            MemoryScene::new(),
            backend,
            ReplayProvider::new(frames),
        )
    }

    #[test]
    fn test_offline_start_needs_selected_video() {
        let mut studio = studio(vec![]);
        let mode = TrackingMode::new(CaptureGroup::Pose, Feed::Front);
        assert!(matches!(studio.start_tracking(mode), Err(MocapError::CaptureOpen(_))));
        assert!(!studio.is_tracking(CaptureGroup::Pose));
    }

    #[test]
    fn test_select_video_validates() {
        let mut studio = studio(vec![]);
        assert!(studio.select_video(CaptureGroup::Hand, View::Side, "side.AVI").is_ok());
        assert!(studio.select_video(CaptureGroup::Hand, View::Front, "front.gif").is_err());
        assert!(studio.video_path(CaptureGroup::Hand, View::Front).is_none());

        studio.clear_video_path(CaptureGroup::Hand, View::Side);
        assert!(studio.video_path(CaptureGroup::Hand, View::Side).is_none());
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let mut studio = studio(vec![]);
        assert!(matches!(
            studio.start_tracking_tag("front_face"),
            Err(MocapError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_stop_without_session() {
        let mut studio = studio(vec![]);
        assert!(!studio.stop_tracking(CaptureGroup::Hand));
    }

    #[test]
    fn test_front_hands_then_animate() {
        let frames = vec![vec![hand(EntityTag::Right, 100.0), hand(EntityTag::Left, 300.0)]; 3];
        let mut studio = studio(frames);
        studio.select_video(CaptureGroup::Hand, View::Front, "front.mp4").unwrap();
        studio.start_tracking_tag("front_hand").unwrap();
        assert_eq!(studio.store().fps(), 24.0);

        assert_eq!(studio.run_to_end(CaptureGroup::Hand), 3);
        assert!(!studio.is_tracking(CaptureGroup::Hand));

        let animated = studio.animate_hands();
        assert_eq!(animated, vec![Entity::RightHand, Entity::LeftHand]);
        let timeline = studio.scene().timeline();
        assert_eq!((timeline.start, timeline.end, timeline.fps), (1, 3, 24));

        let rig = studio.rig(RigKind::LeftHand).unwrap();
        assert_eq!(studio.scene().node(rig.joints[0]).keyframes.len(), 3);
    }

    #[test]
    fn test_live_hands_drive_rig_without_keyframes() {
        let frames = vec![vec![hand(EntityTag::Right, 320.0)]; 2];
        let mut studio = studio(frames);
        studio.start_live_hands().unwrap();

        assert!(matches!(studio.tick(CaptureGroup::Hand), Poll::Continue(_)));
        let rig = studio.rig(RigKind::RightHand).unwrap().clone();
        // (321, 10, 1) normalized then moved to scene axes
        let expected = Point3::new(0.01, 1.0 / 40.0, 4.7);
        assert!((studio.scene().position(rig.joints[1]) - expected).norm() < 1e-12);
        assert!(studio.scene().node(rig.joints[1]).keyframes.is_empty());
    }

    #[test]
    fn test_clear_cache_forgets_group() {
        let frames = vec![vec![hand(EntityTag::Right, 0.0)]; 2];
        let mut studio = studio(frames);
        studio.select_video(CaptureGroup::Hand, View::Front, "a.mp4").unwrap();
        studio.start_tracking_tag("front_hand").unwrap();
        studio.run_to_end(CaptureGroup::Hand);
        studio.animate_hands();
        assert!(studio.rig(RigKind::RightHand).is_some());

        studio.clear_cache(CaptureGroup::Hand);
        assert!(studio.store().buffers(Entity::RightHand).primary.is_empty());
        assert!(studio.rig(RigKind::RightHand).is_none());
    }

    struct ClosedAfter {
        remaining: usize,
    }

    impl PreviewSurface for ClosedAfter {
        fn create(&mut self, _width: u32, _height: u32, _fps: f64) {}

        fn update(&mut self, _frame: &image::DynamicImage) {
            self.remaining = self.remaining.saturating_sub(1);
        }

        fn is_visible(&self) -> bool {
            self.remaining > 0
        }

        fn destroy(&mut self) {}
    }

    #[test]
    fn test_closing_preview_ends_offline_session() {
        let frames = vec![vec![hand(EntityTag::Left, 0.0)]; 5];
        let mut studio = studio(frames)
            .with_preview(|_| Box::new(ClosedAfter { remaining: 2 }) as Box<dyn PreviewSurface>);
        studio.select_video(CaptureGroup::Hand, View::Front, "a.mov").unwrap();
        studio.start_tracking_tag("front_hand").unwrap();

        assert_eq!(studio.run_to_end(CaptureGroup::Hand), 2);
        assert!(!studio.is_tracking(CaptureGroup::Hand));
        assert_eq!(studio.store().buffers(Entity::LeftHand).primary.len(), 2);
    }
    #[test]
    fn test_toggle_collection_visibility() {
        let frames = vec![vec![hand(EntityTag::Right, 0.0)]; 2];
        let mut studio = studio(frames);
        studio.select_video(CaptureGroup::Hand, View::Front, "a.mp4").unwrap();
        studio.start_tracking_tag("front_hand").unwrap();
        studio.run_to_end(CaptureGroup::Hand);
        studio.animate_hands();

        let bones = RigKind::RightHand.bone_collection();
        assert_eq!(studio.toggle_collection_visibility(bones), 24);
        let hidden = studio.scene().collection(bones);
        assert!(hidden.iter().all(|&n| studio.scene().node(n).hidden));
        let joints = studio.scene().collection(RigKind::RightHand.joint_collection());
        assert!(joints.iter().all(|&n| !studio.scene().node(n).hidden));

        assert_eq!(studio.toggle_collection_visibility(bones), 24);
        assert!(hidden.iter().all(|&n| !studio.scene().node(n).hidden));

        assert_eq!(studio.toggle_collection_visibility("LeftHandBones"), 0);
    }
}
