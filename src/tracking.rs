// src/tracking.rs - Tick-driven tracking sessions feeding the capture store
use crate::data::{CaptureGroup, CaptureStore, Entity, Frame, View, DEFAULT_FPS};
use crate::detection::{DetectedEntity, Detector, DetectorProvider, EntityTag};
use crate::error::MocapError;
use crate::transform::{centroid, normalize, Point3};
use crate::video::{draw_landmarks, CaptureBackend, CaptureSource, PreviewSurface, SourceSpec};
use image::{DynamicImage, GenericImageView};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Raw body landmark pairs whose centroids are appended after the 33 raw
/// points: hips, shoulders, right hand, left hand, ears, mouth, eyes.
pub const DERIVED_BODY_POINTS: [(usize, usize); 7] = [
    (23, 24),
    (11, 12),
    (18, 20),
    (17, 19),
    (7, 8),
    (9, 10),
    (1, 4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    /// Offline video from the primary camera.
    Front,
    /// Offline video from the secondary camera.
    Side,
    /// Realtime device feed.
    Live,
}

impl Feed {
    /// Buffer view this feed records into.
    pub fn view(self) -> View {
        match self {
            Feed::Front | Feed::Live => View::Front,
            Feed::Side => View::Side,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackingMode {
    pub group: CaptureGroup,
    pub feed: Feed,
}

impl TrackingMode {
    pub const fn new(group: CaptureGroup, feed: Feed) -> Self {
        Self { group, feed }
    }

    pub fn is_live(&self) -> bool {
        self.feed == Feed::Live
    }

    fn label(&self) -> &'static str {
        match self.group {
            CaptureGroup::Pose => "Pose tracking",
            CaptureGroup::Hand => "Hand tracking",
        }
    }
}

impl FromStr for TrackingMode {
    type Err = MocapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, feed) = match s {
            "front_pose" => (CaptureGroup::Pose, Feed::Front),
            "side_pose" => (CaptureGroup::Pose, Feed::Side),
            "rt_pose" => (CaptureGroup::Pose, Feed::Live),
            "front_hand" => (CaptureGroup::Hand, Feed::Front),
            "side_hand" => (CaptureGroup::Hand, Feed::Side),
            "rt_hand" => (CaptureGroup::Hand, Feed::Live),
            other => return Err(MocapError::UnknownMode(other.to_string())),
        };
        Ok(Self::new(group, feed))
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let feed = match self.feed {
            Feed::Front => "front",
            Feed::Side => "side",
            Feed::Live => "rt",
        };
        let group = match self.group {
            CaptureGroup::Pose => "pose",
            CaptureGroup::Hand => "hand",
        };
        write!(f, "{}_{}", feed, group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

/// What the driver should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Call `advance` again after this delay.
    Continue(Duration),
    Done,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_hands: usize,
    pub min_confidence: f32,
    pub fallback_fps: f64,
    pub body_z_scale: f64,
    pub hand_z_scale: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_hands: 2,
            min_confidence: 0.8,
            fallback_fps: DEFAULT_FPS,
            body_z_scale: Entity::Body.z_scale(),
            hand_z_scale: Entity::RightHand.z_scale(),
        }
    }
}

enum DetectorSlot {
    Pending,
    Ready(Box<dyn Detector>),
    Unavailable,
    Closed,
}

/// Owns one capture source, its preview surface and a lazily created
/// detector. `Idle -> Running -> Stopped`; a stopped session is never
/// restarted.
pub struct TrackingSession {
    mode: TrackingMode,
    source: SourceSpec,
    state: SessionState,
    capture: Option<Box<dyn CaptureSource>>,
    preview: Option<Box<dyn PreviewSurface>>,
    provider: Rc<dyn DetectorProvider>,
    detector: DetectorSlot,
    options: SessionOptions,
    fps: f64,
    delay: Duration,
    frames_processed: usize,
}

impl TrackingSession {
    /// Opens the source and moves to `Running`. When the source cannot be
    /// opened the failure is logged and the session stays `Idle`.
    pub fn start(
        mode: TrackingMode,
        source: SourceSpec,
        backend: &dyn CaptureBackend,
        provider: Rc<dyn DetectorProvider>,
        mut preview: Box<dyn PreviewSurface>,
        options: SessionOptions,
    ) -> Self {
        let fallback_fps = if options.fallback_fps.is_finite() && options.fallback_fps > 0.0 {
            options.fallback_fps
        } else {
            DEFAULT_FPS
        };

        let mut session = Self {
            mode,
            source,
            state: SessionState::Idle,
            capture: None,
            preview: None,
            provider,
            detector: DetectorSlot::Pending,
            options,
            fps: fallback_fps,
            delay: Duration::from_secs_f64(1.0 / fallback_fps),
            frames_processed: 0,
        };

        let mut capture = match backend.open(&session.source) {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Failed to open {}: {:#}", session.source, e);
                return session;
            }
        };
        if !capture.is_opened() {
            warn!("Capture source {} is not available", session.source);
            capture.release();
            return session;
        }

        let reported = capture.fps();
        if reported.is_finite() && reported > 0.0 {
            session.fps = reported;
            session.delay = Duration::from_secs_f64(1.0 / reported);
        }

        let (width, height) = capture.resolution();
        preview.create(width, height, session.fps);

        session.capture = Some(capture);
        session.preview = Some(preview);
        session.state = SessionState::Running;
        info!(
            "{} started ({}, {}, {:.2} fps)",
            mode.label(),
            mode,
            session.source,
            session.fps
        );
        session
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    /// One pump tick: read, detect, record, preview.
    pub fn advance(&mut self, store: &mut CaptureStore) -> Poll {
        if self.state != SessionState::Running {
            return Poll::Done;
        }

        let opened = self.capture.as_ref().map(|c| c.is_opened()).unwrap_or(false);
        if !opened {
            self.stop();
            return Poll::Done;
        }

        if !self.mode.is_live() {
            let visible = self.preview.as_ref().map(|p| p.is_visible()).unwrap_or(false);
            if !visible {
                info!("Preview closed by user");
                self.stop();
                return Poll::Done;
            }
        }

        let frame = match self.capture.as_mut().and_then(|c| c.read()) {
            Some(frame) => frame,
            None => {
                debug!("No frame from {}", self.source);
                self.stop();
                return Poll::Done;
            }
        };

        let annotated = self.process_frame(frame, store);
        if let Some(preview) = self.preview.as_mut() {
            preview.update(&annotated);
        }
        self.frames_processed += 1;

        Poll::Continue(self.delay)
    }

    /// Releases the capture and preview. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.state == SessionState::Running {
            info!(
                "{} stopped after {} frame(s)",
                self.mode.label(),
                self.frames_processed
            );
        } else {
            debug!("{} already stopped", self.mode.label());
        }

        if let Some(mut capture) = self.capture.take() {
            if capture.is_opened() {
                capture.release();
            }
        }
        if let Some(mut preview) = self.preview.take() {
            preview.destroy();
        }
        self.detector = DetectorSlot::Closed;
        self.state = SessionState::Stopped;
    }

    fn detector(&mut self) -> Option<&mut Box<dyn Detector>> {
        if let DetectorSlot::Pending = self.detector {
            self.detector = match self.provider.create(
                self.mode.group,
                self.options.max_hands,
                self.options.min_confidence,
            ) {
                Ok(detector) => DetectorSlot::Ready(detector),
                Err(e) => {
                    warn!("{:#}; frames will pass through without detection", e);
                    DetectorSlot::Unavailable
                }
            };
        }

        match &mut self.detector {
            DetectorSlot::Ready(detector) => Some(detector),
            _ => None,
        }
    }

    fn process_frame(&mut self, frame: DynamicImage, store: &mut CaptureStore) -> DynamicImage {
        let entities = match self.detector() {
            Some(detector) => match detector.detect(&frame) {
                Ok(entities) => entities,
                Err(e) => {
                    warn!("Detection failed: {:#}", e);
                    return frame;
                }
            },
            None => {
                debug!("Detector unavailable, skipping detection");
                return frame;
            }
        };

        let (width, height) = frame.dimensions();
        let (width, height) = (width as f64, height as f64);
        match self.mode.group {
            CaptureGroup::Pose => self.record_pose(&entities, height, width, store),
            CaptureGroup::Hand => self.record_hands(&entities, height, width, store),
        }

        let mut annotated = frame;
        draw_landmarks(&mut annotated, &entities);
        annotated
    }

    fn record_pose(&self, entities: &[DetectedEntity], height: f64, width: f64, store: &mut CaptureStore) {
        let Some(body) = entities.iter().find(|e| e.tag == EntityTag::Body) else {
            return;
        };
        if body.landmarks.len() != Entity::RAW_BODY_POINTS {
            debug!(
                "Skipping body with {} landmarks, expected {}",
                body.landmarks.len(),
                Entity::RAW_BODY_POINTS
            );
            return;
        }

        let z_scale = self.options.body_z_scale;
        let mut points: Vec<Point3> = body
            .landmarks
            .iter()
            .map(|lm| normalize(lm, height, width, z_scale))
            .collect();

        for &(a, b) in DERIVED_BODY_POINTS.iter() {
            if let Some(c) = centroid(&[body.landmarks[a], body.landmarks[b]]) {
                points.push(normalize(&c, height, width, z_scale));
            }
        }

        self.route(Entity::Body, &points, store);
    }

    fn record_hands(&self, entities: &[DetectedEntity], height: f64, width: f64, store: &mut CaptureStore) {
        let hands = entities
            .iter()
            .filter(|e| e.tag != EntityTag::Body)
            .take(self.options.max_hands);

        for hand in hands {
            let entity = match hand.tag {
                EntityTag::Right => Entity::RightHand,
                _ => Entity::LeftHand,
            };
            if hand.landmarks.len() != Entity::HAND_POINTS {
                debug!(
                    "Skipping {} with {} landmarks, expected {}",
                    entity.label(),
                    hand.landmarks.len(),
                    Entity::HAND_POINTS
                );
                continue;
            }

            let points: Vec<Point3> = hand
                .landmarks
                .iter()
                .map(|lm| normalize(lm, height, width, self.options.hand_z_scale))
                .collect();
            self.route(entity, &points, store);
        }
    }

    fn route(&self, entity: Entity, points: &[Point3], store: &mut CaptureStore) {
        let frame: Frame = points.iter().flat_map(|p| [p.x, p.y, p.z]).collect();

        match self.mode.feed {
            Feed::Front => store.buffers_mut(entity).primary.append(frame),
            Feed::Live => {
                store.live_mut().set(entity, points);
                store.buffers_mut(entity).primary.append(frame);
            }
            Feed::Side => {
                let buffers = store.buffers_mut(entity);
                if buffers.primary.is_empty() {
                    debug!("Side view of {} waits for front frames", entity.label());
                } else {
                    buffers.secondary.append(frame);
                }
            }
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if self.capture.is_some() || self.preview.is_some() {
            self.stop();
        }
    }
}
