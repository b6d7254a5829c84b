// src/video.rs - Capture sources and preview surfaces
use crate::data::DEFAULT_FPS;
use crate::detection::DetectedEntity;
use crate::error::{MocapError, Result as MocapResult};
use anyhow::{Context, Result};
use chrono::Local;
use image::{DynamicImage, GenericImage, GenericImageView, Rgba};
use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Video containers accepted for offline tracking.
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "flv", "wmv"];

static FFMPEG_AVAILABLE: Lazy<bool> =
    Lazy::new(|| Command::new("ffmpeg").arg("-version").output().is_ok());

static FFPROBE_AVAILABLE: Lazy<bool> =
    Lazy::new(|| Command::new("ffprobe").arg("-version").output().is_ok());

/// Checks the extension (case-insensitive) of a user-selected video.
pub fn validate_video_path(path: impl AsRef<Path>) -> MocapResult<PathBuf> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext {
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => Ok(path.to_path_buf()),
        _ => Err(MocapError::UnsupportedVideo(path.display().to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Device(u32),
    File(PathBuf),
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Device(index) => write!(f, "camera://{}", index),
            SourceSpec::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub trait CaptureSource {
    fn is_opened(&self) -> bool;
    /// Next frame, `None` on failure or end of stream.
    fn read(&mut self) -> Option<DynamicImage>;
    fn release(&mut self);
    /// Frame rate as reported by the source; may be zero or negative when unknown.
    fn fps(&self) -> f64;
    fn resolution(&self) -> (u32, u32);
}

pub trait CaptureBackend {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureSource>>;
}

/// Video file decoded through ffmpeg into an in-memory frame list.
pub struct FileCapture {
    path: PathBuf,
    current_frame: usize,
    total_frames: usize,
    width: u32,
    height: u32,
    fps: f64,
    frames_cache: Vec<DynamicImage>,
    is_loaded: bool,
    released: bool,
}

impl FileCapture {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(anyhow::anyhow!("Video file does not exist: {}", path.display()));
        }

        if let Err(e) = fs::File::open(&path) {
            return Err(anyhow::anyhow!("Cannot read video file: {}", e));
        }

        if !*FFPROBE_AVAILABLE {
            return Err(anyhow::anyhow!("FFmpeg is not installed or not in PATH"));
        }

        let output = Command::new("ffprobe")
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-count_frames",
                "-show_entries", "stream=width,height,r_frame_rate,nb_read_frames",
                "-of", "csv=p=0",
            ])
            .arg(&path)
            .output()
            .context("Failed to run ffprobe")?;

        let info = String::from_utf8_lossy(&output.stdout);
        let (width, height, fps, total_frames) = parse_probe_line(info.trim())?;

        if total_frames == 0 {
            return Err(anyhow::anyhow!("Video has no frames"));
        }

        info!(
            "Opened {} ({}x{}, {:.2} fps, {} frames)",
            path.display(),
            width,
            height,
            fps,
            total_frames
        );

        Ok(Self {
            path,
            current_frame: 0,
            total_frames,
            width,
            height,
            fps,
            frames_cache: Vec::new(),
            is_loaded: false,
            released: false,
        })
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn load_all_frames(&mut self) -> Result<()> {
        if self.is_loaded {
            return Ok(());
        }

        if !*FFMPEG_AVAILABLE {
            return Err(anyhow::anyhow!("FFmpeg is not installed"));
        }

        let temp_dir = std::env::temp_dir().join(format!("mocap_rig_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir)
            .with_context(|| format!("Cannot create temporary directory {}", temp_dir.display()))?;

        debug!("Extracting {} frames from {}", self.total_frames, self.path.display());
        let status = Command::new("ffmpeg")
            .arg("-i")
            .arg(&self.path)
            .arg(temp_dir.join("frame_%05d.png"))
            .status()
            .context("Failed to extract frames with ffmpeg")?;

        if !status.success() {
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(anyhow::anyhow!("FFmpeg frame extraction failed"));
        }

        self.frames_cache.clear();
        for i in 1..=self.total_frames {
            let frame_path = temp_dir.join(format!("frame_{:05}.png", i));
            if !frame_path.exists() {
                break;
            }
            match image::open(&frame_path) {
                Ok(img) => self.frames_cache.push(img),
                Err(e) => warn!("Failed to load frame {}: {}", i, e),
            }
        }

        let _ = fs::remove_dir_all(&temp_dir);

        if self.frames_cache.is_empty() {
            return Err(anyhow::anyhow!("No frames could be loaded from the video"));
        }

        self.is_loaded = true;
        debug!("Loaded {} frames", self.frames_cache.len());
        Ok(())
    }
}

fn parse_probe_line(line: &str) -> Result<(u32, u32, f64, usize)> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 4 {
        return Err(anyhow::anyhow!("Invalid video format or corrupted file"));
    }

    let width = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid video width"))?;
    let height = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid video height"))?;
    let fps = match parts[2].split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().unwrap_or(0.0);
            let den = den.parse::<f64>().unwrap_or(1.0);
            if den > 0.0 { num / den } else { 0.0 }
        }
        None => parts[2].parse().unwrap_or(0.0),
    };
    let total_frames = parts[3]
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid frame count"))?;

    Ok((width, height, fps, total_frames))
}

impl CaptureSource for FileCapture {
    fn is_opened(&self) -> bool {
        !self.released
    }

    fn read(&mut self) -> Option<DynamicImage> {
        if self.released {
            return None;
        }
        if let Err(e) = self.load_all_frames() {
            warn!("Cannot decode {}: {}", self.path.display(), e);
            return None;
        }
        let frame = self.frames_cache.get(self.current_frame).cloned();
        if frame.is_some() {
            self.current_frame += 1;
        }
        frame
    }

    fn release(&mut self) {
        self.released = true;
        self.frames_cache.clear();
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(feature = "camera")]
pub use camera::CameraCapture;

#[cfg(feature = "camera")]
mod camera {
    use super::CaptureSource;
    use anyhow::Result;
    use image::{DynamicImage, ImageBuffer};
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
    use nokhwa::Camera;
    use tracing::{debug, warn};

    /// Live device opened through nokhwa.
    pub struct CameraCapture {
        camera: Option<Camera>,
    }

    impl CameraCapture {
        pub fn open(index: u32) -> Result<Self> {
            debug!("Attempting to open camera index {}", index);

            let format = CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 30);
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(format));

            let mut camera = Camera::new(CameraIndex::Index(index), requested)
                .map_err(|e| anyhow::anyhow!("Failed to open camera: {}", e))?;
            camera
                .open_stream()
                .map_err(|e| anyhow::anyhow!("Failed to open camera stream: {}", e))?;

            Ok(Self { camera: Some(camera) })
        }
    }

    impl CaptureSource for CameraCapture {
        fn is_opened(&self) -> bool {
            self.camera.as_ref().map(|c| c.is_stream_open()).unwrap_or(false)
        }

        fn read(&mut self) -> Option<DynamicImage> {
            let cam = self.camera.as_mut()?;
            let frame = match cam.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Failed to capture frame: {}", e);
                    return None;
                }
            };
            let decoded = match frame.decode_image::<RgbFormat>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Failed to decode frame: {}", e);
                    return None;
                }
            };
            let (width, height) = (decoded.width(), decoded.height());
            ImageBuffer::from_raw(width, height, decoded.into_vec()).map(DynamicImage::ImageRgb8)
        }

        fn release(&mut self) {
            if let Some(mut cam) = self.camera.take() {
                let _ = cam.stop_stream();
            }
        }

        fn fps(&self) -> f64 {
            self.camera.as_ref().map(|c| c.frame_rate() as f64).unwrap_or(0.0)
        }

        fn resolution(&self) -> (u32, u32) {
            self.camera
                .as_ref()
                .map(|c| {
                    let r = c.resolution();
                    (r.width(), r.height())
                })
                .unwrap_or((0, 0))
        }
    }

    impl Drop for CameraCapture {
        fn drop(&mut self) {
            self.release();
        }
    }
}

/// Blank frames of a fixed size, for replaying recorded detections without video.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    fps: f64,
    remaining: usize,
    released: bool,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32, fps: f64, frames: usize) -> Self {
        Self {
            width,
            height,
            fps,
            remaining: frames,
            released: false,
        }
    }
}

impl CaptureSource for SyntheticCapture {
    fn is_opened(&self) -> bool {
        !self.released
    }

    fn read(&mut self) -> Option<DynamicImage> {
        if self.released || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(DynamicImage::new_rgb8(self.width, self.height))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Hands out blank frames for any source, paired with replayed detections.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticBackend {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: usize,
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureSource>> {
        debug!("Synthetic capture standing in for {}", spec);
        Ok(Box::new(SyntheticCapture::new(
            self.width,
            self.height,
            self.fps,
            self.frames,
        )))
    }
}

/// Opens files through ffmpeg and devices through nokhwa when the `camera`
/// feature is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct VideoBackend;

impl CaptureBackend for VideoBackend {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureSource>> {
        match spec {
            SourceSpec::File(path) => Ok(Box::new(FileCapture::new(path)?)),
            #[cfg(feature = "camera")]
            SourceSpec::Device(index) => Ok(Box::new(CameraCapture::open(*index)?)),
            #[cfg(not(feature = "camera"))]
            SourceSpec::Device(index) => Err(anyhow::anyhow!(
                "camera {} requested but camera support is not compiled in",
                index
            )),
        }
    }
}

/// Where annotated frames are shown while a session runs.
pub trait PreviewSurface {
    /// `fps` is the rate the capture delivers frames at.
    fn create(&mut self, width: u32, height: u32, fps: f64);
    fn update(&mut self, frame: &DynamicImage);
    /// `false` once the user has closed the surface.
    fn is_visible(&self) -> bool;
    fn destroy(&mut self);
}

/// Discards frames; used when no display is attached.
#[derive(Debug, Default)]
pub struct HeadlessPreview {
    frames_shown: usize,
}

impl HeadlessPreview {
    pub fn frames_shown(&self) -> usize {
        self.frames_shown
    }
}

impl PreviewSurface for HeadlessPreview {
    fn create(&mut self, _width: u32, _height: u32, _fps: f64) {}

    fn update(&mut self, _frame: &DynamicImage) {
        self.frames_shown += 1;
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn destroy(&mut self) {}
}

/// Writes every annotated frame to a timestamped directory and encodes them
/// into `preview.mp4` when the surface is destroyed.
pub struct RecordingPreview {
    output_dir: PathBuf,
    frames_dir: PathBuf,
    fps: f64,
    frame_count: usize,
    open: bool,
}

impl RecordingPreview {
    pub fn new(output_root: impl AsRef<Path>, label: &str) -> Self {
        let session_id = format!("{}_{}", label, Local::now().format("%Y%m%d_%H%M%S"));
        let output_dir = output_root.as_ref().join(session_id);
        let frames_dir = output_dir.join("temp_frames");
        Self {
            output_dir,
            frames_dir,
            fps: DEFAULT_FPS,
            frame_count: 0,
            open: false,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    fn encode(&self) -> Result<PathBuf> {
        let output_path = self.output_dir.join("preview.mp4");
        let status = Command::new("ffmpeg")
            .arg("-y")
            .args(["-r", &self.fps.to_string()])
            .arg("-i")
            .arg(self.frames_dir.join("frame_%05d.png"))
            .args(["-c:v", "libx264", "-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p"])
            .arg(&output_path)
            .status()
            .context("Failed to run ffmpeg")?;

        if !status.success() {
            return Err(anyhow::anyhow!("FFmpeg video encoding failed"));
        }
        Ok(output_path)
    }
}

impl PreviewSurface for RecordingPreview {
    fn create(&mut self, width: u32, height: u32, fps: f64) {
        if fps.is_finite() && fps > 0.0 {
            self.fps = fps;
        }
        match fs::create_dir_all(&self.frames_dir) {
            Ok(()) => {
                self.open = true;
                debug!(
                    "Recording {}x{} preview at {:.2} fps to {}",
                    width,
                    height,
                    self.fps,
                    self.output_dir.display()
                );
            }
            Err(e) => warn!("Cannot create preview directory {}: {}", self.frames_dir.display(), e),
        }
    }

    fn update(&mut self, frame: &DynamicImage) {
        if !self.open {
            return;
        }
        let frame_path = self.frames_dir.join(format!("frame_{:05}.png", self.frame_count + 1));
        match frame.save(&frame_path) {
            Ok(()) => self.frame_count += 1,
            Err(e) => warn!("Failed to save preview frame: {}", e),
        }
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn destroy(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        if self.frame_count > 0 && *FFMPEG_AVAILABLE {
            match self.encode() {
                Ok(path) => {
                    info!("Preview saved to {}", path.display());
                    let _ = fs::remove_dir_all(&self.frames_dir);
                }
                Err(e) => warn!("Keeping raw preview frames: {}", e),
            }
        }
    }
}

const MARKER_RADIUS: i64 = 2;
const MARKER_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Draws a small square at every landmark that falls inside the frame.
pub fn draw_landmarks(frame: &mut DynamicImage, entities: &[DetectedEntity]) {
    let (width, height) = frame.dimensions();
    for entity in entities {
        for lm in &entity.landmarks {
            let (cx, cy) = (lm.x.round() as i64, lm.y.round() as i64);
            for dy in -MARKER_RADIUS..=MARKER_RADIUS {
                for dx in -MARKER_RADIUS..=MARKER_RADIUS {
                    let (x, y) = (cx + dx, cy + dy);
                    if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                        frame.put_pixel(x as u32, y as u32, MARKER_COLOR);
                    }
                }
            }
        }
    }
}
