// src/config.rs - Persisted capture and rig settings
use crate::data::DEFAULT_FPS;
use crate::error::{MocapError, Result};
use crate::scene::TrackAxis;
use crate::tracking::SessionOptions;
use crate::transform::{BODY_Z_SCALE, HAND_Z_SCALE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MocapSettings {
    #[serde(default)]
    pub camera_index: u32,
    /// Hands tracked per frame, 1 or 2.
    #[serde(default = "default_num_hands")]
    pub num_hands: usize,
    #[serde(default = "default_hand_confidence")]
    pub hand_confidence: f32,
    /// Used when a capture source reports no frame rate.
    #[serde(default = "default_fallback_fps")]
    pub fallback_fps: f64,
    #[serde(default = "default_body_z_scale")]
    pub body_z_scale: f64,
    #[serde(default = "default_hand_z_scale")]
    pub hand_z_scale: f64,
    #[serde(default = "default_preview_width")]
    pub preview_width: u32,
    #[serde(default = "default_preview_height")]
    pub preview_height: u32,
    #[serde(default)]
    pub bone_axis: TrackAxis,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default)]
    pub record_previews: bool,
}

fn default_num_hands() -> usize { 2 }
fn default_hand_confidence() -> f32 { 0.8 }
fn default_fallback_fps() -> f64 { DEFAULT_FPS }
fn default_body_z_scale() -> f64 { BODY_Z_SCALE }
fn default_hand_z_scale() -> f64 { HAND_Z_SCALE }
fn default_preview_width() -> u32 { 640 }
fn default_preview_height() -> u32 { 480 }

fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(|p| p.join("MocapRig")))
        .unwrap_or_else(|| PathBuf::from("./output"))
}

impl Default for MocapSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            num_hands: default_num_hands(),
            hand_confidence: default_hand_confidence(),
            fallback_fps: default_fallback_fps(),
            body_z_scale: default_body_z_scale(),
            hand_z_scale: default_hand_z_scale(),
            preview_width: default_preview_width(),
            preview_height: default_preview_height(),
            bone_axis: TrackAxis::default(),
            output_directory: default_output_directory(),
            record_previews: false,
        }
    }
}

impl MocapSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: MocapSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings.clamped())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `config.json` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "MocapRig", "mocap_rig")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(settings) => {
                info!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fallback_fps", self.fallback_fps),
            ("body_z_scale", self.body_z_scale),
            ("hand_z_scale", self.hand_z_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(MocapError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        Ok(())
    }

    fn clamped(mut self) -> Self {
        self.num_hands = self.num_hands.clamp(1, 2);
        self.hand_confidence = self.hand_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_hands: self.num_hands.clamp(1, 2),
            min_confidence: self.hand_confidence,
            fallback_fps: self.fallback_fps,
            body_z_scale: self.body_z_scale,
            hand_z_scale: self.hand_z_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("mocap_rig_{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_defaults() {
        let settings = MocapSettings::default();
        assert_eq!(settings.num_hands, 2);
        assert_eq!(settings.fallback_fps, 30.0);
        assert_eq!(settings.body_z_scale, 400.0);
        assert_eq!(settings.hand_z_scale, 40.0);
        assert_eq!(settings.bone_axis, TrackAxis::Y);
        assert_eq!(settings.hand_confidence, 0.8);
        assert_eq!(settings.session_options().min_confidence, 0.8);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: MocapSettings =
            serde_json::from_str(r#"{"camera_index": 2, "bone_axis": "NegZ"}"#).unwrap();
        assert_eq!(settings.camera_index, 2);
        assert_eq!(settings.bone_axis, TrackAxis::NegZ);
        assert_eq!(settings.preview_width, 640);
        assert!(!settings.record_previews);
    }

    #[test]
    fn test_save_then_load_clamps() {
        let path = temp_file("config.json");
        let settings = MocapSettings {
            num_hands: 5,
            ..MocapSettings::default()
        };
        settings.save(&path).unwrap();

        let loaded = MocapSettings::load(&path).unwrap();
        assert_eq!(loaded.num_hands, 2);
        assert_eq!(loaded.output_directory, settings.output_directory);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_rejects_bad_scale() {
        let path = temp_file("config.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"hand_z_scale": 0.0}"#).unwrap();

        assert!(matches!(MocapSettings::load(&path), Err(MocapError::Config(_))));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_session_options_follow_settings() {
        let settings = MocapSettings {
            num_hands: 1,
            hand_z_scale: 20.0,
            ..MocapSettings::default()
        };
        let options = settings.session_options();
        assert_eq!(options.max_hands, 1);
        assert_eq!(options.hand_z_scale, 20.0);
    }
}
