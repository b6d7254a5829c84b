// src/lib.rs
//! Landmark capture from one or two camera views, front/side view fusion and
//! procedural skeleton rigs driven by the captured frames.

pub mod animation;
pub mod bake;
pub mod config;
pub mod data;
pub mod detection;
pub mod error;
pub mod fusion;
pub mod scene;
pub mod skeleton;
pub mod studio;
pub mod tracking;
pub mod transform;
pub mod video;

pub use crate::config::MocapSettings;
pub use crate::error::{MocapError, Result};
pub use crate::scene::MemoryScene;
pub use crate::studio::MocapStudio;
pub use crate::tracking::{Poll, TrackingMode, TrackingSession};
