//! Capture pipeline
//!
//! Readings flow into the [`CaptureTrigger`]; when it fires, the
//! [`FrameCapturer`] grabs a frame from a [`CameraDevice`] and writes it to the
//! evidence directory.

pub mod camera;
pub mod capturer;
pub mod trigger;

pub use camera::{CameraConfig, CameraDevice, CommandCamera, EncodedFrame, FrameFormat};
#[cfg(feature = "test-source")]
pub use camera::{SyntheticCamera, SyntheticCameraConfig};
pub use capturer::FrameCapturer;
pub use trigger::{CaptureTrigger, TriggerConfig, DEFAULT_THRESHOLD};
