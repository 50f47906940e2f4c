//! Camera devices
//!
//! Provides single-frame capture by running an external frame grabber
//! (ffmpeg by default), and a synthetic camera for development without
//! hardware.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::CaptureError;

/// Encoded image formats accepted as evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Png,
    Jpeg,
}

impl FrameFormat {
    /// Detect the format from the leading bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            image::ImageFormat::Png => Some(FrameFormat::Png),
            image::ImageFormat::Jpeg => Some(FrameFormat::Jpeg),
            _ => None,
        }
    }

    /// File extension used when storing a frame of this format
    pub fn extension(self) -> &'static str {
        match self {
            FrameFormat::Png => "png",
            FrameFormat::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFormat::Png => write!(f, "PNG"),
            FrameFormat::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// One encoded still frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub format: FrameFormat,
}

impl EncodedFrame {
    /// Wrap encoded bytes, rejecting anything that is not PNG or JPEG
    pub fn from_bytes(data: impl Into<Bytes>) -> Option<Self> {
        let data = data.into();
        let format = FrameFormat::sniff(&data)?;
        Some(Self { data, format })
    }
}

/// A device that produces single still frames
pub trait CameraDevice: Send {
    /// Device name, for logs and errors
    fn describe(&self) -> String;

    /// Acquire one frame. Blocks for the duration of device I/O.
    fn grab_frame(&mut self) -> Result<EncodedFrame, CaptureError>;
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Frame grabber executable
    pub program: String,
    /// Grabber input format (`v4l2` on Linux, `avfoundation` on macOS, `dshow` on Windows)
    pub input_format: String,
    /// Device selector passed to the grabber (index 0 is `/dev/video0` on Linux)
    pub device: String,
    /// Upper bound on one capture, after which the grabber is killed
    pub timeout: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            input_format: "v4l2".to_string(),
            device: "/dev/video0".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// stderr fragments that mean the device never opened
const OPEN_FAILURE_HINTS: &[&str] = &[
    "No such file or directory",
    "Device or resource busy",
    "Permission denied",
    "Cannot open",
    "Could not open",
    "Input/output error",
];

/// Camera driven by a child process that prints one PNG frame on stdout
pub struct CommandCamera {
    config: CameraConfig,
}

impl CommandCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            self.config.input_format.clone(),
            "-i".to_string(),
            self.config.device.clone(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "png".to_string(),
            "-".to_string(), // Output to stdout
        ]
    }

    fn unavailable(&self, reason: impl Into<String>) -> CaptureError {
        CaptureError::DeviceUnavailable {
            device: self.config.device.clone(),
            reason: reason.into(),
        }
    }

    fn failed(&self, reason: impl Into<String>) -> CaptureError {
        CaptureError::CaptureFailed {
            device: self.config.device.clone(),
            reason: reason.into(),
        }
    }
}

impl CameraDevice for CommandCamera {
    fn describe(&self) -> String {
        format!("{} ({} via {})", self.config.device, self.config.input_format, self.config.program)
    }

    fn grab_frame(&mut self) -> Result<EncodedFrame, CaptureError> {
        if self.config.device.starts_with("/dev/") && !Path::new(&self.config.device).exists() {
            return Err(self.unavailable("device node does not exist"));
        }

        let args = self.args();
        debug!("{} args: {:?}", self.config.program, args);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.unavailable(format!("failed to launch {}: {}", self.config.program, e))
            })?;

        // Drain both pipes concurrently so a chatty grabber cannot stall on a full pipe
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.failed("grabber stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.failed("grabber stderr not captured"))?;
        let stdout_reader = std::thread::spawn(move || {
            let mut data = Vec::new();
            stdout.read_to_end(&mut data).map(|_| data)
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        let deadline = Instant::now() + self.config.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!("Camera {} timed out, killing grabber", self.config.device);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CaptureError::Timeout {
                        device: self.config.device.clone(),
                        timeout: self.config.timeout,
                    });
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(e) => {
                    let _ = child.kill();
                    return Err(self.failed(format!("failed to wait for grabber: {}", e)));
                }
            }
        };

        let data = stdout_reader
            .join()
            .map_err(|_| self.failed("stdout reader panicked"))?
            .map_err(|e| self.failed(format!("failed to read frame: {}", e)))?;
        let diagnostics = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            let reason = diagnostics.trim().to_string();
            let reason = if reason.is_empty() {
                format!("grabber exited with {}", status)
            } else {
                reason
            };
            return if OPEN_FAILURE_HINTS.iter().any(|hint| diagnostics.contains(hint)) {
                Err(self.unavailable(reason))
            } else {
                Err(self.failed(reason))
            };
        }

        if data.is_empty() {
            return Err(self.failed("grabber produced no data"));
        }

        let size = data.len();
        let frame =
            EncodedFrame::from_bytes(data).ok_or_else(|| self.failed("unrecognised image data"))?;
        info!(
            "Captured {} frame from {} ({} bytes)",
            frame.format, self.config.device, size
        );
        Ok(frame)
    }
}

/// Configuration for the synthetic camera
#[cfg(feature = "test-source")]
#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    pub width: u32,
    pub height: u32,
}

#[cfg(feature = "test-source")]
impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Camera that renders a gradient test card instead of touching hardware
#[cfg(feature = "test-source")]
pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
    frame_num: u32,
}

#[cfg(feature = "test-source")]
impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        info!(
            "Synthetic camera: {}x{} test card",
            config.width, config.height
        );
        Self {
            config,
            frame_num: 0,
        }
    }
}

#[cfg(feature = "test-source")]
impl CameraDevice for SyntheticCamera {
    fn describe(&self) -> String {
        "synthetic".to_string()
    }

    fn grab_frame(&mut self) -> Result<EncodedFrame, CaptureError> {
        let shift = (self.frame_num.wrapping_mul(37) & 0xFF) as u8;
        let (w, h) = (self.config.width.max(1), self.config.height.max(1));
        let card = image::RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([
                ((x * 255 / w) as u8).wrapping_add(shift),
                (y * 255 / h) as u8,
                shift,
            ])
        });

        let mut out = std::io::Cursor::new(Vec::new());
        card.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| CaptureError::CaptureFailed {
                device: self.describe(),
                reason: format!("failed to encode test card: {}", e),
            })?;

        self.frame_num = self.frame_num.wrapping_add(1);
        Ok(EncodedFrame {
            data: Bytes::from(out.into_inner()),
            format: FrameFormat::Png,
        })
    }
}
