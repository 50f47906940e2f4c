//! Runtime configuration
//!
//! Everything is read from `TRIPWIRE_*` environment variables. Unset or
//! unparsable values fall back to the defaults, which match the reference
//! hardware: a rangefinder on `/dev/ttyACM0` at 9600 baud and the first V4L2
//! camera.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::capture::{CameraConfig, TriggerConfig};
use crate::sensor::transport::DEFAULT_BAUD_RATE;
use crate::sensor::SensorEndpoint;

/// Default evidence directory, relative to the working directory
pub const DEFAULT_EVIDENCE_DIR: &str = "detected_images";

/// Default sensor device
pub const DEFAULT_SENSOR: &str = "/dev/ttyACM0";

/// Sensor connection settings
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub endpoint: SensorEndpoint,
    /// How often buffered sensor output is drained
    pub poll_interval: Duration,
    /// Wait between connection attempts while the sensor is absent
    pub reconnect_interval: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            endpoint: SensorEndpoint::Serial {
                path: DEFAULT_SENSOR.to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            },
            poll_interval: Duration::from_millis(100),
            reconnect_interval: Duration::from_millis(1000),
        }
    }
}

/// Complete configuration of one tripwire instance
#[derive(Debug, Clone)]
pub struct TripwireConfig {
    pub evidence_dir: PathBuf,
    pub sensor: SensorConfig,
    pub trigger: TriggerConfig,
    pub camera: CameraConfig,
    /// Trigger fires that may queue while the camera is busy
    pub capture_backlog: usize,
}

impl Default for TripwireConfig {
    fn default() -> Self {
        Self {
            evidence_dir: PathBuf::from(DEFAULT_EVIDENCE_DIR),
            sensor: SensorConfig::default(),
            trigger: TriggerConfig::default(),
            camera: CameraConfig::default(),
            capture_backlog: 4,
        }
    }
}

impl TripwireConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| -> Option<String> {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let number = |key: &str| -> Option<u64> {
            let raw = parsed(key)?;
            match raw.parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not a whole number", key, raw);
                    None
                }
            }
        };
        let millis = |key: &str, default: Duration| {
            number(key).map(Duration::from_millis).unwrap_or(default)
        };

        let evidence_dir = parsed("TRIPWIRE_EVIDENCE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.evidence_dir);

        let endpoint = match parsed("TRIPWIRE_SENSOR") {
            Some(raw) => match raw.parse::<SensorEndpoint>() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("Ignoring TRIPWIRE_SENSOR={:?}: {}", raw, e);
                    defaults.sensor.endpoint.clone()
                }
            },
            None => defaults.sensor.endpoint.clone(),
        };
        let endpoint = match number("TRIPWIRE_BAUD").and_then(|b| u32::try_from(b).ok()) {
            Some(baud) if baud > 0 => endpoint.with_baud_rate(baud),
            _ => endpoint,
        };

        let sensor = SensorConfig {
            endpoint,
            poll_interval: millis("TRIPWIRE_POLL_MS", defaults.sensor.poll_interval),
            reconnect_interval: millis("TRIPWIRE_RECONNECT_MS", defaults.sensor.reconnect_interval),
        };

        let threshold = match parsed("TRIPWIRE_THRESHOLD") {
            Some(raw) => match raw.parse::<f64>() {
                Ok(t) if t.is_finite() => t,
                _ => {
                    warn!("Ignoring TRIPWIRE_THRESHOLD={:?}: not a finite number", raw);
                    defaults.trigger.threshold
                }
            },
            None => defaults.trigger.threshold,
        };
        let trigger = TriggerConfig {
            threshold,
            cooldown: millis("TRIPWIRE_COOLDOWN_MS", defaults.trigger.cooldown),
            consecutive: number("TRIPWIRE_CONSECUTIVE")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.trigger.consecutive),
        };

        let camera = CameraConfig {
            program: parsed("TRIPWIRE_CAMERA_PROGRAM").unwrap_or(defaults.camera.program),
            input_format: parsed("TRIPWIRE_CAMERA_FORMAT").unwrap_or(defaults.camera.input_format),
            device: parsed("TRIPWIRE_CAMERA_DEVICE").unwrap_or(defaults.camera.device),
            timeout: millis("TRIPWIRE_CAMERA_TIMEOUT_MS", defaults.camera.timeout),
        };

        let capture_backlog = number("TRIPWIRE_CAPTURE_BACKLOG")
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.capture_backlog);

        Self {
            evidence_dir,
            sensor,
            trigger,
            camera,
            capture_backlog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> TripwireConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TripwireConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_reference_hardware() {
        let config = config_from(&[]);
        assert_eq!(config.evidence_dir, PathBuf::from("detected_images"));
        assert_eq!(config.sensor.endpoint.to_string(), "/dev/ttyACM0 @ 9600 baud");
        assert_eq!(config.sensor.poll_interval, Duration::from_millis(100));
        assert_eq!(config.sensor.reconnect_interval, Duration::from_millis(1000));
        assert_eq!(config.trigger.threshold, 20.0);
        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!(config.capture_backlog, 4);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("TRIPWIRE_EVIDENCE_DIR", "/var/lib/tripwire"),
            ("TRIPWIRE_SENSOR", "COM7"),
            ("TRIPWIRE_BAUD", "115200"),
            ("TRIPWIRE_THRESHOLD", "12.5"),
            ("TRIPWIRE_COOLDOWN_MS", "0"),
            ("TRIPWIRE_CONSECUTIVE", "3"),
            ("TRIPWIRE_CAMERA_FORMAT", "dshow"),
            ("TRIPWIRE_CAMERA_DEVICE", "video=USB Camera"),
        ]);

        assert_eq!(config.evidence_dir, PathBuf::from("/var/lib/tripwire"));
        assert_eq!(config.sensor.endpoint.to_string(), "COM7 @ 115200 baud");
        assert_eq!(config.trigger.threshold, 12.5);
        assert_eq!(config.trigger.cooldown, Duration::ZERO);
        assert_eq!(config.trigger.consecutive, 3);
        assert_eq!(config.camera.input_format, "dshow");
        assert_eq!(config.camera.device, "video=USB Camera");
    }

    #[test]
    fn tcp_sensor_endpoint() {
        let config = config_from(&[("TRIPWIRE_SENSOR", "tcp://10.0.0.5:4000")]);
        assert_eq!(
            config.sensor.endpoint,
            SensorEndpoint::Tcp {
                addr: "10.0.0.5:4000".to_string()
            }
        );
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = config_from(&[
            ("TRIPWIRE_POLL_MS", "fast"),
            ("TRIPWIRE_THRESHOLD", "NaN"),
            ("TRIPWIRE_CAPTURE_BACKLOG", "0"),
            ("TRIPWIRE_SENSOR", "tcp://nohost"),
            ("TRIPWIRE_EVIDENCE_DIR", "   "),
        ]);
        let defaults = TripwireConfig::default();

        assert_eq!(config.sensor.poll_interval, defaults.sensor.poll_interval);
        assert_eq!(config.trigger.threshold, defaults.trigger.threshold);
        assert_eq!(config.capture_backlog, defaults.capture_backlog);
        assert_eq!(config.sensor.endpoint, defaults.sensor.endpoint);
        assert_eq!(config.evidence_dir, defaults.evidence_dir);
    }
}
