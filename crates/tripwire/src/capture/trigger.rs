//! Capture trigger
//!
//! Decides which readings warrant a capture. The threshold test alone fires on
//! every qualifying reading, so a sustained presence floods the evidence
//! directory. Two configurable gates sit on top of it:
//! - a streak of `consecutive` qualifying readings is required before firing
//! - a `cooldown` must elapse between two fires

use std::time::{Duration, Instant};
use tracing::debug;

use crate::sensor::Reading;

/// Default distance at or below which a capture is warranted
pub const DEFAULT_THRESHOLD: f64 = 20.0;

/// Trigger configuration
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Readings at or below this distance qualify
    pub threshold: f64,
    /// Minimum time between two captures (zero disables)
    pub cooldown: Duration,
    /// Qualifying readings required in a row before firing (minimum 1)
    pub consecutive: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            cooldown: Duration::from_secs(2),
            consecutive: 1,
        }
    }
}

impl TriggerConfig {
    /// Every qualifying reading fires, with no debounce at all
    pub fn undebounced(threshold: f64) -> Self {
        Self {
            threshold,
            cooldown: Duration::ZERO,
            consecutive: 1,
        }
    }
}

/// Capture decision engine
pub struct CaptureTrigger {
    config: TriggerConfig,
    streak: u32,
    last_fire: Option<Instant>,
}

impl CaptureTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            streak: 0,
            last_fire: None,
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// True iff `reading` is within the threshold distance
    pub fn evaluate(&self, reading: Reading) -> bool {
        reading.distance <= self.config.threshold
    }

    /// Feed the next reading and decide whether to capture now
    pub fn observe(&mut self, reading: Reading) -> bool {
        self.observe_at(reading, Instant::now())
    }

    /// Same as [`observe`](Self::observe) with an explicit clock
    pub fn observe_at(&mut self, reading: Reading, now: Instant) -> bool {
        if !self.evaluate(reading) {
            self.streak = 0;
            return false;
        }

        self.streak = self.streak.saturating_add(1);
        if self.streak < self.config.consecutive.max(1) {
            debug!(
                "Trigger: {}/{} qualifying readings",
                self.streak, self.config.consecutive
            );
            return false;
        }

        if let Some(last) = self.last_fire {
            let since = now.saturating_duration_since(last);
            if since < self.config.cooldown {
                debug!(
                    "Trigger: cooldown ({:.1}s remaining)",
                    (self.config.cooldown - since).as_secs_f64()
                );
                return false;
            }
        }

        self.streak = 0;
        self.last_fire = Some(now);
        true
    }
}
