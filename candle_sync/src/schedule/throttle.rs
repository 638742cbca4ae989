//! Load-based backoff between dispatch batches.

use std::time::Duration;

use tracing::warn;

use crate::config::ThrottleConfig;

/// Cubic backoff on the upstream's load reading.
///
/// Below `high_water` nothing happens. Above it the pause is
/// `coefficient * (load / max_weight)^3`, so it stays short just over the mark
/// and grows steeply towards the cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throttle {
    high_water: u32,
    max_weight: u32,
    coefficient: Duration,
}

impl Throttle {
    pub fn new(high_water: u32, max_weight: u32, coefficient: Duration) -> Self {
        Self {
            high_water,
            max_weight: max_weight.max(1),
            coefficient,
        }
    }

    /// Throttle that never pauses.
    pub fn disabled() -> Self {
        Self::new(u32::MAX, u32::MAX, Duration::ZERO)
    }

    pub fn max_weight(&self) -> u32 {
        self.max_weight
    }

    /// Pause owed for a load reading, if any.
    pub fn backoff(&self, weight: u32) -> Option<Duration> {
        if weight <= self.high_water {
            return None;
        }
        let ratio = (f64::from(weight) / f64::from(self.max_weight)).min(1.0);
        let pause = self.coefficient.mul_f64(ratio.powi(3));
        (!pause.is_zero()).then_some(pause)
    }

    /// Sleep for the larger of the load backoff and `floor`.
    pub async fn pause(&self, weight: Option<u32>, floor: Option<Duration>) {
        let load = weight.and_then(|w| self.backoff(w));
        let Some(pause) = load.max(floor) else {
            return;
        };
        warn!(
            used_weight = ?weight,
            max_weight = self.max_weight,
            pause_ms = pause.as_millis() as u64,
            "high upstream load, backing off"
        );
        tokio::time::sleep(pause).await;
    }
}

impl From<&ThrottleConfig> for Throttle {
    fn from(cfg: &ThrottleConfig) -> Self {
        Throttle::new(
            cfg.high_water,
            cfg.max_weight,
            Duration::from_secs_f64(cfg.backoff_coefficient_secs),
        )
    }
}
