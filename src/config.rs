//! Algorithm configuration parameters
//!
//! All tunable parameters for a dosing-control job. Identity (unit,
//! experiment) and the dosing targets are supplied by the surrounding
//! process bootstrap; a subset of the targets is additionally editable at
//! runtime over the bus (see [`crate::protocol`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Working volume of a culture vial, in mL.
pub const VIAL_VOLUME_ML: f64 = 14.0;

/// Hard cap on any single physical actuation step, in mL.
pub const MAX_STEP_ML: f64 = 0.3;

/// Dosing volumes below this are not physically resolvable.
pub const MIN_RESOLVABLE_ML: f64 = 0.01;

/// Sensor readings older than this abort the tick with a no-event.
pub const STALENESS_LIMIT: Duration = Duration::from_secs(5 * 60);

/// Tolerance for the volume-conservation invariant, in mL.
pub const CONSERVATION_EPSILON: f64 = 1e-5;

/// Configuration for one dosing-control job.
///
/// `duration_min` and `sensor_channel` are fixed at construction; the
/// targets and `volume` are mirrored into the settings registry and thus
/// remotely mutable while the job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    // --- Targets ---
    /// Optical density to hold (V). Required by every policy except Silent.
    pub target_od: Option<f64>,
    /// Growth rate to hold (1/h). Required by the PID-morbidostat policy.
    pub target_growth_rate: Option<f64>,
    /// Volume to exchange per dosing action (mL).
    pub volume: Option<f64>,

    // --- Timing ---
    /// Minutes between control ticks.
    pub duration_min: f64,
    /// Defer the very first tick by one full interval (cold-start guard).
    pub skip_first_run: bool,

    // --- Sensors ---
    /// Optical-density channel to listen on, e.g. `"135/A"`.
    pub sensor_channel: String,

    // --- Pacing ---
    /// Settling pause after each physical actuation step. Zero in CI.
    pub settle_pause: Duration,
    /// Delay before re-checking for missing sensor data within a tick.
    pub retry_delay: Duration,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            target_od: None,
            target_growth_rate: None,
            volume: None,

            duration_min: 60.0,
            skip_first_run: false,

            sensor_channel: "135/A".to_string(),

            settle_pause: Duration::from_secs(10),
            retry_delay: Duration::from_secs(10),
        }
    }
}

impl AlgorithmConfig {
    /// Tick interval as a wall-clock duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.duration_min * 60.0)
    }

    /// Pacing suitable for tests and CI: no settling pauses, no retry delay.
    pub fn without_pauses(mut self) -> Self {
        self.settle_pause = Duration::ZERO;
        self.retry_delay = Duration::ZERO;
        self
    }
}
