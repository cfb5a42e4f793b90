//! Port traits — the boundary between the control core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ DosingController (domain)
//! ```
//!
//! Driven adapters (the bus transport, the pump drivers) implement these
//! traits. The core consumes them via generics, so the domain logic never
//! touches a broker socket or a motor driver directly.

use crate::error::ActuatorError;

// ───────────────────────────────────────────────────────────────
// Message bus port
// ───────────────────────────────────────────────────────────────

/// Delivery-guarantee classes the bus must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QoS {
    /// High-frequency telemetry; losing one is fine.
    AtMostOnce = 0,
    /// State and setting announcements.
    AtLeastOnce = 1,
    /// Commands and state changes.
    ExactlyOnce = 2,
}

/// A message the broker delivers on our behalf if we vanish without a
/// graceful close. Registered once at connect time.
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Callback invoked on the bus dispatch context for every matching message.
pub type Subscriber = std::sync::Arc<dyn Fn(&str, &str) + Send + Sync>;

/// The bus transport as the core needs it. Topic patterns use `/`-separated
/// levels with `+` as a single-level wildcard.
///
/// Implementations must tolerate `publish` being called from inside a
/// subscriber callback (the attribute-sync protocol republishes every
/// mutation it receives).
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `topic`.
    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> anyhow::Result<()>;

    /// Subscribe `callback` to every topic matching `pattern`. Retained
    /// messages on matching topics are redelivered immediately.
    fn subscribe(&self, pattern: &str, qos: QoS, callback: Subscriber) -> anyhow::Result<()>;

    /// Register the connection's last will. Replaces any previous will.
    fn set_last_will(&self, will: LastWill) -> anyhow::Result<()>;

    /// Gracefully detach from the broker. The last will is discarded.
    fn disconnect(&self) -> anyhow::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Pump actuation port
// ───────────────────────────────────────────────────────────────

/// One pump command: either a metered volume or a timed run. The two are
/// mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dose {
    /// Move a metered volume, in mL.
    Volume(f64),
    /// Run the pump for a fixed time, in seconds.
    DurationSecs(f64),
}

impl Dose {
    /// Reject physically meaningless commands before they reach hardware.
    pub fn validate(self) -> Result<Self, ActuatorError> {
        let amount = match self {
            Self::Volume(ml) => ml,
            Self::DurationSecs(s) => s,
        };
        if amount < 0.0 {
            Err(ActuatorError::NegativeDose)
        } else {
            Ok(self)
        }
    }
}

/// Write-side port: the actuation planner calls this to move liquid.
/// Calls are idempotent per dose and execute synchronously.
pub trait PumpInterface: Send {
    /// Dose fresh growth medium into the vial.
    fn dose_media(&mut self, dose: Dose) -> Result<(), ActuatorError>;

    /// Dose the alternate (growth-inhibiting) medium into the vial.
    fn dose_alt_media(&mut self, dose: Dose) -> Result<(), ActuatorError>;

    /// Remove waste volume from the vial.
    fn remove_waste(&mut self, dose: Dose) -> Result<(), ActuatorError>;
}
