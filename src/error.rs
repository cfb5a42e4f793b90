//! Unified error types for the control core.
//!
//! A single `Error` enum every subsystem converts into, keeping the control
//! loop's error handling uniform. Conservation violations and missing
//! construction-time configuration are programming-error-class failures:
//! they abort the tick (resp. startup) and are never retried.

use std::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// An actuation request would change the working volume of the vial.
    /// Carries the offending (alt_media, media, waste) triple in mL.
    Conservation {
        alt_media_ml: f64,
        media_ml: f64,
        waste_ml: f64,
    },
    /// A lifecycle transition was requested into an unknown or illegal state.
    InvalidState(String),
    /// A pump command failed or was malformed.
    Actuator(ActuatorError),
    /// The message bus rejected a publish, subscribe, or disconnect.
    Bus(String),
    /// Required configuration was not supplied at construction.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conservation {
                alt_media_ml,
                media_ml,
                waste_ml,
            } => write!(
                f,
                "volume not conserved: alt_media={alt_media_ml}, media={media_ml}, waste={waste_ml}"
            ),
            Self::InvalidState(name) => write!(f, "invalid lifecycle state: {name}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Bus(msg) => write!(f, "bus: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`PumpInterface`](crate::ports::PumpInterface)
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// A negative volume or duration was requested.
    NegativeDose,
    /// The underlying pump driver reported a hardware failure.
    PumpFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeDose => write!(f, "negative dose requested"),
            Self::PumpFailed => write!(f, "pump failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Bus(format!("{e:#}"))
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
