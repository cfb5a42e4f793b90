//! Dosing decision outcomes.
//!
//! Every control tick produces exactly one [`DosingEvent`]. The reason is
//! diagnostic text for the published log line; no consumer parses it. The
//! volume payloads are what the tick asked the actuation planner to move.

use std::fmt;

/// Closed set of outcomes a dosing policy can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum DosingEvent {
    /// Nothing to do this tick.
    NoEvent { reason: String },

    /// Fresh medium in, equal waste out.
    Dilution {
        reason: String,
        media_ml: f64,
        waste_ml: f64,
        /// Raw PID output, present when a PID policy sized the dilution.
        pid_output: Option<f64>,
    },

    /// Alternate (growth-inhibiting) medium dosed, possibly alongside
    /// fresh medium; waste equals their sum.
    AltMedia {
        reason: String,
        alt_media_ml: f64,
        media_ml: f64,
        waste_ml: f64,
    },
}

impl DosingEvent {
    /// Build a `NoEvent` from anything stringifiable.
    pub fn none(reason: impl Into<String>) -> Self {
        Self::NoEvent {
            reason: reason.into(),
        }
    }

    /// The diagnostic reason attached at decision time.
    pub fn reason(&self) -> &str {
        match self {
            Self::NoEvent { reason }
            | Self::Dilution { reason, .. }
            | Self::AltMedia { reason, .. } => reason,
        }
    }
}

impl fmt::Display for DosingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEvent { reason } => write!(f, "NoEvent: {reason}"),
            Self::Dilution { reason, .. } => write!(f, "DilutionEvent: {reason}"),
            Self::AltMedia { reason, .. } => write!(f, "AltMediaEvent: {reason}"),
        }
    }
}
