//! Dosing policies.
//!
//! Five interchangeable decision strategies over the same cached sensor
//! state and live-synced settings. Each tick the active policy receives a
//! [`PolicyInputs`] snapshot and returns one [`DosingEvent`] plus,
//! optionally, the (alt-media, media, waste) triple it wants executed.
//! Policies hold only their own decision state (the two PID variants keep
//! a controller); scheduling, staleness guarding, and actuation live in
//! [`crate::controller`].
//!
//! Tie-break rule throughout: density and growth-rate comparisons are
//! inclusive on the boundary (`>=` favours action), and the controller's
//! not-ready / stale guards always win over a policy decision.

pub mod morbidostat;
pub mod pid_morbidostat;
pub mod pid_turbidostat;
pub mod silent;
pub mod turbidostat;

use crate::actuation::ActuationRequest;
use crate::config::AlgorithmConfig;
use crate::error::{Error, Result};
use crate::events::DosingEvent;
use crate::protocol::settings::SettingValue;

/// Point-in-time inputs for one decision, resolved by the controller from
/// the sensor cache and the live settings registry.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInputs {
    pub latest_od: f64,
    /// Density sample displaced by the latest one; `None` on the first.
    pub previous_od: Option<f64>,
    pub latest_growth_rate: f64,
    pub target_od: f64,
    pub target_growth_rate: f64,
    pub volume: f64,
    /// Minutes between ticks; doubles as the PID `dt`.
    pub duration_min: f64,
}

/// A dosing decision strategy.
pub trait DosingPolicy: Send {
    /// Human-readable name, seeded into the `display_name` setting.
    fn display_name(&self) -> &'static str;

    /// Decide once. Never performs I/O.
    fn decide(&mut self, inputs: &PolicyInputs) -> (DosingEvent, Option<ActuationRequest>);

    /// Observation-point notification: a live setting changed. PID
    /// policies use this to retune their setpoint in place.
    fn setting_changed(&mut self, _name: &str, _value: &SettingValue) {}
}

/// The five modes of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosingMode {
    Silent,
    Turbidostat,
    PidTurbidostat,
    PidMorbidostat,
    Morbidostat,
}

impl DosingMode {
    /// Parse the wire/config name of a mode.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "silent" => Some(Self::Silent),
            "turbidostat" => Some(Self::Turbidostat),
            "pid_turbidostat" => Some(Self::PidTurbidostat),
            "pid_morbidostat" => Some(Self::PidMorbidostat),
            "morbidostat" => Some(Self::Morbidostat),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Turbidostat => "turbidostat",
            Self::PidTurbidostat => "pid_turbidostat",
            Self::PidMorbidostat => "pid_morbidostat",
            Self::Morbidostat => "morbidostat",
        }
    }
}

/// Construct the policy for `mode`, validating its required configuration.
/// Missing required targets are fatal at startup: the job never reaches
/// Ready with a policy it cannot run.
pub fn build_policy(mode: DosingMode, config: &AlgorithmConfig) -> Result<Box<dyn DosingPolicy>> {
    Ok(match mode {
        DosingMode::Silent => Box::new(silent::Silent::new()),
        DosingMode::Turbidostat => Box::new(turbidostat::Turbidostat::new(config)?),
        DosingMode::PidTurbidostat => Box::new(pid_turbidostat::PidTurbidostat::new(config)?),
        DosingMode::PidMorbidostat => Box::new(pid_morbidostat::PidMorbidostat::new(config)?),
        DosingMode::Morbidostat => Box::new(morbidostat::Morbidostat::new(config)?),
    })
}

pub(crate) fn require(value: Option<f64>, what: &'static str) -> Result<f64> {
    value.ok_or(Error::Config(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_roundtrip() {
        for mode in [
            DosingMode::Silent,
            DosingMode::Turbidostat,
            DosingMode::PidTurbidostat,
            DosingMode::PidMorbidostat,
            DosingMode::Morbidostat,
        ] {
            assert_eq!(DosingMode::from_name(mode.name()), Some(mode));
        }
        assert_eq!(DosingMode::from_name("chemostat"), None);
    }

    #[test]
    fn missing_required_target_is_fatal_at_startup() {
        let config = AlgorithmConfig::default(); // no targets set
        assert!(build_policy(DosingMode::Turbidostat, &config).is_err());
        assert!(build_policy(DosingMode::PidTurbidostat, &config).is_err());
        assert!(build_policy(DosingMode::PidMorbidostat, &config).is_err());
        assert!(build_policy(DosingMode::Morbidostat, &config).is_err());
        assert!(build_policy(DosingMode::Silent, &config).is_ok());
    }
}
