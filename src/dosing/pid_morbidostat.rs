//! PID morbidostat (Zhong 2020): once the culture is dense enough, cycle
//! a fixed exchange volume every tick and let a PID loop on growth rate
//! decide how much of it is growth-inhibiting alternate medium.
//!
//! The exchange volume is derived, not configured: it is the volume that
//! holds the culture at the target growth rate given the vial size and
//! the tick length. A configured `volume` is ignored with a notice.

use log::{info, warn};

use crate::actuation::ActuationRequest;
use crate::config::{AlgorithmConfig, VIAL_VOLUME_ML};
use crate::control::pid::PidController;
use crate::error::Result;
use crate::events::DosingEvent;
use crate::protocol::settings::SettingValue;

use super::{require, DosingPolicy, PolicyInputs};

/// No dosing below this fraction of the target density.
const MIN_OD_FRACTION: f64 = 0.7;
/// Above this fraction of the target density the exchange volume doubles
/// to pull the culture back into the sensor's linear range.
const MAX_OD_FRACTION: f64 = 1.25;

const KP: f64 = 0.5;
const KI: f64 = 0.0001;
const KD: f64 = 0.25;

pub struct PidMorbidostat {
    pid: PidController,
}

impl PidMorbidostat {
    pub fn new(config: &AlgorithmConfig) -> Result<Self> {
        require(config.target_od, "pid_morbidostat requires target_od")?;
        let target_growth_rate = require(
            config.target_growth_rate,
            "pid_morbidostat requires target_growth_rate",
        )?;
        if config.volume.is_some() {
            info!("ignoring volume parameter; volume is set by target growth rate and duration");
        }
        let mut pid = PidController::new(KP, KI, KD, target_growth_rate);
        pid.set_limits(0.0, 1.0);
        Ok(PidMorbidostat { pid })
    }

    /// Current PID setpoint, tracked live from the `target_growth_rate`
    /// setting.
    pub fn setpoint(&self) -> f64 {
        self.pid.target()
    }

    /// Exchange volume for one tick at the given growth-rate target.
    fn exchange_volume(target_growth_rate: f64, duration_min: f64) -> f64 {
        target_growth_rate * VIAL_VOLUME_ML * (duration_min / 60.0)
    }
}

impl DosingPolicy for PidMorbidostat {
    fn display_name(&self) -> &'static str {
        "PID Morbidostat"
    }

    fn decide(&mut self, inputs: &PolicyInputs) -> (DosingEvent, Option<ActuationRequest>) {
        let min_od = MIN_OD_FRACTION * inputs.target_od;
        if inputs.latest_od <= min_od {
            return (
                DosingEvent::none(format!(
                    "latest OD less than OD to start diluting, {min_od:.2}"
                )),
                None,
            );
        }

        let fraction = self
            .pid
            .compute(inputs.latest_growth_rate, inputs.duration_min);

        let max_od = MAX_OD_FRACTION * inputs.target_od;
        let mut volume = Self::exchange_volume(inputs.target_growth_rate, inputs.duration_min);
        if inputs.latest_od > max_od {
            warn!("executing double dilution since we are above max OD, {max_od:.2}");
            volume *= 2.0;
        }

        let alt_media_ml = fraction * volume;
        let media_ml = (1.0 - fraction) * volume;
        let event = DosingEvent::AltMedia {
            reason: format!(
                "PID output={fraction:.2}, alt_media_ml={alt_media_ml:.2}mL, media_ml={media_ml:.2}mL"
            ),
            alt_media_ml,
            media_ml,
            waste_ml: volume,
        };
        let request = ActuationRequest {
            alt_media_ml,
            media_ml,
            waste_ml: volume,
        };
        (event, Some(request))
    }

    fn setting_changed(&mut self, name: &str, value: &SettingValue) {
        if name == "target_growth_rate" {
            if let SettingValue::Float(target) = value {
                self.pid.set_target(*target);
            }
        }
    }
}
