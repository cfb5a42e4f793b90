//! PID turbidostat: size each dilution with a PID loop on optical
//! density instead of flushing a fixed volume at a hard threshold.
//!
//! Output range is clamped to [0, 1] and interpreted as the fraction of
//! the configured exchange volume to cycle this tick. The loop acts in
//! the approach band (above 75% of target, at or below target); once the
//! density overshoots the setpoint the clamped output falls to zero and
//! the tick is a no-op.

use log::debug;

use crate::actuation::ActuationRequest;
use crate::config::{AlgorithmConfig, MIN_RESOLVABLE_ML};
use crate::control::pid::PidController;
use crate::error::Result;
use crate::events::DosingEvent;
use crate::protocol::settings::SettingValue;

use super::{require, DosingPolicy, PolicyInputs};

/// No dilution below this fraction of the target density; the culture is
/// still climbing toward its operating point.
const MIN_OD_FRACTION: f64 = 0.75;

const KP: f64 = 2.0;
const KI: f64 = 0.15;
const KD: f64 = 0.0;

pub struct PidTurbidostat {
    pid: PidController,
}

impl PidTurbidostat {
    pub fn new(config: &AlgorithmConfig) -> Result<Self> {
        let target_od = require(config.target_od, "pid_turbidostat requires target_od")?;
        require(config.volume, "pid_turbidostat requires volume")?;
        let mut pid = PidController::new(KP, KI, KD, target_od);
        pid.set_limits(0.0, 1.0);
        Ok(PidTurbidostat { pid })
    }

    /// Current PID setpoint, tracked live from the `target_od` setting.
    pub fn setpoint(&self) -> f64 {
        self.pid.target()
    }
}

impl DosingPolicy for PidTurbidostat {
    fn display_name(&self) -> &'static str {
        "PID Turbidostat"
    }

    fn decide(&mut self, inputs: &PolicyInputs) -> (DosingEvent, Option<ActuationRequest>) {
        let min_od = MIN_OD_FRACTION * inputs.target_od;
        if inputs.latest_od <= min_od {
            return (
                DosingEvent::none(format!(
                    "current OD, {:.2}V, less than OD to start diluting, {:.2}V",
                    inputs.latest_od, min_od
                )),
                None,
            );
        }

        let output = self.pid.compute(inputs.latest_od, inputs.duration_min);
        let volume_to_cycle = output * inputs.volume;
        debug!("pid_turbidostat output={output:.4} volume_to_cycle={volume_to_cycle:.4}mL");

        if volume_to_cycle < MIN_RESOLVABLE_ML {
            return (
                DosingEvent::none(format!(
                    "PID output={output:.2}, so practically no volume to cycle"
                )),
                None,
            );
        }

        let event = DosingEvent::Dilution {
            reason: format!("PID output={output:.2}, volume to cycle={volume_to_cycle:.2}mL"),
            media_ml: volume_to_cycle,
            waste_ml: volume_to_cycle,
            pid_output: Some(output),
        };
        (event, Some(ActuationRequest::dilution(volume_to_cycle)))
    }

    fn setting_changed(&mut self, name: &str, value: &SettingValue) {
        if name == "target_od" {
            if let SettingValue::Float(target) = value {
                self.pid.set_target(*target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PidTurbidostat {
        PidTurbidostat::new(&AlgorithmConfig {
            target_od: Some(1.0),
            volume: Some(0.25),
            ..AlgorithmConfig::default()
        })
        .unwrap()
    }

    fn inputs(od: f64) -> PolicyInputs {
        PolicyInputs {
            latest_od: od,
            previous_od: None,
            latest_growth_rate: 0.01,
            target_od: 1.0,
            target_growth_rate: 0.0,
            volume: 0.25,
            duration_min: 60.0,
        }
    }

    #[test]
    fn holds_well_below_target() {
        let mut policy = policy();
        let (event, request) = policy.decide(&inputs(0.20));
        assert!(matches!(event, DosingEvent::NoEvent { .. }));
        assert!(request.is_none());
        // boundary is inclusive
        let (event, _) = policy.decide(&inputs(0.75));
        assert!(matches!(event, DosingEvent::NoEvent { .. }));
    }

    #[test]
    fn dilutes_through_the_approach_band() {
        let mut policy = policy();
        for od in [0.81, 0.88, 0.95, 0.99] {
            let (event, request) = policy.decide(&inputs(od));
            match event {
                DosingEvent::Dilution {
                    media_ml,
                    waste_ml,
                    pid_output: Some(output),
                    ..
                } => {
                    assert!(output > 0.0 && output <= 1.0, "od={od}");
                    assert!((media_ml - waste_ml).abs() < 1e-12);
                    assert!(media_ml >= MIN_RESOLVABLE_ML && media_ml <= 0.25);
                }
                other => panic!("expected dilution at od={od}, got {other:?}"),
            }
            assert!(request.is_some());
        }
    }

    #[test]
    fn overshoot_clamps_output_to_zero() {
        let mut policy = policy();
        let (event, request) = policy.decide(&inputs(1.2));
        assert!(matches!(event, DosingEvent::NoEvent { .. }));
        assert!(request.is_none());
    }

    #[test]
    fn negligible_volume_is_suppressed() {
        // Short dt with the measurement hugging the setpoint: the output
        // stays positive but the sized volume is below pump resolution.
        let mut policy = policy();
        let mut i = inputs(0.999);
        i.duration_min = 1.0;
        let (event, request) = policy.decide(&i);
        assert!(matches!(event, DosingEvent::NoEvent { .. }));
        assert!(request.is_none());
    }

    #[test]
    fn target_od_setting_retunes_setpoint() {
        let mut policy = policy();
        policy.setting_changed("target_od", &SettingValue::Float(1.5));
        assert_eq!(policy.setpoint(), 1.5);
        policy.setting_changed("volume", &SettingValue::Float(9.0));
        assert_eq!(policy.setpoint(), 1.5);
        policy.setting_changed("target_od", &SettingValue::Text("junk".into()));
        assert_eq!(policy.setpoint(), 1.5);
    }
}
