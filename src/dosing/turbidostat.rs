//! Threshold turbidostat: hold density below a ceiling by diluting a
//! fixed volume whenever the latest reading meets the target.

use crate::actuation::ActuationRequest;
use crate::config::AlgorithmConfig;
use crate::error::Result;
use crate::events::DosingEvent;

use super::{require, DosingPolicy, PolicyInputs};

pub struct Turbidostat;

impl Turbidostat {
    pub fn new(config: &AlgorithmConfig) -> Result<Self> {
        require(config.target_od, "turbidostat requires target_od")?;
        require(config.volume, "turbidostat requires volume")?;
        Ok(Turbidostat)
    }
}

impl DosingPolicy for Turbidostat {
    fn display_name(&self) -> &'static str {
        "Turbidostat"
    }

    fn decide(&mut self, inputs: &PolicyInputs) -> (DosingEvent, Option<ActuationRequest>) {
        if inputs.latest_od >= inputs.target_od {
            let event = DosingEvent::Dilution {
                reason: format!(
                    "latest OD={:.2}V >= target OD={:.2}V",
                    inputs.latest_od, inputs.target_od
                ),
                media_ml: inputs.volume,
                waste_ml: inputs.volume,
                pid_output: None,
            };
            (event, Some(ActuationRequest::dilution(inputs.volume)))
        } else {
            (
                DosingEvent::none(format!(
                    "latest OD={:.2}V < target OD={:.2}V",
                    inputs.latest_od, inputs.target_od
                )),
                None,
            )
        }
    }
}
