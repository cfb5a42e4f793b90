//! Classic morbidostat (Toprak 2013): keep density below a threshold by
//! chemical means. Every tick cycles the configured volume; the choice is
//! only whether it carries the growth inhibitor.
//!
//! The first tick after startup is always a no-op: the rising/falling
//! test needs two density samples.

use crate::actuation::ActuationRequest;
use crate::config::AlgorithmConfig;
use crate::error::Result;
use crate::events::DosingEvent;

use super::{require, DosingPolicy, PolicyInputs};

pub struct Morbidostat;

impl Morbidostat {
    pub fn new(config: &AlgorithmConfig) -> Result<Self> {
        require(config.target_od, "morbidostat requires target_od")?;
        require(config.volume, "morbidostat requires volume")?;
        Ok(Morbidostat)
    }
}

impl DosingPolicy for Morbidostat {
    fn display_name(&self) -> &'static str {
        "Morbidostat"
    }

    fn decide(&mut self, inputs: &PolicyInputs) -> (DosingEvent, Option<ActuationRequest>) {
        let Some(previous_od) = inputs.previous_od else {
            return (
                DosingEvent::none("skip first event to wait for OD readings"),
                None,
            );
        };

        let volume = inputs.volume;
        if inputs.latest_od >= inputs.target_od && inputs.latest_od >= previous_od {
            // above the threshold and still rising: growth is outpacing
            // dilution, so push inhibitor
            let event = DosingEvent::AltMedia {
                reason: format!(
                    "latest OD, {:.2} >= target OD, {:.2} and latest OD, {:.2} >= previous OD, {:.2}",
                    inputs.latest_od, inputs.target_od, inputs.latest_od, previous_od
                ),
                alt_media_ml: volume,
                media_ml: 0.0,
                waste_ml: volume,
            };
            (event, Some(ActuationRequest::alt_media(volume)))
        } else {
            let event = DosingEvent::Dilution {
                reason: format!(
                    "latest OD, {:.2} < target OD, {:.2} or latest OD, {:.2} < previous OD, {:.2}",
                    inputs.latest_od, inputs.target_od, inputs.latest_od, previous_od
                ),
                media_ml: volume,
                waste_ml: volume,
                pid_output: None,
            };
            (event, Some(ActuationRequest::dilution(volume)))
        }
    }
}
