//! Do-nothing mode: the job runs, announces itself, and syncs settings,
//! but never moves liquid.

use crate::actuation::ActuationRequest;
use crate::events::DosingEvent;

use super::{DosingPolicy, PolicyInputs};

pub struct Silent;

impl Silent {
    pub fn new() -> Self {
        Silent
    }
}

impl Default for Silent {
    fn default() -> Self {
        Self::new()
    }
}

impl DosingPolicy for Silent {
    fn display_name(&self) -> &'static str {
        "Silent"
    }

    fn decide(&mut self, _inputs: &PolicyInputs) -> (DosingEvent, Option<ActuationRequest>) {
        (
            DosingEvent::none("never execute dosing events in Silent mode"),
            None,
        )
    }
}
