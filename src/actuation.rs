//! Actuation planning: turning a (alt-media, media, waste) request into a
//! sequence of bounded pump steps.
//!
//! Large additions shock the culture and blur the optical readings, so
//! any single addition is capped at [`MAX_STEP_ML`](crate::config). An
//! over-cap leg is halved recursively until every step fits; a within-cap
//! companion leg still runs as its own step, so the per-leg sums always
//! equal the original request. Waste removal runs once by volume and then
//! a fixed extra second, the vial's overflow tube making the extra pull
//! a level trim rather than a real removal.
//!
//! Every executed step is reported through the caller's `on_step` hook,
//! which the controller uses to publish `io_batched` records.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{CONSERVATION_EPSILON, MAX_STEP_ML};
use crate::error::{Error, Result};
use crate::ports::{Dose, PumpInterface};

/// One liquid-exchange request. Volumes are in millilitres and must
/// conserve vial volume: `alt_media_ml + media_ml == waste_ml` within
/// [`CONSERVATION_EPSILON`](crate::config).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuationRequest {
    pub alt_media_ml: f64,
    pub media_ml: f64,
    pub waste_ml: f64,
}

impl ActuationRequest {
    /// Fresh medium in, equal waste out.
    pub fn dilution(volume_ml: f64) -> Self {
        Self {
            alt_media_ml: 0.0,
            media_ml: volume_ml,
            waste_ml: volume_ml,
        }
    }

    /// Alternate medium in, equal waste out.
    pub fn alt_media(volume_ml: f64) -> Self {
        Self {
            alt_media_ml: volume_ml,
            media_ml: 0.0,
            waste_ml: volume_ml,
        }
    }

    /// True when inflow matches outflow within tolerance.
    pub fn conserves_volume(&self) -> bool {
        (self.alt_media_ml + self.media_ml - self.waste_ml).abs() < CONSERVATION_EPSILON
    }

    fn is_empty(&self) -> bool {
        self.alt_media_ml == 0.0 && self.media_ml == 0.0 && self.waste_ml == 0.0
    }
}

/// Splits requests into capped steps and drives the pumps.
pub struct ActuationPlanner {
    settle_pause: Duration,
}

/// Extra waste-pump runtime after the volumetric removal, sized to the
/// length of the waste tube.
const WASTE_OVERRUN_SECS: f64 = 1.0;

impl ActuationPlanner {
    pub fn new(settle_pause: Duration) -> Self {
        Self { settle_pause }
    }

    /// Execute `request` against `pump`. `on_step` is invoked once per
    /// executed step with the volumes that moved in that step.
    ///
    /// A non-conserving request is rejected before any pump turns.
    pub fn execute<P: PumpInterface>(
        &self,
        pump: &mut P,
        request: &ActuationRequest,
        on_step: &mut dyn FnMut(&ActuationRequest) -> Result<()>,
    ) -> Result<()> {
        if !request.conserves_volume() {
            return Err(Error::Conservation {
                alt_media_ml: request.alt_media_ml,
                media_ml: request.media_ml,
                waste_ml: request.waste_ml,
            });
        }
        self.run(pump, request, on_step)
    }

    fn run<P: PumpInterface>(
        &self,
        pump: &mut P,
        request: &ActuationRequest,
        on_step: &mut dyn FnMut(&ActuationRequest) -> Result<()>,
    ) -> Result<()> {
        if request.media_ml > MAX_STEP_ML || request.alt_media_ml > MAX_STEP_ML {
            if request.media_ml > MAX_STEP_ML {
                let half = ActuationRequest::dilution(request.media_ml / 2.0);
                self.run(pump, &half, on_step)?;
                self.run(pump, &half, on_step)?;
            } else if request.media_ml > 0.0 {
                self.run(pump, &ActuationRequest::dilution(request.media_ml), on_step)?;
            }

            if request.alt_media_ml > MAX_STEP_ML {
                let half = ActuationRequest::alt_media(request.alt_media_ml / 2.0);
                self.run(pump, &half, on_step)?;
                self.run(pump, &half, on_step)?;
            } else if request.alt_media_ml > 0.0 {
                self.run(
                    pump,
                    &ActuationRequest::alt_media(request.alt_media_ml),
                    on_step,
                )?;
            }
            return Ok(());
        }

        self.step(pump, request, on_step)
    }

    /// One bounded step: alt media, then fresh media, then waste.
    fn step<P: PumpInterface>(
        &self,
        pump: &mut P,
        request: &ActuationRequest,
        on_step: &mut dyn FnMut(&ActuationRequest) -> Result<()>,
    ) -> Result<()> {
        if request.is_empty() {
            return Ok(());
        }

        if request.alt_media_ml > 0.0 {
            pump.dose_alt_media(Dose::Volume(request.alt_media_ml).validate()?)?;
            // let the addition mix before the next reading
            thread::sleep(self.settle_pause);
        }
        if request.media_ml > 0.0 {
            pump.dose_media(Dose::Volume(request.media_ml).validate()?)?;
            thread::sleep(self.settle_pause);
        }
        if request.waste_ml > 0.0 {
            pump.remove_waste(Dose::Volume(request.waste_ml).validate()?)?;
            pump.remove_waste(Dose::DurationSecs(WASTE_OVERRUN_SECS))?;
            thread::sleep(self.settle_pause);
        }

        on_step(request)
    }
}
