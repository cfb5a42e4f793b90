//! Cached sensor state.
//!
//! The control loop never talks to sensor hardware: external producer jobs
//! publish filtered optical density and growth rate to the bus, and the
//! passive listener callbacks write the latest value here. Only the last
//! value per channel is retained, plus the previous density sample for the
//! morbidostat hysteresis rule.
//!
//! The listener context writes, the scheduler context reads. A tick may
//! observe a torn pair (density updated, growth rate not yet) — the
//! missing-data and staleness guards in the controller are the only
//! protection, so readers handle every combination of `None`s.

use std::time::{Duration, Instant};

/// One cached reading.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub value: f64,
    pub at: Instant,
}

/// Latest-value cache for the two channels a dosing job consumes.
#[derive(Debug, Default)]
pub struct SensorCache {
    latest_od: Option<Reading>,
    previous_od: Option<f64>,
    latest_growth_rate: Option<Reading>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a filtered optical-density sample. The prior latest value
    /// slides into the hysteresis slot.
    pub fn record_od(&mut self, value: f64) {
        self.record_od_at(value, Instant::now());
    }

    /// Timestamp-injectable variant for staleness tests.
    pub fn record_od_at(&mut self, value: f64, at: Instant) {
        self.previous_od = self.latest_od.map(|r| r.value);
        self.latest_od = Some(Reading { value, at });
    }

    /// Record a growth-rate sample.
    pub fn record_growth_rate(&mut self, value: f64) {
        self.record_growth_rate_at(value, Instant::now());
    }

    /// Timestamp-injectable variant for staleness tests.
    pub fn record_growth_rate_at(&mut self, value: f64, at: Instant) {
        self.latest_growth_rate = Some(Reading { value, at });
    }

    pub fn latest_od(&self) -> Option<Reading> {
        self.latest_od
    }

    pub fn previous_od(&self) -> Option<f64> {
        self.previous_od
    }

    pub fn latest_growth_rate(&self) -> Option<Reading> {
        self.latest_growth_rate
    }

    /// Both channels have been observed at least once.
    pub fn is_complete(&self) -> bool {
        self.latest_od.is_some() && self.latest_growth_rate.is_some()
    }

    /// Age of the *older* of the two readings: if either channel has gone
    /// quiet, the pair is stale. `None` until both channels have reported.
    pub fn stalest_age(&self, now: Instant) -> Option<Duration> {
        let od = self.latest_od?;
        let gr = self.latest_growth_rate?;
        let oldest = od.at.min(gr.at);
        Some(now.saturating_duration_since(oldest))
    }
}
