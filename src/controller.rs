//! The dosing-control job: scheduling, guards, and wiring.
//!
//! [`DosingController`] composes the protocol substrate, the sensor
//! cache, one dosing policy, and the actuation planner into a periodic
//! control loop. Each tick it checks the lifecycle and data guards,
//! lets the policy decide, executes the resulting request through the
//! planner, and publishes the outcome to the experiment log.
//!
//! Guard order is fixed: lifecycle first (a sleeping job must not block
//! on sensor data), then data completeness, then staleness. A guard
//! produces a `NoEvent`, never an error; errors are reserved for broken
//! invariants and failed hardware, which end the job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::actuation::{ActuationPlanner, ActuationRequest};
use crate::config::{AlgorithmConfig, STALENESS_LIMIT};
use crate::dosing::{build_policy, DosingMode, DosingPolicy, PolicyInputs};
use crate::error::{Error, Result};
use crate::events::DosingEvent;
use crate::ports::{MessageBus, PumpInterface, QoS};
use crate::protocol::settings::{SettingValue, SettingsRegistry};
use crate::protocol::{JobCore, JobIdentity};
use crate::sensors::SensorCache;

/// Granularity of the stop-flag poll while sleeping between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub struct DosingController<B: MessageBus + 'static, P: PumpInterface> {
    core: Arc<JobCore<B>>,
    cache: Arc<Mutex<SensorCache>>,
    policy: Arc<Mutex<Box<dyn DosingPolicy>>>,
    pump: P,
    planner: ActuationPlanner,
    config: AlgorithmConfig,
}

impl<B: MessageBus + 'static, P: PumpInterface> DosingController<B, P> {
    /// Build the job, announce it on the bus, and reach `Ready`.
    ///
    /// Fails if the chosen mode is missing required configuration or the
    /// bus rejects the startup sequence; a job that cannot fully start
    /// never doses.
    pub fn start(
        bus: Arc<B>,
        identity: JobIdentity,
        mode: DosingMode,
        config: AlgorithmConfig,
        pump: P,
    ) -> Result<Self> {
        let policy = build_policy(mode, &config)?;
        let display_name = policy.display_name();

        let mut editable: Vec<(&str, SettingValue)> = Vec::new();
        if let Some(volume) = config.volume {
            editable.push(("volume", SettingValue::Float(volume)));
        }
        if let Some(target_od) = config.target_od {
            editable.push(("target_od", SettingValue::Float(target_od)));
        }
        if let Some(target_growth_rate) = config.target_growth_rate {
            editable.push(("target_growth_rate", SettingValue::Float(target_growth_rate)));
        }
        editable.push(("display_name", SettingValue::Text(display_name.to_string())));

        let core = JobCore::new(identity, bus, SettingsRegistry::new(editable));

        let policy: Arc<Mutex<Box<dyn DosingPolicy>>> = Arc::new(Mutex::new(policy));
        {
            let policy = policy.clone();
            core.set_setting_hook(Box::new(move |name, value| {
                policy
                    .lock()
                    .expect("policy mutex poisoned")
                    .setting_changed(name, value);
            }));
        }

        let cache = Arc::new(Mutex::new(SensorCache::new()));
        Self::subscribe_sensors(&core, &cache, &config.sensor_channel)?;

        JobCore::start(&core)?;
        core.publish_log(&format!(
            "[{}] Starting {display_name}.",
            core.identity().job_name
        ));

        Ok(Self {
            core,
            cache,
            policy,
            pump,
            planner: ActuationPlanner::new(config.settle_pause),
            config,
        })
    }

    fn subscribe_sensors(
        core: &Arc<JobCore<B>>,
        cache: &Arc<Mutex<SensorCache>>,
        channel: &str,
    ) -> Result<()> {
        let od_topic = core
            .identity()
            .experiment_topic(&format!("od_filtered/{channel}"));
        let od_cache = cache.clone();
        core.bus().subscribe(
            &od_topic,
            QoS::AtMostOnce,
            Arc::new(move |topic, payload| match payload.parse::<f64>() {
                Ok(value) => od_cache
                    .lock()
                    .expect("sensor cache poisoned")
                    .record_od(value),
                Err(_) => warn!("unparseable density payload on {topic}: {payload:?}"),
            }),
        )?;

        let gr_topic = core.identity().experiment_topic("growth_rate");
        let gr_cache = cache.clone();
        core.bus().subscribe(
            &gr_topic,
            QoS::AtMostOnce,
            Arc::new(move |topic, payload| match payload.parse::<f64>() {
                Ok(value) => gr_cache
                    .lock()
                    .expect("sensor cache poisoned")
                    .record_growth_rate(value),
                Err(_) => warn!("unparseable growth-rate payload on {topic}: {payload:?}"),
            }),
        )?;
        Ok(())
    }

    /// One control tick: guards, decision, actuation, outcome log.
    ///
    /// The outcome log line covers every path, guard no-events included.
    pub fn run_tick(&mut self, stop: &AtomicBool) -> Result<DosingEvent> {
        let event = self.tick_outcome(stop)?;
        self.core.publish_log(&format!(
            "[{}] triggered {event}.",
            self.core.identity().job_name
        ));
        Ok(event)
    }

    fn tick_outcome(&mut self, stop: &AtomicBool) -> Result<DosingEvent> {
        let state = self.core.state();
        if !state.allows_actuation() {
            return Ok(DosingEvent::none(format!("currently in state {state}")));
        }

        while !self.lock_cache().is_complete() {
            if stop.load(Ordering::SeqCst) {
                return Ok(DosingEvent::none("stopped while waiting for sensor data"));
            }
            self.core.publish_log(&format!(
                "[{}] Waiting for sensor data.",
                self.core.identity().job_name
            ));
            thread::sleep(self.config.retry_delay);
        }

        let now = Instant::now();
        if let Some(age) = self.lock_cache().stalest_age(now) {
            if age > STALENESS_LIMIT {
                return Ok(DosingEvent::none(format!(
                    "readings are too stale (over {} minutes old) - are the sensor jobs running?",
                    STALENESS_LIMIT.as_secs() / 60
                )));
            }
        }

        let Some(inputs) = self.snapshot_inputs() else {
            return Ok(DosingEvent::none("waiting for sensor data"));
        };

        let (event, request) = self
            .policy
            .lock()
            .expect("policy mutex poisoned")
            .decide(&inputs);

        if let Some(request) = request {
            self.execute(&request)?;
        }
        Ok(event)
    }

    /// Run until `stop` is raised or a tick fails. Every produced event is
    /// handed to `on_event`.
    ///
    /// A stop ends the job gracefully in `Disconnected`. A failed tick is
    /// reported to the error log and returned without a graceful close, so
    /// the process dies and the broker announces `Lost` via the last will;
    /// the loop never keeps running in a possibly corrupt state.
    pub fn run(
        &mut self,
        stop: &AtomicBool,
        mut on_event: impl FnMut(&DosingEvent),
    ) -> Result<()> {
        let interval = self.config.tick_interval();

        if self.config.skip_first_run {
            self.core.publish_log(&format!(
                "[{}] Skipping first run.",
                self.core.identity().job_name
            ));
            self.pause(stop, interval);
        }

        while !stop.load(Ordering::SeqCst) {
            match self.run_tick(stop) {
                Ok(event) => on_event(&event),
                Err(e) => {
                    self.core.publish_error_log(&format!(
                        "[{}] failed with {e}.",
                        self.core.identity().job_name
                    ));
                    return Err(e);
                }
            }
            self.pause(stop, interval);
        }

        self.core.disconnect();
        Ok(())
    }

    /// Protocol substrate handle, for observing state and settings.
    pub fn core(&self) -> &Arc<JobCore<B>> {
        &self.core
    }

    /// Resolve the policy inputs from the cache and the live settings,
    /// falling back to the construction-time configuration when a live
    /// value is unreadable (e.g. overwritten with non-numeric text).
    fn snapshot_inputs(&self) -> Option<PolicyInputs> {
        let (latest_od, previous_od, latest_growth_rate) = {
            let cache = self.lock_cache();
            (
                cache.latest_od()?.value,
                cache.previous_od(),
                cache.latest_growth_rate()?.value,
            )
        };
        Some(PolicyInputs {
            latest_od,
            previous_od,
            latest_growth_rate,
            target_od: self.live_or_configured("target_od", self.config.target_od),
            target_growth_rate: self
                .live_or_configured("target_growth_rate", self.config.target_growth_rate),
            volume: self.live_or_configured("volume", self.config.volume),
            duration_min: self.config.duration_min,
        })
    }

    fn live_or_configured(&self, name: &str, configured: Option<f64>) -> f64 {
        self.core
            .setting_f64(name)
            .or(configured)
            .unwrap_or_default()
    }

    fn execute(&mut self, request: &ActuationRequest) -> Result<()> {
        let topic = self.core.identity().experiment_topic("io_batched");
        let bus = self.core.bus().clone();
        self.planner.execute(&mut self.pump, request, &mut |step| {
            let payload = serde_json::to_string(step)
                .map_err(|e| Error::Bus(format!("io record serialization: {e}")))?;
            bus.publish(&topic, &payload, QoS::AtLeastOnce, false)?;
            Ok(())
        })
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, SensorCache> {
        self.cache.lock().expect("sensor cache poisoned")
    }

    /// Stop-aware sleep, polling the flag every [`SLEEP_SLICE`].
    fn pause(&self, stop: &AtomicBool, total: Duration) {
        let deadline = Instant::now() + total;
        while !stop.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}
