//! Attribute sync & lifecycle protocol.
//!
//! [`JobCore`] gives every job a bus identity, a declared set of externally
//! settable attributes, a lifecycle state machine, and bidirectional sync
//! over the message bus — without the job exposing any other API.
//!
//! Topic scheme (`/`-separated):
//!
//! ```text
//! bioreactor/{unit}/{experiment}/{job_name}/$properties      editable names
//! bioreactor/{unit}/{experiment}/{job_name}/{attr}/$settable per-attr marker
//! bioreactor/{unit}/{experiment}/{job_name}/{attr}           current value
//! bioreactor/{unit}/{experiment}/{job_name}/{attr}/set       inbound command
//! bioreactor/{unit}/{experiment}/{job_name}/$state           lifecycle state
//! bioreactor/{unit}/{experiment}/log                         operational log
//! bioreactor/{unit}/{experiment}/error_log                   failures
//! ```
//!
//! Jobs additionally subscribe to the `$broadcast` unit so the whole fleet
//! can be addressed with one publish. Unknown attributes in a `/set` are
//! silently ignored: broadcast commands routinely target attributes other
//! jobs own.

pub mod lifecycle;
pub mod settings;

use std::sync::{Arc, Mutex, Weak};

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::ports::{LastWill, MessageBus, QoS};
use lifecycle::LifecycleState;
use settings::{SettingValue, SettingsRegistry};

/// Root of every topic in the fleet namespace.
pub const TOPIC_ROOT: &str = "bioreactor";

/// Distinguished unit identifier every job also listens under.
pub const BROADCAST_UNIT: &str = "$broadcast";

// ───────────────────────────────────────────────────────────────
// Identity
// ───────────────────────────────────────────────────────────────

/// The triple identifying a running job's namespace on the bus.
/// Immutable after construction; resolved by the process bootstrap,
/// never from ambient global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub unit: String,
    pub experiment: String,
    pub job_name: String,
}

impl JobIdentity {
    pub fn new(unit: &str, experiment: &str, job_name: &str) -> Self {
        Self {
            unit: unit.to_string(),
            experiment: experiment.to_string(),
            job_name: job_name.to_string(),
        }
    }

    /// `bioreactor/{unit}/{experiment}/{job_name}/{leaf}`
    pub fn job_topic(&self, leaf: &str) -> String {
        format!(
            "{TOPIC_ROOT}/{}/{}/{}/{leaf}",
            self.unit, self.experiment, self.job_name
        )
    }

    /// `bioreactor/{unit}/{experiment}/{leaf}` — experiment-scoped topics
    /// shared by all jobs (sensor channels, log, io_batched).
    pub fn experiment_topic(&self, leaf: &str) -> String {
        format!("{TOPIC_ROOT}/{}/{}/{leaf}", self.unit, self.experiment)
    }

    fn set_pattern(&self, unit: &str) -> String {
        format!(
            "{TOPIC_ROOT}/{unit}/{}/{}/+/set",
            self.experiment, self.job_name
        )
    }
}

/// Hook invoked after every successful setting mutation, remote or
/// in-process. The single channel through which configuration changes
/// become visible to in-process consumers (e.g. a PID setpoint).
pub type SettingHook = Box<dyn Fn(&str, &SettingValue) + Send + Sync>;

// ───────────────────────────────────────────────────────────────
// JobCore
// ───────────────────────────────────────────────────────────────

/// Protocol substrate every job composes with.
pub struct JobCore<B: MessageBus> {
    identity: JobIdentity,
    bus: Arc<B>,
    state: Mutex<LifecycleState>,
    settings: Mutex<SettingsRegistry>,
    hook: Mutex<Option<SettingHook>>,
}

impl<B: MessageBus + 'static> JobCore<B> {
    /// Build the core in `Init`. Call [`JobCore::start`] to go live.
    pub fn new(identity: JobIdentity, bus: Arc<B>, settings: SettingsRegistry) -> Arc<Self> {
        Arc::new(Self {
            identity,
            bus,
            state: Mutex::new(LifecycleState::Init),
            settings: Mutex::new(settings),
            hook: Mutex::new(None),
        })
    }

    /// Register the observation hook. At most one; later calls replace it.
    /// Must be installed before [`JobCore::start`] so no remote mutation
    /// can slip past it (two-phase construction).
    pub fn set_setting_hook(&self, hook: SettingHook) {
        *self.lock_hook() = Some(hook);
    }

    /// Go live: register the last will, announce the editable settings,
    /// subscribe for incoming `set` requests, and transition Init → Ready.
    pub fn start(this: &Arc<Self>) -> Result<()> {
        this.bus.set_last_will(LastWill {
            topic: this.identity.job_topic("$state"),
            payload: LifecycleState::Lost.name().to_string(),
            qos: QoS::ExactlyOnce,
            retain: true,
        })?;

        this.publish_state(LifecycleState::Init)?;
        this.declare_settable_properties()?;

        for unit in [this.identity.unit.as_str(), BROADCAST_UNIT] {
            let weak: Weak<Self> = Arc::downgrade(this);
            this.bus.subscribe(
                &this.identity.set_pattern(unit),
                QoS::ExactlyOnce,
                Arc::new(move |topic, payload| {
                    if let Some(core) = weak.upgrade() {
                        core.handle_set(topic, payload);
                    }
                }),
            )?;
        }

        this.transition(LifecycleState::Ready)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// True when the job may drive actuators.
    pub fn is_ready(&self) -> bool {
        self.state().allows_actuation()
    }

    /// Explicit lifecycle transition. Publishes the new state retained and
    /// logs the change; `Disconnected` additionally detaches from the bus.
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let previous = {
            let mut state = self.lock_state();
            let previous = *state;
            if previous.is_terminal() && next != previous {
                return Err(Error::InvalidState(format!(
                    "cannot leave {previous} for {next}"
                )));
            }
            *state = next;
            previous
        };

        if previous != next {
            info!(
                "[{}] state {} -> {}",
                self.identity.job_name, previous, next
            );
            self.publish_log(&format!(
                "[{}] Updated state from {previous} to {next}.",
                self.identity.job_name
            ));
        }
        self.publish_state(next)?;

        if next == LifecycleState::Disconnected {
            self.bus.disconnect()?;
        }
        Ok(())
    }

    /// Graceful shutdown entry point for signal handlers: best-effort
    /// transition to `Disconnected` before process exit.
    pub fn disconnect(&self) {
        if let Err(e) = self.transition(LifecycleState::Disconnected) {
            warn!("[{}] disconnect failed: {e}", self.identity.job_name);
        }
    }

    // ── Settings ──────────────────────────────────────────────

    /// Numeric read of a live setting.
    pub fn setting_f64(&self, name: &str) -> Option<f64> {
        self.lock_settings().get_f64(name)
    }

    /// In-process mutation of a declared setting. Goes through the same
    /// observation point as remote mutations: republish, log, hook.
    pub fn set_setting(&self, name: &str, value: SettingValue) -> Result<()> {
        let old = self
            .lock_settings()
            .set(name, value.clone())
            .ok_or(Error::Config("setting not declared"))?;
        self.after_mutation(name, &old, &value);
        Ok(())
    }

    // ── Publishing helpers ────────────────────────────────────

    /// Publish a human-readable line to the experiment log topic.
    pub fn publish_log(&self, line: &str) {
        info!("{line}");
        if let Err(e) = self.bus.publish(
            &self.identity.experiment_topic("log"),
            line,
            QoS::AtMostOnce,
            false,
        ) {
            warn!("log publish failed: {e:#}");
        }
    }

    /// Publish a failure line to the experiment error-log topic.
    pub fn publish_error_log(&self, line: &str) {
        error!("{line}");
        if let Err(e) = self.bus.publish(
            &self.identity.experiment_topic("error_log"),
            line,
            QoS::AtLeastOnce,
            false,
        ) {
            warn!("error_log publish failed: {e:#}");
        }
    }

    /// The job's identity triple.
    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }

    /// Shared bus handle, for composing components (listeners, planner).
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    // ── Internal ──────────────────────────────────────────────

    fn declare_settable_properties(&self) -> Result<()> {
        let names: Vec<String> = {
            let settings = self.lock_settings();
            settings.names().map(str::to_string).collect()
        };
        let mut properties: Vec<String> = names.clone();
        properties.push("state".to_string());

        self.bus.publish(
            &self.identity.job_topic("$properties"),
            &properties.join(","),
            QoS::AtLeastOnce,
            true,
        )?;
        for name in &properties {
            self.bus.publish(
                &self.identity.job_topic(&format!("{name}/$settable")),
                "true",
                QoS::AtLeastOnce,
                true,
            )?;
        }
        // Seed the retained value topics so observers see initial values.
        for name in &names {
            self.publish_setting(name)?;
        }
        Ok(())
    }

    /// Incoming `…/{attr}/set` handler, running on the bus dispatch context.
    fn handle_set(&self, topic: &str, payload: &str) {
        let segments: Vec<&str> = topic.split('/').collect();
        // root/unit/experiment/job/attr/set
        let Some(attr) = (segments.len() == 6).then(|| segments[4]) else {
            warn!("[{}] malformed set topic: {topic}", self.identity.job_name);
            return;
        };

        if attr == "$state" {
            self.handle_state_set(payload);
            return;
        }

        let updated = self.lock_settings().update_from_text(attr, payload);
        match updated {
            // Not one of ours: broadcast commands routinely target
            // attributes other jobs own. Deliberately not an error.
            None => {}
            Some((old, new)) => self.after_mutation(attr, &old, &new),
        }
    }

    fn handle_state_set(&self, payload: &str) {
        let outcome = match LifecycleState::from_name(payload) {
            Some(
                next @ (LifecycleState::Ready
                | LifecycleState::Sleeping
                | LifecycleState::Disconnected),
            ) => self.transition(next),
            // Init is construction-only; Lost is asserted via last will.
            Some(other) => Err(Error::InvalidState(format!(
                "{other} cannot be requested over the bus"
            ))),
            None => Err(Error::InvalidState(payload.to_string())),
        };
        if let Err(e) = outcome {
            self.publish_error_log(&format!(
                "[{}] state change rejected: {e}",
                self.identity.job_name
            ));
        }
    }

    /// The single observation point: every successful mutation republishes
    /// the value retained, logs old → new, and notifies the hook.
    fn after_mutation(&self, name: &str, old: &SettingValue, new: &SettingValue) {
        if let Err(e) = self.publish_setting(name) {
            warn!("[{}] republish of {name} failed: {e}", self.identity.job_name);
        }
        self.publish_log(&format!(
            "[{}] Updated {name} from {old} to {new}.",
            self.identity.job_name
        ));
        if let Some(hook) = self.lock_hook().as_ref() {
            hook(name, new);
        }
    }

    fn publish_setting(&self, name: &str) -> Result<()> {
        let value = self
            .lock_settings()
            .get(name)
            .map(ToString::to_string)
            .ok_or(Error::Config("setting not declared"))?;
        self.bus.publish(
            &self.identity.job_topic(name),
            &value,
            QoS::ExactlyOnce,
            true,
        )?;
        Ok(())
    }

    fn publish_state(&self, state: LifecycleState) -> Result<()> {
        self.bus.publish(
            &self.identity.job_topic("$state"),
            state.name(),
            QoS::ExactlyOnce,
            true,
        )?;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().expect("lifecycle state poisoned")
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, SettingsRegistry> {
        self.settings.lock().expect("settings registry poisoned")
    }

    fn lock_hook(&self) -> std::sync::MutexGuard<'_, Option<SettingHook>> {
        self.hook.lock().expect("setting hook poisoned")
    }
}
