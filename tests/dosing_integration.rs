//! Integration tests: bus → controller → policy → planner → pumps.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use vialctl::actuation::ActuationRequest;
use vialctl::bus::InMemoryBus;
use vialctl::config::AlgorithmConfig;
use vialctl::controller::DosingController;
use vialctl::dosing::DosingMode;
use vialctl::events::DosingEvent;
use vialctl::ports::{Dose, MessageBus, PumpInterface, QoS};
use vialctl::protocol::lifecycle::LifecycleState;
use vialctl::protocol::JobIdentity;
use vialctl::ActuatorError;

// ── Mock implementations ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum PumpCall {
    AltMedia(Dose),
    Media(Dose),
    Waste(Dose),
}

/// Pump whose call log outlives the controller that owns it.
#[derive(Clone, Default)]
struct SharedPump {
    calls: Arc<Mutex<Vec<PumpCall>>>,
    fail: Arc<Mutex<bool>>,
}

impl SharedPump {
    fn calls(&self) -> Vec<PumpCall> {
        self.calls.lock().unwrap().clone()
    }

    fn dosed_media_ml(&self) -> f64 {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                PumpCall::Media(Dose::Volume(ml)) => Some(*ml),
                _ => None,
            })
            .sum()
    }

    fn dosed_alt_media_ml(&self) -> f64 {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                PumpCall::AltMedia(Dose::Volume(ml)) => Some(*ml),
                _ => None,
            })
            .sum()
    }
}

impl PumpInterface for SharedPump {
    fn dose_media(&mut self, dose: Dose) -> Result<(), ActuatorError> {
        if *self.fail.lock().unwrap() {
            return Err(ActuatorError::PumpFailed);
        }
        self.calls.lock().unwrap().push(PumpCall::Media(dose));
        Ok(())
    }

    fn dose_alt_media(&mut self, dose: Dose) -> Result<(), ActuatorError> {
        self.calls.lock().unwrap().push(PumpCall::AltMedia(dose));
        Ok(())
    }

    fn remove_waste(&mut self, dose: Dose) -> Result<(), ActuatorError> {
        self.calls.lock().unwrap().push(PumpCall::Waste(dose));
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────

struct Harness {
    bus: Arc<InMemoryBus>,
    controller: DosingController<InMemoryBus, SharedPump>,
    pump: SharedPump,
    stop: AtomicBool,
}

impl Harness {
    fn start(mode: DosingMode, config: AlgorithmConfig) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let pump = SharedPump::default();
        let controller = DosingController::start(
            bus.clone(),
            JobIdentity::new("unit1", "trial4", "dosing_control"),
            mode,
            config.without_pauses(),
            pump.clone(),
        )
        .expect("controller starts");
        Self {
            bus,
            controller,
            pump,
            stop: AtomicBool::new(false),
        }
    }

    fn feed(&self, od: f64, growth_rate: f64) {
        self.bus
            .publish(
                "bioreactor/unit1/trial4/growth_rate",
                &growth_rate.to_string(),
                QoS::AtMostOnce,
                false,
            )
            .unwrap();
        self.bus
            .publish(
                "bioreactor/unit1/trial4/od_filtered/135/A",
                &od.to_string(),
                QoS::AtMostOnce,
                false,
            )
            .unwrap();
    }

    fn tick(&mut self) -> DosingEvent {
        self.controller.run_tick(&self.stop).expect("tick succeeds")
    }

    /// Collects every payload published to `topic` from now on.
    fn collect(&self, topic: &str) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.bus
            .subscribe(
                topic,
                QoS::AtLeastOnce,
                Arc::new(move |_, payload| {
                    sink.lock().unwrap().push(payload.to_string());
                }),
            )
            .unwrap();
        seen
    }
}

fn turbidostat_config() -> AlgorithmConfig {
    AlgorithmConfig {
        target_od: Some(1.0),
        volume: Some(0.25),
        ..AlgorithmConfig::default()
    }
}

// ── Threshold turbidostat ─────────────────────────────────────

#[test]
fn turbidostat_doses_only_at_or_above_target() {
    let mut h = Harness::start(DosingMode::Turbidostat, turbidostat_config());

    let walk = [
        (0.98, false),
        (1.00, true),
        (1.01, true),
        (0.99, false),
    ];
    for (od, doses) in walk {
        h.feed(od, 0.01);
        let event = h.tick();
        assert_eq!(
            matches!(event, DosingEvent::Dilution { .. }),
            doses,
            "od={od}"
        );
    }
    // two dilutions of the configured 0.25 mL
    assert!((h.pump.dosed_media_ml() - 0.5).abs() < 1e-9);
    assert_eq!(h.pump.dosed_alt_media_ml(), 0.0);
}

#[test]
fn turbidostat_follows_a_remotely_lowered_target() {
    let mut h = Harness::start(DosingMode::Turbidostat, turbidostat_config());

    h.feed(0.90, 0.01);
    assert!(matches!(h.tick(), DosingEvent::NoEvent { .. }));

    h.bus
        .publish(
            "bioreactor/unit1/trial4/dosing_control/target_od/set",
            "0.85",
            QoS::ExactlyOnce,
            false,
        )
        .unwrap();

    h.feed(0.90, 0.01);
    assert!(matches!(h.tick(), DosingEvent::Dilution { .. }));
}

// ── Classic morbidostat ───────────────────────────────────────

#[test]
fn morbidostat_alternates_with_the_density_trend() {
    let mut h = Harness::start(DosingMode::Morbidostat, turbidostat_config());

    let walk: [(f64, &str); 6] = [
        (0.95, "none"),      // first sample, no trend yet
        (0.99, "dilution"),  // below target
        (1.05, "alt_media"), // above target and rising
        (1.03, "dilution"),  // falling
        (1.04, "alt_media"), // rising again
        (0.99, "dilution"),  // back below target
    ];
    for (od, expected) in walk {
        h.feed(od, 0.01);
        let kind = match h.tick() {
            DosingEvent::NoEvent { .. } => "none",
            DosingEvent::Dilution { .. } => "dilution",
            DosingEvent::AltMedia { .. } => "alt_media",
        };
        assert_eq!(kind, expected, "od={od}");
    }
    assert!((h.pump.dosed_media_ml() - 3.0 * 0.25).abs() < 1e-9);
    assert!((h.pump.dosed_alt_media_ml() - 2.0 * 0.25).abs() < 1e-9);
}

// ── PID turbidostat ───────────────────────────────────────────

#[test]
fn pid_turbidostat_dilutes_through_the_approach_band() {
    let mut h = Harness::start(DosingMode::PidTurbidostat, turbidostat_config());

    h.feed(0.20, 0.01);
    assert!(matches!(h.tick(), DosingEvent::NoEvent { .. }));

    for od in [0.81, 0.88, 0.95, 0.99] {
        h.feed(od, 0.01);
        match h.tick() {
            DosingEvent::Dilution {
                media_ml,
                pid_output: Some(output),
                ..
            } => {
                assert!(output > 0.0 && output <= 1.0, "od={od}");
                assert!(media_ml <= 0.25 + 1e-12);
            }
            other => panic!("expected dilution at od={od}, got {other:?}"),
        }
    }
}

#[test]
fn pid_turbidostat_tracks_a_remotely_raised_target() {
    let mut h = Harness::start(DosingMode::PidTurbidostat, turbidostat_config());

    // 0.80 sits just above the 0.75 floor for target 1.0...
    h.feed(0.80, 0.01);
    assert!(matches!(h.tick(), DosingEvent::Dilution { .. }));

    // ...but below the floor once the target moves to 1.2 (floor 0.90).
    h.bus
        .publish(
            "bioreactor/unit1/trial4/dosing_control/target_od/set",
            "1.2",
            QoS::ExactlyOnce,
            false,
        )
        .unwrap();
    h.feed(0.80, 0.01);
    assert!(matches!(h.tick(), DosingEvent::NoEvent { .. }));
}

// ── PID morbidostat ───────────────────────────────────────────

#[test]
fn pid_morbidostat_doses_alt_media_once_dense_enough() {
    let config = AlgorithmConfig {
        target_od: Some(1.0),
        target_growth_rate: Some(0.09),
        ..AlgorithmConfig::default()
    };
    let mut h = Harness::start(DosingMode::PidMorbidostat, config);

    h.feed(0.50, 0.08);
    assert!(matches!(h.tick(), DosingEvent::NoEvent { .. }));

    for growth_rate in [0.08, 0.07, 0.065] {
        h.feed(0.95, growth_rate);
        match h.tick() {
            DosingEvent::AltMedia {
                alt_media_ml,
                media_ml,
                waste_ml,
                ..
            } => {
                assert!(alt_media_ml > 0.0, "gr={growth_rate}");
                assert!((alt_media_ml + media_ml - waste_ml).abs() < 1e-9);
            }
            other => panic!("expected alt-media event at gr={growth_rate}, got {other:?}"),
        }
    }
    assert!(h.pump.dosed_alt_media_ml() > 0.0);
}

// ── Actuation batching over the bus ───────────────────────────

#[test]
fn oversized_actions_are_batched_and_reported() {
    let mut h = Harness::start(
        DosingMode::Turbidostat,
        AlgorithmConfig {
            target_od: Some(1.0),
            volume: Some(0.65),
            ..AlgorithmConfig::default()
        },
    );
    let records = h.collect("bioreactor/unit1/trial4/io_batched");

    h.feed(1.05, 0.01);
    assert!(matches!(h.tick(), DosingEvent::Dilution { .. }));

    let records: Vec<ActuationRequest> = records
        .lock()
        .unwrap()
        .iter()
        .map(|payload| serde_json::from_str(payload).unwrap())
        .collect();
    assert!(records.len() >= 2, "0.65 mL must split into capped steps");
    let media_total: f64 = records.iter().map(|r| r.media_ml).sum();
    let waste_total: f64 = records.iter().map(|r| r.waste_ml).sum();
    assert!((media_total - 0.65).abs() < 1e-9);
    assert!((waste_total - 0.65).abs() < 1e-9);
    for record in &records {
        assert!(record.media_ml <= 0.3 + 1e-12);
        assert!(record.conserves_volume());
    }
    assert!((h.pump.dosed_media_ml() - 0.65).abs() < 1e-9);
}

// ── Lifecycle and failure paths ───────────────────────────────

#[test]
fn sleeping_job_holds_its_pumps() {
    let mut h = Harness::start(DosingMode::Turbidostat, turbidostat_config());
    h.feed(5.0, 0.01);

    h.bus
        .publish(
            "bioreactor/unit1/trial4/dosing_control/$state/set",
            "sleeping",
            QoS::ExactlyOnce,
            false,
        )
        .unwrap();
    assert!(matches!(h.tick(), DosingEvent::NoEvent { .. }));
    assert!(h.pump.calls().is_empty());

    h.bus
        .publish(
            "bioreactor/unit1/trial4/dosing_control/$state/set",
            "ready",
            QoS::ExactlyOnce,
            false,
        )
        .unwrap();
    assert!(matches!(h.tick(), DosingEvent::Dilution { .. }));
    assert!(!h.pump.calls().is_empty());
}

#[test]
fn pump_failure_ends_the_run_and_death_announces_lost() {
    let mut h = Harness::start(DosingMode::Turbidostat, turbidostat_config());
    let errors = h.collect("bioreactor/unit1/trial4/error_log");

    h.feed(1.05, 0.01);
    *h.pump.fail.lock().unwrap() = true;

    let mut events = Vec::new();
    let outcome = h.controller.run(&h.stop, |e| events.push(e.clone()));
    assert!(outcome.is_err());
    assert!(events.is_empty());
    {
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("failed with"));
    }

    // No graceful close happened, so when the process dies the broker
    // delivers the registered last will.
    h.bus.drop_abruptly().unwrap();
    assert_eq!(
        h.bus
            .retained("bioreactor/unit1/trial4/dosing_control/$state")
            .as_deref(),
        Some("lost")
    );
}

#[test]
fn stop_flag_ends_the_run_gracefully() {
    let mut h = Harness::start(DosingMode::Silent, AlgorithmConfig::default());
    h.stop.store(true, std::sync::atomic::Ordering::SeqCst);
    h.controller.run(&h.stop, |_| {}).unwrap();
    assert_eq!(h.controller.core().state(), LifecycleState::Disconnected);
    assert_eq!(
        h.bus
            .retained("bioreactor/unit1/trial4/dosing_control/$state")
            .as_deref(),
        Some("disconnected")
    );
}

#[test]
fn broadcast_set_reaches_the_job() {
    let mut h = Harness::start(DosingMode::Turbidostat, turbidostat_config());
    h.bus
        .publish(
            "bioreactor/$broadcast/trial4/dosing_control/volume/set",
            "0.1",
            QoS::ExactlyOnce,
            false,
        )
        .unwrap();
    assert_eq!(h.controller.core().setting_f64("volume"), Some(0.1));

    h.feed(1.05, 0.01);
    match h.tick() {
        DosingEvent::Dilution { media_ml, .. } => assert!((media_ml - 0.1).abs() < 1e-12),
        other => panic!("expected dilution, got {other:?}"),
    }
}
