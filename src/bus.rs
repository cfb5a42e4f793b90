//! In-process loopback bus.
//!
//! [`InMemoryBus`] implements [`MessageBus`] with synchronous dispatch:
//! `publish` invokes every matching subscriber on the caller's thread
//! before returning. It backs single-process deployments (all jobs in one
//! supervisor) and every test in this crate. Semantics mirror what the
//! core relies on from a real broker: retained-message redelivery,
//! `+` single-level wildcards, and a last will delivered on abrupt death.

use std::sync::Mutex;

use log::debug;

use crate::ports::{LastWill, MessageBus, QoS, Subscriber};

/// `true` if `topic` matches `pattern`, where `+` in the pattern matches
/// exactly one `/`-separated level.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pat = pattern.split('/');
    let mut top = topic.split('/');
    loop {
        match (pat.next(), top.next()) {
            (None, None) => return true,
            (Some(p), Some(t)) => {
                if p != "+" && p != t {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<(String, Subscriber)>,
    retained: Vec<(String, String)>,
    will: Option<LastWill>,
    connected: bool,
}

/// Synchronous loopback implementation of [`MessageBus`].
pub struct InMemoryBus {
    inner: Mutex<BusInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                connected: true,
                ..BusInner::default()
            }),
        }
    }

    /// Simulate ungraceful death of the client: the registered last will
    /// (if any) is published on its behalf, exactly as a broker would.
    pub fn drop_abruptly(&self) -> anyhow::Result<()> {
        let will = {
            let mut inner = self.lock();
            inner.connected = false;
            inner.will.take()
        };
        if let Some(w) = will {
            // The broker speaks for the dead client here, so this bypasses
            // the connected check publish() performs.
            self.dispatch(&w.topic, &w.payload, w.retain);
        }
        Ok(())
    }

    fn dispatch(&self, topic: &str, payload: &str, retain: bool) {
        let targets: Vec<Subscriber> = {
            let mut inner = self.lock();
            if retain {
                inner.retained.retain(|(t, _)| t != topic);
                inner.retained.push((topic.to_string(), payload.to_string()));
            }
            inner
                .subscribers
                .iter()
                .filter(|(pattern, _)| topic_matches(pattern, topic))
                .map(|(_, cb)| cb.clone())
                .collect()
        };
        for cb in targets {
            cb(topic, payload);
        }
    }

    /// The retained payload currently stored for `topic`, if any.
    pub fn retained(&self, topic: &str) -> Option<String> {
        let inner = self.lock();
        inner
            .retained
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        // Subscriber callbacks are never invoked while the lock is held,
        // so the only way to poison it is a panic inside the bus itself.
        self.inner.lock().expect("bus state poisoned")
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, topic: &str, payload: &str, _qos: QoS, retain: bool) -> anyhow::Result<()> {
        debug!("bus publish {topic} <- {payload}");
        if !self.lock().connected {
            anyhow::bail!("bus is disconnected");
        }
        // Dispatch happens with the lock released: the attribute-sync
        // protocol republishes from inside subscriber callbacks.
        self.dispatch(topic, payload, retain);
        Ok(())
    }

    fn subscribe(&self, pattern: &str, _qos: QoS, callback: Subscriber) -> anyhow::Result<()> {
        let replay: Vec<(String, String)> = {
            let mut inner = self.lock();
            inner
                .subscribers
                .push((pattern.to_string(), callback.clone()));
            inner
                .retained
                .iter()
                .filter(|(t, _)| topic_matches(pattern, t))
                .cloned()
                .collect()
        };
        for (topic, payload) in replay {
            callback(&topic, &payload);
        }
        Ok(())
    }

    fn set_last_will(&self, will: LastWill) -> anyhow::Result<()> {
        self.lock().will = Some(will);
        Ok(())
    }

    fn disconnect(&self) -> anyhow::Result<()> {
        let mut inner = self.lock();
        inner.connected = false;
        // Graceful close: the broker discards the will.
        inner.will = None;
        Ok(())
    }
}
