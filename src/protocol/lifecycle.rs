//! Job lifecycle states.
//!
//! Every job walks the same device lifecycle:
//!
//! ```text
//!   Init ──▶ Ready ◀──▶ Sleeping
//!              │
//!              ▼
//!         Disconnected        (graceful shutdown, terminal)
//!
//!         Lost                (asserted externally via last will)
//! ```
//!
//! Transitions are always explicit. Anything built on top of the protocol
//! must check [`LifecycleState::allows_actuation`] before acting; every
//! non-Ready state disables actuation.

/// Operating state of a job, published retained under `$state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Entry state during construction.
    Init = 0,
    /// Steady operating state.
    Ready = 1,
    /// Paused but resumable without reconstruction.
    Sleeping = 2,
    /// Gracefully shut down; detached from the bus. Terminal.
    Disconnected = 3,
    /// Died without a graceful close. Only ever asserted externally,
    /// through the registered last will.
    Lost = 4,
}

impl LifecycleState {
    /// Wire name used on the bus (lowercase).
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Sleeping => "sleeping",
            Self::Disconnected => "disconnected",
            Self::Lost => "lost",
        }
    }

    /// Parse a wire name, e.g. from a `$state/set` payload.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "init" => Some(Self::Init),
            "ready" => Some(Self::Ready),
            "sleeping" => Some(Self::Sleeping),
            "disconnected" => Some(Self::Disconnected),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    /// Only a Ready job may drive its actuators.
    pub fn allows_actuation(self) -> bool {
        self == Self::Ready
    }

    /// Disconnected is terminal: no transition may leave it.
    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [LifecycleState; 5] = [
        LifecycleState::Init,
        LifecycleState::Ready,
        LifecycleState::Sleeping,
        LifecycleState::Disconnected,
        LifecycleState::Lost,
    ];

    #[test]
    fn wire_names_roundtrip() {
        for s in ALL {
            assert_eq!(LifecycleState::from_name(s.name()), Some(s));
        }
        assert_eq!(LifecycleState::from_name("paused"), None);
    }

    #[test]
    fn only_ready_allows_actuation() {
        for s in ALL {
            assert_eq!(s.allows_actuation(), s == LifecycleState::Ready);
        }
    }

    #[test]
    fn disconnected_is_the_only_terminal_state() {
        for s in ALL {
            assert_eq!(s.is_terminal(), s == LifecycleState::Disconnected);
        }
    }
}
