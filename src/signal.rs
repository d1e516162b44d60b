use serde::{Deserialize, Serialize};

/// Signal kinds that can be raised against a tracked process.
///
/// The raw numbers follow the POSIX convention the emulation approximates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// No-op liveness probe: checks whether the process is still running
    /// without affecting it.
    Probe = 0,
    /// Hang-up. Accepted but currently has no effect.
    Hangup = 1,
    /// Simulated console interrupt, delivered through the relay's console
    /// group and acknowledged by the relay.
    Interrupt = 2,
    /// Forceful termination request.
    Kill = 9,
    /// Termination request.
    Terminate = 15,
}

impl Signal {
    /// Maps a raw signal number to a kind. Unknown numbers yield `None`;
    /// [`Spawner::raise_raw`](crate::Spawner::raise_raw) treats them as a
    /// no-op.
    pub fn from_raw(raw: i32) -> Option<Signal> {
        match raw {
            0 => Some(Signal::Probe),
            1 => Some(Signal::Hangup),
            2 => Some(Signal::Interrupt),
            9 => Some(Signal::Kill),
            15 => Some(Signal::Terminate),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}
