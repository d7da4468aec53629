//! Provider availability state machine.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Provider status. Numeric values are the bus encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Error = 0,
    Unavailable = 1,
    Acquiring = 2,
    Available = 3,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// What the owner must do with the fix-lost timer after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixTimer {
    Keep,
    Arm,
    Disarm,
}

/// Result of feeding one input to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// New status when it changed; the owner broadcasts it.
    pub changed: Option<Status>,
    pub fix_timer: FixTimer,
}

impl Transition {
    fn new(changed: Option<Status>, fix_timer: FixTimer) -> Self {
        Self { changed, fix_timer }
    }
}

/// Error is terminal: once entered (engine initialisation failed) no input
/// moves the machine again.
#[derive(Debug, Clone)]
pub struct StatusMachine {
    status: Status,
}

impl StatusMachine {
    pub fn new(engine_ready: bool) -> Self {
        Self {
            status: if engine_ready {
                Status::Unavailable
            } else {
                Status::Error
            },
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn set(&mut self, status: Status) -> Option<Status> {
        if self.status == Status::Error || self.status == status {
            return None;
        }
        info!(from = ?self.status, to = ?status, "Status changed");
        self.status = status;
        Some(status)
    }

    /// Engine reported it powered on.
    pub fn engine_on(&mut self) -> Transition {
        let changed = if self.status != Status::Available {
            self.set(Status::Acquiring)
        } else {
            None
        };
        Transition::new(changed, FixTimer::Arm)
    }

    /// Engine reported it powered off. Status is left alone so that an
    /// upstream arbitrator does not switch providers while the engine is only
    /// duty cycling.
    pub fn engine_off(&mut self) -> Transition {
        Transition::new(None, FixTimer::Disarm)
    }

    /// A location arrived; only non-zero timestamps count as fixes.
    pub fn fix_received(&mut self, timestamp_ms: i64) -> Transition {
        if timestamp_ms == 0 {
            return Transition::new(None, FixTimer::Keep);
        }
        Transition::new(self.set(Status::Available), FixTimer::Arm)
    }

    pub fn fix_lost(&mut self) -> Transition {
        Transition::new(self.set(Status::Acquiring), FixTimer::Keep)
    }

    /// The session was stopped by the provider.
    pub fn stopped(&mut self) -> Transition {
        Transition::new(self.set(Status::Unavailable), FixTimer::Disarm)
    }
}
