//! Deadline table for the coordination loop.
//!
//! Timers are one-shot; the owner re-arms a timer from its expiry handler when
//! it needs periodic behaviour.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Timers owned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Quit the daemon after a period with no consumers.
    Idle,
    /// Revert Available to Acquiring when fixes stop arriving.
    FixLost,
    /// Move on to the next NTP server.
    NtpRetry,
    /// Check the location settings file for changes.
    SettingsPoll,
}

#[derive(Debug, Default)]
pub struct Timers {
    deadlines: HashMap<TimerId, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `id` to fire `after` from now.
    pub fn start(&mut self, id: TimerId, after: Duration) {
        self.deadlines.insert(id, Instant::now() + after);
    }

    pub fn stop(&mut self, id: TimerId) {
        self.deadlines.remove(&id);
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Disarm and return every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut expired: Vec<(Instant, TimerId)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        expired.sort_by_key(|(deadline, _)| *deadline);
        for (_, id) in &expired {
            self.deadlines.remove(id);
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_replaces_deadline() {
        let mut timers = Timers::new();
        timers.start(TimerId::FixLost, Duration::from_secs(60));
        timers.start(TimerId::FixLost, Duration::from_secs(1));
        assert!(timers.next_deadline().unwrap() <= Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_take_expired_disarms() {
        let mut timers = Timers::new();
        timers.start(TimerId::Idle, Duration::ZERO);
        timers.start(TimerId::NtpRetry, Duration::from_secs(600));
        let expired = timers.take_expired(Instant::now());
        assert_eq!(expired, vec![TimerId::Idle]);
        assert!(!timers.is_active(TimerId::Idle));
        assert!(timers.is_active(TimerId::NtpRetry));
    }
}
