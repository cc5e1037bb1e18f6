//! Tracker lifecycle states.

use std::fmt;

/// Lifecycle of a change tracker.
///
/// ```text
/// Idle --start--> Running --stop--> Stopping --worker exits--> Stopped
///   \                 \________________(fatal error / one-shot done)____/^
///    \--stop--------------------------------------------------------> Stopped
/// ```
///
/// `Stopped` is terminal; a stopped tracker cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerState {
    /// Constructed, not yet started.
    Idle,
    /// The worker is following the feed.
    Running,
    /// Stop was requested; the worker is unwinding.
    Stopping,
    /// Terminated. The client has been notified.
    Stopped,
}

impl TrackerState {
    /// Returns true while a worker may still be running.
    pub fn is_active(&self) -> bool {
        matches!(self, TrackerState::Running | TrackerState::Stopping)
    }

    /// Returns true once the tracker has terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackerState::Stopped)
    }

    /// Returns true if `start` may move the tracker to `Running`.
    pub fn can_start(&self) -> bool {
        matches!(self, TrackerState::Idle)
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerState::Idle => "idle",
            TrackerState::Running => "running",
            TrackerState::Stopping => "stopping",
            TrackerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
