//! Monitoring record lifecycle state

use core::fmt;

/// State of a thread's monitoring record
///
/// ```text
/// Created ──switch-in──▶ Assigned ──exit──▶ Exited ──free──▶ Freed
///    │                      ▲
///    └─switch-in (no id)─▶ RunningUnassigned
/// ```
///
/// A thread-clone of a profiled parent skips straight to `Assigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordState {
    /// Created at fork, no RMID bound yet
    Created = 0,

    /// Scheduled at least once but acquisition failed (pool exhausted
    /// or stale epoch); retried on every switch-in
    RunningUnassigned = 1,

    /// RMID bound; the thread may be running or descheduled
    Assigned = 2,

    /// RMID released, record waiting for the free-task event
    Exited = 3,

    /// Record reclaimed
    Freed = 4,
}

impl RecordState {
    /// Still waiting for an RMID (lazy allocation pending)
    #[inline]
    pub const fn is_unassigned(&self) -> bool {
        matches!(self, RecordState::Created | RecordState::RunningUnassigned)
    }

    #[inline]
    pub const fn is_assigned(&self) -> bool {
        matches!(self, RecordState::Assigned)
    }

    /// Past exit; no further hardware programming allowed
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, RecordState::Exited | RecordState::Freed)
    }
}

impl From<u8> for RecordState {
    fn from(v: u8) -> Self {
        match v {
            0 => RecordState::Created,
            1 => RecordState::RunningUnassigned,
            2 => RecordState::Assigned,
            3 => RecordState::Exited,
            4 => RecordState::Freed,
            _ => RecordState::Created,
        }
    }
}

impl From<RecordState> for u8 {
    fn from(state: RecordState) -> u8 {
        state as u8
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Created => write!(f, "CREATED"),
            RecordState::RunningUnassigned => write!(f, "RUNNING-UNASSIGNED"),
            RecordState::Assigned => write!(f, "ASSIGNED"),
            RecordState::Exited => write!(f, "EXITED"),
            RecordState::Freed => write!(f, "FREED"),
        }
    }
}

/// Module-wide energy accounting mode
///
/// Chosen once when the module is configured; applies to every thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountingMode {
    /// Accumulate continuously from fork, whether or not the thread runs
    #[default]
    Continuous,

    /// Accumulate only while the thread is on a cpu
    ResetOnSwitch,
}

impl AccountingMode {
    #[inline]
    pub const fn resets_on_switch(&self) -> bool {
        matches!(self, AccountingMode::ResetOnSwitch)
    }
}
