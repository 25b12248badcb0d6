//! Error types for rdtmon

use core::fmt;

/// Result type for monitoring operations
pub type MonResult<T> = Result<T, MonError>;

/// Errors that can occur in monitoring operations
///
/// None of these is fatal to the host: the worst outcome of any of them
/// is that a thread runs unmonitored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonError {
    /// No free RMID in the pool
    Exhausted,

    /// RMID outside the pool range
    InvalidRmid(u32),

    /// Operation not valid for the current state (e.g. retain of a free id)
    InvalidState,

    /// Class id or value beyond what the hardware reports
    OutOfRange,

    /// Feature not reported by the hardware (e.g. bandwidth throttling)
    Unsupported,

    /// Calling thread has no monitoring record
    NoRecord,

    /// Per-thread record storage could not be allocated
    OutOfMemory,

    /// Configuration line or counter configuration could not be parsed
    InvalidConfig(String),

    /// Hardware access layer failure
    Hardware(HwError),
}

impl fmt::Display for MonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonError::Exhausted => write!(f, "RMID pool exhausted"),
            MonError::InvalidRmid(id) => write!(f, "invalid RMID {}", id),
            MonError::InvalidState => write!(f, "invalid state for operation"),
            MonError::OutOfRange => write!(f, "value out of range"),
            MonError::Unsupported => write!(f, "not supported by hardware"),
            MonError::NoRecord => write!(f, "thread has no monitoring record"),
            MonError::OutOfMemory => write!(f, "out of memory"),
            MonError::InvalidConfig(s) => write!(f, "invalid configuration: {}", s),
            MonError::Hardware(e) => write!(f, "hardware error: {}", e),
        }
    }
}

impl std::error::Error for MonError {}

/// Failures reported by the hardware access layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    /// Subsystem is absent on this machine
    NotPresent,

    /// Subsystem initialization failed
    InitFailed(String),

    /// Register write rejected (e.g. non-contiguous bitmask)
    Rejected,

    /// Raw platform error code
    Platform(i32),
}

impl fmt::Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwError::NotPresent => write!(f, "subsystem not present"),
            HwError::InitFailed(s) => write!(f, "initialization failed: {}", s),
            HwError::Rejected => write!(f, "register write rejected"),
            HwError::Platform(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl From<HwError> for MonError {
    fn from(e: HwError) -> Self {
        MonError::Hardware(e)
    }
}

impl From<std::collections::TryReserveError> for MonError {
    fn from(_: std::collections::TryReserveError) -> Self {
        MonError::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(MonError::Exhausted.to_string(), "RMID pool exhausted");

        let e = MonError::Hardware(HwError::InitFailed("cmt".into()));
        assert_eq!(e.to_string(), "hardware error: initialization failed: cmt");
    }

    #[test]
    fn test_error_conversion() {
        let e: MonError = HwError::Rejected.into();
        assert!(matches!(e, MonError::Hardware(HwError::Rejected)));

        let mut v: Vec<u64> = Vec::new();
        let e: MonError = v.try_reserve(usize::MAX).unwrap_err().into();
        assert_eq!(e, MonError::OutOfMemory);
    }
}
