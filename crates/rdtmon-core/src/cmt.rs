//! Cache monitoring (CMT/MBM) event definitions

/// Number of occupancy/bandwidth events read per RMID
pub const CMT_MAX_EVENTS: usize = 3;

/// Events in virtual counter order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmtEvent {
    /// Last-level cache occupancy in bytes
    LlcOccupancy = 0,
    /// Total memory bandwidth (cumulative bytes)
    TotalBw = 1,
    /// Local memory bandwidth (cumulative bytes)
    LocalBw = 2,
}

impl CmtEvent {
    pub const ALL: [CmtEvent; CMT_MAX_EVENTS] =
        [CmtEvent::LlcOccupancy, CmtEvent::TotalBw, CmtEvent::LocalBw];

    #[inline]
    pub const fn as_index(&self) -> usize {
        *self as usize
    }

    /// Virtual counter name exposed to the sampling framework
    pub const fn counter_name(&self) -> &'static str {
        match self {
            CmtEvent::LlcOccupancy => "llc_usage",
            CmtEvent::TotalBw => "total_llc_bw",
            CmtEvent::LocalBw => "local_llc_bw",
        }
    }
}

/// Monitoring capabilities reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmtSupport {
    /// Size of the RMID space
    pub max_rmids: u32,

    /// Number of cache domains counters are kept for
    pub nr_locations: u32,
}

/// Event values for one RMID on one location
pub type CmtReading = [u64; CMT_MAX_EVENTS];
