//! Library defaults for `ModuleConfig`

use rdtmon_core::RmidAllocPolicy;

pub const RMID_ALLOC_POLICY: RmidAllocPolicy = RmidAllocPolicy::Fifo;

/// Expose energy instead of occupancy/bandwidth counters
pub const USE_RAPL_COUNTERS: bool = false;

/// Account energy only while the thread is on a cpu
pub const RESET_ON_CSWITCH: bool = false;

/// Give unconfigured threads the EBS counter configuration
pub const FORCE_EBS_COUNTERS: bool = false;

/// Counter set applied by `force_ebs_counters`
pub const EBS_COUNTER_CONFIG: &str = "pmc0,ebs0,pmc1";

/// Report per-sample energy deltas rather than totals since thread start
pub const ENERGY_REPORT_CUMULATIVE: bool = false;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// MSR_*_ENERGY_STATUS counters are 32 bits wide
        pub const ENERGY_COUNTER_BITS: u32 = 32;
    } else {
        pub const ENERGY_COUNTER_BITS: u32 = 64;
    }
}
