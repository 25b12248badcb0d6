//! # rdtmon - RDT monitoring ID lifecycle manager
//!
//! Multiplexes a small, hardware-limited space of Resource Monitoring IDs
//! (RMIDs) over an unbounded number of threads, and keeps per-thread
//! energy accounts on top of shared package energy counters.
//!
//! ## Features
//!
//! - **Lazy assignment**: a thread gets an RMID at its first switch-in
//! - **Shared by clones**: threads of one process share a reference-counted id
//! - **Soft exhaustion**: without a free id a thread runs unmonitored and retries
//! - **Lock-free pool**: atomic refcounts, atomic free bitmap, lock-free FIFO
//! - **Wrap-safe energy**: per-thread deltas never go negative
//! - **Text configuration**: policy, CAT bitmasks, MBA delays, EDP control
//!
//! ## Quick Start
//!
//! ```ignore
//! use rdtmon::{
//!     CloneFlags, CpuId, ModuleConfig, MonitoringHooks, ProfilingContext, RdtModule,
//!     SimConfig, SimHardware,
//! };
//!
//! let sim = SimHardware::new(SimConfig::default());
//! let module = RdtModule::enable(sim.hardware(), ModuleConfig::from_env())?;
//!
//! let mut prof = ProfilingContext::new(0b111);
//! module.on_fork(CloneFlags::PROCESS, None, &mut prof)?;
//! module.on_switch_in(&mut prof, CpuId(0));
//! print!("{}", module.read_config());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Host scheduler                            │
//! │   fork, switch-in/out, sample, exit, free, config r/w       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  MonitoringHooks
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RdtModule                              │
//! │      ThreadRecord in each thread's ProfilingContext         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌─────────────┐     ┌───────────┐
//!    │ RmidPool  │      │ CosRegistry │     │    EDP    │
//!    └───────────┘      └─────────────┘     └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │     CmtBackend / CatBackend / MbaBackend / EnergyReader │
//!    └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

// Re-export core types
pub use rdtmon_core::{
    AccountingMode,
    CloneFlags,
    CmtEvent,
    CosId,
    CounterConfig,
    CounterUsage,
    CpuId,
    DomainMask,
    EnergyDomain,
    Hardware,
    HwError,
    LocationId,
    MonError,
    MonResult,
    MonitoringHooks,
    PmcSample,
    ProfilingContext,
    ProfilingMode,
    RecordState,
    Rmid,
    RmidAllocPolicy,
    RmidPool,
    SampleFlags,
    ThreadRecord,
};

// Re-export backend traits
pub use rdtmon_core::{CatBackend, CmtBackend, EnergyReader, MbaBackend};

// Re-export kprint macros
pub use rdtmon_core::{kerror, kwarn, kinfo, kdebug, ktrace};
pub use rdtmon_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use rdtmon_core::env::{env_get, env_get_bool, env_get_opt};

// Re-export module types
pub use rdtmon_module::{
    ConfigCommand,
    EdpTotals,
    EnergyReport,
    ModuleConfig,
    RdtModule,
    SimConfig,
    SimHardware,
    SimSubsystem,
};

/// Enable a module on simulated hardware
///
/// Returns the simulator too, so callers can inspect the programmed
/// associations and registers.
pub fn enable_simulated(
    sim_config: SimConfig,
    config: ModuleConfig,
) -> MonResult<(Arc<SimHardware>, RdtModule)> {
    let sim = SimHardware::new(sim_config);
    let module = RdtModule::enable(sim.hardware(), config)?;
    Ok((sim, module))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_simulated() {
        let (sim, module) = enable_simulated(SimConfig::default(), ModuleConfig::new()).unwrap();
        assert_eq!(module.pool().capacity(), sim.config().max_rmids);

        let mut prof = ProfilingContext::new(0b111);
        module.on_fork(CloneFlags::PROCESS, None, &mut prof).unwrap();
        module.on_switch_in(&mut prof, CpuId(0));
        assert!(sim.association(CpuId(0)).is_some());
    }
}
