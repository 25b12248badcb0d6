//! Hardware and scheduler traits
//!
//! These traits define the interface between the platform-agnostic
//! monitoring core and whatever reads the registers (a kernel driver, a
//! resctrl/msr backend, a simulator) and whatever drives the lifecycle
//! (the host scheduler).

use std::sync::Arc;

use crate::cmt::{CmtReading, CmtSupport};
use crate::cos::{CatSupport, MbaSupport};
use crate::energy::{DomainMask, EnergySnapshot};
use crate::error::MonResult;
use crate::id::{CosId, CpuId, LocationId, Rmid};
use crate::prof::{CloneFlags, ProfilingContext};
use crate::sample::{CounterUsage, PmcSample, SampleFlags};

/// Occupancy / bandwidth monitoring (CMT/MBM)
pub trait CmtBackend: Send + Sync {
    /// Probe and set up monitoring; reports the RMID space
    fn initialize(&self) -> MonResult<CmtSupport>;

    /// Undo `initialize`
    fn release(&self);

    /// Cache domain a cpu belongs to
    fn location_of(&self, cpu: CpuId) -> LocationId;

    /// Read every event for an RMID on one location
    fn read_events(&self, rmid: Rmid, location: LocationId) -> CmtReading;

    /// Aggregate total bandwidth of all RMIDs on a location
    fn syswide_total_bw(&self, location: LocationId) -> u64;

    /// Program the (RMID, COS) association of a cpu; `Rmid::NONE` selects
    /// the default, unmonitored id
    fn associate(&self, cpu: CpuId, rmid: Rmid, cos: CosId);

    /// Return a cpu to the default association
    fn dissociate(&self, cpu: CpuId);
}

/// Cache capacity allocation (CAT)
pub trait CatBackend: Send + Sync {
    fn initialize(&self) -> MonResult<CatSupport>;

    fn release(&self);

    /// Write the capacity bitmask of a class; may reject non-contiguous masks
    fn write_cbm(&self, cos: CosId, mask: u64) -> MonResult<()>;
}

/// Memory bandwidth throttling (MBA)
pub trait MbaBackend: Send + Sync {
    /// Returns `MbaSupport::UNSUPPORTED` on machines without MBA; an
    /// error means the subsystem is present but broken
    fn initialize(&self) -> MonResult<MbaSupport>;

    fn release(&self);

    fn write_delay(&self, cos: CosId, value: u32) -> MonResult<()>;
}

/// Package energy counters (RAPL)
pub trait EnergyReader: Send + Sync {
    /// Domains this machine reports
    fn available_domains(&self) -> DomainMask;

    /// Width of the raw counters
    fn counter_bits(&self) -> u32;

    /// Read every domain at once
    fn read_snapshot(&self) -> EnergySnapshot;
}

/// The hardware access layer a module instance is enabled on
#[derive(Clone)]
pub struct Hardware {
    pub cmt: Arc<dyn CmtBackend>,
    pub cat: Arc<dyn CatBackend>,
    pub mba: Arc<dyn MbaBackend>,
    pub energy: Arc<dyn EnergyReader>,
}

/// Lifecycle callbacks invoked by the host scheduler
///
/// Every callback is synchronous, bounded, and never blocks. Per-thread
/// hooks receive the thread's own profiling context; only `on_fork`
/// also sees the parent's.
pub trait MonitoringHooks: Send + Sync {
    /// A new thread is created. `parent` is the forking thread's context.
    ///
    /// An error means the child runs unmonitored; the fork itself must
    /// proceed.
    fn on_fork(
        &self,
        flags: CloneFlags,
        parent: Option<&ProfilingContext>,
        child: &mut ProfilingContext,
    ) -> MonResult<()>;

    /// The thread replaced its program image
    fn on_exec(&self, prof: &mut ProfilingContext);

    /// The thread is about to run on `cpu`
    fn on_switch_in(&self, prof: &mut ProfilingContext, cpu: CpuId);

    /// The thread stopped running on `cpu`
    fn on_switch_out(&self, prof: &mut ProfilingContext, cpu: CpuId);

    /// Periodic sample; fills virtual counters of `sample`
    fn on_new_sample(
        &self,
        prof: &mut ProfilingContext,
        cpu: CpuId,
        sample: &mut PmcSample,
        flags: SampleFlags,
    );

    /// The thread moved between cpus
    fn on_migrate(&self, prof: &mut ProfilingContext, prev_cpu: CpuId, new_cpu: CpuId);

    /// The thread finished executing
    fn on_exit(&self, prof: &mut ProfilingContext);

    /// The profiling context is being reclaimed (may come long after exit)
    fn on_free_task(&self, prof: &mut ProfilingContext);

    /// Render the configuration as text
    fn read_config(&self) -> String;

    /// Apply one configuration line; returns the number of bytes consumed
    fn write_config(&self, line: &str, caller: Option<&mut ProfilingContext>) -> usize;

    /// Virtual counters this module currently exposes
    fn counter_usage(&self) -> CounterUsage;

    /// Metric exported to the host scheduler, if any
    fn current_metric_value(&self, _prof: &ProfilingContext, _key: u32) -> Option<u64> {
        None
    }
}
