//! # rdtmon-core
//!
//! Core types for rdtmon, a lifecycle manager for Intel RDT monitoring
//! ids (RMIDs) with per-thread energy accounting.
//!
//! This crate is platform-agnostic and contains no register access.
//! Hardware is reached through the traits in `traits`; the lifecycle
//! controller lives in `rdtmon-module`.
//!
//! ## Modules
//!
//! - `id` - RMID, class-of-service, cpu and location identifiers
//! - `state` - Record lifecycle state and accounting mode
//! - `pool` - Reference-counted lock-free RMID pool
//! - `cos` - Class-of-service bitmask / throttle registry
//! - `cmt` - Occupancy and bandwidth event definitions
//! - `energy` - Wrap-safe per-thread energy accumulator
//! - `record` - Per-thread monitoring record
//! - `prof` - Profiling context owned by the sampling framework
//! - `sample` - Sample buffer and counter usage
//! - `traits` - Hardware backends and lifecycle hook table
//! - `error` - Error types
//! - `kprint` - Kernel-style logging macros
//! - `env` - `RDTMON_*` environment variable utilities

pub mod id;
pub mod state;
pub mod pool;
pub mod cos;
pub mod cmt;
pub mod energy;
pub mod record;
pub mod prof;
pub mod sample;
pub mod traits;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CosId, CpuId, LocationId, Rmid};
pub use state::{AccountingMode, RecordState};
pub use pool::{RmidAllocPolicy, RmidPool};
pub use cos::{CatSupport, CosRegistry, MbaSupport};
pub use cmt::{CmtEvent, CmtReading, CmtSupport, CMT_MAX_EVENTS};
pub use energy::{DomainMask, EnergyControl, EnergyDomain, EnergySnapshot, NR_ENERGY_DOMAINS};
pub use record::ThreadRecord;
pub use prof::{CloneFlags, CounterConfig, ProfilingContext, ProfilingMode};
pub use sample::{CounterUsage, PmcSample, SampleFlags};
pub use traits::{CatBackend, CmtBackend, EnergyReader, Hardware, MbaBackend, MonitoringHooks};
pub use error::{HwError, MonError, MonResult};
pub use kprint::{set_log_level, LogLevel};
