//! # rdtmon-module
//!
//! The RDT monitoring module: lifecycle controller, configuration channel
//! and global EDP accumulator, built on the types in `rdtmon-core`.
//!
//! ## Modules
//!
//! - `module` - `RdtModule`, the `MonitoringHooks` implementation
//! - `control` - Configuration command grammar and rendering
//! - `edp` - Global energy-delay product accumulator
//! - `config` - `ModuleConfig` with env overrides
//! - `sim` - In-memory hardware backends

pub mod config;
pub mod control;
pub mod edp;
pub mod module;
pub mod sim;

pub use config::{EnergyReport, ModuleConfig};
pub use control::ConfigCommand;
pub use edp::{EdpAccumulator, EdpTotals};
pub use module::RdtModule;
pub use sim::{SimConfig, SimHardware, SimSubsystem};
