//! Module configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//! Values that the configuration channel may change later (allocation
//! policy, counter flags) are copied into the module at enable time; the
//! accounting settings are fixed for the lifetime of a module instance.
//!
//! # Example
//!
//! ```rust,ignore
//! use rdtmon_module::config::{EnergyReport, ModuleConfig};
//!
//! // Use defaults with env overrides
//! let config = ModuleConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ModuleConfig::new()
//!     .use_rapl_counters(true)
//!     .energy_report(EnergyReport::Cumulative);
//! ```

pub mod defaults;

use core::fmt;

use rdtmon_core::env::{env_get, env_get_bool, env_get_with};
use rdtmon_core::{kinfo, AccountingMode, CounterConfig, MonResult, RmidAllocPolicy};

/// What the energy virtual counters of a sample hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnergyReport {
    /// Energy accounted since the previous sample
    #[default]
    Interval,

    /// Energy accounted since the thread started
    Cumulative,
}

impl EnergyReport {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "interval" => Some(EnergyReport::Interval),
            "cumulative" => Some(EnergyReport::Cumulative),
            _ => None,
        }
    }
}

impl fmt::Display for EnergyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyReport::Interval => f.write_str("interval"),
            EnergyReport::Cumulative => f.write_str("cumulative"),
        }
    }
}

/// Module configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Initial RMID allocation policy
    pub rmid_alloc_policy: RmidAllocPolicy,
    /// Emit energy counters instead of occupancy/bandwidth
    pub use_rapl_counters: bool,
    /// Module-wide energy accounting mode
    pub accounting: AccountingMode,
    /// Apply `ebs_counter_config` to threads without a counter setup
    pub force_ebs_counters: bool,
    /// Counter configuration forced on threads
    pub ebs_counter_config: String,
    pub energy_report: EnergyReport,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ModuleConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `RDTMON_RMID_POLICY` - fifo, first-fit, or 0/1
    /// - `RDTMON_USE_RAPL` - Energy virtual counters (0/1)
    /// - `RDTMON_RESET_ON_CSWITCH` - Account energy only while running (0/1)
    /// - `RDTMON_FORCE_EBS` - Force the EBS counter set (0/1)
    /// - `RDTMON_EBS_CONFIG` - Counter set to force
    /// - `RDTMON_ENERGY_REPORT` - interval or cumulative
    pub fn from_env() -> Self {
        let reset = env_get_bool("RESET_ON_CSWITCH", defaults::RESET_ON_CSWITCH);
        let cumulative = defaults::ENERGY_REPORT_CUMULATIVE;

        Self {
            rmid_alloc_policy: env_get_with(
                "RMID_POLICY",
                defaults::RMID_ALLOC_POLICY,
                RmidAllocPolicy::parse,
            ),
            use_rapl_counters: env_get_bool("USE_RAPL", defaults::USE_RAPL_COUNTERS),
            accounting: if reset {
                AccountingMode::ResetOnSwitch
            } else {
                AccountingMode::Continuous
            },
            force_ebs_counters: env_get_bool("FORCE_EBS", defaults::FORCE_EBS_COUNTERS),
            ebs_counter_config: env_get("EBS_CONFIG", defaults::EBS_COUNTER_CONFIG.to_string()),
            energy_report: env_get_with(
                "ENERGY_REPORT",
                if cumulative { EnergyReport::Cumulative } else { EnergyReport::Interval },
                EnergyReport::parse,
            ),
        }
    }

    /// Create config with library defaults (no env override).
    /// Useful for testing.
    pub fn new() -> Self {
        Self {
            rmid_alloc_policy: defaults::RMID_ALLOC_POLICY,
            use_rapl_counters: defaults::USE_RAPL_COUNTERS,
            accounting: if defaults::RESET_ON_CSWITCH {
                AccountingMode::ResetOnSwitch
            } else {
                AccountingMode::Continuous
            },
            force_ebs_counters: defaults::FORCE_EBS_COUNTERS,
            ebs_counter_config: defaults::EBS_COUNTER_CONFIG.to_string(),
            energy_report: if defaults::ENERGY_REPORT_CUMULATIVE {
                EnergyReport::Cumulative
            } else {
                EnergyReport::Interval
            },
        }
    }

    // Builder methods

    pub fn rmid_alloc_policy(mut self, policy: RmidAllocPolicy) -> Self {
        self.rmid_alloc_policy = policy;
        self
    }

    pub fn use_rapl_counters(mut self, enable: bool) -> Self {
        self.use_rapl_counters = enable;
        self
    }

    pub fn accounting(mut self, mode: AccountingMode) -> Self {
        self.accounting = mode;
        self
    }

    pub fn force_ebs_counters(mut self, enable: bool) -> Self {
        self.force_ebs_counters = enable;
        self
    }

    pub fn ebs_counter_config(mut self, spec: impl Into<String>) -> Self {
        self.ebs_counter_config = spec.into();
        self
    }

    pub fn energy_report(mut self, report: EnergyReport) -> Self {
        self.energy_report = report;
        self
    }

    /// Parse the forced counter set; fails with `InvalidConfig`
    pub fn validate(&self) -> MonResult<CounterConfig> {
        CounterConfig::parse(&self.ebs_counter_config)
    }

    /// Log configuration (for debugging)
    pub fn log(&self) {
        kinfo!("rdtmon configuration:");
        kinfo!("  rmid_alloc_policy:   {}", self.rmid_alloc_policy);
        kinfo!("  use_rapl_counters:   {}", self.use_rapl_counters);
        kinfo!("  reset_on_cswitch:    {}", self.accounting.resets_on_switch());
        kinfo!("  force_ebs_counters:  {}", self.force_ebs_counters);
        kinfo!("  ebs_counter_config:  {}", self.ebs_counter_config);
        kinfo!("  energy_report:       {}", self.energy_report);
    }
}
