//! Per-thread profiling context
//!
//! The sampling framework owns one `ProfilingContext` per profiled thread
//! and hands it to every lifecycle hook. The monitoring module keeps its
//! `ThreadRecord` in the context's private slot, so the record lives and
//! dies with the context rather than with the thread's execution.

use core::fmt;

use crate::error::{MonError, MonResult};
use crate::record::ThreadRecord;
use crate::sample::MAX_PMCS;

/// Linux `CLONE_THREAD`
pub const CLONE_THREAD: u64 = 0x0001_0000;

/// Clone flags passed to the fork hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloneFlags(pub u64);

impl CloneFlags {
    /// A fresh process (fork/spawn)
    pub const PROCESS: CloneFlags = CloneFlags(0);

    /// A new thread sharing the parent's address space
    pub const THREAD: CloneFlags = CloneFlags(CLONE_THREAD);

    #[inline]
    pub const fn is_thread(&self) -> bool {
        self.0 & CLONE_THREAD != 0
    }
}

/// How samples are triggered for a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfilingMode {
    /// Periodic timer
    #[default]
    TimeBased,

    /// Counter overflow of the EBS counter
    EventBased,
}

/// One hardware counter in a counter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSlot {
    pub pmc: u8,

    /// Raw event selector, when given as `pmcN=0x..`
    pub event: Option<u64>,
}

/// Parsed counter configuration string such as `pmc0,ebs0,pmc1`
///
/// `pmcN[=0xEV]` selects hardware counter N. `ebsN[=period]` makes
/// counter N the event-based sampling trigger; it must be selected too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    spec: String,
    counters: Vec<CounterSlot>,
    ebs_idx: Option<usize>,
    ebs_period: Option<u64>,
}

impl CounterConfig {
    pub fn parse(spec: &str) -> MonResult<Self> {
        let invalid = |why: &str| MonError::InvalidConfig(format!("{}: {}", spec, why));

        let mut counters: Vec<CounterSlot> = Vec::new();
        let mut ebs: Option<(u8, Option<u64>)> = None;

        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, value) = match token.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (token, None),
            };

            if let Some(n) = name.strip_prefix("pmc") {
                let pmc: u8 = n.parse().map_err(|_| invalid("bad pmc index"))?;
                if pmc as usize >= MAX_PMCS {
                    return Err(invalid("pmc index out of range"));
                }
                if counters.iter().any(|c| c.pmc == pmc) {
                    return Err(invalid("pmc selected twice"));
                }
                let event = match value {
                    Some(v) => Some(
                        u64::from_str_radix(v.trim_start_matches("0x"), 16)
                            .map_err(|_| invalid("bad event selector"))?,
                    ),
                    None => None,
                };
                counters.push(CounterSlot { pmc, event });
            } else if let Some(n) = name.strip_prefix("ebs") {
                let pmc: u8 = n.parse().map_err(|_| invalid("bad ebs index"))?;
                let period = match value {
                    Some(v) => Some(v.parse().map_err(|_| invalid("bad ebs period"))?),
                    None => None,
                };
                if ebs.replace((pmc, period)).is_some() {
                    return Err(invalid("more than one ebs counter"));
                }
            } else {
                return Err(invalid("unknown token"));
            }
        }

        if counters.is_empty() {
            return Err(invalid("no counters selected"));
        }

        let (ebs_idx, ebs_period) = match ebs {
            Some((pmc, period)) => {
                let idx = counters
                    .iter()
                    .position(|c| c.pmc == pmc)
                    .ok_or_else(|| invalid("ebs counter not selected"))?;
                (Some(idx), period)
            }
            None => (None, None),
        };

        Ok(Self {
            spec: spec.to_string(),
            counters,
            ebs_idx,
            ebs_period,
        })
    }

    #[inline]
    pub fn counters(&self) -> &[CounterSlot] {
        &self.counters
    }

    /// Position of the EBS trigger in `counters()`
    #[inline]
    pub fn ebs_idx(&self) -> Option<usize> {
        self.ebs_idx
    }

    #[inline]
    pub fn ebs_period(&self) -> Option<u64> {
        self.ebs_period
    }
}

impl fmt::Display for CounterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

/// Profiling state of one thread, owned by the sampling framework
#[derive(Debug, Default)]
pub struct ProfilingContext {
    /// Counters the user configured, if any
    pub counter_config: Option<CounterConfig>,

    pub mode: ProfilingMode,

    /// Virtual counters requested by the user (bit i = slot i)
    pub virt_counter_mask: u32,

    /// Profiling is active for this thread
    pub prof_enabled: bool,

    /// Monitoring module private data
    record: Option<ThreadRecord>,
}

impl ProfilingContext {
    pub fn new(virt_counter_mask: u32) -> Self {
        Self {
            virt_counter_mask,
            prof_enabled: true,
            ..Self::default()
        }
    }

    #[inline]
    pub fn record(&self) -> Option<&ThreadRecord> {
        self.record.as_ref()
    }

    #[inline]
    pub fn record_mut(&mut self) -> Option<&mut ThreadRecord> {
        self.record.as_mut()
    }

    #[inline]
    pub fn has_record(&self) -> bool {
        self.record.is_some()
    }

    /// Store the module's record; returns a record that was already there
    pub fn attach_record(&mut self, record: ThreadRecord) -> Option<ThreadRecord> {
        self.record.replace(record)
    }

    /// Remove the module's record
    pub fn take_record(&mut self) -> Option<ThreadRecord> {
        self.record.take()
    }
}
