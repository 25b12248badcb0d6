//! Per-thread energy accounting
//!
//! Package energy counters run continuously and are shared by every
//! thread on the package. A thread's energy is the sum of deltas between
//! snapshots taken at its accounting points (switch-in/out, samples).
//!
//! Counters are narrower than 64 bits on most hardware and wrap; deltas
//! assume at most one wrap between two reads, so they are never negative.

use crate::traits::EnergyReader;

/// Number of energy domains tracked
pub const NR_ENERGY_DOMAINS: usize = 4;

/// Energy domains in hardware index order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EnergyDomain {
    /// Whole package
    Package = 0,
    /// Core power plane
    Cores = 1,
    /// Uncore / graphics power plane
    Uncore = 2,
    Dram = 3,
}

impl EnergyDomain {
    /// All domains, ascending
    pub const ALL: [EnergyDomain; NR_ENERGY_DOMAINS] = [
        EnergyDomain::Package,
        EnergyDomain::Cores,
        EnergyDomain::Uncore,
        EnergyDomain::Dram,
    ];

    #[inline]
    pub const fn as_index(&self) -> usize {
        *self as usize
    }

    /// Virtual counter name exposed to the sampling framework
    pub const fn counter_name(&self) -> &'static str {
        match self {
            EnergyDomain::Package => "energy_pkg",
            EnergyDomain::Cores => "energy_cores",
            EnergyDomain::Uncore => "energy_uncore",
            EnergyDomain::Dram => "energy_dram",
        }
    }
}

/// Set of energy domains (bit i = `EnergyDomain` with index i)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainMask(pub u32);

impl DomainMask {
    pub const ALL: DomainMask = DomainMask((1 << NR_ENERGY_DOMAINS) - 1);

    #[inline]
    pub const fn contains(&self, idx: usize) -> bool {
        idx < NR_ENERGY_DOMAINS && self.0 & (1 << idx) != 0
    }

    /// Domains present, ascending
    pub fn iter(self) -> impl Iterator<Item = EnergyDomain> {
        EnergyDomain::ALL
            .into_iter()
            .filter(move |d| self.contains(d.as_index()))
    }

    #[inline]
    pub fn count(&self) -> usize {
        (self.0 & Self::ALL.0).count_ones() as usize
    }
}

/// Raw cumulative counter values at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnergySnapshot {
    /// Raw value per domain, in counter units
    pub values: [u64; NR_ENERGY_DOMAINS],

    /// Read sequence number assigned by the reader
    pub seq: u64,
}

/// Non-negative difference between two reads of a `bits`-wide counter
#[inline]
pub fn wrapping_delta(prev: u64, cur: u64, bits: u32) -> u64 {
    let delta = cur.wrapping_sub(prev);
    if bits >= 64 {
        delta
    } else {
        delta & ((1u64 << bits) - 1)
    }
}

/// Energy accounting state of one thread
#[derive(Debug, Clone, Default)]
pub struct EnergyControl {
    /// Snapshot the next delta is computed against
    baseline: Option<EnergySnapshot>,

    /// Accumulated energy per domain since the last drain
    totals: [u64; NR_ENERGY_DOMAINS],
}

impl EnergyControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all accounting state
    pub fn init(&mut self) {
        *self = Self::default();
    }

    /// Read the counters and fold the delta since the baseline
    ///
    /// With `commit` the delta is added to the totals. Without it the delta
    /// is discarded. Either way the new snapshot becomes the baseline, so a
    /// non-commit update marks "start counting from now". The first update
    /// only sets the baseline. Returns the delta that was computed.
    pub fn update(&mut self, reader: &dyn EnergyReader, commit: bool) -> [u64; NR_ENERGY_DOMAINS] {
        let now = reader.read_snapshot();
        let bits = reader.counter_bits();
        let mut delta = [0u64; NR_ENERGY_DOMAINS];

        if let Some(prev) = self.baseline {
            for (i, d) in delta.iter_mut().enumerate() {
                *d = wrapping_delta(prev.values[i], now.values[i], bits);
            }
            if commit {
                for (total, d) in self.totals.iter_mut().zip(delta.iter()) {
                    *total = total.saturating_add(*d);
                }
            }
        }

        self.baseline = Some(now);
        delta
    }

    /// Accumulated totals; does not modify state
    #[inline]
    pub fn sample(&self) -> [u64; NR_ENERGY_DOMAINS] {
        self.totals
    }

    /// Return the accumulated totals and start again from zero
    pub fn drain(&mut self) -> [u64; NR_ENERGY_DOMAINS] {
        core::mem::take(&mut self.totals)
    }

    #[inline]
    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of package readings
    struct ScriptedReader {
        bits: u32,
        script: Mutex<VecDeque<u64>>,
    }

    impl ScriptedReader {
        fn new(bits: u32, pkg: &[u64]) -> Self {
            Self {
                bits,
                script: Mutex::new(pkg.iter().copied().collect()),
            }
        }
    }

    impl EnergyReader for ScriptedReader {
        fn available_domains(&self) -> DomainMask {
            DomainMask(0b1)
        }
        fn counter_bits(&self) -> u32 {
            self.bits
        }
        fn read_snapshot(&self) -> EnergySnapshot {
            let v = self.script.lock().unwrap().pop_front().unwrap_or(0);
            EnergySnapshot { values: [v, 0, 0, 0], seq: 0 }
        }
    }

    #[test]
    fn test_wrapping_delta_32bit() {
        assert_eq!(wrapping_delta(0xFFFF_FFF0, 0x0000_0010, 32), 0x20);
        assert_eq!(wrapping_delta(100, 150, 32), 50);
        assert_eq!(wrapping_delta(u64::MAX, 1, 64), 2);
    }

    #[test]
    fn test_first_update_sets_baseline_only() {
        let reader = ScriptedReader::new(32, &[1000]);
        let mut ctrl = EnergyControl::new();
        assert!(!ctrl.has_baseline());

        let delta = ctrl.update(&reader, true);
        assert_eq!(delta, [0; NR_ENERGY_DOMAINS]);
        assert_eq!(ctrl.sample()[0], 0);
        assert!(ctrl.has_baseline());
    }

    #[test]
    fn test_commit_accumulates_across_wrap() {
        let reader = ScriptedReader::new(32, &[0xFFFF_FF00, 0xFFFF_FFF0, 0x10]);
        let mut ctrl = EnergyControl::new();

        ctrl.update(&reader, false);
        assert_eq!(ctrl.update(&reader, true)[0], 0xF0);
        assert_eq!(ctrl.update(&reader, true)[0], 0x20);
        assert_eq!(ctrl.sample()[0], 0x110);
    }

    #[test]
    fn test_uncommitted_delta_is_discarded() {
        let reader = ScriptedReader::new(32, &[10, 50, 80]);
        let mut ctrl = EnergyControl::new();

        ctrl.update(&reader, true);
        // Idle interval 10 -> 50 is skipped, baseline moves to 50
        ctrl.update(&reader, false);
        ctrl.update(&reader, true);
        assert_eq!(ctrl.sample()[0], 30);
    }

    #[test]
    fn test_sample_does_not_mutate_and_drain_resets() {
        let reader = ScriptedReader::new(32, &[0, 7]);
        let mut ctrl = EnergyControl::new();
        ctrl.update(&reader, true);
        ctrl.update(&reader, true);

        assert_eq!(ctrl.sample()[0], 7);
        assert_eq!(ctrl.sample()[0], 7);
        assert_eq!(ctrl.drain()[0], 7);
        assert_eq!(ctrl.sample()[0], 0);
        assert!(ctrl.has_baseline());
    }

    #[test]
    fn test_init_zeroes() {
        let reader = ScriptedReader::new(32, &[0, 7]);
        let mut ctrl = EnergyControl::new();
        ctrl.update(&reader, true);
        ctrl.update(&reader, true);
        ctrl.init();
        assert_eq!(ctrl.sample(), [0; NR_ENERGY_DOMAINS]);
        assert!(!ctrl.has_baseline());
    }

    #[test]
    fn test_domain_mask_iter() {
        let mask = DomainMask(0b1011);
        let names: Vec<_> = mask.iter().map(|d| d.counter_name()).collect();
        assert_eq!(names, vec!["energy_pkg", "energy_cores", "energy_dram"]);
        assert_eq!(mask.count(), 3);
        assert!(!mask.contains(2));
        assert!(!mask.contains(9));
    }
}
