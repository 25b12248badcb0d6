//! Global energy-delay product (EDP) accumulator
//!
//! Collects the instructions retired by exiting threads together with the
//! package energy and wall time that passed while counting was active.
//! Thread exit and the configuration channel take the mutex. The sample
//! path only `try_lock`s it, at most once per commit interval, so the
//! package counter never goes a full wrap between two reads.

use core::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rdtmon_core::{
    DomainMask, EnergyControl, EnergyDomain, EnergyReader, HwError, MonResult, NR_ENERGY_DOMAINS,
};

#[derive(Debug, Default)]
struct EdpState {
    energy: EnergyControl,
    instructions: u64,
    /// Time accumulated by finished active periods
    elapsed: Duration,
    /// Start of the current active period; `None` while paused
    running_since: Option<Instant>,
    /// Last time energy was read
    last_read: Option<Instant>,
}

impl EdpState {
    fn read_energy(&mut self, reader: &dyn EnergyReader, commit: bool) {
        self.energy.update(reader, commit);
        self.last_read = Some(Instant::now());
    }

    fn elapsed_now(&self) -> Duration {
        match self.running_since {
            Some(start) => self.elapsed + start.elapsed(),
            None => self.elapsed,
        }
    }
}

/// Copy of the accumulated values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdpTotals {
    pub active: bool,
    pub instructions: u64,
    pub energy: [u64; NR_ENERGY_DOMAINS],
    pub elapsed: Duration,
}

impl EdpTotals {
    /// Package energy times elapsed milliseconds
    pub fn edp(&self) -> u128 {
        self.energy[EnergyDomain::Package.as_index()] as u128 * self.elapsed.as_millis()
    }

    /// Package energy per retired instruction
    pub fn energy_per_instr(&self) -> f64 {
        if self.instructions == 0 {
            return 0.0;
        }
        self.energy[EnergyDomain::Package.as_index()] as f64 / self.instructions as f64
    }
}

/// Default spacing of energy commits from the sample path
///
/// A 32-bit package counter at 61 uJ per unit wraps after about 40 minutes
/// at 100 W.
pub const EDP_COMMIT_INTERVAL: Duration = Duration::from_secs(1);

pub struct EdpAccumulator {
    reader: Arc<dyn EnergyReader>,
    domains: DomainMask,
    commit_interval: Duration,
    state: Mutex<EdpState>,
}

impl EdpAccumulator {
    /// Start accumulating right away
    ///
    /// Fails with `HwError::NotPresent` when the reader has no package
    /// domain.
    pub fn new(reader: Arc<dyn EnergyReader>) -> MonResult<Self> {
        Self::with_commit_interval(reader, EDP_COMMIT_INTERVAL)
    }

    pub fn with_commit_interval(
        reader: Arc<dyn EnergyReader>,
        commit_interval: Duration,
    ) -> MonResult<Self> {
        let domains = reader.available_domains();
        if !domains.contains(EnergyDomain::Package.as_index()) {
            return Err(HwError::NotPresent.into());
        }

        let edp = Self {
            reader,
            domains,
            commit_interval,
            state: Mutex::new(EdpState::default()),
        };
        edp.restart();
        Ok(edp)
    }

    fn lock(&self) -> MutexGuard<'_, EdpState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Zero everything and start a new active period
    pub fn restart(&self) {
        let mut state = self.lock();
        *state = EdpState::default();
        state.read_energy(self.reader.as_ref(), false);
        state.running_since = Some(Instant::now());
    }

    /// Stop accumulating; no-op while already paused
    pub fn pause(&self) {
        let mut state = self.lock();
        if let Some(start) = state.running_since.take() {
            state.read_energy(self.reader.as_ref(), true);
            state.elapsed += start.elapsed();
        }
    }

    /// Continue accumulating; no-op while already active
    pub fn resume(&self) {
        let mut state = self.lock();
        if state.running_since.is_none() {
            state.read_energy(self.reader.as_ref(), false);
            state.running_since = Some(Instant::now());
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.lock().running_since.is_some()
    }

    /// Fold the instructions of an exiting thread; dropped while paused
    pub fn add_instructions(&self, n: u64) {
        let mut state = self.lock();
        if state.running_since.is_some() {
            state.instructions = state.instructions.wrapping_add(n);
            state.read_energy(self.reader.as_ref(), true);
        }
    }

    /// Commit energy from the sample path
    ///
    /// Never blocks. Does nothing when the lock is contended or accounting
    /// is paused, and reads at most once per commit interval.
    pub fn tick(&self) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        if state.running_since.is_none() {
            return;
        }
        if state.last_read.map_or(true, |t| t.elapsed() >= self.commit_interval) {
            state.read_energy(self.reader.as_ref(), true);
        }
    }

    /// Current totals, including energy up to now when active
    pub fn totals(&self) -> EdpTotals {
        let mut state = self.lock();
        if state.running_since.is_some() {
            state.read_energy(self.reader.as_ref(), true);
        }
        EdpTotals {
            active: state.running_since.is_some(),
            instructions: state.instructions,
            energy: state.energy.sample(),
            elapsed: state.elapsed_now(),
        }
    }

    /// Append the `edp_*` lines of the configuration dump
    pub fn dump(&self, out: &mut String) {
        let totals = self.totals();
        let _ = writeln!(out, "edp_active={}", totals.active as u8);
        let _ = writeln!(out, "edp_elapsed_ms={}", totals.elapsed.as_millis());
        let _ = writeln!(out, "edp_instructions={}", totals.instructions);
        for domain in self.domains.iter() {
            let _ = writeln!(
                out,
                "edp_{}={}",
                domain.counter_name(),
                totals.energy[domain.as_index()]
            );
        }
        let _ = writeln!(out, "edp={}", totals.edp());
        let _ = writeln!(out, "edp_energy_per_instr={:.6}", totals.energy_per_instr());
    }

    /// Stop accounting at module teardown
    pub fn release(&self) {
        self.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdtmon_core::EnergySnapshot;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Package counter advancing by 100 on every read
    struct TickingReader {
        domains: DomainMask,
        value: AtomicU64,
    }

    impl TickingReader {
        fn new(domains: DomainMask) -> Arc<Self> {
            Arc::new(Self {
                domains,
                value: AtomicU64::new(0),
            })
        }
    }

    impl EnergyReader for TickingReader {
        fn available_domains(&self) -> DomainMask {
            self.domains
        }
        fn counter_bits(&self) -> u32 {
            32
        }
        fn read_snapshot(&self) -> EnergySnapshot {
            let v = self.value.fetch_add(100, Ordering::SeqCst) + 100;
            EnergySnapshot { values: [v, 0, 0, 0], seq: v / 100 }
        }
    }

    /// Package counter that only moves when told to
    struct SteppedReader {
        value: AtomicU64,
    }

    impl EnergyReader for SteppedReader {
        fn available_domains(&self) -> DomainMask {
            DomainMask::ALL
        }
        fn counter_bits(&self) -> u32 {
            32
        }
        fn read_snapshot(&self) -> EnergySnapshot {
            let v = self.value.load(Ordering::SeqCst) & 0xFFFF_FFFF;
            EnergySnapshot { values: [v, 0, 0, 0], seq: 0 }
        }
    }

    #[test]
    fn test_requires_package_domain() {
        let reader = TickingReader::new(DomainMask(0b1000));
        assert!(EdpAccumulator::new(reader).is_err());
    }

    #[test]
    fn test_accumulates_while_active() {
        let edp = EdpAccumulator::new(TickingReader::new(DomainMask::ALL)).unwrap();
        assert!(edp.is_active());

        edp.add_instructions(1000);
        let totals = edp.totals();
        assert_eq!(totals.instructions, 1000);
        // restart read, then one read each for add_instructions and totals
        assert_eq!(totals.energy[0], 200);
        assert!((totals.energy_per_instr() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let edp = EdpAccumulator::new(TickingReader::new(DomainMask::ALL)).unwrap();
        edp.add_instructions(10);

        edp.pause();
        let once = edp.totals();
        edp.pause();
        let twice = edp.totals();

        assert!(!edp.is_active());
        assert_eq!(once, twice);

        // Paused: exits are not counted
        edp.add_instructions(50);
        assert_eq!(edp.totals().instructions, 10);

        // One resume undoes both pauses
        edp.resume();
        assert!(edp.is_active());
        edp.add_instructions(5);
        assert_eq!(edp.totals().instructions, 15);
    }

    #[test]
    fn test_resume_skips_paused_energy() {
        let reader = TickingReader::new(DomainMask::ALL);
        let edp = EdpAccumulator::new(reader.clone()).unwrap();
        edp.pause();
        let paused = edp.totals().energy[0];

        // Energy spent while paused
        reader.value.fetch_add(10_000, Ordering::SeqCst);
        edp.resume();
        edp.resume();
        assert_eq!(edp.totals().energy[0], paused + 100);
    }

    #[test]
    fn test_restart_zeroes() {
        let edp = EdpAccumulator::new(TickingReader::new(DomainMask::ALL)).unwrap();
        edp.add_instructions(77);
        edp.pause();
        edp.restart();

        let totals = edp.totals();
        assert!(totals.active);
        assert_eq!(totals.instructions, 0);
    }

    #[test]
    fn test_dump_lines() {
        let edp = EdpAccumulator::new(TickingReader::new(DomainMask(0b1001))).unwrap();
        edp.pause();
        let mut out = String::new();
        edp.dump(&mut out);

        assert!(out.contains("edp_active=0\n"));
        assert!(out.contains("edp_instructions=0\n"));
        assert!(out.contains("edp_energy_pkg="));
        assert!(out.contains("edp_energy_dram="));
        assert!(!out.contains("edp_energy_cores"));
        assert!(out.contains("edp_energy_per_instr=0.000000\n"));
    }

    #[test]
    fn test_tick_keeps_each_read_within_one_wrap() {
        let reader = Arc::new(SteppedReader { value: AtomicU64::new(0) });
        let edp = EdpAccumulator::with_commit_interval(reader.clone(), Duration::ZERO).unwrap();

        // 2.25 wraps in total, each step below one wrap
        for _ in 0..3 {
            reader.value.fetch_add(0xC000_0000, Ordering::SeqCst);
            edp.tick();
        }
        assert_eq!(edp.totals().energy[0], 3 * 0xC000_0000);
    }

    #[test]
    fn test_tick_is_idle_while_paused() {
        let reader = Arc::new(SteppedReader { value: AtomicU64::new(0) });
        let edp = EdpAccumulator::with_commit_interval(reader.clone(), Duration::ZERO).unwrap();
        edp.pause();

        reader.value.fetch_add(500, Ordering::SeqCst);
        edp.tick();
        assert_eq!(edp.totals().energy[0], 0);
    }

    #[test]
    fn test_tick_respects_interval() {
        let reader = Arc::new(SteppedReader { value: AtomicU64::new(0) });
        let edp =
            EdpAccumulator::with_commit_interval(reader.clone(), Duration::from_secs(3600)).unwrap();

        // No read before the interval expires, so the wrap is not seen
        reader.value.fetch_add(0x1_0000_0010, Ordering::SeqCst);
        edp.tick();
        assert_eq!(edp.totals().energy[0], 0x10);
    }
}
