//! Simulated RDT hardware
//!
//! Implements every backend trait in memory so the module can be driven
//! without MSR access: tests, the `rdt-sim` demo, and machines without
//! RDT. Energy counters advance by a fixed step per read and wrap at the
//! configured width. Capacity bitmasks must be contiguous, like on real
//! CAT hardware.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rdtmon_core::{
    kdebug, CatBackend, CatSupport, CmtBackend, CmtReading, CmtSupport, CosId, CpuId,
    DomainMask, EnergyReader, EnergySnapshot, Hardware, HwError, LocationId, MbaBackend,
    MbaSupport, MonResult, Rmid, NR_ENERGY_DOMAINS,
};

use crate::config::defaults;

/// Subsystems of the simulated machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimSubsystem {
    Cmt,
    Cat,
    Mba,
}

/// Shape of the simulated machine
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub max_rmids: u32,
    pub nr_cpus: u32,
    /// Cache domains; cpus are spread round-robin
    pub nr_locations: u32,
    pub cat: CatSupport,
    pub mba: MbaSupport,
    pub energy_domains: DomainMask,
    pub counter_bits: u32,
    /// Energy added to each domain per read
    pub energy_step: [u64; NR_ENERGY_DOMAINS],
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_rmids: 16,
            nr_cpus: 4,
            nr_locations: 1,
            cat: CatSupport {
                nr_cos_available: 4,
                cbm_length: 11,
            },
            mba: MbaSupport {
                supported: true,
                max_throttling: 90,
                nr_cos_available: 4,
                linear: true,
            },
            energy_domains: DomainMask(0b1011),
            counter_bits: defaults::ENERGY_COUNTER_BITS,
            energy_step: [1000, 600, 0, 150],
        }
    }
}

/// No association programmed on a cpu
const NO_ASSOC: u64 = u64::MAX;

pub struct SimHardware {
    config: SimConfig,
    energy: [AtomicU64; NR_ENERGY_DOMAINS],
    energy_seq: AtomicU64,
    /// Per-cpu `rmid << 32 | cos`
    assoc: Box<[AtomicU64]>,
    /// Per-RMID bandwidth counter, bumped on every read
    bw: Box<[AtomicU64]>,
    cbms: Mutex<Vec<u64>>,
    delays: Mutex<Vec<u32>>,
    fail_init: Mutex<Option<SimSubsystem>>,
    released: Mutex<Vec<SimSubsystem>>,
}

impl SimHardware {
    pub fn new(config: SimConfig) -> Arc<Self> {
        let assoc: Vec<AtomicU64> = (0..config.nr_cpus).map(|_| AtomicU64::new(NO_ASSOC)).collect();
        let bw: Vec<AtomicU64> = (0..config.max_rmids).map(|_| AtomicU64::new(0)).collect();
        let full = config.cat.full_mask();

        Arc::new(Self {
            energy: Default::default(),
            energy_seq: AtomicU64::new(0),
            assoc: assoc.into_boxed_slice(),
            bw: bw.into_boxed_slice(),
            cbms: Mutex::new(vec![full; config.cat.nr_cos_available as usize]),
            delays: Mutex::new(vec![0; config.mba.nr_cos_available as usize]),
            fail_init: Mutex::new(None),
            released: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Backend table for `RdtModule::enable`
    pub fn hardware(self: &Arc<Self>) -> Hardware {
        Hardware {
            cmt: self.clone(),
            cat: self.clone(),
            mba: self.clone(),
            energy: self.clone(),
        }
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Make the next `initialize` of a subsystem fail
    pub fn fail_initialize(&self, subsystem: SimSubsystem) {
        *self.fail_init.lock().unwrap_or_else(|e| e.into_inner()) = Some(subsystem);
    }

    /// Subsystems released so far, in release order
    pub fn released(&self) -> Vec<SimSubsystem> {
        self.released.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Association programmed on a cpu
    pub fn association(&self, cpu: CpuId) -> Option<(Rmid, CosId)> {
        let packed = self.assoc.get(cpu.0 as usize)?.load(Ordering::Acquire);
        if packed == NO_ASSOC {
            None
        } else {
            Some((Rmid::new((packed >> 32) as u32), CosId::new(packed as u32)))
        }
    }

    /// Bitmask as written to the simulated registers
    pub fn cbm_register(&self, cos: CosId) -> Option<u64> {
        self.cbms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(cos.as_usize())
            .copied()
    }

    /// Overwrite the raw energy counters
    pub fn set_energy(&self, values: [u64; NR_ENERGY_DOMAINS]) {
        for (counter, v) in self.energy.iter().zip(values) {
            counter.store(v & self.counter_mask(), Ordering::SeqCst);
        }
    }

    fn counter_mask(&self) -> u64 {
        if self.config.counter_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.config.counter_bits) - 1
        }
    }

    fn init_guard(&self, subsystem: SimSubsystem) -> MonResult<()> {
        let mut fail = self.fail_init.lock().unwrap_or_else(|e| e.into_inner());
        if *fail == Some(subsystem) {
            *fail = None;
            return Err(HwError::InitFailed(format!("{:?} probe failed", subsystem)).into());
        }
        Ok(())
    }

    fn record_release(&self, subsystem: SimSubsystem) {
        self.released
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(subsystem);
    }
}

fn is_contiguous(mask: u64) -> bool {
    if mask == 0 {
        return false;
    }
    let shifted = mask >> mask.trailing_zeros();
    shifted & (shifted.wrapping_add(1)) == 0
}

impl CmtBackend for SimHardware {
    fn initialize(&self) -> MonResult<CmtSupport> {
        self.init_guard(SimSubsystem::Cmt)?;
        kdebug!("sim: CMT with {} RMIDs", self.config.max_rmids);
        Ok(CmtSupport {
            max_rmids: self.config.max_rmids,
            nr_locations: self.config.nr_locations,
        })
    }

    fn release(&self) {
        self.record_release(SimSubsystem::Cmt);
    }

    fn location_of(&self, cpu: CpuId) -> LocationId {
        LocationId(cpu.0 % self.config.nr_locations.max(1))
    }

    fn read_events(&self, rmid: Rmid, location: LocationId) -> CmtReading {
        let Some(counter) = self.bw.get(rmid.as_usize()) else {
            return [0; 3];
        };
        let total = counter.fetch_add(4096, Ordering::Relaxed) + 4096;
        let occupancy = (rmid.as_u32() as u64 + 1) * 64 * 1024 * (location.0 as u64 + 1);
        [occupancy, total, total / 2]
    }

    fn syswide_total_bw(&self, _location: LocationId) -> u64 {
        self.bw.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    fn associate(&self, cpu: CpuId, rmid: Rmid, cos: CosId) {
        if let Some(slot) = self.assoc.get(cpu.0 as usize) {
            slot.store(((rmid.as_u32() as u64) << 32) | cos.as_u32() as u64, Ordering::Release);
        }
    }

    fn dissociate(&self, cpu: CpuId) {
        if let Some(slot) = self.assoc.get(cpu.0 as usize) {
            slot.store(NO_ASSOC, Ordering::Release);
        }
    }
}

impl CatBackend for SimHardware {
    fn initialize(&self) -> MonResult<CatSupport> {
        self.init_guard(SimSubsystem::Cat)?;
        Ok(self.config.cat)
    }

    fn release(&self) {
        self.record_release(SimSubsystem::Cat);
    }

    fn write_cbm(&self, cos: CosId, mask: u64) -> MonResult<()> {
        if !is_contiguous(mask) {
            return Err(HwError::Rejected.into());
        }
        let mut cbms = self.cbms.lock().unwrap_or_else(|e| e.into_inner());
        let slot = cbms.get_mut(cos.as_usize()).ok_or(HwError::Rejected)?;
        *slot = mask;
        Ok(())
    }
}

impl MbaBackend for SimHardware {
    fn initialize(&self) -> MonResult<MbaSupport> {
        self.init_guard(SimSubsystem::Mba)?;
        Ok(self.config.mba)
    }

    fn release(&self) {
        self.record_release(SimSubsystem::Mba);
    }

    fn write_delay(&self, cos: CosId, value: u32) -> MonResult<()> {
        let mut delays = self.delays.lock().unwrap_or_else(|e| e.into_inner());
        let slot = delays.get_mut(cos.as_usize()).ok_or(HwError::Rejected)?;
        *slot = value;
        Ok(())
    }
}

impl EnergyReader for SimHardware {
    fn available_domains(&self) -> DomainMask {
        self.config.energy_domains
    }

    fn counter_bits(&self) -> u32 {
        self.config.counter_bits
    }

    fn read_snapshot(&self) -> EnergySnapshot {
        let mask = self.counter_mask();
        let mut values = [0u64; NR_ENERGY_DOMAINS];
        for (i, counter) in self.energy.iter().enumerate() {
            if !self.config.energy_domains.contains(i) {
                continue;
            }
            let step = self.config.energy_step[i];
            let prev = counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.wrapping_add(step) & mask)
                })
                .unwrap_or_else(|v| v);
            values[i] = prev.wrapping_add(step) & mask;
        }
        EnergySnapshot {
            values,
            seq: self.energy_seq.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdtmon_core::MonError;

    #[test]
    fn test_contiguous_masks() {
        assert!(is_contiguous(0x7f));
        assert!(is_contiguous(0x7f0));
        assert!(!is_contiguous(0x505));
        assert!(!is_contiguous(0));
        assert!(is_contiguous(u64::MAX));
    }

    #[test]
    fn test_write_cbm_rejects_gaps() {
        let sim = SimHardware::new(SimConfig::default());
        assert_eq!(
            sim.write_cbm(CosId::new(1), 0b101),
            Err(MonError::Hardware(HwError::Rejected))
        );
        sim.write_cbm(CosId::new(1), 0b110).unwrap();
        assert_eq!(sim.cbm_register(CosId::new(1)), Some(0b110));
    }

    #[test]
    fn test_association() {
        let sim = SimHardware::new(SimConfig::default());
        assert_eq!(sim.association(CpuId(2)), None);
        sim.associate(CpuId(2), Rmid::new(5), CosId::new(1));
        assert_eq!(sim.association(CpuId(2)), Some((Rmid::new(5), CosId::new(1))));
        sim.dissociate(CpuId(2));
        assert_eq!(sim.association(CpuId(2)), None);
    }

    #[test]
    fn test_energy_wraps_at_width() {
        let sim = SimHardware::new(SimConfig {
            counter_bits: 32,
            energy_step: [0x20, 0, 0, 0],
            ..SimConfig::default()
        });
        sim.set_energy([0xFFFF_FFF0, 0, 0, 0]);
        let snap = sim.read_snapshot();
        assert_eq!(snap.values[0], 0x10);
        assert_eq!(snap.seq, 1);
    }

    #[test]
    fn test_unavailable_domains_read_zero() {
        let sim = SimHardware::new(SimConfig::default());
        let snap = sim.read_snapshot();
        assert_eq!(snap.values[2], 0);
        assert_eq!(snap.values[0], 1000);
    }

    #[test]
    fn test_fail_initialize_once() {
        let sim = SimHardware::new(SimConfig::default());
        sim.fail_initialize(SimSubsystem::Cat);
        assert!(CatBackend::initialize(sim.as_ref()).is_err());
        assert!(CatBackend::initialize(sim.as_ref()).is_ok());
    }
}
