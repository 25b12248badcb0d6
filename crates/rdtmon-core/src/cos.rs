//! Class-of-Service registry
//!
//! Holds the per-class cache capacity bitmask (CAT) and bandwidth delay
//! (MBA) values. Values are range checked here, written through the
//! hardware backend, and stored only once the backend accepted them.
//! The switch-in path never touches the registry: it programs the class
//! id cached on the thread's record.

use core::fmt::Write;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{MonError, MonResult};
use crate::id::CosId;
use crate::traits::{CatBackend, MbaBackend};

/// Cache allocation capabilities reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatSupport {
    /// Number of classes of service
    pub nr_cos_available: u32,

    /// Capacity bitmask length in bits
    pub cbm_length: u32,
}

impl CatSupport {
    /// Bitmask covering the whole cache
    pub fn full_mask(&self) -> u64 {
        if self.cbm_length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.cbm_length) - 1
        }
    }
}

/// Memory bandwidth allocation capabilities reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbaSupport {
    pub supported: bool,

    /// Largest accepted delay value
    pub max_throttling: u32,

    pub nr_cos_available: u32,

    /// Delay values scale linearly with bandwidth
    pub linear: bool,
}

impl MbaSupport {
    /// Capabilities of a machine without bandwidth throttling
    pub const UNSUPPORTED: MbaSupport = MbaSupport {
        supported: false,
        max_throttling: 0,
        nr_cos_available: 0,
        linear: false,
    };
}

/// Per-class bitmask and throttle configuration
pub struct CosRegistry {
    cat: CatSupport,
    mba: MbaSupport,
    cbms: Box<[AtomicU64]>,
    delays: Box<[AtomicU32]>,
    cat_hw: Arc<dyn CatBackend>,
    mba_hw: Arc<dyn MbaBackend>,
    /// Serializes write-through so stored values match the registers
    write_lock: Mutex<()>,
}

impl CosRegistry {
    /// Build the registry with every class at the full bitmask and no delay
    pub fn new(
        cat: CatSupport,
        mba: MbaSupport,
        cat_hw: Arc<dyn CatBackend>,
        mba_hw: Arc<dyn MbaBackend>,
    ) -> Self {
        let full = cat.full_mask();
        let cbms: Vec<AtomicU64> = (0..cat.nr_cos_available)
            .map(|_| AtomicU64::new(full))
            .collect();
        let nr_delays = if mba.supported { mba.nr_cos_available } else { 0 };
        let delays: Vec<AtomicU32> = (0..nr_delays).map(|_| AtomicU32::new(0)).collect();

        Self {
            cat,
            mba,
            cbms: cbms.into_boxed_slice(),
            delays: delays.into_boxed_slice(),
            cat_hw,
            mba_hw,
            write_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn cat_support(&self) -> CatSupport {
        self.cat
    }

    #[inline]
    pub fn mba_support(&self) -> MbaSupport {
        self.mba
    }

    /// Check whether a thread may be placed in this class
    #[inline]
    pub fn is_valid_cos(&self, cos: CosId) -> bool {
        cos.as_u32() < self.cat.nr_cos_available
    }

    /// Set the capacity bitmask of a class
    pub fn set_bitmask(&self, cos: CosId, mask: u64) -> MonResult<()> {
        if !self.is_valid_cos(cos) || mask == 0 || mask & !self.cat.full_mask() != 0 {
            return Err(MonError::OutOfRange);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cat_hw.write_cbm(cos, mask)?;
        self.cbms[cos.as_usize()].store(mask, Ordering::Release);
        Ok(())
    }

    /// Set the bandwidth delay value of a class
    pub fn set_throttle(&self, cos: CosId, value: u32) -> MonResult<()> {
        if !self.mba.supported {
            return Err(MonError::Unsupported);
        }
        if cos.as_u32() >= self.mba.nr_cos_available || value > self.mba.max_throttling {
            return Err(MonError::OutOfRange);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.mba_hw.write_delay(cos, value)?;
        self.delays[cos.as_usize()].store(value, Ordering::Release);
        Ok(())
    }

    pub fn bitmask(&self, cos: CosId) -> Option<u64> {
        self.cbms
            .get(cos.as_usize())
            .map(|m| m.load(Ordering::Acquire))
    }

    pub fn throttle(&self, cos: CosId) -> Option<u32> {
        self.delays
            .get(cos.as_usize())
            .map(|d| d.load(Ordering::Acquire))
    }

    /// Append one `llc_cbmN=0x..` line per class
    pub fn render_bitmasks(&self, out: &mut String) {
        for (i, cbm) in self.cbms.iter().enumerate() {
            let _ = writeln!(out, "llc_cbm{}=0x{:x}", i, cbm.load(Ordering::Acquire));
        }
    }

    /// Append one `mba_delayN=..` line per class (nothing without MBA)
    pub fn render_delays(&self, out: &mut String) {
        for (i, delay) in self.delays.iter().enumerate() {
            let _ = writeln!(out, "mba_delay{}={}", i, delay.load(Ordering::Acquire));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HwError;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeHw {
        reject: AtomicBool,
        writes: AtomicU32,
    }

    impl CatBackend for FakeHw {
        fn initialize(&self) -> MonResult<CatSupport> {
            Ok(CatSupport::default())
        }
        fn release(&self) {}
        fn write_cbm(&self, _cos: CosId, _mask: u64) -> MonResult<()> {
            if self.reject.load(Ordering::Relaxed) {
                return Err(HwError::Rejected.into());
            }
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    impl MbaBackend for FakeHw {
        fn initialize(&self) -> MonResult<MbaSupport> {
            Ok(MbaSupport::UNSUPPORTED)
        }
        fn release(&self) {}
        fn write_delay(&self, _cos: CosId, _value: u32) -> MonResult<()> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn registry(mba: MbaSupport) -> (CosRegistry, Arc<FakeHw>) {
        let hw = Arc::new(FakeHw::default());
        let cat = CatSupport { nr_cos_available: 4, cbm_length: 11 };
        (CosRegistry::new(cat, mba, hw.clone(), hw.clone()), hw)
    }

    const MBA: MbaSupport = MbaSupport {
        supported: true,
        max_throttling: 90,
        nr_cos_available: 2,
        linear: true,
    };

    #[test]
    fn test_defaults_are_full_mask() {
        let (reg, _) = registry(MbaSupport::UNSUPPORTED);
        for i in 0..4 {
            assert_eq!(reg.bitmask(CosId::new(i)), Some(0x7ff));
        }
        assert_eq!(reg.bitmask(CosId::new(4)), None);
    }

    #[test]
    fn test_set_bitmask_leaves_other_classes() {
        let (reg, hw) = registry(MbaSupport::UNSUPPORTED);
        reg.set_bitmask(CosId::new(0), 0x7f).unwrap();

        assert_eq!(reg.bitmask(CosId::new(0)), Some(0x7f));
        assert_eq!(reg.bitmask(CosId::new(1)), Some(0x7ff));
        assert_eq!(hw.writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_set_bitmask_range_checks() {
        let (reg, hw) = registry(MbaSupport::UNSUPPORTED);
        assert_eq!(reg.set_bitmask(CosId::new(4), 0x1), Err(MonError::OutOfRange));
        assert_eq!(reg.set_bitmask(CosId::new(0), 0x800), Err(MonError::OutOfRange));
        assert_eq!(reg.set_bitmask(CosId::new(0), 0), Err(MonError::OutOfRange));
        assert_eq!(hw.writes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_rejected_write_keeps_old_value() {
        let (reg, hw) = registry(MbaSupport::UNSUPPORTED);
        hw.reject.store(true, Ordering::Relaxed);

        assert!(matches!(
            reg.set_bitmask(CosId::new(2), 0x5),
            Err(MonError::Hardware(HwError::Rejected))
        ));
        assert_eq!(reg.bitmask(CosId::new(2)), Some(0x7ff));
    }

    #[test]
    fn test_throttle_unsupported() {
        let (reg, _) = registry(MbaSupport::UNSUPPORTED);
        assert_eq!(reg.set_throttle(CosId::new(0), 10), Err(MonError::Unsupported));
        assert_eq!(reg.throttle(CosId::new(0)), None);
    }

    #[test]
    fn test_throttle_supported() {
        let (reg, _) = registry(MBA);
        reg.set_throttle(CosId::new(1), 40).unwrap();
        assert_eq!(reg.throttle(CosId::new(1)), Some(40));
        assert_eq!(reg.set_throttle(CosId::new(2), 10), Err(MonError::OutOfRange));
        assert_eq!(reg.set_throttle(CosId::new(0), 91), Err(MonError::OutOfRange));
    }

    #[test]
    fn test_render() {
        let (reg, _) = registry(MBA);
        reg.set_bitmask(CosId::new(0), 0x7f).unwrap();
        reg.set_throttle(CosId::new(0), 20).unwrap();

        let mut out = String::new();
        reg.render_bitmasks(&mut out);
        reg.render_delays(&mut out);
        assert!(out.starts_with("llc_cbm0=0x7f\nllc_cbm1=0x7ff\n"));
        assert!(out.ends_with("mba_delay0=20\nmba_delay1=0\n"));
    }
}
