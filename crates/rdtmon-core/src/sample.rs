//! Sample buffer shared with the sampling framework
//!
//! The framework owns the buffer. Hardware counts arrive in `pmc_counts`
//! (slot 0 is always instructions retired); monitoring modules append
//! virtual counts packed contiguously and flag each populated virtual
//! slot in `virt_mask`.

/// Hardware counter slots per sample
pub const MAX_PMCS: usize = 8;

/// Virtual counter slots per sample
pub const MAX_VIRTUAL_COUNTERS: usize = 8;

/// One periodic sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmcSample {
    pub pmc_counts: [u64; MAX_PMCS],

    /// Bit i set = virtual counter i was written
    pub virt_mask: u32,

    /// Number of values in `virtual_counts`
    pub nr_virt_counts: usize,

    /// Packed values, ascending virtual counter order, no gaps
    pub virtual_counts: [u64; MAX_VIRTUAL_COUNTERS],
}

impl PmcSample {
    /// Empty sample carrying an instruction count in slot 0
    pub fn with_instructions(instructions: u64) -> Self {
        let mut sample = Self::default();
        sample.pmc_counts[0] = instructions;
        sample
    }

    #[inline]
    pub fn instructions(&self) -> u64 {
        self.pmc_counts[0]
    }

    /// Append the value of virtual counter `slot`
    ///
    /// Returns false when the buffer is full or the slot is out of range.
    pub fn push_virtual(&mut self, slot: usize, value: u64) -> bool {
        if slot >= MAX_VIRTUAL_COUNTERS || self.nr_virt_counts >= MAX_VIRTUAL_COUNTERS {
            return false;
        }
        self.virt_mask |= 1 << slot;
        self.virtual_counts[self.nr_virt_counts] = value;
        self.nr_virt_counts += 1;
        true
    }

    /// Populated virtual values
    #[inline]
    pub fn virtual_values(&self) -> &[u64] {
        &self.virtual_counts[..self.nr_virt_counts]
    }
}

/// Context of a sample callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFlags(pub u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);

    /// Taken away from the thread's current cpu (e.g. after switch-out)
    pub const NO_CUR_CPU: SampleFlags = SampleFlags(0x1);

    #[inline]
    pub const fn contains(&self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Counters a module exposes to the sampling framework
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterUsage {
    /// Hardware counters the module needs for itself
    pub hwpmc_mask: u32,

    pub nr_experiments: u32,

    /// Name of each virtual counter, in slot order
    pub vcounter_desc: Vec<&'static str>,
}

impl CounterUsage {
    #[inline]
    pub fn nr_virtual_counters(&self) -> usize {
        self.vcounter_desc.len()
    }
}
