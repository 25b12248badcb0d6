//! Hardware identifier types
//!
//! `Rmid` indexes the monitoring-id pool, `CosId` names a class of service.
//! `CpuId` and `LocationId` are plain wrappers so the hooks cannot mix up
//! a logical cpu with the cache domain (package) it belongs to.

use core::fmt;

/// Resource Monitoring ID
///
/// A 32-bit index into the RMID pool.
/// The maximum value (u32::MAX) is reserved as a sentinel for "no id".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Rmid(u32);

impl Rmid {
    /// Sentinel value indicating no RMID is bound
    pub const NONE: Rmid = Rmid(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Rmid(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as usize for indexing into pool slots
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u32::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<Rmid> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for Rmid {
    #[inline]
    fn from(id: u32) -> Self {
        Rmid(id)
    }
}

impl fmt::Debug for Rmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Rmid(NONE)")
        } else {
            write!(f, "Rmid({})", self.0)
        }
    }
}

impl fmt::Display for Rmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for Rmid {
    fn default() -> Self {
        Rmid::NONE
    }
}

/// Class of Service identifier
///
/// Not reference counted: many threads share one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CosId(u32);

impl CosId {
    /// Class every new record starts in
    pub const DEFAULT: CosId = CosId(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        CosId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CosId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical cpu a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CpuId(pub u32);

/// Cache domain (physical package) occupancy counters are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct LocationId(pub u32);

impl LocationId {
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}
