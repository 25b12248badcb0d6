//! RMID pool
//!
//! Owns the finite set of monitoring ids. Every slot carries an atomic
//! reference count; an atomic bitmap records which ids are free. The
//! bitmap is the source of truth: an id is handed out only by the caller
//! that clears its bit.
//!
//! FIFO reuse goes through a lock-free queue of recently released ids.
//! Queue entries can go stale (the id was claimed by a first-fit scan in
//! between), so every pop is confirmed against the bitmap. An id whose
//! push lost to a full queue stays reachable through the bitmap scan.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::error::{MonError, MonResult};
use crate::id::Rmid;

/// Number of bits per bitmap block
const BITS_PER_BLOCK: usize = 64;

/// Tie-break among free ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RmidAllocPolicy {
    /// Reuse the least recently released id (spreads reuse evenly)
    #[default]
    Fifo = 0,

    /// Lowest free id
    FirstFit = 1,
}

impl RmidAllocPolicy {
    /// Number of selectable policies
    pub const COUNT: usize = 2;

    /// Policy for a numeric selector, `None` if out of range
    pub const fn from_index(idx: i64) -> Option<Self> {
        match idx {
            0 => Some(RmidAllocPolicy::Fifo),
            1 => Some(RmidAllocPolicy::FirstFit),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_index(&self) -> usize {
        *self as usize
    }

    pub const fn name(&self) -> &'static str {
        match self {
            RmidAllocPolicy::Fifo => "fifo",
            RmidAllocPolicy::FirstFit => "first-fit",
        }
    }

    /// Parse a name ("fifo", "first-fit") or a numeric selector
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Some(RmidAllocPolicy::Fifo),
            "first-fit" | "firstfit" | "first_fit" => Some(RmidAllocPolicy::FirstFit),
            other => other.parse::<i64>().ok().and_then(Self::from_index),
        }
    }
}

impl From<u8> for RmidAllocPolicy {
    fn from(v: u8) -> Self {
        Self::from_index(v as i64).unwrap_or_default()
    }
}

impl fmt::Display for RmidAllocPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference-counted pool of RMIDs
pub struct RmidPool {
    /// Per-id holder count; 0 means free
    refcounts: Box<[AtomicU32]>,

    /// Free bitmap (bit set = id available)
    free_bits: Box<[AtomicU64]>,

    /// Released ids in release order (FIFO policy)
    recycled: ArrayQueue<u32>,

    /// Current `RmidAllocPolicy` as u8
    policy: AtomicU8,

    /// Number of ids in the pool
    capacity: u32,

    /// Distinct ids currently held
    in_use: AtomicU32,
}

impl RmidPool {
    /// Create a pool holding ids `[0, capacity)`, all free
    pub fn new(capacity: u32, policy: RmidAllocPolicy) -> Self {
        let cap = capacity as usize;
        let num_blocks = (cap + BITS_PER_BLOCK - 1) / BITS_PER_BLOCK;

        let free_bits: Vec<AtomicU64> = (0..num_blocks)
            .map(|block| {
                let remaining = cap - block * BITS_PER_BLOCK;
                if remaining >= BITS_PER_BLOCK {
                    AtomicU64::new(u64::MAX)
                } else {
                    AtomicU64::new((1u64 << remaining) - 1)
                }
            })
            .collect();

        let refcounts: Vec<AtomicU32> = (0..cap).map(|_| AtomicU32::new(0)).collect();

        // ArrayQueue rejects a zero capacity
        let recycled = ArrayQueue::new(cap.max(1));
        for id in 0..capacity {
            let _ = recycled.push(id);
        }

        Self {
            refcounts: refcounts.into_boxed_slice(),
            free_bits: free_bits.into_boxed_slice(),
            recycled,
            policy: AtomicU8::new(policy as u8),
            capacity,
            in_use: AtomicU32::new(0),
        }
    }

    /// Acquire a free id with a reference count of 1
    ///
    /// Returns `MonError::Exhausted` when every id is held. The caller is
    /// expected to run unmonitored and retry later.
    pub fn acquire(&self) -> MonResult<Rmid> {
        let claimed = match self.policy() {
            RmidAllocPolicy::Fifo => self.claim_recycled().or_else(|| self.claim_first_fit()),
            RmidAllocPolicy::FirstFit => self.claim_first_fit(),
        };

        let id = claimed.ok_or(MonError::Exhausted)?;
        self.refcounts[id as usize].store(1, Ordering::Release);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(Rmid::new(id))
    }

    /// Add a holder to an id that is already held
    ///
    /// Returns the new reference count. Retaining a free id is an
    /// `InvalidState` error: only an existing holder may share its id.
    pub fn retain(&self, id: Rmid) -> MonResult<u32> {
        let slot = self.slot(id)?;
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(MonError::InvalidState);
            }
            match slot.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop one holder; the id returns to the free set at zero
    ///
    /// Returns the remaining reference count. Releasing a free id is an
    /// `InvalidState` error and leaves the count at zero.
    pub fn release(&self, id: Rmid) -> MonResult<u32> {
        let slot = self.slot(id)?;
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(MonError::InvalidState);
            }
            match slot.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let remaining = current - 1;
        if remaining == 0 {
            let (block, mask) = Self::locate(id.as_u32());
            self.in_use.fetch_sub(1, Ordering::Relaxed);
            self.free_bits[block].fetch_or(mask, Ordering::Release);
            // Full queue: the id is still reachable through the bitmap scan
            let _ = self.recycled.push(id.as_u32());
        }
        Ok(remaining)
    }

    /// Current allocation policy
    #[inline]
    pub fn policy(&self) -> RmidAllocPolicy {
        RmidAllocPolicy::from(self.policy.load(Ordering::Relaxed))
    }

    /// Switch policy; affects only future acquisitions
    pub fn set_policy(&self, policy: RmidAllocPolicy) {
        self.policy.store(policy as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of distinct ids currently held
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Number of ids available to `acquire`
    pub fn available(&self) -> u32 {
        self.free_bits
            .iter()
            .map(|b| b.load(Ordering::Relaxed).count_ones())
            .sum()
    }

    /// Reference count of an id (0 for free or out-of-range ids)
    pub fn refcount(&self, id: Rmid) -> u32 {
        self.slot(id)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Check whether an id is in the free set
    pub fn is_free(&self, id: Rmid) -> bool {
        if self.slot(id).is_err() {
            return false;
        }
        let (block, mask) = Self::locate(id.as_u32());
        self.free_bits[block].load(Ordering::Acquire) & mask != 0
    }

    fn slot(&self, id: Rmid) -> MonResult<&AtomicU32> {
        self.refcounts
            .get(id.as_usize())
            .filter(|_| id.is_some())
            .ok_or(MonError::InvalidRmid(id.as_u32()))
    }

    #[inline]
    fn locate(id: u32) -> (usize, u64) {
        let idx = id as usize;
        (idx / BITS_PER_BLOCK, 1u64 << (idx % BITS_PER_BLOCK))
    }

    /// Clear the free bit of a specific id; true if this caller won it
    fn try_claim(&self, id: u32) -> bool {
        let (block, mask) = Self::locate(id);
        self.free_bits[block].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Pop released ids until one is still free
    fn claim_recycled(&self) -> Option<u32> {
        while let Some(id) = self.recycled.pop() {
            if self.try_claim(id) {
                return Some(id);
            }
            // Stale entry: a first-fit scan took it after it was queued
        }
        None
    }

    /// Claim the lowest free id
    fn claim_first_fit(&self) -> Option<u32> {
        for (block_idx, block) in self.free_bits.iter().enumerate() {
            loop {
                let current = block.load(Ordering::Acquire);
                if current == 0 {
                    break;
                }

                let bit_idx = current.trailing_zeros() as usize;
                let mask = 1u64 << bit_idx;

                match block.compare_exchange_weak(
                    current,
                    current & !mask,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some((block_idx * BITS_PER_BLOCK + bit_idx) as u32),
                    Err(_) => continue, // Another cpu modified the block, retry
                }
            }
        }
        None
    }
}

impl fmt::Debug for RmidPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RmidPool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .field("policy", &self.policy())
            .finish()
    }
}
