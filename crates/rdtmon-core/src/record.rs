//! Per-thread monitoring record
//!
//! Single writer: only the owning thread's hooks mutate it. The RMID is
//! written once, when the record leaves the unassigned states, and is
//! never rewritten; a forking parent may read it at any time.

use crate::cmt::{CmtReading, CMT_MAX_EVENTS};
use crate::energy::EnergyControl;
use crate::error::{MonError, MonResult};
use crate::id::{CosId, LocationId, Rmid};
use crate::state::RecordState;

#[derive(Debug, Clone)]
pub struct ThreadRecord {
    state: RecordState,
    rmid: Rmid,
    cos: CosId,
    energy: EnergyControl,

    /// Last occupancy/bandwidth values, indexed by location
    cmt_values: Vec<CmtReading>,

    /// Instructions retired since creation (for EDP)
    instr_counter: u64,

    /// Module epoch at creation
    epoch: u32,
}

impl ThreadRecord {
    /// Allocate a record in `Created` state
    ///
    /// Fails with `OutOfMemory` if the per-location storage cannot be
    /// reserved.
    pub fn try_new(nr_locations: usize, epoch: u32) -> MonResult<Self> {
        let mut cmt_values = Vec::new();
        cmt_values.try_reserve_exact(nr_locations)?;
        cmt_values.resize(nr_locations, [0u64; CMT_MAX_EVENTS]);

        Ok(Self {
            state: RecordState::Created,
            rmid: Rmid::NONE,
            cos: CosId::DEFAULT,
            energy: EnergyControl::new(),
            cmt_values,
            instr_counter: 0,
            epoch,
        })
    }

    #[inline]
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// RMID bound to this record (`Rmid::NONE` while unassigned)
    #[inline]
    pub fn rmid(&self) -> Rmid {
        self.rmid
    }

    /// RMID if the record currently holds one
    #[inline]
    pub fn held_rmid(&self) -> Option<Rmid> {
        if self.state.is_assigned() {
            self.rmid.to_option()
        } else {
            None
        }
    }

    #[inline]
    pub fn cos(&self) -> CosId {
        self.cos
    }

    #[inline]
    pub fn set_cos(&mut self, cos: CosId) {
        self.cos = cos;
    }

    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    #[inline]
    pub fn energy(&self) -> &EnergyControl {
        &self.energy
    }

    #[inline]
    pub fn energy_mut(&mut self) -> &mut EnergyControl {
        &mut self.energy
    }

    /// Bind an RMID; only legal while unassigned
    pub fn bind_rmid(&mut self, rmid: Rmid) -> MonResult<()> {
        if !self.state.is_unassigned() || rmid.is_none() {
            return Err(MonError::InvalidState);
        }
        self.rmid = rmid;
        self.state = RecordState::Assigned;
        Ok(())
    }

    /// Record a switch-in that did not yield an RMID
    pub fn mark_unassigned_run(&mut self) {
        if self.state == RecordState::Created {
            self.state = RecordState::RunningUnassigned;
        }
    }

    /// Move to `Exited`; returns the RMID the caller must release
    ///
    /// Returns `None` for records that never held an id and on a second
    /// call, so the pool sees at most one release per record.
    pub fn mark_exited(&mut self) -> Option<Rmid> {
        let held = self.held_rmid();
        if !self.state.is_terminated() {
            self.state = RecordState::Exited;
        }
        held
    }

    pub fn mark_freed(&mut self) {
        self.state = RecordState::Freed;
    }

    #[inline]
    pub fn add_instructions(&mut self, n: u64) {
        self.instr_counter = self.instr_counter.wrapping_add(n);
    }

    #[inline]
    pub fn instr_counter(&self) -> u64 {
        self.instr_counter
    }

    /// Hand the instruction count over and restart from zero
    pub fn take_instructions(&mut self) -> u64 {
        core::mem::take(&mut self.instr_counter)
    }

    /// Store the latest readings for a location; false if out of range
    pub fn store_cmt(&mut self, location: LocationId, values: CmtReading) -> bool {
        match self.cmt_values.get_mut(location.as_usize()) {
            Some(slot) => {
                *slot = values;
                true
            }
            None => false,
        }
    }

    /// Patch a single event value for a location
    pub fn patch_cmt(&mut self, location: LocationId, event: usize, value: u64) {
        if let Some(slot) = self.cmt_values.get_mut(location.as_usize()) {
            if event < CMT_MAX_EVENTS {
                slot[event] = value;
            }
        }
    }

    pub fn cmt_values(&self, location: LocationId) -> Option<&CmtReading> {
        self.cmt_values.get(location.as_usize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_lazy() {
        let rec = ThreadRecord::try_new(2, 7).unwrap();
        assert_eq!(rec.state(), RecordState::Created);
        assert!(rec.rmid().is_none());
        assert_eq!(rec.held_rmid(), None);
        assert_eq!(rec.cos(), CosId::DEFAULT);
        assert_eq!(rec.epoch(), 7);
        assert_eq!(rec.instr_counter(), 0);
    }

    #[test]
    fn test_bind_once() {
        let mut rec = ThreadRecord::try_new(1, 0).unwrap();
        rec.mark_unassigned_run();
        assert_eq!(rec.state(), RecordState::RunningUnassigned);

        rec.bind_rmid(Rmid::new(3)).unwrap();
        assert_eq!(rec.held_rmid(), Some(Rmid::new(3)));

        // Immutable once assigned
        assert_eq!(rec.bind_rmid(Rmid::new(4)), Err(MonError::InvalidState));
        assert_eq!(rec.rmid(), Rmid::new(3));
    }

    #[test]
    fn test_exit_releases_once() {
        let mut rec = ThreadRecord::try_new(1, 0).unwrap();
        rec.bind_rmid(Rmid::new(1)).unwrap();

        assert_eq!(rec.mark_exited(), Some(Rmid::new(1)));
        assert_eq!(rec.state(), RecordState::Exited);
        assert_eq!(rec.mark_exited(), None);
    }

    #[test]
    fn test_exit_without_rmid() {
        let mut rec = ThreadRecord::try_new(1, 0).unwrap();
        assert_eq!(rec.mark_exited(), None);
        assert!(rec.state().is_terminated());
    }

    #[test]
    fn test_cmt_storage_bounds() {
        let mut rec = ThreadRecord::try_new(2, 0).unwrap();
        assert!(rec.store_cmt(LocationId(1), [1, 2, 3]));
        assert!(!rec.store_cmt(LocationId(2), [1, 2, 3]));

        rec.patch_cmt(LocationId(1), 1, 99);
        assert_eq!(rec.cmt_values(LocationId(1)), Some(&[1, 99, 3]));
        assert_eq!(rec.cmt_values(LocationId(5)), None);
    }

    #[test]
    fn test_instruction_counter() {
        let mut rec = ThreadRecord::try_new(0, 0).unwrap();
        rec.add_instructions(10);
        rec.add_instructions(5);
        assert_eq!(rec.take_instructions(), 15);
        assert_eq!(rec.instr_counter(), 0);
    }
}
