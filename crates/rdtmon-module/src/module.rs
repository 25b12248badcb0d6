//! RDT monitoring module
//!
//! `RdtModule` is one enabled instance of the monitoring module: the RMID
//! pool, the class-of-service registry and the EDP accumulator, bound to
//! a set of hardware backends. The host scheduler drives it through the
//! `MonitoringHooks` callbacks; every callback is bounded and lock-free
//! except the exit path, which takes the EDP mutex. Samples only try it.
//!
//! Per-thread state lives in the `ThreadRecord` stored in the thread's
//! `ProfilingContext`. RMIDs are assigned lazily at the first switch-in
//! and shared by thread clones.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use rdtmon_core::{
    kdebug, kinfo, ktrace, kwarn, CloneFlags, CmtEvent, CmtSupport, CosRegistry, CounterConfig,
    CounterUsage, CpuId, Hardware, MonResult, MonitoringHooks, PmcSample, ProfilingContext,
    ProfilingMode, Rmid, RmidPool, SampleFlags, ThreadRecord,
};

use crate::config::{EnergyReport, ModuleConfig};
use crate::edp::EdpAccumulator;

/// Epoch handed to the next enabled module
static NEXT_EPOCH: AtomicU32 = AtomicU32::new(1);

pub struct RdtModule {
    hw: Hardware,
    config: ModuleConfig,
    cmt: CmtSupport,
    pub(crate) pool: RmidPool,
    pub(crate) cos: CosRegistry,
    pub(crate) edp: EdpAccumulator,
    ebs_config: CounterConfig,
    pub(crate) use_rapl: AtomicBool,
    pub(crate) force_ebs: AtomicU32,
    epoch: u32,
}

impl RdtModule {
    /// Bring up CMT, CAT, MBA and EDP, in that order
    ///
    /// A subsystem that fails to initialize releases the ones before it in
    /// reverse order and its error is returned.
    pub fn enable(hw: Hardware, config: ModuleConfig) -> MonResult<Self> {
        let ebs_config = config.validate()?;

        let cmt = hw.cmt.initialize()?;

        let cat = match hw.cat.initialize() {
            Ok(cat) => cat,
            Err(e) => {
                hw.cmt.release();
                return Err(e);
            }
        };

        let mba = match hw.mba.initialize() {
            Ok(mba) => mba,
            Err(e) => {
                hw.cat.release();
                hw.cmt.release();
                return Err(e);
            }
        };

        let edp = match EdpAccumulator::new(hw.energy.clone()) {
            Ok(edp) => edp,
            Err(e) => {
                hw.mba.release();
                hw.cat.release();
                hw.cmt.release();
                return Err(e);
            }
        };

        let pool = RmidPool::new(cmt.max_rmids, config.rmid_alloc_policy);
        let cos = CosRegistry::new(cat, mba, hw.cat.clone(), hw.mba.clone());
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);

        kinfo!(
            "enabled: {} RMIDs, {} COS, cbm_length={}, mba={}, epoch={}",
            cmt.max_rmids,
            cat.nr_cos_available,
            cat.cbm_length,
            mba.supported,
            epoch
        );

        Ok(Self {
            use_rapl: AtomicBool::new(config.use_rapl_counters),
            force_ebs: AtomicU32::new(config.force_ebs_counters as u32),
            hw,
            config,
            cmt,
            pool,
            cos,
            edp,
            ebs_config,
            epoch,
        })
    }

    /// Tear the module down; same as dropping it
    pub fn disable(self) {
        drop(self);
    }

    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    #[inline]
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    #[inline]
    pub fn cmt_support(&self) -> CmtSupport {
        self.cmt
    }

    #[inline]
    pub fn pool(&self) -> &RmidPool {
        &self.pool
    }

    #[inline]
    pub fn cos_registry(&self) -> &CosRegistry {
        &self.cos
    }

    #[inline]
    pub fn edp(&self) -> &EdpAccumulator {
        &self.edp
    }

    #[inline]
    pub fn uses_rapl_counters(&self) -> bool {
        self.use_rapl.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn forces_ebs_counters(&self) -> bool {
        self.force_ebs_counters_value() != 0
    }

    /// Last value written to `force_ebs_counters`
    #[inline]
    pub fn force_ebs_counters_value(&self) -> u32 {
        self.force_ebs.load(Ordering::Relaxed)
    }

    /// RMID the record holds in this instance's pool
    ///
    /// Records tagged with an earlier epoch hold nothing here, whatever id
    /// they were bound to.
    #[inline]
    fn pooled_rmid(&self, record: &ThreadRecord) -> Option<Rmid> {
        if record.epoch() == self.epoch {
            record.held_rmid()
        } else {
            None
        }
    }

    fn emit_energy(
        &self,
        record: &mut ThreadRecord,
        mask: u32,
        sample: &mut PmcSample,
        flags: SampleFlags,
    ) {
        let reader = self.hw.energy.as_ref();

        if !(self.config.accounting.resets_on_switch() && flags.contains(SampleFlags::NO_CUR_CPU)) {
            record.energy_mut().update(reader, true);
        }

        let values = match self.config.energy_report {
            EnergyReport::Interval => record.energy_mut().drain(),
            EnergyReport::Cumulative => record.energy().sample(),
        };

        // Virtual slots number the available domains only
        for (slot, domain) in reader.available_domains().iter().enumerate() {
            if mask & (1 << slot) != 0 {
                sample.push_virtual(slot, values[domain.as_index()]);
            }
        }
    }

    fn emit_cmt(&self, record: &mut ThreadRecord, cpu: CpuId, mask: u32, sample: &mut PmcSample) {
        let Some(rmid) = self.pooled_rmid(record) else {
            return;
        };

        let location = self.hw.cmt.location_of(cpu);
        if !record.store_cmt(location, self.hw.cmt.read_events(rmid, location)) {
            kwarn!("cpu {} maps to unknown location {}", cpu.0, location.0);
            return;
        }

        let total_bw = CmtEvent::TotalBw.as_index();
        if mask & (1 << total_bw) != 0 {
            record.patch_cmt(location, total_bw, self.hw.cmt.syswide_total_bw(location));
        }

        if let Some(values) = record.cmt_values(location) {
            for event in CmtEvent::ALL {
                if mask & (1 << event.as_index()) != 0 {
                    sample.push_virtual(event.as_index(), values[event.as_index()]);
                }
            }
        }
    }

    fn release_subsystems(&self) {
        self.edp.release();
        self.hw.mba.release();
        self.hw.cat.release();
        self.hw.cmt.release();
    }
}

impl Drop for RdtModule {
    fn drop(&mut self) {
        self.release_subsystems();
        kinfo!("disabled (epoch {}, {} RMIDs still held)", self.epoch, self.pool.in_use());
    }
}

impl MonitoringHooks for RdtModule {
    fn on_fork(
        &self,
        flags: CloneFlags,
        parent: Option<&ProfilingContext>,
        child: &mut ProfilingContext,
    ) -> MonResult<()> {
        if child.has_record() {
            return Ok(());
        }

        let mut record = ThreadRecord::try_new(self.cmt.nr_locations as usize, self.epoch)?;

        if flags.is_thread() {
            let shared = parent.and_then(|p| p.record()).and_then(|r| self.pooled_rmid(r));
            if let Some(rmid) = shared {
                match self.pool.retain(rmid) {
                    Ok(refs) => {
                        if record.bind_rmid(rmid).is_err() {
                            let _ = self.pool.release(rmid);
                        } else {
                            ktrace!("clone shares RMID {} (refs={})", rmid, refs);
                        }
                    }
                    Err(e) => kwarn!("cannot share RMID {} with clone: {}", rmid, e),
                }
            }
        }

        if !self.config.accounting.resets_on_switch() {
            record.energy_mut().update(self.hw.energy.as_ref(), false);
        }

        if self.forces_ebs_counters() && child.counter_config.is_none() {
            if self.ebs_config.ebs_idx().is_some() {
                child.mode = ProfilingMode::EventBased;
            }
            child.counter_config = Some(self.ebs_config.clone());
        }

        child.attach_record(record);
        Ok(())
    }

    fn on_exec(&self, _prof: &mut ProfilingContext) {}

    fn on_switch_in(&self, prof: &mut ProfilingContext, cpu: CpuId) {
        let Some(record) = prof.record_mut() else {
            return;
        };
        if record.state().is_terminated() {
            return;
        }

        if record.state().is_unassigned() && record.epoch() == self.epoch {
            match self.pool.acquire() {
                Ok(rmid) => {
                    if record.bind_rmid(rmid).is_ok() {
                        ktrace!("assigned RMID {} on cpu {}", rmid, cpu.0);
                    } else {
                        let _ = self.pool.release(rmid);
                    }
                }
                Err(_) => kdebug!("RMID pool exhausted, thread runs unmonitored"),
            }
        }
        record.mark_unassigned_run();

        let rmid = self.pooled_rmid(record).unwrap_or(Rmid::NONE);
        self.hw.cmt.associate(cpu, rmid, record.cos());

        if self.config.accounting.resets_on_switch() {
            record.energy_mut().update(self.hw.energy.as_ref(), false);
        }
    }

    fn on_switch_out(&self, prof: &mut ProfilingContext, cpu: CpuId) {
        self.hw.cmt.dissociate(cpu);

        let Some(record) = prof.record_mut() else {
            return;
        };
        if self.config.accounting.resets_on_switch() && !record.state().is_terminated() {
            record.energy_mut().update(self.hw.energy.as_ref(), true);
        }
    }

    fn on_new_sample(
        &self,
        prof: &mut ProfilingContext,
        cpu: CpuId,
        sample: &mut PmcSample,
        flags: SampleFlags,
    ) {
        let mask = prof.virt_counter_mask;
        let Some(record) = prof.record_mut() else {
            return;
        };

        // Instructions are always counted by the first PMC
        record.add_instructions(sample.instructions());
        self.edp.tick();

        if self.uses_rapl_counters() {
            self.emit_energy(record, mask, sample, flags);
        } else {
            self.emit_cmt(record, cpu, mask, sample);
        }
    }

    fn on_migrate(&self, _prof: &mut ProfilingContext, _prev_cpu: CpuId, _new_cpu: CpuId) {}

    fn on_exit(&self, prof: &mut ProfilingContext) {
        let prof_enabled = prof.prof_enabled;
        let Some(record) = prof.record_mut() else {
            return;
        };

        let current = record.epoch() == self.epoch;
        if let Some(rmid) = record.mark_exited().filter(|_| current) {
            match self.pool.release(rmid) {
                Ok(refs) => ktrace!("released RMID {} (refs={})", rmid, refs),
                Err(e) => kwarn!("release of RMID {} failed: {}", rmid, e),
            }
        }

        if prof_enabled {
            self.edp.add_instructions(record.take_instructions());
        }
    }

    fn on_free_task(&self, prof: &mut ProfilingContext) {
        let Some(mut record) = prof.take_record() else {
            return;
        };

        // Exit never ran for this thread
        let current = record.epoch() == self.epoch;
        if let Some(rmid) = record.mark_exited().filter(|_| current) {
            let _ = self.pool.release(rmid);
        }
        record.mark_freed();
    }

    fn read_config(&self) -> String {
        self.render_config()
    }

    fn write_config(&self, line: &str, caller: Option<&mut ProfilingContext>) -> usize {
        if let Err(e) = self.try_write_config(line, caller) {
            kwarn!("ignoring config write {:?}: {}", line.trim_end(), e);
        }
        line.len()
    }

    fn counter_usage(&self) -> CounterUsage {
        let vcounter_desc = if self.uses_rapl_counters() {
            self.hw
                .energy
                .available_domains()
                .iter()
                .map(|d| d.counter_name())
                .collect()
        } else {
            CmtEvent::ALL.iter().map(|e| e.counter_name()).collect()
        };

        CounterUsage {
            hwpmc_mask: 0,
            nr_experiments: 0,
            vcounter_desc,
        }
    }
}
