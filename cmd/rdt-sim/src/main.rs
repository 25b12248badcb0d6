//! Simulated RDT workload
//!
//! Drives fork / switch / sample / exit traffic through an `RdtModule` on
//! simulated hardware, one OS thread per simulated cpu, with more threads
//! than RMIDs so the pool runs dry and recovers.
//!
//! # Usage
//!
//! ```text
//! rdt-sim [processes-per-cpu] [threads-per-process]
//! ```
//!
//! # Environment Variables
//!
//! - `RDTMON_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `RDTMON_USE_RAPL=1` - Report energy instead of occupancy counters
//! - `RDTMON_RESET_ON_CSWITCH=1` - Account energy only while running
//! - `RDTMON_RMID_POLICY=first-fit` - RMID allocation policy

use rdtmon::{
    enable_simulated, kinfo, CloneFlags, CpuId, ModuleConfig, MonitoringHooks, PmcSample,
    ProfilingContext, RdtModule, RecordState, SampleFlags, SimConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const NR_CPUS: u32 = 4;
const TICKS_PER_THREAD: u32 = 8;

#[derive(Default)]
struct Stats {
    threads: AtomicU64,
    unmonitored_ticks: AtomicU64,
    samples: AtomicU64,
    virtual_counts: AtomicU64,
}

fn main() {
    println!("=== rdtmon Simulation ===\n");

    let processes: u32 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);
    let threads_per_process: u32 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);

    let sim_config = SimConfig {
        max_rmids: 8,
        nr_cpus: NR_CPUS,
        nr_locations: 2,
        ..SimConfig::default()
    };

    let config = ModuleConfig::from_env();
    config.log();

    let (_sim, module) = match enable_simulated(sim_config, config) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("enable failed: {}", e);
            std::process::exit(1);
        }
    };
    let module = Arc::new(module);
    let stats = Arc::new(Stats::default());

    println!(
        "{} cpus, {} RMIDs, {} processes x {} threads per cpu\n",
        NR_CPUS,
        module.pool().capacity(),
        processes,
        threads_per_process
    );

    // Shrink class 1 to the low half of the cache
    module.write_config("llc_cbm1 0x1f", None);

    let start = Instant::now();
    let handles: Vec<_> = (0..NR_CPUS)
        .map(|cpu| {
            let module = module.clone();
            let stats = stats.clone();
            std::thread::spawn(move || {
                run_cpu(&module, &stats, CpuId(cpu), processes, threads_per_process)
            })
        })
        .collect();

    for h in handles {
        let _ = h.join();
    }
    let elapsed = start.elapsed();

    println!("\n=== Results ===");
    println!("Threads:           {}", stats.threads.load(Ordering::Relaxed));
    println!("Samples:           {}", stats.samples.load(Ordering::Relaxed));
    println!("Virtual counts:    {}", stats.virtual_counts.load(Ordering::Relaxed));
    println!("Unmonitored ticks: {}", stats.unmonitored_ticks.load(Ordering::Relaxed));
    println!("RMIDs in use:      {}", module.pool().in_use());
    println!("Elapsed:           {:?}", elapsed);

    println!("\n=== Configuration ===");
    print!("{}", module.read_config());

    if module.pool().in_use() != 0 {
        eprintln!("RMID leak: {} still held", module.pool().in_use());
        std::process::exit(1);
    }
}

/// One simulated cpu: runs its processes to completion, round-robin
fn run_cpu(
    module: &RdtModule,
    stats: &Stats,
    cpu: CpuId,
    processes: u32,
    threads_per_process: u32,
) {
    for p in 0..processes {
        // Leader forked by a shell that is not profiled
        let mut leader = ProfilingContext::new(0b111);
        if module.on_fork(CloneFlags::PROCESS, None, &mut leader).is_err() {
            continue;
        }
        if p % 4 == 1 {
            let _ = module.try_write_config("cos_id=1", Some(&mut leader));
        }

        // The leader must run once before its clones can share its RMID
        module.on_switch_in(&mut leader, cpu);
        module.on_switch_out(&mut leader, cpu);

        let mut threads = vec![leader];
        for _ in 1..threads_per_process {
            let mut child = ProfilingContext::new(0b111);
            if module
                .on_fork(CloneFlags::THREAD, threads.first(), &mut child)
                .is_ok()
            {
                threads.push(child);
            }
        }
        stats.threads.fetch_add(threads.len() as u64, Ordering::Relaxed);

        for tick in 0..TICKS_PER_THREAD {
            for prof in threads.iter_mut() {
                module.on_switch_in(prof, cpu);
                if prof.record().map(|r| r.state()) != Some(RecordState::Assigned) {
                    stats.unmonitored_ticks.fetch_add(1, Ordering::Relaxed);
                }

                let mut sample = PmcSample::with_instructions(10_000 + tick as u64);
                module.on_new_sample(prof, cpu, &mut sample, SampleFlags::NONE);
                stats.samples.fetch_add(1, Ordering::Relaxed);
                stats
                    .virtual_counts
                    .fetch_add(sample.nr_virt_counts as u64, Ordering::Relaxed);

                module.on_switch_out(prof, cpu);
            }
        }

        for prof in threads.iter_mut().rev() {
            module.on_exit(prof);
            module.on_free_task(prof);
        }

        if (p + 1) % 10 == 0 {
            kinfo!("cpu {}: {}/{} processes done", cpu.0, p + 1, processes);
        }
    }
}
