#![deny(missing_docs)]
//! # Benchmark Harness
//!
//! Generates seeded random square matrices, runs the block scheduler over
//! them a configurable number of times, and reports wall-clock timing. With
//! `--verify` the scheduled product is checked element-wise against the
//! reference triple-loop multiplication and every mismatch is reported.
//!
//! The GPU route runs against the in-process software backend unless
//! `--no-gpu` is given, so the full two-pool placement path is exercised on
//! any machine.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use blocksched::{
    GpuExecutor, KernelStrategy, Matrix, Scheduler, SchedulerConfig, SoftwareBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Block-scheduled matrix multiply benchmark")]
/// Command-line arguments for the benchmark harness.
struct Args {
    /// Matrix dimension (must be a multiple of the block size)
    #[arg(long, default_value = "1280")]
    dimension: usize,

    /// Number of timed scheduler runs
    #[arg(long, default_value = "10")]
    runs: usize,

    /// Block side length
    #[arg(long, default_value = "64")]
    block_size: usize,

    /// CPU pool worker count (0 = auto)
    #[arg(long, default_value = "0")]
    cpu_threads: usize,

    /// CPU pool queue capacity (0 = same as worker count)
    #[arg(long, default_value = "0")]
    queue_capacity: usize,

    /// GPU route queue capacity
    #[arg(long, default_value = "1")]
    gpu_queue: usize,

    /// Kernel strategy (naive, strassen)
    #[arg(long, default_value = "naive")]
    strategy: String,

    /// Seed for matrix generation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Disable the GPU route entirely
    #[arg(long)]
    no_gpu: bool,

    /// Check the result against the reference product
    #[arg(long)]
    verify: bool,

    /// Output file for results (JSON)
    #[arg(long)]
    out: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // Don't show module target
        .init();

    let strategy = match args.strategy.as_str() {
        "naive" => KernelStrategy::Naive,
        "strassen" => KernelStrategy::Strassen,
        other => {
            warn!("[BENCH:INIT] Unknown strategy '{}', using naive", other);
            KernelStrategy::Naive
        }
    };

    let mut config = SchedulerConfig::default()
        .with_block_size(args.block_size)
        .with_strategy(strategy);
    if args.cpu_threads > 0 {
        config = config.with_cpu_threads(args.cpu_threads);
    }
    config = config.with_queue_capacity(if args.queue_capacity > 0 {
        args.queue_capacity
    } else {
        config.cpu_threads
    });

    info!("[BENCH:INIT] Starting benchmark (blocksched {})", blocksched::VERSION);
    info!(
        "[BENCH:INIT] Dimension: {}, Block size: {}, Runs: {}",
        args.dimension, args.block_size, args.runs
    );
    info!(
        "[BENCH:INIT] CPU threads: {}, Queue: {}, Strategy: {:?}, GPU: {}",
        config.cpu_threads,
        config.queue_capacity,
        strategy,
        if args.no_gpu { "disabled" } else { "software" }
    );

    info!("[BENCH:GEN] Generating input matrices (seed {})", args.seed);
    let a = Matrix::random(args.dimension, args.seed);
    let b = Matrix::random(args.dimension, args.seed.wrapping_add(1));

    let gpu = if args.no_gpu {
        None
    } else {
        Some(GpuExecutor::start(
            Arc::new(SoftwareBackend::new()),
            args.gpu_queue,
        ))
    };

    let mut scheduler =
        Scheduler::new(&a, &b, config).context("failed to create scheduler")?;

    info!("[BENCH:RUN] Running scheduler {} times", args.runs);
    let start = Instant::now();
    for run in 0..args.runs {
        scheduler
            .run(gpu.as_ref())
            .with_context(|| format!("scheduler run {} failed", run))?;
    }
    let elapsed = start.elapsed();
    let per_run_ms = elapsed.as_secs_f64() * 1000.0 / args.runs as f64;

    let stats = scheduler.last_run_stats();
    info!(
        "[BENCH:RUN] Scheduled product: {:.2} ms/run over {} runs",
        per_run_ms, args.runs
    );
    info!(
        "[BENCH:RUN] Last run: {} groups, {} jobs ({} cpu, {} gpu, {} retries)",
        stats.groups_created, stats.jobs_dispatched, stats.cpu_jobs, stats.gpu_jobs,
        stats.placement_retries
    );
    if let Some(gpu) = gpu.as_ref() {
        let route = gpu.stats();
        info!(
            "[BENCH:RUN] GPU route: {} blocks executed, {} fallbacks, degraded: {}",
            route.executed,
            route.fallbacks,
            gpu.is_degraded()
        );
    }

    let mut reference_ms = None;
    let mut mismatches = 0usize;
    if args.verify {
        info!("[BENCH:VERIFY] Computing reference product");
        let ref_start = Instant::now();
        let expected = a.multiply_reference(&b);
        reference_ms = Some(ref_start.elapsed().as_secs_f64() * 1000.0);

        info!("[BENCH:VERIFY] Comparing results");
        for y in 0..args.dimension {
            for x in 0..args.dimension {
                let want = expected.get(y, x);
                let got = scheduler.output().get(y, x);
                if want != got {
                    if mismatches < 10 {
                        warn!(
                            "[BENCH:VERIFY] Mismatch at ({}, {}): expected {} actual {}",
                            x, y, want, got
                        );
                    }
                    mismatches += 1;
                }
            }
        }
        if mismatches == 0 {
            info!("[BENCH:VERIFY] Results match the reference");
        } else {
            warn!("[BENCH:VERIFY] {} mismatching elements", mismatches);
        }
        if let Some(ref_ms) = reference_ms {
            info!("[BENCH:VERIFY] Reference product took {:.2} ms", ref_ms);
        }
    }

    if let Some(ref out_file) = args.out {
        save_results(out_file, &args, per_run_ms, reference_ms, mismatches, &stats)?;
    }

    if let Some(gpu) = gpu {
        info!("[BENCH:DONE] Shutting the GPU route down");
        gpu.shutdown().context("GPU route shutdown failed")?;
    }
    info!("[BENCH:DONE] Finished");

    if mismatches > 0 {
        anyhow::bail!("{} mismatching elements against the reference", mismatches);
    }
    Ok(())
}

fn save_results(
    path: &str,
    args: &Args,
    per_run_ms: f64,
    reference_ms: Option<f64>,
    mismatches: usize,
    stats: &blocksched::RunStats,
) -> Result<()> {
    use serde_json::json;
    use std::fs::File;
    use std::io::Write;

    let results = json!({
        "bench": {
            "dimension": args.dimension,
            "block_size": args.block_size,
            "runs": args.runs,
            "strategy": args.strategy,
            "seed": args.seed,
            "gpu_enabled": !args.no_gpu,
            "per_run_ms": per_run_ms,
            "reference_ms": reference_ms,
            "mismatches": mismatches,
            "last_run": stats,
        }
    });

    let mut file = File::create(path).with_context(|| format!("cannot create {}", path))?;
    writeln!(file, "{}", serde_json::to_string_pretty(&results)?)?;
    info!("[BENCH:DONE] Saved results to {}", path);

    Ok(())
}
