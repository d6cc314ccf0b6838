//! # LOAM Pre-generation Tool
//!
//! Generates a square region around the origin and reports pipeline and
//! provider statistics.
//!
//! ## Usage
//!
//! ```bash
//! loam_pregen --config config/world.toml --radius 8 --deflate
//! RUST_LOG=loam_pipeline=debug loam_pregen --seed abc --radius 2
//! ```

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use loam::{ConfigResult, World, WorldConfig};
use loam_pipeline::{RequestOutcome, TargetStage};
use loam_procedural::ChunkPos;
use tracing_subscriber::EnvFilter;

/// Pre-generate a region of a LOAM world.
#[derive(Parser, Debug)]
#[command(name = "loam_pregen", version, about)]
struct Args {
    /// World config file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Seed text, overriding the config.
    #[arg(short, long)]
    seed: Option<String>,

    /// Horizontal radius in chunks around the origin.
    #[arg(short, long, default_value_t = 4)]
    radius: i32,

    /// Compact chunks once complete.
    #[arg(short, long)]
    deflate: bool,

    /// Worker threads, overriding the config (0 = one per core).
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Default)]
struct Tally {
    reached: usize,
    absent: usize,
    failed: usize,
    cancelled: usize,
}

fn load_config(args: &Args) -> ConfigResult<WorldConfig> {
    let mut config = match &args.config {
        Some(path) => WorldConfig::load(path)?,
        None => WorldConfig::default(),
    };
    if let Some(seed) = &args.seed {
        config.seed.clone_from(seed);
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_threads = workers;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> ConfigResult<Tally> {
    let mut world = World::new(load_config(args)?)?;
    let target = if args.deflate {
        TargetStage::Deflated
    } else {
        TargetStage::Complete
    };

    let start = Instant::now();
    let requests = world.request_area(ChunkPos::new(0, 0, 0), args.radius, target);
    tracing::info!("requested {} chunks to {target:?}", requests.len());

    let mut tally = Tally::default();
    for request in &requests {
        match request.wait() {
            RequestOutcome::Reached(_) => tally.reached += 1,
            RequestOutcome::Absent => tally.absent += 1,
            RequestOutcome::Cancelled => tally.cancelled += 1,
            RequestOutcome::Failed(e) => {
                tracing::error!("{} failed: {e}", request.position());
                tally.failed += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    let stats = world.pipeline().stats();
    let storage = world.provider().stats();
    tracing::info!(
        "done in {:.2}s: {} reached, {} absent, {} failed, {} cancelled ({:.0} chunks/s)",
        elapsed.as_secs_f64(),
        tally.reached,
        tally.absent,
        tally.failed,
        tally.cancelled,
        tally.reached as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    tracing::info!(
        "tasks: {} generate, {} post-process, {} deflate, {} skipped, {} failed, {} events dropped",
        stats.generated,
        stats.post_processed,
        stats.deflated,
        stats.skipped,
        stats.failed,
        stats.events_dropped
    );
    tracing::info!(
        "storage: {} resident, {} complete, {} deflated, {} evicted",
        storage.resident,
        storage.complete,
        storage.deflated,
        storage.evicted
    );

    world.shutdown();
    Ok(tally)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(tally) if tally.failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(2)
        }
    }
}
