//! Headless N-body driver
//!
//! Builds the engine, loads or generates a particle set and ticks it, logging
//! a status line once per second. With `--benchmark` it runs the throughput
//! sweep instead and writes the CSV tables.

use glam::Vec3;
use nbody_physics::{DEFAULT_EXTENT, DEFAULT_MASS, DEFAULT_PARTICLE_COUNT};
use nbody_simulation::{
    benchmark, BenchmarkPlan, ExecutionMode, GpuContext, OptimizationLevel, SimConfig, SimError,
    Simulation,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const USAGE: &str = "\
usage: nbody [options]

  --cpu                 run on the host only
  --dataset PATH        load particles from PATH (mass px py pz vx vy vz per line)
  --particles N         generate N particles (default 16384)
  --ticks N             stop after N ticks (default: run until interrupted)
  --group-index I       work-group size 2^I for the GPU kernel (default 7)
  --optimization L      0 naive, 1 shared memory, 2 shared memory + unrolled
  --benchmark DIR       run the benchmark sweep and write CSV tables to DIR";

#[derive(Debug, Default)]
struct Options {
    cpu: bool,
    dataset: Option<PathBuf>,
    particles: Option<usize>,
    ticks: Option<u64>,
    group_index: Option<u32>,
    optimization: Option<OptimizationLevel>,
    benchmark: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or_else(|| format!("{name} needs a value"));
        match arg.as_str() {
            "--cpu" => options.cpu = true,
            "--dataset" => options.dataset = Some(PathBuf::from(value("--dataset")?)),
            "--particles" => options.particles = Some(parse_number(&value("--particles")?)?),
            "--ticks" => options.ticks = Some(parse_number(&value("--ticks")?)?),
            "--group-index" => options.group_index = Some(parse_number(&value("--group-index")?)?),
            "--optimization" => {
                let level: u32 = parse_number(&value("--optimization")?)?;
                options.optimization = Some(
                    OptimizationLevel::try_from(level)
                        .map_err(|l| format!("unknown optimization level {l}"))?,
                );
            }
            "--benchmark" => options.benchmark = Some(PathBuf::from(value("--benchmark")?)),
            "-h" | "--help" => return Err(String::new()),
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(options)
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, String> {
    text.parse().map_err(|_| format!("`{text}` is not a valid number"))
}

fn build_simulation(options: &Options) -> Result<Simulation, SimError> {
    let mut config = SimConfig::default();
    if let Some(level) = options.optimization {
        config.params.optimization = level;
    }
    if let Some(index) = options.group_index {
        config.group_index = index;
    }

    if options.cpu {
        config.start_mode = ExecutionMode::Cpu;
        return Simulation::new(config);
    }

    match GpuContext::blocking() {
        Ok(ctx) => Simulation::with_gpu(ctx, config),
        Err(e) => {
            log::warn!("GPU unavailable ({e}), running on the CPU");
            config.start_mode = ExecutionMode::Cpu;
            Simulation::new(config)
        }
    }
}

fn run(options: Options) -> Result<(), SimError> {
    let mut sim = build_simulation(&options)?;

    match &options.dataset {
        Some(path) => sim.load_dataset(path)?,
        None => sim.generate_uniform(
            options.particles.unwrap_or(DEFAULT_PARTICLE_COUNT),
            DEFAULT_MASS,
            Vec3::splat(DEFAULT_EXTENT),
        )?,
    }

    if let Some(dir) = &options.benchmark {
        let report = benchmark::run(&mut sim, &BenchmarkPlan::default())?;
        for path in report.write_csv(dir)? {
            log::info!("Wrote {}", path.display());
        }
        return Ok(());
    }

    sim.play_pause();
    let mut ticks = 0u64;
    let mut frames = 0u32;
    let mut last_report = Instant::now();

    while options.ticks.is_none_or(|limit| ticks < limit) {
        sim.tick()?;
        sim.synchronize()?;
        ticks += 1;
        frames += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            log::info!(
                "FPS: {frames}   Particles: {}   Group size: {}   Status: running on {}",
                sim.particle_count(),
                sim.group_size(),
                sim.mode()
            );
            frames = 0;
            last_report = Instant::now();
        }
    }

    log::info!("Stopped after {ticks} ticks");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}\n");
            }
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(options) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
