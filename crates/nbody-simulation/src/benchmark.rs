//! Throughput sweeps over particle counts and work-group sizes
//!
//! The engine's configuration and particle set are restored afterwards, also
//! when a run fails part way.

use crate::{ExecutionMode, OptimizationLevel, SimError, Simulation};
use glam::Vec3;
use nbody_physics::{BENCHMARK_DT, BENCHMARK_EPS2, BENCHMARK_EXTENT, BENCHMARK_G, BENCHMARK_MASS};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const CPU_CSV: &str = "benchmark_cpu.csv";
pub const GPU_CSV: &str = "benchmark_gpu.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkPlan {
    /// Wall-clock time per measured run
    pub duration: Duration,
    pub cpu_counts: Vec<usize>,
    pub gpu_counts: Vec<usize>,
    pub group_indices: Vec<u32>,
    pub dt: f32,
    pub g: f32,
    pub eps2: f32,
    pub mass: f32,
    pub extent: Vec3,
}

impl Default for BenchmarkPlan {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            cpu_counts: (7..=13).map(|p| 1 << p).collect(),
            gpu_counts: (10..=16).map(|p| 1 << p).collect(),
            group_indices: (3..=10).collect(),
            dt: BENCHMARK_DT,
            g: BENCHMARK_G,
            eps2: BENCHMARK_EPS2,
            mass: BENCHMARK_MASS,
            extent: Vec3::splat(BENCHMARK_EXTENT),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuSample {
    pub particles: usize,
    pub fps: f64,
}

/// Frame rates per particle count (rows) and work-group size (columns).
/// `None` marks combinations that could not run.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuSweep {
    pub group_sizes: Vec<u32>,
    pub rows: Vec<(usize, Vec<Option<f64>>)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BenchmarkReport {
    pub cpu: Vec<CpuSample>,
    /// Absent when the engine has no GPU
    pub gpu: Option<GpuSweep>,
}

impl BenchmarkReport {
    pub fn cpu_csv(&self) -> String {
        let mut out = String::from("particles,fps\n");
        for sample in &self.cpu {
            let _ = writeln!(out, "{},{:.2}", sample.particles, sample.fps);
        }
        out
    }

    pub fn gpu_csv(&self) -> Option<String> {
        let sweep = self.gpu.as_ref()?;
        let mut out = String::from("particles");
        for size in &sweep.group_sizes {
            let _ = write!(out, ",{size}");
        }
        out.push('\n');
        for (particles, cells) in &sweep.rows {
            let _ = write!(out, "{particles}");
            for cell in cells {
                match cell {
                    Some(fps) => {
                        let _ = write!(out, ",{fps:.2}");
                    }
                    None => out.push(','),
                }
            }
            out.push('\n');
        }
        Some(out)
    }

    /// Write both tables into `dir`, returning the files written
    pub fn write_csv(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, SimError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut written = Vec::new();
        let cpu_path = dir.join(CPU_CSV);
        std::fs::write(&cpu_path, self.cpu_csv())?;
        written.push(cpu_path);

        if let Some(table) = self.gpu_csv() {
            let gpu_path = dir.join(GPU_CSV);
            std::fs::write(&gpu_path, table)?;
            written.push(gpu_path);
        }
        Ok(written)
    }
}

/// Run the CPU sweep, then the GPU sweep if a device is attached. The engine
/// is restored to its prior state whatever the outcome.
pub fn run(sim: &mut Simulation, plan: &BenchmarkPlan) -> Result<BenchmarkReport, SimError> {
    log::info!("Benchmark started, the simulation is unavailable until it ends");
    let snapshot = sim.snapshot();

    let result = sweep(sim, plan);
    let restored = sim.restore(snapshot);

    let report = result?;
    restored?;
    log::info!("Benchmark finished");
    Ok(report)
}

fn sweep(sim: &mut Simulation, plan: &BenchmarkPlan) -> Result<BenchmarkReport, SimError> {
    let mut params = sim.params();
    params.dt = plan.dt;
    params.g = plan.g;
    params.eps2 = plan.eps2;
    params.optimization = OptimizationLevel::SharedMemory;
    sim.set_params(params);

    let mut report = BenchmarkReport::default();

    log::info!("CPU tests");
    sim.set_mode(ExecutionMode::Cpu)?;
    for (i, &count) in plan.cpu_counts.iter().enumerate() {
        log::info!("Test {} of {}: {count} particles", i + 1, plan.cpu_counts.len());
        sim.generate_uniform(count, plan.mass, plan.extent)?;
        let fps = measure(sim, plan.duration)?;
        report.cpu.push(CpuSample {
            particles: count,
            fps,
        });
    }

    if !sim.has_gpu() {
        log::warn!("No GPU attached, skipping GPU tests");
        return Ok(report);
    }

    log::info!("GPU tests");
    sim.set_mode(ExecutionMode::Gpu)?;
    let total = plan.gpu_counts.len() * plan.group_indices.len();
    let mut rows = Vec::with_capacity(plan.gpu_counts.len());
    for (i, &count) in plan.gpu_counts.iter().enumerate() {
        sim.generate_uniform(count, plan.mass, plan.extent)?;

        let mut cells = Vec::with_capacity(plan.group_indices.len());
        for (j, &index) in plan.group_indices.iter().enumerate() {
            log::info!(
                "Test {} of {total}: {count} particles, group size {}",
                i * plan.group_indices.len() + j + 1,
                1u32 << index
            );
            let size = 1usize << index;
            if index >= sim.variant_count() || count % size != 0 {
                log::warn!("Group size {size} cannot run {count} particles, skipped");
                cells.push(None);
                continue;
            }
            sim.set_group_index(index)?;
            sim.reset()?;
            cells.push(Some(measure(sim, plan.duration)?));
        }
        rows.push((count, cells));
    }

    report.gpu = Some(GpuSweep {
        group_sizes: plan.group_indices.iter().map(|&i| 1u32 << i).collect(),
        rows,
    });
    Ok(report)
}

/// Unpause and tick for `duration`, waiting for the device each frame.
/// Returns frames per second.
fn measure(sim: &mut Simulation, duration: Duration) -> Result<f64, SimError> {
    sim.set_paused(false);
    let start = Instant::now();
    let mut frames = 0u64;
    while start.elapsed() < duration {
        sim.tick()?;
        sim.synchronize()?;
        frames += 1;
    }
    sim.set_paused(true);
    Ok(frames as f64 / start.elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_plan() -> BenchmarkPlan {
        BenchmarkPlan {
            duration: Duration::from_millis(20),
            cpu_counts: vec![8, 16],
            gpu_counts: vec![64],
            group_indices: vec![3, 4],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_plan() {
        let plan = BenchmarkPlan::default();
        assert_eq!(plan.cpu_counts, vec![128, 256, 512, 1024, 2048, 4096, 8192]);
        assert_eq!(plan.gpu_counts.first(), Some(&1024));
        assert_eq!(plan.gpu_counts.last(), Some(&65536));
        assert_eq!(plan.group_indices, (3..=10).collect::<Vec<_>>());
        assert_eq!(plan.duration, Duration::from_secs(5));
    }

    #[test]
    fn test_restores_configuration_exactly() {
        let mut sim = Simulation::new(SimConfig {
            start_mode: ExecutionMode::Cpu,
            ..Default::default()
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        sim.generate_uniform_with(&mut rng, 10, 2.0, Vec3::ONE).unwrap();
        sim.set_dt(0.125);
        sim.set_eps2(0.5);
        sim.set_optimization_level(OptimizationLevel::Naive);
        sim.set_group_index(5).unwrap();
        let before = sim.snapshot();

        let report = run(&mut sim, &tiny_plan()).unwrap();

        assert_eq!(sim.snapshot(), before);
        assert_eq!(sim.cpu_particles().unwrap(), before.initial.as_slice());
        assert_eq!(report.cpu.len(), 2);
        assert_eq!(report.cpu[1].particles, 16);
        assert!(report.cpu.iter().all(|s| s.fps > 0.0));
        assert!(report.gpu.is_none());
    }

    #[test]
    fn test_csv_tables() {
        let report = BenchmarkReport {
            cpu: vec![CpuSample {
                particles: 128,
                fps: 60.0,
            }],
            gpu: Some(GpuSweep {
                group_sizes: vec![8, 16],
                rows: vec![(1024, vec![Some(120.5), None])],
            }),
        };
        assert_eq!(report.cpu_csv(), "particles,fps\n128,60.00\n");
        assert_eq!(
            report.gpu_csv().unwrap(),
            "particles,8,16\n1024,120.50,\n"
        );

        let dir = std::env::temp_dir().join(format!("nbody-bench-{}", std::process::id()));
        let written = report.write_csv(&dir).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.join(CPU_CSV)).unwrap(),
            report.cpu_csv()
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
