//! Engine tests that need a GPU adapter. Each test skips when none is found.

use glam::Vec3;
use nbody_physics::{half_kick, Particle};
use nbody_simulation::{
    benchmark, gpu_available, BenchmarkPlan, ExecutionMode, GpuBuffer, GpuContext, KernelProgram,
    OptimizationLevel, ParamValue, ProgramTarget, SimConfig, SimError, Simulation, StageKind,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn gpu_sim(start_mode: ExecutionMode) -> Option<Simulation> {
    if !gpu_available() {
        eprintln!("Skipping: no GPU adapter available");
        return None;
    }
    let ctx = GpuContext::blocking().unwrap();
    let config = SimConfig {
        start_mode,
        ..Default::default()
    };
    Some(Simulation::with_gpu(ctx, config).unwrap())
}

fn seeded(sim: &mut Simulation, count: usize, mass: f32) {
    let mut rng = StdRng::seed_from_u64(11);
    sim.generate_uniform_with(&mut rng, count, mass, Vec3::splat(2.0))
        .unwrap();
}

fn assert_close(a: &[Particle], b: &[Particle], tolerance: f32) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert_eq!(x.mass, y.mass, "mass of particle {i}");
        assert!(
            (x.position - y.position).abs().max_element() <= tolerance,
            "position of particle {i}: {} vs {}",
            x.position,
            y.position
        );
        assert!(
            (x.velocity - y.velocity).abs().max_element() <= tolerance,
            "velocity of particle {i}: {} vs {}",
            x.velocity,
            y.velocity
        );
    }
}

#[test]
fn test_toggle_twice_is_lossless() {
    let Some(mut sim) = gpu_sim(ExecutionMode::Cpu) else {
        return;
    };
    seeded(&mut sim, 256, 1.0);

    sim.toggle_mode().unwrap();
    assert_eq!(sim.mode(), ExecutionMode::Gpu);
    sim.toggle_mode().unwrap();
    assert_eq!(sim.mode(), ExecutionMode::Cpu);

    assert_eq!(sim.cpu_particles().unwrap(), sim.initial_particles());
}

#[test]
fn test_round_trip_matches_direct_upload() {
    let Some(mut sim) = gpu_sim(ExecutionMode::Gpu) else {
        return;
    };
    seeded(&mut sim, 256, 1.0);
    let direct = sim.particles().unwrap();

    sim.toggle_mode().unwrap();
    sim.toggle_mode().unwrap();
    assert_eq!(sim.particles().unwrap(), direct);
}

#[test]
fn test_reset_uses_cached_half_step() {
    let Some(mut sim) = gpu_sim(ExecutionMode::Gpu) else {
        return;
    };
    seeded(&mut sim, 200, 0.01);

    let cached = sim.gpu_initial_particles().unwrap().to_vec();
    let mut expected = sim.initial_particles().to_vec();
    half_kick(&mut expected, sim.params().dt, sim.params().gravity());
    assert_close(&cached, &expected, 1e-5);

    // The device holds the cached state, both now and after a reset.
    assert_eq!(sim.particles().unwrap(), cached);
    sim.set_group_index(3).unwrap();
    sim.play_pause();
    sim.tick().unwrap();
    sim.reset().unwrap();
    assert_eq!(sim.particles().unwrap(), cached);
}

#[test]
fn test_gpu_steps_track_cpu_steps() {
    for level in OptimizationLevel::ALL {
        let Some(mut gpu) = gpu_sim(ExecutionMode::Gpu) else {
            return;
        };
        let mut cpu = Simulation::new(SimConfig {
            start_mode: ExecutionMode::Cpu,
            ..Default::default()
        })
        .unwrap();

        for sim in [&mut gpu, &mut cpu] {
            seeded(sim, 256, 0.01);
            sim.set_optimization_level(level);
            sim.set_group_index(6).unwrap();
            sim.play_pause();
            for _ in 0..5 {
                sim.tick().unwrap();
            }
        }

        assert_close(
            &gpu.particles().unwrap(),
            cpu.cpu_particles().unwrap(),
            1e-3,
        );
    }
}

#[test]
fn test_group_size_must_divide_count() {
    let Some(mut sim) = gpu_sim(ExecutionMode::Gpu) else {
        return;
    };
    seeded(&mut sim, 100, 1.0);
    sim.set_group_index(3).unwrap();
    sim.play_pause();

    let before = sim.particles().unwrap();
    assert!(matches!(
        sim.tick(),
        Err(SimError::GroupSizeMismatch {
            count: 100,
            group_size: 8
        })
    ));
    assert_eq!(sim.particles().unwrap(), before);

    sim.set_group_index(2).unwrap();
    sim.tick().unwrap();
}

#[test]
fn test_program_parameter_and_binding_errors() {
    if !gpu_available() {
        eprintln!("Skipping: no GPU adapter available");
        return;
    }
    let ctx = GpuContext::blocking().unwrap();

    let source = r#"
struct Params {
    scale: f32,
}

@group(0) @binding(0) var<storage, read_write> values: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    values[id.x] = values[id.x] * params.scale;
}
"#;

    let mut program: KernelProgram<f32> = KernelProgram::new("Scale");
    program.attach_stage(StageKind::Compute, source);
    program.finalize(&ctx, ProgramTarget::Compute).unwrap();

    assert!(matches!(
        program.bind_parameter("missing", |_| ParamValue::F32(0.0)),
        Err(SimError::UnknownParameter { .. })
    ));
    program
        .bind_parameter("scale", |s: &f32| ParamValue::F32(*s))
        .unwrap();

    assert!(matches!(
        program.dispatch(&ctx, &2.0, &[], 1),
        Err(SimError::MissingBinding { slot: 0, .. })
    ));

    let mut values: GpuBuffer<f32> = GpuBuffer::allocate(&ctx, "Values", 0);
    values.upload(&ctx, &[1.0, 2.0, 3.0, 4.0]);
    program.dispatch(&ctx, &2.0, &[&values], 1).unwrap();
    assert_eq!(values.download(&ctx).unwrap(), vec![2.0, 4.0, 6.0, 8.0]);

    // Values are re-read on every dispatch.
    program.dispatch(&ctx, &0.5, &[&values], 1).unwrap();
    assert_eq!(values.download(&ctx).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

    let mut wrong_type: KernelProgram<f32> = KernelProgram::new("Scale");
    wrong_type.attach_stage(StageKind::Compute, source);
    wrong_type.finalize(&ctx, ProgramTarget::Compute).unwrap();
    wrong_type
        .bind_parameter("scale", |_| ParamValue::U32(1))
        .unwrap();
    assert!(matches!(
        wrong_type.dispatch(&ctx, &1.0, &[&values], 1),
        Err(SimError::ParameterType { .. })
    ));
}

#[test]
fn test_compile_failure_blocks_dispatch() {
    if !gpu_available() {
        eprintln!("Skipping: no GPU adapter available");
        return;
    }
    let ctx = GpuContext::blocking().unwrap();

    let mut program: KernelProgram<()> = KernelProgram::new("Broken");
    program.attach_stage(StageKind::Compute, "@compute fn main() { let x = ; }");
    assert!(matches!(
        program.finalize(&ctx, ProgramTarget::Compute),
        Err(SimError::Compile { .. })
    ));
    assert!(matches!(
        program.dispatch(&ctx, &(), &[], 1),
        Err(SimError::NotLinked { .. })
    ));
}

#[test]
fn test_benchmark_restores_cpu_mode_after_gpu_sweep() {
    let Some(mut sim) = gpu_sim(ExecutionMode::Cpu) else {
        return;
    };
    seeded(&mut sim, 32, 1.0);
    sim.set_dt(0.125);
    sim.set_group_index(5).unwrap();
    let before = sim.snapshot();

    let plan = BenchmarkPlan {
        duration: Duration::from_millis(20),
        cpu_counts: vec![8],
        gpu_counts: vec![64],
        group_indices: vec![3],
        ..Default::default()
    };
    let report = benchmark::run(&mut sim, &plan).unwrap();

    let sweep = report.gpu.unwrap();
    assert_eq!(sweep.group_sizes, vec![8]);
    assert!(sweep.rows[0].1[0].is_some());

    assert_eq!(sim.mode(), ExecutionMode::Cpu);
    assert!(sim.is_paused());
    assert_eq!(sim.snapshot(), before);
    assert_eq!(sim.cpu_particles().unwrap(), before.initial.as_slice());
}

#[test]
fn test_dispatch_beyond_device_limit_is_rejected() {
    if !gpu_available() {
        eprintln!("Skipping: no GPU adapter available");
        return;
    }
    let ctx = GpuContext::blocking().unwrap();

    let source = r#"
@group(0) @binding(0) var<storage, read_write> values: array<f32>;

@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    values[id.x] = 1.0;
}
"#;
    let mut program: KernelProgram<()> = KernelProgram::new("Fill");
    program.attach_stage(StageKind::Compute, source);
    program.finalize(&ctx, ProgramTarget::Compute).unwrap();

    let mut values: GpuBuffer<f32> = GpuBuffer::allocate(&ctx, "Values", 0);
    values.upload(&ctx, &[0.0; 4]);

    let max = ctx.limits().max_compute_workgroups_per_dimension;
    let result = program.dispatch(&ctx, &(), &[&values], max + 1);
    assert!(matches!(
        result,
        Err(SimError::DispatchTooLarge { groups, max: limit }) if groups == max + 1 && limit == max
    ));

    program.dispatch(&ctx, &(), &[&values], 4).unwrap();
    assert_eq!(values.download(&ctx).unwrap(), vec![1.0; 4]);
}
