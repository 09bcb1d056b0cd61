//! Simulation engine
//!
//! Owns the initial particle set and exactly one live representation of it:
//! a host vector in CPU mode, or a pair of device buffers in GPU mode. Mode
//! switches transcode the live state losslessly between the two.
//!
//! Velocities are leapfrog-staggered. After a reset the host path applies the
//! half kick lazily on the first tick, from the live set. The device path
//! computes the half kick once per loaded set, caches the result, and uploads
//! the cached state on every later reset.

use crate::{
    Bindable, ExecutionMode, GpuBuffer, GpuContext, KernelProgram, KernelTemplate,
    OptimizationLevel, ParamValue, ProgramTarget, SimConfig, SimError, SimParams, StageKind,
    StepInputs,
};
use glam::Vec3;
use nbody_physics::{
    half_kick, leapfrog_step, pack, unpack, Particle, PositionMass, VelocityRecord,
};
use nbody_shadergen::ShaderTemplate;
use rand::Rng;
use std::path::Path;

/// Storage slot of the position/mass records
pub const POSITION_SLOT: u32 = 0;
/// Storage slot of the velocity records
pub const VELOCITY_SLOT: u32 = 1;

const HALF_STEP_GROUP_SIZE: u32 = 128;

/// Leapfrog kernel template, expanded once per work-group size
pub const LEAPFROG_TEMPLATE: &str = include_str!("shaders/leapfrog.wgsl");
/// Half-kick kernel, fixed work-group size
pub const HALF_STEP_SOURCE: &str = include_str!("shaders/half_step.wgsl");

/// The authoritative particle state
pub enum LiveState {
    Cpu {
        particles: Vec<Particle>,
        /// Velocities still sit at t0 and need the first half kick
        pending_half_step: bool,
    },
    Gpu {
        positions: GpuBuffer<PositionMass>,
        velocities: GpuBuffer<VelocityRecord>,
        pending_half_step: bool,
    },
}

impl LiveState {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Cpu { .. } => ExecutionMode::Cpu,
            Self::Gpu { .. } => ExecutionMode::Gpu,
        }
    }
}

/// Everything needed to put an engine back the way it was
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub params: SimParams,
    pub group_index: u32,
    pub mode: ExecutionMode,
    pub initial: Vec<Particle>,
    pub gpu_initial: Option<Vec<Particle>>,
}

struct GpuKernels {
    ctx: GpuContext,
    /// Variant `i` runs work-groups of `2^i`
    variants: Vec<KernelProgram<StepInputs>>,
    half_step: KernelProgram<StepInputs>,
}

impl GpuKernels {
    fn build(ctx: GpuContext, config: &SimConfig) -> Result<Self, SimError> {
        let template = match &config.template {
            KernelTemplate::Embedded => ShaderTemplate::parse(LEAPFROG_TEMPLATE)?,
            KernelTemplate::File(path) => ShaderTemplate::from_file(path)?,
        };

        let max_group_size = ctx.max_group_size();
        let mut variants = Vec::new();
        for (index, source) in template.variants(config.variant_count)?.into_iter().enumerate() {
            let size = ShaderTemplate::group_size(index as u32);
            if size > max_group_size {
                log::warn!(
                    "Skipping kernel variants from size {size}: device allows at most {max_group_size}"
                );
                break;
            }

            let mut program = KernelProgram::new(format!("Leapfrog {size}"));
            program.attach_stage(StageKind::Compute, source);
            program.finalize(&ctx, ProgramTarget::Compute)?;
            bind_step_parameters(&mut program)?;
            program.bind_parameter("optimization", |s: &StepInputs| {
                ParamValue::U32(s.params.optimization as u32)
            })?;
            variants.push(program);
        }
        log::info!("Compiled {} leapfrog kernel variants", variants.len());

        let mut half_step = KernelProgram::new("Half Step");
        half_step.attach_stage(StageKind::Compute, HALF_STEP_SOURCE);
        half_step.finalize(&ctx, ProgramTarget::Compute)?;
        bind_step_parameters(&mut half_step)?;

        Ok(Self {
            ctx,
            variants,
            half_step,
        })
    }

    fn allocate_buffers(&self) -> (GpuBuffer<PositionMass>, GpuBuffer<VelocityRecord>) {
        (
            GpuBuffer::allocate(&self.ctx, "Position Buffer", POSITION_SLOT),
            GpuBuffer::allocate(&self.ctx, "Velocity Buffer", VELOCITY_SLOT),
        )
    }

    fn allocate_live(&self) -> LiveState {
        let (positions, velocities) = self.allocate_buffers();
        LiveState::Gpu {
            positions,
            velocities,
            pending_half_step: false,
        }
    }

    fn check_step(&self, group_index: u32, count: u32) -> Result<(), SimError> {
        if group_index as usize >= self.variants.len() {
            return Err(SimError::GroupIndexOutOfRange {
                index: group_index,
                max: self.variants.len() as u32,
            });
        }
        let group_size = ShaderTemplate::group_size(group_index);
        if count % group_size != 0 {
            return Err(SimError::GroupSizeMismatch { count, group_size });
        }
        Ok(())
    }

    fn dispatch_step(
        &self,
        group_index: u32,
        params: SimParams,
        positions: &GpuBuffer<PositionMass>,
        velocities: &GpuBuffer<VelocityRecord>,
    ) -> Result<(), SimError> {
        let count = positions.len() as u32;
        self.check_step(group_index, count)?;
        let buffers: [&dyn Bindable; 2] = [positions, velocities];
        let inputs = StepInputs {
            params,
            body_count: count,
        };
        self.variants[group_index as usize].dispatch(
            &self.ctx,
            &inputs,
            &buffers,
            count / ShaderTemplate::group_size(group_index),
        )
    }

    fn dispatch_half_step(
        &self,
        params: SimParams,
        positions: &GpuBuffer<PositionMass>,
        velocities: &GpuBuffer<VelocityRecord>,
    ) -> Result<(), SimError> {
        let count = positions.len() as u32;
        if count == 0 {
            return Ok(());
        }
        let buffers: [&dyn Bindable; 2] = [positions, velocities];
        let inputs = StepInputs {
            params,
            body_count: count,
        };
        self.half_step.dispatch(
            &self.ctx,
            &inputs,
            &buffers,
            count.div_ceil(HALF_STEP_GROUP_SIZE),
        )
    }
}

fn bind_step_parameters(program: &mut KernelProgram<StepInputs>) -> Result<(), SimError> {
    program.bind_parameter("dt", |s: &StepInputs| ParamValue::F32(s.params.dt))?;
    program.bind_parameter("g", |s: &StepInputs| ParamValue::F32(s.params.g))?;
    program.bind_parameter("eps2", |s: &StepInputs| ParamValue::F32(s.params.eps2))?;
    program.bind_parameter("body_count", |s: &StepInputs| ParamValue::U32(s.body_count))?;
    Ok(())
}

/// Dual-mode N-body simulation
pub struct Simulation {
    params: SimParams,
    group_index: u32,
    variant_count: u32,
    paused: bool,
    initial: Vec<Particle>,
    /// Initial set after the device half kick, filled on the first GPU reset
    gpu_initial: Option<Vec<Particle>>,
    live: LiveState,
    gpu: Option<GpuKernels>,
}

impl Simulation {
    /// Host-only engine. GPU mode is unavailable.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        if config.start_mode == ExecutionMode::Gpu {
            log::warn!("No GPU attached, starting in CPU mode");
        }
        check_group_index(config.group_index, config.variant_count)?;

        Ok(Self {
            params: config.params,
            group_index: config.group_index,
            variant_count: config.variant_count,
            paused: true,
            initial: Vec::new(),
            gpu_initial: None,
            live: LiveState::Cpu {
                particles: Vec::new(),
                pending_half_step: true,
            },
            gpu: None,
        })
    }

    /// Engine with both paths. Generates and compiles every kernel variant the
    /// device can run.
    pub fn with_gpu(ctx: GpuContext, config: SimConfig) -> Result<Self, SimError> {
        log::info!("Initializing simulation...");
        let kernels = GpuKernels::build(ctx, &config)?;
        let variant_count = kernels.variants.len() as u32;
        check_group_index(config.group_index, variant_count)?;

        let live = match config.start_mode {
            ExecutionMode::Gpu => kernels.allocate_live(),
            ExecutionMode::Cpu => LiveState::Cpu {
                particles: Vec::new(),
                pending_half_step: true,
            },
        };

        Ok(Self {
            params: config.params,
            group_index: config.group_index,
            variant_count,
            paused: true,
            initial: Vec::new(),
            gpu_initial: None,
            live,
            gpu: Some(kernels),
        })
    }

    /// Load a dataset file. On failure the current state is left untouched.
    pub fn load_dataset(&mut self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let path = path.as_ref();
        let particles = nbody_physics::load_dataset(path)
            .inspect_err(|e| log::error!("Failed to load dataset {}: {e}", path.display()))?;
        log::info!("Loaded {} particles from {}", particles.len(), path.display());
        self.replace_particles(particles)
    }

    /// `count` particles of mass `mass`, uniformly placed in a box centred on
    /// the origin
    pub fn generate_uniform(&mut self, count: usize, mass: f32, extent: Vec3) -> Result<(), SimError> {
        self.generate_uniform_with(&mut rand::rng(), count, mass, extent)
    }

    pub fn generate_uniform_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        count: usize,
        mass: f32,
        extent: Vec3,
    ) -> Result<(), SimError> {
        let particles = nbody_physics::generate_uniform(rng, count, mass, extent);
        log::info!("Generated {count} particles in a {extent} box");
        self.replace_particles(particles)
    }

    /// Make `particles` the new initial set, pause and reset
    pub fn replace_particles(&mut self, particles: Vec<Particle>) -> Result<(), SimError> {
        self.initial = particles;
        self.gpu_initial = None;
        self.reset()
    }

    /// Copy the initial set into the live representation and pause
    pub fn reset(&mut self) -> Result<(), SimError> {
        self.paused = true;

        match &mut self.live {
            LiveState::Cpu {
                particles,
                pending_half_step,
            } => {
                particles.clone_from(&self.initial);
                *pending_half_step = true;
            }
            LiveState::Gpu {
                positions,
                velocities,
                pending_half_step,
            } => {
                let gpu = self.gpu.as_ref().ok_or(SimError::GpuUnavailable)?;
                let (p, v) = pack(self.gpu_initial.as_deref().unwrap_or(&self.initial));
                positions.upload(&gpu.ctx, &p);
                velocities.upload(&gpu.ctx, &v);

                if self.gpu_initial.is_none() {
                    gpu.dispatch_half_step(self.params, positions, velocities)?;
                    let kicked = velocities.download(&gpu.ctx)?;
                    self.gpu_initial = Some(unpack(&p, &kicked));
                    log::debug!("Cached half-stepped initial set ({} particles)", p.len());
                }
                *pending_half_step = false;
            }
        }

        log::debug!("Reset {} particles in {} mode", self.initial.len(), self.mode());
        Ok(())
    }

    /// Advance one time step. Does nothing while paused.
    pub fn tick(&mut self) -> Result<(), SimError> {
        if self.paused {
            return Ok(());
        }
        let params = self.params;

        match &mut self.live {
            LiveState::Cpu {
                particles,
                pending_half_step,
            } => {
                if *pending_half_step {
                    half_kick(particles, params.dt, params.gravity());
                    *pending_half_step = false;
                }
                leapfrog_step(particles, params.dt, params.gravity());
            }
            LiveState::Gpu {
                positions,
                velocities,
                pending_half_step,
            } => {
                let gpu = self.gpu.as_ref().ok_or(SimError::GpuUnavailable)?;
                if positions.is_empty() {
                    return Ok(());
                }
                gpu.check_step(self.group_index, positions.len() as u32)?;
                if *pending_half_step {
                    gpu.dispatch_half_step(params, positions, velocities)?;
                    *pending_half_step = false;
                }
                gpu.dispatch_step(self.group_index, params, positions, velocities)?;
            }
        }
        Ok(())
    }

    /// Block until the device has finished all submitted work
    pub fn synchronize(&self) -> Result<(), SimError> {
        match &self.gpu {
            Some(gpu) => gpu.ctx.wait_idle(),
            None => Ok(()),
        }
    }

    pub fn play_pause(&mut self) {
        self.paused = !self.paused;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn mode(&self) -> ExecutionMode {
        self.live.mode()
    }

    /// Make `mode` authoritative, transcoding the live state into it
    pub fn set_mode(&mut self, mode: ExecutionMode) -> Result<(), SimError> {
        if self.mode() == mode {
            return Ok(());
        }
        let gpu = self.gpu.as_ref().ok_or(SimError::GpuUnavailable)?;

        let next = match &self.live {
            LiveState::Cpu {
                particles,
                pending_half_step,
            } => {
                let (p, v) = pack(particles);
                let (mut positions, mut velocities) = gpu.allocate_buffers();
                positions.upload(&gpu.ctx, &p);
                velocities.upload(&gpu.ctx, &v);
                LiveState::Gpu {
                    positions,
                    velocities,
                    pending_half_step: *pending_half_step,
                }
            }
            LiveState::Gpu {
                positions,
                velocities,
                pending_half_step,
            } => {
                let p = positions.download(&gpu.ctx)?;
                let v = velocities.download(&gpu.ctx)?;
                LiveState::Cpu {
                    particles: unpack(&p, &v),
                    pending_half_step: *pending_half_step,
                }
            }
        };

        self.live = next;
        log::info!("Switched to {mode} mode");
        Ok(())
    }

    pub fn toggle_mode(&mut self) -> Result<(), SimError> {
        match self.mode() {
            ExecutionMode::Cpu => self.set_mode(ExecutionMode::Gpu),
            ExecutionMode::Gpu => self.set_mode(ExecutionMode::Cpu),
        }
    }

    pub fn params(&self) -> SimParams {
        self.params
    }

    pub fn set_params(&mut self, params: SimParams) {
        self.params = params;
    }

    pub fn set_dt(&mut self, dt: f32) {
        self.params.dt = dt;
    }

    pub fn set_g(&mut self, g: f32) {
        self.params.g = g;
    }

    pub fn set_eps2(&mut self, eps2: f32) {
        self.params.eps2 = eps2;
    }

    pub fn set_optimization_level(&mut self, level: OptimizationLevel) {
        self.params.optimization = level;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.params.opacity = opacity;
    }

    /// Select kernel variant `index` (work-group size `2^index`)
    pub fn set_group_index(&mut self, index: u32) -> Result<(), SimError> {
        check_group_index(index, self.variant_count)?;
        self.group_index = index;
        Ok(())
    }

    pub fn group_index(&self) -> u32 {
        self.group_index
    }

    pub fn group_size(&self) -> u32 {
        ShaderTemplate::group_size(self.group_index)
    }

    /// Number of selectable variants; valid indices are `0..variant_count()`
    pub fn variant_count(&self) -> u32 {
        self.variant_count
    }

    pub fn particle_count(&self) -> usize {
        self.initial.len()
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn gpu_context(&self) -> Option<&GpuContext> {
        self.gpu.as_ref().map(|gpu| &gpu.ctx)
    }

    pub fn initial_particles(&self) -> &[Particle] {
        &self.initial
    }

    /// The cached device half-stepped initial set, once computed
    pub fn gpu_initial_particles(&self) -> Option<&[Particle]> {
        self.gpu_initial.as_deref()
    }

    /// Live host particles, in CPU mode
    pub fn cpu_particles(&self) -> Option<&[Particle]> {
        match &self.live {
            LiveState::Cpu { particles, .. } => Some(particles),
            LiveState::Gpu { .. } => None,
        }
    }

    /// Live device buffers, in GPU mode
    pub fn device_buffers(&self) -> Option<(&GpuBuffer<PositionMass>, &GpuBuffer<VelocityRecord>)> {
        match &self.live {
            LiveState::Gpu {
                positions,
                velocities,
                ..
            } => Some((positions, velocities)),
            LiveState::Cpu { .. } => None,
        }
    }

    /// Snapshot of the live state, reading back from the device in GPU mode
    pub fn particles(&self) -> Result<Vec<Particle>, SimError> {
        match &self.live {
            LiveState::Cpu { particles, .. } => Ok(particles.clone()),
            LiveState::Gpu {
                positions,
                velocities,
                ..
            } => {
                let gpu = self.gpu.as_ref().ok_or(SimError::GpuUnavailable)?;
                Ok(unpack(
                    &positions.download(&gpu.ctx)?,
                    &velocities.download(&gpu.ctx)?,
                ))
            }
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            params: self.params,
            group_index: self.group_index,
            mode: self.mode(),
            initial: self.initial.clone(),
            gpu_initial: self.gpu_initial.clone(),
        }
    }

    /// Put back a snapshot's configuration and particle set, then reset.
    /// On error the engine is left as it was.
    pub fn restore(&mut self, snapshot: EngineSnapshot) -> Result<(), SimError> {
        check_group_index(snapshot.group_index, self.variant_count)?;
        let live = if self.mode() == snapshot.mode {
            None
        } else {
            Some(match snapshot.mode {
                ExecutionMode::Cpu => LiveState::Cpu {
                    particles: Vec::new(),
                    pending_half_step: true,
                },
                ExecutionMode::Gpu => self
                    .gpu
                    .as_ref()
                    .ok_or(SimError::GpuUnavailable)?
                    .allocate_live(),
            })
        };

        self.params = snapshot.params;
        self.group_index = snapshot.group_index;
        self.initial = snapshot.initial;
        self.gpu_initial = snapshot.gpu_initial;
        if let Some(live) = live {
            self.live = live;
        }
        self.reset()
    }
}

fn check_group_index(index: u32, variant_count: u32) -> Result<(), SimError> {
    if index >= variant_count {
        return Err(SimError::GroupIndexOutOfRange {
            index,
            max: variant_count,
        });
    }
    Ok(())
}
