//! Point rendering of the live particle set

use glam::Mat4;
use nbody_physics::PositionMass;
use nbody_simulation::{
    GpuBuffer, GpuContext, KernelProgram, ParamValue, ProgramTarget, SimError, Simulation,
    StageKind, POSITION_SLOT,
};

pub const POINTS_SOURCE: &str = include_str!("shaders/points.wgsl");

/// Per-frame values pushed to the point program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub view_proj: Mat4,
    pub opacity: f32,
}

pub struct PointRenderer {
    ctx: GpuContext,
    program: KernelProgram<FrameParams>,
    /// Host positions re-uploaded each frame while the simulation runs on the CPU
    host_positions: GpuBuffer<PositionMass>,
}

impl PointRenderer {
    pub fn new(ctx: &GpuContext, format: wgpu::TextureFormat) -> Result<Self, SimError> {
        let mut program = KernelProgram::new("Points");
        program
            .attach_stage(StageKind::Vertex, POINTS_SOURCE)
            .attach_stage(StageKind::Fragment, POINTS_SOURCE);
        program.finalize(
            ctx,
            ProgramTarget::Render {
                format,
                topology: wgpu::PrimitiveTopology::PointList,
            },
        )?;
        program.bind_parameter("view_proj", |f: &FrameParams| ParamValue::Mat4(f.view_proj))?;
        program.bind_parameter("opacity", |f: &FrameParams| ParamValue::F32(f.opacity))?;

        log::debug!("Point renderer ready ({format:?})");

        Ok(Self {
            ctx: ctx.clone(),
            program,
            host_positions: GpuBuffer::allocate(ctx, "Host Position Buffer", POSITION_SLOT),
        })
    }

    /// Record a draw of every particle into `pass`, using the simulation's
    /// current opacity
    pub fn draw(
        &mut self,
        sim: &Simulation,
        view_proj: Mat4,
        pass: &mut wgpu::RenderPass<'_>,
    ) -> Result<(), SimError> {
        let frame = FrameParams {
            view_proj,
            opacity: sim.params().opacity,
        };

        let positions = match (sim.device_buffers(), sim.cpu_particles()) {
            (Some((positions, _)), _) => positions,
            (None, Some(particles)) => {
                let records: Vec<PositionMass> = particles.iter().map(PositionMass::from).collect();
                self.host_positions.upload(&self.ctx, &records);
                &self.host_positions
            }
            (None, None) => return Ok(()),
        };

        let count = positions.len() as u32;
        if count == 0 {
            return Ok(());
        }
        self.program
            .draw(&self.ctx, &frame, &[positions], pass, 0..count)
    }
}
