use glam::{Mat4, Vec3};
use nbody_renderer::{PointRenderer, POINTS_SOURCE};
use nbody_simulation::{
    compile_stage, gpu_available, uniform_layout, ExecutionMode, GpuContext, ParamKind,
    SimConfig, Simulation,
};

#[test]
fn test_points_shader_validates() {
    let module = compile_stage("points", POINTS_SOURCE).unwrap();
    let layout = uniform_layout(&module).unwrap();
    assert_eq!(layout.members["view_proj"].kind, Some(ParamKind::Mat4));
    assert_eq!(layout.members["opacity"].kind, Some(ParamKind::F32));
    assert_eq!(layout.members["opacity"].offset, 64);
}

#[test]
fn test_draws_in_both_modes() {
    if !gpu_available() {
        eprintln!("Skipping: no GPU adapter available");
        return;
    }
    let ctx = GpuContext::blocking().unwrap();
    let format = wgpu::TextureFormat::Rgba8Unorm;

    let mut sim = Simulation::with_gpu(
        ctx.clone(),
        SimConfig {
            start_mode: ExecutionMode::Cpu,
            ..Default::default()
        },
    )
    .unwrap();
    sim.generate_uniform(128, 1.0, Vec3::splat(2.0)).unwrap();

    let mut renderer = PointRenderer::new(&ctx, format).unwrap();
    let target = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Target"),
        size: wgpu::Extent3d {
            width: 64,
            height: 64,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());
    let view_proj = Mat4::orthographic_rh(-2.0, 2.0, -2.0, 2.0, -2.0, 2.0);

    for _ in 0..2 {
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Test Render Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Test Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            renderer.draw(&sim, view_proj, &mut pass).unwrap();
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        ctx.wait_idle().unwrap();

        sim.toggle_mode().unwrap();
    }
    assert_eq!(sim.mode(), ExecutionMode::Cpu);
}
