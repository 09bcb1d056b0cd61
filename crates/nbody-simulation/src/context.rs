//! Device and queue shared by every buffer and program

use crate::SimError;

/// The single device context all GPU work is issued against. Commands run in
/// submission order on one queue.
#[derive(Debug, Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub async fn new() -> Result<Self, SimError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        log::info!("Using GPU: {}", adapter.get_info().name);

        // Take the adapter's real limits; the larger kernel variants need more
        // than the portable defaults allow.
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("N-body Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self { device, queue })
    }

    pub fn blocking() -> Result<Self, SimError> {
        pollster::block_on(Self::new())
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Block until every submitted command has finished
    pub fn wait_idle(&self) -> Result<(), SimError> {
        self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        Ok(())
    }

    /// Largest work-group size (a power of two) the device accepts for a
    /// kernel that stages one `vec4<f32>` per invocation in workgroup memory.
    pub fn max_group_size(&self) -> u32 {
        let limits = self.limits();
        let by_invocations = limits
            .max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x);
        let by_storage = limits.max_compute_workgroup_storage_size / 16;
        let max = by_invocations.min(by_storage).max(1);
        1 << (31 - max.leading_zeros())
    }
}

/// Whether a GPU adapter can be opened at all. Tests that need a device skip
/// when this is false.
pub fn gpu_available() -> bool {
    GpuContext::blocking().is_ok()
}
