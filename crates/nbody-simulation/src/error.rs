//! Error taxonomy for the engine and its GPU plumbing

use nbody_physics::DatasetError;
use nbody_shadergen::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    // Resource errors
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // Program build errors
    #[error("program `{label}` failed to compile:\n{diagnostics}")]
    Compile { label: String, diagnostics: String },
    #[error("program `{label}` failed to link:\n{diagnostics}")]
    Link { label: String, diagnostics: String },
    #[error("program `{label}` used before a successful finalize")]
    NotLinked { label: String },
    #[error("program `{label}` has no parameter `{name}`")]
    UnknownParameter { label: String, name: String },
    #[error("parameter `{name}` expects {expected}, got {found}")]
    ParameterType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("program `{label}` needs a buffer bound at slot {slot}")]
    MissingBinding { label: String, slot: u32 },
    #[error("program `{label}` has no buffer slot {slot}")]
    UnexpectedBinding { label: String, slot: u32 },

    // Configuration errors
    #[error("particle count {count} is not a multiple of the work-group size {group_size}")]
    GroupSizeMismatch { count: u32, group_size: u32 },
    #[error("work-group index {index} out of range (0..{max})")]
    GroupIndexOutOfRange { index: u32, max: u32 },
    #[error("dispatch of {groups} work-groups exceeds the device limit of {max}")]
    DispatchTooLarge { groups: u32, max: u32 },

    // Device errors
    #[error("no GPU is attached to this simulation")]
    GpuUnavailable,
    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("failed to map buffer for readback: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("readback callback was dropped before completing")]
    ReadbackLost,
}
