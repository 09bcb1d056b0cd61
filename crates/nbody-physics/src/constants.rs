//! Default simulation constants
//!
//! Simulation units are arbitrary; these match the presets the interactive
//! build starts with.

/// Default time step
pub const DEFAULT_DT: f32 = 0.01;

/// Default gravitational constant
pub const DEFAULT_G: f32 = 1.0;

/// Default softening term, added to the squared separation
pub const DEFAULT_EPS2: f32 = 0.1;

/// Default point opacity used by the renderer
pub const DEFAULT_OPACITY: f32 = 0.1;

/// Default work-group index (2^7 = 128 invocations per group)
pub const DEFAULT_GROUP_INDEX: u32 = 7;

/// Number of kernel variants generated from the template (sizes 1..=1024)
pub const DEFAULT_VARIANT_COUNT: u32 = 11;

/// Particle count generated at startup
pub const DEFAULT_PARTICLE_COUNT: usize = 16384;

/// Mass of each generated particle
pub const DEFAULT_MASS: f32 = 10.0;

/// Edge length of the box particles are generated in
pub const DEFAULT_EXTENT: f32 = 14.0;

/// Particle counts offered as presets
pub const PARTICLE_COUNT_PRESETS: [u32; 10] =
    [128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];

// Benchmark sweep settings
pub const BENCHMARK_DT: f32 = 0.0002;
pub const BENCHMARK_G: f32 = 1.0;
pub const BENCHMARK_EPS2: f32 = 10.0;
pub const BENCHMARK_MASS: f32 = 10.0;
pub const BENCHMARK_EXTENT: f32 = 2.0;
