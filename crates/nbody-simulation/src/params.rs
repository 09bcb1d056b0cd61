//! Simulation parameters and engine configuration

use nbody_physics::{
    Gravity, DEFAULT_DT, DEFAULT_EPS2, DEFAULT_G, DEFAULT_GROUP_INDEX, DEFAULT_OPACITY,
    DEFAULT_VARIANT_COUNT,
};
use std::fmt;
use std::path::PathBuf;

/// Code path selected inside the generated kernel
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    /// Every invocation reads every position from storage
    Naive = 0,
    /// Positions staged through workgroup memory one tile at a time
    #[default]
    SharedMemory = 1,
    /// Tiled, with the per-tile loop fully unrolled
    Unrolled = 2,
}

impl OptimizationLevel {
    pub const ALL: [OptimizationLevel; 3] = [Self::Naive, Self::SharedMemory, Self::Unrolled];
}

impl TryFrom<u32> for OptimizationLevel {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Naive),
            1 => Ok(Self::SharedMemory),
            2 => Ok(Self::Unrolled),
            other => Err(other),
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Naive => "naive",
            Self::SharedMemory => "shared memory",
            Self::Unrolled => "shared memory + unrolled",
        };
        f.write_str(name)
    }
}

/// Scalars read by every kernel invocation. Changes apply on the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    pub dt: f32,
    pub g: f32,
    pub eps2: f32,
    pub optimization: OptimizationLevel,
    pub opacity: f32,
}

impl SimParams {
    pub fn gravity(&self) -> Gravity {
        Gravity {
            g: self.g,
            eps2: self.eps2,
        }
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            g: DEFAULT_G,
            eps2: DEFAULT_EPS2,
            optimization: OptimizationLevel::default(),
            opacity: DEFAULT_OPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    Cpu,
    #[default]
    Gpu,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
        })
    }
}

/// Where the leapfrog kernel template comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KernelTemplate {
    /// The template compiled into the crate
    #[default]
    Embedded,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub params: SimParams,
    pub start_mode: ExecutionMode,
    /// Variant index; the work-group size is `2^group_index`
    pub group_index: u32,
    pub variant_count: u32,
    pub template: KernelTemplate,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            params: SimParams::default(),
            start_mode: ExecutionMode::default(),
            group_index: DEFAULT_GROUP_INDEX,
            variant_count: DEFAULT_VARIANT_COUNT,
            template: KernelTemplate::default(),
        }
    }
}

/// What the compute kernels see on each dispatch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInputs {
    pub params: SimParams,
    pub body_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.params.dt, 0.01);
        assert_eq!(config.params.g, 1.0);
        assert_eq!(config.params.eps2, 0.1);
        assert_eq!(config.params.opacity, 0.1);
        assert_eq!(config.params.optimization, OptimizationLevel::SharedMemory);
        assert_eq!(config.start_mode, ExecutionMode::Gpu);
        assert_eq!(1 << config.group_index, 128);
        assert_eq!(config.variant_count, 11);
    }

    #[test]
    fn test_optimization_level_from_u32() {
        for level in OptimizationLevel::ALL {
            assert_eq!(OptimizationLevel::try_from(level as u32), Ok(level));
        }
        assert_eq!(OptimizationLevel::try_from(3), Err(3));
    }
}
