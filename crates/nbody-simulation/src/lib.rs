//! # N-body Simulation Engine
//!
//! Dual-path gravity simulation: a host leapfrog reference and a family of GPU
//! compute kernels generated from one template, one per work-group size.

pub mod benchmark;
pub mod buffer;
pub mod context;
pub mod error;
pub mod params;
pub mod program;
pub mod simulation;

pub use benchmark::{BenchmarkPlan, BenchmarkReport};
pub use buffer::*;
pub use context::*;
pub use error::*;
pub use params::*;
pub use program::*;
pub use simulation::*;
