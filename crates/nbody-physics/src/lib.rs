//! # N-body Physics
//!
//! Host-side reference path for the gravity simulation: particle types, the
//! softened pairwise acceleration, the leapfrog integrator, and initial-state
//! sources (dataset files and uniform random boxes).

pub mod constants;
pub mod dataset;
pub mod forces;
pub mod integrator;
pub mod particle;

pub use constants::*;
pub use dataset::*;
pub use forces::*;
pub use integrator::*;
pub use particle::*;
