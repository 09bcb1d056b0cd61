//! # N-body Renderer
//!
//! Draws the live particle set as alpha-blended points. Window, surface and
//! camera belong to the caller; this crate only needs a colour target format
//! and a view-projection matrix per frame.

pub mod renderer;

pub use renderer::*;
