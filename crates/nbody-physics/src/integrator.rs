//! Leapfrog (kick-drift) integration on the host
//!
//! Velocities live half a step ahead of positions. [`half_kick`] establishes
//! that stagger once after a reset; [`leapfrog_step`] then advances it.

use crate::forces::acceleration;
use crate::particle::Particle;

/// Gravity settings shared by every integration call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gravity {
    pub g: f32,
    pub eps2: f32,
}

/// `v += 0.5 * dt * a(t0)` for every particle.
///
/// Positions are untouched, so the update order does not matter here.
pub fn half_kick(particles: &mut [Particle], dt: f32, gravity: Gravity) {
    for i in 0..particles.len() {
        let a = acceleration(particles, particles[i].position, gravity.g, gravity.eps2);
        particles[i].velocity += 0.5 * dt * a;
    }
}

/// One step: for each particle in index order, `pos += dt * v`, then
/// `v += dt * a(pos)`.
///
/// The update is in place. Particle `i` sees the already-moved positions of
/// particles `0..i` and the old positions of `i+1..`, the same as the reference
/// behaviour this path is compared against.
pub fn leapfrog_step(particles: &mut [Particle], dt: f32, gravity: Gravity) {
    for i in 0..particles.len() {
        let velocity = particles[i].velocity;
        particles[i].position += dt * velocity;

        let a = acceleration(particles, particles[i].position, gravity.g, gravity.eps2);
        particles[i].velocity += dt * a;
    }
}
