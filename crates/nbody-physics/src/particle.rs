//! Particle type and its packed GPU representation

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A point mass. Particles have no identity beyond their index, and every
/// transformation in the crate preserves index order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub mass: f32,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Particle {
    pub fn new(mass: f32, position: Vec3, velocity: Vec3) -> Self {
        Self {
            mass,
            position,
            velocity,
        }
    }

    /// A particle at rest
    pub fn at_rest(mass: f32, position: Vec3) -> Self {
        Self::new(mass, position, Vec3::ZERO)
    }
}

/// Position and mass interleaved as one 4-wide record
/// (matches `vec4<f32>` in WGSL: xyz = position, w = mass)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PositionMass {
    pub position: [f32; 3],
    pub mass: f32,
}

/// Velocity padded to a 4-wide record. The fourth lane is never read back.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct VelocityRecord {
    pub velocity: [f32; 3],
    pub _padding: f32,
}

impl From<&Particle> for PositionMass {
    fn from(p: &Particle) -> Self {
        Self {
            position: p.position.to_array(),
            mass: p.mass,
        }
    }
}

impl From<&Particle> for VelocityRecord {
    fn from(p: &Particle) -> Self {
        Self {
            velocity: p.velocity.to_array(),
            _padding: 0.0,
        }
    }
}

/// Split particles into the two device record streams
pub fn pack(particles: &[Particle]) -> (Vec<PositionMass>, Vec<VelocityRecord>) {
    let positions = particles.iter().map(PositionMass::from).collect();
    let velocities = particles.iter().map(VelocityRecord::from).collect();
    (positions, velocities)
}

/// Rebuild particles from the two device record streams.
///
/// The streams are zipped, so a length mismatch truncates to the shorter one.
pub fn unpack(positions: &[PositionMass], velocities: &[VelocityRecord]) -> Vec<Particle> {
    positions
        .iter()
        .zip(velocities)
        .map(|(p, v)| Particle {
            mass: p.mass,
            position: Vec3::from_array(p.position),
            velocity: Vec3::from_array(v.velocity),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes_match_vec4() {
        assert_eq!(std::mem::size_of::<PositionMass>(), 16);
        assert_eq!(std::mem::size_of::<VelocityRecord>(), 16);
    }

    #[test]
    fn test_pack_unpack_preserves_order_and_values() {
        let particles = vec![
            Particle::new(1.0, Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 0.5, 0.0)),
            Particle::new(7.5, Vec3::new(-4.0, 0.0, 9.0), Vec3::new(0.0, 0.0, 2.0)),
        ];
        let (positions, velocities) = pack(&particles);
        assert_eq!(positions[1].mass, 7.5);
        assert_eq!(velocities[0]._padding, 0.0);
        assert_eq!(unpack(&positions, &velocities), particles);
    }

    #[test]
    fn test_unpack_ignores_velocity_padding() {
        let positions = [PositionMass {
            position: [0.0, 1.0, 0.0],
            mass: 2.0,
        }];
        let velocities = [VelocityRecord {
            velocity: [3.0, 0.0, 0.0],
            _padding: 42.0,
        }];
        let particles = unpack(&positions, &velocities);
        assert_eq!(particles[0].velocity, Vec3::new(3.0, 0.0, 0.0));
    }
}
