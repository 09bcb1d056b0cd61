//! Softened Newtonian gravity
//!
//! Reference implementation for the CPU path. The GPU kernels evaluate the same
//! expression in the same order so both paths agree to rounding.

use crate::particle::Particle;
use glam::Vec3;

/// Acceleration felt at `position` from every body in `bodies`.
///
/// The sum runs over all bodies, including one sitting exactly at `position`:
/// with `eps2 > 0` its term is zero but it is still evaluated, which keeps the
/// floating-point summation order identical to the kernel's.
pub fn acceleration(bodies: &[Particle], position: Vec3, g: f32, eps2: f32) -> Vec3 {
    let mut a = Vec3::ZERO;
    for body in bodies {
        a += pair_acceleration(body, position, g, eps2);
    }
    a
}

/// Contribution of one body: `G * m * r / (|r|^2 + eps2)^1.5`
#[inline]
pub fn pair_acceleration(body: &Particle, position: Vec3, g: f32, eps2: f32) -> Vec3 {
    let r = body.position - position;
    let dist_sqr = r.x * r.x + r.y * r.y + r.z * r.z + eps2;
    let dist_sixth = dist_sqr * dist_sqr * dist_sqr;
    let inv_dist_cube = 1.0 / dist_sixth.sqrt();
    r * (body.mass * inv_dist_cube) * g
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_term_is_zero() {
        let p = Particle::at_rest(5.0, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(acceleration(&[p], p.position, 1.0, 0.1), Vec3::ZERO);
    }

    #[test]
    fn test_attraction_points_toward_body() {
        let bodies = [
            Particle::at_rest(10.0, Vec3::ZERO),
            Particle::at_rest(10.0, Vec3::X),
        ];
        let a = acceleration(&bodies, Vec3::ZERO, 1.0, 0.1);
        assert!(a.x > 0.0);
        assert_eq!(a.y, 0.0);
        assert_eq!(a.z, 0.0);

        // 10 * 1 / 1.1^1.5
        let expected = 10.0 / 1.1f32.powf(1.5);
        assert!((a.x - expected).abs() < 1e-4);
    }

    #[test]
    fn test_scales_linearly_with_g() {
        let bodies = [Particle::at_rest(3.0, Vec3::new(0.0, 2.0, 0.0))];
        let a1 = acceleration(&bodies, Vec3::ZERO, 1.0, 0.5);
        let a2 = acceleration(&bodies, Vec3::ZERO, 2.0, 0.5);
        assert!((a2.y - 2.0 * a1.y).abs() < 1e-6);
    }

    #[test]
    fn test_zero_g_means_no_acceleration() {
        let bodies = [Particle::at_rest(3.0, Vec3::ONE)];
        assert_eq!(acceleration(&bodies, Vec3::ZERO, 0.0, 0.1), Vec3::ZERO);
    }
}
