//! Initial-state sources: whitespace-separated dataset files and uniform
//! random boxes.

use crate::particle::Particle;
use glam::Vec3;
use rand::Rng;
use std::path::Path;

/// Values per dataset line: mass, position xyz, velocity xyz
const FIELDS_PER_LINE: usize = 7;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Read and parse a dataset file
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<Particle>, DatasetError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_dataset(&text)
}

/// Parse dataset text, one particle per line:
///
/// ```text
/// mass pos.x pos.y pos.z vel.x vel.y vel.z
/// ```
///
/// Parsing stops at the first blank line or at end of input.
pub fn parse_dataset(text: &str) -> Result<Vec<Particle>, DatasetError> {
    let mut particles = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            break;
        }

        let values = line
            .split_whitespace()
            .map(|field| {
                field.parse::<f32>().map_err(|e| DatasetError::Malformed {
                    line: line_number,
                    reason: format!("`{field}` is not a number ({e})"),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        if values.len() != FIELDS_PER_LINE {
            return Err(DatasetError::Malformed {
                line: line_number,
                reason: format!(
                    "expected {FIELDS_PER_LINE} values, found {}",
                    values.len()
                ),
            });
        }

        particles.push(Particle::new(
            values[0],
            Vec3::new(values[1], values[2], values[3]),
            Vec3::new(values[4], values[5], values[6]),
        ));
    }

    Ok(particles)
}

/// `count` particles at rest, each of mass `mass`, placed uniformly in the box
/// `[-extent/2, extent/2]` on every axis.
pub fn generate_uniform<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    mass: f32,
    extent: Vec3,
) -> Vec<Particle> {
    (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.random::<f32>() * extent.x - extent.x * 0.5,
                rng.random::<f32>() * extent.y - extent.y * 0.5,
                rng.random::<f32>() * extent.z - extent.z * 0.5,
            );
            Particle::at_rest(mass, position)
        })
        .collect()
}
