use tap::Pipe as _;

use crate::{
    complexity::ComplexityScorer,
    config::{ConfigError, EngineConfig},
    digest::{Digest, DigestBuilder},
};

/// A weighted coordinate in `dimensions`-space.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourPoint {
    pub coordinates: Vec<f64>,
    /// In `[0, 1]`.
    pub weight: f64,
}

impl ContourPoint {
    pub fn new(coordinates: impl Into<Vec<f64>>, weight: f64) -> Self {
        Self {
            coordinates: coordinates.into(),
            weight,
        }
    }
}

/// An ordered point set with its derived complexity and hash.
///
/// Both derived fields are pure functions of `points`.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<ContourPoint>,
    pub complexity: f64,
    pub hash: Digest,
}

impl Contour {
    pub fn new(points: Vec<ContourPoint>, scorer: &ComplexityScorer) -> Self {
        Self {
            complexity: scorer.score(&points),
            hash: Self::hash_points(&points),
            points,
        }
    }

    /// SHA-256 over every coordinate then the weight of each point, as big-endian f64s.
    pub fn hash_points(points: &[ContourPoint]) -> Digest {
        points
            .iter()
            .fold(DigestBuilder::new(), |builder, point| {
                point
                    .coordinates
                    .iter()
                    .fold(builder, |builder, coordinate| builder.f64(*coordinate))
                    .f64(point.weight)
            })
            .finish()
    }
}

/// Concatenate the fields a miner commits to into the generator's seed.
///
/// `data ‖ previous_hash ‖ nonce (big-endian) ‖ miner`
pub fn seed_material(data: &str, previous_hash: &Digest, nonce: u64, miner: &str) -> Vec<u8> {
    let mut seed = Vec::with_capacity(data.len() + previous_hash.as_ref().len() + 8 + miner.len());
    seed.extend_from_slice(data.as_bytes());
    seed.extend_from_slice(previous_hash.as_ref());
    seed.extend_from_slice(&nonce.to_be_bytes());
    seed.extend_from_slice(miner.as_bytes());
    seed
}

/// Deterministically derives contours from seed material.
#[derive(Debug, Clone)]
pub struct ContourGenerator {
    dimensions: usize,
    min_points: usize,
    max_points: usize,
    scorer: ComplexityScorer,
}

impl ContourGenerator {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            dimensions: config.dimensions,
            min_points: config.min_points,
            max_points: config.max_points,
            scorer: ComplexityScorer::new(config),
        })
    }

    pub fn scorer(&self) -> &ComplexityScorer {
        &self.scorer
    }

    /// Point count comes from the first digest byte, coordinates from successive
    /// (wrapping) digest bytes, and weights fall linearly from 1 so earlier points
    /// count for more.
    pub fn generate(&self, seed_material: &[u8]) -> Contour {
        let digest = Digest::of(seed_material);
        let bytes = digest.as_bytes();
        let span = self.max_points - self.min_points;
        let num_points = self.min_points + bytes[0] as usize % span;

        (0..num_points)
            .map(|i| {
                let coordinates = (0..self.dimensions)
                    .map(|d| bytes[(i * self.dimensions + d) % bytes.len()] as f64 / 255.0)
                    .collect::<Vec<_>>();
                ContourPoint::new(coordinates, 1.0 - i as f64 / num_points as f64)
            })
            .collect::<Vec<_>>()
            .pipe(|points| Contour::new(points, &self.scorer))
    }

    /// The contour a miner commits to for this nonce.
    pub fn generate_for(
        &self,
        data: &str,
        previous_hash: &Digest,
        nonce: u64,
        miner: &str,
    ) -> Contour {
        self.generate(&seed_material(data, previous_hash, nonce, miner))
    }
}
