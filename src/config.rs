use std::time::Duration;

use tracing::warn;

use crate::digest::DIGEST_LEN;

/// Which smoothness predicate gates a contour.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub enum VerificationAlgorithm {
    #[default]
    Bezier,
    Spline,
    ConvexHull,
}

impl VerificationAlgorithm {
    /// Parse an algorithm name.
    ///
    /// Unknown names fall back to [VerificationAlgorithm::Bezier] with a warning.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "bezier" => Self::Bezier,
            "spline" => Self::Spline,
            "convexhull" | "convex_hull" | "convex-hull" => Self::ConvexHull,
            other => {
                warn!(algorithm = other, "unknown verification algorithm, using bezier");
                Self::Bezier
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bezier => "bezier",
            Self::Spline => "spline",
            Self::ConvexHull => "convexHull",
        }
    }
}

/// Relative weights of the three complexity sub-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityWeights {
    pub points: f64,
    pub distribution: f64,
    pub curvature: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            points: 0.3,
            distribution: 0.3,
            curvature: 0.4,
        }
    }
}

/// Everything a node needs to agree with its peers on what a valid contour is.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Initial number of leading zero bytes required of a contour hash.
    pub difficulty: u32,
    pub dimensions: usize,
    /// Inclusive lower bound on generated point counts.
    pub min_points: usize,
    /// Exclusive upper bound on generated point counts.
    pub max_points: usize,
    pub complexity_threshold: f64,
    pub verification_algorithm: VerificationAlgorithm,
    pub target_block_time: Duration,
    /// Attempts between progress events (and scheduler yields) in the mining loop.
    pub progress_interval: u64,
    /// Samples taken along bezier and spline curves before checking smoothness.
    pub curve_samples: usize,
    pub complexity_weights: ComplexityWeights,
    pub block_reward: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            difficulty: 1,
            dimensions: 3,
            min_points: 10,
            max_points: 50,
            complexity_threshold: 30.0,
            verification_algorithm: VerificationAlgorithm::Bezier,
            target_block_time: Duration::from_secs(10),
            progress_interval: 1000,
            curve_samples: 100,
            complexity_weights: ComplexityWeights::default(),
            block_reward: 50.0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions == 0 {
            return Err(ConfigError::ZeroDimensions);
        }
        if self.min_points < 3 || self.max_points <= self.min_points {
            return Err(ConfigError::PointRange {
                min: self.min_points,
                max: self.max_points,
            });
        }
        if self.max_points - self.min_points > 256 {
            // the point count is picked by a single digest byte
            return Err(ConfigError::PointRange {
                min: self.min_points,
                max: self.max_points,
            });
        }
        if !(0.0..=100.0).contains(&self.complexity_threshold) {
            return Err(ConfigError::ComplexityThreshold(self.complexity_threshold));
        }
        if !(1..=DIGEST_LEN as u32).contains(&self.difficulty) {
            return Err(ConfigError::Difficulty(self.difficulty));
        }
        if self.target_block_time.is_zero() {
            return Err(ConfigError::ZeroTargetBlockTime);
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::ZeroProgressInterval);
        }
        if self.curve_samples < 3 {
            return Err(ConfigError::CurveSamples(self.curve_samples));
        }
        let ComplexityWeights {
            points,
            distribution,
            curvature,
        } = self.complexity_weights;
        if [points, distribution, curvature]
            .iter()
            .any(|it| !it.is_finite() || *it < 0.0)
        {
            return Err(ConfigError::ComplexityWeights(self.complexity_weights));
        }
        if !self.block_reward.is_finite() || self.block_reward < 0.0 {
            return Err(ConfigError::BlockReward(self.block_reward));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("contours must have at least one dimension")]
    ZeroDimensions,
    #[error("point range [{min}, {max}) must start at 3 or more and span 1 to 256 counts")]
    PointRange { min: usize, max: usize },
    #[error("complexity threshold {0} is outside [0, 100]")]
    ComplexityThreshold(f64),
    #[error("difficulty {0} is outside [1, 32]")]
    Difficulty(u32),
    #[error("target block time must be non-zero")]
    ZeroTargetBlockTime,
    #[error("progress interval must be non-zero")]
    ZeroProgressInterval,
    #[error("at least 3 curve samples are needed to measure angles, got {0}")]
    CurveSamples(usize),
    #[error("complexity weights must be finite and non-negative: {0:?}")]
    ComplexityWeights(ComplexityWeights),
    #[error("block reward must be finite and non-negative, got {0}")]
    BlockReward(f64),
}
