use std::f64::consts::PI;

use itertools::Itertools as _;

use crate::{
    config::{ComplexityWeights, EngineConfig},
    contour::ContourPoint,
    geometry::{distance, mean, variance, vertex_angles},
};

/// Scores a point set in `[0, 100]` from its size, spread and curvature.
#[derive(Debug, Clone)]
pub struct ComplexityScorer {
    max_points: usize,
    weights: ComplexityWeights,
}

impl ComplexityScorer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_points: config.max_points,
            weights: config.complexity_weights,
        }
    }

    pub fn score(&self, points: &[ContourPoint]) -> f64 {
        let ComplexityWeights {
            points: w_points,
            distribution: w_distribution,
            curvature: w_curvature,
        } = self.weights;
        let score = (w_points * self.point_count_factor(points)
            + w_distribution * distribution_factor(points)
            + w_curvature * curvature_factor(points))
            * 100.0;
        match score.is_nan() {
            true => 0.0,
            false => num::clamp(score, 0.0, 100.0),
        }
    }

    fn point_count_factor(&self, points: &[ContourPoint]) -> f64 {
        (points.len() as f64 / self.max_points as f64).min(1.0)
    }
}

/// Variance of all pairwise distances relative to the squared mean distance.
fn distribution_factor(points: &[ContourPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let distances = points
        .iter()
        .tuple_combinations()
        .map(|(a, b)| distance(&a.coordinates, &b.coordinates))
        .collect::<Vec<_>>();
    match (mean(distances.iter().copied()), variance(&distances)) {
        (Some(mean), Some(variance)) if mean > 0.0 => (variance / (mean * mean)).min(1.0),
        _ => 0.0,
    }
}

/// Mean turn away from straight at each interior point, relative to a full reversal.
fn curvature_factor(points: &[ContourPoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    mean(vertex_angles(points.iter().map(|it| it.coordinates.as_slice())).map(|it| PI - it))
        .map_or(0.0, |turn| (turn / PI).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contour::ContourGenerator, digest::Digest};

    fn scorer() -> ComplexityScorer {
        ComplexityScorer::new(&EngineConfig::default())
    }

    fn point(coordinates: [f64; 3]) -> ContourPoint {
        ContourPoint::new(coordinates.to_vec(), 1.0)
    }

    #[test]
    fn empty_and_tiny_sets() {
        let scorer = scorer();
        assert_eq!(scorer.score(&[]), 0.0);
        // one point: only the count factor, 0.3 * 1/50
        let one = scorer.score(&[point([0.5, 0.5, 0.5])]);
        assert!((one - 0.6).abs() < 1e-9);
        // two points: a single distance has no variance, and no angle exists yet
        let two = scorer.score(&[point([0.0; 3]), point([1.0, 0.0, 0.0])]);
        assert!((two - 1.2).abs() < 1e-9);
    }

    #[test]
    fn straight_line_has_no_curvature() {
        let points = (0..5)
            .map(|i| point([i as f64, 0.0, 0.0]))
            .collect::<Vec<_>>();
        assert_eq!(curvature_factor(&points), 0.0);
        assert!(distribution_factor(&points) > 0.0);
    }

    #[test]
    fn reversal_is_maximal_curvature() {
        let points = [point([0.0; 3]), point([1.0, 0.0, 0.0]), point([0.0; 3])];
        assert!((curvature_factor(&points) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn right_angles_are_half_curvature() {
        let points = [
            point([0.0, 0.0, 0.0]),
            point([1.0, 0.0, 0.0]),
            point([1.0, 1.0, 0.0]),
            point([0.0, 1.0, 0.0]),
        ];
        assert!((curvature_factor(&points) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weights_are_configurable() {
        let config = EngineConfig {
            complexity_weights: ComplexityWeights {
                points: 1.0,
                distribution: 0.0,
                curvature: 0.0,
            },
            ..EngineConfig::default()
        };
        let scorer = ComplexityScorer::new(&config);
        let points = (0..25).map(|i| point([i as f64, 1.0, 2.0])).collect::<Vec<_>>();
        assert!((scorer.score(&points) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped() {
        let config = EngineConfig {
            complexity_weights: ComplexityWeights {
                points: 5.0,
                distribution: 5.0,
                curvature: 5.0,
            },
            ..EngineConfig::default()
        };
        let scorer = ComplexityScorer::new(&config);
        let points = (0..60).map(|i| point([i as f64, 0.0, 0.0])).collect::<Vec<_>>();
        assert_eq!(scorer.score(&points), 100.0);
    }

    #[test]
    fn generated_contours_score_within_bounds() {
        let generator = ContourGenerator::new(&EngineConfig::default()).unwrap();
        for nonce in 0..500 {
            let contour = generator.generate_for("bounds", &Digest::ZERO, nonce, "miner");
            assert!((0.0..=100.0).contains(&contour.complexity), "{}", contour.complexity);
        }
    }
}
