use std::f64::consts::PI;

use itertools::Itertools as _;

use crate::{
    config::{EngineConfig, VerificationAlgorithm},
    contour::ContourPoint,
};

/// Below this length a segment is treated as a repeated point.
const DEGENERATE_LENGTH: f64 = 1e-12;
const BEZIER_MAX_MEAN_DEVIATION: f64 = 0.5;
const SPLINE_MAX_MEAN_ANGLE_CHANGE: f64 = 0.3;
const HULL_MAX_RELATIVE_VARIANCE: f64 = 0.2;
const MIN_SPLINE_SAMPLES_PER_SEGMENT: usize = 4;

pub(crate) fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Angle at `b` in the triangle `a b c`, by the law of cosines.
///
/// A straight line gives π. Repeated points carry no direction, so they count as straight.
pub(crate) fn vertex_angle(a: &[f64], b: &[f64], c: &[f64]) -> f64 {
    let ab = distance(a, b);
    let bc = distance(b, c);
    if ab < DEGENERATE_LENGTH || bc < DEGENERATE_LENGTH {
        return PI;
    }
    let ac = distance(a, c);
    let cosine = (ab * ab + bc * bc - ac * ac) / (2.0 * ab * bc);
    num::clamp(cosine, -1.0, 1.0).acos()
}

/// Vertex angle at every interior point of the polyline.
pub(crate) fn vertex_angles<T: AsRef<[f64]> + Clone>(
    points: impl IntoIterator<Item = T>,
) -> impl Iterator<Item = f64> {
    points
        .into_iter()
        .tuple_windows()
        .map(|(a, b, c)| vertex_angle(a.as_ref(), b.as_ref(), c.as_ref()))
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), it| (sum + it, count + 1));
    match count {
        0 => None,
        n => Some(sum / n as f64),
    }
}

/// Population variance.
pub(crate) fn variance(values: &[f64]) -> Option<f64> {
    let mean = mean(values.iter().copied())?;
    Some(values.iter().map(|it| (it - mean).powi(2)).sum::<f64>() / values.len() as f64)
}

fn coordinates(points: &[ContourPoint]) -> impl Iterator<Item = &[f64]> {
    points.iter().map(|it| it.coordinates.as_slice())
}

/// Sample the Bezier curve with `points` as control points, by de Casteljau.
pub fn sample_bezier(points: &[ContourPoint], samples: usize) -> Vec<Vec<f64>> {
    let control = coordinates(points).map(<[f64]>::to_vec).collect::<Vec<_>>();
    if control.len() < 2 || samples < 2 {
        return control;
    }
    (0..samples)
        .map(|i| {
            let t = i as f64 / (samples - 1) as f64;
            let mut scratch = control.clone();
            for level in (1..scratch.len()).rev() {
                for j in 0..level {
                    let (left, right) = scratch.split_at_mut(j + 1);
                    for (l, r) in left[j].iter_mut().zip(&right[0]) {
                        *l = (1.0 - t) * *l + t * r;
                    }
                }
            }
            scratch.swap_remove(0)
        })
        .collect()
}

fn catmull_rom(p0: &[f64], p1: &[f64], p2: &[f64], p3: &[f64], t: f64) -> Vec<f64> {
    let (t2, t3) = (t * t, t * t * t);
    itertools::izip!(p0, p1, p2, p3)
        .map(|(p0, p1, p2, p3)| {
            0.5 * ((2.0 * p1)
                + (-p0 + p2) * t
                + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
                + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
        })
        .collect()
}

/// Sample a Catmull-Rom spline passing through `points`, ending on the last point.
pub fn sample_spline(points: &[ContourPoint], samples: usize) -> Vec<Vec<f64>> {
    let knots = coordinates(points).collect::<Vec<_>>();
    if knots.len() < 2 {
        return knots.into_iter().map(<[f64]>::to_vec).collect();
    }
    let segments = knots.len() - 1;
    let per_segment = (samples / segments).max(MIN_SPLINE_SAMPLES_PER_SEGMENT);
    let mut curve = Vec::with_capacity(segments * per_segment + 1);
    for segment in 0..segments {
        let p0 = knots[segment.saturating_sub(1)];
        let p1 = knots[segment];
        let p2 = knots[segment + 1];
        let p3 = knots[(segment + 2).min(segments)];
        for i in 0..per_segment {
            curve.push(catmull_rom(p0, p1, p2, p3, i as f64 / per_segment as f64));
        }
    }
    curve.push(knots[segments].to_vec());
    curve
}

/// Shape predicates applied to contours on top of the hash target.
#[derive(Debug, Clone)]
pub struct GeometryVerifier {
    curve_samples: usize,
    default_algorithm: VerificationAlgorithm,
}

impl GeometryVerifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            curve_samples: config.curve_samples,
            default_algorithm: config.verification_algorithm,
        }
    }

    pub fn default_algorithm(&self) -> VerificationAlgorithm {
        self.default_algorithm
    }

    /// Check `points` with `algorithm`, or the configured default when `None`.
    ///
    /// Points must all have the same, non-zero number of coordinates.
    pub fn verify(
        &self,
        points: &[ContourPoint],
        algorithm: Option<VerificationAlgorithm>,
    ) -> bool {
        if !same_dimensions(points) {
            return false;
        }
        match algorithm.unwrap_or(self.default_algorithm) {
            VerificationAlgorithm::Bezier => self.bezier(points),
            VerificationAlgorithm::Spline => self.spline(points),
            VerificationAlgorithm::ConvexHull => dispersion(points),
        }
    }

    /// The sampled curve must stay close to straight between samples.
    fn bezier(&self, points: &[ContourPoint]) -> bool {
        if points.len() < 3 {
            return false;
        }
        let curve = sample_bezier(points, self.curve_samples);
        let deviation = mean(vertex_angles(&curve).map(|it| (it - PI).abs()));
        matches!(deviation, Some(it) if it < BEZIER_MAX_MEAN_DEVIATION)
    }

    /// Curvature along the sampled spline must change gradually.
    fn spline(&self, points: &[ContourPoint]) -> bool {
        if points.len() < 4 {
            return false;
        }
        let curve = sample_spline(points, self.curve_samples);
        let change = mean(
            vertex_angles(&curve)
                .tuple_windows()
                .map(|(a, b)| (b - a).abs()),
        );
        matches!(change, Some(it) if it < SPLINE_MAX_MEAN_ANGLE_CHANGE)
    }
}

fn same_dimensions(points: &[ContourPoint]) -> bool {
    match points.first() {
        Some(first) => {
            let dimensions = first.coordinates.len();
            dimensions > 0 && points.iter().all(|it| it.coordinates.len() == dimensions)
        }
        None => true,
    }
}

/// Not a true hull test: distances from the centroid must not spread too far.
fn dispersion(points: &[ContourPoint]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let dimensions = points[0].coordinates.len();
    let centroid = (0..dimensions)
        .map(|d| points.iter().map(|it| it.coordinates[d]).sum::<f64>() / points.len() as f64)
        .collect::<Vec<_>>();
    let distances = coordinates(points)
        .map(|it| distance(it, &centroid))
        .collect::<Vec<_>>();
    match (mean(distances.iter().copied()), variance(&distances)) {
        (Some(mean), Some(variance)) => variance < HULL_MAX_RELATIVE_VARIANCE * mean * mean,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> GeometryVerifier {
        GeometryVerifier::new(&EngineConfig::default())
    }

    fn points(coordinates: &[[f64; 3]]) -> Vec<ContourPoint> {
        coordinates
            .iter()
            .map(|it| ContourPoint::new(it.to_vec(), 1.0))
            .collect()
    }

    fn line(n: usize) -> Vec<ContourPoint> {
        (0..n)
            .map(|i| ContourPoint::new(vec![i as f64, 2.0 * i as f64, 0.0], 1.0))
            .collect()
    }

    fn circle(n: usize) -> Vec<ContourPoint> {
        (0..n)
            .map(|i| {
                let theta = 2.0 * PI * i as f64 / n as f64;
                ContourPoint::new(vec![theta.cos(), theta.sin(), 0.0], 1.0)
            })
            .collect()
    }

    #[test]
    fn vertex_angle_by_law_of_cosines() {
        let straight = vertex_angle(&[0.0, 0.0], &[1.0, 0.0], &[2.0, 0.0]);
        assert!((straight - PI).abs() < 1e-9);
        let right = vertex_angle(&[1.0, 0.0], &[0.0, 0.0], &[0.0, 1.0]);
        assert!((right - PI / 2.0).abs() < 1e-9);
        let reversed = vertex_angle(&[0.0, 0.0], &[1.0, 0.0], &[0.0, 0.0]);
        assert!(reversed.abs() < 1e-6);
        assert_eq!(vertex_angle(&[1.0, 1.0], &[1.0, 1.0], &[2.0, 5.0]), PI);
    }

    #[test]
    fn bezier_of_a_line_stays_on_the_line() {
        let curve = sample_bezier(&line(5), 9);
        assert_eq!(curve.len(), 9);
        assert_eq!(curve[0], vec![0.0, 0.0, 0.0]);
        assert!((curve[8][0] - 4.0).abs() < 1e-9);
        for point in &curve {
            assert!((point[1] - 2.0 * point[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn spline_passes_through_its_knots() {
        let knots = circle(6);
        let curve = sample_spline(&knots, 30);
        assert_eq!(curve.len(), 5 * 6 + 1);
        for (segment, knot) in knots.iter().enumerate() {
            let sample = &curve[segment * 6];
            assert!(distance(sample, &knot.coordinates) < 1e-9);
        }
    }

    #[test]
    fn bezier_accepts_smooth_and_needs_three_points() {
        let verifier = verifier();
        assert!(verifier.verify(&line(10), Some(VerificationAlgorithm::Bezier)));
        assert!(verifier.verify(&circle(12), Some(VerificationAlgorithm::Bezier)));
        assert!(!verifier.verify(&line(2), Some(VerificationAlgorithm::Bezier)));
        assert!(!verifier.verify(&[], Some(VerificationAlgorithm::Bezier)));
    }

    #[test]
    fn spline_accepts_circle_and_needs_four_points() {
        let verifier = verifier();
        assert!(verifier.verify(&circle(16), Some(VerificationAlgorithm::Spline)));
        assert!(verifier.verify(&line(8), Some(VerificationAlgorithm::Spline)));
        assert!(!verifier.verify(&circle(3), Some(VerificationAlgorithm::Spline)));
    }

    #[test]
    fn dispersion_rejects_outliers() {
        let verifier = verifier();
        assert!(verifier.verify(&circle(10), Some(VerificationAlgorithm::ConvexHull)));

        let mut clustered = vec![[0.0, 0.0, 0.0]; 9];
        for (i, point) in clustered.iter_mut().enumerate() {
            point[0] = i as f64 * 0.01;
        }
        clustered.push([10.0, 0.0, 0.0]);
        let clustered = points(&clustered);
        assert!(!verifier.verify(&clustered, Some(VerificationAlgorithm::ConvexHull)));
        assert!(!verifier.verify(&circle(2), Some(VerificationAlgorithm::ConvexHull)));
    }

    #[test]
    fn none_uses_configured_algorithm() {
        let config = EngineConfig {
            verification_algorithm: VerificationAlgorithm::Spline,
            ..EngineConfig::default()
        };
        let verifier = GeometryVerifier::new(&config);
        // three points pass bezier but are too few for a spline
        let three = line(3);
        assert!(verifier.verify(&three, Some(VerificationAlgorithm::Bezier)));
        assert!(!verifier.verify(&three, None));
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let verifier = verifier();
        let mixed = vec![
            ContourPoint::new(vec![0.1, 0.2, 0.3], 1.0),
            ContourPoint::new(vec![0.4], 1.0),
            ContourPoint::new(vec![0.9, 0.1, 0.2], 1.0),
            ContourPoint::new(vec![0.5, 0.5, 0.5], 1.0),
        ];
        for algorithm in [
            VerificationAlgorithm::Bezier,
            VerificationAlgorithm::Spline,
            VerificationAlgorithm::ConvexHull,
        ] {
            assert!(!verifier.verify(&mixed, Some(algorithm)), "{}", algorithm.name());
        }
        let empty = vec![ContourPoint::new(Vec::<f64>::new(), 1.0); 4];
        assert!(!verifier.verify(&empty, Some(VerificationAlgorithm::ConvexHull)));
        // sampling truncates to the shortest point instead of panicking
        assert!(sample_spline(&mixed, 12).iter().all(|it| it.len() <= 3));
    }
}
