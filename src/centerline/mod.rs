pub mod spline;

use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::error::ValidationError;
use crate::lattice::{LatticeStore, MIN_PAIRS};
pub use spline::{NaturalCubicSpline, Spline3};

const DEGENERATE_EPS: f64 = 1e-9;

/// Arc-length parametrized spline through the lattice pair midpoints.
///
/// `t` runs over `[0, 1]`; the knot of midpoint `i` is its normalized
/// cumulative chord length. The true arc length of the fitted curve is
/// tabulated densely so frames can be placed at equal arc-length steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Centerline {
    spline: Spline3,
    knots: Vec<f64>,
    midpoints: Vec<Point3<f64>>,
    // (t, arc length from t = 0), strictly increasing in both
    arc_table: Vec<(f64, f64)>,
    length: f64,
}

impl Centerline {
    pub fn from_lattice(
        lattice: &LatticeStore,
        samples_per_segment: usize,
    ) -> Result<Self, ValidationError> {
        lattice.validate()?;
        Self::build(&lattice.midpoints(), samples_per_segment)
    }

    pub fn build(
        midpoints: &[Point3<f64>],
        samples_per_segment: usize,
    ) -> Result<Self, ValidationError> {
        if midpoints.len() < MIN_PAIRS {
            return Err(ValidationError::TooFewPairs {
                required: MIN_PAIRS,
                actual: midpoints.len(),
            });
        }

        let mut cumulative = Vec::with_capacity(midpoints.len());
        cumulative.push(0.0);
        for w in midpoints.windows(2) {
            let last = *cumulative.last().unwrap_or(&0.0);
            cumulative.push(last + nalgebra::distance(&w[0], &w[1]));
        }
        let chord_length = *cumulative.last().unwrap_or(&0.0);
        if chord_length <= DEGENERATE_EPS {
            return Err(ValidationError::ZeroLength);
        }
        if let Some(index) = cumulative
            .windows(2)
            .position(|w| w[1] - w[0] <= DEGENERATE_EPS * chord_length)
        {
            return Err(ValidationError::CoincidentMidpoints { index });
        }

        let knots: Vec<f64> = cumulative.iter().map(|c| c / chord_length).collect();
        let spline = Spline3::new(&knots, midpoints).ok_or(ValidationError::ZeroLength)?;

        let samples = samples_per_segment.max(1);
        let mut arc_table = Vec::with_capacity((knots.len() - 1) * samples + 1);
        arc_table.push((0.0, 0.0));
        let mut previous = spline.point(0.0);
        let mut travelled = 0.0;
        for w in knots.windows(2) {
            for s in 1..=samples {
                let t = w[0] + (w[1] - w[0]) * s as f64 / samples as f64;
                let p = spline.point(t);
                travelled += nalgebra::distance(&previous, &p);
                previous = p;
                arc_table.push((t, travelled));
            }
        }
        let length = travelled;
        if length <= DEGENERATE_EPS {
            return Err(ValidationError::ZeroLength);
        }

        debug!(
            pairs = midpoints.len(),
            chord_length, length, "centerline fitted"
        );

        Ok(Centerline {
            spline,
            knots,
            midpoints: midpoints.to_vec(),
            arc_table,
            length,
        })
    }

    /// Total arc length of the fitted curve.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Spline parameter of each lattice pair midpoint.
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn midpoints(&self) -> &[Point3<f64>] {
        &self.midpoints
    }

    pub fn position(&self, t: f64) -> Point3<f64> {
        self.spline.point(t)
    }

    pub fn tangent(&self, t: f64) -> Vector3<f64> {
        let d = self.spline.derivative(t);
        let norm = d.norm();
        if norm > DEGENERATE_EPS {
            return d / norm;
        }
        // stationary point of the parametrization; fall back to the local chord
        let i = self
            .knots
            .partition_point(|k| *k <= t)
            .clamp(1, self.knots.len() - 1);
        (self.midpoints[i] - self.midpoints[i - 1]).normalize()
    }

    pub fn curvature(&self, t: f64) -> f64 {
        let d1 = self.spline.derivative(t);
        let d2 = self.spline.second_derivative(t);
        let speed = d1.norm();
        if speed <= DEGENERATE_EPS {
            return 0.0;
        }
        d1.cross(&d2).norm() / (speed * speed * speed)
    }

    /// Principal normal (towards the center of curvature). On straight stretches
    /// any unit vector perpendicular to the tangent is returned.
    pub fn normal(&self, t: f64) -> Vector3<f64> {
        let tangent = self.tangent(t);
        let d2 = self.spline.second_derivative(t);
        let perpendicular = d2 - tangent * tangent.dot(&d2);
        if perpendicular.norm() > DEGENERATE_EPS {
            return perpendicular.normalize();
        }
        any_perpendicular(&tangent)
    }

    pub fn arc_length_at(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        let i = self
            .arc_table
            .partition_point(|(tt, _)| *tt <= t)
            .clamp(1, self.arc_table.len() - 1);
        let (t0, s0) = self.arc_table[i - 1];
        let (t1, s1) = self.arc_table[i];
        s0 + (s1 - s0) * (t - t0) / (t1 - t0)
    }

    pub fn t_at_arc_length(&self, s: f64) -> f64 {
        if s <= 0.0 {
            return 0.0;
        }
        if s >= self.length {
            return 1.0;
        }
        let i = self
            .arc_table
            .partition_point(|(_, ss)| *ss <= s)
            .clamp(1, self.arc_table.len() - 1);
        let (t0, s0) = self.arc_table[i - 1];
        let (t1, s1) = self.arc_table[i];
        if s1 - s0 <= f64::EPSILON {
            return t0;
        }
        t0 + (t1 - t0) * (s - s0) / (s1 - s0)
    }
}

/// A unit vector perpendicular to `v`, chosen against the least aligned axis.
pub fn any_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let axis = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&axis).normalize()
}

#[cfg(test)]
mod centerline_tests {
    use super::*;
    use crate::utils::test_utils::{arc_lattice, straight_lattice};
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_lattice_length() {
        let lattice = straight_lattice(2, 10.0, 1.0);
        let centerline = Centerline::from_lattice(&lattice, 64).unwrap();
        assert_relative_eq!(centerline.length(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(centerline.knots()[1], 1.0);

        let mid = centerline.position(0.5);
        assert_relative_eq!(mid.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(mid.z, 5.0, epsilon = 1e-12);

        let tangent = centerline.tangent(0.3);
        assert_relative_eq!(tangent.z, 1.0, epsilon = 1e-12);
        assert_relative_eq!(centerline.curvature(0.3), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_length_is_rejected() {
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_eq!(
            Centerline::build(&[p, p, p], 16),
            Err(ValidationError::ZeroLength)
        );
    }

    #[test]
    fn test_coincident_interior_midpoints_rejected() {
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(0.0, 0.0, 9.0),
        ];
        assert_eq!(
            Centerline::build(&pts, 16),
            Err(ValidationError::CoincidentMidpoints { index: 1 })
        );
    }

    #[test]
    fn test_too_few_pairs_rejected() {
        assert!(matches!(
            Centerline::build(&[Point3::origin()], 16),
            Err(ValidationError::TooFewPairs { .. })
        ));
    }

    #[test]
    fn test_arc_on_circle_has_expected_curvature_and_length() {
        let radius = 30.0;
        let lattice = arc_lattice(9, radius, std::f64::consts::FRAC_PI_2, 2.0);
        let centerline = Centerline::from_lattice(&lattice, 64).unwrap();
        let quarter = radius * std::f64::consts::FRAC_PI_2;
        assert_relative_eq!(centerline.length(), quarter, max_relative = 0.01);
        assert_relative_eq!(centerline.curvature(0.5), 1.0 / radius, max_relative = 0.05);

        // normal points towards the circle center at the origin
        let p = centerline.position(0.5);
        let to_center = (Point3::origin() - p).normalize();
        assert!(centerline.normal(0.5).dot(&to_center) > 0.99);
    }

    #[test]
    fn test_arc_length_round_trip() {
        let lattice = arc_lattice(6, 20.0, 1.2, 2.0);
        let centerline = Centerline::from_lattice(&lattice, 64).unwrap();
        for s in [0.0, 1.5, 7.25, centerline.length() * 0.9] {
            let t = centerline.t_at_arc_length(s);
            assert_relative_eq!(centerline.arc_length_at(t), s, epsilon = 1e-9);
        }
        assert_eq!(centerline.t_at_arc_length(centerline.length() + 1.0), 1.0);
    }
}
