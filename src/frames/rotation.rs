use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::f64::consts::PI;
use tracing::warn;

use crate::centerline::any_perpendicular;

/// Rotation carrying `start` onto `end` along the shortest arc.
///
/// For antiparallel vectors the shortest arc is not unique; the half turn is
/// taken about `preferred_axis` (the local tangent) after removing its
/// component along `start`, so the choice is the same everywhere on the curve.
pub fn shortest_arc(
    start: &Vector3<f64>,
    end: &Vector3<f64>,
    preferred_axis: &Vector3<f64>,
) -> UnitQuaternion<f64> {
    if let Some(q) = UnitQuaternion::rotation_between(start, end) {
        return q;
    }
    let start_unit = start.normalize();
    let mut axis = preferred_axis - start_unit * start_unit.dot(preferred_axis);
    if axis.norm() < 1e-9 {
        axis = any_perpendicular(&start_unit);
    }
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), PI)
}

/// Interpolates a unit vector from `start` to `end` in `steps` equal angular
/// increments (SLERP of the shortest-arc rotation). Returns `steps + 1`
/// vectors, the first equal to `start`, the last equal to `end`.
pub fn interpolate_direction(
    start: &Vector3<f64>,
    end: &Vector3<f64>,
    steps: usize,
    preferred_axis: &Vector3<f64>,
    tolerance_deg: f64,
) -> Vec<Vector3<f64>> {
    let start = start.normalize();
    let end = end.normalize();
    if steps == 0 {
        return vec![start];
    }

    let rotation = shortest_arc(&start, &end, preferred_axis);
    let scaled_axis = rotation.scaled_axis();

    let mut out = Vec::with_capacity(steps + 1);
    for s in 0..=steps {
        let fraction = s as f64 / steps as f64;
        let partial = UnitQuaternion::from_scaled_axis(scaled_axis * fraction);
        out.push(partial * start);
    }

    if let Some(last) = out.last_mut() {
        let miss = last.angle(&end).to_degrees();
        if miss > tolerance_deg {
            warn!(
                miss_deg = miss,
                tolerance_deg, "interpolated right vector missed its target"
            );
        }
        *last = end;
    }
    out
}
