pub mod rotation;

use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::centerline::Centerline;
use crate::config::StraightenConfig;
use crate::error::ValidationError;
use crate::lattice::LatticePair;
use rotation::interpolate_direction;

const ORTHO_EPS: f64 = 1e-9;

/// Local orthonormal basis at one resampled centerline position.
///
/// `(right, up, tangent)` is right-handed: `right × up = tangent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub t: f64,
    pub arc_length: f64,
    pub position: Point3<f64>,
    pub tangent: Vector3<f64>,
    pub right: Vector3<f64>,
    pub up: Vector3<f64>,
    pub diameter: f64,
    pub curvature: f64,
}

impl Frame {
    /// `local` is expressed as (right, up, tangent) components.
    pub fn local_to_world(&self, local: &Vector3<f64>) -> Point3<f64> {
        self.position + self.right * local.x + self.up * local.y + self.tangent * local.z
    }

    pub fn world_to_local(&self, world: &Point3<f64>) -> Vector3<f64> {
        let v = world - self.position;
        Vector3::new(v.dot(&self.right), v.dot(&self.up), v.dot(&self.tangent))
    }

    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        (self.right.norm() - 1.0).abs() < tolerance
            && (self.up.norm() - 1.0).abs() < tolerance
            && (self.tangent.norm() - 1.0).abs() < tolerance
            && self.right.dot(&self.up).abs() < tolerance
            && self.right.dot(&self.tangent).abs() < tolerance
            && self.up.dot(&self.tangent).abs() < tolerance
    }

    pub fn is_right_handed(&self, tolerance: f64) -> bool {
        (self.right.cross(&self.up) - self.tangent).norm() < tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    pub segment: usize,
    pub first_slice: usize,
    pub last_slice: usize,
    pub mean_diameter: f64,
}

impl SegmentStats {
    pub fn slice_count(&self) -> usize {
        self.last_slice - self.first_slice + 1
    }
}

/// Resampled frames plus the per-curve quantities derived while sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    pub frames: Vec<Frame>,
    /// Frame index nearest to each lattice pair; strictly increasing.
    pub lattice_slices: Vec<usize>,
    /// Interpolated diameters before the global clamp.
    pub raw_diameters: Vec<f64>,
    pub min_diameter: f64,
    pub max_diameter: f64,
    /// Half-width of every sampling plane, in voxels.
    pub extent: usize,
    pub step: f64,
}

impl FrameSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Slice range covered by lattice segment `segment` (between pairs
    /// `segment` and `segment + 1`).
    pub fn segment_slices(&self, segment: usize) -> Option<(usize, usize)> {
        let first = *self.lattice_slices.get(segment)?;
        let last = *self.lattice_slices.get(segment + 1)?;
        Some((first, last))
    }

    /// Lattice segment containing slice `slice`.
    pub fn segment_of_slice(&self, slice: usize) -> Option<usize> {
        self.lattice_slices
            .windows(2)
            .position(|w| slice >= w[0] && slice <= w[1])
    }

    /// Index of the frame closest in arc length to `arc_length`.
    pub fn nearest_frame(&self, arc_length: f64) -> usize {
        self.frames
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.arc_length - arc_length)
                    .abs()
                    .partial_cmp(&(b.arc_length - arc_length).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn segment_stats(&self) -> Vec<SegmentStats> {
        (0..self.lattice_slices.len().saturating_sub(1))
            .filter_map(|segment| {
                let (first, last) = self.segment_slices(segment)?;
                let sum: f64 = self.frames[first..=last].iter().map(|f| f.diameter).sum();
                Some(SegmentStats {
                    segment,
                    first_slice: first,
                    last_slice: last,
                    mean_diameter: sum / (last - first + 1) as f64,
                })
            })
            .collect()
    }
}

/// Number of frames for a curve of `length` sampled every `step`.
pub fn frame_count(length: f64, step: f64) -> usize {
    // tolerate round-off so an exact multiple of `step` does not gain a frame
    let steps = (length / step - 1e-9).ceil().max(0.0) as usize;
    steps + 1
}

/// Resamples `centerline` at equal arc-length steps and propagates the
/// left/right basis of the lattice along it.
pub fn sample_frames(
    centerline: &Centerline,
    pairs: &[LatticePair],
    config: &StraightenConfig,
) -> Result<FrameSet, ValidationError> {
    let length = centerline.length();
    let step = config.step;
    let count = frame_count(length, step);

    let mut frames: Vec<Frame> = (0..count)
        .map(|k| {
            let arc_length = (k as f64 * step).min(length);
            let t = centerline.t_at_arc_length(arc_length);
            Frame {
                index: k,
                t,
                arc_length,
                position: centerline.position(t),
                tangent: centerline.tangent(t),
                right: Vector3::zeros(),
                up: Vector3::zeros(),
                diameter: 0.0,
                curvature: centerline.curvature(t),
            }
        })
        .collect();

    let lattice_slices = map_lattice_slices(centerline.knots(), &frames)?;

    // diameters, linear between lattice slices
    let half_widths: Vec<f64> = pairs.iter().map(LatticePair::half_width).collect();
    let mut raw_diameters = vec![0.0; count];
    for (segment, w) in lattice_slices.windows(2).enumerate() {
        let (first, last) = (w[0], w[1]);
        let span = (last - first) as f64;
        for (k, d) in raw_diameters.iter_mut().enumerate().take(last + 1).skip(first) {
            let fraction = (k - first) as f64 / span;
            let (from, to) = (half_widths[segment], half_widths[segment + 1]);
            *d = from + fraction * (to - from);
        }
    }

    let min_pair = half_widths.iter().cloned().fold(f64::INFINITY, f64::min);
    let min_diameter = min_pair.max(config.min_diameter_floor);
    let mut max_diameter: f64 = 0.0;
    for (frame, raw) in frames.iter_mut().zip(&raw_diameters) {
        frame.diameter = raw.max(min_diameter);
        max_diameter = max_diameter.max(frame.diameter);
    }
    let extent = ((max_diameter + config.extent_buffer).ceil() as usize).max(1);

    // right vectors at lattice slices, then interpolated in between
    let mut anchor_rights = Vec::with_capacity(pairs.len());
    for (i, (pair, &slice)) in pairs.iter().zip(&lattice_slices).enumerate() {
        let tangent = frames[slice].tangent;
        let side = pair.side_vector();
        let projected = side - tangent * tangent.dot(&side);
        if projected.norm() <= ORTHO_EPS * side.norm().max(1.0) {
            return Err(ValidationError::DegeneratePair { index: i });
        }
        anchor_rights.push(projected.normalize());
    }

    for (segment, w) in lattice_slices.windows(2).enumerate() {
        let (first, last) = (w[0], w[1]);
        let rights = interpolate_direction(
            &anchor_rights[segment],
            &anchor_rights[segment + 1],
            last - first,
            &frames[first].tangent,
            config.rotation_tolerance_deg,
        );
        for (offset, right) in rights.into_iter().enumerate() {
            frames[first + offset].right = right;
        }
    }

    orthonormalize(&mut frames);

    info!(
        frames = frames.len(),
        length, extent, min_diameter, max_diameter, "frames sampled"
    );

    Ok(FrameSet {
        frames,
        lattice_slices,
        raw_diameters,
        min_diameter,
        max_diameter,
        extent,
        step,
    })
}

/// Nearest frame (by spline parameter) for every lattice knot. Rejects
/// mappings that are not strictly increasing.
pub fn map_lattice_slices(knots: &[f64], frames: &[Frame]) -> Result<Vec<usize>, ValidationError> {
    let mut slices = Vec::with_capacity(knots.len());
    for (index, knot) in knots.iter().enumerate() {
        let slice = frames
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.t - knot)
                    .abs()
                    .partial_cmp(&(b.t - knot).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        if let Some(&previous) = slices.last() {
            if slice <= previous {
                return Err(ValidationError::NonMonotonicSlices {
                    index,
                    previous,
                    slice,
                });
            }
        }
        slices.push(slice);
    }
    debug!(?slices, "lattice slices mapped");
    Ok(slices)
}

/// up = tangent × right, right = up × tangent. When the interpolated right
/// vector is parallel to the tangent the previous frame's up is reused.
fn orthonormalize(frames: &mut [Frame]) {
    let mut previous_up: Option<Vector3<f64>> = None;
    for frame in frames.iter_mut() {
        let cross = frame.tangent.cross(&frame.right);
        let up = if cross.norm() > ORTHO_EPS {
            cross.normalize()
        } else {
            let hint = previous_up
                .unwrap_or_else(|| crate::centerline::any_perpendicular(&frame.tangent));
            (hint - frame.tangent * frame.tangent.dot(&hint)).normalize()
        };
        frame.up = up;
        frame.right = up.cross(&frame.tangent).normalize();
        previous_up = Some(up);
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;
    use crate::utils::test_utils::{
        arc_lattice, folded_lattice, straight_lattice, tapered_lattice, twisted_lattice,
    };
    use approx::assert_relative_eq;

    fn sample(lattice: &crate::lattice::LatticeStore) -> Result<FrameSet, ValidationError> {
        let config = StraightenConfig::default();
        let centerline = Centerline::from_lattice(lattice, config.arc_samples_per_segment)?;
        sample_frames(&centerline, lattice.pairs(), &config)
    }

    #[test]
    fn test_straight_lattice_frames() {
        let frames = sample(&straight_lattice(2, 10.0, 1.0)).unwrap();
        assert_eq!(frames.len(), 11);
        assert_eq!(frames.lattice_slices, vec![0, 10]);
        let f = &frames.frames[5];
        assert_relative_eq!(f.position, Point3::new(1.0, 0.0, 5.0), epsilon = 1e-9);
        assert_relative_eq!(f.right, Vector3::x(), epsilon = 1e-9);
        assert_relative_eq!(f.up, Vector3::y(), epsilon = 1e-9);
        assert_relative_eq!(f.tangent, Vector3::z(), epsilon = 1e-9);
        assert_relative_eq!(f.diameter, 1.0);
        assert_eq!(frames.extent, 6);
    }

    #[test]
    fn test_frame_count_matches_length() {
        for lattice in [
            arc_lattice(7, 25.0, 1.3, 3.0),
            twisted_lattice(5, 40.0, 2.5, std::f64::consts::PI),
            straight_lattice(4, 17.3, 2.0),
        ] {
            let config = StraightenConfig::default();
            let centerline = Centerline::from_lattice(&lattice, 64).unwrap();
            let frames = sample_frames(&centerline, lattice.pairs(), &config).unwrap();
            let expected = (centerline.length() / config.step).ceil() as usize + 1;
            assert_eq!(frames.len(), expected);
        }
    }

    #[test]
    fn test_bases_are_orthonormal_and_right_handed() {
        for lattice in [
            arc_lattice(9, 30.0, 2.0, 3.0),
            twisted_lattice(6, 50.0, 3.0, 2.5),
        ] {
            let frames = sample(&lattice).unwrap();
            for f in &frames.frames {
                assert!(f.is_orthonormal(1e-9), "frame {} not orthonormal", f.index);
                assert!(f.is_right_handed(1e-9), "frame {} not right-handed", f.index);
            }
        }
    }

    #[test]
    fn test_lattice_slices_strictly_increasing() {
        let frames = sample(&arc_lattice(12, 40.0, 2.5, 3.0)).unwrap();
        assert!(frames.lattice_slices.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(frames.lattice_slices[0], 0);
        assert_eq!(*frames.lattice_slices.last().unwrap(), frames.len() - 1);
    }

    #[test]
    fn test_folded_lattice_is_rejected() {
        let err = sample(&folded_lattice()).unwrap_err();
        assert!(
            matches!(err, ValidationError::NonMonotonicSlices { .. }),
            "unexpected error {:?}",
            err
        );
    }

    #[test]
    fn test_non_monotonic_mapping_detected_directly() {
        let frames: Vec<Frame> = [0.0, 0.5, 1.0]
            .iter()
            .enumerate()
            .map(|(i, t)| Frame {
                index: i,
                t: *t,
                arc_length: *t,
                position: Point3::origin(),
                tangent: Vector3::z(),
                right: Vector3::x(),
                up: Vector3::y(),
                diameter: 1.0,
                curvature: 0.0,
            })
            .collect();
        let err = map_lattice_slices(&[0.0, 0.9, 0.8], &frames).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonMonotonicSlices {
                index: 2,
                previous: 2,
                slice: 2
            }
        );
    }

    #[test]
    fn test_raw_diameters_do_not_overshoot() {
        let lattice = tapered_lattice(&[1.0, 4.0, 2.5, 6.0], 12.0);
        let frames = sample(&lattice).unwrap();
        for (segment, w) in frames.lattice_slices.windows(2).enumerate() {
            let a = lattice.pairs()[segment].half_width();
            let b = lattice.pairs()[segment + 1].half_width();
            let (lo, hi) = (a.min(b), a.max(b));
            for k in w[0] + 1..w[1] {
                let d = frames.raw_diameters[k];
                assert!(d >= lo - 1e-12 && d <= hi + 1e-12, "slice {} diameter {}", k, d);
            }
        }
    }

    #[test]
    fn test_diameters_clamped_to_global_minimum() {
        let lattice = tapered_lattice(&[0.2, 3.0, 0.4], 10.0);
        let frames = sample(&lattice).unwrap();
        assert_relative_eq!(frames.min_diameter, 1.0);
        assert!(frames.frames.iter().all(|f| f.diameter >= frames.min_diameter));
        assert_eq!(frames.extent, (frames.max_diameter + 5.0).ceil() as usize);
    }

    #[test]
    fn test_twist_follows_lattice_without_flips() {
        let lattice = twisted_lattice(5, 40.0, 3.0, 3.0);
        let frames = sample(&lattice).unwrap();
        for (pair, &slice) in lattice.pairs().iter().zip(&frames.lattice_slices) {
            let side = pair.side_vector().normalize();
            assert!(frames.frames[slice].right.dot(&side) > 0.999);
        }
        for w in frames.frames.windows(2) {
            assert!(
                w[0].right.dot(&w[1].right) > 0.9,
                "flip between {} and {}",
                w[0].index,
                w[1].index
            );
        }
    }

    #[test]
    fn test_degenerate_pair_rejected() {
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mid = lattice.pairs()[1].midpoint();
        lattice
            .move_anchor(1, crate::lattice::Side::Left, mid)
            .unwrap();
        lattice
            .move_anchor(1, crate::lattice::Side::Right, mid)
            .unwrap();
        assert_eq!(
            sample(&lattice).unwrap_err(),
            ValidationError::DegeneratePair { index: 1 }
        );
    }

    #[test]
    fn test_segment_stats() {
        let frames = sample(&tapered_lattice(&[2.0, 4.0], 10.0)).unwrap();
        let stats = frames.segment_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].slice_count(), 11);
        assert_relative_eq!(stats[0].mean_diameter, 3.0, epsilon = 1e-9);
        assert_eq!(frames.segment_of_slice(4), Some(0));
    }
}
