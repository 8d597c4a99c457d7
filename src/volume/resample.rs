use nalgebra::Point3;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use super::{nearest_voxel, VoxelSource, VoxelVolume};
use crate::error::StraightenError;
use crate::lattice::GenerationGuard;
use crate::sampling::SamplingPlane;

/// Forward-mapped samples that landed outside the source volume. The output
/// voxels were written as background; this is never fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageWarning {
    pub out_of_bounds: usize,
    pub sampled: usize,
}

impl CoverageWarning {
    pub fn is_clean(&self) -> bool {
        self.out_of_bounds == 0
    }

    pub fn fraction(&self) -> f64 {
        if self.sampled == 0 {
            0.0
        } else {
            self.out_of_bounds as f64 / self.sampled as f64
        }
    }

    pub fn merge(self, other: CoverageWarning) -> CoverageWarning {
        CoverageWarning {
            out_of_bounds: self.out_of_bounds + other.out_of_bounds,
            sampled: self.sampled + other.sampled,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResampleOptions<'a> {
    pub parallel: bool,
    /// Polled between slices.
    pub stop: Option<&'a AtomicBool>,
    /// Checked between slices and once more at the end.
    pub guard: Option<&'a GenerationGuard>,
}

impl<'a> ResampleOptions<'a> {
    fn check(&self, slice: usize) -> Result<(), StraightenError> {
        if let Some(stop) = self.stop {
            if stop.load(Ordering::Relaxed) {
                return Err(StraightenError::Cancelled { slice });
            }
        }
        if let Some(guard) = self.guard {
            guard.check()?;
        }
        Ok(())
    }
}

/// Output extents for `planes` sampled with half-width `extent`.
pub fn straightened_extents(planes: &[SamplingPlane], extent: usize) -> [usize; 3] {
    [2 * extent, 2 * extent, planes.len()]
}

/// Twisted-space position of straightened grid coordinate `(i, j)` on `plane`.
pub fn forward_map_point(plane: &SamplingPlane, extent: usize, i: f64, j: f64) -> Point3<f64> {
    plane.point_at(i, j, 2 * extent)
}

/// Resamples the twisted `source` into a straightened volume of
/// `2·extent × 2·extent × planes.len()` voxels.
pub fn forward_map<S: VoxelSource + ?Sized>(
    source: &S,
    planes: &[SamplingPlane],
    extent: usize,
    options: &ResampleOptions,
) -> Result<(VoxelVolume, CoverageWarning), StraightenError> {
    let mut target = VoxelVolume::new(straightened_extents(planes, extent), source.channels());
    let coverage = resample_slices(source, planes, extent, None, &mut target, options)?;
    info!(
        slices = planes.len(),
        extent,
        channels = source.channels(),
        out_of_bounds = coverage.out_of_bounds,
        "volume straightened"
    );
    Ok((target, coverage))
}

/// Resamples the slices selected by `mask` (all when `None`) into `target`,
/// leaving the other slices untouched.
pub fn resample_slices<S: VoxelSource + ?Sized>(
    source: &S,
    planes: &[SamplingPlane],
    extent: usize,
    mask: Option<&[bool]>,
    target: &mut VoxelVolume,
    options: &ResampleOptions,
) -> Result<CoverageWarning, StraightenError> {
    let expected = straightened_extents(planes, extent);
    if target.extents != expected || target.channels != source.channels() {
        return Err(StraightenError::VolumeShape {
            expected: expected.iter().product::<usize>() * source.channels(),
            actual: target.data.len(),
        });
    }

    let bound = 2 * extent;
    let slice_len = target.slice_len();
    if slice_len == 0 {
        return Ok(CoverageWarning::default());
    }
    let selected = |k: usize| mask.map(|m| m.get(k).copied().unwrap_or(false)).unwrap_or(true);

    let coverage = if options.parallel {
        target
            .data
            .par_chunks_mut(slice_len)
            .enumerate()
            .filter(|(k, _)| selected(*k))
            .map(|(k, out)| {
                options.check(k)?;
                Ok::<_, StraightenError>(map_slice(source, &planes[k], bound, out))
            })
            .try_reduce(CoverageWarning::default, |a, b| Ok(a.merge(b)))?
    } else {
        let mut total = CoverageWarning::default();
        for (k, out) in target.data.chunks_mut(slice_len).enumerate() {
            if !selected(k) {
                continue;
            }
            options.check(k)?;
            total = total.merge(map_slice(source, &planes[k], bound, out));
        }
        total
    };

    if let Some(guard) = options.guard {
        guard.check()?;
    }

    if !coverage.is_clean() {
        warn!(
            out_of_bounds = coverage.out_of_bounds,
            sampled = coverage.sampled,
            "forward-mapped samples fell outside the source volume"
        );
    }
    Ok(coverage)
}

fn map_slice<S: VoxelSource + ?Sized>(
    source: &S,
    plane: &SamplingPlane,
    bound: usize,
    out: &mut [f32],
) -> CoverageWarning {
    let channels = source.channels();
    let extents = source.extents();
    let step_x = plane.step_x(bound);
    let step_y = plane.step_y(bound);
    let mut out_of_bounds = 0;

    for j in 0..bound {
        let row = plane.corners[0] + step_y * j as f64;
        for i in 0..bound {
            let p = row + step_x * i as f64;
            let base = (j * bound + i) * channels;
            match nearest_voxel(&p, extents) {
                Some([x, y, z]) => {
                    for c in 0..channels {
                        out[base + c] = source.voxel(x, y, z, c);
                    }
                }
                None => {
                    out[base..base + channels].fill(0.0);
                    out_of_bounds += 1;
                }
            }
        }
    }

    CoverageWarning {
        out_of_bounds,
        sampled: bound * bound,
    }
}
