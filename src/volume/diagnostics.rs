use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::nearest_voxel;
use super::resample::CoverageWarning;
use crate::sampling::SamplingPlane;

/// How often each source voxel was read by the forward mapping.
///
/// Voxels read more than once indicate that neighbouring sampling planes
/// overlap (the model folds over itself). Reported only; nothing is corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldOverReport {
    pub extents: [usize; 3],
    pub counts: Vec<u32>,
    /// Number of source voxels sampled more than once.
    pub oversampled: usize,
    pub max_count: u32,
    /// sample count -> number of source voxels with that count (counts ≥ 1)
    pub histogram: BTreeMap<u32, usize>,
    pub coverage: CoverageWarning,
}

impl FoldOverReport {
    pub fn has_fold_over(&self) -> bool {
        self.oversampled > 0
    }

    pub fn count_at(&self, x: usize, y: usize, z: usize) -> u32 {
        if x >= self.extents[0] || y >= self.extents[1] || z >= self.extents[2] {
            return 0;
        }
        self.counts[(z * self.extents[1] + y) * self.extents[0] + x]
    }

    /// Source voxel coordinates sampled more than once.
    pub fn oversampled_voxels(&self) -> Vec<[usize; 3]> {
        let (dx, dy) = (self.extents[0], self.extents[1]);
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 1)
            .map(|(i, _)| [i % dx, (i / dx) % dy, i / (dx * dy)])
            .collect()
    }
}

/// Replays the forward mapping over a source of `source_extents` and counts
/// the reads per source voxel.
pub fn sample_counts(
    source_extents: [usize; 3],
    planes: &[SamplingPlane],
    extent: usize,
    parallel: bool,
) -> FoldOverReport {
    let bound = 2 * extent;
    let per_slice = |plane: &SamplingPlane| -> (Vec<usize>, usize) {
        let step_x = plane.step_x(bound);
        let step_y = plane.step_y(bound);
        let mut hits = Vec::with_capacity(bound * bound);
        let mut missed = 0;
        for j in 0..bound {
            let row = plane.corners[0] + step_y * j as f64;
            for i in 0..bound {
                match nearest_voxel(&(row + step_x * i as f64), source_extents) {
                    Some([x, y, z]) => {
                        hits.push((z * source_extents[1] + y) * source_extents[0] + x)
                    }
                    None => missed += 1,
                }
            }
        }
        (hits, missed)
    };

    let slices: Vec<(Vec<usize>, usize)> = if parallel {
        planes.par_iter().map(per_slice).collect()
    } else {
        planes.iter().map(per_slice).collect()
    };

    let mut counts = vec![0u32; source_extents.iter().product()];
    let mut coverage = CoverageWarning::default();
    for (hits, missed) in &slices {
        for &index in hits {
            counts[index] += 1;
        }
        coverage = coverage.merge(CoverageWarning {
            out_of_bounds: *missed,
            sampled: bound * bound,
        });
    }

    let mut histogram = BTreeMap::new();
    for &c in counts.iter().filter(|c| **c > 0) {
        *histogram.entry(c).or_insert(0) += 1;
    }
    let oversampled = histogram
        .iter()
        .filter(|(c, _)| **c > 1)
        .map(|(_, n)| *n)
        .sum();
    let max_count = histogram.keys().next_back().copied().unwrap_or(0);

    if oversampled > 0 {
        warn!(oversampled, max_count, "source voxels sampled more than once");
    } else {
        info!("no fold-over detected");
    }

    FoldOverReport {
        extents: source_extents,
        counts,
        oversampled,
        max_count,
        histogram,
        coverage,
    }
}

#[cfg(test)]
mod diagnostics_tests {
    use super::*;
    use nalgebra::{Point3, Vector3};

    #[test]
    fn test_disjoint_planes_have_no_fold_over() {
        let planes: Vec<SamplingPlane> = (0..4)
            .map(|k| {
                let center = Point3::new(4.0, 4.0, k as f64);
                SamplingPlane::new(k, center, Vector3::x(), Vector3::y(), 2.0)
            })
            .collect();
        let report = sample_counts([8, 8, 4], &planes, 2, true);
        assert!(!report.has_fold_over());
        assert_eq!(report.histogram.get(&1), Some(&64));
        assert_eq!(report.max_count, 1);
        assert!(report.coverage.is_clean());
    }

    #[test]
    fn test_crossing_planes_are_reported() {
        // two planes through the same line cross each other
        let a = SamplingPlane::new(0, Point3::new(4.0, 4.0, 4.0), Vector3::x(), Vector3::y(), 2.0);
        let b = SamplingPlane::new(1, Point3::new(4.0, 4.0, 4.0), Vector3::x(), Vector3::z(), 2.0);
        let report = sample_counts([8, 8, 8], &[a, b], 2, false);
        assert!(report.has_fold_over());
        assert_eq!(report.max_count, 2);
        // the row y = 4, z = 4 lies in both planes
        assert_eq!(report.oversampled, 4);
        assert_eq!(report.count_at(3, 4, 4), 2);
        assert_eq!(report.count_at(3, 2, 4), 1);
        assert_eq!(report.count_at(3, 4, 2), 1);
        assert!(report
            .oversampled_voxels()
            .iter()
            .all(|v| v[1] == 4 && v[2] == 4));
    }
}
