use nalgebra::Point3;
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::config::StraightenConfig;
use crate::error::RetwistFailure;
use crate::sampling::SamplingPlane;

/// Slice window searched by the inverse mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceScope {
    Slice(usize),
    /// Inclusive range of slices.
    Range(usize, usize),
    All,
}

impl SliceScope {
    /// Inclusive slice bounds clamped to `count` slices, `None` when there are
    /// no slices at all.
    pub fn bounds(&self, count: usize) -> Option<(usize, usize)> {
        if count == 0 {
            return None;
        }
        let last = count - 1;
        let (lo, hi) = match *self {
            SliceScope::Slice(k) => (k, k),
            SliceScope::Range(a, b) => (a.min(b), a.max(b)),
            SliceScope::All => (0, last),
        };
        Some((lo.min(last), hi.min(last)))
    }

    pub fn widen(&self, margin: usize, count: usize) -> SliceScope {
        match self.bounds(count) {
            Some((lo, hi)) if *self != SliceScope::All => {
                SliceScope::Range(lo.saturating_sub(margin), (hi + margin).min(count - 1))
            }
            _ => SliceScope::All,
        }
    }
}

/// Straightened grid coordinate found for a twisted-space point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseMatch {
    /// `(i, j, k)`: in-plane grid position and slice index.
    pub straightened: Point3<f64>,
    /// Distance between the target and the forward-mapped grid point.
    pub distance: f64,
    /// Zero-based attempt of the retry schedule that succeeded.
    pub attempt: usize,
}

/// Maps twisted-space points back into the straightened grid by searching
/// the sampling planes for the closest forward-mapped grid point.
#[derive(Debug, Clone)]
pub struct InverseMapper<'a> {
    planes: &'a [SamplingPlane],
    extent: usize,
    tolerances: Vec<f64>,
    margin: usize,
    parallel: bool,
}

impl<'a> InverseMapper<'a> {
    pub fn new(planes: &'a [SamplingPlane], extent: usize, config: &StraightenConfig) -> Self {
        InverseMapper {
            planes,
            extent,
            tolerances: config.retwist_tolerances.clone(),
            margin: config.retwist_slice_margin,
            parallel: config.parallel,
        }
    }

    pub fn slice_count(&self) -> usize {
        self.planes.len()
    }

    /// Closest grid point to `target` within `scope`, whatever its distance.
    pub fn nearest_in(
        &self,
        target: &Point3<f64>,
        scope: SliceScope,
    ) -> Option<(Point3<f64>, f64)> {
        let (lo, hi) = scope.bounds(self.planes.len())?;
        let bound = 2 * self.extent;

        let search = |k: usize| -> Option<(f64, usize, usize, usize)> {
            let plane = &self.planes[k];
            let step_x = plane.step_x(bound);
            let step_y = plane.step_y(bound);
            let mut best: Option<(f64, usize, usize, usize)> = None;
            for j in 0..bound {
                let row = plane.corners[0] + step_y * j as f64;
                for i in 0..bound {
                    let d = nalgebra::distance(&(row + step_x * i as f64), target);
                    if best.map_or(true, |b| d < b.0) {
                        best = Some((d, k, j, i));
                    }
                }
            }
            best
        };

        // ties resolve to the lowest (slice, row, column)
        let pick = |a: (f64, usize, usize, usize), b: (f64, usize, usize, usize)| {
            match a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal) {
                Ordering::Less => a,
                Ordering::Greater => b,
                Ordering::Equal => {
                    if (a.1, a.2, a.3) <= (b.1, b.2, b.3) {
                        a
                    } else {
                        b
                    }
                }
            }
        };

        let best = if self.parallel {
            (lo..=hi).into_par_iter().filter_map(search).reduce_with(pick)
        } else {
            (lo..=hi).filter_map(search).reduce(pick)
        };

        best.map(|(d, k, j, i)| (Point3::new(i as f64, j as f64, k as f64), d))
    }

    /// Runs the retry schedule: the first attempt searches `scope`, the second
    /// widens it by the configured margin, later attempts search every slice.
    /// Each attempt accepts a match within its own tolerance.
    pub fn locate(
        &self,
        name: &str,
        target: &Point3<f64>,
        scope: SliceScope,
    ) -> Result<InverseMatch, RetwistFailure> {
        let count = self.planes.len();
        let mut best_distance = f64::INFINITY;

        for (attempt, tolerance) in self.tolerances.iter().enumerate() {
            let window = match attempt {
                0 => scope,
                1 => scope.widen(self.margin, count),
                _ => SliceScope::All,
            };
            let Some((straightened, distance)) = self.nearest_in(target, window) else {
                break;
            };
            best_distance = best_distance.min(distance);
            if distance <= *tolerance {
                debug!(name, attempt, distance, "retwist matched");
                return Ok(InverseMatch {
                    straightened,
                    distance,
                    attempt,
                });
            }
        }

        warn!(name, best_distance, "retwist failed");
        Err(RetwistFailure {
            name: name.to_string(),
            target: *target,
            best_distance,
            attempts: self.tolerances.len(),
        })
    }
}
