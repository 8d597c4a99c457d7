use nalgebra::{Point3, Vector3};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::{debug, warn};

use crate::centerline::NaturalCubicSpline;
use crate::config::StraightenConfig;
use crate::error::StraightenError;
use crate::frames::{Frame, FrameSet};

/// Boundary ring at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossSection {
    pub frame: usize,
    pub points: Vec<Point3<f64>>,
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossSections {
    pub rings: Vec<CrossSection>,
    pub ring_points: usize,
}

impl CrossSections {
    pub fn ring(&self, frame: usize) -> Option<&CrossSection> {
        self.rings.get(frame)
    }
}

/// A user-edited ring, kept in the frame's local (right, up, tangent) basis and
/// anchored by normalized arc length so it survives re-fitting of the lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct RingEdit {
    pub position: f64,
    pub offsets: Vec<Vector3<f64>>,
}

/// Flattening of the cross-section through bends, in `[0, 1]`.
pub fn shrink_factor(curvature: f64, curvature_scale: f64) -> f64 {
    (1.0 - curvature_scale * curvature / 100.0).clamp(0.0, 1.0)
}

/// Default elliptical ring in local coordinates. The long axis lies along
/// `right` with radius `diameter`, the short axis along `up`.
pub fn ellipse_offsets(
    frame: &Frame,
    ring_points: usize,
    curvature_scale: f64,
) -> Vec<Vector3<f64>> {
    let long = frame.diameter;
    let short = frame.diameter * shrink_factor(frame.curvature, curvature_scale);
    (0..ring_points)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / ring_points as f64;
            Vector3::new(long * angle.cos(), short * angle.sin(), 0.0)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossSectionModeler {
    ring_points: usize,
    curvature_scale: f64,
    edits: Vec<RingEdit>,
    revision: u64,
}

impl CrossSectionModeler {
    pub fn new(config: &StraightenConfig) -> Self {
        CrossSectionModeler {
            ring_points: config.ring_points,
            curvature_scale: config.curvature_scale,
            edits: Vec::new(),
            revision: 0,
        }
    }

    pub fn ring_points(&self) -> usize {
        self.ring_points
    }

    /// Bumped on every edit so cached cross-sections can be refreshed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn edits(&self) -> &[RingEdit] {
        &self.edits
    }

    pub fn default_ring(&self, frame: &Frame) -> Vec<Point3<f64>> {
        ellipse_offsets(frame, self.ring_points, self.curvature_scale)
            .iter()
            .map(|o| frame.local_to_world(o))
            .collect()
    }

    /// Stores a user-edited ring for frame `frame_index`. `points` are world
    /// positions, one per ring index.
    pub fn set_edited_ring(
        &mut self,
        frames: &FrameSet,
        frame_index: usize,
        points: &[Point3<f64>],
    ) -> Result<(), StraightenError> {
        if points.len() != self.ring_points {
            return Err(StraightenError::RingSize {
                expected: self.ring_points,
                actual: points.len(),
            });
        }
        let frame = frames
            .frames
            .get(frame_index)
            .ok_or(StraightenError::FrameOutOfRange {
                index: frame_index,
                count: frames.len(),
            })?;
        let position = normalized_position(frames, frame);
        let offsets = points.iter().map(|p| frame.world_to_local(p)).collect();

        let target = resolve_frame(frames, position);
        self.edits.retain(|e| resolve_frame(frames, e.position) != target);
        self.edits.push(RingEdit { position, offsets });
        self.edits.sort_by(|a, b| {
            a.position
                .partial_cmp(&b.position)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.revision += 1;
        Ok(())
    }

    /// Removes the edit resolving to `frame_index`. Returns whether one existed.
    pub fn clear_edit(&mut self, frames: &FrameSet, frame_index: usize) -> bool {
        let before = self.edits.len();
        self.edits
            .retain(|e| resolve_frame(frames, e.position) != frame_index);
        let removed = self.edits.len() != before;
        if removed {
            self.revision += 1;
        }
        removed
    }

    pub fn clear_all(&mut self) {
        if !self.edits.is_empty() {
            self.edits.clear();
            self.revision += 1;
        }
    }

    /// Frames that currently carry an edited ring.
    pub fn edited_frames(&self, frames: &FrameSet) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .edits
            .iter()
            .map(|e| resolve_frame(frames, e.position))
            .collect();
        out.dedup();
        out
    }

    /// Builds every frame's ring.
    ///
    /// Each ring is the ellipse model plus a correction. At an edited frame the
    /// correction reproduces the edited ring; the two end frames are pinned to
    /// zero correction unless edited themselves. In between, every ring index
    /// and local component follows its own natural cubic spline over arc length.
    pub fn build(&self, frames: &FrameSet) -> CrossSections {
        let ellipses: Vec<Vec<Vector3<f64>>> = frames
            .frames
            .iter()
            .map(|f| ellipse_offsets(f, self.ring_points, self.curvature_scale))
            .collect();

        let mut controls: BTreeMap<usize, Vec<Vector3<f64>>> = BTreeMap::new();
        for edit in &self.edits {
            let frame = resolve_frame(frames, edit.position);
            let delta = edit
                .offsets
                .iter()
                .zip(&ellipses[frame])
                .map(|(e, d)| e - d)
                .collect();
            if controls.insert(frame, delta).is_some() {
                warn!(frame, "two ring edits resolve to the same frame, keeping the later one");
            }
        }

        let edited: Vec<usize> = controls.keys().cloned().collect();
        let corrections = if controls.is_empty() {
            None
        } else {
            let last = frames.len() - 1;
            for end in [0, last] {
                controls
                    .entry(end)
                    .or_insert_with(|| vec![Vector3::zeros(); self.ring_points]);
            }
            let splines = correction_splines(frames, &controls, self.ring_points);
            if splines.is_none() {
                warn!("ring edits could not be interpolated, using the ellipse model");
            }
            splines
        };

        let rings = frames
            .frames
            .iter()
            .zip(&ellipses)
            .map(|(frame, ellipse)| {
                let points = match &corrections {
                    Some(splines) => ellipse
                        .iter()
                        .enumerate()
                        .map(|(k, base)| {
                            let delta = Vector3::new(
                                splines[k][0].value(frame.arc_length),
                                splines[k][1].value(frame.arc_length),
                                splines[k][2].value(frame.arc_length),
                            );
                            frame.local_to_world(&(base + delta))
                        })
                        .collect(),
                    None => ellipse.iter().map(|o| frame.local_to_world(o)).collect(),
                };
                CrossSection {
                    frame: frame.index,
                    points,
                    edited: edited.contains(&frame.index),
                }
            })
            .collect();

        debug!(
            frames = frames.len(),
            edited = edited.len(),
            "cross-sections built"
        );

        CrossSections {
            rings,
            ring_points: self.ring_points,
        }
    }
}

fn normalized_position(frames: &FrameSet, frame: &Frame) -> f64 {
    let length = frames.frames.last().map(|f| f.arc_length).unwrap_or(0.0);
    if length > 0.0 {
        frame.arc_length / length
    } else {
        0.0
    }
}

fn resolve_frame(frames: &FrameSet, position: f64) -> usize {
    let length = frames.frames.last().map(|f| f.arc_length).unwrap_or(0.0);
    frames.nearest_frame(position * length)
}

fn correction_splines(
    frames: &FrameSet,
    controls: &BTreeMap<usize, Vec<Vector3<f64>>>,
    ring_points: usize,
) -> Option<Vec<[NaturalCubicSpline; 3]>> {
    let xs: Vec<f64> = controls
        .keys()
        .map(|&f| frames.frames[f].arc_length)
        .collect();
    (0..ring_points)
        .map(|k| {
            let component = |c: usize| {
                let ys: Vec<f64> = controls.values().map(|delta| delta[k][c]).collect();
                NaturalCubicSpline::new(&xs, &ys)
            };
            Some([component(0)?, component(1)?, component(2)?])
        })
        .collect()
}
