use nalgebra::{Point3, Vector3};

use crate::frames::FrameSet;

/// Quad spanning one frame's sampling window.
///
/// Corner order: `-right-up`, `+right-up`, `+right+up`, `-right+up`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlane {
    pub frame: usize,
    pub corners: [Point3<f64>; 4],
}

impl SamplingPlane {
    pub fn new(
        frame: usize,
        center: Point3<f64>,
        right: Vector3<f64>,
        up: Vector3<f64>,
        extent: f64,
    ) -> Self {
        let r = right * extent;
        let u = up * extent;
        SamplingPlane {
            frame,
            corners: [center - r - u, center + r - u, center + r + u, center - r + u],
        }
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.corners[0], &self.corners[2])
    }

    /// Source-space step for one output voxel along the first output axis.
    pub fn step_x(&self, bound: usize) -> Vector3<f64> {
        (self.corners[1] - self.corners[0]) / bound as f64
    }

    /// Source-space step for one output voxel along the second output axis.
    pub fn step_y(&self, bound: usize) -> Vector3<f64> {
        (self.corners[3] - self.corners[0]) / bound as f64
    }

    /// Unit normal of the quad (the frame tangent).
    pub fn normal(&self) -> Vector3<f64> {
        (self.corners[1] - self.corners[0])
            .cross(&(self.corners[3] - self.corners[0]))
            .normalize()
    }

    /// Source-space position of output grid coordinate `(i, j)`.
    pub fn point_at(&self, i: f64, j: f64, bound: usize) -> Point3<f64> {
        self.corners[0] + self.step_x(bound) * i + self.step_y(bound) * j
    }

    /// Largest corner displacement between two planes.
    pub fn max_corner_shift(&self, other: &SamplingPlane) -> f64 {
        self.corners
            .iter()
            .zip(other.corners.iter())
            .map(|(a, b)| nalgebra::distance(a, b))
            .fold(0.0, f64::max)
    }
}

pub fn generate_planes(frames: &FrameSet) -> Vec<SamplingPlane> {
    let extent = frames.extent as f64;
    frames
        .frames
        .iter()
        .map(|f| SamplingPlane::new(f.index, f.position, f.right, f.up, extent))
        .collect()
}
