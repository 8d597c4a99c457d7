use nalgebra::Point3;
use thiserror::Error;

/// Structural problems with a lattice. These abort a recompute before any
/// resampling is attempted and are never repaired automatically.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unequal lattice sides: {left} left anchors, {right} right anchors")]
    UnequalSides { left: usize, right: usize },

    #[error("lattice needs at least {required} pairs, got {actual}")]
    TooFewPairs { required: usize, actual: usize },

    #[error("centerline has zero length (all lattice midpoints coincide)")]
    ZeroLength,

    #[error("lattice pairs {index} and {} have coincident midpoints", .index + 1)]
    CoincidentMidpoints { index: usize },

    #[error("lattice pair {index} has no usable left-right direction")]
    DegeneratePair { index: usize },

    /// The lattice folds back on itself: two pairs map onto the same or
    /// reversed resampled slices.
    #[error("lattice pair {index} maps to slice {slice}, not after slice {previous}")]
    NonMonotonicSlices {
        index: usize,
        previous: usize,
        slice: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StraightenError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The lattice was edited while an operation was using an older geometry
    /// snapshot.
    #[error("geometry generation {expected} is stale, lattice is at generation {current}")]
    StaleGeometry { expected: u64, current: u64 },

    #[error("resampling stopped before slice {slice}")]
    Cancelled { slice: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ring has {actual} points, expected {expected}")]
    RingSize { expected: usize, actual: usize },

    #[error("frame index {index} out of range ({count} frames)")]
    FrameOutOfRange { index: usize, count: usize },

    #[error("volume data has {actual} values, extents require {expected}")]
    VolumeShape { expected: usize, actual: usize },
}

/// Per-point failure of the inverse (retwist) search. Collected alongside
/// successes instead of aborting a batch.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("no match for '{name}' within {attempts} attempts (best {best_distance:.3} voxels)")]
pub struct RetwistFailure {
    pub name: String,
    pub target: Point3<f64>,
    pub best_distance: f64,
    pub attempts: usize,
}

pub type Result<T, E = StraightenError> = std::result::Result<T, E>;
