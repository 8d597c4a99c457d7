//! Straightening of curved, twisted volumetric scans of elongated specimens.
//!
//! A lattice of left/right anchor pairs traces both sides of the specimen.
//! From it the crate fits a centerline, propagates an orthonormal frame along
//! it, models a cross-section per frame and resamples the source volume into
//! a straightened grid. Points can be mapped back from the twisted into the
//! straightened space, and edits to the lattice only recompute the slices and
//! annotations they touch.
//!
//! ```no_run
//! use untwistrs::{io, Straightener, StraightenConfig, VoxelVolume};
//!
//! # fn main() -> anyhow::Result<()> {
//! let lattice = io::read_lattice("lattice.csv")?;
//! let config = StraightenConfig::from_file("straighten.toml")?;
//! let source = VoxelVolume::new([256, 256, 128], 1);
//! let mut straightener = Straightener::new(lattice, config)?;
//! let straightened = straightener.straighten(&source)?;
//! println!("{:?}", straightened.volume.data().len());
//! # Ok(())
//! # }
//! ```

pub mod annotations;
pub mod centerline;
pub mod config;
pub mod cross_section;
pub mod error;
pub mod frames;
pub mod io;
pub mod lattice;
pub mod sampling;
pub mod straightener;
pub mod tracker;
pub mod volume;

#[cfg(test)]
mod utils;

pub use annotations::{Annotation, AnnotationStore, RetwistReport, RetwistStatus};
pub use centerline::Centerline;
pub use config::StraightenConfig;
pub use cross_section::{CrossSection, CrossSectionModeler, CrossSections};
pub use error::{RetwistFailure, StraightenError, ValidationError};
pub use frames::{Frame, FrameSet};
pub use lattice::{AnchorPoint, LatticeEvent, LatticePair, LatticeStore, SeamCell, Side};
pub use sampling::SamplingPlane;
pub use straightener::{Geometry, StraightenedVolume, Straightener};
pub use tracker::{ChangeTracker, Invalidation};
pub use volume::{
    CoverageWarning, FoldOverReport, InverseMapper, SliceScope, VoxelSource, VoxelVolume,
};
