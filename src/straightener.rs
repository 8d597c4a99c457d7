use nalgebra::Point3;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::annotations::{AnnotationStore, RetwistReport};
use crate::centerline::Centerline;
use crate::config::StraightenConfig;
use crate::cross_section::{CrossSectionModeler, CrossSections};
use crate::error::StraightenError;
use crate::frames::{sample_frames, FrameSet};
use crate::lattice::LatticeStore;
use crate::sampling::{generate_planes, SamplingPlane};
use crate::tracker::{ChangeTracker, Invalidation};
use crate::volume::resample::straightened_extents;
use crate::volume::{
    forward_map_point, resample_slices, sample_counts, CoverageWarning, FoldOverReport,
    InverseMapper, ResampleOptions, VoxelSource, VoxelVolume,
};

/// Everything derived from one lattice state. Immutable once built; shared
/// with in-flight operations through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Lattice generation this snapshot was built from.
    pub generation: u64,
    pub structural_generation: u64,
    pub modeler_revision: u64,
    pub centerline: Centerline,
    pub frames: FrameSet,
    pub cross_sections: CrossSections,
    pub planes: Vec<SamplingPlane>,
}

impl Geometry {
    pub fn build(
        lattice: &LatticeStore,
        modeler: &CrossSectionModeler,
        config: &StraightenConfig,
    ) -> Result<Self, StraightenError> {
        let centerline = Centerline::from_lattice(lattice, config.arc_samples_per_segment)?;
        let frames = sample_frames(&centerline, lattice.pairs(), config)?;
        let cross_sections = modeler.build(&frames);
        let planes = generate_planes(&frames);
        Ok(Geometry {
            generation: lattice.generation(),
            structural_generation: lattice.structural_generation(),
            modeler_revision: modeler.revision(),
            centerline,
            frames,
            cross_sections,
            planes,
        })
    }

    pub fn extent(&self) -> usize {
        self.frames.extent
    }

    pub fn slice_count(&self) -> usize {
        self.planes.len()
    }

    /// `[2·extent, 2·extent, slices]`
    pub fn output_extents(&self) -> [usize; 3] {
        straightened_extents(&self.planes, self.frames.extent)
    }

    pub fn inverse_mapper(&self, config: &StraightenConfig) -> InverseMapper<'_> {
        InverseMapper::new(&self.planes, self.frames.extent, config)
    }

    /// Twisted-space position of straightened coordinate `(i, j, k)`.
    pub fn forward_map_point(
        &self,
        i: f64,
        j: f64,
        k: usize,
    ) -> Result<Point3<f64>, StraightenError> {
        let plane = self.planes.get(k).ok_or(StraightenError::FrameOutOfRange {
            index: k,
            count: self.planes.len(),
        })?;
        Ok(forward_map_point(plane, self.frames.extent, i, j))
    }
}

/// Cached output of [`Straightener::straighten`].
#[derive(Debug, Clone, PartialEq)]
pub struct StraightenedVolume {
    pub generation: u64,
    pub volume: VoxelVolume,
    /// Coverage of the most recent resampling pass only.
    pub coverage: CoverageWarning,
    /// Slices rewritten by the most recent pass.
    pub resampled_slices: usize,
}

/// Owns a lattice and its cross-section edits, keeps the derived geometry and
/// the straightened volume cached, and recomputes only what an edit touched.
///
/// The cached volume is assumed to come from the same source on every call;
/// call [`Straightener::clear_volume_cache`] after switching sources.
#[derive(Debug)]
pub struct Straightener {
    config: StraightenConfig,
    lattice: LatticeStore,
    modeler: CrossSectionModeler,
    tracker: ChangeTracker,
    geometry: Option<Arc<Geometry>>,
    volume_pending: Invalidation,
    cached: Option<StraightenedVolume>,
    stop: Arc<AtomicBool>,
}

impl Straightener {
    pub fn new(
        mut lattice: LatticeStore,
        config: StraightenConfig,
    ) -> Result<Self, StraightenError> {
        config.validate()?;
        let tracker = ChangeTracker::new(&mut lattice, &config);
        let modeler = CrossSectionModeler::new(&config);
        Ok(Straightener {
            config,
            lattice,
            modeler,
            tracker,
            geometry: None,
            volume_pending: Invalidation::Full,
            cached: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &StraightenConfig {
        &self.config
    }

    pub fn lattice(&self) -> &LatticeStore {
        &self.lattice
    }

    /// Edits made through this handle are picked up on the next call that
    /// needs geometry.
    pub fn lattice_mut(&mut self) -> &mut LatticeStore {
        &mut self.lattice
    }

    pub fn modeler(&self) -> &CrossSectionModeler {
        &self.modeler
    }

    /// Flag polled between slices; setting it makes the running resample
    /// return `Cancelled`. The caller resets it.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn cached_volume(&self) -> Option<&StraightenedVolume> {
        self.cached.as_ref()
    }

    pub fn clear_volume_cache(&mut self) {
        self.cached = None;
        self.volume_pending = Invalidation::Full;
    }

    /// Current geometry snapshot, rebuilt if the lattice or the ring edits
    /// changed since the last build.
    pub fn geometry(&mut self) -> Result<Arc<Geometry>, StraightenError> {
        if let Some(geometry) = &self.geometry {
            if geometry.generation == self.lattice.generation()
                && geometry.modeler_revision == self.modeler.revision()
            {
                return Ok(Arc::clone(geometry));
            }
        }

        let next = Geometry::build(&self.lattice, &self.modeler, &self.config)?;
        let moved = self.lattice.dirty_pairs();
        let invalidation = self.tracker.invalidation(self.geometry.as_deref(), &next, &moved);
        self.volume_pending =
            std::mem::replace(&mut self.volume_pending, Invalidation::None).merge(invalidation);
        self.lattice.clear_dirty();

        info!(
            generation = next.generation,
            frames = next.frames.len(),
            extent = next.frames.extent,
            length = next.centerline.length(),
            "geometry rebuilt"
        );
        let next = Arc::new(next);
        self.geometry = Some(Arc::clone(&next));
        Ok(next)
    }

    /// Stores an edited ring for `frame_index` of the current geometry.
    pub fn set_edited_ring(
        &mut self,
        frame_index: usize,
        points: &[Point3<f64>],
    ) -> Result<(), StraightenError> {
        let geometry = self.geometry()?;
        self.modeler
            .set_edited_ring(&geometry.frames, frame_index, points)
    }

    pub fn clear_edited_ring(&mut self, frame_index: usize) -> Result<bool, StraightenError> {
        let geometry = self.geometry()?;
        Ok(self.modeler.clear_edit(&geometry.frames, frame_index))
    }

    /// Straightened copy of `source`. Only slices whose sampling planes moved
    /// since the previous call are resampled into the cached volume.
    pub fn straighten<S: VoxelSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<&StraightenedVolume, StraightenError> {
        let geometry = self.geometry()?;
        let extents = geometry.output_extents();
        let guard = self.lattice.generation_handle().guard(geometry.generation);
        let options = ResampleOptions {
            parallel: self.config.parallel,
            stop: Some(self.stop.as_ref()),
            guard: Some(&guard),
        };

        let mut cached = match self.cached.take() {
            Some(c)
                if c.volume.extents() == extents
                    && c.volume.channels() == source.channels()
                    && self.volume_pending != Invalidation::Full =>
            {
                c
            }
            _ => {
                self.volume_pending = Invalidation::Full;
                StraightenedVolume {
                    generation: geometry.generation,
                    volume: VoxelVolume::new(extents, source.channels()),
                    coverage: CoverageWarning::default(),
                    resampled_slices: 0,
                }
            }
        };

        let mask = self.volume_pending.slice_mask(geometry.slice_count());
        let selected = mask.iter().filter(|m| **m).count();
        cached.coverage = if selected > 0 {
            resample_slices(
                source,
                &geometry.planes,
                geometry.frames.extent,
                Some(&mask),
                &mut cached.volume,
                &options,
            )?
        } else {
            CoverageWarning::default()
        };
        cached.generation = geometry.generation;
        cached.resampled_slices = selected;
        self.volume_pending = Invalidation::None;

        info!(
            generation = geometry.generation,
            resampled = selected,
            slices = geometry.slice_count(),
            "straightened volume updated"
        );
        Ok(self.cached.insert(cached))
    }

    /// Maps annotations into straightened coordinates. Annotations whose
    /// cached coordinate is still valid are skipped. Any number of stores can
    /// be kept in sync; each is checked against the geometry it was last
    /// mapped on.
    pub fn retwist(
        &mut self,
        store: &mut AnnotationStore,
    ) -> Result<RetwistReport, StraightenError> {
        let geometry = self.geometry()?;
        Ok(self.tracker.retwist(store, &geometry, &self.config))
    }

    /// Source voxels read more than once by the current sampling planes.
    pub fn fold_over(
        &mut self,
        source_extents: [usize; 3],
    ) -> Result<FoldOverReport, StraightenError> {
        let geometry = self.geometry()?;
        Ok(sample_counts(
            source_extents,
            &geometry.planes,
            geometry.frames.extent,
            self.config.parallel,
        ))
    }

    pub fn forward_map_point(
        &mut self,
        i: f64,
        j: f64,
        k: usize,
    ) -> Result<Point3<f64>, StraightenError> {
        self.geometry()?.forward_map_point(i, j, k)
    }
}
