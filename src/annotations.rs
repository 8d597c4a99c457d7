use nalgebra::Point3;
use tracing::info;

use crate::error::RetwistFailure;
use crate::frames::FrameSet;
use crate::lattice::SeamCell;
use crate::tracker::scope_for;
use crate::volume::{InverseMapper, InverseMatch};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetwistStatus {
    /// Never mapped, or invalidated since the last mapping.
    Pending,
    Mapped { distance: f64, attempt: usize },
    Failed,
}

/// Named point of interest in twisted space, with its cached straightened
/// coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub position: Point3<f64>,
    pub seam_cell: Option<SeamCell>,
    /// Lattice segment the point belongs to; scopes the inverse search.
    pub lattice_segment: Option<usize>,
    /// Straightened slice the point is expected near.
    pub slice_hint: Option<usize>,
    pub dirty: bool,
    pub straightened: Option<Point3<f64>>,
    /// Geometry generation the cached coordinate is valid for.
    pub mapped_generation: Option<u64>,
    pub status: RetwistStatus,
}

impl Annotation {
    pub fn new(name: impl Into<String>, position: Point3<f64>) -> Self {
        Annotation {
            name: name.into(),
            position,
            seam_cell: None,
            lattice_segment: None,
            slice_hint: None,
            dirty: true,
            straightened: None,
            mapped_generation: None,
            status: RetwistStatus::Pending,
        }
    }

    pub fn with_segment(mut self, segment: usize) -> Self {
        self.lattice_segment = Some(segment);
        self
    }

    pub fn with_slice_hint(mut self, slice: usize) -> Self {
        self.slice_hint = Some(slice);
        self
    }

    pub fn with_seam_cell(mut self, seam_cell: SeamCell) -> Self {
        self.seam_cell = Some(seam_cell);
        self
    }

    /// Slice of the cached straightened coordinate.
    pub fn cached_slice(&self) -> Option<usize> {
        self.straightened.map(|p| p.z.round().max(0.0) as usize)
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.status, RetwistStatus::Mapped { .. })
    }

    /// Stores the outcome of an inverse search and clears the dirty flag.
    /// A failure drops the cached coordinate. The generation is left to the
    /// caller, which knows the geometry the search ran on.
    pub fn apply(&mut self, outcome: &Result<InverseMatch, RetwistFailure>) {
        match outcome {
            Ok(found) => {
                self.straightened = Some(found.straightened);
                self.status = RetwistStatus::Mapped {
                    distance: found.distance,
                    attempt: found.attempt,
                };
            }
            Err(_) => {
                self.straightened = None;
                self.mapped_generation = None;
                self.status = RetwistStatus::Failed;
            }
        }
        self.dirty = false;
    }

    fn invalidate(&mut self) {
        self.dirty = true;
        self.mapped_generation = None;
        self.status = RetwistStatus::Pending;
    }
}

/// Outcome of a batch retwist. Failures never abort the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetwistReport {
    pub mapped: Vec<String>,
    pub failures: Vec<RetwistFailure>,
    /// Annotations left untouched because their cache was still valid.
    pub skipped: usize,
}

impl RetwistReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.mapped.len() + self.failures.len()
    }
}

/// Ordered list of annotations, addressed by name.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `annotation`, replacing any existing annotation of the same name.
    pub fn add(&mut self, annotation: Annotation) {
        match self.position_of(&annotation.name) {
            Some(i) => self.annotations[i] = annotation,
            None => self.annotations.push(annotation),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Annotation> {
        let i = self.position_of(name)?;
        Some(self.annotations.remove(i))
    }

    pub fn get(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| a.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Annotation> {
        self.annotations.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Moves an annotation in twisted space and marks it for recomputation.
    /// Returns false for an unknown name.
    pub fn move_to(&mut self, name: &str, position: Point3<f64>) -> bool {
        match self.get_mut(name) {
            Some(a) => {
                if a.position != position {
                    a.position = position;
                    a.invalidate();
                }
                true
            }
            None => false,
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.annotations.iter_mut().for_each(Annotation::invalidate);
    }

    /// Tags every mapped annotation as valid for geometry `generation`.
    pub fn record_generation(&mut self, generation: u64) {
        self.annotations
            .iter_mut()
            .filter(|a| a.is_mapped() && !a.dirty)
            .for_each(|a| a.mapped_generation = Some(generation));
    }

    pub fn dirty_count(&self) -> usize {
        self.annotations.iter().filter(|a| a.dirty).count()
    }

    /// Maps every annotation, regardless of its cache.
    pub fn retwist_all(&mut self, mapper: &InverseMapper, frames: &FrameSet) -> RetwistReport {
        self.retwist_where(mapper, frames, |_| true)
    }

    /// Maps the annotations selected by `needs_update`; the rest are counted
    /// as skipped.
    pub fn retwist_where<F>(
        &mut self,
        mapper: &InverseMapper,
        frames: &FrameSet,
        needs_update: F,
    ) -> RetwistReport
    where
        F: Fn(&Annotation) -> bool,
    {
        let mut report = RetwistReport::default();
        for annotation in self.annotations.iter_mut() {
            if !needs_update(annotation) {
                report.skipped += 1;
                continue;
            }
            let outcome = mapper.locate(
                &annotation.name,
                &annotation.position,
                scope_for(annotation, frames),
            );
            annotation.apply(&outcome);
            match outcome {
                Ok(_) => report.mapped.push(annotation.name.clone()),
                Err(failure) => report.failures.push(failure),
            }
        }
        info!(
            mapped = report.mapped.len(),
            failed = report.failures.len(),
            skipped = report.skipped,
            "annotations retwisted"
        );
        report
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.annotations.iter().position(|a| a.name == name)
    }
}
