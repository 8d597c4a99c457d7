use crossbeam::channel::Receiver;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::annotations::{Annotation, AnnotationStore, RetwistReport};
use crate::config::StraightenConfig;
use crate::frames::FrameSet;
use crate::lattice::{LatticeEvent, LatticeStore};
use crate::straightener::Geometry;
use crate::volume::{InverseMapper, SliceScope};

/// What a geometry rebuild invalidated downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Everything derived from the previous geometry is void.
    Full,
    /// Only these slices (ascending) moved.
    Slices(Vec<usize>),
    None,
}

impl Invalidation {
    pub fn is_none(&self) -> bool {
        matches!(self, Invalidation::None)
    }

    pub fn contains(&self, slice: usize) -> bool {
        match self {
            Invalidation::Full => true,
            Invalidation::Slices(slices) => slices.binary_search(&slice).is_ok(),
            Invalidation::None => false,
        }
    }

    /// Union of two invalidations.
    pub fn merge(self, other: Invalidation) -> Invalidation {
        match (self, other) {
            (Invalidation::Full, _) | (_, Invalidation::Full) => Invalidation::Full,
            (Invalidation::None, x) | (x, Invalidation::None) => x,
            (Invalidation::Slices(mut a), Invalidation::Slices(b)) => {
                a.extend(b);
                a.sort_unstable();
                a.dedup();
                Invalidation::Slices(a)
            }
        }
    }

    /// Per-slice mask for a volume of `count` slices.
    pub fn slice_mask(&self, count: usize) -> Vec<bool> {
        (0..count).map(|k| self.contains(k)).collect()
    }
}

/// Rebuilds older than this many steps are treated as full invalidations.
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq)]
struct Rebuild {
    from: Option<u64>,
    to: u64,
    invalidation: Invalidation,
}

/// Invalidations of recent geometry rebuilds, so that a cached coordinate
/// can be checked against the generation it was computed on.
#[derive(Debug, Clone, Default)]
pub struct InvalidationLog {
    rebuilds: VecDeque<Rebuild>,
}

impl InvalidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the rebuild from geometry generation `from` to `to`.
    pub fn record(&mut self, from: Option<u64>, to: u64, invalidation: Invalidation) {
        if self.rebuilds.len() == HISTORY_LIMIT {
            self.rebuilds.pop_front();
        }
        self.rebuilds.push_back(Rebuild {
            from,
            to,
            invalidation,
        });
    }

    /// Generation of the newest recorded geometry.
    pub fn latest(&self) -> Option<u64> {
        self.rebuilds.back().map(|r| r.to)
    }

    /// Everything invalidated after the geometry of `generation`. Full when
    /// the history no longer reaches back that far.
    pub fn since(&self, generation: u64) -> Invalidation {
        let mut newer = self.rebuilds.iter().filter(|r| r.to > generation).peekable();
        match newer.peek() {
            None => return Invalidation::None,
            Some(first) if first.from.map_or(true, |from| from > generation) => {
                return Invalidation::Full
            }
            Some(_) => {}
        }
        newer.fold(Invalidation::None, |acc, r| acc.merge(r.invalidation.clone()))
    }

    /// Whether `annotation` has to be mapped again against the newest geometry.
    pub fn needs_retwist(&self, annotation: &Annotation) -> bool {
        if annotation.dirty || !annotation.is_mapped() {
            return true;
        }
        match (annotation.mapped_generation, annotation.cached_slice()) {
            (Some(generation), Some(slice)) => self.since(generation).contains(slice),
            _ => true,
        }
    }
}

/// Slice window the inverse search starts from: the slice hint when present,
/// else the slices of the annotation's lattice segment, else everything.
pub fn scope_for(annotation: &Annotation, frames: &FrameSet) -> SliceScope {
    if let Some(hint) = annotation.slice_hint {
        return SliceScope::Slice(hint);
    }
    annotation
        .lattice_segment
        .and_then(|segment| frames.segment_slices(segment))
        .map(|(first, last)| SliceScope::Range(first, last))
        .unwrap_or(SliceScope::All)
}

/// Compares two geometry snapshots. A changed frame count or extent, a
/// structural lattice edit, or a missing previous snapshot invalidates
/// everything; otherwise only slices whose plane corners moved by more than
/// `tolerance` are reported.
pub fn compare(previous: Option<&Geometry>, next: &Geometry, tolerance: f64) -> Invalidation {
    let Some(previous) = previous else {
        return Invalidation::Full;
    };
    if previous.structural_generation != next.structural_generation
        || previous.planes.len() != next.planes.len()
        || previous.frames.extent != next.frames.extent
    {
        return Invalidation::Full;
    }
    let moved: Vec<usize> = previous
        .planes
        .iter()
        .zip(&next.planes)
        .enumerate()
        .filter(|(_, (a, b))| a.max_corner_shift(b) > tolerance)
        .map(|(k, _)| k)
        .collect();
    if moved.is_empty() {
        Invalidation::None
    } else {
        Invalidation::Slices(moved)
    }
}

/// Listens to lattice edits and decides how much downstream state a rebuild
/// has to refresh.
#[derive(Debug)]
pub struct ChangeTracker {
    events: Receiver<LatticeEvent>,
    tolerance: f64,
    structural_pending: bool,
    position_pending: bool,
    last_generation: u64,
    log: InvalidationLog,
}

impl ChangeTracker {
    pub fn new(lattice: &mut LatticeStore, config: &StraightenConfig) -> Self {
        ChangeTracker {
            events: lattice.subscribe(),
            tolerance: config.plane_change_tolerance,
            structural_pending: false,
            position_pending: false,
            last_generation: lattice.generation(),
            log: InvalidationLog::new(),
        }
    }

    /// Drains pending lattice events. Returns how many were received.
    pub fn poll(&mut self) -> usize {
        let mut received = 0;
        for event in self.events.try_iter() {
            match event {
                LatticeEvent::Structural { .. } => self.structural_pending = true,
                LatticeEvent::Position { .. } => self.position_pending = true,
            }
            self.last_generation = self.last_generation.max(event.generation());
            received += 1;
        }
        received
    }

    pub fn has_pending_edits(&mut self) -> bool {
        self.poll();
        self.structural_pending || self.position_pending
    }

    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }

    /// Scope of a rebuild from `previous` to `next`, where `moved_pairs` are
    /// the pairs with anchors moved since `previous` was built. Without moved
    /// pairs the sampling planes cannot have changed and are not compared.
    /// Clears the pending edits.
    pub fn invalidation(
        &mut self,
        previous: Option<&Geometry>,
        next: &Geometry,
        moved_pairs: &[usize],
    ) -> Invalidation {
        self.poll();
        let same_structure =
            previous.is_some_and(|p| p.structural_generation == next.structural_generation);
        let invalidation = if self.structural_pending {
            Invalidation::Full
        } else if moved_pairs.is_empty() && same_structure {
            Invalidation::None
        } else {
            compare(previous, next, self.tolerance)
        };
        match &invalidation {
            Invalidation::Full => info!(generation = next.generation, "full invalidation"),
            Invalidation::Slices(slices) => debug!(
                generation = next.generation,
                slices = slices.len(),
                moved_pairs = moved_pairs.len(),
                "partial invalidation"
            ),
            Invalidation::None => debug!(generation = next.generation, "geometry unchanged"),
        }
        self.structural_pending = false;
        self.position_pending = false;
        self.log.record(previous.map(|p| p.generation), next.generation, invalidation.clone());
        invalidation
    }

    /// History of the rebuilds scoped by this tracker.
    pub fn log(&self) -> &InvalidationLog {
        &self.log
    }

    /// Refreshes the annotations of `store` that were mapped against an older
    /// geometry and lie in slices changed since then. Stores are checked
    /// independently, each against the generation its coordinates came from.
    pub fn retwist(
        &self,
        store: &mut AnnotationStore,
        geometry: &Geometry,
        config: &StraightenConfig,
    ) -> RetwistReport {
        let mapper = InverseMapper::new(&geometry.planes, geometry.frames.extent, config);
        let report = store.retwist_where(&mapper, &geometry.frames, |a| self.log.needs_retwist(a));
        store.record_generation(geometry.generation);
        report
    }
}

#[cfg(test)]
mod tracker_tests {
    use super::*;
    use crate::cross_section::CrossSectionModeler;
    use crate::lattice::Side;
    use crate::utils::test_utils::straight_lattice;
    use nalgebra::Point3;

    fn build(lattice: &LatticeStore, config: &StraightenConfig) -> Geometry {
        Geometry::build(lattice, &CrossSectionModeler::new(config), config).unwrap()
    }

    #[test]
    fn test_invalidation_queries() {
        let slices = Invalidation::Slices(vec![2, 5, 6]);
        assert!(slices.contains(5));
        assert!(!slices.contains(4));
        assert_eq!(slices.slice_mask(4), vec![false, false, true, false]);
        assert!(Invalidation::Full.contains(100));
        assert!(Invalidation::None.is_none());
        assert_eq!(
            Invalidation::Slices(vec![4, 1]).merge(Invalidation::Slices(vec![2, 4])),
            Invalidation::Slices(vec![1, 2, 4])
        );
        assert_eq!(Invalidation::None.merge(slices.clone()), slices);
        assert_eq!(slices.merge(Invalidation::Full), Invalidation::Full);
    }

    #[test]
    fn test_scope_prefers_hint_then_segment() {
        let config = StraightenConfig::default();
        let lattice = straight_lattice(3, 10.0, 1.0);
        let geometry = build(&lattice, &config);
        let a = Annotation::new("a", Point3::origin()).with_segment(1);
        assert_eq!(scope_for(&a, &geometry.frames), SliceScope::Range(5, 10));
        let b = a.clone().with_slice_hint(2);
        assert_eq!(scope_for(&b, &geometry.frames), SliceScope::Slice(2));
        let c = Annotation::new("c", Point3::origin()).with_segment(9);
        assert_eq!(scope_for(&c, &geometry.frames), SliceScope::All);
    }

    #[test]
    fn test_first_build_is_full() {
        let config = StraightenConfig::default();
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mut tracker = ChangeTracker::new(&mut lattice, &config);
        let geometry = build(&lattice, &config);
        assert_eq!(tracker.invalidation(None, &geometry, &[]), Invalidation::Full);
    }

    #[test]
    fn test_position_edit_scopes_slices() {
        let config = StraightenConfig::default();
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mut tracker = ChangeTracker::new(&mut lattice, &config);
        let before = build(&lattice, &config);

        // turn the last pair about its midpoint; length and width stay
        let (c, s) = (0.2f64.cos(), 0.2f64.sin());
        assert!(lattice
            .move_anchor(2, Side::Right, Point3::new(1.0 + c, s, 10.0))
            .unwrap());
        assert!(lattice
            .move_anchor(2, Side::Left, Point3::new(1.0 - c, -s, 10.0))
            .unwrap());
        assert!(tracker.has_pending_edits());
        assert_eq!(lattice.dirty_pairs(), vec![2]);

        let after = build(&lattice, &config);
        let invalidation = tracker.invalidation(Some(&before), &after, &lattice.dirty_pairs());
        match &invalidation {
            Invalidation::Slices(slices) => {
                assert!(slices.contains(&10));
                assert!(!slices.contains(&0));
            }
            other => panic!("expected partial invalidation, got {other:?}"),
        }
        assert!(!tracker.has_pending_edits());
    }

    #[test]
    fn test_structural_edit_is_full() {
        let config = StraightenConfig::default();
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mut tracker = ChangeTracker::new(&mut lattice, &config);
        let before = build(&lattice, &config);
        lattice.move_pair(0, 0).unwrap();
        let removed = lattice.remove_pair(2);
        assert!(removed.is_some());
        lattice.push_pair(removed.unwrap());
        let after = build(&lattice, &config);
        assert_eq!(
            tracker.invalidation(Some(&before), &after, &lattice.dirty_pairs()),
            Invalidation::Full
        );
    }

    #[test]
    fn test_clean_anchors_skip_plane_comparison() {
        let config = StraightenConfig::default();
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mut tracker = ChangeTracker::new(&mut lattice, &config);
        let before = build(&lattice, &config);
        turn_last_pair(&mut lattice, 0.3);
        let after = build(&lattice, &config);

        // planes differ, but no anchor is reported as moved
        assert_eq!(tracker.invalidation(Some(&before), &after, &[]), Invalidation::None);
        assert!(matches!(
            tracker.invalidation(Some(&before), &after, &[2]),
            Invalidation::Slices(_)
        ));
    }

    #[test]
    fn test_unchanged_geometry_is_none() {
        let config = StraightenConfig::default();
        let lattice = straight_lattice(3, 10.0, 1.0);
        let a = build(&lattice, &config);
        let b = build(&lattice, &config);
        assert_eq!(compare(Some(&a), &b, config.plane_change_tolerance), Invalidation::None);
    }

    #[test]
    fn test_log_accumulates_since_generation() {
        let mut log = InvalidationLog::new();
        assert_eq!(log.since(0), Invalidation::None);
        log.record(None, 1, Invalidation::Full);
        log.record(Some(1), 3, Invalidation::Slices(vec![2, 3]));
        log.record(Some(3), 3, Invalidation::None);
        log.record(Some(3), 5, Invalidation::Slices(vec![7]));

        assert_eq!(log.latest(), Some(5));
        assert_eq!(log.since(5), Invalidation::None);
        assert_eq!(log.since(3), Invalidation::Slices(vec![7]));
        assert_eq!(log.since(1), Invalidation::Slices(vec![2, 3, 7]));
        assert_eq!(log.since(0), Invalidation::Full);
    }

    #[test]
    fn test_log_forgets_old_rebuilds() {
        let mut log = InvalidationLog::new();
        for g in 0..300u64 {
            log.record(Some(g), g + 1, Invalidation::None);
        }
        assert_eq!(log.since(299), Invalidation::None);
        assert_eq!(log.since(250), Invalidation::None);
        assert_eq!(log.since(0), Invalidation::Full);
    }

    fn turn_last_pair(lattice: &mut LatticeStore, angle: f64) {
        let (c, s) = (angle.cos(), angle.sin());
        let last = lattice.len() - 1;
        let z = lattice.pairs()[last].midpoint().z;
        assert!(lattice
            .move_anchor(last, Side::Right, Point3::new(1.0 + c, s, z))
            .unwrap());
        assert!(lattice
            .move_anchor(last, Side::Left, Point3::new(1.0 - c, -s, z))
            .unwrap());
    }

    fn head_and_tail() -> AnnotationStore {
        let mut store = AnnotationStore::new();
        store.add(Annotation::new("head", Point3::new(1.0, 0.0, 1.0)).with_segment(0));
        store.add(Annotation::new("tail", Point3::new(1.0, 0.0, 9.0)).with_segment(1));
        store
    }

    #[test]
    fn test_retwist_skips_untouched_annotations() {
        let config = StraightenConfig::default();
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mut tracker = ChangeTracker::new(&mut lattice, &config);
        let before = build(&lattice, &config);
        tracker.invalidation(None, &before, &[]);
        let mut store = head_and_tail();

        let first = tracker.retwist(&mut store, &before, &config);
        assert_eq!(first.mapped.len(), 2);
        assert_eq!(store.get("tail").unwrap().mapped_generation, Some(before.generation));

        turn_last_pair(&mut lattice, 0.3);
        let after = build(&lattice, &config);
        tracker.invalidation(Some(&before), &after, &lattice.dirty_pairs());
        let second = tracker.retwist(&mut store, &after, &config);
        assert_eq!(second.mapped, vec!["tail".to_string()]);
        assert_eq!(second.skipped, 1);
        // the skipped annotation is still valid for the new geometry
        assert_eq!(store.get("head").unwrap().mapped_generation, Some(after.generation));

        let third = tracker.retwist(&mut store, &after, &config);
        assert_eq!(third.attempted(), 0);
    }

    #[test]
    fn test_each_store_is_checked_against_its_own_generation() {
        let config = StraightenConfig::default();
        let mut lattice = straight_lattice(3, 10.0, 1.0);
        let mut tracker = ChangeTracker::new(&mut lattice, &config);
        let before = build(&lattice, &config);
        tracker.invalidation(None, &before, &[]);
        let mut first = head_and_tail();
        let mut second = head_and_tail();
        tracker.retwist(&mut first, &before, &config);
        tracker.retwist(&mut second, &before, &config);

        turn_last_pair(&mut lattice, 0.3);
        let after = build(&lattice, &config);
        tracker.invalidation(Some(&before), &after, &lattice.dirty_pairs());

        assert_eq!(tracker.retwist(&mut first, &after, &config).mapped, vec!["tail".to_string()]);
        assert_eq!(tracker.retwist(&mut second, &after, &config).mapped, vec!["tail".to_string()]);
        assert_eq!(
            first.get("tail").unwrap().straightened,
            second.get("tail").unwrap().straightened
        );
    }
}
