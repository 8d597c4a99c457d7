pub mod seam;

use crossbeam::channel::{unbounded, Receiver, Sender};
use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{StraightenError, ValidationError};
pub use seam::SeamCell;

pub const MIN_PAIRS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorPoint {
    pub name: String,
    pub position: Point3<f64>,
    pub color: Option<[u8; 3]>,
    pub seam_cell: Option<SeamCell>,
    pub lattice_segment: Option<usize>,
    pub slice_hint: Option<usize>,
    pub selected: bool,
    pub dirty: bool,
}

impl AnchorPoint {
    pub fn new(name: impl Into<String>, position: Point3<f64>) -> Self {
        AnchorPoint {
            name: name.into(),
            position,
            color: None,
            seam_cell: None,
            lattice_segment: None,
            slice_hint: None,
            selected: false,
            dirty: false,
        }
    }

    pub fn with_seam_cell(mut self, seam_cell: SeamCell) -> Self {
        self.seam_cell = Some(seam_cell);
        self
    }

    /// Moves the anchor and marks it dirty. Returns false when the position did
    /// not change.
    pub fn move_to(&mut self, position: Point3<f64>) -> bool {
        if self.position == position {
            return false;
        }
        self.position = position;
        self.dirty = true;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatticePair {
    pub left: AnchorPoint,
    pub right: AnchorPoint,
}

impl LatticePair {
    pub fn new(left: AnchorPoint, right: AnchorPoint) -> Self {
        LatticePair { left, right }
    }

    pub fn from_positions(index: usize, left: Point3<f64>, right: Point3<f64>) -> Self {
        LatticePair {
            left: AnchorPoint::new(format!("a{}L", index), left),
            right: AnchorPoint::new(format!("a{}R", index), right),
        }
    }

    pub fn midpoint(&self) -> Point3<f64> {
        nalgebra::center(&self.left.position, &self.right.position)
    }

    /// Vector from the left anchor to the right anchor.
    pub fn side_vector(&self) -> Vector3<f64> {
        self.right.position - self.left.position
    }

    pub fn half_width(&self) -> f64 {
        self.side_vector().norm() * 0.5
    }

    pub fn anchor(&self, side: Side) -> &AnchorPoint {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn anchor_mut(&mut self, side: Side) -> &mut AnchorPoint {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Notification sent to subscribers after every lattice edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeEvent {
    /// Pairs were added, removed or reordered.
    Structural { generation: u64 },
    /// A single anchor moved.
    Position {
        generation: u64,
        pair: usize,
        side: Side,
    },
}

impl LatticeEvent {
    pub fn generation(&self) -> u64 {
        match self {
            LatticeEvent::Structural { generation } => *generation,
            LatticeEvent::Position { generation, .. } => *generation,
        }
    }
}

/// Shared edit counter. Cloned into in-flight operations so they can notice a
/// concurrent edit.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn guard(&self, expected: u64) -> GenerationGuard {
        GenerationGuard {
            counter: self.clone(),
            expected,
        }
    }
}

/// Captured at the start of a resample; fails once the lattice has moved on.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    counter: Generation,
    expected: u64,
}

impl GenerationGuard {
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn check(&self) -> Result<(), StraightenError> {
        let current = self.counter.current();
        if current != self.expected {
            return Err(StraightenError::StaleGeometry {
                expected: self.expected,
                current,
            });
        }
        Ok(())
    }
}

/// Ordered left/right anchor pairs tracing both sides of the specimen.
///
/// Pairs are stored together, so the two sides always have equal length.
/// Every geometric edit advances the generation counter and is broadcast to
/// subscribers.
#[derive(Debug, Default)]
pub struct LatticeStore {
    pairs: Vec<LatticePair>,
    generation: Generation,
    structural_generation: u64,
    subscribers: Vec<Sender<LatticeEvent>>,
}

impl LatticeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<LatticePair>) -> Self {
        LatticeStore {
            pairs,
            ..Self::default()
        }
    }

    pub fn from_sides(
        left: Vec<AnchorPoint>,
        right: Vec<AnchorPoint>,
    ) -> Result<Self, ValidationError> {
        if left.len() != right.len() {
            return Err(ValidationError::UnequalSides {
                left: left.len(),
                right: right.len(),
            });
        }
        let pairs = left
            .into_iter()
            .zip(right)
            .map(|(l, r)| LatticePair::new(l, r))
            .collect();
        Ok(Self::from_pairs(pairs))
    }

    pub fn from_positions(positions: &[(Point3<f64>, Point3<f64>)]) -> Self {
        let pairs = positions
            .iter()
            .enumerate()
            .map(|(i, (l, r))| LatticePair::from_positions(i, *l, *r))
            .collect();
        Self::from_pairs(pairs)
    }

    pub fn pairs(&self) -> &[LatticePair] {
        &self.pairs
    }

    pub fn pair(&self, index: usize) -> Option<&LatticePair> {
        self.pairs.get(index)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn midpoints(&self) -> Vec<Point3<f64>> {
        self.pairs.iter().map(LatticePair::midpoint).collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pairs.len() < MIN_PAIRS {
            return Err(ValidationError::TooFewPairs {
                required: MIN_PAIRS,
                actual: self.pairs.len(),
            });
        }
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    pub fn generation_handle(&self) -> Generation {
        self.generation.clone()
    }

    /// Generation of the most recent add/remove/reorder edit.
    pub fn structural_generation(&self) -> u64 {
        self.structural_generation
    }

    /// Registers a listener for lattice edits. Dropped receivers are pruned on
    /// the next edit.
    pub fn subscribe(&mut self) -> Receiver<LatticeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn push_pair(&mut self, pair: LatticePair) {
        self.pairs.push(pair);
        self.structural_edit();
    }

    pub fn insert_pair(&mut self, index: usize, pair: LatticePair) -> Result<(), StraightenError> {
        if index > self.pairs.len() {
            return Err(StraightenError::FrameOutOfRange {
                index,
                count: self.pairs.len(),
            });
        }
        self.pairs.insert(index, pair);
        self.structural_edit();
        Ok(())
    }

    pub fn remove_pair(&mut self, index: usize) -> Option<LatticePair> {
        if index >= self.pairs.len() {
            return None;
        }
        let removed = self.pairs.remove(index);
        self.structural_edit();
        Some(removed)
    }

    /// Moves the pair at `from` so it ends up at index `to`.
    pub fn move_pair(&mut self, from: usize, to: usize) -> Result<(), StraightenError> {
        let count = self.pairs.len();
        if from >= count || to >= count {
            return Err(StraightenError::FrameOutOfRange {
                index: from.max(to),
                count,
            });
        }
        if from == to {
            return Ok(());
        }
        let pair = self.pairs.remove(from);
        self.pairs.insert(to, pair);
        self.structural_edit();
        Ok(())
    }

    /// Repositions one anchor. Returns false if nothing changed.
    pub fn move_anchor(
        &mut self,
        pair: usize,
        side: Side,
        position: Point3<f64>,
    ) -> Result<bool, StraightenError> {
        let count = self.pairs.len();
        let target = self
            .pairs
            .get_mut(pair)
            .ok_or(StraightenError::FrameOutOfRange { index: pair, count })?;
        if !target.anchor_mut(side).move_to(position) {
            return Ok(false);
        }
        let generation = self.generation.advance();
        self.broadcast(LatticeEvent::Position {
            generation,
            pair,
            side,
        });
        Ok(true)
    }

    /// Seam classification is metadata only and does not touch the geometry.
    pub fn set_seam_cell(&mut self, pair: usize, side: Side, seam_cell: Option<SeamCell>) {
        if let Some(p) = self.pairs.get_mut(pair) {
            p.anchor_mut(side).seam_cell = seam_cell;
        }
    }

    /// Pair indices with at least one dirty anchor.
    pub fn dirty_pairs(&self) -> Vec<usize> {
        self.pairs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.left.dirty || p.right.dirty)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn clear_dirty(&mut self) {
        for pair in &mut self.pairs {
            pair.left.dirty = false;
            pair.right.dirty = false;
        }
    }

    fn structural_edit(&mut self) {
        let generation = self.generation.advance();
        self.structural_generation = generation;
        self.broadcast(LatticeEvent::Structural { generation });
    }

    fn broadcast(&mut self, event: LatticeEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}
