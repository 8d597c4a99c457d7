use serde::{Deserialize, Serialize};
use std::fmt;

/// Seam-cell landmark classes carried by lattice anchors and annotations.
///
/// Set explicitly by the host; anchor and annotation names are free text and are
/// never inspected to infer a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeamCell {
    H0,
    H1,
    H2,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    T,
}

impl SeamCell {
    pub const ALL: [SeamCell; 10] = [
        SeamCell::H0,
        SeamCell::H1,
        SeamCell::H2,
        SeamCell::V1,
        SeamCell::V2,
        SeamCell::V3,
        SeamCell::V4,
        SeamCell::V5,
        SeamCell::V6,
        SeamCell::T,
    ];

    pub fn is_head(&self) -> bool {
        matches!(self, SeamCell::H0 | SeamCell::H1 | SeamCell::H2)
    }

    pub fn is_tail(&self) -> bool {
        matches!(self, SeamCell::T)
    }
}

impl fmt::Display for SeamCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SeamCell::H0 => "H0",
                SeamCell::H1 => "H1",
                SeamCell::H2 => "H2",
                SeamCell::V1 => "V1",
                SeamCell::V2 => "V2",
                SeamCell::V3 => "V3",
                SeamCell::V4 => "V4",
                SeamCell::V5 => "V5",
                SeamCell::V6 => "V6",
                SeamCell::T => "T",
            }
        )
    }
}
