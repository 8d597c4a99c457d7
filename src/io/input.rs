use anyhow::{Context, Result};
use csv::ReaderBuilder;
use nalgebra::Point3;
use serde::Deserialize;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::lattice::{AnchorPoint, LatticeStore};

/// Tab when the first line holds more tabs than commas, comma otherwise.
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.matches('\t').count() > first_line.matches(',').count() {
        b'\t'
    } else {
        b','
    }
}

/// One anchor line: `name,x,y,z[,R,G,B[,latticeSegment]]`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LatticeRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub r: Option<u8>,
    #[serde(default)]
    pub g: Option<u8>,
    #[serde(default)]
    pub b: Option<u8>,
    #[serde(default)]
    pub lattice_segment: Option<usize>,
}

impl LatticeRecord {
    pub fn into_anchor(self) -> AnchorPoint {
        let mut anchor = AnchorPoint::new(self.name, Point3::new(self.x, self.y, self.z));
        if let (Some(r), Some(g), Some(b)) = (self.r, self.g, self.b) {
            anchor.color = Some([r, g, b]);
        }
        anchor.lattice_segment = self.lattice_segment;
        anchor
    }
}

/// Parses alternating left/right anchor records.
pub fn parse_lattice<R: Read>(reader: R, delimiter: u8) -> Result<LatticeStore> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut left = Vec::new();
    let mut right = Vec::new();
    for (line, result) in rdr.deserialize::<LatticeRecord>().enumerate() {
        let record = result.with_context(|| format!("invalid lattice record {}", line + 1))?;
        if line % 2 == 0 {
            left.push(record.into_anchor());
        } else {
            right.push(record.into_anchor());
        }
    }

    let store = LatticeStore::from_sides(left, right)?;
    Ok(store)
}

pub fn read_lattice<P: AsRef<Path>>(path: P) -> Result<LatticeStore> {
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read lattice file {:?}", path.as_ref()))?;
    parse_lattice(text.as_bytes(), sniff_delimiter(&text))
        .with_context(|| format!("failed to parse lattice {:?}", path.as_ref()))
}
