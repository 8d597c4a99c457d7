use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::io::Write;
use std::path::Path;

use crate::annotations::{AnnotationStore, RetwistStatus};
use crate::lattice::{AnchorPoint, LatticeStore};

fn anchor_row(anchor: &AnchorPoint) -> Vec<String> {
    let p = anchor.position;
    let mut row = vec![anchor.name.clone(), p.x.to_string(), p.y.to_string(), p.z.to_string()];
    match (anchor.color, anchor.lattice_segment) {
        (Some([r, g, b]), segment) => {
            row.extend([r.to_string(), g.to_string(), b.to_string()]);
            if let Some(segment) = segment {
                row.push(segment.to_string());
            }
        }
        (None, Some(segment)) => {
            row.extend([String::new(), String::new(), String::new(), segment.to_string()]);
        }
        (None, None) => {}
    }
    row
}

/// Writes anchors as alternating left/right records, readable by
/// [`crate::io::read_lattice`].
pub fn write_lattice_to<W: Write>(writer: W, lattice: &LatticeStore) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(writer);
    for pair in lattice.pairs() {
        wtr.write_record(anchor_row(&pair.left))?;
        wtr.write_record(anchor_row(&pair.right))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_lattice<P: AsRef<Path>>(path: P, lattice: &LatticeStore) -> Result<()> {
    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create lattice file {:?}", path.as_ref()))?;
    write_lattice_to(file, lattice)
        .with_context(|| format!("failed to write lattice {:?}", path.as_ref()))
}

fn status_label(status: &RetwistStatus) -> &'static str {
    match status {
        RetwistStatus::Pending => "pending",
        RetwistStatus::Mapped { .. } => "mapped",
        RetwistStatus::Failed => "failed",
    }
}

/// Writes `name,x,y,z,sx,sy,sz,status` with a header row. Unmapped
/// annotations leave the straightened columns empty.
pub fn write_straightened_annotations_to<W: Write>(
    writer: W,
    store: &AnnotationStore,
) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(["name", "x", "y", "z", "sx", "sy", "sz", "status"])?;
    for annotation in store.iter() {
        let p = annotation.position;
        let straightened = match annotation.straightened {
            Some(s) => [s.x.to_string(), s.y.to_string(), s.z.to_string()],
            None => [String::new(), String::new(), String::new()],
        };
        let [sx, sy, sz] = straightened;
        wtr.write_record([
            annotation.name.clone(),
            p.x.to_string(),
            p.y.to_string(),
            p.z.to_string(),
            sx,
            sy,
            sz,
            status_label(&annotation.status).to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_straightened_annotations<P: AsRef<Path>>(
    path: P,
    store: &AnnotationStore,
) -> Result<()> {
    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create annotation file {:?}", path.as_ref()))?;
    write_straightened_annotations_to(file, store)
        .with_context(|| format!("failed to write annotations {:?}", path.as_ref()))
}
