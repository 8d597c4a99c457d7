pub mod input;
pub mod output;

pub use input::{parse_lattice, read_lattice};
pub use output::{write_lattice, write_straightened_annotations};
