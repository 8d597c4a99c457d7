use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::config::StraightenConfig;
use crate::cross_section::CrossSectionModeler;
use crate::lattice::LatticeStore;
use crate::straightener::Geometry;
use crate::volume::VoxelVolume;

fn lattice_from(pairs: Vec<(Point3<f64>, Point3<f64>)>) -> LatticeStore {
    LatticeStore::from_positions(&pairs)
}

/// Pairs along +z; left anchors on the z axis, right anchors at x = 2·half_width.
pub fn straight_lattice(n_pairs: usize, length: f64, half_width: f64) -> LatticeStore {
    let pairs = (0..n_pairs)
        .map(|i| {
            let z = length * i as f64 / (n_pairs - 1) as f64;
            (Point3::new(0.0, 0.0, z), Point3::new(2.0 * half_width, 0.0, z))
        })
        .collect();
    lattice_from(pairs)
}

/// Midpoints on a circle of `radius` about the origin in the xz-plane,
/// spanning `angle` radians from +x. Sides point along ±y.
pub fn arc_lattice(n_pairs: usize, radius: f64, angle: f64, half_width: f64) -> LatticeStore {
    let pairs = (0..n_pairs)
        .map(|i| {
            let theta = angle * i as f64 / (n_pairs - 1) as f64;
            let m = Point3::new(radius * theta.cos(), 0.0, radius * theta.sin());
            let side = Vector3::y() * half_width;
            (m - side, m + side)
        })
        .collect();
    lattice_from(pairs)
}

/// Straight along z with the left-right direction turning about the axis by
/// `twist` radians in total.
pub fn twisted_lattice(n_pairs: usize, length: f64, half_width: f64, twist: f64) -> LatticeStore {
    let pairs = (0..n_pairs)
        .map(|i| {
            let f = i as f64 / (n_pairs - 1) as f64;
            let m = Point3::new(0.0, 0.0, length * f);
            let phi = twist * f;
            let side = Vector3::new(phi.cos(), phi.sin(), 0.0) * half_width;
            (m - side, m + side)
        })
        .collect();
    lattice_from(pairs)
}

/// Straight along z, one pair per entry of `half_widths`, centered on the axis.
pub fn tapered_lattice(half_widths: &[f64], spacing: f64) -> LatticeStore {
    let pairs = half_widths
        .iter()
        .enumerate()
        .map(|(i, hw)| {
            let z = spacing * i as f64;
            (Point3::new(-hw, 0.0, z), Point3::new(*hw, 0.0, z))
        })
        .collect();
    lattice_from(pairs)
}

/// The last pair steps back behind the second one, so the curve doubles back.
pub fn folded_lattice() -> LatticeStore {
    let pairs = [0.0, 10.0, 9.8]
        .iter()
        .map(|z| (Point3::new(0.0, 0.0, *z), Point3::new(2.0, 0.0, *z)))
        .collect();
    lattice_from(pairs)
}

/// Gently bending and twisting lattice along z.
pub fn random_lattice<R: Rng>(rng: &mut R, n_pairs: usize) -> LatticeStore {
    let mut z = 0.0;
    let mut phi: f64 = rng.random_range(0.0..std::f64::consts::TAU);
    let pairs = (0..n_pairs)
        .map(|_| {
            let m = Point3::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0), z);
            let hw = rng.random_range(1.5..4.0);
            let side = Vector3::new(phi.cos(), phi.sin(), 0.0) * hw;
            z += rng.random_range(6.0..10.0);
            phi += rng.random_range(-0.5..0.5);
            (m - side, m + side)
        })
        .collect();
    lattice_from(pairs)
}

/// Geometry of `straight_lattice(2, 10.0, 1.0)` with the default config:
/// 11 planes centered at (1, 0, k), extent 6.
pub fn straight_geometry() -> Geometry {
    let config = StraightenConfig::default();
    Geometry::build(
        &straight_lattice(2, 10.0, 1.0),
        &CrossSectionModeler::new(&config),
        &config,
    )
    .expect("straight lattice geometry")
}

/// 1.0 inside an infinite cylinder parallel to z through `axis_point`, 0.0
/// outside.
pub fn cylinder_volume(extents: [usize; 3], axis_point: Point3<f64>, radius: f64) -> VoxelVolume {
    VoxelVolume::from_fn(extents, |x, y, _| {
        let dx = x as f64 - axis_point.x;
        let dy = y as f64 - axis_point.y;
        if dx * dx + dy * dy <= radius * radius {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod test_utils_tests {
    use super::*;
    use crate::centerline::Centerline;
    use crate::frames::sample_frames;
    use crate::volume::{forward_map_point, InverseMapper, SliceScope};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fixtures_have_expected_shape() {
        let lattice = straight_lattice(3, 10.0, 1.0);
        assert_eq!(lattice.len(), 3);
        assert_eq!(lattice.pairs()[2].midpoint(), Point3::new(1.0, 0.0, 10.0));
        assert_eq!(tapered_lattice(&[1.0, 2.0], 5.0).pairs()[1].half_width(), 2.0);

        let volume = cylinder_volume([8, 8, 2], Point3::new(4.0, 4.0, 0.0), 2.0);
        assert_eq!(volume.get(4, 6, 1, 0), Some(1.0));
        assert_eq!(volume.get(4, 7, 1, 0), Some(0.0));
    }

    #[test]
    fn test_random_lattices_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(17);
        let config = StraightenConfig::default();
        for round in 0..8 {
            let n_pairs = rng.random_range(3..7);
            let lattice = random_lattice(&mut rng, n_pairs);
            let centerline = Centerline::from_lattice(&lattice, config.arc_samples_per_segment)
                .unwrap_or_else(|e| panic!("round {round}: {e}"));
            let frames = sample_frames(&centerline, lattice.pairs(), &config)
                .unwrap_or_else(|e| panic!("round {round}: {e}"));

            assert!(frames.lattice_slices.windows(2).all(|w| w[1] > w[0]));
            for f in &frames.frames {
                assert!(f.is_orthonormal(1e-9), "round {round} frame {}", f.index);
                assert!(f.is_right_handed(1e-9), "round {round} frame {}", f.index);
                assert!(f.diameter >= frames.min_diameter);
            }

            let geometry =
                Geometry::build(&lattice, &CrossSectionModeler::new(&config), &config).unwrap();
            let mapper = InverseMapper::new(&geometry.planes, geometry.extent(), &config);
            let bound = 2 * geometry.extent();
            for _ in 0..5 {
                let k = rng.random_range(0..geometry.slice_count());
                let i = rng.random_range(0..bound) as f64;
                let j = rng.random_range(0..bound) as f64;
                let p = forward_map_point(&geometry.planes[k], geometry.extent(), i, j);
                let found = mapper.locate("p", &p, SliceScope::Slice(k)).unwrap();
                let s = found.straightened;
                let back = geometry.forward_map_point(s.x, s.y, s.z as usize).unwrap();
                assert!(nalgebra::distance(&back, &p) <= 1.0, "round {round}");
            }
        }
    }
}
