//! Clustering behavior on synthetic blob data.
#![allow(clippy::uninlined_format_args)]

use nalgebra::Vector3;
use rustlat_algorithms::DbscanClustering;

/// Deterministic pseudo-random offsets in [-half_width, half_width].
struct Lcg(u64);

impl Lcg {
    fn next_offset(&mut self, half_width: f64) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let unit = (self.0 >> 11) as f64 / (1u64 << 53) as f64;
        (unit * 2.0 - 1.0) * half_width
    }
}

fn blob(center: Vector3<f64>, count: usize, spread: f64, rng: &mut Lcg) -> Vec<Vector3<f64>> {
    (0..count)
        .map(|_| {
            center
                + Vector3::new(
                    rng.next_offset(spread),
                    rng.next_offset(spread),
                    rng.next_offset(spread),
                )
        })
        .collect()
}

#[test]
fn two_blobs_with_noise_form_exactly_two_clusters() {
    let mut rng = Lcg(42);
    let mut points = blob(Vector3::new(0.2, 0.0, 0.0), 100, 0.01, &mut rng);
    points.extend(blob(Vector3::new(-0.2, 0.1, 0.1), 100, 0.01, &mut rng));
    // Isolated noise, far from both blobs.
    let noise_start = points.len();
    points.push(Vector3::new(0.5, 0.5, 0.5));
    points.push(Vector3::new(-0.5, -0.4, 0.3));
    points.push(Vector3::new(0.0, -0.6, -0.5));

    let clustering = DbscanClustering::new(0.05, 1.0);
    let mut state = clustering.create_state();
    let clusters = clustering
        .compute_clusters(&mut state, &points, 5, 0.03)
        .unwrap();

    assert_eq!(clusters.len(), 2, "expected exactly two clusters");
    let mut sizes: Vec<usize> = clusters.iter().map(Vec::len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![100, 100]);

    // Noise points belong to no cluster, and no point to two.
    let mut seen = vec![false; points.len()];
    for cluster in &clusters {
        for &index in cluster {
            assert!(!seen[index as usize], "point {} claimed twice", index);
            seen[index as usize] = true;
        }
    }
    for index in noise_start..points.len() {
        assert!(!seen[index], "noise point {} was clustered", index);
    }
}

/// Reusing one grid across calls must not leak state between them.
#[test]
fn grid_reuse_across_calls_is_clean() {
    let mut rng = Lcg(7);
    let clustering = DbscanClustering::new(0.05, 1.0);
    let mut state = clustering.create_state();

    let first = blob(Vector3::new(0.1, 0.1, 0.1), 50, 0.01, &mut rng);
    let clusters = clustering
        .compute_clusters(&mut state, &first, 3, 0.03)
        .unwrap();
    assert_eq!(clusters.len(), 1);

    // A second, disjoint cloud in a different grid region.
    let second = blob(Vector3::new(-0.3, 0.0, 0.2), 50, 0.01, &mut rng);
    let clusters = clustering
        .compute_clusters(&mut state, &second, 3, 0.03)
        .unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 50);
}
