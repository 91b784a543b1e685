//! Candidate direction vectors from peak-pair differences.
//!
//! Recurring offsets between reciprocal-space peaks are themselves
//! lattice vectors. Clustering the pairwise-difference cloud turns those
//! recurring offsets into weighted candidate direction vectors.
#![allow(clippy::cast_precision_loss, clippy::missing_errors_doc)]

use nalgebra::Vector3;
use rustlat_core::Result;

use crate::dbscan::{DbscanClustering, DbscanState};

/// Pairwise difference vectors of `points` whose norms fall inside
/// `[min_norm, max_norm]`.
#[must_use]
pub fn point_autocorrelation(
    points: &[Vector3<f64>],
    min_norm: f64,
    max_norm: f64,
) -> Vec<Vector3<f64>> {
    let mut differences = Vec::new();
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let difference = points[i] - points[j];
            let norm = difference.norm();
            if norm >= min_norm && norm <= max_norm {
                differences.push(difference);
            }
        }
    }
    differences
}

/// A candidate direction vector with its confidence weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedVector {
    /// The direction vector.
    pub vector: Vector3<f64>,
    /// Confidence weight (cluster population, or 1 for lone points).
    pub weight: f64,
}

/// Condenses an autocorrelation cloud into at most `max_count` weighted
/// candidate vectors.
///
/// Dense clusters of recurring offsets are collapsed to their means,
/// weighted by population and taken first (largest clusters first);
/// remaining slots are filled with un-clustered points by ascending
/// norm at weight 1.
pub fn good_autocorrelation_points(
    autocorrelation_points: &[Vector3<f64>],
    dbscan: &DbscanClustering,
    dbscan_state: &mut DbscanState,
    epsilon: f64,
    max_count: usize,
) -> Result<Vec<WeightedVector>> {
    let min_points = 2;
    let mut clusters =
        dbscan.compute_clusters(dbscan_state, autocorrelation_points, min_points, epsilon)?;
    clusters.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut in_cluster = vec![false; autocorrelation_points.len()];
    for cluster in &clusters {
        for &index in cluster {
            in_cluster[index as usize] = true;
        }
    }

    let mut result = Vec::with_capacity(max_count.min(autocorrelation_points.len()));

    for cluster in clusters.iter().take(max_count) {
        let sum: Vector3<f64> = cluster
            .iter()
            .map(|&index| autocorrelation_points[index as usize])
            .sum();
        result.push(WeightedVector {
            vector: sum / cluster.len() as f64,
            weight: cluster.len() as f64,
        });
    }

    if result.len() < max_count {
        let mut outside: Vec<Vector3<f64>> = autocorrelation_points
            .iter()
            .zip(&in_cluster)
            .filter(|(_, &clustered)| !clustered)
            .map(|(point, _)| *point)
            .collect();
        outside.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));

        for point in outside.into_iter().take(max_count - result.len()) {
            result.push(WeightedVector {
                vector: point,
                weight: 1.0,
            });
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autocorrelation_respects_norm_band() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(5.0, 0.0, 0.0),
        ];
        let differences = point_autocorrelation(&points, 0.5, 2.0);
        // Only the (0,1) pair is within the band; (0,2) and (1,2) are
        // too long.
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0], Vector3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn cluster_means_come_before_lone_points() {
        // Six nearly identical offsets plus one lone offset.
        let mut points: Vec<Vector3<f64>> = (0..6)
            .map(|i| Vector3::new(1.0 + f64::from(i) * 0.01, 0.0, 0.0))
            .collect();
        points.push(Vector3::new(0.0, 3.0, 0.0));

        let dbscan = DbscanClustering::new(0.2, 4.0);
        let mut state = dbscan.create_state();
        let candidates =
            good_autocorrelation_points(&points, &dbscan, &mut state, 0.2, 5).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].weight, 6.0);
        assert!((candidates[0].vector.x - 1.025).abs() < 1e-9);
        assert_eq!(candidates[1].weight, 1.0);
        assert_eq!(candidates[1].vector, Vector3::new(0.0, 3.0, 0.0));
    }
}
