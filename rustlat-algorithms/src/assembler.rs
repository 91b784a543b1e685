//! Candidate lattice assembly, scoring and non-redundant selection.
//!
//! Candidate direction vectors are combined into basis triples, scored
//! against the observed peaks, filtered by weight and fit quality, and
//! finally reduced to a set of lattices whose covered peak sets do not
//! substantially overlap.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::module_name_repetitions
)]

use nalgebra::Vector3;
use rayon::prelude::*;
use rustlat_core::Lattice;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tuning constants of the assembly pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssemblerConfig {
    /// Candidates kept by the global weight filter (applied before the
    /// statistics pass to bound its cost).
    pub max_count_global_passing_weight_filter: usize,
    /// Top-by-weight candidates unconditionally kept for selection.
    pub max_count_local_passing_weight_filter: usize,
    /// Best-by-relative-defect candidates additionally kept.
    pub max_count_passing_relative_defect_filter: usize,
    /// Minimum number of peaks a vector or lattice must explain.
    pub min_points_on_lattice: usize,
    /// Accepted |det| range of a candidate basis (unit-cell volume).
    pub det_range: (f64, f64),
}

impl AssemblerConfig {
    /// Default filter depths with the given determinant range.
    #[must_use]
    pub fn with_det_range(det_range: (f64, f64)) -> Self {
        Self {
            max_count_global_passing_weight_filter: 500,
            max_count_local_passing_weight_filter: 15,
            max_count_passing_relative_defect_filter: 50,
            min_points_on_lattice: 5,
            det_range,
        }
    }
}

/// Fit statistics of an assembled lattice.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatticeStatistics {
    /// Distinct integer lattice nodes occupied by the matched peaks.
    pub occupied_lattice_points_count: usize,
    /// Mean residual between predicted nodes and peaks, in peak space.
    pub mean_defect: f64,
    /// Mean residual in fractional (pre-rounding) coordinates.
    pub mean_relative_defect: f64,
}

/// A lattice that survived assembly, with its statistics.
#[derive(Debug, Clone)]
pub struct AssembledLattice {
    /// The minimized candidate basis.
    pub lattice: Lattice,
    /// Fit statistics against the matched peaks.
    pub statistics: LatticeStatistics,
    /// Indices of the peaks this lattice explains, ascending.
    pub point_indices: Vec<u16>,
}

// Stage D reduction-factor thresholds, kept exactly as tuned in the
// decision table; the branches are asymmetric on purpose.
const SIGNIFICANT_DET_REDUCTION_FACTOR: f64 = 0.75;
const SIGNIFICANT_POINT_COUNT_REDUCTION_FACTOR: f64 = 0.85;
const SIGNIFICANT_MEAN_DEFECT_REDUCTION_FACTOR: f64 = 0.7;
const SIGNIFICANT_MEAN_RELATIVE_DEFECT_REDUCTION_FACTOR: f64 = 0.8;

#[derive(Debug, Clone)]
struct CandidateLattice {
    lattice: Lattice,
    weight: f64,
    det: f64,
    point_indices: Vec<u16>,
    statistics: LatticeStatistics,
}

/// Assembles candidate lattices from direction-vector triples.
#[derive(Debug, Clone)]
pub struct LatticeAssembler {
    config: AssemblerConfig,
}

impl LatticeAssembler {
    /// Creates an assembler with the given configuration.
    #[must_use]
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Forms, scores and selects lattices from candidate vectors.
    ///
    /// `point_indices_per_vector[i]` lists the peaks close to
    /// `candidate_vectors[i]`. Too few usable vectors yields an empty
    /// result, never an error; every returned lattice respects the
    /// determinant range and the minimum shared-point count.
    #[must_use]
    pub fn assemble_lattices(
        &self,
        candidate_vectors: &[Vector3<f64>],
        candidate_vector_weights: &[f64],
        point_indices_per_vector: &[Vec<u16>],
        peaks: &[Vector3<f64>],
    ) -> Vec<AssembledLattice> {
        let mut candidates =
            self.compute_candidate_lattices(candidate_vectors, candidate_vector_weights, point_indices_per_vector);
        if candidates.is_empty() {
            return Vec::new();
        }

        filter_by_weight(
            &mut candidates,
            self.config.max_count_global_passing_weight_filter,
        );

        candidates.par_iter_mut().for_each(|candidate| {
            candidate.lattice.minimize();
            candidate.det = candidate.lattice.det().abs();
            candidate.statistics = compute_lattice_statistics(candidate, peaks);
        });

        // Final pool: the best few by weight plus the best fits by
        // relative defect; duplicates are resolved during selection.
        let mut pool: Vec<CandidateLattice> = candidates
            .iter()
            .take(self.config.max_count_local_passing_weight_filter)
            .cloned()
            .collect();
        filter_by_relative_defect(
            &mut candidates,
            self.config.max_count_passing_relative_defect_filter,
        );
        pool.extend(candidates);

        self.select_best_lattices(pool)
    }

    /// Stage A: enumerate basis triples and gate them on determinant and
    /// shared-point count.
    fn compute_candidate_lattices(
        &self,
        candidate_vectors: &[Vector3<f64>],
        candidate_vector_weights: &[f64],
        point_indices_per_vector: &[Vec<u16>],
    ) -> Vec<CandidateLattice> {
        let min_points = self.config.min_points_on_lattice;

        // Vectors explaining too few peaks cannot contribute.
        let mut surviving: Vec<(Vector3<f64>, f64, Vec<u16>)> = candidate_vectors
            .iter()
            .zip(candidate_vector_weights)
            .zip(point_indices_per_vector)
            .filter(|((_, _), indices)| indices.len() >= min_points)
            .map(|((vector, weight), indices)| (*vector, *weight, indices.clone()))
            .collect();
        for (_, _, indices) in &mut surviving {
            indices.sort_unstable();
        }

        if surviving.len() < 3 {
            return Vec::new();
        }

        let (det_min, det_max) = self.config.det_range;
        let mut candidates = Vec::new();

        for i in 0..surviving.len() - 2 {
            for j in (i + 1)..surviving.len() - 1 {
                let shared_ij =
                    intersect_sorted(&surviving[i].2, &surviving[j].2);
                if shared_ij.len() < min_points {
                    continue;
                }
                for k in (j + 1)..surviving.len() {
                    let lattice = Lattice::from_vectors(
                        &surviving[i].0,
                        &surviving[j].0,
                        &surviving[k].0,
                    );
                    let abs_det = lattice.det().abs();
                    // Near-zero determinants (coplanar triples) fall out
                    // of the range check with everything else.
                    if abs_det < det_min || abs_det > det_max {
                        continue;
                    }

                    let shared = intersect_sorted(&shared_ij, &surviving[k].2);
                    if shared.len() < min_points {
                        continue;
                    }

                    candidates.push(CandidateLattice {
                        lattice,
                        weight: surviving[i].1 + surviving[j].1 + surviving[k].1,
                        det: abs_det,
                        point_indices: shared,
                        statistics: LatticeStatistics::default(),
                    });
                }
            }
        }

        candidates
    }

    /// Stage D: greedy selection of a non-redundant cover.
    fn select_best_lattices(&self, pool: Vec<CandidateLattice>) -> Vec<AssembledLattice> {
        if pool.is_empty() {
            return Vec::new();
        }

        let mut list = pool;
        list.sort_by(|a, b| b.point_indices.len().cmp(&a.point_indices.len()));

        let mut claimed: Vec<u16> = Vec::with_capacity(1024);
        let mut scratch: Vec<u16> = Vec::with_capacity(1024);

        let mut best = 0;
        while best + 1 < list.len() {
            scratch.clear();
            union_sorted_into(&claimed, &list[best].point_indices, &mut scratch);
            std::mem::swap(&mut claimed, &mut scratch);

            let mut next = best + 1;
            while next < list.len() {
                let uniquely_covered =
                    difference_count_sorted(&list[next].point_indices, &claimed);
                if uniquely_covered >= self.config.min_points_on_lattice {
                    // Explains genuinely new peaks; it stays.
                    next += 1;
                } else if list[next].point_indices.len() as f64
                    > list[best].point_indices.len() as f64
                        * SIGNIFICANT_POINT_COUNT_REDUCTION_FACTOR
                {
                    // Near-duplicate of the current best: decide which of
                    // the pair survives.
                    if challenger_displaces_best(&list[next], &list[best]) {
                        let challenger = list.remove(next);
                        list[best] = challenger;
                        // Rescan the remainder against the new best; its
                        // points were already folded into `claimed`.
                    } else {
                        list.remove(next);
                    }
                } else {
                    // Clear subset with significantly fewer points.
                    list.remove(next);
                }
            }
            best += 1;
        }

        list.into_iter()
            .map(|candidate| AssembledLattice {
                lattice: candidate.lattice,
                statistics: candidate.statistics,
                point_indices: candidate.point_indices,
            })
            .collect()
    }
}

/// The three alternative acceptance rules deciding whether a
/// near-duplicate challenger replaces the current best: a meaningfully
/// smaller unit cell with meaningfully better (or comparable,
/// scale-adjusted) defects wins, as does a plainly better fit. The
/// branches overlap partly and are numerically asymmetric; they are
/// preserved exactly as tuned.
fn challenger_displaces_best(next: &CandidateLattice, best: &CandidateLattice) -> bool {
    let next_stats = &next.statistics;
    let best_stats = &best.statistics;

    (next.det <= best.det * SIGNIFICANT_DET_REDUCTION_FACTOR
        && next_stats.mean_defect
            * SIGNIFICANT_MEAN_DEFECT_REDUCTION_FACTOR.min(1.5 / (best.det / next.det))
            < best_stats.mean_defect
        && next_stats.mean_relative_defect * SIGNIFICANT_MEAN_RELATIVE_DEFECT_REDUCTION_FACTOR
            < best_stats.mean_relative_defect)
        || (next.det * SIGNIFICANT_DET_REDUCTION_FACTOR <= best.det
            && next_stats.mean_defect < best_stats.mean_defect)
        || (next_stats.mean_defect
            < best_stats.mean_defect
                * SIGNIFICANT_MEAN_DEFECT_REDUCTION_FACTOR.min(1.5 / (next.det / best.det))
            && next_stats.mean_relative_defect
                < best_stats.mean_relative_defect
                    * SIGNIFICANT_MEAN_RELATIVE_DEFECT_REDUCTION_FACTOR)
}

/// Stage B: Miller indices, occupied-node count and defect measures for
/// one candidate against its matched peaks.
fn compute_lattice_statistics(
    candidate: &CandidateLattice,
    peaks: &[Vector3<f64>],
) -> LatticeStatistics {
    let basis = candidate.lattice.basis();
    let Some(basis_inverse) = basis.try_inverse() else {
        return LatticeStatistics {
            occupied_lattice_points_count: 0,
            mean_defect: f64::INFINITY,
            mean_relative_defect: f64::INFINITY,
        };
    };

    let mut miller_indices: Vec<(i64, i64, i64)> =
        Vec::with_capacity(candidate.point_indices.len());
    let mut defect_sum = 0.0;
    let mut relative_defect_sum = 0.0;

    for &peak_index in &candidate.point_indices {
        let peak = peaks[peak_index as usize];
        // Fractional coordinates: solve basis · x = peak.
        let fractional = basis_inverse * peak;
        let miller = Vector3::new(
            fractional.x.round(),
            fractional.y.round(),
            fractional.z.round(),
        );
        miller_indices.push((miller.x as i64, miller.y as i64, miller.z as i64));

        let predicted = basis * miller;
        defect_sum += (predicted - peak).norm();
        relative_defect_sum += (fractional - miller).norm();
    }

    let count = candidate.point_indices.len() as f64;

    // Duplicate detection via sort-then-scan; a hash set is slower for
    // these small index sets.
    miller_indices.sort_unstable();
    miller_indices.dedup();

    LatticeStatistics {
        occupied_lattice_points_count: miller_indices.len(),
        mean_defect: defect_sum / count,
        mean_relative_defect: relative_defect_sum / count,
    }
}

/// Keeps the `max_to_take` highest-weight candidates, descending.
fn filter_by_weight(candidates: &mut Vec<CandidateLattice>, max_to_take: usize) {
    candidates.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    candidates.truncate(max_to_take);
}

/// Keeps the `max_to_take` candidates with the smallest mean relative
/// defect, ascending.
fn filter_by_relative_defect(candidates: &mut Vec<CandidateLattice>, max_to_take: usize) {
    candidates.sort_by(|a, b| {
        a.statistics
            .mean_relative_defect
            .total_cmp(&b.statistics.mean_relative_defect)
    });
    candidates.truncate(max_to_take);
}

fn intersect_sorted(left: &[u16], right: &[u16]) -> Vec<u16> {
    let mut result = Vec::with_capacity(left.len().min(right.len()));
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(left[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}

fn union_sorted_into(left: &[u16], right: &[u16], out: &mut Vec<u16>) {
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Less => {
                out.push(left[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(right[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(left[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&left[i..]);
    out.extend_from_slice(&right[j..]);
}

/// Number of elements of sorted `left` missing from sorted `right`.
fn difference_count_sorted(left: &[u16], right: &[u16]) -> usize {
    let mut count = 0;
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Less => {
                count += 1;
                i += 1;
            }
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    count + (left.len() - i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cubic_setup(cell: f64, nodes: i64) -> (Vec<Vector3<f64>>, Vec<Vec<u16>>) {
        let mut peaks = Vec::new();
        for h in -nodes..=nodes {
            for k in -nodes..=nodes {
                for l in -nodes..=nodes {
                    if h == 0 && k == 0 && l == 0 {
                        continue;
                    }
                    peaks.push(Vector3::new(
                        h as f64 * cell,
                        k as f64 * cell,
                        l as f64 * cell,
                    ));
                }
            }
        }
        let all_indices: Vec<u16> = (0..peaks.len() as u16).collect();
        (peaks, vec![all_indices.clone(), all_indices.clone(), all_indices])
    }

    #[test]
    fn perfect_cubic_lattice_is_recovered() {
        let cell = 0.2; // reciprocal cell edge for a 5 Å cubic lattice
        let (peaks, indices) = cubic_setup(cell, 1);
        let vectors = vec![
            Vector3::new(cell, 0.0, 0.0),
            Vector3::new(0.0, cell, 0.0),
            Vector3::new(0.0, 0.0, cell),
        ];
        let det = cell.powi(3);
        let assembler =
            LatticeAssembler::new(AssemblerConfig::with_det_range((det * 0.8, det * 1.2)));

        let lattices = assembler.assemble_lattices(&vectors, &[1.0, 1.0, 1.0], &indices, &peaks);

        assert_eq!(lattices.len(), 1);
        let result = &lattices[0];
        assert_relative_eq!(result.lattice.det().abs(), det, epsilon = 1e-12);
        assert!(result.statistics.mean_defect < 1e-9);
        assert!(result.statistics.mean_relative_defect < 1e-9);
        assert_eq!(result.statistics.occupied_lattice_points_count, peaks.len());
    }

    #[test]
    fn det_outside_range_yields_nothing() {
        let cell = 0.2;
        let (peaks, indices) = cubic_setup(cell, 1);
        let vectors = vec![
            Vector3::new(cell, 0.0, 0.0),
            Vector3::new(0.0, cell, 0.0),
            Vector3::new(0.0, 0.0, cell),
        ];
        let assembler = LatticeAssembler::new(AssemblerConfig::with_det_range((1.0, 2.0)));
        let lattices = assembler.assemble_lattices(&vectors, &[1.0, 1.0, 1.0], &indices, &peaks);
        assert!(lattices.is_empty());
    }

    #[test]
    fn fewer_than_three_vectors_yields_empty_result() {
        let peaks = vec![Vector3::new(0.2, 0.0, 0.0); 6];
        let indices = vec![vec![0, 1, 2, 3, 4, 5], vec![0, 1, 2, 3, 4, 5]];
        let vectors = vec![Vector3::new(0.2, 0.0, 0.0), Vector3::new(0.0, 0.2, 0.0)];
        let assembler = LatticeAssembler::new(AssemblerConfig::with_det_range((0.0, 10.0)));
        let lattices = assembler.assemble_lattices(&vectors, &[1.0, 1.0], &indices, &peaks);
        assert!(lattices.is_empty());
    }

    #[test]
    fn too_few_shared_points_yields_empty_result() {
        let cell = 0.2;
        let (peaks, _) = cubic_setup(cell, 1);
        let vectors = vec![
            Vector3::new(cell, 0.0, 0.0),
            Vector3::new(0.0, cell, 0.0),
            Vector3::new(0.0, 0.0, cell),
        ];
        // Disjoint index sets: no triple shares enough points.
        let indices = vec![
            vec![0, 1, 2, 3, 4],
            vec![5, 6, 7, 8, 9],
            vec![10, 11, 12, 13, 14],
        ];
        let det = cell.powi(3);
        let assembler =
            LatticeAssembler::new(AssemblerConfig::with_det_range((det * 0.8, det * 1.2)));
        let lattices = assembler.assemble_lattices(&vectors, &[1.0, 1.0, 1.0], &indices, &peaks);
        assert!(lattices.is_empty());
    }

    #[test]
    fn identical_coverage_keeps_exactly_one() {
        let cell = 0.2;
        let (peaks, _) = cubic_setup(cell, 1);
        let all_indices: Vec<u16> = (0..peaks.len() as u16).collect();
        // Four vectors: the axes plus a slightly perturbed duplicate of
        // the first axis, all covering the same peaks. Two candidate
        // triples pass the det filter and cover identical point sets;
        // exactly one may survive.
        let vectors = vec![
            Vector3::new(cell, 0.0, 0.0),
            Vector3::new(0.0, cell, 0.0),
            Vector3::new(0.0, 0.0, cell),
            Vector3::new(cell * 1.001, 0.0, 0.0),
        ];
        let indices = vec![all_indices.clone(); 4];
        let det = cell.powi(3);
        let assembler =
            LatticeAssembler::new(AssemblerConfig::with_det_range((det * 0.5, det * 1.5)));
        let lattices =
            assembler.assemble_lattices(&vectors, &[1.0; 4], &indices, &peaks);
        assert_eq!(lattices.len(), 1);
    }

    #[test]
    fn smaller_cell_better_fit_displaces_coarser_duplicate() {
        // Peaks on a 0.1-edge cubic lattice; both the exact-cell triple
        // and a doubled-cell triple cover every peak, but the doubled
        // cell carries far more weight and therefore leads the
        // selection. The exact cell (8x smaller volume, zero defect)
        // must displace it.
        let cell = 0.1;
        let (peaks, _) = cubic_setup(cell, 1);
        let all_indices: Vec<u16> = (0..peaks.len() as u16).collect();
        let vectors = vec![
            Vector3::new(2.0 * cell, 0.0, 0.0),
            Vector3::new(0.0, 2.0 * cell, 0.0),
            Vector3::new(0.0, 0.0, 2.0 * cell),
            Vector3::new(cell, 0.0, 0.0),
            Vector3::new(0.0, cell, 0.0),
            Vector3::new(0.0, 0.0, cell),
        ];
        let weights = [10.0, 10.0, 10.0, 1.0, 1.0, 1.0];
        let indices = vec![all_indices; 6];

        let exact_det = cell.powi(3);
        let coarse_det = (2.0 * cell).powi(3);
        let assembler = LatticeAssembler::new(AssemblerConfig::with_det_range((
            exact_det * 0.8,
            coarse_det * 1.5,
        )));
        let lattices = assembler.assemble_lattices(&vectors, &weights, &indices, &peaks);

        assert_eq!(lattices.len(), 1);
        let survivor = &lattices[0];
        assert_relative_eq!(survivor.lattice.det().abs(), exact_det, epsilon = 1e-12);
        assert!(survivor.statistics.mean_defect < 1e-9);
        assert_eq!(survivor.statistics.occupied_lattice_points_count, peaks.len());
    }

    fn scored_candidate(
        det: f64,
        mean_defect: f64,
        mean_relative_defect: f64,
    ) -> CandidateLattice {
        CandidateLattice {
            lattice: Lattice::new(nalgebra::Matrix3::identity()),
            weight: 0.0,
            det,
            point_indices: Vec::new(),
            statistics: LatticeStatistics {
                occupied_lattice_points_count: 0,
                mean_defect,
                mean_relative_defect,
            },
        }
    }

    #[test]
    fn near_duplicate_acceptance_rules() {
        let best = scored_candidate(1.0, 1.0, 1.0);

        // Significantly smaller cell with adequately better defects.
        assert!(challenger_displaces_best(
            &scored_candidate(0.5, 1.2, 1.2),
            &best
        ));
        // Comparable cell, strictly better mean defect.
        assert!(challenger_displaces_best(
            &scored_candidate(1.0, 0.9, 1.5),
            &best
        ));
        // Larger cell, sharply better defects on both measures.
        assert!(challenger_displaces_best(
            &scored_candidate(1.5, 0.5, 0.5),
            &best
        ));

        // Slightly smaller cell with worse defects loses.
        assert!(!challenger_displaces_best(
            &scored_candidate(0.9, 1.1, 1.1),
            &best
        ));
        // An identically scored duplicate loses.
        assert!(!challenger_displaces_best(
            &scored_candidate(1.0, 1.0, 1.0),
            &best
        ));
    }

    #[test]
    fn surviving_lattices_respect_postconditions() {
        let cell = 0.25;
        let (peaks, indices) = cubic_setup(cell, 1);
        let vectors = vec![
            Vector3::new(cell, 0.0, 0.0),
            Vector3::new(0.0, cell, 0.0),
            Vector3::new(0.0, 0.0, cell),
            Vector3::new(cell, cell, 0.0),
            Vector3::new(0.0, cell, cell),
        ];
        let mut point_indices = indices;
        point_indices.push(point_indices[0].clone());
        point_indices.push(point_indices[0].clone());

        let det = cell.powi(3);
        let det_range = (det * 0.5, det * 1.5);
        let assembler = LatticeAssembler::new(AssemblerConfig::with_det_range(det_range));
        let lattices =
            assembler.assemble_lattices(&vectors, &[1.0; 5], &point_indices, &peaks);

        assert!(!lattices.is_empty());
        for assembled in &lattices {
            let abs_det = assembled.lattice.det().abs();
            assert!(abs_det >= det_range.0 && abs_det <= det_range.1);
            assert!(assembled.point_indices.len() >= assembler.config().min_points_on_lattice);
        }
    }
}
