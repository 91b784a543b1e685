//! Reference collaborators for the pipeline tests: a Gaussian-comb
//! field evaluator and a non-maximum-suppression peak extractor.

use nalgebra::Vector3;
use rustlat_algorithms::{EvaluatorConfig, FieldEvaluation, FieldEvaluator, PeakExtractor};

/// Scores a candidate vector `v` by how well the peaks line up with
/// integer multiples of `v` along its own direction: each peak
/// contributes a Gaussian of its deviation from the nearest integer of
/// `p·v / (v·v)`. The field is maximal when `v` is a lattice vector of
/// the peak cloud.
pub struct GaussianCombEvaluator;

impl GaussianCombEvaluator {
    fn comb_value(config: &EvaluatorConfig, peaks: &[Vector3<f64>], position: Vector3<f64>) -> f64 {
        let squared_norm = position.norm_squared();
        if squared_norm < 1e-12 {
            return 0.0;
        }
        let sigma = config.max_close_to_peak_deviation / (1.0 + config.optional_function_argument);
        let mut value = 0.0;
        for peak in peaks {
            let fractional = peak.dot(&position) / squared_norm;
            let deviation = fractional - fractional.round();
            if config.local_transform && deviation.abs() >= config.max_close_to_peak_deviation {
                continue;
            }
            let weight = if config.radial_weighting {
                1.0 / peak.norm().max(1e-12)
            } else {
                1.0
            };
            value += weight * (-deviation * deviation / (2.0 * sigma * sigma)).exp();
        }
        value
    }
}

impl FieldEvaluator for GaussianCombEvaluator {
    fn evaluate(
        &self,
        config: &EvaluatorConfig,
        peaks: &[Vector3<f64>],
        positions: &[Vector3<f64>],
    ) -> FieldEvaluation {
        let mut evaluation = FieldEvaluation::default();

        for &position in positions {
            evaluation
                .values
                .push(Self::comb_value(config, peaks, position));

            // Central-difference gradient; accuracy is plenty for an
            // ascent direction.
            let step = 1e-6 * position.norm().max(1e-3);
            let mut gradient = Vector3::zeros();
            for axis in 0..3 {
                let mut forward = position;
                let mut backward = position;
                forward[axis] += step;
                backward[axis] -= step;
                gradient[axis] = (Self::comb_value(config, peaks, forward)
                    - Self::comb_value(config, peaks, backward))
                    / (2.0 * step);
            }
            evaluation.gradients.push(gradient);

            let squared_norm = position.norm_squared();
            let mut close: Vec<u16> = Vec::new();
            if squared_norm >= 1e-12 {
                for (peak_index, peak) in peaks.iter().enumerate() {
                    let fractional = peak.dot(&position) / squared_norm;
                    if (fractional - fractional.round()).abs()
                        < config.max_close_to_peak_deviation
                    {
                        close.push(peak_index as u16);
                    }
                }
            }
            evaluation.close_peak_counts.push(close.len());
            evaluation.close_peak_indices.push(close);
        }

        evaluation
    }
}

/// Keeps the highest-scored positions, greedily suppressing any
/// position within `min_distance` of an already kept one.
pub struct NonMaxSuppressionExtractor {
    pub min_distance: f64,
}

impl PeakExtractor for NonMaxSuppressionExtractor {
    fn find_peaks(
        &self,
        positions: &mut Vec<Vector3<f64>>,
        scores: &mut Vec<f64>,
        max_count: Option<usize>,
    ) {
        let mut order: Vec<usize> = (0..positions.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let cap = max_count.unwrap_or(usize::MAX);
        let mut kept_positions: Vec<Vector3<f64>> = Vec::new();
        let mut kept_scores: Vec<f64> = Vec::new();
        for index in order {
            if kept_positions.len() >= cap {
                break;
            }
            let candidate = positions[index];
            let suppressed = kept_positions
                .iter()
                .any(|kept| (kept - candidate).norm() < self.min_distance);
            if !suppressed {
                kept_positions.push(candidate);
                kept_scores.push(scores[index]);
            }
        }

        *positions = kept_positions;
        *scores = kept_scores;
    }
}
