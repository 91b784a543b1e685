//! Boundary traits for the scalar peak-proximity field and peak
//! extraction.
//!
//! The indexing engines are generic over these collaborators: the field
//! evaluator (an "inverse-space transform" scoring candidate direction
//! vectors against the observed peaks) and the sparse peak finder that
//! keeps local maxima of a scored point set.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration applied to a [`FieldEvaluator`] before a batch query.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EvaluatorConfig {
    /// Selector for the pair-interaction function family.
    pub function_selection: i32,
    /// Auxiliary argument of the selected function (e.g. an exponent).
    pub optional_function_argument: f64,
    /// Deviation below which a peak counts as "close" to a position.
    pub max_close_to_peak_deviation: f64,
    /// Evaluate only the local neighborhood of each position.
    pub local_transform: bool,
    /// Weight peaks by their radial distance.
    pub radial_weighting: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            function_selection: 1,
            optional_function_argument: 1.0,
            max_close_to_peak_deviation: 0.15,
            local_transform: false,
            radial_weighting: false,
        }
    }
}

/// Result of evaluating a batch of candidate positions against a fixed
/// peak set. All vectors are parallel to the evaluated positions.
#[derive(Debug, Clone, Default)]
pub struct FieldEvaluation {
    /// Scalar field value per position.
    pub values: Vec<f64>,
    /// Gradient-like ascent direction per position.
    pub gradients: Vec<Vector3<f64>>,
    /// Number of peaks within the closeness deviation per position.
    pub close_peak_counts: Vec<usize>,
    /// Indices of the peaks considered close, per position, ascending.
    pub close_peak_indices: Vec<Vec<u16>>,
}

/// Scalar field evaluator scoring candidate positions against peaks.
pub trait FieldEvaluator {
    /// Evaluates `positions` against `peaks` under `config`.
    fn evaluate(
        &self,
        config: &EvaluatorConfig,
        peaks: &[Vector3<f64>],
        positions: &[Vector3<f64>],
    ) -> FieldEvaluation;
}

/// Sparse peak finder: keeps the local maxima of a scored point set.
pub trait PeakExtractor {
    /// Reduces `positions`/`scores` in place to the local maxima,
    /// capped to at most `max_count` entries by descending score when a
    /// cap is given.
    fn find_peaks(
        &self,
        positions: &mut Vec<Vector3<f64>>,
        scores: &mut Vec<f64>,
        max_count: Option<usize>,
    );
}
