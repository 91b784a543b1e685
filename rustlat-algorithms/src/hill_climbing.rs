//! Adaptive hill climbing against a peak-proximity field.
//!
//! A batch of candidate direction vectors is moved toward nearby local
//! maxima of an externally supplied scalar field. The run proceeds in
//! four phases (initial, calm-down, local fit, local calm-down); the
//! calm-down phases decay the step bounds each iteration. Candidates are
//! never removed here; pruning them is the caller's job.

use nalgebra::Vector3;
use rayon::prelude::*;
use rustlat_core::{EvaluatorConfig, FieldEvaluator};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Step-update parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepConfig {
    /// Mixing weight between the fresh gradient direction and the
    /// previous step direction (momentum).
    pub gamma: f64,
    /// Lower clamp of the step length.
    pub min_step: f64,
    /// Upper clamp of the step length.
    pub max_step: f64,
    /// Damping divisor applied when the gradient direction opposes the
    /// previous step; its reciprocal is the alignment level that lets
    /// the step grow.
    pub direction_change_factor: f64,
}

/// Full configuration of one optimization run.
///
/// An immutable value passed into [`HillClimbingOptimizer::optimize`];
/// the optimizer itself holds only scratch buffers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HillClimbingConfig {
    /// Coarse global iterations.
    pub initial_iteration_count: usize,
    /// Iterations with step bounds decaying by `calm_down_factor`.
    pub calm_down_iteration_count: usize,
    /// Per-iteration decay of the step bounds in the calm-down phase.
    pub calm_down_factor: f64,
    /// Fine iterations in local-transform mode.
    pub local_fit_iteration_count: usize,
    /// Local iterations with decaying bounds.
    pub local_calm_down_iteration_count: usize,
    /// Per-iteration decay in the local calm-down phase.
    pub local_calm_down_factor: f64,
    /// Step-update parameters.
    pub step: StepConfig,
    /// Evaluator configuration for the run; the local phases and the
    /// final query switch `local_transform` on.
    pub evaluator: EvaluatorConfig,
}

impl Default for HillClimbingConfig {
    fn default() -> Self {
        Self {
            initial_iteration_count: 3,
            calm_down_iteration_count: 3,
            calm_down_factor: 0.7,
            local_fit_iteration_count: 3,
            local_calm_down_iteration_count: 3,
            local_calm_down_factor: 0.7,
            step: StepConfig {
                gamma: 0.65,
                min_step: 0.05,
                max_step: 0.5,
                direction_change_factor: 1.5,
            },
            evaluator: EvaluatorConfig::default(),
        }
    }
}

/// Value, closeness count and close-peak indices at the final positions.
#[derive(Debug, Clone, Default)]
pub struct OptimizationOutcome {
    /// Field value per candidate.
    pub values: Vec<f64>,
    /// Number of peaks close to each candidate.
    pub close_peak_counts: Vec<usize>,
    /// Indices of the peaks close to each candidate.
    pub close_peak_indices: Vec<Vec<u16>>,
}

/// Multi-phase adaptive gradient ascent over a batch of candidates.
#[derive(Debug, Default)]
pub struct HillClimbingOptimizer {
    previous_step_direction: Vec<Vector3<f64>>,
    previous_step_length: Vec<f64>,
}

/// Step length grows by this factor while the gradient direction keeps
/// agreeing with the previous step.
const STEP_GROWTH_FACTOR: f64 = 1.2;

impl HillClimbingOptimizer {
    /// Creates an optimizer with empty scratch buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `positions` toward local maxima of the field evaluated
    /// against `peaks`, in place.
    ///
    /// With `orthogonal_reference` set, every step is projected to stay
    /// orthogonal to that direction (used when refining vectors that
    /// must remain independent of an already-fixed one). Returns the
    /// evaluation at the final positions.
    pub fn optimize<E: FieldEvaluator>(
        &mut self,
        config: &HillClimbingConfig,
        evaluator: &E,
        peaks: &[Vector3<f64>],
        positions: &mut [Vector3<f64>],
        orthogonal_reference: Option<&Vector3<f64>>,
    ) -> OptimizationOutcome {
        let candidate_count = positions.len();
        if candidate_count == 0 || peaks.is_empty() {
            return OptimizationOutcome::default();
        }

        self.previous_step_direction.clear();
        self.previous_step_direction
            .resize(candidate_count, Vector3::zeros());
        self.previous_step_length.clear();
        self.previous_step_length
            .resize(candidate_count, config.step.max_step / 4.0);

        let global_config = EvaluatorConfig {
            local_transform: false,
            ..config.evaluator.clone()
        };
        let local_config = EvaluatorConfig {
            local_transform: true,
            ..config.evaluator.clone()
        };

        let mut min_step = config.step.min_step;
        let mut max_step = config.step.max_step;

        for _ in 0..config.initial_iteration_count {
            self.iterate(
                config,
                evaluator,
                &global_config,
                peaks,
                positions,
                orthogonal_reference,
                min_step,
                max_step,
            );
        }
        for _ in 0..config.calm_down_iteration_count {
            min_step *= config.calm_down_factor;
            max_step *= config.calm_down_factor;
            self.iterate(
                config,
                evaluator,
                &global_config,
                peaks,
                positions,
                orthogonal_reference,
                min_step,
                max_step,
            );
        }
        for _ in 0..config.local_fit_iteration_count {
            self.iterate(
                config,
                evaluator,
                &local_config,
                peaks,
                positions,
                orthogonal_reference,
                min_step,
                max_step,
            );
        }
        for _ in 0..config.local_calm_down_iteration_count {
            min_step *= config.local_calm_down_factor;
            max_step *= config.local_calm_down_factor;
            self.iterate(
                config,
                evaluator,
                &local_config,
                peaks,
                positions,
                orthogonal_reference,
                min_step,
                max_step,
            );
        }

        let final_evaluation = evaluator.evaluate(&local_config, peaks, positions);
        OptimizationOutcome {
            values: final_evaluation.values,
            close_peak_counts: final_evaluation.close_peak_counts,
            close_peak_indices: final_evaluation.close_peak_indices,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn iterate<E: FieldEvaluator>(
        &mut self,
        config: &HillClimbingConfig,
        evaluator: &E,
        evaluator_config: &EvaluatorConfig,
        peaks: &[Vector3<f64>],
        positions: &mut [Vector3<f64>],
        orthogonal_reference: Option<&Vector3<f64>>,
        min_step: f64,
        max_step: f64,
    ) {
        let evaluation = evaluator.evaluate(evaluator_config, peaks, positions);
        let gamma = config.step.gamma;
        let direction_change_factor = config.step.direction_change_factor;
        let aligned_threshold = 1.0 / direction_change_factor;
        let reference_unit = orthogonal_reference.and_then(|r| r.try_normalize(f64::MIN_POSITIVE));

        positions
            .par_iter_mut()
            .zip(self.previous_step_direction.par_iter_mut())
            .zip(self.previous_step_length.par_iter_mut())
            .zip(evaluation.gradients.par_iter())
            .for_each(|(((position, previous_direction), previous_length), gradient)| {
                let Some(gradient_direction) = gradient.try_normalize(f64::MIN_POSITIVE) else {
                    // Flat field here: stay put, decay toward the floor.
                    *previous_length = min_step.min(*previous_length);
                    return;
                };

                let alignment = gradient_direction.dot(previous_direction);

                let mut direction =
                    gamma * gradient_direction + (1.0 - gamma) * *previous_direction;
                if let Some(reference) = reference_unit {
                    direction -= direction.dot(&reference) * reference;
                }
                let Some(direction) = direction.try_normalize(1e-12) else {
                    // Step fully cancelled (e.g. gradient parallel to the
                    // orthogonalization reference).
                    return;
                };

                // The step shrinks on any direction reversal; growth
                // requires alignment above 1/direction_change_factor.
                let mut length = *previous_length;
                if alignment < 0.0 {
                    length /= direction_change_factor;
                } else if alignment > aligned_threshold {
                    length *= STEP_GROWTH_FACTOR;
                }
                length = length.clamp(min_step, max_step);

                *position += direction * length;
                *previous_direction = direction;
                *previous_length = length;
            });
    }
}
