//! Multi-stage indexing pipeline with autocorrelation prefit.
//!
//! Stages: candidate direction vectors from the autocorrelation cloud,
//! coarse global hill climbing over the sample grid, sparse peak
//! extraction, fine local hill climbing, and lattice assembly. Every
//! stage degrades gracefully when it finds too little signal.
#![allow(clippy::cast_precision_loss)]

use nalgebra::{Vector2, Vector3};
use rustlat_core::{
    detector_to_reciprocal, EvaluatorConfig, ExperimentSettings, FieldEvaluator, PeakExtractor,
    Result,
};

use crate::assembler::{AssembledLattice, AssemblerConfig, LatticeAssembler};
use crate::autocorrelation::{good_autocorrelation_points, point_autocorrelation};
use crate::dbscan::{DbscanClustering, DbscanState};
use crate::hill_climbing::{HillClimbingConfig, HillClimbingOptimizer, StepConfig};

const MAX_CLOSE_TO_PEAK_DEVIATION: f64 = 0.15;
const MAX_AUTOCORRELATION_VECTOR_COUNT: usize = 20;
const MIN_AUTOCORRELATION_VECTOR_COUNT: usize = 5;
const PREFIT_KEPT_PER_SUBSTAGE: usize = 100;
const GLOBAL_KEPT_PEAK_COUNT: usize = 50;

/// The autocorrelation-prefit indexer.
///
/// Owns the clustering grid and the optimizer scratch so repeated calls
/// reuse their allocations; not safe for concurrent calls on one
/// instance.
pub struct AutocorrPrefitIndexer {
    settings: ExperimentSettings,
    dbscan: DbscanClustering,
    dbscan_state: DbscanState,
    optimizer: HillClimbingOptimizer,
    min_norm_in_autocorrelation: f64,
    max_norm_in_autocorrelation: f64,
    dbscan_epsilon: f64,
}

impl AutocorrPrefitIndexer {
    /// Builds the indexer, sizing the clustering grid from the
    /// experiment's reciprocal-space bounds.
    #[must_use]
    pub fn new(settings: ExperimentSettings) -> Self {
        let max_norm_in_autocorrelation =
            settings.max_reciprocal_lattice_vector_length_1a() * 5.0;
        let min_norm_in_autocorrelation =
            settings.min_reciprocal_lattice_vector_length_1a() * 0.7;
        let dbscan_epsilon = settings.min_reciprocal_lattice_vector_length_1a() * 0.15;
        let dbscan = DbscanClustering::new(dbscan_epsilon, max_norm_in_autocorrelation);
        let dbscan_state = dbscan.create_state();

        Self {
            settings,
            dbscan,
            dbscan_state,
            optimizer: HillClimbingOptimizer::new(),
            min_norm_in_autocorrelation,
            max_norm_in_autocorrelation,
            dbscan_epsilon,
        }
    }

    /// The experiment settings this indexer was built for.
    #[must_use]
    pub fn settings(&self) -> &ExperimentSettings {
        &self.settings
    }

    /// Indexes detector-space peak positions (metres).
    ///
    /// # Errors
    /// Propagates parameter-validation failures from the clustering
    /// stage; lack of signal yields an empty result instead.
    pub fn index_detector_peaks<E: FieldEvaluator, P: PeakExtractor>(
        &mut self,
        evaluator: &E,
        peak_extractor: &P,
        detector_peaks_m: &[Vector2<f64>],
        sample_points: &[Vector3<f64>],
    ) -> Result<Vec<AssembledLattice>> {
        let reciprocal_peaks = detector_to_reciprocal(
            detector_peaks_m,
            self.settings.detector_distance_m(),
            self.settings.reciprocal_lambda_1a(),
        );
        self.index(evaluator, peak_extractor, &reciprocal_peaks, sample_points)
    }

    /// Indexes reciprocal-space peak positions (1/Å), searching from the
    /// given sample grid of candidate direction vectors.
    ///
    /// # Errors
    /// Propagates parameter-validation failures from the clustering
    /// stage; lack of signal yields an empty result instead.
    pub fn index<E: FieldEvaluator, P: PeakExtractor>(
        &mut self,
        evaluator: &E,
        peak_extractor: &P,
        reciprocal_peaks: &[Vector3<f64>],
        sample_points: &[Vector3<f64>],
    ) -> Result<Vec<AssembledLattice>> {
        let mut sample_points = sample_points.to_vec();
        if reciprocal_peaks.is_empty() || sample_points.is_empty() {
            return Ok(Vec::new());
        }

        // All step bounds scale with the expected reciprocal cell edge,
        // since the sample vectors live in peak space.
        let search_scale = mean_reciprocal_length(
            self.settings.different_real_lattice_vector_lengths_a(),
        );

        self.autocorr_prefit(
            evaluator,
            peak_extractor,
            reciprocal_peaks,
            &mut sample_points,
            search_scale,
        )?;

        // Coarse global search over the (possibly prefitted) sample grid.
        let global_config = HillClimbingConfig {
            initial_iteration_count: 3,
            calm_down_iteration_count: 3,
            calm_down_factor: 0.7,
            local_fit_iteration_count: 3,
            local_calm_down_iteration_count: 3,
            local_calm_down_factor: 0.7,
            step: StepConfig {
                gamma: 0.65,
                min_step: search_scale / 200.0,
                max_step: search_scale / 20.0,
                direction_change_factor: 1.5,
            },
            evaluator: EvaluatorConfig {
                function_selection: 1,
                optional_function_argument: 1.0,
                max_close_to_peak_deviation: MAX_CLOSE_TO_PEAK_DEVIATION,
                local_transform: false,
                radial_weighting: false,
            },
        };
        let outcome = self.optimizer.optimize(
            &global_config,
            evaluator,
            reciprocal_peaks,
            &mut sample_points,
            None,
        );
        let mut scores = outcome.values;
        peak_extractor.find_peaks(&mut sample_points, &mut scores, Some(GLOBAL_KEPT_PEAK_COUNT));

        // Fine refinement onto the true peaks: local phases only.
        let peaks_config = HillClimbingConfig {
            initial_iteration_count: 0,
            calm_down_iteration_count: 0,
            calm_down_factor: 0.0,
            local_fit_iteration_count: 10,
            local_calm_down_iteration_count: 20,
            local_calm_down_factor: 0.85,
            step: StepConfig {
                gamma: 0.1,
                min_step: search_scale / 20000.0,
                max_step: search_scale / 2000.0,
                direction_change_factor: 2.5,
            },
            evaluator: EvaluatorConfig {
                function_selection: 9,
                optional_function_argument: 8.0,
                max_close_to_peak_deviation: MAX_CLOSE_TO_PEAK_DEVIATION,
                local_transform: false,
                radial_weighting: false,
            },
        };
        self.optimizer.optimize(
            &peaks_config,
            evaluator,
            reciprocal_peaks,
            &mut sample_points,
            None,
        );

        // Final local evaluation supplies the assembler's vector weights
        // and per-vector close-peak index lists.
        let final_config = EvaluatorConfig {
            function_selection: 9,
            optional_function_argument: 8.0,
            max_close_to_peak_deviation: MAX_CLOSE_TO_PEAK_DEVIATION,
            local_transform: true,
            radial_weighting: false,
        };
        let evaluation = evaluator.evaluate(&final_config, reciprocal_peaks, &sample_points);

        // The assembled basis spans peak space, so the unit-cell volume
        // filter runs on the reciprocal determinant.
        let det_range = match self.settings.sample_reciprocal_lattice_1a() {
            Some(reciprocal) => {
                let expected = reciprocal.det().abs();
                (expected * 0.8, expected * 1.2)
            }
            None => (
                1.0 / self.settings.max_real_lattice_determinant_a3(),
                1.0 / self.settings.min_real_lattice_determinant_a3(),
            ),
        };
        let assembler = LatticeAssembler::new(AssemblerConfig::with_det_range(det_range));
        Ok(assembler.assemble_lattices(
            &sample_points,
            &evaluation.values,
            &evaluation.close_peak_indices,
            reciprocal_peaks,
        ))
    }

    /// Seeds the sample grid near likely lattice vectors using the
    /// autocorrelation cloud. Skipped (leaving the grid untouched) when
    /// too few recurring offsets are found.
    fn autocorr_prefit<E: FieldEvaluator, P: PeakExtractor>(
        &mut self,
        evaluator: &E,
        peak_extractor: &P,
        reciprocal_peaks: &[Vector3<f64>],
        sample_points: &mut Vec<Vector3<f64>>,
        search_scale: f64,
    ) -> Result<()> {
        let autocorrelation_cloud = point_autocorrelation(
            reciprocal_peaks,
            self.min_norm_in_autocorrelation,
            self.max_norm_in_autocorrelation,
        );
        let candidates = good_autocorrelation_points(
            &autocorrelation_cloud,
            &self.dbscan,
            &mut self.dbscan_state,
            self.dbscan_epsilon,
            MAX_AUTOCORRELATION_VECTOR_COUNT,
        )?;
        if candidates.len() < MIN_AUTOCORRELATION_VECTOR_COUNT {
            return Ok(());
        }
        let autocorrelation_vectors: Vec<Vector3<f64>> =
            candidates.iter().map(|c| c.vector).collect();

        // Climb the sample grid toward the recurring offsets.
        let prefit_config = HillClimbingConfig {
            initial_iteration_count: 5,
            calm_down_iteration_count: 3,
            calm_down_factor: 0.8,
            local_fit_iteration_count: 3,
            local_calm_down_iteration_count: 3,
            local_calm_down_factor: 0.75,
            step: StepConfig {
                gamma: 0.65,
                min_step: search_scale / 200.0,
                max_step: search_scale / 10.0,
                direction_change_factor: 1.5,
            },
            evaluator: EvaluatorConfig {
                function_selection: 1,
                optional_function_argument: 1.0,
                max_close_to_peak_deviation: MAX_CLOSE_TO_PEAK_DEVIATION,
                local_transform: false,
                radial_weighting: false,
            },
        };
        let outcome = self.optimizer.optimize(
            &prefit_config,
            evaluator,
            &autocorrelation_vectors,
            sample_points,
            None,
        );

        let mut kept_autocorr = sample_points.clone();
        let mut kept_autocorr_scores = outcome.values;
        peak_extractor.find_peaks(
            &mut kept_autocorr,
            &mut kept_autocorr_scores,
            Some(PREFIT_KEPT_PER_SUBSTAGE),
        );

        // Re-score the optimized grid with the sharper function family,
        // once against the offsets and once against the real peaks.
        let sharp_config = EvaluatorConfig {
            function_selection: 9,
            optional_function_argument: 8.0,
            max_close_to_peak_deviation: MAX_CLOSE_TO_PEAK_DEVIATION,
            local_transform: false,
            radial_weighting: false,
        };

        let mut kept_sharp_autocorr = sample_points.clone();
        let mut kept_sharp_autocorr_scores = evaluator
            .evaluate(&sharp_config, &autocorrelation_vectors, sample_points)
            .values;
        peak_extractor.find_peaks(
            &mut kept_sharp_autocorr,
            &mut kept_sharp_autocorr_scores,
            Some(PREFIT_KEPT_PER_SUBSTAGE),
        );

        let mut kept_sharp_peaks = sample_points.clone();
        let mut kept_sharp_peaks_scores = evaluator
            .evaluate(&sharp_config, reciprocal_peaks, sample_points)
            .values;
        peak_extractor.find_peaks(
            &mut kept_sharp_peaks,
            &mut kept_sharp_peaks_scores,
            Some(PREFIT_KEPT_PER_SUBSTAGE),
        );

        let prefitted_count =
            kept_autocorr.len() + kept_sharp_autocorr.len() + kept_sharp_peaks.len();
        if prefitted_count < 3 {
            return Ok(());
        }

        sample_points.clear();
        sample_points.extend_from_slice(&kept_autocorr);
        sample_points.extend_from_slice(&kept_sharp_autocorr);
        sample_points.extend_from_slice(&kept_sharp_peaks);
        Ok(())
    }
}

/// Mean reciprocal cell-edge length for the expected real lengths.
fn mean_reciprocal_length(real_lengths_a: &[f64]) -> f64 {
    real_lengths_a.iter().map(|length| 1.0 / length).sum::<f64>() / real_lengths_a.len() as f64
}
