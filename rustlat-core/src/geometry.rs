//! Experiment geometry parameters and the detector back-projection.
#![allow(
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

use nalgebra::{Vector2, Vector3};
use std::f64::consts::PI;

use crate::lattice::Lattice;

const H_PLANCK_EV_S: f64 = 4.135_667_662e-15;
const C_LIGHT_M_S: f64 = 299_792_458.0;

/// Two reciprocal vector lengths closer than this factor are treated as
/// one "different" length when deducing bounds from a known lattice.
const MIN_SIMILARITY_FACTOR: f64 = 0.96;

/// Immutable experiment parameters consumed by the indexing engines.
///
/// Supplies the physical bounds used to size the clustering radius, the
/// determinant-range filter and the optimizer step bounds. All lengths
/// are in Ångström (real space) or 1/Å (reciprocal space), distances in
/// metres.
#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    lattice_parameters_known: bool,

    detector_distance_m: f64,
    detector_radius_m: f64,
    divergence_angle_rad: f64,
    non_monochromaticity: f64,
    max_resolution_angle_rad: f64,

    lambda_a: f64,
    lambda_short_a: f64,
    lambda_long_a: f64,
    reciprocal_lambda_1a: f64,

    min_real_lattice_vector_length_a: f64,
    max_real_lattice_vector_length_a: f64,
    min_real_lattice_determinant_a3: f64,
    max_real_lattice_determinant_a3: f64,
    min_reciprocal_lattice_vector_length_1a: f64,
    max_reciprocal_lattice_vector_length_1a: f64,

    different_real_lattice_vector_lengths_a: Vec<f64>,

    sample_reciprocal_lattice_1a: Option<Lattice>,
    sample_real_lattice_a: Option<Lattice>,
    real_lattice_determinant_a3: f64,
}

impl ExperimentSettings {
    /// Builds settings from geometry-file values and a searched range of
    /// real lattice vector lengths.
    pub fn from_geometry_file_values(
        coffset_m: f64,
        clen_mm: f64,
        beam_energy_ev: f64,
        divergence_angle_deg: f64,
        non_monochromaticity: f64,
        pixel_length_m: f64,
        detector_radius_pixel: f64,
        min_real_lattice_vector_length_a: f64,
        max_real_lattice_vector_length_a: f64,
    ) -> Self {
        let detector_distance_m = clen_mm * 1e-3 + coffset_m;
        let detector_radius_m = detector_radius_pixel * pixel_length_m;
        let lambda_a = H_PLANCK_EV_S * C_LIGHT_M_S / beam_energy_ev * 1e10;
        Self::from_searched_range(
            detector_distance_m,
            detector_radius_m,
            divergence_angle_deg,
            non_monochromaticity,
            lambda_a,
            min_real_lattice_vector_length_a,
            max_real_lattice_vector_length_a,
        )
    }

    /// Builds settings from precomputed detector values and a searched
    /// range of real lattice vector lengths.
    pub fn from_searched_range(
        detector_distance_m: f64,
        detector_radius_m: f64,
        divergence_angle_deg: f64,
        non_monochromaticity: f64,
        lambda_a: f64,
        min_real_lattice_vector_length_a: f64,
        max_real_lattice_vector_length_a: f64,
    ) -> Self {
        let min_det = min_real_lattice_vector_length_a.powi(3);
        let max_det = max_real_lattice_vector_length_a.powi(3);
        Self {
            lattice_parameters_known: false,
            detector_distance_m,
            detector_radius_m,
            divergence_angle_rad: divergence_angle_deg * PI / 180.0,
            non_monochromaticity,
            max_resolution_angle_rad: (detector_radius_m / detector_distance_m).atan(),
            lambda_a,
            lambda_short_a: lambda_a * (1.0 - non_monochromaticity / 2.0),
            lambda_long_a: lambda_a * (1.0 + non_monochromaticity / 2.0),
            reciprocal_lambda_1a: 1.0 / lambda_a,
            min_real_lattice_vector_length_a,
            max_real_lattice_vector_length_a,
            min_real_lattice_determinant_a3: min_det,
            max_real_lattice_determinant_a3: max_det,
            min_reciprocal_lattice_vector_length_1a: 1.0 / max_real_lattice_vector_length_a,
            max_reciprocal_lattice_vector_length_1a: 1.0 / min_real_lattice_vector_length_a,
            different_real_lattice_vector_lengths_a: vec![
                min_real_lattice_vector_length_a,
                max_real_lattice_vector_length_a,
            ],
            sample_reciprocal_lattice_1a: None,
            sample_real_lattice_a: None,
            real_lattice_determinant_a3: (min_det + max_det) / 2.0,
        }
    }

    /// Builds settings from a known sample reciprocal lattice; all
    /// lattice bounds are deduced from the (minimized) sample basis.
    pub fn from_known_lattice(
        detector_distance_m: f64,
        detector_radius_m: f64,
        divergence_angle_deg: f64,
        non_monochromaticity: f64,
        lambda_a: f64,
        sample_reciprocal_lattice_1a: &Lattice,
    ) -> Self {
        let mut reciprocal = *sample_reciprocal_lattice_1a;
        reciprocal.minimize();
        let mut real = reciprocal
            .reciprocal()
            .unwrap_or(Lattice::new(nalgebra::Matrix3::identity()));
        real.minimize();

        let real_norms = real.basis_vector_norms();
        let reciprocal_norms = reciprocal.basis_vector_norms();

        // Norms are ordered ascending after minimization; collapse
        // near-identical lengths into a single searched length.
        let different_lengths = collapse_similar_lengths(&[
            real_norms.x,
            real_norms.y,
            real_norms.z,
        ]);

        Self {
            lattice_parameters_known: true,
            detector_distance_m,
            detector_radius_m,
            divergence_angle_rad: divergence_angle_deg * PI / 180.0,
            non_monochromaticity,
            max_resolution_angle_rad: (detector_radius_m / detector_distance_m).atan(),
            lambda_a,
            lambda_short_a: lambda_a * (1.0 - non_monochromaticity / 2.0),
            lambda_long_a: lambda_a * (1.0 + non_monochromaticity / 2.0),
            reciprocal_lambda_1a: 1.0 / lambda_a,
            min_real_lattice_vector_length_a: real_norms.x,
            max_real_lattice_vector_length_a: real_norms.z,
            min_real_lattice_determinant_a3: real.det().abs(),
            max_real_lattice_determinant_a3: real.det().abs(),
            min_reciprocal_lattice_vector_length_1a: reciprocal_norms.x,
            max_reciprocal_lattice_vector_length_1a: reciprocal_norms.z,
            different_real_lattice_vector_lengths_a: different_lengths,
            real_lattice_determinant_a3: real.det().abs(),
            sample_reciprocal_lattice_1a: Some(reciprocal),
            sample_real_lattice_a: Some(real),
        }
    }

    /// True if the sample lattice parameters were supplied.
    pub fn lattice_parameters_known(&self) -> bool {
        self.lattice_parameters_known
    }

    /// Detector distance in metres.
    pub fn detector_distance_m(&self) -> f64 {
        self.detector_distance_m
    }

    /// Detector radius in metres.
    pub fn detector_radius_m(&self) -> f64 {
        self.detector_radius_m
    }

    /// Beam divergence angle in radians.
    pub fn divergence_angle_rad(&self) -> f64 {
        self.divergence_angle_rad
    }

    /// Relative spread of the beam wavelength.
    pub fn non_monochromaticity(&self) -> f64 {
        self.non_monochromaticity
    }

    /// Scattering angle subtended by the detector edge.
    pub fn max_resolution_angle_rad(&self) -> f64 {
        self.max_resolution_angle_rad
    }

    /// Beam wavelength in Å.
    pub fn lambda_a(&self) -> f64 {
        self.lambda_a
    }

    /// Shortest wavelength in the beam in Å.
    pub fn lambda_short_a(&self) -> f64 {
        self.lambda_short_a
    }

    /// Longest wavelength in the beam in Å.
    pub fn lambda_long_a(&self) -> f64 {
        self.lambda_long_a
    }

    /// 1/λ in 1/Å.
    pub fn reciprocal_lambda_1a(&self) -> f64 {
        self.reciprocal_lambda_1a
    }

    /// Smallest expected real lattice vector length in Å.
    pub fn min_real_lattice_vector_length_a(&self) -> f64 {
        self.min_real_lattice_vector_length_a
    }

    /// Largest expected real lattice vector length in Å.
    pub fn max_real_lattice_vector_length_a(&self) -> f64 {
        self.max_real_lattice_vector_length_a
    }

    /// Lower bound of the real unit-cell volume in Å³.
    pub fn min_real_lattice_determinant_a3(&self) -> f64 {
        self.min_real_lattice_determinant_a3
    }

    /// Upper bound of the real unit-cell volume in Å³.
    pub fn max_real_lattice_determinant_a3(&self) -> f64 {
        self.max_real_lattice_determinant_a3
    }

    /// Smallest expected reciprocal lattice vector length in 1/Å.
    pub fn min_reciprocal_lattice_vector_length_1a(&self) -> f64 {
        self.min_reciprocal_lattice_vector_length_1a
    }

    /// Largest expected reciprocal lattice vector length in 1/Å.
    pub fn max_reciprocal_lattice_vector_length_1a(&self) -> f64 {
        self.max_reciprocal_lattice_vector_length_1a
    }

    /// The distinct expected real lattice vector lengths in Å, collapsed
    /// where the sample lattice has near-identical cell edges.
    pub fn different_real_lattice_vector_lengths_a(&self) -> &[f64] {
        &self.different_real_lattice_vector_lengths_a
    }

    /// Expected real unit-cell volume in Å³ (midpoint of the searched
    /// range when the lattice parameters are unknown).
    pub fn real_lattice_determinant_a3(&self) -> f64 {
        self.real_lattice_determinant_a3
    }

    /// The known sample reciprocal lattice, if supplied.
    pub fn sample_reciprocal_lattice_1a(&self) -> Option<&Lattice> {
        self.sample_reciprocal_lattice_1a.as_ref()
    }

    /// The known sample real lattice, if supplied.
    pub fn sample_real_lattice_a(&self) -> Option<&Lattice> {
        self.sample_real_lattice_a.as_ref()
    }
}

fn collapse_similar_lengths(sorted_lengths: &[f64; 3]) -> Vec<f64> {
    let [a, b, c] = *sorted_lengths;
    if a / b > MIN_SIMILARITY_FACTOR {
        if b / c > MIN_SIMILARITY_FACTOR {
            vec![(a + b + c) / 3.0]
        } else {
            vec![(a + b) / 2.0, c]
        }
    } else if b / c > MIN_SIMILARITY_FACTOR {
        vec![a, (b + c) / 2.0]
    } else {
        vec![a, b, c]
    }
}

/// Projects 2D detector peak positions (metres, relative to the beam
/// center) onto the Ewald sphere, yielding 3D reciprocal-space peaks in
/// 1/Å.
///
/// The back-projection direction is (detector distance, x, y); scaling
/// it to length 1/λ and shifting by −1/λ along the beam axis places the
/// scattering vector at the origin of reciprocal space.
#[must_use]
pub fn detector_to_reciprocal(
    detector_peaks_m: &[Vector2<f64>],
    detector_distance_m: f64,
    reciprocal_lambda_1a: f64,
) -> Vec<Vector3<f64>> {
    detector_peaks_m
        .iter()
        .map(|peak| {
            let direction = Vector3::new(detector_distance_m, peak.x, peak.y);
            direction.normalize() * reciprocal_lambda_1a
                - Vector3::new(reciprocal_lambda_1a, 0.0, 0.0)
        })
        .collect()
}
