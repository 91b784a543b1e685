//! rustlat-algorithms: Lattice indexing engines for diffraction data.
//!
//! This crate provides the numerical stages of the indexing pipeline:
//! - **DBSCAN** - Grid-accelerated density clustering of reciprocal vectors
//! - **Hill climbing** - Adaptive gradient ascent over sampled fields
//! - **Autocorrelation** - Recurring-offset extraction from peak clouds
//! - **Assembler** - Candidate lattice formation, scoring and selection
//! - **Indexer** - The full autocorrelation-prefit pipeline
//!
#![warn(missing_docs)]

mod assembler;
mod autocorrelation;
mod dbscan;
mod hill_climbing;
mod indexer;

pub use assembler::{
    AssembledLattice, AssemblerConfig, LatticeAssembler, LatticeStatistics,
};
pub use autocorrelation::{good_autocorrelation_points, point_autocorrelation, WeightedVector};
pub use dbscan::{Cluster, DbscanClustering, DbscanState};
pub use hill_climbing::{
    HillClimbingConfig, HillClimbingOptimizer, OptimizationOutcome, StepConfig,
};
pub use indexer::AutocorrPrefitIndexer;

// Re-export the core evaluation seams used throughout the pipeline.
pub use rustlat_core::{EvaluatorConfig, FieldEvaluation, FieldEvaluator, PeakExtractor};
