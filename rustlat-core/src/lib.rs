//! rustlat-core: Core types and traits for diffraction pattern indexing.
//!
//! This crate provides the foundational abstractions for lattice
//! representation, experiment geometry, scalar-field evaluation and
//! peak extraction.
//!

pub mod error;
pub mod evaluation;
pub mod geometry;
pub mod lattice;

pub use error::{Error, Result};
pub use evaluation::{EvaluatorConfig, FieldEvaluation, FieldEvaluator, PeakExtractor};
pub use geometry::{detector_to_reciprocal, ExperimentSettings};
pub use lattice::Lattice;
