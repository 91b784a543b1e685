//! Error types for rustlat-core.

use thiserror::Error;

/// Result type alias for rustlat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for rustlat operations.
///
/// Only precondition violations surface as errors. Conditions where the
/// input simply carries too little signal (too few peaks, too few
/// candidate vectors) degrade to empty outputs instead, so a multi-stage
/// search can continue with partial results.
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter violated a precondition of the operation.
    #[error("invalid parameter {name}: {value} (limit: {limit})")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// Value that was passed.
        value: f64,
        /// Bound that was violated.
        limit: f64,
    },
}
