//! Domain error taxonomy.

use thiserror::Error;

/// Errors surfaced by pure domain logic.
///
/// Configuration errors are reported once and never retried: a malformed
/// triggering condition blocks that condition only, not the pipeline.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A triggering condition or routine definition is malformed.
    #[error("configuration error in condition '{condition}': {reason}")]
    Configuration {
        /// Name of the offending triggering condition.
        condition: String,
        /// What made the definition unusable.
        reason: String,
    },

    /// A date field could not be interpreted (e.g. bad `YYYYMMDD` integer).
    #[error("invalid measurement day {0}")]
    InvalidMeasurementDay(i32),
}
