//! Pipeline error type.

use thiserror::Error;

use cryoflow_core::error::DomainError;
use cryoflow_nomad::NomadClientError;

/// Errors surfaced by the pipeline workers.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The store rejected or failed a query.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// A domain rule could not be applied.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The job runner failed a request.
    #[error("job runner error: {0}")]
    Runner(#[from] NomadClientError),
}
