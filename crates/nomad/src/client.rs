//! Job runner abstraction over the Nomad API.
//!
//! The dispatcher and tracker only depend on [`JobRunner`], so tests can
//! swap in a fake runner and production wires in [`NomadClient`].

use async_trait::async_trait;

use crate::api::{DispatchResponse, JobSpec, JobStatus, NomadApi, NomadApiError};

/// Errors surfaced to the pipeline by a job runner.
#[derive(Debug, thiserror::Error)]
pub enum NomadClientError {
    /// The runner rejected or failed the request.
    #[error(transparent)]
    Api(#[from] NomadApiError),
}

/// A runner's view of one submitted job.
///
/// For a dead job the runner may still hold the routine's final result;
/// `exit_code` carries it when an allocation reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

impl PollReport {
    /// A report carrying only the lifecycle state.
    pub fn status_only(status: JobStatus) -> Self {
        Self {
            status,
            exit_code: None,
            message: None,
        }
    }
}

/// What the pipeline needs from a job runner.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Submit one job; returns the runner-assigned job id on acceptance.
    async fn submit(&self, spec: &JobSpec) -> Result<DispatchResponse, NomadClientError>;

    /// Read the runner's view of a previously submitted job.
    async fn poll(&self, job_id: &str) -> Result<PollReport, NomadClientError>;

    /// Ask the runner to stop a job.
    async fn stop(&self, job_id: &str) -> Result<(), NomadClientError>;
}

/// Production [`JobRunner`] backed by the Nomad HTTP API.
pub struct NomadClient {
    api: NomadApi,
}

impl NomadClient {
    pub fn new(api_url: String) -> Result<Self, NomadClientError> {
        Ok(Self {
            api: NomadApi::new(api_url)?,
        })
    }
}

#[async_trait]
impl JobRunner for NomadClient {
    async fn submit(&self, spec: &JobSpec) -> Result<DispatchResponse, NomadClientError> {
        let response = self.api.dispatch(spec).await?;
        tracing::info!(
            job_name = %spec.name,
            dispatched_job_id = %response.dispatched_job_id,
            "Dispatched Nomad job",
        );
        Ok(response)
    }

    async fn poll(&self, job_id: &str) -> Result<PollReport, NomadClientError> {
        let status = self.api.job_status(job_id).await?;
        if status != JobStatus::Dead {
            return Ok(PollReport::status_only(status));
        }
        let outcome = self.api.job_outcome(job_id).await?;
        Ok(PollReport {
            status,
            exit_code: outcome.as_ref().map(|o| o.exit_code),
            message: outcome.and_then(|o| o.message),
        })
    }

    async fn stop(&self, job_id: &str) -> Result<(), NomadClientError> {
        self.api.stop_job(job_id).await?;
        tracing::info!(job_id, "Stopped Nomad job");
        Ok(())
    }
}
