//! REST API client for the Nomad HTTP endpoints.
//!
//! Wraps the small slice of the Nomad API the pipeline needs (parameterized
//! job dispatch and job status reads) using [`reqwest`].

use std::time::Duration;

use cryoflow_core::flavour::Flavour;
use serde::{Deserialize, Serialize};

/// Upper bound on any single request to the cluster.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Resource claim and payload for one dispatched job.
///
/// Built by the dispatcher from the task's processing routine; the resource
/// fields become the Nomad task group constraints.
#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    /// Nomad job name, unique per dispatch.
    pub name: String,
    /// Parameterized Nomad job the dispatch instantiates.
    pub parent_job: String,
    /// Docker image of the processing routine.
    pub docker_image: String,
    /// CPU claim in MHz.
    pub cpu_mhz: i32,
    /// Memory claim in MB.
    pub ram_mb: i32,
    /// Scratch storage claim in GB.
    pub storage_gb: i32,
    /// Worker pool the job must land on.
    pub flavour: Flavour,
    /// Routine-specific parameters, forwarded as the dispatch payload.
    pub payload: serde_json::Value,
}

/// Response returned by the Nomad dispatch endpoint after queuing a job.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchResponse {
    /// Id of the instantiated job, e.g. `parent/dispatch-163...`.
    #[serde(rename = "DispatchedJobID")]
    pub dispatched_job_id: String,
    /// Evaluation created for the dispatch.
    #[serde(rename = "EvalID")]
    pub eval_id: String,
}

/// Lifecycle state of a dispatched job, as reported by Nomad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, no allocation placed yet.
    Pending,
    /// An allocation is running.
    Running,
    /// All allocations finished or failed.
    Dead,
}

#[derive(Debug, Deserialize)]
struct JobReadResponse {
    #[serde(rename = "Status")]
    status: JobStatus,
}

/// Final result of a dead job, recovered from its last allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Exit code of the routine task.
    pub exit_code: i32,
    /// Nomad's display message for the terminal event, if any.
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllocationStub {
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
    #[serde(rename = "TaskStates", default)]
    task_states: std::collections::HashMap<String, TaskState>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskState {
    #[serde(rename = "Events", default)]
    events: Vec<TaskEvent>,
}

#[derive(Debug, Deserialize)]
struct TaskEvent {
    #[serde(rename = "Type")]
    event_type: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i32,
    #[serde(rename = "DisplayMessage", default)]
    display_message: String,
}

/// Pick the terminal result out of a job's allocation list.
///
/// The most recently modified allocation wins; within it, the last
/// `Terminated` task event carries the routine's exit code.
fn outcome_from_allocations(mut allocations: Vec<AllocationStub>) -> Option<JobOutcome> {
    allocations.sort_by_key(|alloc| alloc.modify_index);
    let last = allocations.pop()?;
    last.task_states
        .into_values()
        .flat_map(|state| state.events)
        .filter(|event| event.event_type == "Terminated")
        .last()
        .map(|event| JobOutcome {
            exit_code: event.exit_code,
            message: if event.display_message.is_empty() {
                None
            } else {
                Some(event.display_message)
            },
        })
}

/// Errors from the Nomad REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum NomadApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Nomad returned a non-2xx status code.
    #[error("Nomad API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// HTTP client for one Nomad cluster endpoint.
pub struct NomadApi {
    client: reqwest::Client,
    api_url: String,
}

impl NomadApi {
    /// Create a new API client with bounded request timeouts.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://nomad:4646`.
    pub fn new(api_url: String) -> Result<Self, NomadApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, api_url })
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Dispatch an instance of a parameterized job.
    ///
    /// Sends `POST /v1/job/{parent}/dispatch` with the routine payload in
    /// the dispatch meta.
    pub async fn dispatch(&self, spec: &JobSpec) -> Result<DispatchResponse, NomadApiError> {
        let body = serde_json::json!({
            "Payload": null,
            "Meta": {
                "job_name": spec.name,
                "docker_image": spec.docker_image,
                "cpu": spec.cpu_mhz.to_string(),
                "ram": spec.ram_mb.to_string(),
                "storage": spec.storage_gb.to_string(),
                "flavour": spec.flavour.as_str(),
                "parameters": spec.payload.to_string(),
            },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/job/{}/dispatch",
                self.api_url, spec.parent_job
            ))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Read the current status of a dispatched job.
    ///
    /// Sends `GET /v1/job/{job_id}`.
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus, NomadApiError> {
        let response = self
            .client
            .get(format!("{}/v1/job/{}", self.api_url, job_id))
            .send()
            .await?;

        let read: JobReadResponse = Self::parse_response(response).await?;
        Ok(read.status)
    }

    /// Read the final result of a dead job.
    ///
    /// Sends `GET /v1/job/{job_id}/allocations` and extracts the exit code
    /// from the last allocation's terminal task event. `None` when no
    /// allocation finished (e.g. the job was garbage collected or never
    /// placed).
    pub async fn job_outcome(&self, job_id: &str) -> Result<Option<JobOutcome>, NomadApiError> {
        let response = self
            .client
            .get(format!("{}/v1/job/{}/allocations", self.api_url, job_id))
            .send()
            .await?;

        let allocations: Vec<AllocationStub> = Self::parse_response(response).await?;
        Ok(outcome_from_allocations(allocations))
    }

    /// Stop a dispatched job.
    ///
    /// Sends `DELETE /v1/job/{job_id}`.
    pub async fn stop_job(&self, job_id: &str) -> Result<(), NomadApiError> {
        let response = self
            .client
            .delete(format!("{}/v1/job/{}", self.api_url, job_id))
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the response
    /// unchanged on success, or a [`NomadApiError::ApiError`] containing the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, NomadApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NomadApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, NomadApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), NomadApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
