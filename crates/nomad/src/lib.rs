//! HTTP client for the Nomad job runner.
//!
//! The pipeline talks to Nomad through the [`client::JobRunner`] trait so
//! the dispatcher and tracker can be exercised against a fake runner in
//! tests.

pub mod api;
pub mod backoff;
pub mod client;

pub use api::{DispatchResponse, JobOutcome, JobSpec, JobStatus, NomadApiError};
pub use backoff::RetryConfig;
pub use client::{JobRunner, NomadClient, NomadClientError, PollReport};
