//! Job dispatcher: builds a runner job from a task's routine and submits
//! it with backoff.
//!
//! The dispatcher owns no loop of its own; the scheduler hands it ready
//! tasks one at a time.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use cryoflow_core::error::DomainError;
use cryoflow_core::flavour::Flavour;
use cryoflow_db::models::status::ProcessingStatus;
use cryoflow_db::models::task::DispatchableTask;
use cryoflow_db::repositories::{AppendOutcome, DispatchRepo};
use cryoflow_events::{topics, EventBus, PipelineEvent};
use cryoflow_nomad::backoff::{submit_with_backoff, RetryConfig};
use cryoflow_nomad::{JobRunner, JobSpec};

use crate::error::PipelineError;

/// Job dispatcher.
pub struct JobDispatcher {
    pool: PgPool,
    bus: Arc<EventBus>,
    runner: Arc<dyn JobRunner>,
    retry: RetryConfig,
}

impl JobDispatcher {
    pub fn new(pool: PgPool, bus: Arc<EventBus>, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            pool,
            bus,
            runner,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Dispatch one ready task.
    ///
    /// Claims the task and creates the dispatch row first, then submits
    /// with backoff. If submission never succeeds the dispatch row is
    /// discarded and the next scheduler cycle retries the task.
    pub async fn dispatch(
        &self,
        task: &DispatchableTask,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let spec = Self::job_spec(task)?;
        let Some(dispatch) = DispatchRepo::create(&self.pool, task.task_id).await? else {
            tracing::debug!(task_id = task.task_id, "Task already claimed for dispatch");
            return Ok(());
        };

        match submit_with_backoff(self.runner.as_ref(), &spec, &self.retry, cancel).await {
            Some(response) => {
                DispatchRepo::set_nomad_job(&self.pool, dispatch.id, &response.dispatched_job_id)
                    .await?;
                let outcome = DispatchRepo::append_status(
                    &self.pool,
                    dispatch.id,
                    ProcessingStatus::Pending,
                    None,
                    None,
                )
                .await?;
                if outcome == AppendOutcome::Recorded {
                    self.bus.publish(
                        PipelineEvent::new(topics::processing_task_state(
                            ProcessingStatus::Pending.name(),
                        ))
                        .with_source("processing_task", task.task_id),
                    );
                }
                tracing::info!(
                    task_id = task.task_id,
                    dispatch_id = dispatch.id,
                    nomad_job_id = %response.dispatched_job_id,
                    "Task dispatched",
                );
            }
            None => {
                DispatchRepo::discard(&self.pool, dispatch.id).await?;
                tracing::warn!(
                    task_id = task.task_id,
                    dispatch_id = dispatch.id,
                    "Submission did not complete, task stays queued",
                );
            }
        }
        Ok(())
    }

    /// Build the runner job spec for a task.
    fn job_spec(task: &DispatchableTask) -> Result<JobSpec, PipelineError> {
        let flavour =
            Flavour::of(&task.flavour).ok_or_else(|| DomainError::Configuration {
                condition: task.condition_name.clone(),
                reason: format!("unknown flavour '{}'", task.flavour),
            })?;
        // GFSC-style routines date their product off the shifted day.
        let measurement_day = task.processing_day();

        Ok(JobSpec {
            name: format!(
                "{}-{}-{}-t{}",
                task.routine_name, task.tile, measurement_day, task.task_id
            ),
            parent_job: task.routine_name.clone(),
            docker_image: task.docker_image.clone(),
            cpu_mhz: task.cpu_mhz,
            ram_mb: task.ram_mb,
            storage_gb: task.storage_gb,
            flavour,
            payload: serde_json::json!({
                "task_id": task.task_id,
                "tile": task.tile,
                "measurement_day": measurement_day,
                "product_type_code": task.product_type_code,
            }),
        })
    }
}
