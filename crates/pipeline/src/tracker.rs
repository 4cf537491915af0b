//! Status tracker worker.
//!
//! Owns every write to the status workflow after dispatch: routine
//! completion callbacks, runner polls and the lost-job watchdog. Publishes
//! a state event only when an entry actually lands, so replayed callbacks
//! and repeated polls stay silent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use cryoflow_db::models::status::{ProcessingStatus, StatusId};
use cryoflow_db::models::task::WatchedDispatch;
use cryoflow_db::repositories::{AppendOutcome, DispatchRepo, ProductRepo, TaskRepo};
use cryoflow_events::{topics, EventBus, PipelineEvent};
use cryoflow_nomad::{JobRunner, JobStatus};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Synthetic exit code for jobs written off by the watchdog. Excluded from
/// the error budget.
const LOST_JOB_EXIT_CODE: i32 = 404;

/// Classify a routine's exit code.
///
/// Zero is success; the 2xx block is reserved for failures of services the
/// routine depends on, everything else is the routine's own failure.
pub fn completion_status(exit_code: i32) -> ProcessingStatus {
    match exit_code {
        0 => ProcessingStatus::Processed,
        200..=299 => ProcessingStatus::ExternalError,
        _ => ProcessingStatus::InternalError,
    }
}

/// What the poll cycle should do with one watched dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchAction {
    Leave,
    MarkStarted,
    WriteOff,
}

/// Decide the poll action for a dispatch from the runner's view and the
/// age of its latest status entry.
fn watch_action(
    runner_status: Option<JobStatus>,
    latest_status: StatusId,
    stale_for: Duration,
    routine_duration: Duration,
    config: &PipelineConfig,
) -> WatchAction {
    let lost_after = config
        .lost_job_min
        .max(routine_duration * config.lost_job_duration_multiplier);

    match runner_status {
        Some(JobStatus::Running) if latest_status == ProcessingStatus::Pending.id() => {
            WatchAction::MarkStarted
        }
        // A dead job should have called back by now.
        Some(JobStatus::Dead) if stale_for >= config.lost_job_min => WatchAction::WriteOff,
        _ if latest_status == ProcessingStatus::Started.id() && stale_for >= lost_after => {
            WatchAction::WriteOff
        }
        _ if latest_status == ProcessingStatus::Pending.id()
            && stale_for >= config.callback_timeout =>
        {
            WatchAction::WriteOff
        }
        _ => WatchAction::Leave,
    }
}

/// Status tracker.
pub struct StatusTracker {
    pool: PgPool,
    bus: Arc<EventBus>,
    runner: Arc<dyn JobRunner>,
    config: PipelineConfig,
}

impl StatusTracker {
    pub fn new(
        pool: PgPool,
        bus: Arc<EventBus>,
        runner: Arc<dyn JobRunner>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            bus,
            runner,
            config,
        }
    }

    /// Run the tracker loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!("Status tracker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Status tracker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_cycle().await {
                        tracing::error!(error = %e, "Tracking cycle failed");
                    }
                }
            }
        }
    }

    /// One poll pass over every watched dispatch.
    pub async fn poll_cycle(&self) -> Result<(), PipelineError> {
        for dispatch in DispatchRepo::watched(&self.pool).await? {
            if let Err(e) = self.poll_dispatch(&dispatch).await {
                tracing::error!(
                    dispatch_id = dispatch.dispatch_id,
                    error = %e,
                    "Polling dispatch failed",
                );
            }
        }
        Ok(())
    }

    async fn poll_dispatch(&self, dispatch: &WatchedDispatch) -> Result<(), PipelineError> {
        let report = match self.runner.poll(&dispatch.nomad_job_id).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(
                    nomad_job_id = %dispatch.nomad_job_id,
                    error = %e,
                    "Runner poll failed",
                );
                None
            }
        };

        // A dead job whose result survived in the runner is closed from the
        // poll, exactly as its callback would have.
        if let Some(report) = &report {
            if report.status == JobStatus::Dead {
                if let Some(exit_code) = report.exit_code {
                    return self
                        .complete(
                            dispatch.dispatch_id,
                            dispatch.task_id,
                            exit_code,
                            report.message.as_deref(),
                        )
                        .await;
                }
            }
        }

        let stale_for = (Utc::now() - dispatch.latest_status_date)
            .to_std()
            .unwrap_or_default();
        let routine_duration = Duration::from_secs(dispatch.duration_secs.max(0) as u64);

        match watch_action(
            report.map(|r| r.status),
            dispatch.latest_status,
            stale_for,
            routine_duration,
            &self.config,
        ) {
            WatchAction::Leave => Ok(()),
            WatchAction::MarkStarted => {
                self.record(
                    dispatch.dispatch_id,
                    dispatch.task_id,
                    ProcessingStatus::Started,
                    None,
                    None,
                )
                .await
            }
            WatchAction::WriteOff => {
                tracing::warn!(
                    dispatch_id = dispatch.dispatch_id,
                    task_id = dispatch.task_id,
                    nomad_job_id = %dispatch.nomad_job_id,
                    stale_secs = stale_for.as_secs(),
                    "Writing off lost job",
                );
                // Best effort: the allocation may still hold resources.
                if let Err(e) = self.runner.stop(&dispatch.nomad_job_id).await {
                    tracing::warn!(
                        nomad_job_id = %dispatch.nomad_job_id,
                        error = %e,
                        "Stopping lost job failed",
                    );
                }
                self.record(
                    dispatch.dispatch_id,
                    dispatch.task_id,
                    ProcessingStatus::InternalError,
                    Some("job lost, no completion callback"),
                    Some(LOST_JOB_EXIT_CODE),
                )
                .await
            }
        }
    }

    /// Record a routine's final exit code and close the task on success.
    ///
    /// Shared by the poll path and the callback path; the poll path has no
    /// product path to catalog, the reconciliation sweep picks that up.
    async fn complete(
        &self,
        dispatch_id: i64,
        task_id: i64,
        exit_code: i32,
        message: Option<&str>,
    ) -> Result<(), PipelineError> {
        let status = completion_status(exit_code);
        self.record(dispatch_id, task_id, status, message, Some(exit_code))
            .await?;
        if status == ProcessingStatus::Processed {
            TaskRepo::mark_ended(&self.pool, task_id).await?;
        }
        Ok(())
    }

    /// Handle a routine's completion callback.
    ///
    /// Safe to replay: the change-only history absorbs duplicates, and the
    /// product catalog takes one row per task.
    pub async fn handle_completion(
        &self,
        nomad_job_id: &str,
        exit_code: i32,
        message: Option<&str>,
        product_path: Option<&str>,
        log_path: Option<&str>,
        intermediate_files_path: Option<&str>,
    ) -> Result<(), PipelineError> {
        let Some(dispatch) = DispatchRepo::find_by_nomad_job(&self.pool, nomad_job_id).await?
        else {
            tracing::warn!(nomad_job_id, "Completion callback for unknown job");
            return Ok(());
        };
        let Some(task_id) = DispatchRepo::task_of(&self.pool, dispatch.id).await? else {
            return Ok(());
        };

        if let Some(log_path) = log_path {
            DispatchRepo::set_log_path(&self.pool, dispatch.id, log_path).await?;
        }
        if let Some(path) = intermediate_files_path {
            TaskRepo::set_intermediate_files(&self.pool, task_id, path).await?;
        }

        self.complete(dispatch.id, task_id, exit_code, message).await?;

        if completion_status(exit_code) == ProcessingStatus::Processed {
            if let Some(product_path) = product_path {
                if let Some(product) = ProductRepo::insert(&self.pool, task_id, product_path).await? {
                    self.bus.publish(
                        PipelineEvent::new(topics::PRODUCT_INSERTION)
                            .with_source("product", product.id)
                            .with_payload(serde_json::json!({
                                "task_id": task_id,
                                "product_path": product_path,
                            })),
                    );
                }
            }
        }
        Ok(())
    }

    /// Append one entry and publish its event if it landed.
    async fn record(
        &self,
        dispatch_id: i64,
        task_id: i64,
        status: ProcessingStatus,
        message: Option<&str>,
        exit_code: Option<i32>,
    ) -> Result<(), PipelineError> {
        let outcome =
            DispatchRepo::append_status(&self.pool, dispatch_id, status, message, exit_code)
                .await?;
        match outcome {
            AppendOutcome::Recorded => {
                self.bus.publish(
                    PipelineEvent::new(topics::processing_task_state(status.name()))
                        .with_source("processing_task", task_id)
                        .with_payload(serde_json::json!({ "exit_code": exit_code })),
                );
            }
            AppendOutcome::Unchanged => {}
            AppendOutcome::InvalidTransition { from } => {
                tracing::warn!(
                    dispatch_id,
                    from,
                    to = status.id(),
                    "Dropped illegal status transition",
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_classification() {
        assert_eq!(completion_status(0), ProcessingStatus::Processed);
        assert_eq!(completion_status(210), ProcessingStatus::ExternalError);
        assert_eq!(completion_status(1), ProcessingStatus::InternalError);
        assert_eq!(completion_status(110), ProcessingStatus::InternalError);
        assert_eq!(completion_status(404), ProcessingStatus::InternalError);
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn pending_job_reported_running_is_marked_started() {
        let action = watch_action(
            Some(JobStatus::Running),
            ProcessingStatus::Pending.id(),
            Duration::from_secs(10),
            Duration::from_secs(600),
            &config(),
        );
        assert_eq!(action, WatchAction::MarkStarted);
    }

    #[test]
    fn healthy_running_job_is_left_alone() {
        let action = watch_action(
            Some(JobStatus::Running),
            ProcessingStatus::Started.id(),
            Duration::from_secs(60),
            Duration::from_secs(600),
            &config(),
        );
        assert_eq!(action, WatchAction::Leave);
    }

    #[test]
    fn dead_job_is_written_off_after_grace() {
        let action = watch_action(
            Some(JobStatus::Dead),
            ProcessingStatus::Started.id(),
            Duration::from_secs(1300),
            Duration::from_secs(600),
            &config(),
        );
        assert_eq!(action, WatchAction::WriteOff);

        let action = watch_action(
            Some(JobStatus::Dead),
            ProcessingStatus::Started.id(),
            Duration::from_secs(60),
            Duration::from_secs(600),
            &config(),
        );
        assert_eq!(action, WatchAction::Leave);
    }

    #[test]
    fn silent_started_job_is_written_off_after_three_durations() {
        // 3 x 1000s routine beats the 1260s floor.
        let action = watch_action(
            None,
            ProcessingStatus::Started.id(),
            Duration::from_secs(2999),
            Duration::from_secs(1000),
            &config(),
        );
        assert_eq!(action, WatchAction::Leave);

        let action = watch_action(
            None,
            ProcessingStatus::Started.id(),
            Duration::from_secs(3000),
            Duration::from_secs(1000),
            &config(),
        );
        assert_eq!(action, WatchAction::WriteOff);
    }

    #[test]
    fn short_routines_keep_the_floor() {
        // 3 x 60s is under the 1260s floor, so the floor wins.
        let action = watch_action(
            None,
            ProcessingStatus::Started.id(),
            Duration::from_secs(1259),
            Duration::from_secs(60),
            &config(),
        );
        assert_eq!(action, WatchAction::Leave);

        let action = watch_action(
            None,
            ProcessingStatus::Started.id(),
            Duration::from_secs(1260),
            Duration::from_secs(60),
            &config(),
        );
        assert_eq!(action, WatchAction::WriteOff);
    }

    #[test]
    fn queued_job_is_written_off_after_callback_timeout() {
        let action = watch_action(
            Some(JobStatus::Pending),
            ProcessingStatus::Pending.id(),
            Duration::from_secs(3600),
            Duration::from_secs(600),
            &config(),
        );
        assert_eq!(action, WatchAction::WriteOff);
    }
}
