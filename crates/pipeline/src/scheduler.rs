//! Dependency scheduler worker.
//!
//! Walks the open tasks that need a dispatch, applies the predecessor
//! readiness rules and the error budget, and hands ready tasks to the
//! dispatcher. Wakes on `processing_task_insertion` and
//! `processing_tasks_state_processed` events and on its poll ticker.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use cryoflow_core::scheduling::{readiness, PredecessorState, Readiness};
use cryoflow_core::workflow::{retry_decision, RetryDecision};
use cryoflow_db::models::status::ProcessingStatus;
use cryoflow_db::models::task::DispatchableTask;
use cryoflow_db::repositories::{AppendOutcome, DispatchRepo, TaskRepo};
use cryoflow_events::{topics, EventBus, PipelineEvent};

use crate::config::PipelineConfig;
use crate::dispatcher::JobDispatcher;
use crate::error::PipelineError;

/// Dependency scheduler.
pub struct DependencyScheduler {
    pool: PgPool,
    bus: Arc<EventBus>,
    dispatcher: Arc<JobDispatcher>,
    config: PipelineConfig,
}

impl DependencyScheduler {
    pub fn new(
        pool: PgPool,
        bus: Arc<EventBus>,
        dispatcher: Arc<JobDispatcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            bus,
            dispatcher,
            config,
        }
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut events = self.bus.subscribe();
        tracing::info!("Dependency scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dependency scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.schedule_cycle(&cancel).await {
                        tracing::error!(error = %e, "Scheduling cycle failed");
                    }
                }
                event = events.recv() => {
                    if let Ok(event) = event {
                        let wakes = event.topic == topics::PROCESSING_TASK_INSERTION
                            || event.topic == topics::PROCESSING_TASKS_STATE_PROCESSED;
                        if wakes {
                            if let Err(e) = self.schedule_cycle(&cancel).await {
                                tracing::error!(error = %e, "Scheduling cycle failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// One pass over the dispatch queue, oldest tasks first.
    pub async fn schedule_cycle(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        for task in TaskRepo::needing_dispatch(&self.pool).await? {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.schedule_task(&task, cancel).await {
                tracing::error!(task_id = task.task_id, error = %e, "Scheduling task failed");
            }
        }
        Ok(())
    }

    async fn schedule_task(
        &self,
        task: &DispatchableTask,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let predecessor = match &task.preceding_input_id {
            None => PredecessorState::None,
            Some(input_id) => TaskRepo::predecessor_state(&self.pool, input_id).await?,
        };

        match readiness(predecessor) {
            Readiness::Waiting => Ok(()),
            Readiness::Blocked => self.close_blocked(task).await,
            Readiness::Ready => match retry_decision(task.error_count, self.config.max_error_count) {
                RetryDecision::Terminate => self.terminate(task).await,
                RetryDecision::Redispatch => {
                    // An errored task cools down before its next attempt.
                    if let Some(errored_at) = task.latest_status_date {
                        let since = (Utc::now() - errored_at).to_std().unwrap_or_default();
                        if since < self.config.reprocessing_wait {
                            return Ok(());
                        }
                    }
                    self.dispatcher.dispatch(task, cancel).await
                }
            },
        }
    }

    /// Close a task whose predecessor terminated; it can never run.
    async fn close_blocked(&self, task: &DispatchableTask) -> Result<(), PipelineError> {
        if TaskRepo::mark_ended(&self.pool, task.task_id).await? {
            tracing::warn!(
                task_id = task.task_id,
                preceding_input_id = task.preceding_input_id.as_deref().unwrap_or("-"),
                "Task blocked by terminated predecessor",
            );
            self.bus.publish(
                PipelineEvent::new(topics::PROCESSING_TASKS_STATE_BLOCKED)
                    .with_source("processing_task", task.task_id),
            );
        }
        Ok(())
    }

    /// Terminate a task whose error budget is exhausted.
    async fn terminate(&self, task: &DispatchableTask) -> Result<(), PipelineError> {
        if let Some(dispatch) = DispatchRepo::latest_for_task(&self.pool, task.task_id).await? {
            let outcome = DispatchRepo::append_status(
                &self.pool,
                dispatch.id,
                ProcessingStatus::Terminated,
                Some("error budget exhausted"),
                None,
            )
            .await?;
            if outcome == AppendOutcome::Recorded {
                self.bus.publish(
                    PipelineEvent::new(topics::processing_task_state(
                        ProcessingStatus::Terminated.name(),
                    ))
                    .with_source("processing_task", task.task_id),
                );
            }
        }
        if TaskRepo::mark_ended(&self.pool, task.task_id).await? {
            tracing::warn!(
                task_id = task.task_id,
                error_count = task.error_count,
                "Task terminated",
            );
        }
        Ok(())
    }
}
