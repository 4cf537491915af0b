//! Task factory worker.
//!
//! Turns each validation into exactly one processing task, resolving the
//! task's predecessor input at creation time. Wakes on
//! `raw2valid_insertion` events and on its poll ticker.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use cryoflow_core::triggering::{parse_slice_window, preceding_slice, PredecessorRule};
use cryoflow_db::models::raw_input::RawInput;
use cryoflow_db::models::task::TriggerValidation;
use cryoflow_db::repositories::{CatalogRepo, RawInputRepo, TaskRepo, ValidationRepo};
use cryoflow_events::{topics, EventBus, PipelineEvent};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::policy::parse_condition;

/// Task factory.
///
/// Creation is idempotent through the store's one-task-per-validation
/// constraint, so replays and concurrent instances are harmless.
pub struct TaskFactory {
    pool: PgPool,
    bus: Arc<EventBus>,
    config: PipelineConfig,
}

impl TaskFactory {
    pub fn new(pool: PgPool, bus: Arc<EventBus>, config: PipelineConfig) -> Self {
        Self { pool, bus, config }
    }

    /// Run the factory loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut events = self.bus.subscribe();
        tracing::info!("Task factory started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Task factory shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.create_cycle().await {
                        tracing::error!(error = %e, "Task creation cycle failed");
                    }
                }
                event = events.recv() => {
                    if let Ok(event) = event {
                        if event.topic == topics::RAW2VALID_INSERTION {
                            if let Err(e) = self.create_cycle().await {
                                tracing::error!(error = %e, "Task creation cycle failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// One pass over every validation that has no task yet.
    pub async fn create_cycle(&self) -> Result<(), PipelineError> {
        for validation in ValidationRepo::without_task(&self.pool).await? {
            if let Err(e) = self.create_task(&validation).await {
                tracing::error!(
                    validation_id = validation.id,
                    error = %e,
                    "Task creation failed",
                );
            }
        }
        Ok(())
    }

    async fn create_task(&self, validation: &TriggerValidation) -> Result<(), PipelineError> {
        let Some(condition) = CatalogRepo::condition_for_validation(&self.pool, validation.id).await?
        else {
            return Ok(());
        };
        let config = parse_condition(&condition)?;

        let input_ids = ValidationRepo::linked_input_ids(&self.pool, validation.id).await?;
        let inputs = RawInputRepo::find_by_ids(&self.pool, &input_ids).await?;
        let Some(primary) = inputs.first() else {
            return Ok(());
        };

        let preceding = match &config.predecessor {
            None => None,
            Some(rule) => self.resolve_predecessor(rule, primary, &inputs).await?,
        };

        let created = TaskRepo::create(
            &self.pool,
            validation.id,
            validation.artificial_measurement_day,
            preceding.as_deref(),
        )
        .await?;
        if let Some(task) = created {
            tracing::info!(
                task_id = task.id,
                validation_id = validation.id,
                preceding_input_id = preceding.as_deref().unwrap_or("-"),
                "Processing task created",
            );
            self.bus.publish(
                PipelineEvent::new(topics::PROCESSING_TASK_INSERTION)
                    .with_source("processing_task", task.id)
                    .with_payload(serde_json::json!({
                        "condition": condition.condition_name,
                        "flavour": condition.flavour,
                    })),
            );
        }
        Ok(())
    }

    /// Derive the `preceding_input_id` for a new task.
    ///
    /// `linked` is the validation's full input set; a predecessor is always
    /// an input outside it, otherwise the task would wait on itself.
    async fn resolve_predecessor(
        &self,
        rule: &PredecessorRule,
        primary: &RawInput,
        linked: &[RawInput],
    ) -> Result<Option<String>, PipelineError> {
        match rule {
            PredecessorRule::PriorOfType {
                raster_type,
                lookback_days,
            } => {
                let Some(raster) = CatalogRepo::find_raster_type(&self.pool, raster_type).await?
                else {
                    tracing::warn!(
                        raster_type = %raster_type,
                        "Predecessor raster type not in catalog",
                    );
                    return Ok(None);
                };
                let prior = RawInputRepo::latest_prior(
                    &self.pool,
                    raster.id,
                    &primary.tile,
                    primary.measurement_day,
                    *lookback_days,
                )
                .await?;
                Ok(prior.map(|input| input.input_id))
            }
            PredecessorRule::PrecedingSlice { max_gap_seconds } => {
                let Some(orbit) = primary.relative_orbit else {
                    return Ok(None);
                };
                let group = RawInputRepo::chain_group(
                    &self.pool,
                    primary.raster_type_fk_id,
                    &primary.tile,
                    primary.measurement_day,
                    orbit,
                )
                .await?;
                let head = linked
                    .iter()
                    .filter_map(|input| {
                        parse_slice_window(&input.input_path).map(|w| (w.start, input))
                    })
                    .min_by_key(|(start, _)| *start)
                    .map(|(_, input)| input)
                    .unwrap_or(primary);
                let candidates: Vec<_> = group
                    .iter()
                    .filter(|other| !linked.iter().any(|input| input.id == other.id))
                    .map(RawInput::snapshot)
                    .collect();
                Ok(preceding_slice(
                    &head.snapshot(),
                    &candidates,
                    *max_gap_seconds,
                ))
            }
        }
    }
}
