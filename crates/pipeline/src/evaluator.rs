//! Triggering evaluator worker.
//!
//! Scans unvalidated candidates against every catalog condition and records
//! a validation for each candidate whose predicate holds. Wakes on
//! `input_insertion` events and on its poll ticker.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use cryoflow_core::triggering::{self, ConditionConfig, InputSnapshot, TriggerDecision, TriggerPolicy};
use cryoflow_db::models::catalog::ConditionWithRoutine;
use cryoflow_db::models::raw_input::RawInput;
use cryoflow_db::repositories::{CatalogRepo, RawInputRepo, ValidationRepo};
use cryoflow_events::{topics, EventBus, PipelineEvent};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::policy::parse_condition;

/// Triggering evaluator.
///
/// A single long-lived Tokio task; multiple instances are safe because the
/// validation write is conditional.
pub struct TriggeringEvaluator {
    pool: PgPool,
    bus: Arc<EventBus>,
    config: PipelineConfig,
}

impl TriggeringEvaluator {
    pub fn new(pool: PgPool, bus: Arc<EventBus>, config: PipelineConfig) -> Self {
        Self { pool, bus, config }
    }

    /// Run the evaluator loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut events = self.bus.subscribe();
        tracing::info!("Triggering evaluator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Triggering evaluator shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.evaluate_cycle().await {
                        tracing::error!(error = %e, "Evaluation cycle failed");
                    }
                }
                event = events.recv() => {
                    // A lagged receiver just falls back to the ticker.
                    if let Ok(event) = event {
                        if event.topic == topics::INPUT_INSERTION {
                            if let Err(e) = self.evaluate_cycle().await {
                                tracing::error!(error = %e, "Evaluation cycle failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// One evaluation cycle over every condition in the catalog.
    pub async fn evaluate_cycle(&self) -> Result<(), PipelineError> {
        for condition in CatalogRepo::list_conditions(&self.pool).await? {
            let config = match parse_condition(&condition) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(
                        condition = %condition.condition_name,
                        error = %e,
                        "Skipping misconfigured condition",
                    );
                    continue;
                }
            };

            let candidates = RawInputRepo::candidates_for_condition(
                &self.pool,
                condition.raster_type_fk_id,
                condition.condition_id,
                self.config.scan_window_days,
            )
            .await?;

            for candidate in candidates {
                if let Err(e) = self.evaluate_candidate(&condition, &config, &candidate).await {
                    tracing::error!(
                        condition = %condition.condition_name,
                        input_id = %candidate.input_id,
                        error = %e,
                        "Candidate evaluation failed",
                    );
                }
            }
        }
        Ok(())
    }

    async fn evaluate_candidate(
        &self,
        condition: &ConditionWithRoutine,
        config: &ConditionConfig,
        candidate: &RawInput,
    ) -> Result<(), PipelineError> {
        let snapshot = candidate.snapshot();
        let rows = self.load_context(config, candidate).await?;
        let context: Vec<InputSnapshot> = rows.iter().map(RawInput::snapshot).collect();

        match triggering::evaluate(config, &snapshot, &context, Utc::now()) {
            TriggerDecision::Defer | TriggerDecision::Reject => Ok(()),
            TriggerDecision::Validate => {
                let artificial_day = match config.artificial_day_offset {
                    Some(offset) => {
                        Some(triggering::shift_measurement_day(candidate.measurement_day, offset)?)
                    }
                    None => None,
                };
                let is_nrt = config.nrt.nrt_flag(&snapshot);
                let linked = Self::linked_inputs(config, candidate, &rows);

                let recorded = ValidationRepo::record(
                    &self.pool,
                    condition.condition_id,
                    is_nrt,
                    artificial_day,
                    &linked,
                )
                .await?;

                if let Some(validation) = recorded {
                    tracing::info!(
                        condition = %condition.condition_name,
                        input_id = %candidate.input_id,
                        validation_id = validation.id,
                        is_nrt,
                        "Input validated",
                    );
                    self.bus.publish(
                        PipelineEvent::new(topics::RAW2VALID_INSERTION)
                            .with_source("trigger_validation", validation.id)
                            .with_payload(serde_json::json!({
                                "condition": condition.condition_name,
                                "input_id": candidate.input_id,
                                "is_nrt": is_nrt,
                            })),
                    );
                }
                Ok(())
            }
        }
    }

    /// The full input set a successful validation claims.
    ///
    /// Co-occurrence claims the qualifying companions so the pair cannot
    /// validate twice; chain continuity claims the whole contiguous run.
    fn linked_inputs(
        config: &ConditionConfig,
        candidate: &RawInput,
        rows: &[RawInput],
    ) -> Vec<i64> {
        let mut linked = vec![candidate.id];
        match &config.policy {
            TriggerPolicy::Freshness { .. } => {}
            TriggerPolicy::CoOccurrence {
                companion_orbits, ..
            } => {
                linked.extend(
                    rows.iter()
                        .filter(|row| {
                            row.tile == candidate.tile
                                && row.measurement_day == candidate.measurement_day
                                && matches!(row.relative_orbit, Some(o) if companion_orbits.contains(&o))
                        })
                        .map(|row| row.id),
                );
            }
            // A full-footprint slice stands alone; only a partial slice
            // claims its neighbours.
            TriggerPolicy::ChainContinuity {
                max_gap_seconds, ..
            } if candidate.is_partial => {
                let context: Vec<InputSnapshot> = rows.iter().map(RawInput::snapshot).collect();
                let run = triggering::chain_run(&candidate.snapshot(), &context, *max_gap_seconds);
                linked.extend(
                    rows.iter()
                        .filter(|row| {
                            row.id != candidate.id
                                && row.is_partial
                                && run.contains(&row.input_id)
                        })
                        .map(|row| row.id),
                );
            }
            TriggerPolicy::ChainContinuity { .. } => {}
        }
        linked
    }

    /// Load the sibling rows a policy needs alongside the candidate.
    async fn load_context(
        &self,
        config: &ConditionConfig,
        candidate: &RawInput,
    ) -> Result<Vec<RawInput>, PipelineError> {
        match &config.policy {
            TriggerPolicy::Freshness { .. } => Ok(Vec::new()),
            TriggerPolicy::CoOccurrence {
                companion_raster_type,
                ..
            } => {
                let raster_type = CatalogRepo::find_raster_type(&self.pool, companion_raster_type)
                    .await?
                    .ok_or_else(|| cryoflow_core::error::DomainError::Configuration {
                        condition: config.name.clone(),
                        reason: format!("unknown companion raster type '{companion_raster_type}'"),
                    })?;
                Ok(RawInputRepo::companions(
                    &self.pool,
                    raster_type.id,
                    &candidate.tile,
                    candidate.measurement_day,
                )
                .await?)
            }
            TriggerPolicy::ChainContinuity { .. } => {
                let Some(orbit) = candidate.relative_orbit else {
                    // A slice without an orbit can never chain.
                    return Ok(Vec::new());
                };
                Ok(RawInputRepo::chain_group(
                    &self.pool,
                    candidate.raster_type_fk_id,
                    &candidate.tile,
                    candidate.measurement_day,
                    orbit,
                )
                .await?)
            }
        }
    }
}
