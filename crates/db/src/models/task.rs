//! Trigger validation, task and dispatch entity models.

use serde::Serialize;
use sqlx::FromRow;

use cryoflow_core::types::{DbId, MeasurementDay, Timestamp};

use super::status::StatusId;

/// A row from the `trigger_validation` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TriggerValidation {
    pub id: DbId,
    pub triggering_condition_fk_id: i16,
    pub validation_date: Timestamp,
    pub is_nrt: bool,
    pub artificial_measurement_day: Option<MeasurementDay>,
}

/// A row from the `processing_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessingTask {
    pub id: DbId,
    pub trigger_validation_fk_id: DbId,
    pub creation_date: Timestamp,
    pub processing_date: Option<MeasurementDay>,
    pub preceding_input_id: Option<String>,
    pub intermediate_files_path: Option<String>,
    pub has_ended: bool,
}

/// A row from the `nomad_job_dispatch` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobDispatch {
    pub id: DbId,
    pub nomad_job_id: Option<String>,
    pub dispatch_date: Timestamp,
    pub log_path: Option<String>,
}

/// A row from the `processing_status_workflow` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatusWorkflowEntry {
    pub id: DbId,
    pub nomad_job_dispatch_fk_id: DbId,
    pub processing_status_fk_id: StatusId,
    pub date: Timestamp,
    pub message: Option<String>,
    pub exit_code: Option<i32>,
}

/// A task joined with everything the dispatcher needs to build a job spec:
/// its condition, routine and current error count.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DispatchableTask {
    pub task_id: DbId,
    pub trigger_validation_fk_id: DbId,
    pub creation_date: Timestamp,
    pub preceding_input_id: Option<String>,
    pub condition_name: String,
    pub routine_name: String,
    pub product_type_code: String,
    pub cpu_mhz: i32,
    pub ram_mb: i32,
    pub storage_gb: i32,
    pub duration_secs: i32,
    pub docker_image: String,
    pub flavour: String,
    pub measurement_day: MeasurementDay,
    pub processing_date: Option<MeasurementDay>,
    pub tile: String,
    pub error_count: i64,
    /// When the task is in redispatch review, the date of the error entry
    /// that put it there.
    pub latest_status_date: Option<Timestamp>,
}

impl DispatchableTask {
    /// Day the output product is dated with.
    pub fn processing_day(&self) -> MeasurementDay {
        self.processing_date.unwrap_or(self.measurement_day)
    }
}

/// A running dispatch the tracker watches: the job id plus its latest
/// recorded status and the routine's expected duration.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WatchedDispatch {
    pub dispatch_id: DbId,
    pub task_id: DbId,
    pub nomad_job_id: String,
    pub dispatch_date: Timestamp,
    pub latest_status: StatusId,
    pub latest_status_date: Timestamp,
    pub duration_secs: i32,
}
