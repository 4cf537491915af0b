//! Catalog entities: raster types, processing routines and triggering
//! conditions. These tables are operator-maintained reference data; the
//! pipeline only reads them.

use serde::Serialize;
use sqlx::FromRow;

use cryoflow_core::types::Timestamp;

/// A row from the `raster_type` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RasterType {
    pub id: i16,
    pub name: String,
    pub product_family: String,
}

/// A row from the `processing_routine` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessingRoutine {
    pub id: i16,
    pub name: String,
    pub product_type_code: String,
    pub cpu_mhz: i32,
    pub ram_mb: i32,
    pub storage_gb: i32,
    pub duration_secs: i32,
    pub docker_image: String,
    pub flavour: String,
}

/// A row from the `triggering_condition` table.
///
/// `policy` is the serialized predicate configuration; it is deserialized
/// into a domain policy by the evaluator at load time.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TriggeringCondition {
    pub id: i16,
    pub name: String,
    pub processing_routine_fk_id: i16,
    pub raster_type_fk_id: i16,
    pub policy: serde_json::Value,
}

/// A triggering condition joined with its routine, as the evaluator and
/// dispatcher consume it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConditionWithRoutine {
    pub condition_id: i16,
    pub condition_name: String,
    pub raster_type_fk_id: i16,
    pub policy: serde_json::Value,
    pub routine_name: String,
    pub product_type_code: String,
    pub cpu_mhz: i32,
    pub ram_mb: i32,
    pub storage_gb: i32,
    pub duration_secs: i32,
    pub docker_image: String,
    pub flavour: String,
}

/// A row from the `products` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Product {
    pub id: i64,
    pub processing_task_fk_id: i64,
    pub product_path: String,
    pub creation_date: Timestamp,
}
