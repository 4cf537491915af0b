//! Raw-input entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use cryoflow_core::triggering::InputSnapshot;
use cryoflow_core::types::{DbId, MeasurementDay, Timestamp};

/// A row from the `raw_inputs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RawInput {
    pub id: DbId,
    pub input_id: String,
    pub input_path: String,
    pub raster_type_fk_id: i16,
    pub tile: String,
    pub measurement_day: MeasurementDay,
    pub start_date: Timestamp,
    pub publishing_date: Timestamp,
    pub harvest_date: Timestamp,
    pub relative_orbit: Option<i32>,
    pub is_partial: bool,
}

impl RawInput {
    /// Project the row onto the domain snapshot the predicates consume.
    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            input_id: self.input_id.clone(),
            input_path: self.input_path.clone(),
            tile: self.tile.clone(),
            measurement_day: self.measurement_day,
            publishing_date: self.publishing_date,
            harvest_date: self.harvest_date,
            relative_orbit: self.relative_orbit,
            is_partial: self.is_partial,
        }
    }
}

/// DTO for inserting a harvested input.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRawInput {
    pub input_id: String,
    pub input_path: String,
    pub raster_type_fk_id: i16,
    pub tile: String,
    pub measurement_day: MeasurementDay,
    pub start_date: Timestamp,
    pub publishing_date: Timestamp,
    pub relative_orbit: Option<i32>,
    pub is_partial: bool,
}
