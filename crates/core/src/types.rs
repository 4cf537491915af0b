use chrono::{DateTime, Utc};

/// Database row id (BIGSERIAL).
pub type DbId = i64;

/// Raw-input identifier: the upstream catalog id of the observed artifact.
pub type InputId = String;

/// UTC timestamp as stored in the database.
pub type Timestamp = DateTime<Utc>;

/// Measurement day encoded as `YYYYMMDD`, e.g. `20250115`.
pub type MeasurementDay = i32;
