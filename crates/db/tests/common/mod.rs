//! Shared fixtures for the db integration tests.

use chrono::{TimeZone, Utc};
use sqlx::PgPool;

use cryoflow_db::models::catalog::ProcessingRoutine;
use cryoflow_db::models::raw_input::NewRawInput;
use cryoflow_db::repositories::{CatalogRepo, RawInputRepo, TaskRepo, ValidationRepo};

/// A seeded condition with its routine and raster type ids.
pub struct Fixture {
    pub raster_type_id: i16,
    pub condition_id: i16,
}

/// Seed one raster type, routine and condition.
pub async fn seed_condition(pool: &PgPool, name: &str) -> Fixture {
    let raster = CatalogRepo::insert_raster_type(pool, &format!("{name}_L2A"), "optical")
        .await
        .expect("raster type");
    let routine = CatalogRepo::insert_routine(
        pool,
        &ProcessingRoutine {
            id: 0,
            name: format!("{name}_routine"),
            product_type_code: "FSC".to_string(),
            cpu_mhz: 2000,
            ram_mb: 8192,
            storage_gb: 20,
            duration_secs: 600,
            docker_image: "registry/fsc:1.0".to_string(),
            flavour: "eo1.large".to_string(),
        },
    )
    .await
    .expect("routine");
    let condition = CatalogRepo::insert_condition(
        pool,
        name,
        routine.id,
        raster.id,
        &serde_json::json!({"kind": "freshness"}),
    )
    .await
    .expect("condition");

    Fixture {
        raster_type_id: raster.id,
        condition_id: condition.id,
    }
}

/// Insert one raw input for the fixture's raster type.
pub async fn seed_input(pool: &PgPool, fixture: &Fixture, input_id: &str) -> i64 {
    let input = RawInputRepo::insert(
        pool,
        &NewRawInput {
            input_id: input_id.to_string(),
            input_path: format!("/eodata/{input_id}.SAFE"),
            raster_type_fk_id: fixture.raster_type_id,
            tile: "32TLS".to_string(),
            measurement_day: 20250115,
            start_date: Utc.with_ymd_and_hms(2025, 1, 15, 5, 30, 0).unwrap(),
            publishing_date: Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap(),
            relative_orbit: Some(15),
            is_partial: false,
        },
    )
    .await
    .expect("insert input")
    .expect("fresh input");
    input.id
}

/// Seed a validation with one linked input and its task. Returns the
/// task id.
pub async fn seed_task(pool: &PgPool, fixture: &Fixture, input_id: &str) -> i64 {
    let input_row_id = seed_input(pool, fixture, input_id).await;
    let validation = ValidationRepo::record(pool, fixture.condition_id, true, None, &[input_row_id])
        .await
        .expect("record validation")
        .expect("fresh validation");
    TaskRepo::create(pool, validation.id, None, None)
        .await
        .expect("create task")
        .expect("fresh task")
        .id
}
