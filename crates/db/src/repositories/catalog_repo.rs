//! Repository for the catalog tables: `raster_type`, `processing_routine`
//! and `triggering_condition`.
//!
//! The pipeline reads this reference data; operators maintain it out of
//! band, so only the insert helpers tests need are provided for writes.

use sqlx::PgPool;

use crate::models::catalog::{ConditionWithRoutine, ProcessingRoutine, RasterType, TriggeringCondition};

/// Column list for `triggering_condition` joined with its routine.
const CONDITION_COLUMNS: &str = "\
    tc.id AS condition_id, tc.name AS condition_name, tc.raster_type_fk_id, tc.policy, \
    pr.name AS routine_name, pr.product_type_code, pr.cpu_mhz, pr.ram_mb, pr.storage_gb, \
    pr.duration_secs, pr.docker_image, pr.flavour";

/// Provides read access to the operator-maintained catalog.
pub struct CatalogRepo;

impl CatalogRepo {
    /// List every triggering condition with its routine attached.
    pub async fn list_conditions(pool: &PgPool) -> Result<Vec<ConditionWithRoutine>, sqlx::Error> {
        let query = format!(
            "SELECT {CONDITION_COLUMNS} \
             FROM triggering_condition tc \
             JOIN processing_routine pr ON pr.id = tc.processing_routine_fk_id \
             ORDER BY tc.id"
        );
        sqlx::query_as::<_, ConditionWithRoutine>(&query)
            .fetch_all(pool)
            .await
    }

    /// The condition behind one validation, with its routine attached.
    pub async fn condition_for_validation(
        pool: &PgPool,
        validation_id: i64,
    ) -> Result<Option<ConditionWithRoutine>, sqlx::Error> {
        let query = format!(
            "SELECT {CONDITION_COLUMNS} \
             FROM trigger_validation tv \
             JOIN triggering_condition tc ON tc.id = tv.triggering_condition_fk_id \
             JOIN processing_routine pr ON pr.id = tc.processing_routine_fk_id \
             WHERE tv.id = $1"
        );
        sqlx::query_as::<_, ConditionWithRoutine>(&query)
            .bind(validation_id)
            .fetch_optional(pool)
            .await
    }

    /// Look one raster type up by name.
    pub async fn find_raster_type(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<RasterType>, sqlx::Error> {
        sqlx::query_as::<_, RasterType>(
            "SELECT id, name, product_family FROM raster_type WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    /// Insert a raster type. Used by seeding and tests.
    pub async fn insert_raster_type(
        pool: &PgPool,
        name: &str,
        product_family: &str,
    ) -> Result<RasterType, sqlx::Error> {
        sqlx::query_as::<_, RasterType>(
            "INSERT INTO raster_type (name, product_family) VALUES ($1, $2) \
             RETURNING id, name, product_family",
        )
        .bind(name)
        .bind(product_family)
        .fetch_one(pool)
        .await
    }

    /// Insert a processing routine. Used by seeding and tests.
    pub async fn insert_routine(
        pool: &PgPool,
        routine: &ProcessingRoutine,
    ) -> Result<ProcessingRoutine, sqlx::Error> {
        sqlx::query_as::<_, ProcessingRoutine>(
            "INSERT INTO processing_routine \
                 (name, product_type_code, cpu_mhz, ram_mb, storage_gb, duration_secs, docker_image, flavour) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, name, product_type_code, cpu_mhz, ram_mb, storage_gb, duration_secs, docker_image, flavour",
        )
        .bind(&routine.name)
        .bind(&routine.product_type_code)
        .bind(routine.cpu_mhz)
        .bind(routine.ram_mb)
        .bind(routine.storage_gb)
        .bind(routine.duration_secs)
        .bind(&routine.docker_image)
        .bind(&routine.flavour)
        .fetch_one(pool)
        .await
    }

    /// Insert a triggering condition. Used by seeding and tests.
    pub async fn insert_condition(
        pool: &PgPool,
        name: &str,
        routine_id: i16,
        raster_type_id: i16,
        policy: &serde_json::Value,
    ) -> Result<TriggeringCondition, sqlx::Error> {
        sqlx::query_as::<_, TriggeringCondition>(
            "INSERT INTO triggering_condition \
                 (name, processing_routine_fk_id, raster_type_fk_id, policy) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, name, processing_routine_fk_id, raster_type_fk_id, policy",
        )
        .bind(name)
        .bind(routine_id)
        .bind(raster_type_id)
        .bind(policy)
        .fetch_one(pool)
        .await
    }
}
