//! Repository for `trigger_validation` and `raw2valid`.

use sqlx::PgPool;

use cryoflow_core::types::{DbId, MeasurementDay};

use crate::models::task::TriggerValidation;

/// Column list for `trigger_validation` queries.
const COLUMNS: &str =
    "id, triggering_condition_fk_id, validation_date, is_nrt, artificial_measurement_day";

/// Provides access to triggering results.
pub struct ValidationRepo;

impl ValidationRepo {
    /// Record one validation and link every contributing input to it, in a
    /// single transaction.
    ///
    /// Concurrent evaluators racing on the same input set are resolved by
    /// the unique `(raw_input, triggering_condition)` constraint on the
    /// link table: the loser's insert conflicts, the whole transaction
    /// rolls back and `None` is returned.
    pub async fn record(
        pool: &PgPool,
        condition_id: i16,
        is_nrt: bool,
        artificial_measurement_day: Option<MeasurementDay>,
        input_row_ids: &[DbId],
    ) -> Result<Option<TriggerValidation>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO trigger_validation \
                 (triggering_condition_fk_id, is_nrt, artificial_measurement_day) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let validation = sqlx::query_as::<_, TriggerValidation>(&query)
            .bind(condition_id)
            .bind(is_nrt)
            .bind(artificial_measurement_day)
            .fetch_one(&mut *tx)
            .await?;

        for input_row_id in input_row_ids {
            let inserted = sqlx::query(
                "INSERT INTO raw2valid \
                     (raw_input_fk_id, trigger_validation_fk_id, triggering_condition_fk_id) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (raw_input_fk_id, triggering_condition_fk_id) DO NOTHING",
            )
            .bind(input_row_id)
            .bind(validation.id)
            .bind(condition_id)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                // Another evaluator already claimed this input for the same
                // condition; drop our validation entirely.
                tx.rollback().await?;
                return Ok(None);
            }
        }

        tx.commit().await?;
        Ok(Some(validation))
    }

    /// Validations that have no processing task yet, oldest first.
    pub async fn without_task(pool: &PgPool) -> Result<Vec<TriggerValidation>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM trigger_validation tv \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM processing_tasks pt \
                 WHERE pt.trigger_validation_fk_id = tv.id \
             ) \
             ORDER BY tv.validation_date"
        );
        sqlx::query_as::<_, TriggerValidation>(&query)
            .fetch_all(pool)
            .await
    }

    /// Database row ids of the inputs linked to one validation.
    pub async fn linked_input_ids(
        pool: &PgPool,
        validation_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> = sqlx::query_as(
            "SELECT raw_input_fk_id FROM raw2valid \
             WHERE trigger_validation_fk_id = $1 \
             ORDER BY raw_input_fk_id",
        )
        .bind(validation_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
