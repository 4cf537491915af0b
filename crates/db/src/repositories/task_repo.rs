//! Repository for the `processing_tasks` table.

use sqlx::PgPool;

use cryoflow_core::scheduling::PredecessorState;
use cryoflow_core::types::{DbId, MeasurementDay};
use cryoflow_core::workflow::NON_COUNTED_EXIT_CODES;

use crate::models::status::{ProcessingStatus, StatusId};
use crate::models::task::{DispatchableTask, ProcessingTask};

/// Column list for `processing_tasks` queries.
const COLUMNS: &str = "\
    id, trigger_validation_fk_id, creation_date, processing_date, \
    preceding_input_id, intermediate_files_path, has_ended";

/// Provides access to processing tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Create the task for one validation.
    ///
    /// The `trigger_validation_fk_id` unique constraint makes creation
    /// idempotent: a factory replaying the same validation gets `None`.
    pub async fn create(
        pool: &PgPool,
        validation_id: DbId,
        processing_date: Option<MeasurementDay>,
        preceding_input_id: Option<&str>,
    ) -> Result<Option<ProcessingTask>, sqlx::Error> {
        let query = format!(
            "INSERT INTO processing_tasks \
                 (trigger_validation_fk_id, processing_date, preceding_input_id) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (trigger_validation_fk_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProcessingTask>(&query)
            .bind(validation_id)
            .bind(processing_date)
            .bind(preceding_input_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find(pool: &PgPool, task_id: DbId) -> Result<Option<ProcessingTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM processing_tasks WHERE id = $1");
        sqlx::query_as::<_, ProcessingTask>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Open tasks, oldest first.
    pub async fn unfinished(pool: &PgPool) -> Result<Vec<ProcessingTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM processing_tasks \
             WHERE NOT has_ended \
             ORDER BY creation_date, id"
        );
        sqlx::query_as::<_, ProcessingTask>(&query)
            .fetch_all(pool)
            .await
    }

    /// Record where the routine left its scratch files.
    pub async fn set_intermediate_files(
        pool: &PgPool,
        task_id: DbId,
        path: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE processing_tasks SET intermediate_files_path = $2 WHERE id = $1")
            .bind(task_id)
            .bind(path)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Close a task. Returns whether the row changed, so callers publish
    /// the closing event exactly once.
    pub async fn mark_ended(pool: &PgPool, task_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE processing_tasks SET has_ended = TRUE WHERE id = $1 AND NOT has_ended",
        )
        .bind(task_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Open tasks that need a dispatch, joined with their routine and
    /// current error count, oldest first.
    ///
    /// A task needs a dispatch when it has none yet, or when its latest
    /// status is an error (redispatch review). The caller still applies the
    /// predecessor-readiness and error-budget rules.
    pub async fn needing_dispatch(pool: &PgPool) -> Result<Vec<DispatchableTask>, sqlx::Error> {
        let excluded = NON_COUNTED_EXIT_CODES.map(|code| code.to_string()).join(", ");
        let query = format!(
            "\
            WITH latest AS ( \
                SELECT DISTINCT ON (t2n.processing_task_fk_id) \
                       t2n.processing_task_fk_id AS task_id, \
                       psw.processing_status_fk_id AS status_id, \
                       psw.date AS status_date \
                FROM processingtask2nomad t2n \
                JOIN processing_status_workflow psw \
                  ON psw.nomad_job_dispatch_fk_id = t2n.nomad_job_dispatch_fk_id \
                ORDER BY t2n.processing_task_fk_id, psw.date DESC, psw.id DESC \
            ), \
            errors AS ( \
                SELECT t2n.processing_task_fk_id AS task_id, COUNT(*) AS error_count \
                FROM processingtask2nomad t2n \
                JOIN processing_status_workflow psw \
                  ON psw.nomad_job_dispatch_fk_id = t2n.nomad_job_dispatch_fk_id \
                WHERE psw.processing_status_fk_id IN ($1, $2) \
                  AND (psw.exit_code IS NULL OR psw.exit_code NOT IN ({excluded})) \
                GROUP BY t2n.processing_task_fk_id \
            ) \
            SELECT pt.id AS task_id, pt.trigger_validation_fk_id, pt.creation_date, \
                   pt.preceding_input_id, \
                   tc.name AS condition_name, \
                   pr.name AS routine_name, pr.product_type_code, pr.cpu_mhz, pr.ram_mb, \
                   pr.storage_gb, pr.duration_secs, pr.docker_image, pr.flavour, \
                   ri.measurement_day, pt.processing_date, ri.tile, \
                   COALESCE(e.error_count, 0) AS error_count, \
                   l.status_date AS latest_status_date \
            FROM processing_tasks pt \
            JOIN trigger_validation tv ON tv.id = pt.trigger_validation_fk_id \
            JOIN triggering_condition tc ON tc.id = tv.triggering_condition_fk_id \
            JOIN processing_routine pr ON pr.id = tc.processing_routine_fk_id \
            JOIN raw2valid rv ON rv.trigger_validation_fk_id = tv.id \
            JOIN raw_inputs ri ON ri.id = rv.raw_input_fk_id \
            LEFT JOIN latest l ON l.task_id = pt.id \
            LEFT JOIN errors e ON e.task_id = pt.id \
            WHERE NOT pt.has_ended \
              AND (l.status_id IS NULL OR l.status_id IN ($1, $2)) \
              AND rv.raw_input_fk_id = ( \
                  SELECT MIN(raw_input_fk_id) FROM raw2valid \
                  WHERE trigger_validation_fk_id = tv.id \
              ) \
            ORDER BY pt.creation_date, pt.id"
        );
        sqlx::query_as::<_, DispatchableTask>(&query)
            .bind(ProcessingStatus::InternalError.id())
            .bind(ProcessingStatus::ExternalError.id())
            .fetch_all(pool)
            .await
    }

    /// Latest status of the task that consumed the given input, for
    /// predecessor-readiness evaluation.
    ///
    /// The predecessor of a task is the task whose validation links the
    /// input named by `preceding_input_id`. An input nobody consumed yet
    /// maps to [`PredecessorState::Unmaterialized`]; a consuming task with
    /// no status history yet reports as pending.
    pub async fn predecessor_state(
        pool: &PgPool,
        preceding_input_id: &str,
    ) -> Result<PredecessorState, sqlx::Error> {
        let row: Option<(DbId, Option<StatusId>)> = sqlx::query_as(
            "SELECT pt.id, ( \
                 SELECT psw.processing_status_fk_id \
                 FROM processingtask2nomad t2n \
                 JOIN processing_status_workflow psw \
                   ON psw.nomad_job_dispatch_fk_id = t2n.nomad_job_dispatch_fk_id \
                 WHERE t2n.processing_task_fk_id = pt.id \
                 ORDER BY psw.date DESC, psw.id DESC \
                 LIMIT 1 \
             ) \
             FROM processing_tasks pt \
             JOIN raw2valid rv ON rv.trigger_validation_fk_id = pt.trigger_validation_fk_id \
             JOIN raw_inputs ri ON ri.id = rv.raw_input_fk_id \
             WHERE ri.input_id = $1 \
             ORDER BY pt.creation_date DESC, pt.id DESC \
             LIMIT 1",
        )
        .bind(preceding_input_id)
        .fetch_optional(pool)
        .await?;

        Ok(match row {
            None => PredecessorState::Unmaterialized,
            Some((_, latest_status)) => PredecessorState::Tracked {
                latest_status: latest_status.unwrap_or(ProcessingStatus::Pending.id()),
            },
        })
    }
}
