//! Repository for `nomad_job_dispatch`, `processingtask2nomad` and the
//! append-only `processing_status_workflow` history.

use sqlx::PgPool;

use cryoflow_core::types::DbId;
use cryoflow_core::workflow::{state_machine, NON_COUNTED_EXIT_CODES};

use crate::models::status::{ProcessingStatus, StatusId};
use crate::models::task::{JobDispatch, StatusWorkflowEntry, WatchedDispatch};

/// Column list for `nomad_job_dispatch` queries.
const COLUMNS: &str = "id, nomad_job_id, dispatch_date, log_path";

/// Column list for `processing_status_workflow` queries.
const ENTRY_COLUMNS: &str =
    "id, nomad_job_dispatch_fk_id, processing_status_fk_id, date, message, exit_code";

/// Result of appending a status entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry landed and changed the dispatch's latest status.
    Recorded,
    /// The dispatch already had this latest status; nothing was written.
    Unchanged,
    /// The transition from the current latest status is not allowed.
    InvalidTransition { from: StatusId },
}

/// Provides access to dispatches and their status history.
pub struct DispatchRepo;

impl DispatchRepo {
    /// Claim a task for dispatch and create the dispatch row, in one
    /// transaction.
    ///
    /// Multiple scheduler instances may hand the same ready task to their
    /// dispatchers; the task row lock and the open-dispatch check make sure
    /// only one of them gets a dispatch. `None` means another instance
    /// holds the task or an earlier dispatch is still in flight.
    pub async fn create(pool: &PgPool, task_id: DbId) -> Result<Option<JobDispatch>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let claimed: Option<(DbId,)> = sqlx::query_as(
            "SELECT id FROM processing_tasks \
             WHERE id = $1 AND NOT has_ended \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;
        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        // A dispatch with no status entries is a submission still in
        // flight; one whose latest status is not an error is running or
        // done. Either way the task is taken.
        let open: Option<(DbId,)> = sqlx::query_as(
            "SELECT njd.id \
             FROM nomad_job_dispatch njd \
             JOIN processingtask2nomad t2n ON t2n.nomad_job_dispatch_fk_id = njd.id \
             LEFT JOIN LATERAL ( \
                 SELECT processing_status_fk_id FROM processing_status_workflow \
                 WHERE nomad_job_dispatch_fk_id = njd.id \
                 ORDER BY date DESC, id DESC LIMIT 1 \
             ) latest ON TRUE \
             WHERE t2n.processing_task_fk_id = $1 \
               AND (latest.processing_status_fk_id IS NULL \
                    OR latest.processing_status_fk_id NOT IN ($2, $3)) \
             LIMIT 1",
        )
        .bind(task_id)
        .bind(ProcessingStatus::InternalError.id())
        .bind(ProcessingStatus::ExternalError.id())
        .fetch_optional(&mut *tx)
        .await?;
        if open.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        let query = format!(
            "INSERT INTO nomad_job_dispatch DEFAULT VALUES RETURNING {COLUMNS}"
        );
        let dispatch = sqlx::query_as::<_, JobDispatch>(&query)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO processingtask2nomad (processing_task_fk_id, nomad_job_dispatch_fk_id) \
             VALUES ($1, $2)",
        )
        .bind(task_id)
        .bind(dispatch.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(dispatch))
    }

    /// Remove a dispatch whose submission never reached the runner.
    ///
    /// Leaving the row would pin the task: the open-dispatch check treats a
    /// dispatch without status entries as in flight.
    pub async fn discard(pool: &PgPool, dispatch_id: DbId) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM processingtask2nomad WHERE nomad_job_dispatch_fk_id = $1")
            .bind(dispatch_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nomad_job_dispatch WHERE id = $1")
            .bind(dispatch_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record the runner-assigned job id once submission succeeds.
    pub async fn set_nomad_job(
        pool: &PgPool,
        dispatch_id: DbId,
        nomad_job_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE nomad_job_dispatch SET nomad_job_id = $2 WHERE id = $1")
            .bind(dispatch_id)
            .bind(nomad_job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record where the routine wrote its logs.
    pub async fn set_log_path(
        pool: &PgPool,
        dispatch_id: DbId,
        log_path: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE nomad_job_dispatch SET log_path = $2 WHERE id = $1")
            .bind(dispatch_id)
            .bind(log_path)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Find a dispatch by the runner's job id.
    pub async fn find_by_nomad_job(
        pool: &PgPool,
        nomad_job_id: &str,
    ) -> Result<Option<JobDispatch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM nomad_job_dispatch WHERE nomad_job_id = $1");
        sqlx::query_as::<_, JobDispatch>(&query)
            .bind(nomad_job_id)
            .fetch_optional(pool)
            .await
    }

    /// Most recent dispatch of a task.
    pub async fn latest_for_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<JobDispatch>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} \
             FROM nomad_job_dispatch njd \
             JOIN processingtask2nomad t2n ON t2n.nomad_job_dispatch_fk_id = njd.id \
             WHERE t2n.processing_task_fk_id = $1 \
             ORDER BY njd.dispatch_date DESC, njd.id DESC LIMIT 1"
        );
        sqlx::query_as::<_, JobDispatch>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Task a dispatch belongs to.
    pub async fn task_of(pool: &PgPool, dispatch_id: DbId) -> Result<Option<DbId>, sqlx::Error> {
        let row: Option<(DbId,)> = sqlx::query_as(
            "SELECT processing_task_fk_id FROM processingtask2nomad \
             WHERE nomad_job_dispatch_fk_id = $1",
        )
        .bind(dispatch_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Append a status entry to a dispatch's history.
    ///
    /// Change-only: if the dispatch's latest status already equals `status`
    /// nothing is written, so pollers observing the same runner state twice
    /// produce one entry and one event. Transitions are checked against the
    /// state machine; an invalid one is reported, not written.
    pub async fn append_status(
        pool: &PgPool,
        dispatch_id: DbId,
        status: ProcessingStatus,
        message: Option<&str>,
        exit_code: Option<i32>,
    ) -> Result<AppendOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        // Serialize concurrent appends on the same dispatch.
        sqlx::query("SELECT id FROM nomad_job_dispatch WHERE id = $1 FOR UPDATE")
            .bind(dispatch_id)
            .execute(&mut *tx)
            .await?;

        let latest: Option<(StatusId,)> = sqlx::query_as(
            "SELECT processing_status_fk_id FROM processing_status_workflow \
             WHERE nomad_job_dispatch_fk_id = $1 \
             ORDER BY date DESC, id DESC LIMIT 1",
        )
        .bind(dispatch_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((from,)) = latest {
            if from == status.id() {
                tx.rollback().await?;
                return Ok(AppendOutcome::Unchanged);
            }
            if !state_machine::can_transition(from, status.id()) {
                tx.rollback().await?;
                return Ok(AppendOutcome::InvalidTransition { from });
            }
        }

        sqlx::query(
            "INSERT INTO processing_status_workflow \
                 (nomad_job_dispatch_fk_id, processing_status_fk_id, message, exit_code) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(dispatch_id)
        .bind(status.id())
        .bind(message)
        .bind(exit_code)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Recorded)
    }

    /// Full status history of a dispatch, oldest first.
    pub async fn history(
        pool: &PgPool,
        dispatch_id: DbId,
    ) -> Result<Vec<StatusWorkflowEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM processing_status_workflow \
             WHERE nomad_job_dispatch_fk_id = $1 \
             ORDER BY date, id"
        );
        sqlx::query_as::<_, StatusWorkflowEntry>(&query)
            .bind(dispatch_id)
            .fetch_all(pool)
            .await
    }

    /// Latest status across all of a task's dispatches.
    pub async fn latest_status_for_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<StatusId>, sqlx::Error> {
        let row: Option<(StatusId,)> = sqlx::query_as(
            "SELECT psw.processing_status_fk_id \
             FROM processingtask2nomad t2n \
             JOIN processing_status_workflow psw \
               ON psw.nomad_job_dispatch_fk_id = t2n.nomad_job_dispatch_fk_id \
             WHERE t2n.processing_task_fk_id = $1 \
             ORDER BY psw.date DESC, psw.id DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Budget-consuming error entries across a task's whole dispatch
    /// lineage.
    pub async fn error_count_for_task(pool: &PgPool, task_id: DbId) -> Result<i64, sqlx::Error> {
        let excluded = NON_COUNTED_EXIT_CODES.map(|code| code.to_string()).join(", ");
        let query = format!(
            "SELECT COUNT(*) \
             FROM processingtask2nomad t2n \
             JOIN processing_status_workflow psw \
               ON psw.nomad_job_dispatch_fk_id = t2n.nomad_job_dispatch_fk_id \
             WHERE t2n.processing_task_fk_id = $1 \
               AND psw.processing_status_fk_id IN ($2, $3) \
               AND (psw.exit_code IS NULL OR psw.exit_code NOT IN ({excluded}))"
        );
        let (count,): (i64,) = sqlx::query_as(&query)
            .bind(task_id)
            .bind(ProcessingStatus::InternalError.id())
            .bind(ProcessingStatus::ExternalError.id())
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Dispatches of open tasks whose latest status is non-terminal and
    /// that have a runner job id, for the tracker's poll cycle.
    pub async fn watched(pool: &PgPool) -> Result<Vec<WatchedDispatch>, sqlx::Error> {
        let query = "\
            WITH latest AS ( \
                SELECT DISTINCT ON (nomad_job_dispatch_fk_id) \
                       nomad_job_dispatch_fk_id AS dispatch_id, \
                       processing_status_fk_id AS latest_status, \
                       date AS latest_status_date \
                FROM processing_status_workflow \
                ORDER BY nomad_job_dispatch_fk_id, date DESC, id DESC \
            ) \
            SELECT njd.id AS dispatch_id, \
                   t2n.processing_task_fk_id AS task_id, \
                   njd.nomad_job_id, \
                   njd.dispatch_date, \
                   l.latest_status, \
                   l.latest_status_date, \
                   pr.duration_secs \
            FROM nomad_job_dispatch njd \
            JOIN processingtask2nomad t2n ON t2n.nomad_job_dispatch_fk_id = njd.id \
            JOIN processing_tasks pt ON pt.id = t2n.processing_task_fk_id \
            JOIN trigger_validation tv ON tv.id = pt.trigger_validation_fk_id \
            JOIN triggering_condition tc ON tc.id = tv.triggering_condition_fk_id \
            JOIN processing_routine pr ON pr.id = tc.processing_routine_fk_id \
            JOIN latest l ON l.dispatch_id = njd.id \
            WHERE njd.nomad_job_id IS NOT NULL \
              AND NOT pt.has_ended \
              AND l.latest_status IN ($1, $2) \
            ORDER BY njd.id";
        sqlx::query_as::<_, WatchedDispatch>(query)
            .bind(ProcessingStatus::Started.id())
            .bind(ProcessingStatus::Pending.id())
            .fetch_all(pool)
            .await
    }
}
