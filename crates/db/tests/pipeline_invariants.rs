mod common;

use sqlx::PgPool;

use cryoflow_core::scheduling::PredecessorState;
use cryoflow_db::models::status::ProcessingStatus;
use cryoflow_db::repositories::{
    AppendOutcome, DispatchRepo, ProductRepo, RawInputRepo, TaskRepo, ValidationRepo,
};

/// Duplicate harvests of the same input collapse onto one row.
#[sqlx::test(migrations = "./migrations")]
async fn duplicate_input_insert_is_skipped(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    common::seed_input(&pool, &fixture, "S2A_T32TLS_20250115").await;

    let replay = RawInputRepo::insert(
        &pool,
        &cryoflow_db::models::raw_input::NewRawInput {
            input_id: "S2A_T32TLS_20250115".to_string(),
            input_path: "/eodata/replay.SAFE".to_string(),
            raster_type_fk_id: fixture.raster_type_id,
            tile: "32TLS".to_string(),
            measurement_day: 20250115,
            start_date: chrono::Utc::now(),
            publishing_date: chrono::Utc::now(),
            relative_orbit: None,
            is_partial: false,
        },
    )
    .await
    .unwrap();
    assert!(replay.is_none());

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_inputs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

/// An input validates at most once per condition.
#[sqlx::test(migrations = "./migrations")]
async fn validation_is_unique_per_input_and_condition(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let input_row_id = common::seed_input(&pool, &fixture, "S2A_T32TLS_20250115").await;

    let first = ValidationRepo::record(&pool, fixture.condition_id, true, None, &[input_row_id])
        .await
        .unwrap();
    assert!(first.is_some());

    let replay = ValidationRepo::record(&pool, fixture.condition_id, true, None, &[input_row_id])
        .await
        .unwrap();
    assert!(replay.is_none(), "replayed validation must be dropped");

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trigger_validation")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1, "the losing validation must not survive rollback");
}

/// Two evaluators racing on the same input settle on a single validation.
#[sqlx::test(migrations = "./migrations")]
async fn concurrent_validations_collapse_to_one(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let input_row_id = common::seed_input(&pool, &fixture, "S2A_T32TLS_20250115").await;

    let input_rows = [input_row_id];
    let (a, b) = tokio::join!(
        ValidationRepo::record(&pool, fixture.condition_id, true, None, &input_rows),
        ValidationRepo::record(&pool, fixture.condition_id, true, None, &input_rows),
    );
    let winners = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|v| v.is_some())
        .count();
    assert_eq!(winners, 1, "exactly one evaluator may win the race");

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trigger_validation")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

/// Exactly one task per validation, enforced by the unique constraint.
#[sqlx::test(migrations = "./migrations")]
async fn task_creation_is_idempotent(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let input_row_id = common::seed_input(&pool, &fixture, "S2A_T32TLS_20250115").await;
    let validation = ValidationRepo::record(&pool, fixture.condition_id, true, None, &[input_row_id])
        .await
        .unwrap()
        .unwrap();

    let first = TaskRepo::create(&pool, validation.id, None, None).await.unwrap();
    assert!(first.is_some());

    let replay = TaskRepo::create(&pool, validation.id, None, None).await.unwrap();
    assert!(replay.is_none());
}

/// A task with an open dispatch cannot be claimed again; an errored
/// dispatch releases the claim.
#[sqlx::test(migrations = "./migrations")]
async fn dispatch_claim_refuses_open_dispatch(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;

    let first = DispatchRepo::create(&pool, task_id).await.unwrap();
    assert!(first.is_some());

    // No status entries yet: the submission is in flight.
    assert!(DispatchRepo::create(&pool, task_id).await.unwrap().is_none());

    // Running: still taken.
    let first = first.unwrap();
    DispatchRepo::append_status(&pool, first.id, ProcessingStatus::Started, None, None)
        .await
        .unwrap();
    assert!(DispatchRepo::create(&pool, task_id).await.unwrap().is_none());

    // Errored: eligible for a new dispatch.
    DispatchRepo::append_status(&pool, first.id, ProcessingStatus::InternalError, None, Some(1))
        .await
        .unwrap();
    assert!(DispatchRepo::create(&pool, task_id).await.unwrap().is_some());

    // Closed task: no more claims.
    assert!(TaskRepo::mark_ended(&pool, task_id).await.unwrap());
    assert!(DispatchRepo::create(&pool, task_id).await.unwrap().is_none());
}

/// A discarded dispatch disappears entirely and releases the task.
#[sqlx::test(migrations = "./migrations")]
async fn discarded_dispatch_releases_the_task(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;

    let dispatch = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();
    DispatchRepo::discard(&pool, dispatch.id).await.unwrap();

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nomad_job_dispatch")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);
    assert!(DispatchRepo::create(&pool, task_id).await.unwrap().is_some());
}

/// The status history only records changes, and only legal transitions.
#[sqlx::test(migrations = "./migrations")]
async fn append_status_is_change_only(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;
    let dispatch = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();

    let outcome = DispatchRepo::append_status(&pool, dispatch.id, ProcessingStatus::Pending, None, None)
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Recorded);

    // Poller observes the same runner state again.
    let outcome = DispatchRepo::append_status(&pool, dispatch.id, ProcessingStatus::Pending, None, None)
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Unchanged);

    let outcome = DispatchRepo::append_status(&pool, dispatch.id, ProcessingStatus::Started, None, None)
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Recorded);

    let history = DispatchRepo::history(&pool, dispatch.id).await.unwrap();
    let statuses: Vec<_> = history
        .iter()
        .map(|entry| entry.processing_status_fk_id)
        .collect();
    assert_eq!(
        statuses,
        vec![ProcessingStatus::Pending.id(), ProcessingStatus::Started.id()]
    );
}

/// A terminal status accepts no further entries.
#[sqlx::test(migrations = "./migrations")]
async fn append_status_rejects_illegal_transition(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;
    let dispatch = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();

    for status in [ProcessingStatus::Started, ProcessingStatus::Processed] {
        DispatchRepo::append_status(&pool, dispatch.id, status, None, None)
            .await
            .unwrap();
    }

    let outcome =
        DispatchRepo::append_status(&pool, dispatch.id, ProcessingStatus::Started, None, None)
            .await
            .unwrap();
    assert_eq!(
        outcome,
        AppendOutcome::InvalidTransition {
            from: ProcessingStatus::Processed.id()
        }
    );
}

/// Watchdog exit codes stay out of the error budget; the count spans the
/// task's whole dispatch lineage.
#[sqlx::test(migrations = "./migrations")]
async fn error_count_excludes_watchdog_exit_codes(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;

    // First dispatch dies with a real failure.
    let first = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();
    DispatchRepo::append_status(&pool, first.id, ProcessingStatus::Started, None, None)
        .await
        .unwrap();
    DispatchRepo::append_status(
        &pool,
        first.id,
        ProcessingStatus::InternalError,
        Some("allocation failed"),
        Some(1),
    )
    .await
    .unwrap();

    // Second dispatch is reaped by the lost-job watchdog.
    let second = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();
    DispatchRepo::append_status(&pool, second.id, ProcessingStatus::Started, None, None)
        .await
        .unwrap();
    DispatchRepo::append_status(
        &pool,
        second.id,
        ProcessingStatus::InternalError,
        Some("no callback"),
        Some(404),
    )
    .await
    .unwrap();

    let count = DispatchRepo::error_count_for_task(&pool, task_id).await.unwrap();
    assert_eq!(count, 1);
}

/// Predecessor readiness follows the consuming task's latest status.
#[sqlx::test(migrations = "./migrations")]
async fn predecessor_state_tracks_consuming_task(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "GRDH_TC").await;

    let state = TaskRepo::predecessor_state(&pool, "S1A_SLICE_1").await.unwrap();
    assert_eq!(state, PredecessorState::Unmaterialized);

    let predecessor_task = common::seed_task(&pool, &fixture, "S1A_SLICE_1").await;
    let state = TaskRepo::predecessor_state(&pool, "S1A_SLICE_1").await.unwrap();
    assert_eq!(
        state,
        PredecessorState::Tracked {
            latest_status: ProcessingStatus::Pending.id()
        },
        "a task with no history yet reports as pending"
    );

    let dispatch = DispatchRepo::create(&pool, predecessor_task).await.unwrap().unwrap();
    for status in [ProcessingStatus::Started, ProcessingStatus::Processed] {
        DispatchRepo::append_status(&pool, dispatch.id, status, None, None)
            .await
            .unwrap();
    }
    let state = TaskRepo::predecessor_state(&pool, "S1A_SLICE_1").await.unwrap();
    assert_eq!(
        state,
        PredecessorState::Tracked {
            latest_status: ProcessingStatus::Processed.id()
        }
    );
}

/// Tasks enter and leave the dispatch queue with their status history.
#[sqlx::test(migrations = "./migrations")]
async fn needing_dispatch_follows_latest_status(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;

    // Fresh task with no dispatch: queued.
    let queue = TaskRepo::needing_dispatch(&pool).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].task_id, task_id);
    assert_eq!(queue[0].error_count, 0);

    // Running: not queued.
    let dispatch = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();
    DispatchRepo::append_status(&pool, dispatch.id, ProcessingStatus::Started, None, None)
        .await
        .unwrap();
    assert!(TaskRepo::needing_dispatch(&pool).await.unwrap().is_empty());

    // Errored: queued again, with the error counted.
    DispatchRepo::append_status(
        &pool,
        dispatch.id,
        ProcessingStatus::ExternalError,
        None,
        Some(210),
    )
    .await
    .unwrap();
    let queue = TaskRepo::needing_dispatch(&pool).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].error_count, 1);

    // Closed: gone for good.
    assert!(TaskRepo::mark_ended(&pool, task_id).await.unwrap());
    assert!(TaskRepo::needing_dispatch(&pool).await.unwrap().is_empty());
    assert!(!TaskRepo::mark_ended(&pool, task_id).await.unwrap());
}

/// One product per task; processed tasks without a product are found.
#[sqlx::test(migrations = "./migrations")]
async fn product_catalog_is_idempotent(pool: PgPool) {
    let fixture = common::seed_condition(&pool, "CC_TC").await;
    let task_id = common::seed_task(&pool, &fixture, "S2A_T32TLS_20250115").await;
    let dispatch = DispatchRepo::create(&pool, task_id).await.unwrap().unwrap();
    for status in [ProcessingStatus::Started, ProcessingStatus::Processed] {
        DispatchRepo::append_status(&pool, dispatch.id, status, None, None)
            .await
            .unwrap();
    }

    let pending = ProductRepo::processed_tasks_without_product(&pool).await.unwrap();
    assert_eq!(pending, vec![task_id]);

    let product = ProductRepo::insert(&pool, task_id, "/products/FSC_20250115_T32TLS")
        .await
        .unwrap();
    assert!(product.is_some());

    let replay = ProductRepo::insert(&pool, task_id, "/products/other")
        .await
        .unwrap();
    assert!(replay.is_none());

    assert!(ProductRepo::processed_tasks_without_product(&pool)
        .await
        .unwrap()
        .is_empty());
}
