//! Shared fixtures for the pipeline integration tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::PgPool;

use cryoflow_db::models::catalog::ProcessingRoutine;
use cryoflow_db::models::raw_input::NewRawInput;
use cryoflow_db::repositories::{CatalogRepo, RawInputRepo};
use cryoflow_nomad::{
    DispatchResponse, JobRunner, JobSpec, JobStatus, NomadApiError, NomadClientError, PollReport,
};

/// In-memory job runner: accepts everything, remembers submissions.
///
/// Tests can slow submissions down to widen races, make them fail, or
/// script what a poll reports.
pub struct FakeRunner {
    pub submitted: Mutex<Vec<JobSpec>>,
    counter: AtomicU64,
    rejecting: AtomicBool,
    submit_delay: Mutex<Duration>,
    poll_report: Mutex<PollReport>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            rejecting: AtomicBool::new(false),
            submit_delay: Mutex::new(Duration::ZERO),
            poll_report: Mutex::new(PollReport::status_only(JobStatus::Pending)),
        }
    }

    pub fn submissions(&self) -> Vec<JobSpec> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.rejecting.store(reject, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    pub fn set_poll_report(&self, report: PollReport) {
        *self.poll_report.lock().unwrap() = report;
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn submit(&self, spec: &JobSpec) -> Result<DispatchResponse, NomadClientError> {
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(NomadClientError::Api(NomadApiError::ApiError {
                status: 500,
                body: "no eligible nodes".to_string(),
            }));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(DispatchResponse {
            dispatched_job_id: format!("{}/dispatch-{n}", spec.parent_job),
            eval_id: format!("ev-{n}"),
        })
    }

    async fn poll(&self, _job_id: &str) -> Result<PollReport, NomadClientError> {
        Ok(self.poll_report.lock().unwrap().clone())
    }

    async fn stop(&self, _job_id: &str) -> Result<(), NomadClientError> {
        Ok(())
    }
}

/// A seeded condition with its raster type id.
pub struct Fixture {
    pub raster_type_id: i16,
    pub condition_id: i16,
}

/// Seed one raster type, routine and condition with the given policy.
pub async fn seed_condition(
    pool: &PgPool,
    name: &str,
    raster_type: &str,
    policy: serde_json::Value,
) -> Fixture {
    let raster = CatalogRepo::insert_raster_type(pool, raster_type, "optical")
        .await
        .expect("raster type");
    let routine = CatalogRepo::insert_routine(
        pool,
        &ProcessingRoutine {
            id: 0,
            name: format!("{}_routine", name.to_lowercase()),
            product_type_code: name.to_string(),
            cpu_mhz: 2000,
            ram_mb: 8192,
            storage_gb: 20,
            duration_secs: 600,
            docker_image: format!("registry/{}:1.0", name.to_lowercase()),
            flavour: "eo1.large".to_string(),
        },
    )
    .await
    .expect("routine");
    let condition = CatalogRepo::insert_condition(pool, name, routine.id, raster.id, &policy)
        .await
        .expect("condition");

    Fixture {
        raster_type_id: raster.id,
        condition_id: condition.id,
    }
}

/// Freshness policy accepting any tile with wide windows, NRT-gated.
pub fn freshness_policy() -> serde_json::Value {
    serde_json::json!({
        "policy": {
            "Freshness": {
                "tiles": [],
                "window": {
                    "max_day_since_publication": 10000,
                    "max_day_since_measurement": 10000
                }
            }
        },
        "nrt": { "max_harvest_lag_hours": 1000000 }
    })
}

/// Insert one raw input, freshly published and harvested.
pub async fn seed_input(pool: &PgPool, fixture: &Fixture, input_id: &str, path: &str) -> i64 {
    let input = RawInputRepo::insert(
        pool,
        &NewRawInput {
            input_id: input_id.to_string(),
            input_path: path.to_string(),
            raster_type_fk_id: fixture.raster_type_id,
            tile: "32TLS".to_string(),
            measurement_day: 20250115,
            start_date: Utc.with_ymd_and_hms(2025, 1, 15, 5, 30, 0).unwrap(),
            publishing_date: Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap(),
            relative_orbit: Some(66),
            is_partial: false,
        },
    )
    .await
    .expect("insert input")
    .expect("fresh input");
    input.id
}

/// Insert one partial radar slice; covers its tile only with neighbours.
pub async fn seed_partial_slice(
    pool: &PgPool,
    fixture: &Fixture,
    input_id: &str,
    path: &str,
) -> i64 {
    let input = RawInputRepo::insert(
        pool,
        &NewRawInput {
            input_id: input_id.to_string(),
            input_path: path.to_string(),
            raster_type_fk_id: fixture.raster_type_id,
            tile: "32TLS".to_string(),
            measurement_day: 20250115,
            start_date: Utc.with_ymd_and_hms(2025, 1, 15, 5, 30, 0).unwrap(),
            publishing_date: Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap(),
            relative_orbit: Some(66),
            is_partial: true,
        },
    )
    .await
    .expect("insert slice")
    .expect("fresh slice");
    input.id
}
