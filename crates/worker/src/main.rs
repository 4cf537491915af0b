//! Pipeline worker binary.
//!
//! Boots the store, the event bus and the job runner client, then runs
//! every pipeline worker until ctrl-c.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cryoflow_events::EventBus;
use cryoflow_nomad::NomadClient;
use cryoflow_pipeline::{
    DependencyScheduler, JobDispatcher, PipelineConfig, StatusTracker, TaskFactory,
    TriggeringEvaluator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cryoflow_worker=debug,cryoflow_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env();
    let database_url = std::env::var("DATABASE_URL")?;
    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "10".into())
        .parse()?;

    let pool = cryoflow_db::create_pool(&database_url, max_connections).await?;
    cryoflow_db::health_check(&pool).await?;
    cryoflow_db::run_migrations(&pool).await?;
    tracing::info!("Database ready");

    let bus = Arc::new(EventBus::default());
    let runner = Arc::new(NomadClient::new(config.nomad_url.clone())?);
    let dispatcher = Arc::new(JobDispatcher::new(pool.clone(), bus.clone(), runner.clone()));

    let evaluator = TriggeringEvaluator::new(pool.clone(), bus.clone(), config.clone());
    let factory = TaskFactory::new(pool.clone(), bus.clone(), config.clone());
    let scheduler = DependencyScheduler::new(pool.clone(), bus.clone(), dispatcher, config.clone());
    let tracker = StatusTracker::new(pool.clone(), bus.clone(), runner, config);

    let cancel = CancellationToken::new();
    let mut workers = tokio::task::JoinSet::new();
    {
        let cancel = cancel.clone();
        workers.spawn(async move { evaluator.run(cancel).await });
    }
    {
        let cancel = cancel.clone();
        workers.spawn(async move { factory.run(cancel).await });
    }
    {
        let cancel = cancel.clone();
        workers.spawn(async move { scheduler.run(cancel).await });
    }
    {
        let cancel = cancel.clone();
        workers.spawn(async move { tracker.run(cancel).await });
    }
    tracing::info!("Pipeline workers started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    cancel.cancel();
    while workers.join_next().await.is_some() {}
    tracing::info!("Pipeline workers stopped");

    Ok(())
}
