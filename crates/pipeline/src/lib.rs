//! Pipeline workers: triggering evaluator, task factory, dependency
//! scheduler, job dispatcher and status tracker.
//!
//! Each worker is a long-lived Tokio task owning a poll loop; the event bus
//! only shortens the latency between a store write and the next cycle.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod factory;
pub mod policy;
pub mod scheduler;
pub mod tracker;

pub use config::PipelineConfig;
pub use dispatcher::JobDispatcher;
pub use error::PipelineError;
pub use evaluator::TriggeringEvaluator;
pub use factory::TaskFactory;
pub use scheduler::DependencyScheduler;
pub use tracker::StatusTracker;
