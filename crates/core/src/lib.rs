//! Domain logic for the cryoflow production orchestrator.
//!
//! Everything in this crate is pure: triggering predicates, the
//! processing-status state machine, and the dependency-readiness rules are
//! plain functions over plain data so they can be tested without a database
//! or a job runner. The crate has zero internal dependencies.

pub mod error;
pub mod flavour;
pub mod scheduling;
pub mod triggering;
pub mod types;
pub mod workflow;
