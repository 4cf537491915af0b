//! Dependency-readiness rules for task scheduling.
//!
//! A task may depend on the input produced by a predecessor task in the same
//! processing chain. The scheduler evaluates the predecessor's state with
//! these rules before handing the task to the dispatcher.

use crate::workflow::state_machine;

/// State of a task's predecessor, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredecessorState {
    /// The task has no predecessor; it only needs its own inputs.
    None,
    /// A predecessor task exists with the given latest status id.
    Tracked { latest_status: i16 },
    /// The dependency names an input no task produces yet.
    Unmaterialized,
}

/// Scheduling decision for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// All dependencies satisfied, dispatch now.
    Ready,
    /// Predecessor still running or retryable, check again later.
    Waiting,
    /// Predecessor terminated, this task can never run.
    Blocked,
}

/// Evaluate whether a task is ready to dispatch given its predecessor state.
///
/// Tasks whose predecessor is still absent from the store wait: the upstream
/// product may simply not have been harvested yet.
pub fn readiness(predecessor: PredecessorState) -> Readiness {
    match predecessor {
        PredecessorState::None => Readiness::Ready,
        PredecessorState::Unmaterialized => Readiness::Waiting,
        PredecessorState::Tracked { latest_status } => {
            if latest_status == 2 {
                // Processed: the product the task needs exists.
                Readiness::Ready
            } else if state_machine::is_terminal(latest_status) {
                // Terminated.
                Readiness::Blocked
            } else if state_machine::valid_transitions(latest_status).is_empty() {
                // Unknown status id: treat as blocked rather than dispatch
                // against an undefined predecessor state.
                Readiness::Blocked
            } else {
                Readiness::Waiting
            }
        }
    }
}
