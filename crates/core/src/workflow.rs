//! Processing-status state machine and retry/termination policy.
//!
//! This module lives in `core` (zero internal deps) so it can be used by both
//! the repository layer and the pipeline workers. Status ids are the 1-based
//! seed order of the `processing_status` lookup table; the state machine is
//! intentionally expressed over raw ids because `core` cannot depend on the
//! `db` crate's enum.

/// Exit codes that never count against a task's error budget.
///
/// 404 is the synthetic code injected by the lost-job watchdog, 109 marks a
/// job requeued by the runner before it produced anything. Both re-open the
/// task without consuming a retry.
pub const NON_COUNTED_EXIT_CODES: [i32; 2] = [109, 404];

/// Whether an error exit code consumes one unit of the task's error budget.
pub fn counts_against_budget(exit_code: Option<i32>) -> bool {
    match exit_code {
        Some(code) => !NON_COUNTED_EXIT_CODES.contains(&code),
        None => true,
    }
}

/// Status ids matching `processing_status` seed data (1-based).
pub mod state_machine {
    /// Returns the set of valid target status ids reachable from `from_status`.
    ///
    /// Terminal states (processed=2, terminated=6) return an empty slice.
    pub fn valid_transitions(from_status: i16) -> &'static [i16] {
        match from_status {
            // Started -> Processed, Pending, InternalError, ExternalError
            1 => &[2, 3, 4, 5],
            // Pending -> Started, Processed, InternalError, ExternalError
            3 => &[1, 2, 4, 5],
            // InternalError -> Started (redispatch), Terminated
            4 => &[1, 6],
            // ExternalError -> Started (redispatch), Terminated
            5 => &[1, 6],
            // Terminal states: Processed, Terminated
            2 | 6 => &[],
            // Unknown status: no transitions allowed
            _ => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: i16, to: i16) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Whether a status is terminal for the owning task.
    pub fn is_terminal(status: i16) -> bool {
        matches!(status, 2 | 6)
    }

    /// Whether a status is an error state eligible for redispatch review.
    pub fn is_error(status: i16) -> bool {
        matches!(status, 4 | 5)
    }
}

/// Outcome of reviewing an errored dispatch lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Error budget not exhausted: the task may be dispatched again.
    Redispatch,
    /// Error budget exhausted: append `terminated`, close the task.
    Terminate,
}

/// Decide whether an errored task is redispatched or terminated.
///
/// `error_count` is the number of budget-consuming error entries across the
/// task's whole dispatch lineage (see [`counts_against_budget`]).
pub fn retry_decision(error_count: i64, max_error_count: i64) -> RetryDecision {
    if error_count >= max_error_count {
        RetryDecision::Terminate
    } else {
        RetryDecision::Redispatch
    }
}

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;

    #[test]
    fn started_to_processed() {
        assert!(can_transition(1, 2));
    }

    #[test]
    fn started_to_pending() {
        assert!(can_transition(1, 3));
    }

    #[test]
    fn started_to_both_errors() {
        assert!(can_transition(1, 4));
        assert!(can_transition(1, 5));
    }

    #[test]
    fn pending_to_started() {
        assert!(can_transition(3, 1));
    }

    #[test]
    fn errors_can_redispatch() {
        assert!(can_transition(4, 1));
        assert!(can_transition(5, 1));
    }

    #[test]
    fn errors_can_terminate() {
        assert!(can_transition(4, 6));
        assert!(can_transition(5, 6));
    }

    #[test]
    fn processed_has_no_transitions() {
        assert!(valid_transitions(2).is_empty());
    }

    #[test]
    fn terminated_has_no_transitions() {
        assert!(valid_transitions(6).is_empty());
    }

    #[test]
    fn terminated_is_irreversible() {
        assert!(!can_transition(6, 1));
        assert!(!can_transition(6, 3));
    }

    #[test]
    fn unknown_status_has_no_transitions() {
        assert!(valid_transitions(42).is_empty());
    }

    #[test]
    fn terminal_and_error_classification() {
        assert!(is_terminal(2));
        assert!(is_terminal(6));
        assert!(!is_terminal(4));
        assert!(is_error(4));
        assert!(is_error(5));
        assert!(!is_error(2));
    }

    #[test]
    fn watchdog_exit_codes_do_not_consume_budget() {
        assert!(!counts_against_budget(Some(404)));
        assert!(!counts_against_budget(Some(109)));
        assert!(counts_against_budget(Some(1)));
        assert!(counts_against_budget(None));
    }

    #[test]
    fn retry_until_budget_exhausted() {
        assert_eq!(retry_decision(0, 3), RetryDecision::Redispatch);
        assert_eq!(retry_decision(2, 3), RetryDecision::Redispatch);
        assert_eq!(retry_decision(3, 3), RetryDecision::Terminate);
        assert_eq!(retry_decision(7, 3), RetryDecision::Terminate);
    }
}
