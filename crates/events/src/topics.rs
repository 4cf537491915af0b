//! Topic names published on the pipeline bus.
//!
//! Workers subscribe by topic to wake up when upstream work appears; every
//! worker also polls, so a missed event delays work instead of losing it.

/// A harvester inserted a new raw input.
pub const INPUT_INSERTION: &str = "input_insertion";

/// The evaluator recorded a validation and linked its inputs.
pub const RAW2VALID_INSERTION: &str = "raw2valid_insertion";

/// The task factory created a processing task.
pub const PROCESSING_TASK_INSERTION: &str = "processing_task_insertion";

/// A task's latest status changed to `processed`.
pub const PROCESSING_TASKS_STATE_PROCESSED: &str = "processing_tasks_state_processed";

/// A task was closed because its predecessor terminated.
pub const PROCESSING_TASKS_STATE_BLOCKED: &str = "processing_tasks_state_blocked";

/// A finished task's output product was cataloged.
pub const PRODUCT_INSERTION: &str = "product_insertion";

/// Topic for a status change to the given status code, e.g.
/// `processing_tasks_state_internal_error`.
pub fn processing_task_state(status_name: &str) -> String {
    format!("processing_tasks_state_{status_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_topic_matches_static_constant() {
        assert_eq!(
            processing_task_state("processed"),
            PROCESSING_TASKS_STATE_PROCESSED
        );
    }
}
