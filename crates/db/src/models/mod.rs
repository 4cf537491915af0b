//! Entity models mapping 1:1 to database tables, plus query DTOs.

pub mod catalog;
pub mod raw_input;
pub mod status;
pub mod task;

pub use catalog::{ConditionWithRoutine, ProcessingRoutine, Product, RasterType, TriggeringCondition};
pub use raw_input::{NewRawInput, RawInput};
pub use status::{ProcessingStatus, StatusId};
pub use task::{
    DispatchableTask, JobDispatch, ProcessingTask, StatusWorkflowEntry, TriggerValidation,
    WatchedDispatch,
};
