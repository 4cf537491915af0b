//! In-process event bus for the cryoflow pipeline.

pub mod bus;
pub mod topics;

pub use bus::{EventBus, PipelineEvent};
