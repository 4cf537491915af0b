//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod catalog_repo;
pub mod dispatch_repo;
pub mod product_repo;
pub mod raw_input_repo;
pub mod task_repo;
pub mod validation_repo;

pub use catalog_repo::CatalogRepo;
pub use dispatch_repo::{AppendOutcome, DispatchRepo};
pub use product_repo::ProductRepo;
pub use raw_input_repo::RawInputRepo;
pub use task_repo::TaskRepo;
pub use validation_repo::ValidationRepo;
