//! The `utils` module holds the pieces shared by every stage of the pipeline:
//! the crate-wide error type and logging initialization.

pub mod error;
pub mod logging;

pub use error::PipelineError;
