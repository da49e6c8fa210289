//! The `pipeline` module runs one feed: enumerate the source directory, admit
//! each file through the backpressure gate, then drain.
//!
//! A run moves through `Idle → Enumerating → Admitting → Draining →
//! {Completed | CompletedWithFailures}`. Draining is never skipped: an
//! interrupt or a mid-run error still waits (with a bounded timeout) for the
//! messages already handed to the producer.

pub mod runner;
pub mod state;

pub use runner::{
    EXIT_FAILURES, EXIT_OK, EXIT_SETUP, Pipeline, RunOptions, RunReport, exit_code, feed,
    open_source,
};
pub use state::{RunPhase, RunState};

#[cfg(test)]
mod tests;
