//! # imgfeed
//!
//! `imgfeed` publishes every file of a local directory to a Kafka topic, one
//! message per file, keyed by file name. Sends are asynchronous; the number of
//! messages awaiting a delivery report is bounded, and a run always ends by
//! draining outstanding reports into a per-key summary.
//!
//! ## Core Modules
//!
//! - `source`: enumerates the source directory and reads payloads lazily.
//! - `delivery`: the non-blocking producer client, its delivery callbacks and transports.
//! - `backpressure`: admits messages without exceeding the in-flight bound.
//! - `drain`: collects delivery reports and produces the final drain report.
//! - `pipeline`: the enumerate → admit → drain run and its exit codes.
//! - `persistence`: a `sled` ledger of per-key outcomes, used by `retry`.
//! - `sink`: copies a local file onto a mounted remote filesystem (`upload`).
//! - `config`: loads settings from files and `IMGFEED_*` environment variables.
//! - `utils`: error type and logging setup.

pub mod backpressure;
pub mod config;
pub mod delivery;
pub mod drain;
pub mod persistence;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod utils;
