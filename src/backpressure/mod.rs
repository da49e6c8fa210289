//! The `backpressure` module is the admission gate in front of the delivery
//! client.
//!
//! A message is admitted while the in-flight count is below the configured
//! maximum. At capacity the producer suspends until a delivery callback frees
//! a slot, instead of sleeping for a fixed interval between sends.

pub mod controller;

pub use controller::{Admission, Backpressure};
