//! The `drain` module waits for outstanding deliveries before a run ends.
//!
//! [`DrainCoordinator`] tracks every admitted key and consumes the delivery
//! reports. [`DrainCoordinator::drain`] returns once every tracked key has an
//! outcome or the timeout elapses; keys still unresolved are reported as
//! pending rather than treated as fatal.

pub mod coordinator;

pub use coordinator::{DrainCoordinator, DrainReport, FailedItem};
