//! The `persistence` module keeps a ledger of delivery outcomes.
//!
//! After each run the latest outcome per key is written to an embedded `sled`
//! database, one tree per topic. The `retry` command reads it back to re-send
//! only the keys that failed or were still pending.

pub mod sled_store;

pub use sled_store::{DeliveryStatus, Ledger, LedgerEntry, LedgerError};
