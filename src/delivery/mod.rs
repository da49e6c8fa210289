//! The `delivery` module wraps the broker producer.
//!
//! [`DeliveryClient::send`] never waits on the network: it hands the message
//! to a bounded producer buffer and returns. Each accepted message later gets
//! exactly one [`DeliveryReport`], produced by the delivery callback while
//! [`DeliveryClient::poll`] (or a background [`Poller`]) drives the producer.
//!
//! The producer itself sits behind the [`Transport`] trait:
//! - [`kafka::KafkaTransport`] publishes through librdkafka.
//! - [`memory::MemoryTransport`] is an in-process broker used for dry runs and tests.

pub mod client;
pub mod kafka;
pub mod memory;
pub mod message;

pub use client::{
    DeliveryClient, DeliveryHandle, Poller, ProduceError, QueueState, SendError, Transport,
};
pub use message::{DeliveryReport, InFlight, Message, Outcome};
