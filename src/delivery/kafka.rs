//! Kafka transport built on librdkafka's `BaseProducer`.
//!
//! The producer's local queue is sized to the pipeline's max in-flight count,
//! so a `QueueFull` refusal only happens if the admission gate is bypassed.
//! Delivery callbacks are served by `poll`; each one carries the boxed
//! [`InFlight`] ticket handed over at `produce` time.

use std::time::Duration;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::{ClientConfig, ClientContext, Message as _};
use tracing::{error, info, warn};

use crate::config::BrokerSettings;
use crate::delivery::client::{DeliveryHandle, ProduceError, Transport};
use crate::delivery::message::{InFlight, Message, Outcome};
use crate::utils::PipelineError;

/// Routes librdkafka callbacks into the pipeline.
struct FeedContext {
    handle: DeliveryHandle,
}

impl ClientContext for FeedContext {
    fn error(&self, error: KafkaError, reason: &str) {
        error!(err = %error, reason, "broker client error");
    }
}

impl ProducerContext for FeedContext {
    type DeliveryOpaque = Box<InFlight>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, ticket: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(msg) => Outcome::Delivered {
                partition: msg.partition(),
                offset: msg.offset(),
            },
            Err((err, _)) => Outcome::Failed {
                reason: err.to_string(),
            },
        };
        self.handle.complete(*ticket, outcome);
    }
}

pub struct KafkaTransport {
    producer: BaseProducer<FeedContext>,
}

impl KafkaTransport {
    /// Builds the librdkafka client configuration.
    pub fn client_config(broker: &BrokerSettings, capacity: usize) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &broker.bootstrap_servers)
            .set(
                "max.in.flight.requests.per.connection",
                broker.max_in_flight_per_connection.to_string(),
            )
            .set("message.timeout.ms", broker.message_timeout_ms.to_string())
            .set("queue.buffering.max.messages", capacity.to_string());
        config
    }

    /// Creates the producer and checks the bootstrap servers answer a
    /// metadata request for `topic` within the connect timeout.
    pub fn connect(
        broker: &BrokerSettings,
        topic: &str,
        capacity: usize,
        handle: DeliveryHandle,
    ) -> Result<Self, PipelineError> {
        let producer: BaseProducer<FeedContext> = Self::client_config(broker, capacity)
            .create_with_context(FeedContext { handle })
            .map_err(|e| PipelineError::ProducerSetup(e.to_string()))?;

        let timeout = Duration::from_millis(broker.connect_timeout_ms);
        let metadata = producer
            .client()
            .fetch_metadata(Some(topic), timeout)
            .map_err(|e| PipelineError::BrokerUnreachable {
                endpoint: broker.bootstrap_servers.clone(),
                reason: e.to_string(),
            })?;

        for t in metadata.topics() {
            if let Some(err) = t.error() {
                warn!(topic = t.name(), error = ?err, "topic metadata reports an error");
            }
        }

        info!(
            brokers = metadata.brokers().len(),
            endpoint = %broker.bootstrap_servers,
            topic,
            "connected to broker"
        );

        Ok(Self { producer })
    }
}

impl Transport for KafkaTransport {
    fn produce(&self, message: &Message, ticket: InFlight) -> Result<(), ProduceError> {
        let record = BaseRecord::with_opaque_to(message.topic(), Box::new(ticket))
            .key(message.key())
            .payload(message.payload());

        self.producer.send(record).map_err(|(err, _)| match err {
            KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => ProduceError::QueueFull,
            other => ProduceError::Rejected(other.to_string()),
        })
    }

    fn poll(&self, timeout: Duration) {
        self.producer.poll(timeout);
    }
}
