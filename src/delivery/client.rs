//! Delivery client and the shared in-flight counter.
//!
//! Concurrency notes:
//! - The producer task is the only caller of [`DeliveryClient::send`], so it is
//!   the only writer of increments on [`QueueState`].
//! - Decrements come from the delivery callback ([`DeliveryHandle::complete`]),
//!   which runs on the poll path. The one exception is a send the producer
//!   refused synchronously, which gives back the slot it just took.
//! - Each callback wakes the producer through a `Notify`, so a producer
//!   waiting for capacity never spins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::delivery::message::{DeliveryReport, InFlight, Message, Outcome};

/// Count of messages enqueued but not yet acknowledged.
#[derive(Debug, Default)]
pub struct QueueState {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    released: Notify,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn decrement(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Gives back a slot taken by a send the producer refused. No wakeup.
    fn refuse(&self) {
        if !self.decrement() {
            error!("in-flight counter underflow on refused send");
        }
    }

    /// Frees a slot after a delivery outcome and wakes a waiting producer.
    fn release(&self) {
        if !self.decrement() {
            error!("in-flight counter underflow on delivery callback");
        }
        self.released.notify_one();
    }

    /// Resolves after the next delivery callback (or immediately if one
    /// fired since the last wait).
    pub async fn released(&self) {
        self.released.notified().await;
    }
}

/// Handle given to a transport; its `complete` is the delivery callback.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    state: Arc<QueueState>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
}

impl DeliveryHandle {
    /// Records the outcome of one accepted message. Must be called exactly
    /// once per ticket.
    pub fn complete(&self, ticket: InFlight, outcome: Outcome) {
        let report = DeliveryReport {
            key: ticket.key,
            outcome,
            latency: ticket.enqueued_at.elapsed(),
        };

        match &report.outcome {
            Outcome::Delivered { partition, offset } => {
                debug!(key = %report.key, partition, offset, latency = ?report.latency, "delivered");
            }
            Outcome::Failed { reason } => {
                warn!(key = %report.key, reason = %reason, "delivery failed");
            }
        }

        self.state.release();

        if self.reports.send(report).is_err() {
            debug!("delivery report dropped, coordinator is gone");
        }
    }
}

/// Synchronous refusal from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceError {
    /// The producer's local queue has no room.
    QueueFull,
    /// Any other immediate refusal (unknown topic, message too large, ...).
    Rejected(String),
}

/// The broker producer behind a [`DeliveryClient`].
///
/// `produce` must not block on the network. An accepted ticket must reach
/// the handle given at construction exactly once, from inside `poll`.
pub trait Transport: Send + Sync + 'static {
    fn produce(&self, message: &Message, ticket: InFlight) -> Result<(), ProduceError>;

    /// Serves pending delivery callbacks, waiting up to `timeout` for one.
    fn poll(&self, timeout: Duration);
}

#[derive(Error, Debug)]
pub enum SendError {
    /// Buffer at capacity; the message is handed back for a later attempt.
    #[error("local producer queue is full ({in_flight} messages awaiting delivery)")]
    BufferFull { message: Message, in_flight: usize },

    #[error("message '{key}' rejected: {reason}")]
    Rejected { key: String, reason: String },
}

/// Buffered, asynchronous sender with bounded in-flight capacity.
pub struct DeliveryClient<T> {
    transport: Arc<T>,
    state: Arc<QueueState>,
    capacity: usize,
}

impl<T: Transport> DeliveryClient<T> {
    /// Wires a transport to a fresh [`QueueState`] and report channel.
    ///
    /// `connect` receives the handle the transport must call for every
    /// delivery outcome. The returned receiver yields the reports.
    pub fn build<E>(
        capacity: usize,
        connect: impl FnOnce(DeliveryHandle) -> Result<T, E>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeliveryReport>), E> {
        let state = Arc::new(QueueState::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DeliveryHandle {
            state: state.clone(),
            reports: tx,
        };
        let transport = connect(handle)?;

        Ok((
            Self {
                transport: Arc::new(transport),
                state,
                capacity,
            },
            rx,
        ))
    }

    /// Enqueues `message` without waiting for the broker.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        let in_flight = self.state.in_flight();
        if in_flight >= self.capacity {
            return Err(SendError::BufferFull { message, in_flight });
        }

        self.state.acquire();
        match self.transport.produce(&message, InFlight::new(message.key())) {
            Ok(()) => Ok(()),
            Err(ProduceError::QueueFull) => {
                self.state.refuse();
                Err(SendError::BufferFull {
                    message,
                    in_flight: self.state.in_flight(),
                })
            }
            Err(ProduceError::Rejected(reason)) => {
                self.state.refuse();
                Err(SendError::Rejected {
                    key: message.key().to_string(),
                    reason,
                })
            }
        }
    }

    /// Drives delivery callbacks on the calling thread.
    pub fn poll(&self, timeout: Duration) {
        self.transport.poll(timeout);
    }

    /// Runs `poll` in a loop on the blocking pool until the poller is stopped.
    pub fn spawn_poller(&self, interval: Duration) -> Poller {
        let stop = Arc::new(AtomicBool::new(false));
        let transport = self.transport.clone();
        let flag = stop.clone();

        let task = tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::Acquire) {
                transport.poll(interval);
            }
            debug!("delivery poller stopped");
        });

        Poller { stop, task }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight()
    }

    pub fn state(&self) -> &Arc<QueueState> {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Background task driving [`Transport::poll`].
pub struct Poller {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Poller {
    pub async fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.task.await {
            error!(err = %e, "delivery poller panicked");
        }
    }
}
