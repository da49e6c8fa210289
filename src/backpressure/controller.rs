use std::time::Duration;

use tracing::{debug, trace};

use crate::delivery::{DeliveryClient, Message, SendError, Transport};
use crate::utils::PipelineError;

/// How a message got through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Times the producer suspended waiting for capacity.
    pub waits: u32,
    /// Times the client answered `BufferFull` and the message was retried.
    pub refusals: u32,
}

/// Capacity-driven pacing for a single producer.
#[derive(Debug, Clone)]
pub struct Backpressure {
    max_in_flight: usize,
    stall_timeout: Duration,
}

impl Backpressure {
    /// Fails when `max_in_flight` is zero: nothing could ever be admitted.
    pub fn new(max_in_flight: usize, stall_timeout: Duration) -> Result<Self, PipelineError> {
        if max_in_flight == 0 {
            return Err(PipelineError::Config(
                "max_in_flight must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_in_flight,
            stall_timeout,
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Sends `message`, suspending while the client is at capacity.
    ///
    /// Never drops the message: a `BufferFull` answer is retried after the
    /// next delivery callback. Returns `AdmissionStalled` if no callback frees
    /// capacity within the stall timeout, and `Rejected` for any other refusal.
    pub async fn admit<T: Transport>(
        &self,
        client: &DeliveryClient<T>,
        mut message: Message,
    ) -> Result<Admission, PipelineError> {
        let state = client.state();
        let mut admission = Admission {
            waits: 0,
            refusals: 0,
        };

        loop {
            if state.in_flight() < self.max_in_flight {
                match client.send(message) {
                    Ok(()) => {
                        trace!(in_flight = state.in_flight(), "admitted");
                        return Ok(admission);
                    }
                    Err(SendError::BufferFull {
                        message: returned,
                        in_flight,
                    }) => {
                        debug!(key = returned.key(), in_flight, "producer queue full, retrying");
                        admission.refusals += 1;
                        message = returned;
                    }
                    Err(SendError::Rejected { key, reason }) => {
                        return Err(PipelineError::Rejected { key, reason });
                    }
                }
            }

            admission.waits += 1;
            trace!(key = message.key(), in_flight = state.in_flight(), "at capacity, waiting");
            if tokio::time::timeout(self.stall_timeout, state.released())
                .await
                .is_err()
            {
                return Err(PipelineError::AdmissionStalled(self.stall_timeout));
            }
        }
    }
}
