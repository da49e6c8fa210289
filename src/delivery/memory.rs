//! In-process broker.
//!
//! Accepts every message, keeps the admission order, and resolves deliveries
//! from `poll` once each message's delay has passed. Individual keys can be
//! scripted to fail, to be delivered late, or to never be acknowledged. The
//! `run --dry-run` command uses it with no script.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::delivery::client::{DeliveryHandle, ProduceError, Transport};
use crate::delivery::message::{InFlight, Message, Outcome};

const IDLE_SLEEP: Duration = Duration::from_millis(1);

struct Queued {
    ticket: InFlight,
    due: Instant,
}

#[derive(Default)]
struct Inner {
    queued: VecDeque<Queued>,
    withheld: Vec<InFlight>,
    admitted: Vec<String>,
    delivered: Vec<String>,
    next_offset: i64,
}

pub struct MemoryTransport {
    handle: DeliveryHandle,
    inner: Mutex<Inner>,
    buffer_capacity: Option<usize>,
    failures: HashMap<String, String>,
    rejections: HashMap<String, String>,
    withhold: HashSet<String>,
    delays: HashMap<String, Duration>,
}

impl MemoryTransport {
    pub fn new(handle: DeliveryHandle) -> Self {
        Self {
            handle,
            inner: Mutex::new(Inner::default()),
            buffer_capacity: None,
            failures: HashMap::new(),
            rejections: HashMap::new(),
            withhold: HashSet::new(),
            delays: HashMap::new(),
        }
    }

    /// Refuses new messages with `QueueFull` while this many are queued.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Reports a terminal failure for `key`.
    pub fn fail_key(mut self, key: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(key.into(), reason.into());
        self
    }

    /// Refuses `key` synchronously at `produce` time.
    pub fn reject_key(mut self, key: impl Into<String>, reason: impl Into<String>) -> Self {
        self.rejections.insert(key.into(), reason.into());
        self
    }

    /// Never acknowledges `key` until [`release_withheld`](Self::release_withheld).
    pub fn withhold_key(mut self, key: impl Into<String>) -> Self {
        self.withhold.insert(key.into());
        self
    }

    /// Resolves `key` only after `delay` has passed since it was enqueued.
    pub fn delay_key(mut self, key: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(key.into(), delay);
        self
    }

    /// Keys in the order they were accepted.
    pub fn admitted(&self) -> Vec<String> {
        self.lock().admitted.clone()
    }

    /// Keys acknowledged as delivered, in delivery order.
    pub fn delivered(&self) -> Vec<String> {
        self.lock().delivered.clone()
    }

    /// Makes withheld messages eligible for the next `poll`.
    pub fn release_withheld(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        let released: Vec<InFlight> = inner.withheld.drain(..).collect();
        inner
            .queued
            .extend(released.into_iter().map(|ticket| Queued { ticket, due: now }));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pops every queued message that is due, with its outcome.
    fn take_due(&self, now: Instant) -> Vec<(InFlight, Outcome)> {
        let mut inner = self.lock();
        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(inner.queued.len());

        while let Some(queued) = inner.queued.pop_front() {
            if queued.due > now {
                waiting.push_back(queued);
                continue;
            }
            let outcome = match self.failures.get(&queued.ticket.key) {
                Some(reason) => Outcome::Failed {
                    reason: reason.clone(),
                },
                None => {
                    let offset = inner.next_offset;
                    inner.next_offset += 1;
                    inner.delivered.push(queued.ticket.key.clone());
                    Outcome::Delivered {
                        partition: 0,
                        offset,
                    }
                }
            };
            ready.push((queued.ticket, outcome));
        }

        inner.queued = waiting;
        ready
    }
}

impl Transport for MemoryTransport {
    fn produce(&self, message: &Message, ticket: InFlight) -> Result<(), ProduceError> {
        if let Some(reason) = self.rejections.get(message.key()) {
            return Err(ProduceError::Rejected(reason.clone()));
        }

        let mut inner = self.lock();

        if let Some(capacity) = self.buffer_capacity {
            if inner.queued.len() + inner.withheld.len() >= capacity {
                return Err(ProduceError::QueueFull);
            }
        }

        inner.admitted.push(message.key().to_string());

        if self.withhold.contains(message.key()) {
            inner.withheld.push(ticket);
        } else {
            let delay = self.delays.get(message.key()).copied().unwrap_or_default();
            let due = ticket.enqueued_at + delay;
            inner.queued.push_back(Queued { ticket, due });
        }
        Ok(())
    }

    fn poll(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let ready = self.take_due(now);
            if !ready.is_empty() {
                // Callbacks run outside the lock.
                for (ticket, outcome) in ready {
                    self.handle.complete(ticket, outcome);
                }
                return;
            }
            if now >= deadline {
                return;
            }
            std::thread::sleep(IDLE_SLEEP.min(deadline - now));
        }
    }
}
