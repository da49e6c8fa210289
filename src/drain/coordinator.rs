use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::delivery::{DeliveryReport, Outcome};

/// A key whose delivery ended in a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub key: String,
    pub reason: String,
}

/// Delivery outcomes known when a drain returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: Vec<String>,
    pub failed: Vec<FailedItem>,
    /// Keys with no outcome yet, sorted.
    pub pending: Vec<String>,
}

impl DrainReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True when every tracked key was delivered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }
}

pub struct DrainCoordinator {
    reports: UnboundedReceiver<DeliveryReport>,
    outstanding: HashSet<String>,
    delivered: Vec<String>,
    failed: Vec<FailedItem>,
}

impl DrainCoordinator {
    pub fn new(reports: UnboundedReceiver<DeliveryReport>) -> Self {
        Self {
            reports,
            outstanding: HashSet::new(),
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Registers an admitted key; it stays pending until its report arrives.
    pub fn track(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.outstanding.insert(key.clone()) {
            warn!(key = %key, "key admitted twice while still in flight");
        }
    }

    /// Records a message the producer refused outright; it was never in flight.
    pub fn record_rejected(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedItem {
            key: key.into(),
            reason: reason.into(),
        });
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Consumes every report already queued, without waiting.
    pub fn absorb_ready(&mut self) -> usize {
        let mut absorbed = 0;
        while let Ok(report) = self.reports.try_recv() {
            self.absorb(report);
            absorbed += 1;
        }
        absorbed
    }

    fn absorb(&mut self, report: DeliveryReport) {
        if !self.outstanding.remove(&report.key) {
            warn!(key = %report.key, "delivery report for an untracked key");
        }
        match report.outcome {
            Outcome::Delivered { .. } => self.delivered.push(report.key),
            Outcome::Failed { reason } => self.failed.push(FailedItem {
                key: report.key,
                reason,
            }),
        }
    }

    /// Waits until every tracked key has an outcome or `timeout` elapses.
    ///
    /// Calling it again after a complete drain returns at once.
    pub async fn drain(&mut self, timeout: Duration) -> DrainReport {
        let deadline = Instant::now() + timeout;
        self.absorb_ready();

        if !self.outstanding.is_empty() {
            debug!(outstanding = self.outstanding.len(), ?timeout, "draining");
        }

        while !self.outstanding.is_empty() {
            match timeout_at(deadline, self.reports.recv()).await {
                Ok(Some(report)) => self.absorb(report),
                Ok(None) => {
                    warn!(
                        outstanding = self.outstanding.len(),
                        "delivery channel closed while draining"
                    );
                    break;
                }
                Err(_) => {
                    warn!(
                        pending = self.outstanding.len(),
                        ?timeout,
                        "drain timed out with deliveries outstanding"
                    );
                    break;
                }
            }
        }

        let report = self.snapshot();
        info!(
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            pending = report.pending_count(),
            "drain finished"
        );
        report
    }

    /// Outcomes known so far.
    pub fn snapshot(&self) -> DrainReport {
        let mut pending: Vec<String> = self.outstanding.iter().cloned().collect();
        pending.sort();
        DrainReport {
            delivered: self.delivered.clone(),
            failed: self.failed.clone(),
            pending,
        }
    }
}
