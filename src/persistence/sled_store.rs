use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db};
use thiserror::Error;
use tracing::debug;

use crate::drain::DrainReport;
use crate::source::ReadFailure;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger at {path} could not be opened: {source}")]
    Open {
        path: String,
        #[source]
        source: sled::Error,
    },

    #[error("ledger storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("ledger entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Pending,
}

/// Latest known outcome for one key of a topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub key: String,
    pub status: DeliveryStatus,
    pub reason: Option<String>,
    pub run_id: String,
    /// Unix timestamp in milliseconds.
    pub recorded_at: i64,
}

#[derive(Clone)]
pub struct Ledger {
    db: Db,
}

impl Ledger {
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let db = sled::open(path).map_err(|source| LedgerError::Open {
            path: path.to_string(),
            source,
        })?;
        Ok(Self { db })
    }

    /// Writes one entry per key of the run in a single batch and flushes.
    ///
    /// Unreadable files are stored as failed and files the run never sent as
    /// pending, so a retry picks both up.
    pub fn record_run(
        &self,
        topic: &str,
        run_id: &str,
        drain: &DrainReport,
        read_failures: &[ReadFailure],
        unsent: &[String],
    ) -> Result<usize, LedgerError> {
        let recorded_at = Utc::now().timestamp_millis();
        let entry = |key: &str, status: DeliveryStatus, reason: Option<&str>| LedgerEntry {
            key: key.to_string(),
            status,
            reason: reason.map(str::to_string),
            run_id: run_id.to_string(),
            recorded_at,
        };

        let mut entries: Vec<LedgerEntry> = Vec::new();
        entries.extend(
            drain
                .delivered
                .iter()
                .map(|k| entry(k.as_str(), DeliveryStatus::Delivered, None)),
        );
        entries.extend(
            drain
                .failed
                .iter()
                .map(|f| entry(f.key.as_str(), DeliveryStatus::Failed, Some(f.reason.as_str()))),
        );
        entries.extend(
            drain
                .pending
                .iter()
                .map(|k| entry(k.as_str(), DeliveryStatus::Pending, None)),
        );
        entries.extend(
            read_failures
                .iter()
                .map(|f| entry(f.key.as_str(), DeliveryStatus::Failed, Some(f.reason.as_str()))),
        );
        entries.extend(
            unsent
                .iter()
                .map(|k| entry(k.as_str(), DeliveryStatus::Pending, Some("not sent"))),
        );

        let mut batch = Batch::default();
        for e in &entries {
            batch.insert(e.key.as_bytes(), serde_json::to_vec(e)?);
        }

        let tree = self.db.open_tree(topic)?;
        tree.apply_batch(batch)?;
        tree.flush()?;

        debug!(topic, run_id, entries = entries.len(), "ledger updated");
        Ok(entries.len())
    }

    /// Every entry stored for `topic`, ordered by key.
    pub fn load(&self, topic: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let tree = self.db.open_tree(topic)?;
        tree.iter()
            .values()
            .map(|value| -> Result<LedgerEntry, LedgerError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }

    /// Keys whose latest outcome is failed or pending.
    pub fn retry_keys(&self, topic: &str) -> Result<HashSet<String>, LedgerError> {
        Ok(self
            .load(topic)?
            .into_iter()
            .filter(|e| e.status != DeliveryStatus::Delivered)
            .map(|e| e.key)
            .collect())
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("db", &"sled::Db").finish()
    }
}
