//! Crate-wide error type.
//!
//! Each stage owns a narrow error enum (`SourceError`, `SendError`,
//! `LedgerError`, `SinkError`); everything that can end a run folds into
//! [`PipelineError`] at the stage boundary. The CLI uses
//! [`PipelineError::is_setup`] to tell fatal setup failures (exit code 2)
//! apart from failures that happen once messages are flowing.

use std::time::Duration;

use thiserror::Error;

use crate::persistence::LedgerError;
use crate::pipeline::RunPhase;
use crate::sink::SinkError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Settings failed validation (zero capacity, empty topic, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadConfig(#[from] config::ConfigError),

    /// The producer could not be created from the broker settings.
    #[error("producer setup failed: {0}")]
    ProducerSetup(String),

    /// Metadata could not be fetched from the bootstrap servers in time.
    #[error("broker unreachable at {endpoint}: {reason}")]
    BrokerUnreachable { endpoint: String, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The producer refused a message for a reason other than a full buffer.
    #[error("message '{key}' rejected by producer: {reason}")]
    Rejected { key: String, reason: String },

    /// At capacity and no delivery outcome arrived to free a slot.
    #[error("admission stalled: no delivery completed within {0:?} while at capacity")]
    AdmissionStalled(Duration),

    #[error("invalid run transition from {from:?} to {to:?}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

impl PipelineError {
    /// Returns true for errors that abort a run before any message is sent.
    pub fn is_setup(&self) -> bool {
        match self {
            PipelineError::Config(_)
            | PipelineError::LoadConfig(_)
            | PipelineError::ProducerSetup(_)
            | PipelineError::BrokerUnreachable { .. }
            | PipelineError::Ledger(_)
            | PipelineError::Sink(_) => true,
            PipelineError::Source(e) => e.is_setup(),
            PipelineError::Rejected { .. }
            | PipelineError::AdmissionStalled(_)
            | PipelineError::InvalidTransition { .. } => false,
        }
    }
}
