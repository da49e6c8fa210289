use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::backpressure::Backpressure;
use crate::config::{PipelineSettings, Settings};
use crate::delivery::{DeliveryClient, DeliveryHandle, DeliveryReport, Message, Transport};
use crate::drain::{DrainCoordinator, DrainReport};
use crate::persistence::Ledger;
use crate::pipeline::state::{RunPhase, RunState};
use crate::source::{ReadFailure, SourceDir};
use crate::utils::PipelineError;

/// Every file was delivered.
pub const EXIT_OK: u8 = 0;
/// The run finished but something was not delivered.
pub const EXIT_FAILURES: u8 = 1;
/// The run could not start.
pub const EXIT_SETUP: u8 = 2;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub topic: String,
    pub max_in_flight: usize,
    pub drain_timeout: Duration,
    /// Shorter drain budget used after an interrupt.
    pub interrupt_drain_timeout: Duration,
    pub stall_timeout: Duration,
    pub poll_interval: Duration,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let p = &settings.pipeline;
        Self {
            topic: p.topic.clone(),
            max_in_flight: p.max_in_flight,
            drain_timeout: Duration::from_secs(p.drain_timeout_secs),
            interrupt_drain_timeout: Duration::from_secs(p.interrupt_drain_timeout_secs),
            stall_timeout: Duration::from_secs(p.stall_timeout_secs),
            poll_interval: Duration::from_millis(settings.broker.poll_interval_ms),
        }
    }
}

/// Final summary of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub topic: String,
    pub phase: RunPhase,
    pub drain: DrainReport,
    pub read_failures: Vec<ReadFailure>,
    /// Keys never handed to the producer because the run stopped early,
    /// in source order.
    pub unsent: Vec<String>,
    pub interrupted: bool,
    pub aborted: Option<String>,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        match self.phase {
            RunPhase::Completed => EXIT_OK,
            _ => EXIT_FAILURES,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} on topic '{}' finished {:?} in {:.1?}",
            self.run_id, self.topic, self.phase, self.elapsed
        )?;
        writeln!(f, "  delivered:  {}", self.drain.delivered_count())?;
        writeln!(f, "  failed:     {}", self.drain.failed_count())?;
        writeln!(f, "  pending:    {}", self.drain.pending_count())?;
        writeln!(f, "  unreadable: {}", self.read_failures.len())?;
        if !self.unsent.is_empty() {
            writeln!(f, "  not sent:   {}", self.unsent.len())?;
        }
        for item in &self.drain.failed {
            writeln!(f, "  failed     {}: {}", item.key, item.reason)?;
        }
        for key in &self.drain.pending {
            writeln!(f, "  pending    {key}")?;
        }
        for failure in &self.read_failures {
            writeln!(f, "  unreadable {}: {}", failure.key, failure.reason)?;
        }
        for key in &self.unsent {
            writeln!(f, "  not sent   {key}")?;
        }
        if self.interrupted {
            writeln!(f, "  interrupted before the source was exhausted")?;
        }
        if let Some(reason) = &self.aborted {
            writeln!(f, "  aborted: {reason}")?;
        }
        Ok(())
    }
}

/// What happened while enumerating and admitting.
#[derive(Default)]
struct Feed {
    attempted: usize,
    read_failures: Vec<ReadFailure>,
    /// Key whose admission failed; counted in `attempted` but never sent.
    dropped: Option<String>,
    interrupted: bool,
    aborted: Option<PipelineError>,
}

/// One enumerate → admit → drain run over a delivery client.
pub struct Pipeline<T> {
    client: DeliveryClient<T>,
    coordinator: DrainCoordinator,
    gate: Backpressure,
    options: RunOptions,
    state: RunState,
    ledger: Option<Ledger>,
    run_id: String,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(
        client: DeliveryClient<T>,
        reports: UnboundedReceiver<DeliveryReport>,
        options: RunOptions,
    ) -> Result<Self, PipelineError> {
        let gate = Backpressure::new(options.max_in_flight, options.stall_timeout)?;
        Ok(Self {
            client,
            coordinator: DrainCoordinator::new(reports),
            gate,
            options,
            state: RunState::new(),
            ledger: None,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    /// Records the outcome of every key in `ledger` once the run has drained.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn client(&self) -> &DeliveryClient<T> {
        &self.client
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Publishes every file of `source`, then drains.
    ///
    /// When `shutdown` resolves the run stops admitting and drains with the
    /// interrupt timeout. Resolving during a normal drain cuts it down to the
    /// interrupt timeout as well.
    pub async fn run(
        &mut self,
        source: &SourceDir,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunReport, PipelineError> {
        let span = info_span!("run", run_id = %self.run_id, topic = %self.options.topic);
        self.run_inner(source, shutdown).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        source: &SourceDir,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        self.state.advance(RunPhase::Enumerating)?;
        info!(
            source = %source.root().display(),
            files = source.len(),
            max_in_flight = self.gate.max_in_flight(),
            "run starting"
        );

        tokio::pin!(shutdown);
        let poller = self.client.spawn_poller(self.options.poll_interval);
        let mut feed = self.admit_all(source, shutdown.as_mut()).await;

        // Entered unconditionally; the poller keeps serving callbacks until drained.
        let entered = self.state.advance(RunPhase::Draining);
        let drain = if feed.interrupted {
            self.coordinator
                .drain(self.options.interrupt_drain_timeout)
                .await
        } else {
            let finished = tokio::select! {
                biased;
                drain = self.coordinator.drain(self.options.drain_timeout) => Some(drain),
                _ = shutdown.as_mut() => None,
            };
            match finished {
                Some(drain) => drain,
                None => {
                    warn!("interrupt received while draining");
                    feed.interrupted = true;
                    self.coordinator
                        .drain(self.options.interrupt_drain_timeout)
                        .await
                }
            }
        };
        poller.stop().await;
        entered?;

        let unsent: Vec<String> = feed
            .dropped
            .take()
            .into_iter()
            .chain(source.keys().skip(feed.attempted).map(str::to_string))
            .collect();

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record_run(
                &self.options.topic,
                &self.run_id,
                &drain,
                &feed.read_failures,
                &unsent,
            ) {
                error!(err = %e, "failed to record run in ledger");
            }
        }

        let clean = drain.is_clean()
            && feed.read_failures.is_empty()
            && feed.aborted.is_none()
            && !feed.interrupted
            && unsent.is_empty();
        let terminal = if clean {
            RunPhase::Completed
        } else {
            RunPhase::CompletedWithFailures
        };
        self.state.advance(terminal)?;

        let report = RunReport {
            run_id: self.run_id.clone(),
            topic: self.options.topic.clone(),
            phase: terminal,
            drain,
            read_failures: feed.read_failures,
            unsent,
            interrupted: feed.interrupted,
            aborted: feed.aborted.map(|e| e.to_string()),
            peak_in_flight: self.client.state().peak(),
            elapsed: started.elapsed(),
        };
        info!(
            phase = ?report.phase,
            delivered = report.drain.delivered_count(),
            failed = report.drain.failed_count(),
            pending = report.drain.pending_count(),
            unreadable = report.read_failures.len(),
            unsent = report.unsent.len(),
            "run finished"
        );
        Ok(report)
    }

    async fn admit_all<S>(&mut self, source: &SourceDir, mut shutdown: Pin<&mut S>) -> Feed
    where
        S: Future<Output = ()>,
    {
        let mut feed = Feed::default();
        let files = source.stream();
        tokio::pin!(files);

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    feed.interrupted = true;
                    break;
                }
                next = files.next() => next,
            };

            let file = match next {
                None => break,
                Some(Ok(file)) => file,
                Some(Err(failure)) => {
                    feed.attempted += 1;
                    feed.read_failures.push(failure);
                    continue;
                }
            };
            feed.attempted += 1;

            if self.state.phase() == RunPhase::Enumerating {
                if let Err(e) = self.state.advance(RunPhase::Admitting) {
                    feed.aborted = Some(e);
                    break;
                }
            }

            let key = file.key;
            let message = Message::new(self.options.topic.clone(), key.clone(), file.payload);

            // A pending admission has not enqueued anything, so dropping it is safe.
            let admitted = tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    feed.attempted -= 1;
                    feed.interrupted = true;
                    break;
                }
                admitted = self.gate.admit(&self.client, message) => admitted,
            };

            match admitted {
                Ok(admission) => {
                    debug!(key = %key, waits = admission.waits, refusals = admission.refusals, "admitted");
                    self.coordinator.track(key);
                    self.coordinator.absorb_ready();
                }
                Err(PipelineError::Rejected { key, reason }) => {
                    warn!(key = %key, reason = %reason, "producer rejected message");
                    self.coordinator.record_rejected(key, reason);
                }
                Err(e) => {
                    error!(key = %key, err = %e, "admission failed, draining what was sent");
                    feed.dropped = Some(key);
                    feed.aborted = Some(e);
                    break;
                }
            }
        }

        if feed.interrupted {
            warn!(attempted = feed.attempted, "interrupt received, draining");
        }
        feed
    }
}

/// Opens the configured source directory, optionally restricted to `only`.
pub async fn open_source(
    settings: &PipelineSettings,
    only: Option<&HashSet<String>>,
) -> Result<SourceDir, PipelineError> {
    let mut source = SourceDir::open(&settings.source_dir)
        .await?
        .with_extensions(&settings.extensions);
    if let Some(keys) = only {
        source = source.retain_keys(keys);
    }
    Ok(source)
}

/// Validates `settings`, opens the source, connects the transport and runs.
///
/// Everything before the run itself is a setup step: its errors are returned
/// before any message is handed to the producer.
pub async fn feed<T, F>(
    settings: &Settings,
    only: Option<&HashSet<String>>,
    connect: F,
    ledger: Option<Ledger>,
    shutdown: impl Future<Output = ()>,
) -> Result<RunReport, PipelineError>
where
    T: Transport,
    F: FnOnce(DeliveryHandle) -> Result<T, PipelineError>,
{
    settings.validate()?;
    let source = open_source(&settings.pipeline, only).await?;
    let options = RunOptions::from_settings(settings);

    let (client, reports) = DeliveryClient::build(options.max_in_flight, connect)?;
    let mut pipeline = Pipeline::new(client, reports, options)?;
    if let Some(ledger) = ledger {
        pipeline = pipeline.with_ledger(ledger);
    }
    pipeline.run(&source, shutdown).await
}

/// Maps a run result onto the process exit code.
pub fn exit_code(result: &Result<RunReport, PipelineError>) -> u8 {
    match result {
        Ok(report) => report.exit_code(),
        Err(e) if e.is_setup() => EXIT_SETUP,
        Err(_) => EXIT_FAILURES,
    }
}
