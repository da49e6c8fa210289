//! CLI for imgfeed
//!
//! Subcommands:
//! - `run`: publish every file of the source directory, then drain
//! - `retry`: re-send the keys the ledger holds as failed or pending
//! - `upload`: copy one local file into the mounted remote filesystem

use clap::{Args, Parser};
use imgfeed::config::{Settings, load_config};
use imgfeed::delivery::kafka::KafkaTransport;
use imgfeed::delivery::memory::MemoryTransport;
use imgfeed::persistence::Ledger;
use imgfeed::pipeline::{EXIT_FAILURES, EXIT_OK, EXIT_SETUP, exit_code, feed};
use imgfeed::sink::{MountedSink, RemoteSink, timestamped_remote_path};
use imgfeed::utils::{PipelineError, logging};
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "imgfeed")]
enum Command {
    /// Publish every file of the source directory to the topic
    Run(RunArgs),
    /// Re-send keys recorded as failed or pending by earlier runs
    Retry(RunArgs),
    /// Copy a local file into the remote directory under a timestamped name
    Upload {
        /// Local file to copy
        #[arg(long)]
        file: PathBuf,
        /// Directory under the sink mount root
        #[arg(long)]
        remote_dir: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding the files to publish
    #[arg(long)]
    source_dir: Option<String>,
    /// Destination topic
    #[arg(long)]
    topic: Option<String>,
    /// Bootstrap servers, e.g. 127.0.0.1:9092
    #[arg(long)]
    broker: Option<String>,
    /// Upper bound on messages awaiting a delivery report
    #[arg(long)]
    max_in_flight: Option<usize>,
    /// Seconds to wait for outstanding reports at the end of the run
    #[arg(long)]
    drain_timeout: Option<u64>,
    /// Publish to an in-process broker instead of Kafka
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.source_dir {
            settings.pipeline.source_dir = dir.clone();
        }
        if let Some(topic) = &self.topic {
            settings.pipeline.topic = topic.clone();
        }
        if let Some(broker) = &self.broker {
            settings.broker.bootstrap_servers = broker.clone();
        }
        if let Some(n) = self.max_in_flight {
            settings.pipeline.max_in_flight = n;
        }
        if let Some(secs) = self.drain_timeout {
            settings.pipeline.drain_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::from(EXIT_SETUP);
        }
    };
    logging::init(&settings.log.level);

    let code = match cmd {
        Command::Run(args) => run_feed(settings, args, false).await,
        Command::Retry(args) => run_feed(settings, args, true).await,
        Command::Upload {
            file,
            remote_dir,
            yes,
        } => upload(&settings, file, &remote_dir, yes).await,
    };
    ExitCode::from(code)
}

async fn run_feed(mut settings: Settings, args: RunArgs, retry: bool) -> u8 {
    args.apply(&mut settings);

    let ledger = if settings.ledger.enabled {
        match Ledger::open(&settings.ledger.path) {
            Ok(ledger) => Some(ledger),
            Err(e) => {
                error!("Failed to open ledger: {}", e);
                return EXIT_SETUP;
            }
        }
    } else {
        None
    };

    let only: Option<HashSet<String>> = if retry {
        let Some(ledger) = &ledger else {
            error!("retry needs the ledger; set ledger.enabled = true");
            return EXIT_SETUP;
        };
        match ledger.retry_keys(&settings.pipeline.topic) {
            Ok(keys) if keys.is_empty() => {
                info!(topic = %settings.pipeline.topic, "nothing to retry");
                return EXIT_OK;
            }
            Ok(keys) => Some(keys),
            Err(e) => {
                error!("Failed to read ledger: {}", e);
                return EXIT_SETUP;
            }
        }
    } else {
        None
    };

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Could not listen for Ctrl-C; runs cannot be interrupted");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received.");
    };

    let result = if args.dry_run {
        feed(
            &settings,
            only.as_ref(),
            |handle| Ok(MemoryTransport::new(handle)),
            ledger,
            shutdown,
        )
        .await
    } else {
        let broker = settings.broker.clone();
        let topic = settings.pipeline.topic.clone();
        let capacity = settings.pipeline.max_in_flight;
        feed(
            &settings,
            only.as_ref(),
            |handle| KafkaTransport::connect(&broker, &topic, capacity, handle),
            ledger,
            shutdown,
        )
        .await
    };

    match &result {
        Ok(report) => print!("{report}"),
        Err(e) => error!("Run failed: {}", e),
    }
    exit_code(&result)
}

async fn upload(settings: &Settings, file: PathBuf, remote_dir: &str, yes: bool) -> u8 {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string();
    let remote = timestamped_remote_path(
        remote_dir,
        chrono::Local::now().naive_local(),
        &extension,
    );

    if !yes {
        let prompt = format!("Copying {} to {}\n", file.display(), remote);
        if let Err(e) = confirm(&prompt, io::stdin().lock(), io::stdout()) {
            error!("Confirmation prompt failed: {}", e);
            return EXIT_FAILURES;
        }
    }

    let sink = MountedSink::new(&settings.sink.mount_root);
    match sink.copy_from_local(&file, &remote).await {
        Ok(bytes) => {
            println!("copied {bytes} bytes to {remote}");
            EXIT_OK
        }
        Err(e) => {
            let e = PipelineError::from(e);
            error!("Upload failed: {}", e);
            if e.is_setup() { EXIT_SETUP } else { EXIT_FAILURES }
        }
    }
}

/// Writes `prompt` and waits for one line of input.
fn confirm(prompt: &str, mut input: impl BufRead, mut output: impl Write) -> io::Result<()> {
    write!(output, "{prompt}Press Enter to continue")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(())
}
