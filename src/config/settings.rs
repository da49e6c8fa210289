use serde::Deserialize;

/// Top-level configuration for a feed run.
///
/// Groups the broker connection, the pipeline tuning knobs, the delivery
/// ledger, the filesystem sink used by `upload`, and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub pipeline: PipelineSettings,
    pub ledger: LedgerSettings,
    pub sink: SinkSettings,
    pub log: LogSettings,
}

/// Broker connection settings.
///
/// `max_in_flight_per_connection = 1` forces strict per-connection ordering
/// at the cost of throughput.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub bootstrap_servers: String,
    pub max_in_flight_per_connection: usize,
    pub message_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Upper bound of each producer poll; callbacks are served in between.
    pub poll_interval_ms: u64,
}

/// Settings for the enumerate → admit → drain run.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PipelineSettings {
    pub source_dir: String,
    pub topic: String,
    pub max_in_flight: usize,
    pub drain_timeout_secs: u64,
    pub interrupt_drain_timeout_secs: u64,
    pub stall_timeout_secs: u64,
    /// Lowercase file extensions to keep; empty keeps every regular file.
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerSettings {
    pub enabled: bool,
    pub path: String,
}

/// Mount point of the distributed filesystem used by `upload`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SinkSettings {
    pub mount_root: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial settings as read from files or the environment.
///
/// Every field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub pipeline: Option<PartialPipelineSettings>,
    pub ledger: Option<PartialLedgerSettings>,
    pub sink: Option<PartialSinkSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub bootstrap_servers: Option<String>,
    pub max_in_flight_per_connection: Option<usize>,
    pub message_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPipelineSettings {
    pub source_dir: Option<String>,
    pub topic: Option<String>,
    pub max_in_flight: Option<usize>,
    pub drain_timeout_secs: Option<u64>,
    pub interrupt_drain_timeout_secs: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    pub extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLedgerSettings {
    pub enabled: Option<bool>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSinkSettings {
    pub mount_root: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                bootstrap_servers: "127.0.0.1:9092".to_string(),
                max_in_flight_per_connection: 1,
                message_timeout_ms: 30_000,
                connect_timeout_ms: 5_000,
                poll_interval_ms: 100,
            },
            pipeline: PipelineSettings {
                source_dir: "images".to_string(),
                topic: "imgtest".to_string(),
                max_in_flight: 16,
                drain_timeout_secs: 10,
                interrupt_drain_timeout_secs: 2,
                stall_timeout_secs: 60,
                extensions: Vec::new(),
            },
            ledger: LedgerSettings {
                enabled: true,
                path: "imgfeed_ledger".to_string(),
            },
            sink: SinkSettings {
                mount_root: "/mnt/hdfs".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every missing value of `partial` from the defaults.
    pub fn merged(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.unwrap_or_default();
        let pipeline = partial.pipeline.unwrap_or_default();
        let ledger = partial.ledger.unwrap_or_default();
        let sink = partial.sink.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Self {
            broker: BrokerSettings {
                bootstrap_servers: broker
                    .bootstrap_servers
                    .unwrap_or(default.broker.bootstrap_servers),
                max_in_flight_per_connection: broker
                    .max_in_flight_per_connection
                    .unwrap_or(default.broker.max_in_flight_per_connection),
                message_timeout_ms: broker
                    .message_timeout_ms
                    .unwrap_or(default.broker.message_timeout_ms),
                connect_timeout_ms: broker
                    .connect_timeout_ms
                    .unwrap_or(default.broker.connect_timeout_ms),
                poll_interval_ms: broker
                    .poll_interval_ms
                    .unwrap_or(default.broker.poll_interval_ms),
            },
            pipeline: PipelineSettings {
                source_dir: pipeline.source_dir.unwrap_or(default.pipeline.source_dir),
                topic: pipeline.topic.unwrap_or(default.pipeline.topic),
                max_in_flight: pipeline
                    .max_in_flight
                    .unwrap_or(default.pipeline.max_in_flight),
                drain_timeout_secs: pipeline
                    .drain_timeout_secs
                    .unwrap_or(default.pipeline.drain_timeout_secs),
                interrupt_drain_timeout_secs: pipeline
                    .interrupt_drain_timeout_secs
                    .unwrap_or(default.pipeline.interrupt_drain_timeout_secs),
                stall_timeout_secs: pipeline
                    .stall_timeout_secs
                    .unwrap_or(default.pipeline.stall_timeout_secs),
                extensions: pipeline
                    .extensions
                    .unwrap_or(default.pipeline.extensions),
            },
            ledger: LedgerSettings {
                enabled: ledger.enabled.unwrap_or(default.ledger.enabled),
                path: ledger.path.unwrap_or(default.ledger.path),
            },
            sink: SinkSettings {
                mount_root: sink.mount_root.unwrap_or(default.sink.mount_root),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}
