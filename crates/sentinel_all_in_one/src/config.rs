use anyhow::{ensure, Context};
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storage_worker::domain::{FlushPolicy, StorageFailurePolicy, StorageRetry};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Telemetry
    #[serde(default)]
    pub otel_enabled: bool,

    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // HTTP
    #[serde(default = "default_http_bind_addr")]
    pub http_bind_addr: String,

    /// Comma-separated origins, `*` for any
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,

    /// Rows returned by GET /events when no limit is given
    #[serde(default = "default_events_default_limit")]
    pub events_default_limit: u32,

    // NATS
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding security events
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,

    /// Fixed at stream creation; changing it reroutes hosts
    #[serde(default = "default_nats_partitions")]
    pub nats_partitions: u32,

    #[serde(default = "default_nats_consumer_group")]
    pub nats_consumer_group: String,

    /// Comma-separated partitions this instance consumes; empty for all
    #[serde(default)]
    pub nats_assigned_partitions: String,

    /// Max messages per fetch
    #[serde(default = "default_nats_fetch_batch")]
    pub nats_fetch_batch: usize,

    #[serde(default = "default_nats_fetch_wait_ms")]
    pub nats_fetch_wait_ms: u64,

    /// Redelivery delay for messages the worker never settled
    #[serde(default = "default_nats_ack_wait_secs")]
    pub nats_ack_wait_secs: u64,

    #[serde(default = "default_publish_ack_timeout_ms")]
    pub publish_ack_timeout_ms: u64,

    /// Startup timeout for connection and setup operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Stream for discarded messages; empty disables dead-lettering
    #[serde(default)]
    pub dead_letter_stream: String,

    // ClickHouse
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default)]
    pub clickhouse_password: String,

    #[serde(default = "default_clickhouse_table")]
    pub clickhouse_table: String,

    // Batching and storage failures
    /// 0 or 1 writes every event on its own
    #[serde(default = "default_batch_max_events")]
    pub batch_max_events: usize,

    #[serde(default = "default_batch_max_wait_ms")]
    pub batch_max_wait_ms: u64,

    /// `drop` or `redeliver`
    #[serde(default = "default_storage_failure_policy")]
    pub storage_failure_policy: String,

    #[serde(default = "default_storage_max_attempts")]
    pub storage_max_attempts: u32,

    #[serde(default = "default_storage_retry_backoff_ms")]
    pub storage_retry_backoff_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "sentinel".to_string()
}

fn default_http_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_allowed_origins() -> String {
    "http://localhost:3000".to_string()
}

fn default_events_default_limit() -> u32 {
    20
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "security_events".to_string()
}

fn default_nats_partitions() -> u32 {
    8
}

fn default_nats_consumer_group() -> String {
    "sentinel-storage-group".to_string()
}

fn default_nats_fetch_batch() -> usize {
    100
}

fn default_nats_fetch_wait_ms() -> u64 {
    1000
}

fn default_nats_ack_wait_secs() -> u64 {
    30
}

fn default_publish_ack_timeout_ms() -> u64 {
    5000
}

fn default_startup_timeout_secs() -> u64 {
    10
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "default".to_string()
}

fn default_clickhouse_username() -> String {
    "default".to_string()
}

fn default_clickhouse_table() -> String {
    "security_events".to_string()
}

fn default_batch_max_events() -> usize {
    1
}

fn default_batch_max_wait_ms() -> u64 {
    1000
}

fn default_storage_failure_policy() -> String {
    "drop".to_string()
}

fn default_storage_max_attempts() -> u32 {
    1
}

fn default_storage_retry_backoff_ms() -> u64 {
    500
}

impl ServiceConfig {
    /// Load from `SENTINEL_*` environment variables and validate
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("SENTINEL"))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.nats_partitions > 0, "nats_partitions must be at least 1");
        ensure!(self.nats_fetch_batch > 0, "nats_fetch_batch must be at least 1");
        ensure!(
            self.storage_max_attempts > 0,
            "storage_max_attempts must be at least 1"
        );
        self.storage_failure_policy()?;

        for partition in self.assigned_partitions()? {
            ensure!(
                partition < self.nats_partitions,
                "assigned partition {} is outside 0..{}",
                partition,
                self.nats_partitions
            );
        }

        if let Some(dead_letter) = self.dead_letter_stream() {
            let stream = self.nats_stream.trim();
            // The event stream captures `{stream}.>`; dead letters there would be consumed again
            ensure!(
                dead_letter != stream && !dead_letter.starts_with(&format!("{}.", stream)),
                "dead_letter_stream '{}' overlaps nats_stream '{}'",
                dead_letter,
                stream
            );
        }

        let ack_wait = Duration::from_secs(self.nats_ack_wait_secs);
        let unsettled = self.max_unsettled_time();
        ensure!(
            unsettled < ack_wait,
            "nats_ack_wait_secs ({}s) must exceed batch_max_wait_ms plus storage retry backoff ({}ms)",
            self.nats_ack_wait_secs,
            unsettled.as_millis()
        );
        Ok(())
    }

    /// Longest a delivered message can wait in the batch and in storage retries before it is settled
    fn max_unsettled_time(&self) -> Duration {
        let batch_wait = match self.flush_policy() {
            FlushPolicy::PerEvent => Duration::ZERO,
            FlushPolicy::Threshold { max_wait, .. } => max_wait,
        };
        batch_wait + self.storage_retry().worst_case_backoff()
    }

    pub fn assigned_partitions(&self) -> anyhow::Result<Vec<u32>> {
        self.nats_assigned_partitions
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>()
                    .with_context(|| format!("invalid partition number '{}'", s))
            })
            .collect()
    }

    pub fn storage_failure_policy(&self) -> anyhow::Result<StorageFailurePolicy> {
        self.storage_failure_policy.parse()
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::from_settings(self.batch_max_events, self.batch_max_wait_ms)
    }

    pub fn storage_retry(&self) -> StorageRetry {
        StorageRetry {
            max_attempts: self.storage_max_attempts,
            backoff: Duration::from_millis(self.storage_retry_backoff_ms),
        }
    }

    pub fn dead_letter_stream(&self) -> Option<String> {
        let stream = self.dead_letter_stream.trim();
        (!stream.is_empty()).then(|| stream.to_string())
    }
}
