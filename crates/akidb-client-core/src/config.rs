//! Configuration management for the AkiDB client
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - File named by `AKIDB_CLIENT_CONFIG`
//! - `./config/akidb-client` and `/etc/akidb/akidb-client` (any format `config` understands)
//! - `AKIDB_CLIENT__<SECTION>__<KEY>` environment variables

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::query::ConsistencyLevel;
use crate::schema::{SchemaVersion, DEFAULT_MAX_MESSAGE_SIZE};

/// Root configuration consumed by the client engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Load configuration from defaults, optional files and the environment.
    ///
    /// Example override: `AKIDB_CLIENT__BATCH__MAX_BATCH_COUNT=500`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(config_path) = std::env::var("AKIDB_CLIENT_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/akidb-client").required(false))
            .add_source(File::with_name("/etc/akidb/akidb-client").required(false))
            .add_source(Self::environment());

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, still honouring environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ClientConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("AKIDB_CLIENT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("connection.preferred_schema_versions")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.batch.validate()?;
        self.concurrency.validate(self.batch.max_batch_count)?;
        self.retry.validate()?;
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}

/// Endpoint and handshake settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// gRPC endpoint, e.g. `http://127.0.0.1:50051`
    pub grpc_endpoint: String,

    /// REST endpoint used for readiness and metadata fallback
    pub rest_endpoint: Option<String>,

    pub connect_timeout_ms: u64,

    /// Deadline applied to every RPC
    pub request_timeout_ms: u64,

    /// Handshake attempts before giving up with `ConnectionUnavailable`
    pub handshake_attempts: u32,

    pub handshake_backoff_ms: u64,

    /// Schema generations in order of preference
    pub preferred_schema_versions: Vec<SchemaVersion>,

    /// Max message size assumed when the server does not advertise one
    pub max_message_size: usize,

    /// Consecutive failed calls after which the channel is reported unreachable
    pub unreachable_after_failures: u32,

    /// Number of recent calls kept for latency and error statistics
    pub stats_window: usize,

    pub keepalive_interval_secs: u64,

    pub keepalive_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            grpc_endpoint: "http://127.0.0.1:50051".to_string(),
            rest_endpoint: Some("http://127.0.0.1:8080".to_string()),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            handshake_attempts: 3,
            handshake_backoff_ms: 200,
            preferred_schema_versions: SchemaVersion::ALL.to_vec(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            unreachable_after_failures: 3,
            stats_window: 50,
            keepalive_interval_secs: 30,
            keepalive_timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_backoff(&self) -> Duration {
        Duration::from_millis(self.handshake_backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grpc_endpoint.trim().is_empty() {
            return Err(invalid("connection.grpc_endpoint must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("connection.request_timeout_ms must be > 0"));
        }
        if self.handshake_attempts == 0 {
            return Err(invalid("connection.handshake_attempts must be > 0"));
        }
        if self.preferred_schema_versions.is_empty() {
            return Err(invalid(
                "connection.preferred_schema_versions must list at least one version",
            ));
        }
        if self.unreachable_after_failures == 0 {
            return Err(invalid("connection.unreachable_after_failures must be > 0"));
        }
        if self.stats_window == 0 {
            return Err(invalid("connection.stats_window must be > 0"));
        }
        Ok(())
    }
}

/// Batch accumulation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Hard cap on objects per batch
    pub max_batch_count: usize,

    /// Cap on the estimated encoded size of a batch
    pub max_batch_bytes: usize,

    /// An open batch older than this is sealed by the background ticker
    pub max_wait_ms: u64,

    /// Sealed batches that may wait for dispatch before `submit` blocks
    pub queue_capacity: usize,

    /// Collection used for objects that do not name one
    pub default_collection: Option<String>,

    pub consistency_level: Option<ConsistencyLevel>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_count: 100,
            max_batch_bytes: 8 * 1024 * 1024,
            max_wait_ms: 1_000,
            queue_capacity: 64,
            default_collection: None,
            consistency_level: None,
        }
    }
}

impl BatchConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_count == 0 {
            return Err(invalid("batch.max_batch_count must be > 0"));
        }
        if self.max_batch_bytes == 0 {
            return Err(invalid("batch.max_batch_bytes must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("batch.queue_capacity must be > 0"));
        }
        Ok(())
    }
}

/// AIMD tuning for in-flight batches and target batch size
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub initial_max_in_flight: usize,

    /// Upper bound for `max_in_flight`
    pub max_in_flight_cap: usize,

    /// Starting target batch size; `None` starts at `batch.max_batch_count`
    pub initial_batch_size: Option<usize>,

    /// Number of recent calls the error rate is computed over
    pub window_size: usize,

    /// Error rate below which a success grows the budget
    pub low_watermark: f64,

    /// Multiplicative growth of the target batch size
    pub growth_factor: f64,

    /// Successful calls slower than this hold the budget instead of growing it
    pub latency_target_ms: Option<u64>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            initial_max_in_flight: 2,
            max_in_flight_cap: 16,
            initial_batch_size: None,
            window_size: 20,
            low_watermark: 0.05,
            growth_factor: 1.25,
            latency_target_ms: Some(5_000),
        }
    }
}

impl ConcurrencyConfig {
    pub fn latency_target(&self) -> Option<Duration> {
        self.latency_target_ms.map(Duration::from_millis)
    }

    fn validate(&self, max_batch_count: usize) -> Result<(), ConfigError> {
        if self.initial_max_in_flight == 0 {
            return Err(invalid("concurrency.initial_max_in_flight must be > 0"));
        }
        if self.max_in_flight_cap < self.initial_max_in_flight {
            return Err(invalid(
                "concurrency.max_in_flight_cap must be >= initial_max_in_flight",
            ));
        }
        if let Some(size) = self.initial_batch_size {
            if size == 0 || size > max_batch_count {
                return Err(invalid(
                    "concurrency.initial_batch_size must be within 1..=batch.max_batch_count",
                ));
            }
        }
        if self.window_size == 0 {
            return Err(invalid("concurrency.window_size must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.low_watermark) {
            return Err(invalid("concurrency.low_watermark must be within 0.0..=1.0"));
        }
        if self.growth_factor < 1.0 {
            return Err(invalid("concurrency.growth_factor must be >= 1.0"));
        }
        Ok(())
    }
}

/// Retry policy for transient failures
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Dispatch attempts per object, the first one included
    pub max_retries: u32,

    pub base_backoff_ms: u64,

    pub max_backoff_ms: u64,

    /// Jitter added on top of the exponential delay, as a fraction of it
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 10_000,
            jitter_ratio: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(invalid("retry.max_retries must be > 0"));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(invalid("retry.max_backoff_ms must be >= base_backoff_ms"));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(invalid("retry.jitter_ratio must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Log output settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = ClientConfig::default();

        assert_eq!(config.batch.max_batch_count, 100);
        assert_eq!(config.batch.max_batch_bytes, 8 * 1024 * 1024);
        assert_eq!(config.concurrency.initial_max_in_flight, 2);
        assert_eq!(config.concurrency.max_in_flight_cap, 16);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.connection.request_timeout().as_secs(), 30);
        assert_eq!(
            config.connection.preferred_schema_versions,
            vec![
                SchemaVersion::V6,
                SchemaVersion::V52,
                SchemaVersion::V51,
                SchemaVersion::V4
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ClientConfig::default();

        config.batch.max_batch_count = 0;
        assert!(config.validate().is_err());
        config.batch.max_batch_count = 100;

        config.concurrency.max_in_flight_cap = 1;
        assert!(config.validate().is_err());
        config.concurrency.max_in_flight_cap = 16;

        config.concurrency.initial_batch_size = Some(500);
        assert!(config.validate().is_err());
        config.concurrency.initial_batch_size = Some(50);

        config.retry.max_retries = 0;
        assert!(config.validate().is_err());
        config.retry.max_retries = 5;

        config.connection.preferred_schema_versions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[connection]
grpc_endpoint = "http://db.internal:50051"
preferred_schema_versions = ["v52", "v4"]

[batch]
max_batch_count = 250
default_collection = "Articles"

[retry]
max_retries = 5
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connection.grpc_endpoint, "http://db.internal:50051");
        assert_eq!(
            config.connection.preferred_schema_versions,
            vec![SchemaVersion::V52, SchemaVersion::V4]
        );
        assert_eq!(config.batch.max_batch_count, 250);
        assert_eq!(config.batch.default_collection.as_deref(), Some("Articles"));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_backoff_ms, 100);
    }
}
