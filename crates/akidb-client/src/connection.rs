//! Connection Manager: handshake, schema negotiation and the shared
//! per-connection state every dispatch reads and updates.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use akidb_client_core::{
    ClientConfig, ClientError, ClientResult, ConcurrencyConfig, ConnectionConfig, SchemaVersion,
    ServerInfo, TransportError, TransportErrorKind,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{CodecRegistry, WireCodec};
use crate::concurrency::{Adjustment, AdaptiveController, AttemptResult, ConcurrencyBudget};
use crate::metrics;
use crate::retry::is_transient;
use crate::transport::{Credentials, GrpcTransport, RpcCall, RpcMethod, SharedTransport, Transport};

/// Channel health as seen from recent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    Reachable,
    Degraded,
    Unreachable,
}

impl ChannelHealth {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachable => "reachable",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Reachable => 0,
            Self::Degraded => 1,
            Self::Unreachable => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Reachable,
            1 => Self::Degraded,
            _ => Self::Unreachable,
        }
    }
}

impl fmt::Display for ChannelHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that say the channel itself is not working.
fn is_channel_failure(kind: TransportErrorKind) -> bool {
    matches!(
        kind,
        TransportErrorKind::Unavailable
            | TransportErrorKind::DeadlineExceeded
            | TransportErrorKind::Unauthenticated
    )
}

#[derive(Debug, Clone, Copy)]
struct CallSample {
    latency: Duration,
    /// Transient failure, i.e. a load signal.
    load_error: bool,
}

/// Point-in-time view of [`ConnectionState`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub schema_version: SchemaVersion,
    pub health: ChannelHealth,
    pub calls: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub error_rate: f64,
    pub mean_latency: Option<Duration>,
}

/// Health, negotiated version and rolling call statistics of one connection.
#[derive(Debug)]
pub struct ConnectionState {
    schema_version: SchemaVersion,
    health: AtomicU8,
    consecutive_failures: AtomicU32,
    unreachable_after: u32,
    calls: AtomicU64,
    failures: AtomicU64,
    window: Mutex<VecDeque<CallSample>>,
    window_capacity: usize,
}

impl ConnectionState {
    #[must_use]
    pub fn new(
        schema_version: SchemaVersion,
        window_capacity: usize,
        unreachable_after: u32,
    ) -> Self {
        let window_capacity = window_capacity.max(1);
        Self {
            schema_version,
            health: AtomicU8::new(ChannelHealth::Reachable.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            unreachable_after: unreachable_after.max(1),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(window_capacity)),
            window_capacity,
        }
    }

    #[must_use]
    pub fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    #[must_use]
    pub fn health(&self) -> ChannelHealth {
        ChannelHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    /// Records one call and returns the resulting health.
    pub fn record(
        &self,
        latency: Duration,
        outcome: Result<(), TransportErrorKind>,
    ) -> ChannelHealth {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut window = self.window.lock();
            if window.len() == self.window_capacity {
                window.pop_front();
            }
            window.push_back(CallSample {
                latency,
                load_error: matches!(outcome, Err(kind) if is_transient(kind)),
            });
        }
        self.observe(outcome)
    }

    /// Updates health without adding a latency sample.
    pub(crate) fn observe(&self, outcome: Result<(), TransportErrorKind>) -> ChannelHealth {
        let health = match outcome {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                ChannelHealth::Reachable
            }
            Err(kind) if is_channel_failure(kind) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.unreachable_after {
                    ChannelHealth::Unreachable
                } else {
                    ChannelHealth::Degraded
                }
            }
            Err(TransportErrorKind::ResourceExhausted) => ChannelHealth::Degraded,
            // Application errors travelled over a working channel.
            Err(_) => return self.health(),
        };
        self.health.store(health.as_u8(), Ordering::Release);
        health
    }

    /// Fraction of load errors among the last `last` calls.
    #[must_use]
    pub fn error_rate(&self, last: usize) -> f64 {
        let window = self.window.lock();
        let considered = window.len().min(last);
        if considered == 0 {
            return 0.0;
        }
        let errors = window
            .iter()
            .rev()
            .take(considered)
            .filter(|sample| sample.load_error)
            .count();
        errors as f64 / considered as f64
    }

    #[must_use]
    pub fn mean_latency(&self) -> Option<Duration> {
        let window = self.window.lock();
        if window.is_empty() {
            return None;
        }
        let total: Duration = window.iter().map(|sample| sample.latency).sum();
        Some(total / window.len() as u32)
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            schema_version: self.schema_version,
            health: self.health(),
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            error_rate: self.error_rate(self.window_capacity),
            mean_latency: self.mean_latency(),
        }
    }
}

struct ConnectionInner {
    transport: SharedTransport,
    codec: Arc<dyn WireCodec>,
    server: ServerInfo,
    state: ConnectionState,
    budget: Arc<ConcurrencyBudget>,
    controller: AdaptiveController,
    request_timeout: Duration,
    readiness_timeout: Duration,
}

/// Negotiated connection. Cloning shares the channel, state and budget.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.inner.transport.endpoint()
    }

    #[must_use]
    pub fn schema_version(&self) -> SchemaVersion {
        self.inner.state.schema_version()
    }

    /// Codec pinned at negotiation time.
    #[must_use]
    pub fn codec(&self) -> Arc<dyn WireCodec> {
        Arc::clone(&self.inner.codec)
    }

    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.server
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.inner.state
    }

    #[must_use]
    pub fn budget(&self) -> &Arc<ConcurrencyBudget> {
        &self.inner.budget
    }

    /// Default per-call deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Performs one RPC under `deadline` and records it in the connection
    /// state.
    pub async fn send(
        &self,
        method: RpcMethod,
        body: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, TransportError> {
        let call = RpcCall {
            method,
            version: self.schema_version(),
        };
        let started = Instant::now();
        let result = match tokio::time::timeout(
            deadline,
            self.inner.transport.unary(call, body, deadline),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::deadline_exceeded(format!(
                "{method} did not complete within {}ms",
                deadline.as_millis()
            ))),
        };
        let latency = started.elapsed();

        let previous = self.inner.state.health();
        let health = self
            .inner
            .state
            .record(latency, result.as_ref().map(|_| ()).map_err(|err| err.kind));
        let label = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind.as_str(),
        };
        metrics::RPC_CALLS
            .with_label_values(&[method.as_str(), label])
            .inc();
        self.publish_health(previous, health);
        debug!(
            endpoint = self.endpoint(),
            %method,
            latency_ms = latency.as_millis() as u64,
            result = label,
            "rpc completed"
        );
        result
    }

    /// Checks readiness and returns the resulting health.
    pub async fn health_check(&self) -> ChannelHealth {
        let previous = self.inner.state.health();
        let outcome = match tokio::time::timeout(
            self.inner.readiness_timeout,
            self.inner.transport.health(self.inner.readiness_timeout),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.kind),
            Err(_) => Err(TransportErrorKind::DeadlineExceeded),
        };
        let health = self.inner.state.observe(outcome);
        self.publish_health(previous, health);
        health
    }

    /// Feeds one dispatch attempt to the concurrency controller.
    pub fn record_attempt(&self, result: AttemptResult, latency: Duration) -> Adjustment {
        let budget = &self.inner.budget;
        let adjustment =
            self.inner
                .controller
                .on_attempt(budget, &self.inner.state, result, latency);
        let endpoint = self.endpoint();
        metrics::MAX_IN_FLIGHT
            .with_label_values(&[endpoint])
            .set(budget.max_in_flight() as i64);
        metrics::TARGET_BATCH_SIZE
            .with_label_values(&[endpoint])
            .set(budget.target_batch_size() as i64);
        if adjustment != Adjustment::Held {
            debug!(
                endpoint,
                ?adjustment,
                max_in_flight = budget.max_in_flight(),
                target_batch_size = budget.target_batch_size(),
                "concurrency budget adjusted"
            );
        }
        adjustment
    }

    fn publish_health(&self, previous: ChannelHealth, health: ChannelHealth) {
        metrics::CONNECTION_HEALTH
            .with_label_values(&[self.endpoint()])
            .set(i64::from(health.as_u8()));
        if health != previous {
            if health == ChannelHealth::Reachable {
                info!(endpoint = self.endpoint(), %previous, "channel recovered");
            } else {
                warn!(endpoint = self.endpoint(), %previous, %health, "channel health changed");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint())
            .field("schema_version", &self.schema_version())
            .field("health", &self.inner.state.health())
            .finish_non_exhaustive()
    }
}

/// Opens connections: handshakes with the server, negotiates a schema generation
/// and pins the matching codec.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    connection: ConnectionConfig,
    concurrency: ConcurrencyConfig,
    max_batch_count: usize,
    registry: CodecRegistry,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            connection: config.connection.clone(),
            concurrency: config.concurrency.clone(),
            max_batch_count: config.batch.max_batch_count,
            registry: CodecRegistry::default(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Opens a gRPC connection to `endpoint`.
    pub async fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        preferred: &[SchemaVersion],
    ) -> ClientResult<Connection> {
        let config = ConnectionConfig {
            grpc_endpoint: endpoint.to_string(),
            ..self.connection.clone()
        };
        let transport = GrpcTransport::new(&config, credentials)?;
        self.open_with_transport(Arc::new(transport), preferred)
            .await
    }

    /// Opens a connection over an existing transport. Every call performs a
    /// fresh handshake and takes a fresh codec from the registry.
    pub async fn open_with_transport(
        &self,
        transport: SharedTransport,
        preferred: &[SchemaVersion],
    ) -> ClientResult<Connection> {
        let endpoint = transport.endpoint().to_string();
        let server = self.handshake(transport.as_ref()).await?;

        let (version, codec) = preferred
            .iter()
            .filter(|version| server.schema_versions.contains(version))
            .find_map(|version| self.registry.get(*version).map(|codec| (*version, codec)))
            .ok_or_else(|| {
                ClientError::connection_unavailable(
                    &endpoint,
                    format!(
                        "no mutually supported schema version (server: {}, preferred: {})",
                        join(&server.schema_versions),
                        join(preferred)
                    ),
                )
            })?;

        if !server.unknown_schema_versions.is_empty() {
            debug!(
                endpoint = %endpoint,
                unknown = ?server.unknown_schema_versions,
                "server advertises unknown schema versions"
            );
        }
        info!(
            endpoint = %endpoint,
            schema_version = %version,
            server_version = ?server.server_version,
            max_message_size = server.max_message_size,
            "connection established"
        );

        let budget = ConcurrencyBudget::from_config(&self.concurrency, self.max_batch_count);
        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                transport,
                codec,
                server,
                state: ConnectionState::new(
                    version,
                    self.connection.stats_window,
                    self.connection.unreachable_after_failures,
                ),
                budget: Arc::new(budget),
                controller: AdaptiveController::new(&self.concurrency),
                request_timeout: self.connection.request_timeout(),
                readiness_timeout: self.connection.connect_timeout(),
            }),
        })
    }

    async fn handshake(&self, transport: &dyn Transport) -> ClientResult<ServerInfo> {
        let attempts = self.connection.handshake_attempts.max(1);
        let timeout = self.connection.connect_timeout();
        let mut last_error = None;
        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(timeout, transport.server_info(timeout)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::deadline_exceeded("handshake timed out")),
            };
            match result {
                Ok(info) => return Ok(info),
                Err(err) if is_transient(err.kind) && attempt < attempts => {
                    let delay = self
                        .connection
                        .handshake_backoff()
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        endpoint = transport.endpoint(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "handshake failed, retrying"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            }
        }
        let reason = last_error
            .map(|err| format!("handshake failed: {err}"))
            .unwrap_or_else(|| "handshake failed".to_string());
        Err(ClientError::connection_unavailable(
            transport.endpoint(),
            reason,
        ))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

fn join(versions: &[SchemaVersion]) -> String {
    versions
        .iter()
        .map(SchemaVersion::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
