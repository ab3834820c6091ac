//! Caller API: submit, wait, flush, cancel, query and close.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use akidb_client_core::{
    ClientConfig, ClientError, ClientResult, FailureReason, ObjectOutcome, ObjectWriteRequest,
    OperationId, QueryDescription,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::accumulator::{Batch, BatchAccumulator, BatchEntry};
use crate::aggregator::{ObjectResult, ResultAggregator};
use crate::codec::{BatchContext, WireCodec};
use crate::connection::{Connection, ConnectionManager};
use crate::dispatch::{self, DispatchContext};
use crate::query::{QueryExecutor, QueryResults};
use crate::retry::RetryPolicy;
use crate::transport::Credentials;

struct ClientInner {
    connection: Connection,
    executor: QueryExecutor,
    accumulator: AsyncMutex<BatchAccumulator>,
    sender: Mutex<Option<mpsc::Sender<Batch>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    default_collection: Option<String>,
    max_object_bytes: usize,
    request_timeout: Duration,
}

impl ClientInner {
    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Queues a sealed batch, waiting while the queue is full.
    async fn enqueue(&self, batch: Batch) -> ClientResult<()> {
        let sender = self.sender.lock().clone().ok_or(ClientError::Closed)?;
        sender
            .send(batch)
            .await
            .map_err(|_| ClientError::Internal("dispatcher stopped".to_string()))
    }

    async fn flush(&self) -> ClientResult<()> {
        let mut accumulator = self.accumulator.lock().await;
        match accumulator.flush() {
            Some(batch) => {
                debug!(seq = batch.seq, objects = batch.len(), "flushing open batch");
                self.enqueue(batch).await
            }
            None => Ok(()),
        }
    }

    /// Objects that can never be sent fail here instead of on the wire.
    /// Returns the estimated encoded size, default collection included.
    fn precheck(
        &self,
        codec: &dyn WireCodec,
        object: &ObjectWriteRequest,
    ) -> Result<usize, FailureReason> {
        if object.collection.is_none() && self.default_collection.is_none() {
            return Err(FailureReason::Validation {
                detail: "object names no collection and no default collection is configured"
                    .to_string(),
            });
        }
        let size = object.estimated_size_with_default(self.default_collection.as_deref());
        if size > self.max_object_bytes {
            return Err(FailureReason::Validation {
                detail: format!(
                    "object is about {size} bytes, above the server limit of {} bytes",
                    self.max_object_bytes
                ),
            });
        }
        codec.check_object(object).map_err(FailureReason::from)?;
        Ok(size)
    }
}

/// Batch ingestion and query client over one negotiated connection.
///
/// Cloning is cheap and shares the connection, the open batch and the
/// dispatcher. Dropping the last clone without [`Client::close`] abandons
/// the open batch: its objects finish as `NotAttempted`. Batches already
/// sealed are still dispatched.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connects to `config.connection.grpc_endpoint` and negotiates a schema
    /// generation.
    pub async fn connect(config: ClientConfig, credentials: Credentials) -> ClientResult<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(&config);
        let connection = manager
            .open(
                &config.connection.grpc_endpoint,
                &credentials,
                &config.connection.preferred_schema_versions,
            )
            .await?;
        Ok(Self::with_connection(connection, &config))
    }

    /// Builds a client over an open connection. Must be called from within
    /// a Tokio runtime.
    #[must_use]
    pub fn with_connection(connection: Connection, config: &ClientConfig) -> Self {
        let batch = &config.batch;
        let server_limit = connection.server_info().max_message_size;
        let max_batch_bytes = batch.max_batch_bytes.min(server_limit);

        let (sender, receiver) = mpsc::channel(batch.queue_capacity.max(1));
        let ctx = Arc::new(DispatchContext {
            connection: connection.clone(),
            policy: RetryPolicy::from_config(&config.retry),
            batch_context: BatchContext {
                default_collection: batch.default_collection.clone(),
                consistency_level: batch.consistency_level,
            },
            request_timeout: connection.request_timeout(),
        });
        let dispatcher = dispatch::spawn(ctx, receiver);

        let inner = Arc::new(ClientInner {
            executor: QueryExecutor::new(connection.clone()),
            accumulator: AsyncMutex::new(BatchAccumulator::new(
                batch.max_batch_count,
                max_batch_bytes,
                batch.max_wait(),
            )),
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            ticker: Mutex::new(None),
            closed: AtomicBool::new(false),
            default_collection: batch.default_collection.clone(),
            max_object_bytes: server_limit,
            request_timeout: connection.request_timeout(),
            connection,
        });
        *inner.ticker.lock() = spawn_ticker(&inner, batch.max_wait());

        info!(
            endpoint = inner.connection.endpoint(),
            schema_version = %inner.connection.schema_version(),
            max_batch_count = batch.max_batch_count,
            max_batch_bytes,
            "client ready"
        );
        Self { inner }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Submits objects for writing and returns a handle to their outcomes.
    ///
    /// Objects that cannot be sent (no collection, larger than the server
    /// limit, not expressible in the negotiated schema) get a `Failed`
    /// outcome right away; the rest are added to the open batch. Waits when
    /// the queue of sealed batches is full.
    ///
    /// # Errors
    ///
    /// `Validation` for duplicate correlation tokens, `Closed` after
    /// [`Client::close`].
    pub async fn submit(&self, objects: Vec<ObjectWriteRequest>) -> ClientResult<OperationHandle> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let aggregator = Arc::new(ResultAggregator::new(
            OperationId::new(),
            objects.iter().map(|object| (object.token.clone(), object.id)),
        )?);
        let codec = inner.connection.codec();

        let mut accumulator = inner.accumulator.lock().await;
        // `close` may have won the race for the accumulator.
        inner.ensure_open()?;
        let mut rejected = 0;
        for (index, object) in objects.into_iter().enumerate() {
            let size = match inner.precheck(codec.as_ref(), &object) {
                Ok(size) => size,
                Err(reason) => {
                    rejected += 1;
                    aggregator.resolve(index, ObjectResult::Failed(reason));
                    continue;
                }
            };
            let target = inner.connection.budget().target_batch_size();
            let entry = BatchEntry::new(Arc::clone(&aggregator), index, object).with_size(size);
            for batch in accumulator.push(entry, target) {
                inner.enqueue(batch).await?;
            }
        }
        drop(accumulator);

        debug!(
            operation = %aggregator.operation_id(),
            objects = aggregator.len(),
            rejected,
            "operation submitted"
        );
        Ok(OperationHandle {
            aggregator,
            client: Arc::downgrade(inner),
        })
    }

    /// Flushes the open batch and waits for every outcome of `handle`.
    pub async fn wait(&self, handle: &OperationHandle) -> ClientResult<Vec<ObjectOutcome>> {
        self.inner.flush().await?;
        handle.aggregator.wait().await
    }

    /// Seals the open batch and queues it for dispatch.
    pub async fn flush(&self) -> ClientResult<()> {
        self.inner.ensure_open()?;
        self.inner.flush().await
    }

    pub fn cancel(&self, handle: &OperationHandle) {
        handle.cancel();
    }

    /// Runs a query with the connection's request timeout.
    pub async fn query(&self, description: &QueryDescription) -> ClientResult<QueryResults> {
        self.query_with_deadline(description, self.inner.request_timeout)
            .await
    }

    pub async fn query_with_deadline(
        &self,
        description: &QueryDescription,
        deadline: Duration,
    ) -> ClientResult<QueryResults> {
        self.inner.ensure_open()?;
        self.inner.executor.execute(description, deadline).await
    }

    /// Flushes the open batch, stops accepting work and waits until every
    /// dispatched batch is terminal. Calling it again is a no-op.
    pub async fn close(&self) -> ClientResult<()> {
        let inner = &self.inner;
        {
            let mut accumulator = inner.accumulator.lock().await;
            if !inner.closed.swap(true, Ordering::AcqRel) {
                if let Some(batch) = accumulator.flush() {
                    inner.enqueue(batch).await?;
                }
            }
            inner.sender.lock().take();
        }
        if let Some(ticker) = inner.ticker.lock().take() {
            ticker.abort();
        }
        let dispatcher = inner.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher
                .await
                .map_err(|err| ClientError::Internal(format!("dispatcher failed: {err}")))?;
            info!(endpoint = inner.connection.endpoint(), "client closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.inner.connection)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn spawn_ticker(inner: &Arc<ClientInner>, max_wait: Duration) -> Option<JoinHandle<()>> {
    if max_wait.is_zero() {
        return None;
    }
    let client = Arc::downgrade(inner);
    let period = (max_wait / 2).max(Duration::from_millis(1));
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(inner) = client.upgrade() else {
                break;
            };
            if inner.ensure_open().is_err() {
                break;
            }
            let mut accumulator = inner.accumulator.lock().await;
            if let Some(batch) = accumulator.seal_expired(Instant::now()) {
                debug!(seq = batch.seq, objects = batch.len(), "sealing batch after max wait");
                if inner.enqueue(batch).await.is_err() {
                    break;
                }
            }
        }
    }))
}

/// Handle to one submitted operation.
#[derive(Clone)]
pub struct OperationHandle {
    aggregator: Arc<ResultAggregator>,
    client: Weak<ClientInner>,
}

impl OperationHandle {
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.aggregator.operation_id()
    }

    /// Number of objects submitted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aggregator.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregator.is_empty()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.aggregator.is_finished()
    }

    /// Stops dispatch and retries for this operation. Calls already on the
    /// wire complete and keep their results.
    pub fn cancel(&self) {
        self.aggregator.cancel();
        debug!(operation = %self.id(), "operation cancelled");
    }

    /// Same as [`Client::wait`]; the open batch is flushed if the client is
    /// still alive.
    pub async fn wait(&self) -> ClientResult<Vec<ObjectOutcome>> {
        if let Some(inner) = self.client.upgrade() {
            inner.flush().await?;
        }
        self.aggregator.wait().await
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("finished", &self.is_finished())
            .finish()
    }
}
