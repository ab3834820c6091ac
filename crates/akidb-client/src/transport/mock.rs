//! In-memory server for tests and local experiments.
//!
//! `MockTransport` decodes batch requests with the real protobuf tags and
//! answers with the reply message of the schema generation the call was made
//! with, so the engine above it runs unmodified.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use akidb_client_core::{SchemaVersion, ServerInfo, TransportError, TransportErrorKind};
use akidb_client_proto::{common, v6};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use uuid::Uuid;

use super::{RpcCall, RpcMethod, SharedTransport, Transport};

/// Scripted result of the next call.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Ok,
    /// Fails the call with `Unavailable`.
    Transient(&'static str),
    /// Fails the call with `InvalidArgument`.
    Permanent(&'static str),
    /// Fails the call with an arbitrary error.
    Error(TransportError),
}

impl MockFailure {
    fn into_result(self) -> Result<(), TransportError> {
        match self {
            Self::Ok => Ok(()),
            Self::Transient(message) => Err(TransportError::unavailable(message)),
            Self::Permanent(message) => Err(TransportError::new(
                TransportErrorKind::InvalidArgument,
                message,
            )),
            Self::Error(err) => Err(err),
        }
    }
}

/// One batch call as the mock server saw it.
#[derive(Debug, Clone)]
pub struct MockBatchCall {
    pub version: SchemaVersion,
    pub ids: Vec<Uuid>,
    pub collections: Vec<String>,
}

// Only the fields the mock inspects; tags are identical in every generation.
#[derive(Clone, PartialEq, ::prost::Message)]
struct EnvelopeObject {
    #[prost(string, tag = "1")]
    uuid: String,
    #[prost(string, tag = "4")]
    collection: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct BatchEnvelope {
    #[prost(message, repeated, tag = "1")]
    objects: Vec<EnvelopeObject>,
}

#[derive(Debug, Clone)]
struct Rejection {
    kind: TransportErrorKind,
    message: String,
    /// `None` rejects forever.
    remaining: Option<u32>,
}

#[derive(Debug)]
struct MockState {
    server_version: String,
    schema_versions: Vec<String>,
    max_message_size: Option<usize>,
    latency: Duration,
    unreachable: bool,
    handshake_script: VecDeque<MockFailure>,
    batch_script: VecDeque<MockFailure>,
    search_replies: VecDeque<Result<Vec<u8>, TransportError>>,
    rejections: HashMap<Uuid, Rejection>,
    handshakes: usize,
    batch_calls: Vec<MockBatchCall>,
    search_bodies: Vec<Bytes>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            server_version: "1.25.0".to_string(),
            schema_versions: SchemaVersion::ALL
                .iter()
                .map(|version| version.to_string())
                .collect(),
            max_message_size: None,
            latency: Duration::ZERO,
            unreachable: false,
            handshake_script: VecDeque::new(),
            batch_script: VecDeque::new(),
            search_replies: VecDeque::new(),
            rejections: HashMap::new(),
            handshakes: 0,
            batch_calls: Vec::new(),
            search_bodies: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MockInner {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a MockInner);

impl<'a> InFlightGuard<'a> {
    fn enter(inner: &'a MockInner) -> Self {
        let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cloneable handle; clones share the same simulated server.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Server advertising every known generation, with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_schema_versions(self, versions: &[&str]) -> Self {
        self.set_schema_versions(versions);
        self
    }

    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner.state.lock().latency = latency;
        self
    }

    #[must_use]
    pub fn with_max_message_size(self, size: usize) -> Self {
        self.inner.state.lock().max_message_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_server_version(self, version: &str) -> Self {
        self.inner.state.lock().server_version = version.to_string();
        self
    }

    /// Changes what the next handshakes advertise.
    pub fn set_schema_versions(&self, versions: &[&str]) {
        self.inner.state.lock().schema_versions =
            versions.iter().map(|version| version.to_string()).collect();
    }

    /// While set, every call fails with `Unavailable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.state.lock().unreachable = unreachable;
    }

    pub fn push_handshake_failure(&self, failure: MockFailure) {
        self.inner.state.lock().handshake_script.push_back(failure);
    }

    /// Queues results for the next batch calls, in order.
    pub fn push_batch_results(&self, results: impl IntoIterator<Item = MockFailure>) {
        self.inner.state.lock().batch_script.extend(results);
    }

    /// Queues an encoded search reply (or an error) for the next search.
    pub fn push_search_reply(&self, reply: Result<Vec<u8>, TransportError>) {
        self.inner.state.lock().search_replies.push_back(reply);
    }

    /// Rejects the object on every attempt with `InvalidArgument`.
    pub fn reject_object(&self, id: Uuid, message: &str) {
        self.reject_object_with(id, TransportErrorKind::InvalidArgument, message, None);
    }

    /// Reports the object as `Unavailable` for the next `times` attempts.
    /// Only v6 replies carry the code; earlier generations see a plain
    /// message and classify it as permanent.
    pub fn reject_object_transiently(&self, id: Uuid, times: u32) {
        self.reject_object_with(
            id,
            TransportErrorKind::Unavailable,
            "shard temporarily unavailable",
            Some(times),
        );
    }

    pub fn reject_object_with(
        &self,
        id: Uuid,
        kind: TransportErrorKind,
        message: &str,
        times: Option<u32>,
    ) {
        self.inner.state.lock().rejections.insert(
            id,
            Rejection {
                kind,
                message: message.to_string(),
                remaining: times,
            },
        );
    }

    #[must_use]
    pub fn batch_calls(&self) -> Vec<MockBatchCall> {
        self.inner.state.lock().batch_calls.clone()
    }

    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner
            .state
            .lock()
            .batch_calls
            .iter()
            .map(|call| call.ids.len())
            .collect()
    }

    /// Number of batch calls that carried `id`.
    #[must_use]
    pub fn attempts_for(&self, id: Uuid) -> usize {
        self.inner
            .state
            .lock()
            .batch_calls
            .iter()
            .filter(|call| call.ids.contains(&id))
            .count()
    }

    #[must_use]
    pub fn search_calls(&self) -> usize {
        self.inner.state.lock().search_bodies.len()
    }

    #[must_use]
    pub fn last_search_body(&self) -> Option<Bytes> {
        self.inner.state.lock().search_bodies.last().cloned()
    }

    #[must_use]
    pub fn handshakes(&self) -> usize {
        self.inner.state.lock().handshakes
    }

    /// Highest number of calls that were in progress at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn into_transport(self) -> SharedTransport {
        Arc::new(self)
    }

    fn unreachable_error() -> TransportError {
        TransportError::unavailable("mock server unreachable")
    }

    fn batch(&self, version: SchemaVersion, body: &[u8]) -> Result<Bytes, TransportError> {
        let envelope = BatchEnvelope::decode(body).map_err(|err| {
            TransportError::new(
                TransportErrorKind::InvalidArgument,
                format!("malformed batch request: {err}"),
            )
        })?;
        let ids: Vec<Uuid> = envelope
            .objects
            .iter()
            .map(|object| Uuid::parse_str(&object.uuid).unwrap_or_default())
            .collect();

        let mut state = self.inner.state.lock();
        state.batch_calls.push(MockBatchCall {
            version,
            ids: ids.clone(),
            collections: envelope
                .objects
                .into_iter()
                .map(|object| object.collection)
                .collect(),
        });
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        state
            .batch_script
            .pop_front()
            .unwrap_or(MockFailure::Ok)
            .into_result()?;

        let mut errors = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            let Some(rejection) = state.rejections.get_mut(id) else {
                continue;
            };
            if rejection.remaining == Some(0) {
                continue;
            }
            if let Some(remaining) = rejection.remaining.as_mut() {
                *remaining -= 1;
            }
            errors.push((index, rejection.kind, rejection.message.clone()));
        }

        let reply = if version == SchemaVersion::V6 {
            v6::BatchObjectsReply {
                took: 0.001,
                errors: errors
                    .into_iter()
                    .map(|(index, kind, error)| v6::BatchError {
                        index: wire_index(index),
                        error,
                        code: error_code(kind) as i32,
                    })
                    .collect(),
            }
            .encode_to_vec()
        } else {
            common::BatchObjectsReply {
                took: 0.001,
                errors: errors
                    .into_iter()
                    .map(|(index, _, error)| common::BatchError {
                        index: wire_index(index),
                        error,
                    })
                    .collect(),
            }
            .encode_to_vec()
        };
        Ok(Bytes::from(reply))
    }

    fn search(&self, body: Bytes) -> Result<Bytes, TransportError> {
        let mut state = self.inner.state.lock();
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        state.search_bodies.push(body);
        // An empty body is a valid, empty reply in every generation.
        match state.search_replies.pop_front() {
            Some(reply) => reply.map(Bytes::from),
            None => Ok(Bytes::new()),
        }
    }
}

fn wire_index(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

fn error_code(kind: TransportErrorKind) -> v6::ErrorCode {
    match kind {
        TransportErrorKind::InvalidArgument => v6::ErrorCode::InvalidArgument,
        TransportErrorKind::AlreadyExists => v6::ErrorCode::AlreadyExists,
        TransportErrorKind::PermissionDenied | TransportErrorKind::Unauthenticated => {
            v6::ErrorCode::PermissionDenied
        }
        TransportErrorKind::NotFound => v6::ErrorCode::NotFound,
        TransportErrorKind::Unavailable => v6::ErrorCode::Unavailable,
        TransportErrorKind::ResourceExhausted => v6::ErrorCode::ResourceExhausted,
        TransportErrorKind::DeadlineExceeded => v6::ErrorCode::DeadlineExceeded,
        TransportErrorKind::Internal => v6::ErrorCode::Internal,
        TransportErrorKind::Unimplemented | TransportErrorKind::Unknown => {
            v6::ErrorCode::Unspecified
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn endpoint(&self) -> &str {
        "mock://akidb"
    }

    async fn server_info(&self, _deadline: Duration) -> Result<ServerInfo, TransportError> {
        let mut state = self.inner.state.lock();
        state.handshakes += 1;
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        state
            .handshake_script
            .pop_front()
            .unwrap_or(MockFailure::Ok)
            .into_result()?;
        Ok(ServerInfo::from_advertised(
            &state.server_version,
            &state.schema_versions,
            state.max_message_size,
        ))
    }

    async fn health(&self, _deadline: Duration) -> Result<(), TransportError> {
        if self.inner.state.lock().unreachable {
            Err(Self::unreachable_error())
        } else {
            Ok(())
        }
    }

    async fn unary(
        &self,
        call: RpcCall,
        body: Bytes,
        _deadline: Duration,
    ) -> Result<Bytes, TransportError> {
        let _guard = InFlightGuard::enter(&self.inner);
        let latency = self.inner.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match call.method {
            RpcMethod::BatchObjects => self.batch(call.version, &body),
            RpcMethod::Search => self.search(body),
        }
    }
}
