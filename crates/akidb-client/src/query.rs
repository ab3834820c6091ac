//! Query execution and lazily decoded result sequences.

use std::fmt;
use std::time::Duration;

use akidb_client_core::{ClientResult, GroupSummary, QueryDescription, QueryRecord};
use futures::stream::{self, Stream};
use tokio::time::Instant;
use tracing::debug;

use crate::connection::Connection;
use crate::transport::RpcMethod;

/// Records still waiting to be decoded.
pub type RecordIter = Box<dyn Iterator<Item = ClientResult<QueryRecord>> + Send>;

/// Forward-only, non-restartable sequence of query records.
///
/// Each record is decoded only when the sequence is advanced, so a corrupt
/// record surfaces as an `Err` item at its position without affecting the
/// records before it.
pub struct QueryResults {
    took: f32,
    generated: Option<String>,
    groups: Vec<GroupSummary>,
    records: RecordIter,
}

impl QueryResults {
    pub(crate) fn new(
        took: f32,
        generated: Option<String>,
        groups: Vec<GroupSummary>,
        records: RecordIter,
    ) -> Self {
        Self {
            took,
            generated,
            groups,
            records,
        }
    }

    /// Server-side query time in seconds.
    #[must_use]
    pub fn took(&self) -> f32 {
        self.took
    }

    /// Grouped generative result, when one was requested.
    #[must_use]
    pub fn generated(&self) -> Option<&str> {
        self.generated.as_deref()
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupSummary] {
        &self.groups
    }

    /// Adapts the sequence into a `Stream` for async consumers.
    pub fn into_stream(self) -> impl Stream<Item = ClientResult<QueryRecord>> + Send {
        stream::iter(self.records)
    }
}

impl Iterator for QueryResults {
    type Item = ClientResult<QueryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

impl fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults")
            .field("took", &self.took)
            .field("generated", &self.generated)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

/// Sends one search request per call. Failures are returned as-is; wrap
/// calls in [`RetryPolicy::run`](crate::retry::RetryPolicy::run) to retry.
#[derive(Clone, Debug)]
pub struct QueryExecutor {
    connection: Connection,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub async fn execute(
        &self,
        description: &QueryDescription,
        deadline: Duration,
    ) -> ClientResult<QueryResults> {
        let codec = self.connection.codec();
        let body = codec.encode_query(description)?;
        let started = Instant::now();
        let reply = self
            .connection
            .send(RpcMethod::Search, body, deadline)
            .await?;
        debug!(
            collection = %description.collection,
            schema_version = %codec.version(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            reply_bytes = reply.len(),
            "query completed"
        );
        codec.decode_query_reply(&reply)
    }
}
