//! Batch and query execution engine for the AkiDB data plane.

pub mod accumulator;
pub mod aggregator;
pub mod client;
pub mod codec;
pub mod concurrency;
pub mod connection;
mod dispatch;
pub mod metrics;
pub mod query;
pub mod retry;
pub mod transport;

pub use accumulator::{Batch, BatchAccumulator, BatchEntry, BatchState};
pub use aggregator::{ObjectResult, ResultAggregator};
pub use client::{Client, OperationHandle};
pub use codec::{BatchContext, BatchReply, CodecRegistry, ObjectError, WireCodec};
pub use concurrency::{
    AdaptiveController, Adjustment, AttemptResult, ConcurrencyBudget, InFlightPermit,
};
pub use connection::{
    ChannelHealth, Connection, ConnectionManager, ConnectionState, ConnectionStats,
};
pub use query::{QueryExecutor, QueryResults};
pub use retry::{classify, is_transient, ErrorClass, RetryPolicy};
pub use transport::{
    Credentials, GrpcTransport, RestClient, RpcCall, RpcMethod, SharedTransport, Transport,
};
