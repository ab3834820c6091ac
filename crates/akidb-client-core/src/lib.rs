//! Domain types shared by the AkiDB client layers.

pub mod config;
pub mod error;
pub mod ids;
pub mod object;
pub mod outcome;
pub mod query;
pub mod schema;

pub use config::{
    BatchConfig, ClientConfig, ConcurrencyConfig, ConnectionConfig, LoggingConfig, RetryConfig,
};
pub use error::{ClientError, ClientResult, TransportError, TransportErrorKind};
pub use ids::{generate_uuid5, CorrelationToken, OperationId};
pub use object::{ObjectWriteRequest, VectorValue};
pub use outcome::{FailureReason, ObjectOutcome, OutcomeStatus, OutcomeSummary};
pub use query::{
    timestamp_from_unix, ConsistencyLevel, Filter, FilterOperator, FilterValue, GenerativeParams,
    GroupBy, GroupSummary, HybridQuery, MetadataQuery, NearImage, NearVector, QueryDescription,
    QueryRecord, QueryReference, RecordMetadata, SearchMode, DEFAULT_VECTOR_NAME,
};
pub use schema::{SchemaVersion, ServerInfo, ServerVersion, DEFAULT_MAX_MESSAGE_SIZE};
