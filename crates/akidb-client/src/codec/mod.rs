//! Wire codecs, one per schema generation.
//!
//! A [`WireCodec`] is a stateless transform between logical requests and
//! the protobuf messages of exactly one generation. The connection picks one
//! codec from the [`CodecRegistry`] during the handshake and every message on
//! that connection goes through it.

mod shared;
mod v4;
mod v51;
mod v52;
mod v6;
pub mod vectors;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use akidb_client_core::{
    ClientResult, ConsistencyLevel, ObjectWriteRequest, QueryDescription, SchemaVersion,
    TransportErrorKind,
};
use bytes::Bytes;

use crate::query::QueryResults;

pub use v4::V4Codec;
pub use v51::V51Codec;
pub use v52::V52Codec;
pub use v6::V6Codec;

/// Batch-level settings applied while encoding.
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    pub default_collection: Option<String>,
    pub consistency_level: Option<ConsistencyLevel>,
}

/// Rejection of one object inside an otherwise delivered batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectError {
    /// Position in the encoded request.
    pub index: usize,
    pub kind: TransportErrorKind,
    pub message: String,
}

/// Decoded batch reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReply {
    /// Server-side processing time in seconds.
    pub took: f32,
    pub errors: Vec<ObjectError>,
}

/// Encoder/decoder for one schema generation.
pub trait WireCodec: Send + Sync + fmt::Debug {
    fn version(&self) -> SchemaVersion;

    /// Checks that one object can be expressed without losing data.
    fn check_object(&self, object: &ObjectWriteRequest) -> ClientResult<()>;

    /// Encodes a batch write. Fails with `SchemaIncompatible` if any object
    /// cannot be expressed.
    fn encode_batch(
        &self,
        objects: &[&ObjectWriteRequest],
        ctx: &BatchContext,
    ) -> ClientResult<Bytes>;

    /// Decodes a batch reply for a request that carried `sent` objects.
    fn decode_batch_reply(&self, body: &[u8], sent: usize) -> ClientResult<BatchReply>;

    fn encode_query(&self, query: &QueryDescription) -> ClientResult<Bytes>;

    /// Decodes a search reply into a lazy record sequence.
    fn decode_query_reply(&self, body: &[u8]) -> ClientResult<QueryResults>;
}

/// Codecs available to connections, keyed by schema generation.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<SchemaVersion, Arc<dyn WireCodec>>,
}

impl CodecRegistry {
    /// Creates a registry with no codecs.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Registers a codec, replacing any codec of the same generation.
    pub fn register(&mut self, codec: Arc<dyn WireCodec>) {
        self.codecs.insert(codec.version(), codec);
    }

    #[must_use]
    pub fn get(&self, version: SchemaVersion) -> Option<Arc<dyn WireCodec>> {
        self.codecs.get(&version).cloned()
    }

    #[must_use]
    pub fn contains(&self, version: SchemaVersion) -> bool {
        self.codecs.contains_key(&version)
    }

    /// Registered generations, oldest first.
    #[must_use]
    pub fn versions(&self) -> Vec<SchemaVersion> {
        self.codecs.keys().copied().collect()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(V4Codec));
        registry.register(Arc::new(V51Codec));
        registry.register(Arc::new(V52Codec));
        registry.register(Arc::new(V6Codec));
        registry
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("versions", &self.versions())
            .finish()
    }
}
