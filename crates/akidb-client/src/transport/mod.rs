//! Transports carry already-encoded request bodies to the server.
//!
//! The engine never sees protocol objects: a transport moves opaque bytes
//! for a given method and schema generation and reports failures as
//! [`TransportError`]s with a kind the retry layer can classify.

pub mod grpc;
pub mod mock;
mod raw_codec;
pub mod rest;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use akidb_client_core::{SchemaVersion, ServerInfo, TransportError};
use async_trait::async_trait;
use bytes::Bytes;

pub use grpc::GrpcTransport;
pub use rest::RestClient;

/// Engine-level RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    BatchObjects,
    Search,
}

impl RpcMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchObjects => "BatchObjects",
            Self::Search => "Search",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call: which method, encoded with which generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcCall {
    pub method: RpcMethod,
    pub version: SchemaVersion,
}

impl RpcCall {
    /// gRPC path, e.g. `/akidb.v52.Akidb/BatchObjects`.
    #[must_use]
    pub fn path(&self) -> String {
        format!(
            "/{}.{}/{}",
            self.version.package(),
            akidb_client_proto::SERVICE_NAME,
            self.method.as_str()
        )
    }
}

/// Opaque header pairs supplied by an external auth collaborator.
#[derive(Clone, Default)]
pub struct Credentials {
    headers: Vec<(String, String)>,
}

impl Credentials {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::default().with_header("authorization", format!("Bearer {}", token.as_ref()))
    }

    /// API keys travel as bearer tokens.
    #[must_use]
    pub fn api_key(key: impl AsRef<str>) -> Self {
        Self::bearer(key)
    }

    #[must_use]
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().with_header(name, value)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Credentials")
            .field("headers", &names)
            .finish()
    }
}

/// Unary request/response channel to one server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Address used in logs and errors.
    fn endpoint(&self) -> &str;

    /// Handshake: server version, accepted schema generations, size limit.
    async fn server_info(&self, deadline: Duration) -> Result<ServerInfo, TransportError>;

    /// Readiness check.
    async fn health(&self, deadline: Duration) -> Result<(), TransportError> {
        self.server_info(deadline).await.map(|_| ())
    }

    /// Sends one encoded request and returns the encoded reply.
    async fn unary(
        &self,
        call: RpcCall,
        body: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_paths_are_versioned() {
        let call = RpcCall {
            method: RpcMethod::BatchObjects,
            version: SchemaVersion::V52,
        };
        assert_eq!(call.path(), "/akidb.v52.Akidb/BatchObjects");
        let call = RpcCall {
            method: RpcMethod::Search,
            version: SchemaVersion::V4,
        };
        assert_eq!(call.path(), "/akidb.v4.Akidb/Search");
    }

    #[test]
    fn test_credentials_hide_values() {
        let credentials = Credentials::bearer("secret").with_header("X-Tenant", "acme");
        let headers: Vec<_> = credentials.headers().collect();
        assert_eq!(
            headers,
            vec![("authorization", "Bearer secret"), ("x-tenant", "acme")]
        );
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("x-tenant"));
    }
}
