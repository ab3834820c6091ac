use std::time::Duration;

use akidb_client_core::{
    ClientError, ClientResult, ConnectionConfig, ServerInfo, TransportError, TransportErrorKind,
};
use akidb_client_proto::{common, META_SERVICE};
use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::debug;

use super::raw_codec::RawCodec;
use super::rest::RestClient;
use super::{Credentials, RpcCall, Transport};

/// Maps a gRPC status onto the transport taxonomy.
#[must_use]
pub fn status_to_error(status: &Status) -> TransportError {
    let kind = match status.code() {
        Code::Unavailable => TransportErrorKind::Unavailable,
        Code::DeadlineExceeded => TransportErrorKind::DeadlineExceeded,
        Code::ResourceExhausted => TransportErrorKind::ResourceExhausted,
        Code::Unauthenticated => TransportErrorKind::Unauthenticated,
        Code::PermissionDenied => TransportErrorKind::PermissionDenied,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            TransportErrorKind::InvalidArgument
        }
        Code::AlreadyExists => TransportErrorKind::AlreadyExists,
        Code::NotFound => TransportErrorKind::NotFound,
        Code::Unimplemented => TransportErrorKind::Unimplemented,
        Code::Internal | Code::DataLoss => TransportErrorKind::Internal,
        Code::Ok | Code::Cancelled | Code::Unknown | Code::Aborted => TransportErrorKind::Unknown,
    };
    TransportError::new(kind, status.message())
}

/// gRPC channel plus the optional REST fallback used for the handshake and
/// readiness check.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    endpoint: String,
    channel: Channel,
    metadata: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
    max_message_size: usize,
    rest: Option<RestClient>,
}

impl GrpcTransport {
    /// Builds a lazily connecting channel. No network I/O happens here.
    pub fn new(config: &ConnectionConfig, credentials: &Credentials) -> ClientResult<Self> {
        let endpoint = Endpoint::from_shared(config.grpc_endpoint.clone()).map_err(|err| {
            ClientError::connection_unavailable(
                &config.grpc_endpoint,
                format!("invalid endpoint: {err}"),
            )
        })?;
        let endpoint = endpoint
            .connect_timeout(config.connect_timeout())
            .http2_keep_alive_interval(Duration::from_secs(config.keepalive_interval_secs))
            .keep_alive_timeout(Duration::from_secs(config.keepalive_timeout_secs))
            .keep_alive_while_idle(true)
            .tcp_nodelay(true);

        let metadata = credentials
            .headers()
            .map(|(name, value)| {
                let key = AsciiMetadataKey::from_bytes(name.as_bytes()).map_err(|err| {
                    ClientError::validation(format!("invalid credential header `{name}`: {err}"))
                })?;
                let value = AsciiMetadataValue::try_from(value).map_err(|err| {
                    ClientError::validation(format!("invalid value for header `{name}`: {err}"))
                })?;
                Ok((key, value))
            })
            .collect::<ClientResult<Vec<_>>>()?;

        let rest = config
            .rest_endpoint
            .as_deref()
            .map(|base| RestClient::new(base, credentials, config.connect_timeout()))
            .transpose()?;

        debug!(endpoint = %config.grpc_endpoint, "created lazy gRPC channel");
        Ok(Self {
            endpoint: config.grpc_endpoint.clone(),
            channel: endpoint.connect_lazy(),
            metadata,
            max_message_size: config.max_message_size,
            rest,
        })
    }

    async fn call(
        &self,
        path: &str,
        body: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, TransportError> {
        let path = PathAndQuery::try_from(path)
            .map_err(|err| TransportError::internal(format!("invalid RPC path `{path}`: {err}")))?;

        let mut request = Request::new(body);
        request.set_timeout(deadline);
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(key.clone(), value.clone());
        }

        let mut grpc = tonic::client::Grpc::new(self.channel.clone())
            .max_decoding_message_size(self.max_message_size)
            .max_encoding_message_size(self.max_message_size);
        grpc.ready()
            .await
            .map_err(|err| TransportError::unavailable(format!("channel not ready: {err}")))?;
        grpc.unary(request, path, RawCodec)
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| status_to_error(&status))
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn server_info(&self, deadline: Duration) -> Result<ServerInfo, TransportError> {
        let path = format!("/{META_SERVICE}/ServerInfo");
        let body = Bytes::from(common::ServerInfoRequest {}.encode_to_vec());
        match self.call(&path, body, deadline).await {
            Ok(reply) => {
                let reply = common::ServerInfoReply::decode(reply).map_err(|err| {
                    TransportError::internal(format!("invalid handshake reply: {err}"))
                })?;
                Ok(ServerInfo::from_advertised(
                    &reply.server_version,
                    &reply.schema_versions,
                    usize::try_from(reply.max_message_size).ok(),
                ))
            }
            Err(err) if err.kind == TransportErrorKind::Unimplemented => match &self.rest {
                Some(rest) => {
                    debug!(
                        endpoint = %self.endpoint,
                        "handshake RPC unimplemented, using REST meta"
                    );
                    rest.meta(deadline).await
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn health(&self, deadline: Duration) -> Result<(), TransportError> {
        match &self.rest {
            Some(rest) => rest.ready(deadline).await,
            None => self.server_info(deadline).await.map(|_| ()),
        }
    }

    async fn unary(
        &self,
        call: RpcCall,
        body: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, TransportError> {
        self.call(&call.path(), body, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Code::Unavailable, TransportErrorKind::Unavailable),
            (Code::DeadlineExceeded, TransportErrorKind::DeadlineExceeded),
            (Code::ResourceExhausted, TransportErrorKind::ResourceExhausted),
            (Code::Unauthenticated, TransportErrorKind::Unauthenticated),
            (Code::PermissionDenied, TransportErrorKind::PermissionDenied),
            (Code::FailedPrecondition, TransportErrorKind::InvalidArgument),
            (Code::AlreadyExists, TransportErrorKind::AlreadyExists),
            (Code::DataLoss, TransportErrorKind::Internal),
            (Code::Aborted, TransportErrorKind::Unknown),
        ];
        for (code, kind) in cases {
            let error = status_to_error(&Status::new(code, "boom"));
            assert_eq!(error.kind, kind, "{code:?}");
            assert_eq!(error.message, "boom");
        }
    }

    #[tokio::test]
    async fn test_invalid_endpoint_fails_fast() {
        let config = ConnectionConfig {
            grpc_endpoint: "not a uri".to_string(),
            ..Default::default()
        };
        let err = GrpcTransport::new(&config, &Credentials::none()).unwrap_err();
        assert!(matches!(err, ClientError::ConnectionUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_credential_header_is_rejected() {
        let config = ConnectionConfig::default();
        let credentials = Credentials::header("bad header", "x");
        assert!(matches!(
            GrpcTransport::new(&config, &credentials),
            Err(ClientError::Validation(_))
        ));
    }
}
