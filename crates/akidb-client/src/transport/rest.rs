//! REST fallback for the handshake and readiness check.

use std::time::Duration;

use akidb_client_core::{ClientError, ClientResult, ServerInfo, TransportError, TransportErrorKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use super::Credentials;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaResponse {
    #[serde(default)]
    version: String,
    #[serde(default)]
    schema_versions: Vec<String>,
    #[serde(default)]
    grpc_max_message_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    base: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(
        base: &str,
        credentials: &Credentials,
        connect_timeout: Duration,
    ) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in credentials.headers() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ClientError::validation(format!("invalid credential header `{name}`: {err}"))
            })?;
            let mut value = HeaderValue::from_str(value).map_err(|err| {
                ClientError::validation(format!("invalid credential header value: {err}"))
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| ClientError::Internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// `GET /v1/meta`
    pub async fn meta(&self, deadline: Duration) -> Result<ServerInfo, TransportError> {
        let response = self
            .http
            .get(format!("{}/v1/meta", self.base))
            .timeout(deadline)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response)?;
        let meta: MetaResponse = response.json().await.map_err(|err| {
            TransportError::internal(format!("invalid meta response: {err}"))
        })?;
        Ok(ServerInfo::from_advertised(
            &meta.version,
            &meta.schema_versions,
            meta.grpc_max_message_size,
        ))
    }

    /// `GET /v1/.well-known/ready`
    pub async fn ready(&self, deadline: Duration) -> Result<(), TransportError> {
        let response = self
            .http
            .get(format!("{}/v1/.well-known/ready", self.base))
            .timeout(deadline)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response).map(|_| ())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::new(
            TransportErrorKind::from_http_status(status.as_u16()),
            format!("{} returned {status}", response.url().path()),
        ))
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::deadline_exceeded(err.to_string())
    } else if err.is_connect() || err.is_request() {
        TransportError::unavailable(err.to_string())
    } else {
        TransportError::new(TransportErrorKind::Unknown, err.to_string())
    }
}
