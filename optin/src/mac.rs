// SPDX-License-Identifier: MIT

//! Client for the remote MAC service.
//!
//! The service holds the confirmation signing key and exposes exactly two
//! operations, generate and verify, over mutually-authenticated TLS. Requests
//! and responses are single lines of JSON. Confirmation traffic is low volume
//! (one sign when a link is minted, one verify when it is followed), so each
//! call opens a fresh connection rather than maintaining a pool.

use std::pin::Pin;
use std::sync::Arc;

use base64ct::{Base64, Encoding};
use openssl::ssl::SslConnector;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::MacConfig,
    signer::{MacError, MacService},
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Request {
    GenerateMac {
        key_id: String,
        message: String,
    },
    VerifyMac {
        key_id: String,
        message: String,
        mac: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum Response {
    Mac { mac: String },
    Verified { valid: bool },
    Error { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OuterRequest {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OuterResponse {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub response: Response,
}

/// A client for the remote MAC service.
#[derive(Clone)]
pub struct MacClient {
    config: Arc<MacConfig>,
    connector: SslConnector,
}

impl std::fmt::Debug for MacClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacClient")
            .field("hostname", &self.config.hostname)
            .field("port", &self.config.port)
            .field("key_id", &self.config.key_id)
            .finish_non_exhaustive()
    }
}

impl MacClient {
    /// Create a new client.
    ///
    /// This validates the TLS credentials but does not connect; connections
    /// are established per request.
    pub fn new(config: MacConfig) -> Result<Self, MacError> {
        let connector = config.credentials.ssl_connector()?;
        Ok(Self {
            config: Arc::new(config),
            connector,
        })
    }

    async fn roundtrip_inner(&self, request: Request) -> Result<Response, MacError> {
        let stream =
            TcpStream::connect((self.config.hostname.as_str(), self.config.port)).await?;
        let ssl = self
            .connector
            .configure()?
            .into_ssl(&self.config.hostname)?;
        let mut stream = tokio_openssl::SslStream::new(ssl, stream)?;
        Pin::new(&mut stream).connect().await?;

        let request_id = Uuid::new_v4();
        let outer = OuterRequest {
            request_id,
            request,
        };
        let mut line = serde_json::to_string(&outer)?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let bytes_read = reader.read_line(&mut response_line).await?;
        if bytes_read == 0 {
            return Err(MacError::Protocol(
                "the service closed the connection without responding".to_string(),
            ));
        }
        let outer: OuterResponse = serde_json::from_str(&response_line)?;
        if outer.request_id != request_id {
            return Err(MacError::Protocol(format!(
                "response for request {} arrived on a connection expecting {}",
                outer.request_id, request_id
            )));
        }

        Ok(outer.response)
    }

    // Every call shares the same timeout discipline: if the service doesn't
    // answer within `request_timeout`, the caller gets a retryable error.
    async fn roundtrip(&self, request: Request) -> Result<Response, MacError> {
        tokio::time::timeout(self.config.request_timeout, self.roundtrip_inner(request))
            .await
            .map_err(|_elapsed| MacError::Timeout)?
    }
}

impl MacService for MacClient {
    #[instrument(skip_all, fields(key_id = %self.config.key_id))]
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, MacError> {
        let request = Request::GenerateMac {
            key_id: self.config.key_id.clone(),
            message: Base64::encode_string(message),
        };
        match self.roundtrip(request).await? {
            Response::Mac { mac } => Base64::decode_vec(&mac)
                .map_err(|error| MacError::Protocol(format!("MAC is not valid base64: {error}"))),
            Response::Error { reason } => Err(MacError::Service(reason)),
            other => Err(MacError::Protocol(format!(
                "unexpected response to generate_mac: {other:?}"
            ))),
        }
    }

    #[instrument(skip_all, fields(key_id = %self.config.key_id))]
    async fn verify(&self, message: &[u8], mac: &[u8]) -> Result<bool, MacError> {
        let request = Request::VerifyMac {
            key_id: self.config.key_id.clone(),
            message: Base64::encode_string(message),
            mac: Base64::encode_string(mac),
        };
        match self.roundtrip(request).await? {
            Response::Verified { valid } => Ok(valid),
            Response::Error { reason } => Err(MacError::Service(reason)),
            other => Err(MacError::Protocol(format!(
                "unexpected response to verify_mac: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() -> anyhow::Result<()> {
        let outer = OuterRequest {
            request_id: Uuid::nil(),
            request: Request::GenerateMac {
                key_id: "confirmation-2024".to_string(),
                message: Base64::encode_string(b"user@example.com|1700000000"),
            },
        };
        let json = serde_json::to_string(&outer)?;
        assert!(json.contains("\"op\":\"generate_mac\""));
        assert!(json.contains("\"key_id\":\"confirmation-2024\""));

        Ok(())
    }

    #[test]
    fn response_deserialization() -> anyhow::Result<()> {
        let line = format!(
            "{{\"request_id\":\"{}\",\"status\":\"verified\",\"valid\":false}}",
            Uuid::nil()
        );
        let outer: OuterResponse = serde_json::from_str(&line)?;
        assert!(matches!(
            outer.response,
            Response::Verified { valid: false }
        ));

        let line = format!(
            "{{\"request_id\":\"{}\",\"status\":\"error\",\"reason\":\"unknown key\"}}",
            Uuid::nil()
        );
        let outer: OuterResponse = serde_json::from_str(&line)?;
        assert!(matches!(outer.response, Response::Error { .. }));

        Ok(())
    }
}
