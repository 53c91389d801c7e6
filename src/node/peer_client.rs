//! HTTP client for the cluster listener of other nodes
//!
//! Every call has a bounded timeout. Connection failures and timeouts are
//! reported as [`Error::PeerUnreachable`]; a peer that answered, even with an
//! error status, is reachable.

use crate::common::{Error, Result, REQUEST_ID_HEADER};
use crate::node::protocol::*;
use crate::node::router::{KeyOp, Reply};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    forward_timeout: Duration,
    ping_timeout: Duration,
}

/// Error payload of a non-2xx peer reply
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl PeerClient {
    pub fn new(forward_timeout: Duration, ping_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(forward_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            forward_timeout,
            ping_timeout,
        })
    }

    /// Join handshake / membership reconciliation with the peer at `addr`.
    pub async fn sync(&self, addr: &str, request: &SyncRequest) -> Result<SyncResponse> {
        let (status, body) = self
            .send(
                self.http.post(url(addr, ENDPOINT_INTERNAL_JOIN)).json(request),
                addr,
                self.forward_timeout,
            )
            .await?;
        expect_success(addr, status, &body)?;
        decode(addr, &body)
    }

    pub async fn ping(&self, addr: &str) -> Result<PingResponse> {
        let (status, body) = self
            .send(
                self.http.get(url(addr, ENDPOINT_INTERNAL_PING)),
                addr,
                self.ping_timeout,
            )
            .await?;
        expect_success(addr, status, &body)?;
        decode(addr, &body)
    }

    /// Run `op` on the peer's local store.
    ///
    /// A missing key comes back as [`Error::NotFound`], exactly as it would
    /// from the local store.
    pub async fn forward(
        &self,
        addr: &str,
        op: &KeyOp,
        key: &str,
        request_id: Option<&str>,
    ) -> Result<Reply> {
        let builder = match op {
            KeyOp::Set { value } => self.http.post(url(addr, ENDPOINT_INTERNAL_SET)).json(&SetRequest {
                key: key.to_string(),
                value: value.clone(),
            }),
            KeyOp::Get => self.http.post(url(addr, ENDPOINT_INTERNAL_GET)).json(&KeyRequest {
                key: key.to_string(),
            }),
            KeyOp::Delete => self
                .http
                .post(url(addr, ENDPOINT_INTERNAL_DELETE))
                .json(&KeyRequest {
                    key: key.to_string(),
                }),
        };
        let builder = match request_id {
            Some(id) => builder.header(REQUEST_ID_HEADER, id),
            None => builder,
        };

        let (status, body) = self.send(builder, addr, self.forward_timeout).await?;

        match status {
            StatusCode::NOT_FOUND => return Err(Error::NotFound(key.to_string())),
            StatusCode::BAD_REQUEST => {
                return Err(Error::Validation(error_message(&body, "rejected by peer")))
            }
            _ => expect_success(addr, status, &body)?,
        }

        match op {
            KeyOp::Set { .. } => Ok(Reply::Stored),
            KeyOp::Delete => Ok(Reply::Deleted),
            KeyOp::Get => {
                let reply: GetResponse = decode(addr, &body)?;
                if reply.error {
                    Err(Error::NotFound(key.to_string()))
                } else {
                    Ok(Reply::Value(reply.value))
                }
            }
        }
    }

    /// Offer `key` to its new owner; the owner keeps any value it already
    /// has. Returns whether the offered value was stored.
    pub async fn handoff(&self, addr: &str, key: &str, value: &str) -> Result<bool> {
        let request = SetRequest {
            key: key.to_string(),
            value: value.to_string(),
        };
        let (status, body) = self
            .send(
                self.http.post(url(addr, ENDPOINT_INTERNAL_HANDOFF)).json(&request),
                addr,
                self.forward_timeout,
            )
            .await?;
        expect_success(addr, status, &body)?;
        let reply: HandoffResponse = decode(addr, &body)?;
        Ok(reply.accepted)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        addr: &str,
        timeout: Duration,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unreachable(addr, e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| unreachable(addr, e))?;
        Ok((status, body.to_vec()))
    }
}

fn url(addr: &str, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

fn unreachable(addr: &str, e: reqwest::Error) -> Error {
    let reason = if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("connect failed: {}", e)
    } else {
        e.to_string()
    };
    Error::PeerUnreachable {
        peer: addr.to_string(),
        reason,
    }
}

fn expect_success(addr: &str, status: StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(Error::Http(format!(
        "{} answered {}: {}",
        addr,
        status,
        error_message(body, "no details")
    )))
}

fn error_message(body: &[u8], fallback: &str) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| fallback.to_string())
}

fn decode<T: DeserializeOwned>(addr: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::Http(format!("bad reply from {}: {}", addr, e)))
}
