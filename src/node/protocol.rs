//! Node wire protocol
//!
//! Endpoint paths and the JSON bodies exchanged with clients and between
//! peers. Every response carries an `error` flag; `message` is filled in
//! only when something went wrong.

use crate::node::membership::MembershipState;
use crate::node::ring::{NodeId, RingEntry};
use serde::{Deserialize, Serialize};

// --- Client API ---

pub const ENDPOINT_JOIN: &str = "/join";
pub const ENDPOINT_PING: &str = "/ping";
pub const ENDPOINT_SET: &str = "/set";
pub const ENDPOINT_GET: &str = "/get";
pub const ENDPOINT_DELETE: &str = "/delete";
/// Which node owns a key
pub const ENDPOINT_FIND: &str = "/find";
/// Local ring view
pub const ENDPOINT_MEMBERS: &str = "/members";
pub const ENDPOINT_METRICS: &str = "/metrics";

// --- Cluster API (peer traffic) ---

/// Join handshake and membership reconciliation
pub const ENDPOINT_INTERNAL_JOIN: &str = "/internal/join";
pub const ENDPOINT_INTERNAL_PING: &str = "/internal/ping";
/// Forwarded operations, served from the local store without routing
pub const ENDPOINT_INTERNAL_SET: &str = "/internal/set";
pub const ENDPOINT_INTERNAL_GET: &str = "/internal/get";
pub const ENDPOINT_INTERNAL_DELETE: &str = "/internal/delete";
/// Put-if-absent used when a former owner hands a key over
pub const ENDPOINT_INTERNAL_HANDOFF: &str = "/internal/handoff";
pub const ENDPOINT_INTERNAL_MEMBERS: &str = "/internal/members";

/// `POST /join`: join the cluster that `id` at `address` (its cluster listener) belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: NodeId,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
}

/// Body of `/get`, `/delete` and `/find`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            error: false,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub value: String,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GetResponse {
    pub fn found(value: String) -> Self {
        Self {
            value,
            error: false,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            value: String::new(),
            error: true,
            message: Some(message.into()),
        }
    }
}

/// Reply to `/internal/handoff`. `accepted` is false when the owner kept
/// its own value or had the key deleted recently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffResponse {
    pub error: bool,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub error: bool,
    pub id: NodeId,
    pub state: MembershipState,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindResponse {
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    /// Owner's cluster address
    #[serde(default)]
    pub address: String,
    /// Owner's client API address
    #[serde(default)]
    pub api_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersResponse {
    pub id: NodeId,
    pub state: MembershipState,
    pub members: Vec<RingEntry>,
}

/// Join handshake / reconciliation message.
///
/// The sender announces itself and its current view; the receiver answers
/// with its own entry and its view after merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from: RingEntry,
    pub members: Vec<RingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub from: RingEntry,
    pub members: Vec<RingEntry>,
}
