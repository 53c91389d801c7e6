//! Request routing
//!
//! Each key operation is resolved against one ring snapshot: served from the
//! local store when this node owns the key, forwarded to the owner's cluster
//! listener otherwise. An owner that cannot be reached is evicted and, if
//! enabled, the operation is retried once against the owner recomputed from
//! the shrunken ring.

use crate::common::{Metrics, Result};
use crate::node::keystore::{validate_key, KeyStore};
use crate::node::membership::MembershipManager;
use crate::node::peer_client::PeerClient;
use crate::node::ring::{RingEntry, RingSnapshot};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Key operation, independent of where it executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOp {
    Set { value: String },
    Get,
    Delete,
}

impl KeyOp {
    pub fn name(&self) -> &'static str {
        match self {
            KeyOp::Set { .. } => "set",
            KeyOp::Get => "get",
            KeyOp::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stored,
    Value(String),
    Deleted,
}

pub struct Router {
    membership: Arc<MembershipManager>,
    store: Arc<KeyStore>,
    peers: PeerClient,
    metrics: Arc<Metrics>,
    retry_on_failover: bool,
    probe_before_forward: bool,
}

impl Router {
    pub fn new(
        membership: Arc<MembershipManager>,
        store: Arc<KeyStore>,
        peers: PeerClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            membership,
            store,
            peers,
            metrics,
            retry_on_failover: true,
            probe_before_forward: false,
        }
    }

    pub fn with_retry_on_failover(mut self, enabled: bool) -> Self {
        self.retry_on_failover = enabled;
        self
    }

    pub fn with_probe_before_forward(mut self, enabled: bool) -> Self {
        self.probe_before_forward = enabled;
        self
    }

    /// Owner of `key` under the current ring.
    pub fn locate(&self, key: &str) -> Result<RingEntry> {
        validate_key(key)?;
        self.membership.snapshot().owner_of(key).cloned()
    }

    /// Execute `op` on the owner of `key`.
    pub async fn route(&self, op: KeyOp, key: &str, request_id: Option<&str>) -> Result<Reply> {
        validate_key(key)?;

        let snapshot = self.membership.snapshot();
        match self.route_once(&snapshot, &op, key, request_id).await {
            Err(e) if e.is_retryable() && self.retry_on_failover => {
                let retry = self.membership.snapshot();
                info!(
                    "Retrying {} of {:?} after failover ({} members left): {}",
                    op.name(),
                    key,
                    retry.len(),
                    e
                );
                self.route_once(&retry, &op, key, request_id).await
            }
            other => other,
        }
    }

    async fn route_once(
        &self,
        snapshot: &RingSnapshot,
        op: &KeyOp,
        key: &str,
        request_id: Option<&str>,
    ) -> Result<Reply> {
        let owner = snapshot.owner_of(key)?;
        if owner.id == self.membership.id() {
            debug!("{} {:?} served locally", op.name(), key);
            return self.apply_local(op, key);
        }

        if self.probe_before_forward {
            self.membership.check_peer(owner).await?;
        }

        debug!("{} {:?} forwarded to node {}", op.name(), key, owner.id);
        self.metrics.forwards_total.inc();
        match self
            .peers
            .forward(&owner.address.cluster, op, key, request_id)
            .await
        {
            Err(e) if e.is_retryable() => {
                self.metrics.forward_failures.inc();
                warn!("Forward to node {} failed: {}", owner.id, e);
                self.membership.evict(owner.id);
                Err(e)
            }
            other => other,
        }
    }

    /// Execute `op` against the local store, without routing.
    pub fn apply_local(&self, op: &KeyOp, key: &str) -> Result<Reply> {
        let reply = match op {
            KeyOp::Set { value } => self.store.set(key, value.as_str()).map(|_| Reply::Stored),
            KeyOp::Get => self.store.get(key).map(Reply::Value),
            KeyOp::Delete => self.store.delete(key).map(|_| Reply::Deleted),
        };
        self.metrics.local_keys.set(self.store.len() as u64);
        reply
    }

    /// Receiving side of a handoff: store `value` unless this node already
    /// holds the key or deleted it recently.
    pub fn accept_handoff(&self, key: &str, value: &str) -> Result<bool> {
        let accepted = self.store.insert_if_absent(key, value)?;
        if accepted {
            self.metrics.local_keys.set(self.store.len() as u64);
        } else {
            debug!("Handoff of {:?} ignored, newer state held locally", key);
        }
        Ok(accepted)
    }

    /// Push keys this node no longer owns to their new owners.
    ///
    /// The owner keeps whatever it already has for the key, so a stale copy
    /// never overwrites a newer write or revives a delete. Once the owner
    /// answered, the local copy is dropped unless it was overwritten in the
    /// meantime. Returns the number of keys moved.
    pub async fn handoff(&self) -> usize {
        let snapshot = self.membership.snapshot();
        if snapshot.is_empty() {
            return 0;
        }

        let mut moved = 0;
        for (key, value) in self.store.entries() {
            let owner = match snapshot.owner_of(&key) {
                Ok(owner) => owner,
                Err(_) => return moved,
            };
            if owner.id == self.membership.id() {
                continue;
            }

            match self.peers.handoff(&owner.address.cluster, &key, &value).await {
                Ok(accepted) => {
                    if !accepted {
                        debug!("Node {} already had newer state for {:?}", owner.id, key);
                    }
                    if self.store.remove_if(&key, &value) {
                        moved += 1;
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!("Handoff to node {} failed: {}", owner.id, e);
                    self.membership.evict(owner.id);
                    // the watcher runs again for the eviction
                    break;
                }
                Err(e) => warn!("Handoff of {:?} to node {} failed: {}", key, owner.id, e),
            }
        }

        if moved > 0 {
            self.metrics.handoff_keys_total.add(moved as u64);
            self.metrics.local_keys.set(self.store.len() as u64);
            info!("Handed off {} keys after ring change", moved);
        }
        moved
    }

    /// Run [`handoff`](Self::handoff) after every ring change.
    pub async fn run_handoff_loop(self: Arc<Self>, mut changes: watch::Receiver<u64>) {
        while changes.changed().await.is_ok() {
            self.handoff().await;
        }
    }
}
