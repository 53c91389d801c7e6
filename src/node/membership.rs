//! Cluster membership
//!
//! Maintains this node's ring view. Nodes learn about each other through a
//! pairwise join handshake; whoever's view changed then announces it to the
//! rest of the ring, and a background probe loop evicts unreachable peers
//! and reconciles diverged views.
//!
//! Evicted ids are quarantined for `departed_ttl`: stale views arriving from
//! other peers cannot re-add them, but a direct handshake from the node
//! itself always can.

use crate::common::{Error, Metrics, Result};
use crate::node::peer_client::PeerClient;
use crate::node::placement::Placement;
use crate::node::protocol::{MembersResponse, PingResponse, SyncRequest, SyncResponse};
use crate::node::ring::{NodeId, RingEntry, RingSnapshot, RingTable};
use futures_util::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle of a node's membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipState {
    /// Empty ring, no key operation can be served
    Bootstrapping,
    /// In the ring, views may still be propagating
    Joined,
    /// View reconciled with at least one peer since joining
    Active,
}

impl fmt::Display for MembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipState::Bootstrapping => write!(f, "bootstrapping"),
            MembershipState::Joined => write!(f, "joined"),
            MembershipState::Active => write!(f, "active"),
        }
    }
}

pub struct MembershipManager {
    local: RingEntry,
    ring: RingTable,
    state: RwLock<MembershipState>,
    departed: Mutex<HashMap<NodeId, Instant>>,
    departed_ttl: Duration,
    peers: PeerClient,
    metrics: Arc<Metrics>,
    /// Bumped on every ring change
    changes: watch::Sender<u64>,
}

impl MembershipManager {
    pub fn new(
        local: RingEntry,
        placement: Arc<dyn Placement>,
        peers: PeerClient,
        departed_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            local,
            ring: RingTable::new(placement),
            state: RwLock::new(MembershipState::Bootstrapping),
            departed: Mutex::new(HashMap::new()),
            departed_ttl,
            peers,
            metrics,
            changes,
        }
    }

    pub fn local(&self) -> &RingEntry {
        &self.local
    }

    pub fn id(&self) -> NodeId {
        self.local.id
    }

    pub fn state(&self) -> MembershipState {
        *self.state.read().unwrap()
    }

    pub fn ring(&self) -> &RingTable {
        &self.ring
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.ring.snapshot()
    }

    /// Receiver that observes every ring change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn handle_ping(&self) -> PingResponse {
        PingResponse {
            error: false,
            id: self.id(),
            state: self.state(),
            members: self.ring.len(),
        }
    }

    pub fn members(&self) -> MembersResponse {
        MembersResponse {
            id: self.id(),
            state: self.state(),
            members: self.snapshot().into_entries(),
        }
    }

    /// Join the cluster that `peer_id`, reachable at `peer_addr`, belongs to.
    ///
    /// Performs the handshake, merges the peer's view, then announces the
    /// merged view to every other member before returning. Announce failures
    /// are logged only; the probe loop deals with dead peers.
    pub async fn handle_join(&self, peer_id: NodeId, peer_addr: &str) -> Result<()> {
        if peer_addr.trim().is_empty() {
            return Err(Error::Validation("peer address must not be empty".into()));
        }

        if peer_id == self.id() {
            // Forming a single-node cluster.
            if self.register_self() {
                self.on_change();
            }
            self.set_state(MembershipState::Active);
            info!("Node {} formed a cluster on its own", self.id());
            return Ok(());
        }

        let reply = self.peers.sync(peer_addr, &self.sync_request()).await?;
        if reply.from.id != peer_id {
            return Err(Error::Validation(format!(
                "node at {} reports id {}, expected {}",
                peer_addr, reply.from.id, peer_id
            )));
        }

        let mut changed = self.register_self();
        changed |= self.admit(reply.from);
        changed |= self.merge(reply.members);
        self.promote(MembershipState::Joined);

        info!(
            "Node {} joined via {} ({} members)",
            self.id(),
            peer_id,
            self.ring.len()
        );

        if changed {
            self.on_change();
            self.announce(Some(peer_id)).await;
        }
        self.promote(MembershipState::Active);
        Ok(())
    }

    /// Peer side of the handshake.
    ///
    /// Admits the sender, merges its view and answers with the merged view.
    /// Returns whether the local ring changed; the caller is expected to
    /// propagate the change without blocking the reply.
    pub fn handle_sync(&self, request: SyncRequest) -> (SyncResponse, bool) {
        let sender = request.from.id;
        let mut changed = self.register_self();
        changed |= self.admit(request.from);
        changed |= self.merge(request.members);
        self.promote(MembershipState::Joined);

        if changed {
            debug!("Ring changed after sync from node {}", sender);
            self.on_change();
        }

        let response = SyncResponse {
            from: self.local.clone(),
            members: self.snapshot().into_entries(),
        };
        (response, changed)
    }

    /// [`handle_sync`](Self::handle_sync), spawning the onward announce when
    /// the ring changed.
    pub fn handle_peer_join(self: &Arc<Self>, request: SyncRequest) -> SyncResponse {
        let sender = request.from.id;
        let (response, changed) = self.handle_sync(request);
        if changed {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.announce(Some(sender)).await });
        }
        response
    }

    /// Push the current view to every member except self and `exclude`,
    /// merging whatever they send back.
    pub async fn announce(&self, exclude: Option<NodeId>) {
        let request = self.sync_request();
        let targets: Vec<RingEntry> = self
            .snapshot()
            .into_entries()
            .into_iter()
            .filter(|e| e.id != self.id() && Some(e.id) != exclude)
            .collect();
        if targets.is_empty() {
            return;
        }

        let results = join_all(targets.iter().map(|target| {
            let request = &request;
            async move { (target, self.peers.sync(&target.address.cluster, request).await) }
        }))
        .await;

        let mut changed = false;
        for (target, result) in results {
            match result {
                Ok(reply) => {
                    changed |= self.admit(reply.from);
                    changed |= self.merge(reply.members);
                }
                Err(e) => warn!("Announce to node {} failed: {}", target.id, e),
            }
        }
        if changed {
            self.on_change();
        }
    }

    /// One round of failure detection and anti-entropy.
    ///
    /// Every peer is pinged concurrently. Unreachable peers are evicted; a
    /// peer whose ring size differs from ours gets a full sync.
    pub async fn probe_peers(&self) {
        let peers: Vec<RingEntry> = self
            .snapshot()
            .into_entries()
            .into_iter()
            .filter(|e| e.id != self.id())
            .collect();
        if peers.is_empty() {
            return;
        }

        let results = join_all(
            peers
                .iter()
                .map(|peer| async move { (peer, self.peers.ping(&peer.address.cluster).await) }),
        )
        .await;

        let local_len = self.ring.len();
        let mut diverged = Vec::new();
        for (peer, result) in results {
            match result {
                Ok(pong) if pong.id != peer.id => {
                    warn!(
                        "Node at {} answers as {}, evicting {}",
                        peer.address.cluster, pong.id, peer.id
                    );
                    self.evict(peer.id);
                }
                Ok(pong) if pong.members != local_len => diverged.push(peer),
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!("Probe of node {} failed: {}", peer.id, e);
                    self.evict(peer.id);
                }
                Err(e) => debug!("Probe of node {} returned {}", peer.id, e),
            }
        }

        if diverged.is_empty() {
            return;
        }
        let request = self.sync_request();
        let mut changed = false;
        for peer in diverged {
            match self.peers.sync(&peer.address.cluster, &request).await {
                Ok(reply) => {
                    changed |= self.admit(reply.from);
                    changed |= self.merge(reply.members);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Sync with node {} failed: {}", peer.id, e);
                    self.evict(peer.id);
                }
                Err(e) => debug!("Sync with node {} returned {}", peer.id, e),
            }
        }
        if changed {
            self.on_change();
        }
    }

    /// Ping one member; evicts it if unreachable.
    pub async fn check_peer(&self, peer: &RingEntry) -> Result<()> {
        match self.peers.ping(&peer.address.cluster).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_retryable() {
                    self.evict(peer.id);
                }
                Err(e)
            }
        }
    }

    /// Remove a member from the ring and quarantine its id.
    ///
    /// Returns false for self and for ids not in the ring.
    pub fn evict(&self, id: NodeId) -> bool {
        if id == self.id() {
            return false;
        }
        let ttl = self.departed_ttl;
        let mut departed = self.departed.lock().unwrap();
        departed.retain(|_, since| since.elapsed() < ttl);
        let removed = self.ring.remove(id);
        if removed.is_some() {
            departed.insert(id, Instant::now());
        }
        drop(departed);

        match removed {
            Some(entry) => {
                warn!(
                    "Evicted node {} ({}) from ring, {} members left",
                    id,
                    entry.address.cluster,
                    self.ring.len()
                );
                self.metrics.evictions_total.inc();
                self.on_change();
                true
            }
            None => false,
        }
    }

    /// Background loop running [`probe_peers`](Self::probe_peers) with jitter.
    pub async fn run_probe_loop(self: Arc<Self>, interval: Duration) {
        info!("Probe loop started (interval {:?})", interval);
        loop {
            let jitter = rand::thread_rng().gen_range(0..=interval.as_millis() as u64 / 4);
            tokio::time::sleep(interval + Duration::from_millis(jitter)).await;
            self.probe_peers().await;
        }
    }

    fn sync_request(&self) -> SyncRequest {
        let mut members = self.snapshot().into_entries();
        if !members.iter().any(|e| e.id == self.id()) {
            members.push(self.local.clone());
        }
        SyncRequest {
            from: self.local.clone(),
            members,
        }
    }

    fn register_self(&self) -> bool {
        self.ring.upsert(self.local.clone())
    }

    /// Add a node that contacted us (or answered us) directly.
    fn admit(&self, entry: RingEntry) -> bool {
        if entry.id == self.id() {
            return false;
        }
        self.departed.lock().unwrap().remove(&entry.id);
        let id = entry.id;
        let cluster = entry.address.cluster.clone();
        let changed = self.ring.upsert(entry);
        if changed {
            info!("Node {} at {} added to ring", id, cluster);
        }
        changed
    }

    /// Union a remote view into the ring, skipping self and quarantined ids.
    fn merge(&self, members: Vec<RingEntry>) -> bool {
        let mut changed = false;
        for entry in members {
            if entry.id == self.id() || self.is_departed(entry.id) {
                continue;
            }
            let id = entry.id;
            if self.ring.upsert(entry) {
                debug!("Learned about node {} from a peer view", id);
                changed = true;
            }
        }
        changed
    }

    fn is_departed(&self, id: NodeId) -> bool {
        let mut departed = self.departed.lock().unwrap();
        match departed.get(&id) {
            Some(since) if since.elapsed() < self.departed_ttl => true,
            Some(_) => {
                departed.remove(&id);
                false
            }
            None => false,
        }
    }

    fn set_state(&self, state: MembershipState) {
        let mut current = self.state.write().unwrap();
        if *current != state {
            info!("Node {} membership {} -> {}", self.id(), *current, state);
            *current = state;
        }
    }

    /// Move forward only: Bootstrapping < Joined < Active.
    fn promote(&self, state: MembershipState) {
        let current = self.state();
        let rank = |s: MembershipState| match s {
            MembershipState::Bootstrapping => 0,
            MembershipState::Joined => 1,
            MembershipState::Active => 2,
        };
        if rank(state) > rank(current) {
            self.set_state(state);
        }
    }

    fn on_change(&self) {
        self.metrics.ring_members.set(self.ring.len() as u64);
        self.changes.send_modify(|epoch| *epoch += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::placement::ModuloPlacement;

    fn entry(id: u64) -> RingEntry {
        RingEntry::new(id, "127.0.0.1:1", "127.0.0.1:1")
    }

    fn manager(id: u64, ttl: Duration) -> MembershipManager {
        let peers =
            PeerClient::new(Duration::from_millis(200), Duration::from_millis(100)).unwrap();
        MembershipManager::new(
            entry(id),
            Arc::new(ModuloPlacement),
            peers,
            ttl,
            Arc::new(Metrics::new()),
        )
    }

    fn sync_from(id: u64, members: &[u64]) -> SyncRequest {
        SyncRequest {
            from: entry(id),
            members: members.iter().map(|m| entry(*m)).collect(),
        }
    }

    #[test]
    fn test_starts_bootstrapping_with_empty_ring() {
        let m = manager(1, Duration::from_secs(30));
        assert_eq!(m.state(), MembershipState::Bootstrapping);
        assert!(m.snapshot().is_empty());
    }

    #[test]
    fn test_sync_registers_self_and_sender() {
        let m = manager(1, Duration::from_secs(30));
        let (response, changed) = m.handle_sync(sync_from(2, &[2, 3]));
        assert!(changed);
        assert_eq!(m.state(), MembershipState::Joined);
        assert_eq!(
            m.snapshot().ids(),
            vec![NodeId(1), NodeId(2), NodeId(3)]
        );
        assert_eq!(response.from.id, NodeId(1));
        assert_eq!(response.members.len(), 3);
    }

    #[test]
    fn test_repeated_sync_is_idempotent() {
        let m = manager(1, Duration::from_secs(30));
        m.handle_sync(sync_from(2, &[2]));
        let (_, changed) = m.handle_sync(sync_from(2, &[1, 2]));
        assert!(!changed);
        assert_eq!(m.ring().len(), 2);
    }

    #[test]
    fn test_self_never_evicted() {
        let m = manager(1, Duration::from_secs(30));
        m.handle_sync(sync_from(2, &[]));
        assert!(!m.evict(NodeId(1)));
        assert!(m.ring().contains(NodeId(1)));
    }

    #[test]
    fn test_evicted_peer_not_readded_by_stale_view() {
        let m = manager(1, Duration::from_secs(30));
        m.handle_sync(sync_from(2, &[3]));
        assert!(m.evict(NodeId(3)));
        assert!(!m.evict(NodeId(3)));

        // node 2 still believes in 3
        m.handle_sync(sync_from(2, &[1, 2, 3]));
        assert!(!m.ring().contains(NodeId(3)));

        // 3 itself comes back
        m.handle_sync(sync_from(3, &[3]));
        assert!(m.ring().contains(NodeId(3)));
    }

    #[test]
    fn test_evicting_unknown_id_leaves_no_quarantine() {
        let m = manager(1, Duration::from_secs(30));
        m.handle_sync(sync_from(2, &[]));
        for id in 10..20 {
            assert!(!m.evict(NodeId(id)));
        }
        assert!(m.departed.lock().unwrap().is_empty());

        assert!(m.evict(NodeId(2)));
        assert_eq!(m.departed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_expired_quarantine_pruned_on_evict() {
        let m = manager(1, Duration::ZERO);
        m.handle_sync(sync_from(2, &[3]));
        assert!(m.evict(NodeId(2)));
        assert!(m.evict(NodeId(3)));
        let departed = m.departed.lock().unwrap();
        assert_eq!(departed.len(), 1);
        assert!(departed.contains_key(&NodeId(3)));
    }

    #[test]
    fn test_quarantine_expires() {
        let m = manager(1, Duration::ZERO);
        m.handle_sync(sync_from(2, &[3]));
        m.evict(NodeId(3));
        m.handle_sync(sync_from(2, &[3]));
        assert!(m.ring().contains(NodeId(3)));
    }

    #[test]
    fn test_changes_are_observable() {
        let m = manager(1, Duration::from_secs(30));
        let rx = m.subscribe();
        let before = *rx.borrow();
        m.handle_sync(sync_from(2, &[]));
        assert!(*rx.borrow() > before);
    }

    #[tokio::test]
    async fn test_join_self_forms_single_node_ring() {
        let m = manager(4, Duration::from_secs(30));
        m.handle_join(NodeId(4), "127.0.0.1:1").await.unwrap();
        assert_eq!(m.snapshot().ids(), vec![NodeId(4)]);
        assert_eq!(m.state(), MembershipState::Active);
    }

    #[tokio::test]
    async fn test_join_unreachable_peer_fails() {
        let m = manager(1, Duration::from_secs(30));
        let err = m.handle_join(NodeId(2), "127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable { .. }));
        assert_eq!(m.state(), MembershipState::Bootstrapping);
        assert!(m.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_join_rejects_empty_address() {
        let m = manager(1, Duration::from_secs(30));
        assert!(matches!(
            m.handle_join(NodeId(2), " ").await,
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_ping_reports_state() {
        let m = manager(7, Duration::from_secs(30));
        let pong = m.handle_ping();
        assert_eq!(pong.id, NodeId(7));
        assert_eq!(pong.members, 0);
        assert_eq!(pong.state, MembershipState::Bootstrapping);
    }
}
