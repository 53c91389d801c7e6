//! Ring table: cluster membership as seen by one node
//!
//! An id-keyed table of [`RingEntry`] guarded by a single `RwLock`. Routing
//! never reads the live table twice for one request: it takes a
//! [`RingSnapshot`] and computes the owner from that.

use crate::common::{Error, Result};
use crate::node::placement::Placement;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Cluster-unique node identifier, assigned by the launcher.
///
/// Carried on the wire as a decimal string (`"3"`); plain numbers are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(NodeId)
            .map_err(|_| Error::Validation(format!("invalid node id: {:?}", s)))
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(NodeId(n)),
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Where a node can be reached. Fixed for the lifetime of the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Client-facing API (`host:port`)
    pub api: String,
    /// Internal cluster listener (`host:port`)
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingEntry {
    pub id: NodeId,
    pub address: NodeAddress,
}

impl RingEntry {
    pub fn new(id: impl Into<NodeId>, api: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: NodeAddress {
                api: api.into(),
                cluster: cluster.into(),
            },
        }
    }
}

/// Immutable view of the ring at one instant.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    entries: Vec<RingEntry>,
    placement: Arc<dyn Placement>,
}

impl RingSnapshot {
    /// Entries sorted by id
    pub fn entries(&self) -> &[RingEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RingEntry> {
        self.entries
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn get(&self, id: NodeId) -> Option<&RingEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owner of `key` in this snapshot.
    pub fn owner_of(&self, key: &str) -> Result<&RingEntry> {
        if self.entries.is_empty() {
            return Err(Error::EmptyRing);
        }
        let owner = self.placement.pick(key, &self.ids());
        self.get(owner)
            .ok_or_else(|| Error::Internal(format!("placement picked non-member {}", owner)))
    }
}

/// Live membership table
#[derive(Debug)]
pub struct RingTable {
    members: RwLock<BTreeMap<NodeId, RingEntry>>,
    placement: Arc<dyn Placement>,
}

impl RingTable {
    pub fn new(placement: Arc<dyn Placement>) -> Self {
        Self {
            members: RwLock::new(BTreeMap::new()),
            placement,
        }
    }

    pub fn placement(&self) -> &dyn Placement {
        self.placement.as_ref()
    }

    /// Insert or update an entry. Returns true if the table changed.
    pub fn upsert(&self, entry: RingEntry) -> bool {
        let mut members = self.members.write().unwrap();
        match members.get(&entry.id) {
            Some(existing) if *existing == entry => false,
            _ => {
                members.insert(entry.id, entry);
                true
            }
        }
    }

    /// Remove an entry, if present.
    pub fn remove(&self, id: NodeId) -> Option<RingEntry> {
        self.members.write().unwrap().remove(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<RingEntry> {
        self.members.read().unwrap().get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.read().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().unwrap().is_empty()
    }

    pub fn snapshot(&self) -> RingSnapshot {
        let members = self.members.read().unwrap();
        RingSnapshot {
            entries: members.values().cloned().collect(),
            placement: self.placement.clone(),
        }
    }

    /// Owner of `key` under the current membership.
    pub fn owner_of(&self, key: &str) -> Result<NodeId> {
        self.snapshot().owner_of(key).map(|e| e.id)
    }
}
