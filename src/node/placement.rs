//! Key ownership strategies
//!
//! Every node computes ownership from its own ring view, so a strategy must be
//! a pure function of (key, member ids). Two nodes holding the same member
//! set always agree on the owner.

use crate::common::{hrw_order, slot_for, PlacementKind};
use crate::node::ring::NodeId;
use std::sync::Arc;

/// Maps a key onto one of the current members.
pub trait Placement: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Owner of `key`. `members` is non-empty and sorted ascending.
    fn pick(&self, key: &str, members: &[NodeId]) -> NodeId;
}

/// `members[hash(key) mod |members|]` over the sorted ids.
///
/// Cheap and matches how launchers pair ids with `id mod count`, but most
/// keys move whenever membership changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuloPlacement;

impl Placement for ModuloPlacement {
    fn name(&self) -> &'static str {
        "modulo"
    }

    fn pick(&self, key: &str, members: &[NodeId]) -> NodeId {
        members[slot_for(key, members.len())]
    }
}

/// Highest random weight: only keys owned by a departed node move.
#[derive(Debug, Default, Clone, Copy)]
pub struct RendezvousPlacement;

impl Placement for RendezvousPlacement {
    fn name(&self) -> &'static str {
        "rendezvous"
    }

    fn pick(&self, key: &str, members: &[NodeId]) -> NodeId {
        let raw: Vec<u64> = members.iter().map(|id| id.0).collect();
        NodeId(hrw_order(key, &raw)[0])
    }
}

pub fn placement_for(kind: PlacementKind) -> Arc<dyn Placement> {
    match kind {
        PlacementKind::Modulo => Arc::new(ModuloPlacement),
        PlacementKind::Rendezvous => Arc::new(RendezvousPlacement),
    }
}
