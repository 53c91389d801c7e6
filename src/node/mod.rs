//! Cluster node: membership, key ownership and request routing

pub mod http;
pub mod keystore;
pub mod membership;
pub mod peer_client;
pub mod placement;
pub mod protocol;
pub mod ring;
pub mod router;
pub mod server;

pub use http::{NodeService, Operation};
pub use keystore::KeyStore;
pub use membership::{MembershipManager, MembershipState};
pub use peer_client::PeerClient;
pub use placement::{placement_for, ModuloPlacement, Placement, RendezvousPlacement};
pub use ring::{NodeAddress, NodeId, RingEntry, RingSnapshot, RingTable};
pub use router::{KeyOp, Reply, Router};
pub use server::NodeServer;
