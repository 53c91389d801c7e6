//! # ringkv
//!
//! A clustered in-memory key-value store without a central coordinator:
//! - Every node holds its own view of the ring and converges with its peers
//!   through a join handshake and periodic probing
//! - Each key has exactly one owner, computed from the sorted member ids
//! - Any node accepts any request and forwards it to the owner
//! - Unreachable peers are evicted and their keys fail over
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!        client                      client
//!          │ /set /get /delete         │
//!   ┌──────▼──────┐  /internal/*  ┌────▼────────┐
//!   │   Node 1    │◄─────────────►│   Node 2    │
//!   │ ring: 1,2,3 │               │ ring: 1,2,3 │
//!   └──────▲──────┘               └────▲────────┘
//!          │        /internal/*        │
//!          └──────────►┌────────────┐◄─┘
//!                      │   Node 3   │
//!                      └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start nodes
//! ```bash
//! ringkv-node serve --id 1 --api 0.0.0.0:8001 --cluster 0.0.0.0:9001
//! ringkv-node serve --id 2 --api 0.0.0.0:8002 --cluster 0.0.0.0:9002
//! ```
//!
//! ### Form the cluster and use it
//! ```bash
//! ringkv --node http://localhost:8002 join 1 127.0.0.1:9001
//! ringkv --node http://localhost:8001 set 3 abc
//! ringkv --node http://localhost:8002 get 3
//! ```

pub mod common;
pub mod node;

// Re-export commonly used types
pub use common::{Error, NodeConfig, Result};
pub use node::{NodeId, NodeServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
