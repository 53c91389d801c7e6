//! Common utilities and types shared across ringkv

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod tracing_middleware;

pub use config::{NodeConfig, PlacementKind, DEFAULT_CONFIG_FILE};
pub use error::{Error, Result};
pub use hash::{hash64, hrw_order, hrw_weight, slot_for};
pub use metrics::Metrics;
pub use tracing_middleware::{request_tracing_middleware, RequestId, REQUEST_ID_HEADER};
