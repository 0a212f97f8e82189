//! # Mesh Common
//!
//! Shared types, wire constants, and errors used across meshnode components.
//!
//! ## Modules
//! - `types` - Core data structures (Cluster, ClusterHeader, ChainState, FieldValue, etc.)
//! - `error` - Common error types
//! - `constants` - Wire field names, storage keys, defaults

pub mod constants;
pub mod error;
pub mod types;

pub use error::{MeshError, MeshResult};
pub use types::*;
