//! Peer bookkeeping.
//!
//! - Registry of known peers (datastore backed)
//! - Propagation chain carried between nodes
//! - Node header and chain counter

mod chain;
pub mod header;
mod registry;
mod urls_chain;

pub use chain::ChainCounter;
pub use registry::ClustersRegistry;
pub use urls_chain::ClustersUrlsChain;
