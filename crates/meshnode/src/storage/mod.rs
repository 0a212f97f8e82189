//! Datastore abstraction for the peer registry.
//!
//! The registry, chain counter and access log talk to a [`Backend`]. Redis is
//! the production store; the in-memory store backs tests and single-node
//! setups (`storage = "memory"`).

mod memory;
mod redis_store;

pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use mesh_common::{AccessErrorEntry, ChainState, Cluster, MeshResult};

/// Fields refreshed when a known peer is seen again
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterUpdate {
    /// Always written
    pub last_connect: i64,
    /// Written only when the peer announced an id
    pub skynet_id: Option<String>,
    pub ip: Option<String>,
    pub version: Option<String>,
}

impl ClusterUpdate {
    pub(crate) fn apply(&self, row: &mut Cluster) {
        row.last_connect = self.last_connect;
        if let Some(id) = &self.skynet_id {
            row.skynet_id = id.clone();
        }
        if let Some(ip) = &self.ip {
            row.ip = ip.clone();
        }
        if let Some(version) = &self.version {
            row.version = version.clone();
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for status output
    fn name(&self) -> &'static str;

    /// Connectivity check
    async fn ping(&self) -> MeshResult<()>;

    /// Row whose url matches exactly
    async fn get_cluster(&self, url: &str) -> MeshResult<Option<Cluster>>;

    /// Insert a new row; returns the assigned id
    async fn insert_cluster(&self, cluster: &Cluster) -> MeshResult<u64>;

    /// Update the row matching `url`; false if there is none
    async fn update_cluster(&self, url: &str, update: &ClusterUpdate) -> MeshResult<bool>;

    /// Delete the row matching `url`; false if there is none
    async fn delete_cluster(&self, url: &str) -> MeshResult<bool>;

    /// Every row in storage order
    async fn list_clusters(&self) -> MeshResult<Vec<Cluster>>;

    async fn count_clusters(&self) -> MeshResult<u64>;

    async fn block_url(&self, url: &str) -> MeshResult<()>;

    async fn is_blocked(&self, url: &str) -> MeshResult<bool>;

    async fn list_blocked(&self) -> MeshResult<Vec<String>>;

    async fn load_chain(&self) -> MeshResult<ChainState>;

    async fn save_chain(&self, state: ChainState) -> MeshResult<()>;

    async fn log_access_error(&self, entry: &AccessErrorEntry) -> MeshResult<()>;

    /// Newest first
    async fn access_errors(&self, limit: usize) -> MeshResult<Vec<AccessErrorEntry>>;
}

/// Storage selected in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Redis,
    Memory,
}

/// Open the configured backend
pub async fn open(kind: StorageKind, redis_url: &str) -> MeshResult<Arc<dyn Backend>> {
    match kind {
        StorageKind::Redis => Ok(Arc::new(RedisBackend::connect(redis_url).await?)),
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage (peers are lost on restart)");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
