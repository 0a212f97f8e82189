//! In-memory backend.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use mesh_common::constants::ACCESS_ERRORS_CAP;
use mesh_common::{AccessErrorEntry, ChainState, Cluster, MeshResult};

use super::{Backend, ClusterUpdate};

#[derive(Default)]
struct Inner {
    clusters: Vec<Cluster>,
    next_id: u64,
    blocked: Vec<String>,
    chain: ChainState,
    access_errors: VecDeque<AccessErrorEntry>,
}

/// Process-local store; rows keep insertion order
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> MeshResult<()> {
        Ok(())
    }

    async fn get_cluster(&self, url: &str) -> MeshResult<Option<Cluster>> {
        let inner = self.inner.read().await;
        Ok(inner.clusters.iter().find(|c| c.url == url).cloned())
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> MeshResult<u64> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;

        let mut row = cluster.clone();
        row.id = Some(id);
        row.header = None;
        inner.clusters.push(row);
        Ok(id)
    }

    async fn update_cluster(&self, url: &str, update: &ClusterUpdate) -> MeshResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.clusters.iter_mut().find(|c| c.url == url) {
            Some(row) => {
                update.apply(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_cluster(&self, url: &str) -> MeshResult<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.clusters.len();
        inner.clusters.retain(|c| c.url != url);
        Ok(inner.clusters.len() != before)
    }

    async fn list_clusters(&self) -> MeshResult<Vec<Cluster>> {
        Ok(self.inner.read().await.clusters.clone())
    }

    async fn count_clusters(&self) -> MeshResult<u64> {
        Ok(self.inner.read().await.clusters.len() as u64)
    }

    async fn block_url(&self, url: &str) -> MeshResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.blocked.iter().any(|u| u == url) {
            inner.blocked.push(url.to_string());
        }
        Ok(())
    }

    async fn is_blocked(&self, url: &str) -> MeshResult<bool> {
        Ok(self.inner.read().await.blocked.iter().any(|u| u == url))
    }

    async fn list_blocked(&self) -> MeshResult<Vec<String>> {
        Ok(self.inner.read().await.blocked.clone())
    }

    async fn load_chain(&self) -> MeshResult<ChainState> {
        Ok(self.inner.read().await.chain)
    }

    async fn save_chain(&self, state: ChainState) -> MeshResult<()> {
        self.inner.write().await.chain = state;
        Ok(())
    }

    async fn log_access_error(&self, entry: &AccessErrorEntry) -> MeshResult<()> {
        let mut inner = self.inner.write().await;
        inner.access_errors.push_front(entry.clone());
        inner.access_errors.truncate(ACCESS_ERRORS_CAP as usize);
        Ok(())
    }

    async fn access_errors(&self, limit: usize) -> MeshResult<Vec<AccessErrorEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.access_errors.iter().take(limit).cloned().collect())
    }
}
