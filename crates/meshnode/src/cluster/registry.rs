//! Persisted peer list.
//!
//! Storage errors stop here: they are recorded in [`Diagnostics`] and the
//! operation degrades to `false`, empty or `None`.

use base64::{Engine, engine::general_purpose::STANDARD};

use mesh_common::constants::CHAIN_SEPARATOR;
use mesh_common::{Cluster, ClusterHeader};

use crate::diagnostics::Diagnostics;
use crate::identity::NodeIdentity;
use crate::storage::{Backend, ClusterUpdate};

const STATE_CODE: &str = "CLUSTERS_DB";

pub struct ClustersRegistry<'a> {
    backend: &'a dyn Backend,
    node: &'a NodeIdentity,
    diag: &'a Diagnostics,
    clock: Option<i64>,
}

impl<'a> ClustersRegistry<'a> {
    pub fn new(backend: &'a dyn Backend, node: &'a NodeIdentity, diag: &'a Diagnostics) -> Self {
        Self {
            backend,
            node,
            diag,
            clock: None,
        }
    }

    /// Pin "now" for last_connect (tests, replays)
    pub fn at(mut self, timestamp: i64) -> Self {
        self.clock = Some(timestamp);
        self
    }

    fn now(&self) -> i64 {
        self.clock.unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    /// Merge the peer list the cluster carries, then upsert the cluster itself
    pub async fn add(&self, cluster: &Cluster) -> bool {
        if let Some(header) = cluster.header.as_ref().filter(|h| !h.clusters.is_empty()) {
            self.merge_from_header(header).await;
        }
        self.upsert(cluster).await
    }

    /// Upsert every peer listed in `header.clusters`, except ourselves.
    ///
    /// Returns how many rows were inserted or refreshed.
    pub async fn merge_from_header(&self, header: &ClusterHeader) -> usize {
        let mut merged = 0;
        for entry in header.clusters.split(CHAIN_SEPARATOR).filter(|e| !e.is_empty()) {
            let url = match STANDARD.decode(entry).map(String::from_utf8) {
                Ok(Ok(url)) => url,
                _ => {
                    self.diag.error("CLUSTERS_MERGE", format!("Undecodable peer entry: {entry}"));
                    continue;
                }
            };
            if self.node.is_myself(&url) {
                continue;
            }

            let mut peer = Cluster::new(url);
            peer.registrator = header.url.clone();
            if self.upsert(&peer).await {
                merged += 1;
            }
        }
        merged
    }

    /// Insert or refresh one peer. False when rejected or on storage failure.
    pub async fn upsert(&self, cluster: &Cluster) -> bool {
        let candidate = cluster.lookup_url();
        let key = self.node.strip_scheme(candidate);

        if key.is_empty() || key == self.node.url || !candidate.contains('/') {
            return false;
        }

        match self.backend.is_blocked(key).await {
            Ok(true) => {
                self.diag.state(STATE_CODE, format!("CLUSTER [{key}] IS BLOCKED"));
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                self.diag.failure("check blocked", &e);
                return false;
            }
        }

        match self.backend.get_cluster(key).await {
            Ok(Some(_)) => self.update(key, cluster).await,
            Ok(None) => self.insert(key, cluster).await,
            Err(e) => {
                self.diag.failure("find cluster", &e);
                false
            }
        }
    }

    /// Refresh a known row. last_connect is always written; id, ip and
    /// version only when the header carries an id.
    pub async fn update(&self, key: &str, cluster: &Cluster) -> bool {
        let mut update = ClusterUpdate {
            last_connect: self.now(),
            ..Default::default()
        };
        if let Some(header) = cluster.header.as_ref().filter(|h| !h.id.is_empty()) {
            update.skynet_id = Some(header.id.clone());
            update.ip = Some(header.ip.clone());
            update.version = Some(header.version.clone());
        }

        match self.backend.update_cluster(key, &update).await {
            Ok(updated) => {
                if updated {
                    self.diag.state(STATE_CODE, format!("CLUSTER [{key}] UPDATED IN DB"));
                }
                updated
            }
            Err(e) => {
                self.diag.failure("update cluster", &e);
                false
            }
        }
    }

    /// Store a new row for `key`
    pub async fn insert(&self, key: &str, cluster: &Cluster) -> bool {
        let header = cluster.header.as_ref();
        let row = Cluster {
            id: None,
            skynet_id: header.map(|h| h.id.clone()).unwrap_or_default(),
            url: key.to_string(),
            ip: header.map(|h| h.ip.clone()).unwrap_or_else(|| cluster.ip.clone()),
            version: header
                .map(|h| h.version.clone())
                .unwrap_or_else(|| cluster.version.clone()),
            last_connect: self.now(),
            registrator: match header {
                Some(h) if !h.url.is_empty() => h.url.clone(),
                _ => cluster.registrator.clone(),
            },
            header: None,
        };

        match self.backend.insert_cluster(&row).await {
            Ok(id) => {
                tracing::info!(url = %key, id = id, "New cluster stored");
                self.diag.state(STATE_CODE, format!("CLUSTER [{key}] ADDED TO DB"));
                true
            }
            Err(e) => {
                self.diag.failure("insert cluster", &e);
                false
            }
        }
    }

    /// Every stored peer, storage order
    pub async fn get_all(&self) -> Vec<Cluster> {
        self.backend.list_clusters().await.unwrap_or_else(|e| {
            self.diag.failure("list clusters", &e);
            Vec::new()
        })
    }

    pub async fn count_clusters(&self) -> Option<u64> {
        match self.backend.count_clusters().await {
            Ok(n) => Some(n),
            Err(e) => {
                self.diag.failure("count clusters", &e);
                None
            }
        }
    }

    /// Delete the row whose url matches exactly
    pub async fn remove(&self, cluster: &Cluster) -> bool {
        match self.backend.delete_cluster(&cluster.url).await {
            Ok(removed) => {
                if removed {
                    self.diag
                        .state(STATE_CODE, format!("CLUSTER [{}] DELETED FROM DB", cluster.url));
                }
                removed
            }
            Err(e) => {
                self.diag.failure("delete cluster", &e);
                false
            }
        }
    }

    /// Remove the peer and keep it from being added again
    pub async fn block(&self, cluster: &Cluster) -> bool {
        let url = self.node.strip_scheme(&cluster.url).to_string();
        if url.is_empty() {
            return false;
        }

        let target = Cluster::new(url.clone());
        self.remove(&target).await;

        match self.backend.block_url(&url).await {
            Ok(()) => {
                tracing::info!(url = %url, "Cluster blocked");
                self.diag.state(STATE_CODE, format!("CLUSTER [{url}] BLOCKED"));
                true
            }
            Err(e) => {
                self.diag.failure("block cluster", &e);
                false
            }
        }
    }

    pub async fn count_blocked(&self) -> Option<u64> {
        match self.backend.list_blocked().await {
            Ok(urls) => Some(urls.len() as u64),
            Err(e) => {
                self.diag.failure("count blocked", &e);
                None
            }
        }
    }

    pub async fn blocked(&self) -> Vec<String> {
        self.backend.list_blocked().await.unwrap_or_else(|e| {
            self.diag.failure("list blocked", &e);
            Vec::new()
        })
    }

    /// Known peers as sent in `_skynet_clusters`: each url base64-encoded,
    /// joined with ';'
    pub async fn parse_my_clusters(&self) -> String {
        self.get_all()
            .await
            .iter()
            .map(|c| STANDARD.encode(c.url.as_bytes()))
            .collect::<Vec<_>>()
            .join(&CHAIN_SEPARATOR.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_identity;
    use crate::storage::MemoryBackend;
    use async_trait::async_trait;
    use mesh_common::{AccessErrorEntry, ChainState, MeshError, MeshResult};

    fn with_header(url: &str, id: &str, clusters: &str) -> Cluster {
        Cluster::from_header(ClusterHeader {
            id: id.to_string(),
            url: url.to_string(),
            ip: "10.0.0.2".to_string(),
            version: "0.2.0".to_string(),
            clusters: clusters.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_add_unseen_cluster_once() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag).at(100);

        assert!(registry.add(&Cluster::new("http://a.org/node")).await);

        let all = registry.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].url, "a.org/node");
        assert_eq!(all[0].last_connect, 100);
    }

    #[tokio::test]
    async fn test_second_add_refreshes_last_connect() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();

        ClustersRegistry::new(&backend, &node, &diag)
            .at(100)
            .add(&Cluster::new("a.org/node"))
            .await;
        let registry = ClustersRegistry::new(&backend, &node, &diag).at(200);
        assert!(registry.add(&Cluster::new("https://a.org/node")).await);

        assert_eq!(registry.count_clusters().await, Some(1));
        assert_eq!(registry.get_all().await[0].last_connect, 200);
    }

    #[tokio::test]
    async fn test_update_with_header_id_refreshes_identity() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag).at(10);

        registry.add(&Cluster::new("a.org/node")).await;
        registry.add(&with_header("a.org/node", "$2b$04$peer", "")).await;

        let row = &registry.get_all().await[0];
        assert_eq!(row.skynet_id, "$2b$04$peer");
        assert_eq!(row.ip, "10.0.0.2");
        assert_eq!(row.version, "0.2.0");

        // A header without id only touches last_connect
        let later = ClustersRegistry::new(&backend, &node, &diag).at(20);
        later.add(&with_header("a.org/node", "", "")).await;
        let row = &later.get_all().await[0];
        assert_eq!(row.skynet_id, "$2b$04$peer");
        assert_eq!(row.last_connect, 20);
    }

    #[tokio::test]
    async fn test_upsert_rejects_self_and_bare_names() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        assert!(!registry.upsert(&Cluster::new("http://me.org/node")).await);
        assert!(!registry.upsert(&Cluster::new("me.org/node")).await);
        assert!(!registry.upsert(&Cluster::new("index.php")).await);
        assert!(!registry.upsert(&Cluster::new("")).await);
        assert_eq!(registry.count_clusters().await, Some(0));
    }

    #[tokio::test]
    async fn test_merge_from_header_chain() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        // base64("http://a.org")
        let sender = with_header("b.org/node", "$2b$04$b", "aHR0cDovL2Eub3Jn");
        assert!(registry.add(&sender).await);

        let urls: Vec<_> = registry.get_all().await.into_iter().map(|c| c.url).collect();
        assert_eq!(urls, vec!["a.org", "b.org/node"]);

        let a = backend.get_cluster("a.org").await.unwrap().unwrap();
        assert_eq!(a.registrator, "b.org/node");
    }

    #[tokio::test]
    async fn test_merge_skips_self_and_garbage() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        let me = STANDARD.encode("http://me.org/node");
        let peer = STANDARD.encode("c.org/node");
        let header = ClusterHeader {
            url: "b.org/node".into(),
            clusters: format!("{me};;!!!;{peer}"),
            ..Default::default()
        };

        assert_eq!(registry.merge_from_header(&header).await, 1);
        assert!(backend.get_cluster("me.org/node").await.unwrap().is_none());
        assert!(diag.has_errors());
    }

    #[tokio::test]
    async fn test_blocked_url_is_not_re_added() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        registry.add(&Cluster::new("a.org/node")).await;
        assert!(registry.block(&Cluster::new("http://a.org/node")).await);
        assert_eq!(registry.count_clusters().await, Some(0));
        assert_eq!(registry.count_blocked().await, Some(1));

        assert!(!registry.add(&Cluster::new("a.org/node")).await);
        assert_eq!(registry.count_clusters().await, Some(0));
        assert_eq!(registry.blocked().await, vec!["a.org/node".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_requires_exact_url() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        registry.add(&Cluster::new("a.org/node")).await;
        assert!(!registry.remove(&Cluster::new("http://a.org/node")).await);
        assert!(registry.remove(&Cluster::new("a.org/node")).await);
        assert_eq!(registry.count_clusters().await, Some(0));
    }

    #[tokio::test]
    async fn test_parse_my_clusters() {
        let backend = MemoryBackend::new();
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        assert_eq!(registry.parse_my_clusters().await, "");
        registry.add(&Cluster::new("a.org/x")).await;
        registry.add(&Cluster::new("b.org/y")).await;
        assert_eq!(
            registry.parse_my_clusters().await,
            format!("{};{}", STANDARD.encode("a.org/x"), STANDARD.encode("b.org/y"))
        );
    }

    struct FailingBackend;

    fn down<T>() -> MeshResult<T> {
        Err(MeshError::Storage("connection refused".into()))
    }

    #[async_trait]
    impl Backend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn ping(&self) -> MeshResult<()> {
            down()
        }
        async fn get_cluster(&self, _url: &str) -> MeshResult<Option<Cluster>> {
            down()
        }
        async fn insert_cluster(&self, _cluster: &Cluster) -> MeshResult<u64> {
            down()
        }
        async fn update_cluster(&self, _url: &str, _update: &ClusterUpdate) -> MeshResult<bool> {
            down()
        }
        async fn delete_cluster(&self, _url: &str) -> MeshResult<bool> {
            down()
        }
        async fn list_clusters(&self) -> MeshResult<Vec<Cluster>> {
            down()
        }
        async fn count_clusters(&self) -> MeshResult<u64> {
            down()
        }
        async fn block_url(&self, _url: &str) -> MeshResult<()> {
            down()
        }
        async fn is_blocked(&self, _url: &str) -> MeshResult<bool> {
            down()
        }
        async fn list_blocked(&self) -> MeshResult<Vec<String>> {
            down()
        }
        async fn load_chain(&self) -> MeshResult<ChainState> {
            down()
        }
        async fn save_chain(&self, _state: ChainState) -> MeshResult<()> {
            down()
        }
        async fn log_access_error(&self, _entry: &AccessErrorEntry) -> MeshResult<()> {
            down()
        }
        async fn access_errors(&self, _limit: usize) -> MeshResult<Vec<AccessErrorEntry>> {
            down()
        }
    }

    #[tokio::test]
    async fn test_storage_failures_degrade() {
        let backend = FailingBackend;
        let node = test_identity("me.org/node", "secret");
        let diag = Diagnostics::new();
        let registry = ClustersRegistry::new(&backend, &node, &diag);

        assert!(!registry.add(&with_header("a.org/node", "x", "aHR0cDovL2Eub3Jn")).await);
        assert!(registry.get_all().await.is_empty());
        assert_eq!(registry.count_clusters().await, None);
        assert!(!registry.block(&Cluster::new("a.org/node")).await);
        assert_eq!(registry.parse_my_clusters().await, "");
        assert!(diag.errors().iter().all(|e| e.code == "STORAGE"));
    }
}
