//! Outbound exchanges with peers.

use futures::future::join_all;
use std::time::Duration;

use mesh_common::{ConnectionReport, MeshError, MeshResult};

use crate::cluster::ClustersUrlsChain;
use crate::diagnostics::Diagnostics;
use crate::envelope::{Envelope, WireFields};
use crate::node::MeshNode;

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// HTTP client for peer exchanges. No retries.
#[derive(Clone)]
pub struct Connector {
    client: reqwest::Client,
}

impl Connector {
    pub fn new(config: &ConnectorConfig) -> MeshResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(concat!("meshnode/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MeshError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Send `fields` to one peer and merge its verified answer
    pub async fn connect(
        &self,
        mesh: &MeshNode,
        url: &str,
        fields: &Envelope,
        chain: Option<&ClustersUrlsChain>,
        chain_new: Option<u64>,
        diag: &Diagnostics,
    ) -> ConnectionReport {
        let identity = mesh.identity();
        let url = identity.strip_scheme(url).to_string();
        let mut report = ConnectionReport {
            url: url.clone(),
            ..Default::default()
        };

        let address = identity.address_of(&url);
        if url.is_empty() || !mesh.verifier().is_address_correct(&address) {
            let e = MeshError::InvalidInput(format!("Invalid or own address [{url}]"));
            diag.failure("connect", &e);
            report.error = Some(e.to_string());
            return report;
        }

        let mut chain = chain.cloned().unwrap_or_else(|| ClustersUrlsChain::new(identity));
        if !chain.is_my_cluster_in_chain() {
            chain.add_my_cluster_to_chain();
        }

        let result: MeshResult<Envelope> = async {
            let wire = mesh.build_outbound(fields.clone(), &chain, chain_new, diag).await?;
            let (status, answer) = self.exchange(&address, &wire).await?;
            report.status = Some(status);

            let answer = answer.ok_or_else(|| {
                MeshError::Connection(format!("Peer answered {status} with an empty body"))
            })?;
            mesh.accept_response(&url, &answer, diag).await
        }
        .await;

        match result {
            Ok(envelope) => {
                tracing::info!(peer = %url, status = ?report.status, "Peer exchange accepted");
                diag.state("CONNECTION", format!("CONNECTED TO [{url}]"));
                report.accepted = true;
                report.fields = envelope.user_values();
            }
            Err(e) => {
                tracing::warn!(peer = %url, error = %e, "Peer exchange failed");
                diag.failure(&format!("connect {url}"), &e);
                report.error = Some(e.to_string());
            }
        }
        report
    }

    /// `connect` to every stored peer not already in the chain, concurrently
    pub async fn broadcast(
        &self,
        mesh: &MeshNode,
        fields: &Envelope,
        chain: Option<&ClustersUrlsChain>,
        chain_new: Option<u64>,
        diag: &Diagnostics,
    ) -> Vec<ConnectionReport> {
        let identity = mesh.identity();
        let targets: Vec<String> = mesh
            .registry(diag)
            .get_all()
            .await
            .into_iter()
            .map(|c| c.url)
            .filter(|url| !identity.is_myself(url))
            .filter(|url| !chain.is_some_and(|c| c.is_cluster_in_chain(url)))
            .collect();

        tracing::info!(peers = targets.len(), "Broadcasting");

        join_all(
            targets
                .iter()
                .map(|url| self.connect(mesh, url, fields, chain, chain_new, diag)),
        )
        .await
    }

    async fn exchange(&self, address: &str, wire: &WireFields) -> MeshResult<(u16, Option<WireFields>)> {
        let response = self
            .client
            .post(address)
            .json(wire)
            .send()
            .await
            .map_err(|e| MeshError::Connection(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| MeshError::Connection(e.to_string()))?;

        if body.trim().is_empty() {
            return Ok((status, None));
        }

        let answer = serde_json::from_str(&body)
            .map_err(|e| MeshError::Encoding(format!("Peer answer is not a field map: {e}")))?;
        Ok((status, Some(answer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Base64Encryptor;
    use crate::identity::test_identity;
    use crate::secure::AccessLog;
    use crate::storage::{Backend, MemoryBackend};
    use mesh_common::Cluster;
    use std::sync::Arc;

    fn connector() -> Connector {
        Connector::new(&ConnectorConfig {
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap()
    }

    fn mesh(backend: Arc<MemoryBackend>) -> MeshNode {
        MeshNode::new(
            test_identity("me.org/node", "shared"),
            Arc::new(Base64Encryptor),
            backend,
            AccessLog::default(),
            false,
        )
    }

    #[tokio::test]
    async fn test_connect_refuses_own_address() {
        let mesh = mesh(Arc::new(MemoryBackend::new()));
        let diag = Diagnostics::new();

        let report = connector()
            .connect(&mesh, "http://me.org/node", &Envelope::new(), None, None, &diag)
            .await;
        assert!(!report.accepted);
        assert!(report.error.is_some());
        assert!(report.status.is_none());
        assert_eq!(diag.errors()[0].code, "INPUT");
    }

    #[tokio::test]
    async fn test_broadcast_skips_peers_in_chain() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_cluster(&Cluster::new("127.0.0.1:9/a")).await.unwrap();
        backend.insert_cluster(&Cluster::new("127.0.0.1:9/b")).await.unwrap();
        let mesh = mesh(backend.clone());
        let diag = Diagnostics::new();

        let mut chain = ClustersUrlsChain::new(mesh.identity());
        chain.add_cluster_to_chain("127.0.0.1:9/a");

        // Port 9 refuses connections; only the report count matters here
        let reports = connector()
            .broadcast(&mesh, &Envelope::new(), Some(&chain), None, &diag)
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].url, "127.0.0.1:9/b");
        assert!(!reports[0].accepted);
        assert!(diag.has_errors());
    }
}
