//! Operator status view.

use serde::Serialize;

use mesh_common::{ChainState, Cluster};

use crate::diagnostics::{Diagnostics, Entry};
use crate::node::MeshNode;

const MASK: &str = "****";

/// Everything an operator sees for this node
#[derive(Debug, Serialize)]
pub struct StatusView {
    pub url: String,
    pub ip: String,
    pub version: String,
    pub key_id: String,
    pub encryptor: &'static str,
    /// Values travel unencrypted
    pub raw: bool,
    pub storage: &'static str,
    pub storage_ok: bool,
    pub chain: ChainState,
    pub clusters_count: Option<u64>,
    pub blocked_count: Option<u64>,
    pub clusters: Vec<Cluster>,
    pub states: Vec<Entry>,
    pub errors: Vec<Entry>,
}

impl StatusView {
    /// Gather the view; `show_key` reveals the key id instead of a mask
    pub async fn collect(mesh: &MeshNode, diag: &Diagnostics, show_key: bool) -> Self {
        let identity = mesh.identity();
        let storage_ok = match mesh.backend().ping().await {
            Ok(()) => true,
            Err(e) => {
                diag.failure("ping storage", &e);
                false
            }
        };

        let registry = mesh.registry(diag);
        let chain = mesh.chain_counter(diag).load().await;
        let clusters = registry.get_all().await;
        let clusters_count = registry.count_clusters().await;
        let blocked_count = registry.count_blocked().await;

        Self {
            url: identity.url.clone(),
            ip: identity.ip.clone(),
            version: identity.version.clone(),
            key_id: if show_key {
                identity.key_id.clone()
            } else {
                MASK.to_string()
            },
            encryptor: mesh.encryptor().name(),
            raw: mesh.encryptor().is_raw(),
            storage: mesh.backend().name(),
            storage_ok,
            chain,
            clusters_count,
            blocked_count,
            clusters,
            states: diag.states(),
            errors: diag.errors(),
        }
    }
}
