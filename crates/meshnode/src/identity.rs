//! This node's own identity: key id, canonical url, and what it tells peers.

use mesh_common::{MeshError, MeshResult};

use crate::config::NodeConfig;

/// Who this node is
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Pre-shared key id. Peers must hold the same value.
    pub key_id: String,
    /// bcrypt hash of `key_id`, sent as `_skynet_id`
    pub key_hash: String,
    /// Canonical url, scheme stripped
    pub url: String,
    /// Ip announced to peers
    pub ip: String,
    /// Software version announced to peers
    pub version: String,
    /// Scheme used for outbound connections
    pub protocol: String,
}

impl NodeIdentity {
    /// Build the identity, hashing the key id once
    pub fn from_config(config: &NodeConfig) -> MeshResult<Self> {
        if config.key_id.is_empty() {
            return Err(MeshError::Config("node.key_id must not be empty".into()));
        }

        let key_hash = bcrypt::hash(&config.key_id, config.hash_cost)
            .map_err(|e| MeshError::Config(format!("Failed to hash key id: {e}")))?;

        Ok(Self {
            key_id: config.key_id.clone(),
            key_hash,
            url: strip_scheme(&config.url, &config.protocol).to_string(),
            ip: config.ip.clone(),
            version: config.version.clone(),
            protocol: config.protocol.clone(),
        })
    }

    /// Strip this node's protocol and the http/https schemes from `url`
    pub fn strip_scheme<'u>(&self, url: &'u str) -> &'u str {
        strip_scheme(url, &self.protocol)
    }

    /// Returns true if `url` names this node
    pub fn is_myself(&self, url: &str) -> bool {
        self.strip_scheme(url) == self.url
    }

    /// Full outbound address for a peer url
    pub fn address_of(&self, url: &str) -> String {
        format!("{}{}", self.protocol, self.strip_scheme(url))
    }
}

/// Remove leading scheme prefixes (`protocol`, `http://`, `https://`)
pub fn strip_scheme<'u>(url: &'u str, protocol: &str) -> &'u str {
    let mut rest = url.trim();
    loop {
        let before = rest.len();
        for prefix in [protocol, "http://", "https://"] {
            if prefix.is_empty() {
                continue;
            }
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped;
            }
        }
        if rest.len() == before {
            return rest;
        }
    }
}

#[cfg(test)]
pub(crate) fn test_identity(url: &str, key_id: &str) -> NodeIdentity {
    NodeIdentity {
        key_id: key_id.to_string(),
        key_hash: bcrypt::hash(key_id, 4).unwrap(),
        url: strip_scheme(url, "http://").to_string(),
        ip: "127.0.0.1".to_string(),
        version: "0.1.0".to_string(),
        protocol: "http://".to_string(),
    }
}
