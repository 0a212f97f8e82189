//! Self-description attached to every outbound envelope.

use mesh_common::constants::fields;
use mesh_common::{ChainState, ClusterHeader};

use crate::envelope::Envelope;
use crate::identity::NodeIdentity;

/// Our header for the current chain state and known-peers list
pub fn generate(node: &NodeIdentity, chain: ChainState, clusters: String) -> ClusterHeader {
    ClusterHeader {
        id: node.key_hash.clone(),
        url: node.url.clone(),
        ip: node.ip.clone(),
        version: node.version.clone(),
        chain: chain.chain,
        updated_at: chain.updated_at,
        clusters,
    }
}

/// Rebuild the sender's header from a decrypted envelope.
///
/// Unparseable numbers read as 0.
pub fn from_envelope(envelope: &Envelope) -> ClusterHeader {
    let text = |name: &str| envelope.get_text(name).unwrap_or_default().to_string();

    ClusterHeader {
        id: text(fields::ID),
        url: envelope.sender_cluster_url().unwrap_or_default().to_string(),
        ip: text(fields::CLUSTER_IP),
        version: text(fields::VERSION),
        chain: text(fields::CHAIN).parse().unwrap_or(0),
        updated_at: text(fields::CHAIN_UPDATED_AT).parse().unwrap_or(0),
        clusters: text(fields::CLUSTERS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_identity;

    #[test]
    fn test_header_survives_metadata() {
        let node = test_identity("me.org/node", "secret");
        let header = generate(&node, ChainState::new(5, 1_700_000_000), "YTti".into());

        let mut env = Envelope::new();
        env.add_metadata(&header, "sha", None, 1_700_000_001);

        assert_eq!(from_envelope(&env), header);
    }

    #[test]
    fn test_missing_fields_default() {
        let mut env = Envelope::new();
        env.set(fields::CLUSTER_URL, "a.org/n").set(fields::CHAIN, "junk");

        let header = from_envelope(&env);
        assert_eq!(header.url, "a.org/n");
        assert_eq!(header.chain, 0);
        assert!(header.id.is_empty());
    }
}
