//! Per-request pipeline for peer traffic.
//!
//! Inbound: verify key and checksum, decrypt, reconcile the chain counter,
//! merge the sender into the registry, extend the propagation chain and
//! answer with our own metadata. Outbound envelopes are built here too, so
//! both sides share one definition of the wire format.

use std::sync::Arc;

use mesh_common::constants::fields;
use mesh_common::{Cluster, MeshError, MeshResult};

use crate::cluster::{ChainCounter, ClustersRegistry, ClustersUrlsChain, header};
use crate::diagnostics::Diagnostics;
use crate::envelope::{Encryptor, Envelope, WireFields};
use crate::identity::NodeIdentity;
use crate::secure::{AccessLog, ChecksumMode, RequestMeta, Verifier};
use crate::storage::Backend;

/// Payload to forward after answering an inbound request
#[derive(Debug, Clone)]
pub struct Relay {
    /// Non-control fields of the inbound envelope
    pub fields: Envelope,
    /// Propagation chain including us and the sender
    pub chain: ClustersUrlsChain,
}

/// Result of handling one inbound hit
#[derive(Debug)]
pub enum Outcome {
    /// Not a peer payload
    Status,
    /// Failed verification or decoding; answer with an empty body
    Rejected(MeshError),
    Accepted {
        response: WireFields,
        relay: Option<Relay>,
    },
}

pub struct MeshNode {
    identity: NodeIdentity,
    encryptor: Arc<dyn Encryptor>,
    backend: Arc<dyn Backend>,
    access_log: AccessLog,
    relay: bool,
}

impl MeshNode {
    pub fn new(
        identity: NodeIdentity,
        encryptor: Arc<dyn Encryptor>,
        backend: Arc<dyn Backend>,
        access_log: AccessLog,
        relay: bool,
    ) -> Self {
        Self {
            identity,
            encryptor,
            backend,
            access_log,
            relay,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn encryptor(&self) -> &dyn Encryptor {
        self.encryptor.as_ref()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn verifier(&self) -> Verifier<'_> {
        Verifier::new(&self.identity, self.encryptor.as_ref(), &self.access_log)
    }

    pub fn registry<'a>(&'a self, diag: &'a Diagnostics) -> ClustersRegistry<'a> {
        ClustersRegistry::new(self.backend.as_ref(), &self.identity, diag)
    }

    pub fn chain_counter<'a>(&'a self, diag: &'a Diagnostics) -> ChainCounter<'a> {
        ChainCounter::new(self.backend.as_ref(), diag)
    }

    /// Handle one inbound hit
    pub async fn handle(&self, wire: &WireFields, meta: &RequestMeta, diag: &Diagnostics) -> Outcome {
        if !Verifier::is_ping(wire) {
            return Outcome::Status;
        }

        let envelope = match self.accept(wire, meta, ChecksumMode::Request, diag).await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    remote_ip = %meta.remote_ip,
                    error = %e,
                    "Peer request rejected"
                );
                return Outcome::Rejected(e);
            }
        };

        let mut chain = ClustersUrlsChain::new(&self.identity);
        chain.load_from_request(&envelope, diag);
        let seen_before = chain.is_my_cluster_in_chain();
        if !seen_before {
            chain.add_my_cluster_to_chain();
        }
        if !chain.is_sender_cluster_in_chain() {
            chain.add_sender_cluster_to_chain();
        }

        let response = match self.build_outbound(Envelope::new(), &chain, None, diag).await {
            Ok(response) => response,
            Err(e) => return Outcome::Rejected(e),
        };

        tracing::debug!(
            sender = chain.sender_url().unwrap_or_default(),
            chain = %chain.clusters_urls_plain_chain(),
            "Peer request accepted"
        );

        let relay = (self.relay && !seen_before).then(|| {
            let mut fields = envelope;
            fields.retain_user_fields();
            Relay { fields, chain }
        });

        Outcome::Accepted { response, relay }
    }

    /// Verify and merge a peer's answer to one of our requests
    pub async fn accept_response(
        &self,
        url: &str,
        wire: &WireFields,
        diag: &Diagnostics,
    ) -> MeshResult<Envelope> {
        let meta = RequestMeta {
            remote_host: url.to_string(),
            request_uri: self.identity.address_of(url),
            ..Default::default()
        };
        self.accept(wire, &meta, ChecksumMode::Response, diag).await
    }

    /// Full outbound payload: user fields, propagation chain, our metadata,
    /// encrypted, checksum last.
    pub async fn build_outbound(
        &self,
        mut envelope: Envelope,
        chain: &ClustersUrlsChain,
        chain_new: Option<u64>,
        diag: &Diagnostics,
    ) -> MeshResult<WireFields> {
        if !chain.urls().is_empty() {
            envelope.set(fields::CLUSTERS_CHAIN, chain.clusters_urls_chain());
        }

        let state = self.chain_counter(diag).load().await;
        let clusters = self.registry(diag).parse_my_clusters().await;
        let header = header::generate(&self.identity, state, clusters);
        let hash = self.verifier().generate_hash();

        envelope.add_metadata(&header, &hash, chain_new, chrono::Utc::now().timestamp());
        envelope.to_wire(self.encryptor.as_ref())
    }

    async fn accept(
        &self,
        wire: &WireFields,
        meta: &RequestMeta,
        mode: ChecksumMode,
        diag: &Diagnostics,
    ) -> MeshResult<Envelope> {
        let state = self.verifier().verify_inbound(wire, meta, mode).await?;
        tracing::trace!(state = ?state, mode = ?mode, "Payload verified");

        let envelope = Envelope::from_wire(wire, self.encryptor.as_ref())?;
        let now = chrono::Utc::now().timestamp();
        self.chain_counter(diag).reconcile(&envelope, now).await;

        // The sender is named by the payload only
        let sender = header::from_envelope(&envelope);
        self.registry(diag).at(now).add(&Cluster::from_header(sender)).await;

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Base64Encryptor;
    use crate::identity::test_identity;
    use crate::storage::MemoryBackend;
    use mesh_common::FieldValue;

    fn mesh(url: &str, key: &str) -> (MeshNode, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let node = MeshNode::new(
            test_identity(url, key),
            Arc::new(Base64Encryptor),
            backend.clone(),
            AccessLog::new(None, Some(backend.clone() as Arc<dyn Backend>)),
            true,
        );
        (node, backend)
    }

    fn meta() -> RequestMeta {
        RequestMeta {
            remote_ip: "198.51.100.7".into(),
            remote_host: String::new(),
            request_uri: "/".into(),
        }
    }

    async fn request_from(sender: &MeshNode) -> WireFields {
        let diag = Diagnostics::new();
        let mut chain = ClustersUrlsChain::new(sender.identity());
        chain.add_my_cluster_to_chain();

        let mut fields = Envelope::new();
        fields.set("note", "hello");
        sender.build_outbound(fields, &chain, None, &diag).await.unwrap()
    }

    #[tokio::test]
    async fn test_two_node_exchange() {
        let (a, a_store) = mesh("a.org/node", "shared");
        let (b, b_store) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();

        let request = request_from(&a).await;
        let Outcome::Accepted { response, relay } = b.handle(&request, &meta(), &diag).await else {
            panic!("request was not accepted");
        };

        let known = b_store.get_cluster("a.org/node").await.unwrap().unwrap();
        assert_eq!(known.skynet_id, a.identity().key_hash);

        let relay = relay.unwrap();
        assert_eq!(relay.fields.get_text("note"), Some("hello"));
        assert_eq!(relay.chain.clusters_urls_plain_chain(), "a.org/node;b.org/node");

        let answer = a.accept_response("b.org/node", &response, &diag).await.unwrap();
        assert_eq!(answer.sender_cluster_url(), Some("b.org/node"));
        assert!(a_store.get_cluster("b.org/node").await.unwrap().is_some());
        assert!(a_store.access_errors(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_field_is_rejected() {
        let (a, _) = mesh("a.org/node", "shared");
        let (b, b_store) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();

        let mut request = request_from(&a).await;
        request.set("note", Base64Encryptor.encrypt("goodbye"));

        let outcome = b.handle(&request, &meta(), &diag).await;
        assert!(matches!(outcome, Outcome::Rejected(MeshError::Integrity(_))));
        assert_eq!(b_store.count_clusters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_key_is_rejected_and_logged() {
        let (c, _) = mesh("c.org/node", "intruder");
        let (b, b_store) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();

        let request = request_from(&c).await;
        let outcome = b.handle(&request, &meta(), &diag).await;
        assert!(matches!(outcome, Outcome::Rejected(MeshError::Auth(_))));

        let logged = b_store.access_errors(10).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].remote_ip, "198.51.100.7");
        assert_eq!(b_store.count_clusters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_relay_when_already_in_chain() {
        let (a, _) = mesh("a.org/node", "shared");
        let (b, _) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();

        let mut chain = ClustersUrlsChain::new(a.identity());
        chain.add_cluster_to_chain("b.org/node");
        chain.add_my_cluster_to_chain();
        let request = a.build_outbound(Envelope::new(), &chain, None, &diag).await.unwrap();

        let Outcome::Accepted { relay, .. } = b.handle(&request, &meta(), &diag).await else {
            panic!("request was not accepted");
        };
        assert!(relay.is_none());
    }

    #[tokio::test]
    async fn test_nested_field_is_relayed_unpacked() {
        let (a, _) = mesh("a.org/node", "shared");
        let (b, _) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();

        let command: std::collections::BTreeMap<String, String> =
            [("url".to_string(), "c.org/node".to_string())].into();
        let mut payload = Envelope::new();
        payload.set("@add", command.clone());
        let mut chain = ClustersUrlsChain::new(a.identity());
        chain.add_my_cluster_to_chain();
        let request = a.build_outbound(payload, &chain, None, &diag).await.unwrap();

        let Outcome::Accepted { relay, .. } = b.handle(&request, &meta(), &diag).await else {
            panic!("request was not accepted");
        };
        let relay = relay.unwrap();
        assert_eq!(relay.fields.get("@add"), Some(FieldValue::Map(command)));
        assert!(!relay.fields.contains(fields::ID));
    }

    #[tokio::test]
    async fn test_sender_is_never_taken_from_transport() {
        let (anonymous, _) = mesh("", "shared");
        let (b, b_store) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();

        let request = anonymous
            .build_outbound(Envelope::new(), &ClustersUrlsChain::default(), None, &diag)
            .await
            .unwrap();
        let meta = RequestMeta {
            remote_host: "evil.org/x".into(),
            ..meta()
        };
        b.handle(&request, &meta, &diag).await;

        assert!(b_store.get_cluster("evil.org/x").await.unwrap().is_none());
        assert_eq!(b_store.count_clusters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_plain_hit_is_status() {
        let (b, _) = mesh("b.org/node", "shared");
        let diag = Diagnostics::new();
        let wire: WireFields = [("note", "hi")].into_iter().collect();
        assert!(matches!(b.handle(&wire, &meta(), &diag).await, Outcome::Status));
    }
}
