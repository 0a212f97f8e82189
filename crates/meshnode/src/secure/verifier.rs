//! Inbound payload verification.
//!
//! A request moves `Unverified -> Authenticated -> IntegrityOk`. Any failed
//! step is terminal for that request.

use md5::{Digest as _, Md5};
use sha1::Sha1;

use mesh_common::constants::fields;
use mesh_common::{MeshError, MeshResult};

use super::access_log::{AccessLog, RequestMeta};
use crate::envelope::{Encryptor, WireFields};
use crate::identity::NodeIdentity;

/// Which side produced the payload being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    Request,
    Response,
}

/// Verification progress for one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    Unverified,
    Authenticated,
    IntegrityOk,
}

/// MD5 hex over every non-checksum value, concatenated in field order
pub fn checksum_digest(wire: &WireFields) -> String {
    let mut hasher = Md5::new();
    for (name, value) in wire.iter() {
        if name != fields::CHECKSUM {
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Checksum field value: the digest, encrypted unless raw
pub fn generate_checksum(wire: &WireFields, encryptor: &dyn Encryptor) -> String {
    encryptor.encrypt(&checksum_digest(wire))
}

pub struct Verifier<'a> {
    node: &'a NodeIdentity,
    encryptor: &'a dyn Encryptor,
    access_log: &'a AccessLog,
}

impl<'a> Verifier<'a> {
    pub fn new(node: &'a NodeIdentity, encryptor: &'a dyn Encryptor, access_log: &'a AccessLog) -> Self {
        Self {
            node,
            encryptor,
            access_log,
        }
    }

    /// True if our key id verifies against the hash a peer sent
    pub fn verify_key(&self, claimed_hash: &str) -> bool {
        bcrypt::verify(&self.node.key_id, claimed_hash).unwrap_or(false)
    }

    /// Check the `_skynet_id` of `wire` (or an explicit `key`).
    ///
    /// Failures are written to the access log.
    pub async fn is_request_key_verified(
        &self,
        wire: &WireFields,
        key: Option<&str>,
        meta: &RequestMeta,
    ) -> bool {
        let claimed = match key {
            Some(k) => Some(k.to_string()),
            None => wire
                .get(fields::ID)
                .filter(|v| !v.is_empty())
                .and_then(|v| self.encryptor.decrypt(v).ok()),
        };

        let verified = claimed.as_deref().is_some_and(|hash| self.verify_key(hash));
        if !verified {
            self.access_log.record(wire, meta).await;
        }
        verified
    }

    /// Recompute the checksum of `wire` and compare with the transmitted one
    pub fn verify_checksum(&self, wire: &WireFields, mode: ChecksumMode) -> bool {
        let Some(sent) = wire.get(fields::CHECKSUM).filter(|v| !v.is_empty()) else {
            tracing::debug!(mode = ?mode, "Payload carries no checksum");
            return false;
        };
        if wire.iter().nth(1).is_none() {
            return false;
        }

        let Ok(sent) = self.encryptor.decrypt(sent) else {
            tracing::debug!(mode = ?mode, "Checksum field does not decode");
            return false;
        };

        let ok = checksum_digest(wire) == sent;
        if !ok {
            tracing::debug!(mode = ?mode, "Checksum mismatch");
        }
        ok
    }

    /// SHA1 hex of our url followed by our key id
    pub fn generate_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.node.url.as_bytes());
        hasher.update(self.node.key_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// A payload from another node (as opposed to an operator hit)
    pub fn is_ping(wire: &WireFields) -> bool {
        wire.contains(fields::CLUSTER_URL)
    }

    /// Non-empty and not one of our own addresses
    pub fn is_address_correct(&self, address: &str) -> bool {
        !address.is_empty()
            && address != format!("http://{}", self.node.url)
            && address != format!("https://{}", self.node.url)
    }

    /// Run the full state machine on an inbound payload
    pub async fn verify_inbound(
        &self,
        wire: &WireFields,
        meta: &RequestMeta,
        mode: ChecksumMode,
    ) -> MeshResult<VerifyState> {
        let mut state = VerifyState::Unverified;

        if !self.is_request_key_verified(wire, None, meta).await {
            return Err(MeshError::Auth(format!("Key not verified ({state:?})")));
        }
        state = VerifyState::Authenticated;

        if !self.verify_checksum(wire, mode) {
            return Err(MeshError::Integrity(format!("Checksum not verified ({state:?})")));
        }
        state = VerifyState::IntegrityOk;

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Base64Encryptor, Envelope, PlainEncryptor};
    use crate::identity::test_identity;
    use crate::storage::{Backend, MemoryBackend};
    use std::sync::Arc;

    fn fields_of(pairs: &[(&str, &str)]) -> WireFields {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_checksum_is_deterministic_and_order_sensitive() {
        let a = fields_of(&[("x", "one"), ("y", "two")]);
        let same = fields_of(&[("x", "one"), ("y", "two")]);
        let changed = fields_of(&[("x", "one"), ("y", "tw0")]);
        let reordered = fields_of(&[("y", "two"), ("x", "one")]);

        assert_eq!(checksum_digest(&a), checksum_digest(&same));
        assert_ne!(checksum_digest(&a), checksum_digest(&changed));
        // Concatenation order is part of the digest
        assert_ne!(checksum_digest(&a), checksum_digest(&reordered));
        // md5("onetwo")
        assert_eq!(checksum_digest(&a), "5b9164ad6f496d9dee12ec7634ce253f");
    }

    #[test]
    fn test_checksum_excludes_itself() {
        let mut wire = fields_of(&[("x", "one")]);
        let before = checksum_digest(&wire);
        wire.set(fields::CHECKSUM, "anything");
        assert_eq!(checksum_digest(&wire), before);
    }

    #[test]
    fn test_verify_checksum_round_trip() {
        let node = test_identity("me.org/node", "secret");
        let log = AccessLog::default();
        let enc = Base64Encryptor;
        let verifier = Verifier::new(&node, &enc, &log);

        let mut env = Envelope::new();
        env.set("a", "1").set("b", "2");
        let mut wire = env.to_wire(&enc).unwrap();
        assert!(verifier.verify_checksum(&wire, ChecksumMode::Request));

        wire.set("b", enc.encrypt("3"));
        assert!(!verifier.verify_checksum(&wire, ChecksumMode::Request));
    }

    #[tokio::test]
    async fn test_key_verification_logs_failures() {
        let node = test_identity("me.org/node", "secret");
        let backend = Arc::new(MemoryBackend::new());
        let log = AccessLog::new(None, Some(backend.clone() as Arc<dyn Backend>));
        let enc = PlainEncryptor;
        let verifier = Verifier::new(&node, &enc, &log);
        let meta = RequestMeta::default();

        let good = fields_of(&[(fields::ID, node.key_hash.as_str())]);
        assert!(verifier.is_request_key_verified(&good, None, &meta).await);
        assert!(backend.access_errors(10).await.unwrap().is_empty());

        let other = bcrypt::hash("other-secret", 4).unwrap();
        let bad = fields_of(&[(fields::ID, other.as_str())]);
        assert!(!verifier.is_request_key_verified(&bad, None, &meta).await);
        assert!(!verifier.is_request_key_verified(&good, Some("not-a-hash"), &meta).await);
        assert_eq!(backend.access_errors(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_verify_inbound_states() {
        let node = test_identity("me.org/node", "secret");
        let log = AccessLog::default();
        let enc = Base64Encryptor;
        let verifier = Verifier::new(&node, &enc, &log);
        let meta = RequestMeta::default();

        let mut env = Envelope::new();
        env.set(fields::ID, node.key_hash.as_str()).set("note", "hi");
        let wire = env.to_wire(&enc).unwrap();
        assert_eq!(
            verifier.verify_inbound(&wire, &meta, ChecksumMode::Request).await.unwrap(),
            VerifyState::IntegrityOk
        );

        let mut tampered = wire.clone();
        tampered.set("note", enc.encrypt("bye"));
        let err = verifier
            .verify_inbound(&tampered, &meta, ChecksumMode::Request)
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Integrity(_)));
    }

    #[test]
    fn test_hash_and_address_checks() {
        let node = test_identity("me.org/node", "secret");
        let log = AccessLog::default();
        let enc = PlainEncryptor;
        let verifier = Verifier::new(&node, &enc, &log);

        // sha1("me.org/nodesecret") is stable across calls
        assert_eq!(verifier.generate_hash(), verifier.generate_hash());
        assert_eq!(verifier.generate_hash().len(), 40);

        assert!(verifier.is_address_correct("http://a.org/node"));
        assert!(!verifier.is_address_correct("http://me.org/node"));
        assert!(!verifier.is_address_correct(""));

        assert!(Verifier::is_ping(&fields_of(&[(fields::CLUSTER_URL, "a")])));
        assert!(!Verifier::is_ping(&fields_of(&[("note", "a")])));
    }
}
