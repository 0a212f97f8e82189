//! Propagation chain carried in `_skynet_clusters_chain`.
//!
//! The chain lists the nodes a payload already passed through, in discovery
//! order. Membership is the only loop check; duplicates are kept.

use base64::{Engine, engine::general_purpose::STANDARD};

use mesh_common::constants::{CHAIN_SEPARATOR, fields};

use crate::diagnostics::Diagnostics;
use crate::envelope::Envelope;
use crate::identity::NodeIdentity;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClustersUrlsChain {
    urls: Vec<String>,
    my_url: String,
    sender_url: Option<String>,
}

impl ClustersUrlsChain {
    pub fn new(node: &NodeIdentity) -> Self {
        Self {
            my_url: node.url.clone(),
            ..Default::default()
        }
    }

    /// Read the chain and sender url from a decrypted inbound envelope
    pub fn load_from_request(&mut self, envelope: &Envelope, diag: &Diagnostics) {
        self.sender_url = envelope.sender_cluster_url().map(str::to_string);

        let Some(encoded) = envelope.get_text(fields::CLUSTERS_CHAIN) else {
            return;
        };
        match decode(encoded) {
            Some(urls) => self.urls = urls,
            None => diag.error("URLS_CHAIN", "Propagation chain does not decode"),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn sender_url(&self) -> Option<&str> {
        self.sender_url.as_deref()
    }

    pub fn is_cluster_in_chain(&self, url: &str) -> bool {
        self.urls.iter().any(|u| u == url)
    }

    pub fn is_my_cluster_in_chain(&self) -> bool {
        self.is_cluster_in_chain(&self.my_url)
    }

    pub fn is_sender_cluster_in_chain(&self) -> bool {
        self.sender_url
            .as_deref()
            .is_some_and(|url| self.is_cluster_in_chain(url))
    }

    /// Append `url` unless empty
    pub fn add_cluster_to_chain(&mut self, url: &str) {
        if !url.is_empty() {
            self.urls.push(url.to_string());
        }
    }

    pub fn add_my_cluster_to_chain(&mut self) {
        let url = self.my_url.clone();
        self.add_cluster_to_chain(&url);
    }

    pub fn add_sender_cluster_to_chain(&mut self) {
        if let Some(url) = self.sender_url.clone() {
            self.add_cluster_to_chain(&url);
        }
    }

    /// Joined and base64-wrapped, as attached to outbound envelopes
    pub fn clusters_urls_chain(&self) -> String {
        STANDARD.encode(self.clusters_urls_plain_chain())
    }

    pub fn clusters_urls_plain_chain(&self) -> String {
        self.urls.join(&CHAIN_SEPARATOR.to_string())
    }
}

fn decode(encoded: &str) -> Option<Vec<String>> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let plain = String::from_utf8(bytes).ok()?;
    Some(
        plain
            .split(CHAIN_SEPARATOR)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect(),
    )
}
