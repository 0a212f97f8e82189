//! Core types shared across meshnode components.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One known peer node.
///
/// Rows are unique by `url`, which is always stored with its scheme stripped
/// (`host/path`). `id` is assigned by the datastore on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Datastore id (None until stored)
    #[serde(default)]
    pub id: Option<u64>,

    /// Identity hash the peer claimed on its last contact
    #[serde(default)]
    pub skynet_id: String,

    /// Peer url, scheme stripped
    pub url: String,

    /// Peer ip as reported by the peer
    #[serde(default)]
    pub ip: String,

    /// Peer software version
    #[serde(default)]
    pub version: String,

    /// Last contact (Unix epoch seconds)
    #[serde(default)]
    pub last_connect: i64,

    /// Url of the node that introduced this peer
    #[serde(default)]
    pub registrator: String,

    /// Self-description the peer attached to its payload (never stored)
    #[serde(skip)]
    pub header: Option<ClusterHeader>,
}

impl Cluster {
    /// A bare cluster known only by url (operator add, merged peer lists)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// A cluster described by the header it sent
    pub fn from_header(header: ClusterHeader) -> Self {
        Self {
            url: header.url.clone(),
            header: Some(header),
            ..Default::default()
        }
    }

    /// Header url if present and non-empty, else the cluster url
    pub fn lookup_url(&self) -> &str {
        match self.header.as_ref() {
            Some(h) if !h.url.is_empty() => &h.url,
            _ => &self.url,
        }
    }
}

/// Self-description a node attaches to every outgoing envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHeader {
    /// bcrypt hash of the node key id
    pub id: String,

    /// Node url, scheme stripped
    pub url: String,

    /// Node ip
    pub ip: String,

    /// Software version
    pub version: String,

    /// Chain counter value
    pub chain: u64,

    /// When the chain counter last changed (Unix epoch seconds)
    pub updated_at: i64,

    /// Known peers: each url base64-encoded, joined with ';'
    pub clusters: String,
}

/// Node-wide chain counter.
///
/// Peers exchange it in every envelope; the highest value seen wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain: u64,
    pub updated_at: i64,
}

impl ChainState {
    pub fn new(chain: u64, updated_at: i64) -> Self {
        Self { chain, updated_at }
    }

    /// Returns true if `other` should replace this state
    pub fn is_superseded_by(&self, other: &ChainState) -> bool {
        other.chain > self.chain
    }
}

/// One unauthorized access attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessErrorEntry {
    /// Unix epoch seconds
    pub created_at: i64,

    /// Raw request dump, `key=value;` per field
    pub request: String,

    /// `_skynet_cluster_url` as sent, if any
    pub remote_cluster: String,

    pub request_uri: String,

    pub remote_host: String,

    pub remote_ip: String,
}

/// A field value: plain text or a nested mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Map(BTreeMap<String, String>),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        Self::Text(n.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Text(n.to_string())
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(m: BTreeMap<String, String>) -> Self {
        Self::Map(m)
    }
}

/// Scalars become text; booleans follow the wire convention ("1" or "")
struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, number or boolean")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(if v { "1" } else { "" }.to_string())
    }
}

struct ScalarText(String);

impl<'de> Deserialize<'de> for ScalarText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScalarVisitor).map(ScalarText)
    }
}

struct FieldValueVisitor;

impl<'de> Visitor<'de> for FieldValueVisitor {
    type Value = FieldValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a scalar or a map of scalars")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        ScalarVisitor.visit_str(v).map(FieldValue::Text)
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(FieldValue::Text(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        ScalarVisitor.visit_i64(v).map(FieldValue::Text)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        ScalarVisitor.visit_u64(v).map(FieldValue::Text)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        ScalarVisitor.visit_f64(v).map(FieldValue::Text)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        ScalarVisitor.visit_bool(v).map(FieldValue::Text)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, ScalarText(value))) = access.next_entry::<String, ScalarText>()? {
            map.insert(key, value);
        }
        Ok(FieldValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FieldValueVisitor)
    }
}

/// Outcome of one outbound peer exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionReport {
    /// Peer url, scheme stripped
    pub url: String,

    /// HTTP status returned by the peer (None if unreachable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Response passed key and checksum verification
    pub accepted: bool,

    /// Decrypted non-control response fields, nested maps unpacked
    pub fields: Vec<(String, FieldValue)>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
