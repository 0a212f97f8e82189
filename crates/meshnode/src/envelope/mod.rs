//! Request/response envelope.
//!
//! An envelope is an ordered set of named fields. Values are plain text in
//! memory; encryption is applied only when an envelope is snapshotted for the
//! wire ([`Envelope::prepare`], [`Envelope::to_wire`]) or rebuilt from it
//! ([`Envelope::from_wire`]).

mod encryptor;
pub mod params;
mod wire;

pub use encryptor::{Encryptor, EncryptorKind};
#[cfg(test)]
pub use encryptor::{Base64Encryptor, PlainEncryptor};
pub use wire::WireFields;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

use mesh_common::constants::{INTERNAL_PREFIX, fields};
use mesh_common::{ClusterHeader, FieldValue, MeshResult};

use crate::secure::generate_checksum;

/// What to do with each value when snapshotting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Encrypt,
    Decrypt,
}

/// One stored field; nested maps are already packed
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    value: String,
}

impl Field {
    fn transformed(&self, transform: Transform, encryptor: &dyn Encryptor) -> MeshResult<String> {
        match transform {
            Transform::Encrypt => Ok(encryptor.encrypt(&self.value)),
            Transform::Decrypt => encryptor.decrypt(&self.value),
        }
    }
}

/// Control fields start with `_skynet` (optionally after one leading char)
pub fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
        || name
            .char_indices()
            .nth(1)
            .is_some_and(|(i, _)| name[i..].starts_with(INTERNAL_PREFIX))
}

/// Ordered named-field container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    fields: Vec<Field>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field; nested maps are packed. Re-setting keeps the position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        let key = key.into();
        let value = match value.into() {
            FieldValue::Text(s) => s,
            FieldValue::Map(m) => params::pack(&m),
        };

        match self.fields.iter_mut().find(|f| f.name == key) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { name: key, value }),
        }
        self
    }

    /// Field value, unpacked if it holds a nested map
    pub fn get(&self, key: &str) -> Option<FieldValue> {
        let raw = self.get_text(key)?;
        if params::is_packed(raw) {
            if let Some(map) = params::unpack(raw) {
                return Some(FieldValue::Map(map));
            }
        }
        Some(FieldValue::Text(raw.to_string()))
    }

    /// Stored text of a field, never unpacked
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == key)
            .map(|f| f.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.name == key)
    }

    /// Drop every control field
    pub fn retain_user_fields(&mut self) -> &mut Self {
        self.fields.retain(|f| {
            let keep = !is_internal(&f.name);
            if !keep {
                tracing::trace!(field = %f.name, "Dropping control field");
            }
            keep
        });
        self
    }

    /// Non-control fields in order, nested maps unpacked
    pub fn user_values(&self) -> Vec<(String, FieldValue)> {
        self.fields
            .iter()
            .filter(|f| !is_internal(&f.name))
            .filter_map(|f| Some((f.name.clone(), self.get(&f.name)?)))
            .collect()
    }

    /// Flat snapshot with `transform` applied to every value.
    ///
    /// The envelope itself is left unchanged.
    pub fn prepare(&self, transform: Transform, encryptor: &dyn Encryptor) -> MeshResult<WireFields> {
        let mut wire = WireFields::new();
        for field in &self.fields {
            wire.set(field.name.clone(), field.transformed(transform, encryptor)?);
        }
        Ok(wire)
    }

    /// Encrypt every field and append the checksum. The checksum must be
    /// the last field computed.
    pub fn to_wire(&self, encryptor: &dyn Encryptor) -> MeshResult<WireFields> {
        let mut wire = self.prepare(Transform::Encrypt, encryptor)?;
        let checksum = generate_checksum(&wire, encryptor);
        wire.set(fields::CHECKSUM, checksum);
        Ok(wire)
    }

    /// Decrypt a received field list. The checksum field is dropped.
    pub fn from_wire(wire: &WireFields, encryptor: &dyn Encryptor) -> MeshResult<Self> {
        let mut envelope = Self::new();
        for (name, value) in wire.iter() {
            if name == fields::CHECKSUM {
                continue;
            }
            envelope.fields.push(Field {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        let plain = envelope.prepare(Transform::Decrypt, encryptor)?;
        Ok(Self {
            fields: plain
                .into_inner()
                .into_iter()
                .map(|(name, value)| Field { name, value })
                .collect(),
        })
    }

    /// Populate the control fields every outbound envelope carries
    pub fn add_metadata(
        &mut self,
        header: &ClusterHeader,
        hash: &str,
        chain_new: Option<u64>,
        now: i64,
    ) -> &mut Self {
        if let Some(chain) = chain_new {
            self.set(fields::CHAIN_NEW, chain);
        }

        // First hop: the chain starts with us
        if !self.contains(fields::CLUSTERS_CHAIN) {
            self.set(fields::CLUSTERS_CHAIN, STANDARD.encode(header.url.as_bytes()));
        }

        self.set(fields::MARKER, "1")
            .set(fields::ID, header.id.as_str())
            .set(fields::HASH, hash)
            .set(fields::CHAIN, header.chain)
            .set(fields::CHAIN_UPDATED_AT, header.updated_at)
            .set(fields::VERSION, header.version.as_str())
            .set(fields::CLUSTER_URL, header.url.as_str())
            .set(fields::CLUSTER_IP, header.ip.as_str())
            .set(fields::CLUSTER_TIME, now)
            .set(fields::CLUSTERS, header.clusters.as_str())
            .set(fields::SENDER_TIME, now)
            .set(fields::SENDER_URL, header.url.as_str())
    }

    /// Url of the peer that sent this envelope
    pub fn sender_cluster_url(&self) -> Option<&str> {
        self.get_text(fields::SENDER_URL)
            .filter(|u| !u.is_empty())
            .or_else(|| self.get_text(fields::CLUSTER_URL).filter(|u| !u.is_empty()))
    }
}

/// Operator-supplied fields: key order kept, nested objects packed
struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of field names to scalars or maps")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut envelope = Envelope::new();
        while let Some((key, value)) = access.next_entry::<String, FieldValue>()? {
            envelope.set(key, value);
        }
        Ok(envelope)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EnvelopeVisitor)
    }
}
