//! Ordered field list as it travels between nodes.
//!
//! Field order is part of the checksum input, so the wire form is an
//! insertion-ordered list. On the wire it is a JSON object (or query/form
//! pairs) whose key order is preserved in both directions.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered `(name, value)` pairs, unique by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireFields(Vec<(String, String)>);

impl WireFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace in place; a replaced field keeps its position
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> Vec<(String, String)> {
        self.0
    }
}

impl From<Vec<(String, String)>> for WireFields {
    fn from(pairs: Vec<(String, String)>) -> Self {
        let mut fields = Self::new();
        for (k, v) in pairs {
            fields.set(k, v);
        }
        fields
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for WireFields {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.set(k, v);
        }
        fields
    }
}

impl Serialize for WireFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Peers may send numbers or booleans where we expect text
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Int(n) => n.to_string(),
            Self::UInt(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Bool(b) => if b { "1" } else { "" }.to_string(),
        }
    }
}

struct WireFieldsVisitor;

impl<'de> Visitor<'de> for WireFieldsVisitor {
    type Value = WireFields;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of field names to scalar values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut fields = WireFields::new();
        while let Some((key, value)) = access.next_entry::<String, Scalar>()? {
            fields.set(key, value.into_text());
        }
        Ok(fields)
    }
}

impl<'de> Deserialize<'de> for WireFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(WireFieldsVisitor)
    }
}
