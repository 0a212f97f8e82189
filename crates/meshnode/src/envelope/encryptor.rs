//! Field codecs applied at the wire boundary.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::sync::Arc;

use mesh_common::{MeshError, MeshResult};

/// Transforms one field value to and from its wire form
pub trait Encryptor: Send + Sync {
    /// Name shown in the status view
    fn name(&self) -> &'static str;

    fn encrypt(&self, plain: &str) -> String;

    fn decrypt(&self, encoded: &str) -> MeshResult<String>;

    /// Raw mode: values travel untouched
    fn is_raw(&self) -> bool {
        false
    }
}

/// Standard base64 with padding
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Encryptor;

impl Encryptor for Base64Encryptor {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encrypt(&self, plain: &str) -> String {
        STANDARD.encode(plain.as_bytes())
    }

    fn decrypt(&self, encoded: &str) -> MeshResult<String> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| MeshError::Encoding(format!("Invalid base64 field: {e}")))?;
        String::from_utf8(bytes).map_err(|e| MeshError::Encoding(format!("Invalid UTF-8 field: {e}")))
    }
}

/// Identity codec used in raw mode
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEncryptor;

impl Encryptor for PlainEncryptor {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn encrypt(&self, plain: &str) -> String {
        plain.to_string()
    }

    fn decrypt(&self, encoded: &str) -> MeshResult<String> {
        Ok(encoded.to_string())
    }

    fn is_raw(&self) -> bool {
        true
    }
}

/// Codec selected in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptorKind {
    #[default]
    Base64,
    Plain,
}

impl EncryptorKind {
    /// Build the codec; `raw` forces the plain codec
    pub fn build(self, raw: bool) -> Arc<dyn Encryptor> {
        match (self, raw) {
            (_, true) | (Self::Plain, _) => Arc::new(PlainEncryptor),
            (Self::Base64, false) => Arc::new(Base64Encryptor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encryptor() {
        let enc = Base64Encryptor;
        assert_eq!(enc.encrypt("http://a.org"), "aHR0cDovL2Eub3Jn");
        assert_eq!(enc.decrypt("aHR0cDovL2Eub3Jn").unwrap(), "http://a.org");
        assert!(enc.decrypt("%%%").is_err());
    }

    #[test]
    fn test_raw_forces_plain() {
        let enc = EncryptorKind::Base64.build(true);
        assert!(enc.is_raw());
        assert_eq!(enc.encrypt("x"), "x");
        assert_eq!(EncryptorKind::Base64.build(false).name(), "base64");
    }
}
