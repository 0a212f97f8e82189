//! Packing of nested key/value maps into a single field value.

use std::collections::BTreeMap;

/// Marker that opens every packed value
pub const PACKED_PREFIX: &str = "$$packed:";

pub fn pack(map: &BTreeMap<String, String>) -> String {
    let body = serde_json::to_string(map).unwrap_or_default();
    format!("{PACKED_PREFIX}{body}")
}

pub fn is_packed(value: &str) -> bool {
    value.starts_with(PACKED_PREFIX)
}

/// None if `value` is not packed or the packed body is malformed
pub fn unpack(value: &str) -> Option<BTreeMap<String, String>> {
    let body = value.strip_prefix(PACKED_PREFIX)?;
    serde_json::from_str(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let mut map = BTreeMap::new();
        map.insert("cmd".to_string(), "add".to_string());
        map.insert("url".to_string(), "a.org/node".to_string());

        let packed = pack(&map);
        assert!(is_packed(&packed));
        assert_eq!(unpack(&packed), Some(map));
    }

    #[test]
    fn test_plain_values_are_not_packed() {
        assert!(!is_packed("hello"));
        assert_eq!(unpack("hello"), None);
        assert_eq!(unpack("$$packed:{broken"), None);
    }
}
