//! # Secret Mutator

use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

/// Desired `stringData` against live `data`.
///
/// The API server folds `stringData` into `data` on write, so the live
/// object is compared through its decoded `data` map.
pub fn string_data(desired: &Secret, existing: &mut Secret) -> bool {
    let wanted = desired.string_data.clone().unwrap_or_default();
    let current: BTreeMap<String, String> = existing
        .data
        .iter()
        .flatten()
        .map(|(key, value)| (key.clone(), String::from_utf8_lossy(&value.0).into_owned()))
        .collect();
    if current == wanted {
        return false;
    }
    existing.data = None;
    existing.string_data = Some(wanted);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_equal_content_is_unchanged() {
        let desired = Secret {
            string_data: Some(BTreeMap::from([("cfg".to_string(), "abc".to_string())])),
            ..Default::default()
        };
        let mut existing = Secret {
            data: Some(BTreeMap::from([(
                "cfg".to_string(),
                ByteString(b"abc".to_vec()),
            )])),
            ..Default::default()
        };
        assert!(!string_data(&desired, &mut existing));
    }

    #[test]
    fn test_removed_key_rewrites_data() {
        let desired = Secret {
            string_data: Some(BTreeMap::from([("a".to_string(), "1".to_string())])),
            ..Default::default()
        };
        let mut existing = Secret {
            data: Some(BTreeMap::from([
                ("a".to_string(), ByteString(b"1".to_vec())),
                ("b".to_string(), ByteString(b"2".to_vec())),
            ])),
            ..Default::default()
        };
        assert!(string_data(&desired, &mut existing));
        assert!(existing.data.is_none());
        assert_eq!(existing.string_data, desired.string_data);
    }
}
