//! Linkage keys: the composite tuple that must be identical between a
//! package and its owned resources for the publishing layer to associate
//! them.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::StrataError;

/// Ordered tuple of semantic field values. Construction rules are
/// project-specific but always deterministic for a given input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkageKey(Vec<String>);

impl LinkageKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// Read the descriptor's ordered field-name shape out of an attribute
    /// map. A missing field is a descriptor/data mismatch, not a data
    /// quality issue.
    pub fn from_attrs(
        shape: &[&str],
        attrs: &BTreeMap<String, String>,
    ) -> Result<Self, StrataError> {
        let parts = shape
            .iter()
            .map(|field| {
                attrs
                    .get(*field)
                    .cloned()
                    .ok_or_else(|| StrataError::LinkageField(field.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for LinkageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// The amplicon linkage component. Legacy pilot batches need the per-sample
/// index folded in because one flow cell carried repeat runs of the same
/// extraction; `-` and `_` are stripped from the index since delimiter usage
/// was inconsistent in that data. Whether the index-linked variant applies is
/// decided by an explicit per-file allow-list, never by content sniffing.
pub fn amplicon_linkage(index_linked: bool, flow_id: &str, index: &str) -> String {
    if index_linked {
        let stripped: String = index.chars().filter(|ch| *ch != '-' && *ch != '_').collect();
        format!("{flow_id}_{stripped}")
    } else {
        flow_id.to_string()
    }
}

/// Identity slug for a package: data type plus the linkage tuple, lowercased
/// with punctuation folded to hyphens. Globally unique within a run by
/// construction, enforced by the assembler's identity registry.
pub fn package_identity(data_type: &str, key: &LinkageKey) -> String {
    let mut raw = data_type.to_string();
    for part in key.parts() {
        raw.push('-');
        raw.push_str(part);
    }
    raw.chars()
        .map(|ch| match ch {
            '/' | '.' | '_' | ' ' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn from_attrs_follows_shape_order() {
        let attrs: BTreeMap<String, String> = [
            ("amplicon".to_string(), "16S".to_string()),
            ("extraction_id".to_string(), "8101_1".to_string()),
        ]
        .into();
        let key = LinkageKey::from_attrs(&["extraction_id", "amplicon"], &attrs).unwrap();
        assert_eq!(key.parts(), ["8101_1", "16S"]);
        assert_eq!(key.to_string(), "8101_1/16S");
    }

    #[test]
    fn missing_shape_field_is_an_error() {
        let attrs = BTreeMap::new();
        let err = LinkageKey::from_attrs(&["flow_cell_id"], &attrs).unwrap_err();
        assert_matches!(err, StrataError::LinkageField(_));
    }

    #[test]
    fn amplicon_linkage_variants() {
        assert_eq!(amplicon_linkage(false, "A6BRJ", "GGACTCCT-TATCCTCT"), "A6BRJ");
        assert_eq!(
            amplicon_linkage(true, "A6BRJ", "GGACTCCT-TATCCTCT"),
            "A6BRJ_GGACTCCTTATCCTCT"
        );
        assert_eq!(
            amplicon_linkage(true, "A6BRJ", "GGACTCCT_TATCCTCT"),
            "A6BRJ_GGACTCCTTATCCTCT"
        );
    }

    #[test]
    fn linkage_is_deterministic() {
        let a = amplicon_linkage(true, "A6BRJ", "GG-AC");
        let b = amplicon_linkage(true, "A6BRJ", "GG-AC");
        assert_eq!(a, b);
    }

    #[test]
    fn identity_slug() {
        let key = LinkageKey::new(vec!["8101_1".to_string(), "16S".to_string()]);
        assert_eq!(package_identity("soil-amplicons", &key), "soil-amplicons-8101-1-16s");
    }
}
