//! Filename classification: ordered named-capture patterns that both
//! validate a delivered filename and decompose it into typed attributes.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::StrataError;

#[derive(Debug, Clone)]
pub struct FilePattern {
    pub name: &'static str,
    re: Regex,
}

impl FilePattern {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, StrataError> {
        let re = Regex::new(pattern).map_err(|err| StrataError::InvalidPattern {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { name, re })
    }

    /// Named capture groups of a match; groups that did not participate are
    /// omitted from the map.
    pub fn captures(&self, filename: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.re.captures(filename)?;
        let mut attrs = BTreeMap::new();
        for name in self.re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                attrs.insert(name.to_string(), m.as_str().to_string());
            }
        }
        Some(attrs)
    }
}

/// An ordered pattern list plus the skip list of filenames that are known and
/// intentionally unclassified (the metadata workbooks themselves, sample
/// sheets, generated reports).
///
/// Order is a contract: patterns are tried strictly in list order and the
/// first match wins, so more specific patterns must precede general ones.
#[derive(Debug, Clone)]
pub struct PatternLib {
    patterns: Vec<FilePattern>,
    skip: Vec<Regex>,
}

impl PatternLib {
    pub fn new(patterns: Vec<FilePattern>, skip: &[&str]) -> Result<Self, StrataError> {
        let skip = skip
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| StrataError::InvalidPattern {
                    name: pattern.to_string(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, skip })
    }

    /// Classify a manifest path. Directory components are stripped; patterns
    /// see the bare filename only.
    pub fn classify(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let filename = basename(path);
        self.patterns
            .iter()
            .find_map(|pattern| pattern.captures(filename))
    }

    /// The pattern a path would classify under, for diagnostics.
    pub fn pattern_name(&self, path: &str) -> Option<&'static str> {
        let filename = basename(path);
        self.patterns
            .iter()
            .find(|pattern| pattern.re.is_match(filename))
            .map(|pattern| pattern.name)
    }

    pub fn is_skipped(&self, path: &str) -> bool {
        let filename = basename(path);
        self.skip.iter().any(|re| re.is_match(filename))
    }
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
