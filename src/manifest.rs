//! Checksum-manifest parsing and the two-pass classification split.
//!
//! A manifest line is `<hex digest><separator run><relative path>`. Only the
//! first run of two-or-more spaces or a tab divides digest from path; later
//! spaces belong to the path, which some facilities insist on producing.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::classify::{PatternLib, basename};
use crate::error::StrataError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub checksum: String,
    pub path: String,
}

/// How one manifest line fared against the pattern libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Classified by the primary library.
    Matched(BTreeMap<String, String>),
    /// Not a primary file, but classified by the alternate-role library's
    /// pass over the directory. Legitimate, accounted separately.
    OtherRole,
    /// On the skip list: known and intentionally unclassified.
    Skipped,
    /// Matched nothing. An anomaly the operator should see.
    Unrecognized,
}

#[derive(Debug, Clone)]
pub struct ReconciledLine {
    pub path: String,
    pub filename: String,
    pub checksum: String,
    pub outcome: Outcome,
}

pub fn parse_manifest(path: &Utf8Path) -> Result<Vec<ManifestEntry>, StrataError> {
    let file = path.file_name().unwrap_or(path.as_str()).to_string();
    let content = fs::read_to_string(path).map_err(|err| StrataError::SheetParse {
        file: file.clone(),
        reason: err.to_string(),
    })?;

    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_line(line).ok_or_else(|| StrataError::ManifestLine {
            file: file.clone(),
            line: idx + 1,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Option<ManifestEntry> {
    let at = match (line.find('\t'), line.find("  ")) {
        (Some(tab), Some(spaces)) => tab.min(spaces),
        (Some(tab), None) => tab,
        (None, Some(spaces)) => spaces,
        (None, None) => return None,
    };
    let checksum = line[..at].trim().to_string();
    let path = line[at..].trim_start().to_string();
    let valid = checksum.len() >= 8
        && checksum.chars().all(|ch| ch.is_ascii_hexdigit())
        && !path.is_empty();
    valid.then_some(ManifestEntry { checksum, path })
}

/// Manifest files of a directory, in listing order.
pub fn manifest_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StrataError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| StrataError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| StrataError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|path| StrataError::Filesystem(format!("non-UTF8 path {}", path.display())))?;
        if path.extension() == Some("md5") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// First pass: every filename in the directory's manifests that classifies
/// under `lib`. Used to precompute the alternate-role set before the primary
/// pass, so "legitimate other-role file" and "truly unparseable file" stay
/// distinguishable.
pub fn collect_classified(
    dir: &Utf8Path,
    lib: &PatternLib,
) -> Result<BTreeSet<String>, StrataError> {
    let mut names = BTreeSet::new();
    for manifest in manifest_files(dir)? {
        for entry in parse_manifest(&manifest)? {
            if lib.classify(&entry.path).is_some() {
                names.insert(basename(&entry.path).to_string());
            }
        }
    }
    Ok(names)
}

/// Second pass: classify each line against the primary library, folding
/// skip-listed names and precomputed other-role names out of the anomaly set.
pub fn reconcile(
    entries: &[ManifestEntry],
    primary: &PatternLib,
    other_role: &BTreeSet<String>,
) -> Vec<ReconciledLine> {
    entries
        .iter()
        .map(|entry| {
            let filename = basename(&entry.path).to_string();
            let outcome = if primary.is_skipped(&entry.path) {
                Outcome::Skipped
            } else if let Some(attrs) = primary.classify(&entry.path) {
                Outcome::Matched(attrs)
            } else if other_role.contains(&filename) {
                Outcome::OtherRole
            } else {
                warn!(filename = %filename, "unable to classify manifest entry");
                Outcome::Unrecognized
            };
            ReconciledLine {
                path: entry.path.clone(),
                filename,
                checksum: entry.checksum.clone(),
                outcome,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::classify::FilePattern;

    #[test]
    fn line_splits_on_first_separator_run() {
        let entry = parse_line("d41d8cd98f00b204e9800998ecf8427e  run 1/8101_16S.fastq.gz").unwrap();
        assert_eq!(entry.checksum, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(entry.path, "run 1/8101_16S.fastq.gz");

        let entry = parse_line("cafebabe01\tdeep/nested/dir/file name.txt").unwrap();
        assert_eq!(entry.path, "deep/nested/dir/file name.txt");
    }

    #[test]
    fn bad_lines_are_rejected_with_line_number() {
        assert!(parse_line("not-a-checksum  file").is_none());
        assert!(parse_line("cafebabe01 single-space").is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("bad.md5")).unwrap();
        fs::write(&path, "d41d8cd98f00b204e9800998ecf8427e  ok.txt\ngarbage\n").unwrap();
        let err = parse_manifest(&path).unwrap_err();
        assert_matches!(err, StrataError::ManifestLine { line: 2, .. });
    }

    #[test]
    fn reconcile_partitions_lines() {
        let primary = PatternLib::new(
            vec![FilePattern::new("sample", r"^(?P<id>\d+)_16S\.fastq\.gz$").unwrap()],
            &[r"_metadata\.tsv$"],
        )
        .unwrap();
        let other_role: BTreeSet<String> = ["NTC_16S.fastq.gz".to_string()].into();
        let entries = vec![
            ManifestEntry {
                checksum: "aa".repeat(8),
                path: "8101_16S.fastq.gz".to_string(),
            },
            ManifestEntry {
                checksum: "bb".repeat(8),
                path: "NTC_16S.fastq.gz".to_string(),
            },
            ManifestEntry {
                checksum: "cc".repeat(8),
                path: "Soil_metadata.tsv".to_string(),
            },
            ManifestEntry {
                checksum: "dd".repeat(8),
                path: "mystery.bin".to_string(),
            },
        ];
        let lines = reconcile(&entries, &primary, &other_role);
        assert_matches!(lines[0].outcome, Outcome::Matched(_));
        assert_eq!(lines[1].outcome, Outcome::OtherRole);
        assert_eq!(lines[2].outcome, Outcome::Skipped);
        assert_eq!(lines[3].outcome, Outcome::Unrecognized);
    }
}
