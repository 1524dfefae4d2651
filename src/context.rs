//! Contextual enrichment: external annotation sources merged into assembled
//! records, plus the submission-tracking sheet the archive office maintains.

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use tracing::info;

use crate::error::StrataError;

/// External per-sample / per-filename annotation lookup. Implementations are
/// read-only and total: unknown keys yield an empty map, never an error.
pub trait ContextualSource {
    fn by_sample(&self, sample_id: &str) -> BTreeMap<String, String>;
    fn by_filename(&self, filename: &str) -> BTreeMap<String, String>;
}

/// Merge per-sample annotations into a record, in source-list order. Later
/// sources overwrite earlier ones on field-name collision.
pub fn apply_sample_context(
    sources: &[Box<dyn ContextualSource>],
    sample_id: &str,
    record: &mut BTreeMap<String, String>,
) {
    for source in sources {
        record.extend(source.by_sample(sample_id));
    }
}

/// Merge per-filename annotations into a record. Keyed by filename, not
/// sample id; the two lookups must not be conflated.
pub fn apply_filename_context(
    sources: &[Box<dyn ContextualSource>],
    filename: &str,
    record: &mut BTreeMap<String, String>,
) {
    for source in sources {
        record.extend(source.by_filename(filename));
    }
}

/// The archive office's submission-tracking sheet: one row per helpdesk
/// ticket, keyed case-insensitively. Delimited text with a single header row.
#[derive(Debug, Clone)]
pub struct TrackSheet {
    rows: BTreeMap<String, BTreeMap<String, String>>,
}

impl TrackSheet {
    pub fn read(path: &Utf8Path) -> Result<Self, StrataError> {
        let content = fs::read_to_string(path).map_err(|err| StrataError::SheetParse {
            file: path.to_string(),
            reason: err.to_string(),
        })?;
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());
        let header: Vec<String> = lines
            .next()
            .ok_or_else(|| StrataError::SheetParse {
                file: path.to_string(),
                reason: "tracking sheet has no header row".to_string(),
            })?
            .split('\t')
            .map(|cell| cell.trim().to_string())
            .collect();

        let mut rows = BTreeMap::new();
        for line in lines {
            let cells: Vec<&str> = line.split('\t').collect();
            let mut row = BTreeMap::new();
            for (name, cell) in header.iter().zip(&cells) {
                let value = cell.trim();
                if !value.is_empty() {
                    row.insert(name.clone(), value.to_string());
                }
            }
            if let Some(ticket) = row.get("ticket") {
                rows.insert(ticket.trim().to_lowercase(), row);
            }
        }
        info!(path = %path, tickets = rows.len(), "tracking sheet read");
        Ok(Self { rows })
    }

    pub fn get(&self, ticket: &str) -> Option<&BTreeMap<String, String>> {
        self.rows.get(&ticket.trim().to_lowercase())
    }
}
