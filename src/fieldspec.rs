//! Declarative column-to-field mapping over delimited metadata workbooks.
//!
//! A workbook is tab-separated text; a line starting with `#sheet\t<name>`
//! opens a named sheet. Column headers are resolved case- and
//! whitespace-insensitively against each field's matcher list, first match
//! wins. A field whose matchers find no column is absent rather than an
//! error: facilities rename columns release to release and the tolerance is
//! deliberate.

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::coerce::CoerceFn;
use crate::error::StrataError;

#[derive(Debug, Clone)]
pub enum ColumnMatcher {
    Exact(String),
    Pattern(Regex),
}

impl ColumnMatcher {
    pub fn exact(header: &str) -> Self {
        ColumnMatcher::Exact(header.to_string())
    }

    pub fn pattern(pattern: &str) -> Result<Self, StrataError> {
        let re = Regex::new(pattern).map_err(|err| StrataError::InvalidPattern {
            name: pattern.to_string(),
            reason: err.to_string(),
        })?;
        Ok(ColumnMatcher::Pattern(re))
    }

    fn matches(&self, normalized_header: &str) -> bool {
        match self {
            ColumnMatcher::Exact(expected) => normalize_header(expected) == normalized_header,
            ColumnMatcher::Pattern(re) => re.is_match(normalized_header),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field: &'static str,
    pub matchers: Vec<ColumnMatcher>,
    pub coerce: Option<CoerceFn>,
}

impl FieldSpec {
    pub fn new(field: &'static str, header: &str) -> Self {
        Self {
            field,
            matchers: vec![ColumnMatcher::exact(header)],
            coerce: None,
        }
    }

    pub fn coerced(field: &'static str, header: &str, coerce: CoerceFn) -> Self {
        Self {
            field,
            matchers: vec![ColumnMatcher::exact(header)],
            coerce: Some(coerce),
        }
    }

    pub fn with_matchers(
        field: &'static str,
        matchers: Vec<ColumnMatcher>,
        coerce: Option<CoerceFn>,
    ) -> Self {
        Self {
            field,
            matchers,
            coerce,
        }
    }
}

/// Where the data starts and which header row carries column names.
#[derive(Debug, Clone)]
pub struct SheetLayout {
    pub sheet_name: Option<String>,
    pub header_length: usize,
    pub column_name_row: usize,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            sheet_name: None,
            header_length: 1,
            column_name_row: 0,
        }
    }
}

/// What to do when a cell fails coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPolicy {
    /// A single bad cell poisons the whole file; a malformed sheet is not
    /// safe to partially trust.
    FailFile,
    /// Keep the row, leave the value absent, record the failure on the row.
    KeepRow,
}

/// Context the caller attaches to every row of one workbook: ticket number,
/// facility code and the mirror URL the workbook was fetched from.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
pub struct RowContext {
    pub ticket: Option<String>,
    pub facility_code: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SheetRow {
    pub values: BTreeMap<&'static str, Option<String>>,
    pub context: RowContext,
    /// Coercion failures recorded under [`RowPolicy::KeepRow`].
    pub coercion_errors: Vec<String>,
}

impl SheetRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_deref())
    }
}

/// Lowercase, trim, collapse internal whitespace runs.
pub fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Read one workbook into rows, in sheet order then row order.
///
/// Failure here (missing file, malformed layout) is per-file: the caller
/// decides whether to abort or to let the file contribute zero rows. Zero
/// data rows is a success, distinct from failure.
pub fn read_workbook(
    path: &Utf8Path,
    specs: &[FieldSpec],
    layout: &SheetLayout,
    policy: RowPolicy,
    context: &RowContext,
) -> Result<Vec<SheetRow>, StrataError> {
    let file = path
        .file_name()
        .unwrap_or(path.as_str())
        .to_string();
    let content = fs::read_to_string(path).map_err(|err| StrataError::SheetParse {
        file: file.clone(),
        reason: err.to_string(),
    })?;

    let mut rows = Vec::new();
    for sheet in split_sheets(&content) {
        if let Some(wanted) = &layout.sheet_name {
            if sheet.name.as_deref() != Some(wanted.as_str()) {
                continue;
            }
        }
        rows.extend(read_sheet(&file, &sheet, specs, layout, policy, context)?);
    }
    Ok(rows)
}

struct Sheet<'a> {
    name: Option<String>,
    lines: Vec<&'a str>,
}

fn split_sheets(content: &str) -> Vec<Sheet<'_>> {
    let mut sheets = Vec::new();
    let mut current = Sheet {
        name: None,
        lines: Vec::new(),
    };
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("#sheet\t") {
            if !current.lines.is_empty() || current.name.is_some() {
                sheets.push(current);
            }
            current = Sheet {
                name: Some(rest.trim().to_string()),
                lines: Vec::new(),
            };
        } else {
            current.lines.push(line);
        }
    }
    if !current.lines.is_empty() || current.name.is_some() {
        sheets.push(current);
    }
    sheets
}

fn read_sheet(
    file: &str,
    sheet: &Sheet<'_>,
    specs: &[FieldSpec],
    layout: &SheetLayout,
    policy: RowPolicy,
    context: &RowContext,
) -> Result<Vec<SheetRow>, StrataError> {
    // trailing blank lines are routine in exported sheets
    let lines: Vec<&str> = sheet
        .lines
        .iter()
        .copied()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    if lines.len() < layout.header_length || layout.column_name_row >= layout.header_length {
        return Err(StrataError::SheetParse {
            file: file.to_string(),
            reason: format!(
                "header length {} with column names in row {} does not fit sheet of {} lines",
                layout.header_length,
                layout.column_name_row,
                lines.len()
            ),
        });
    }

    let headers: Vec<String> = lines[layout.column_name_row]
        .split('\t')
        .map(normalize_header)
        .collect();
    let columns = resolve_columns(specs, &headers);

    let mut rows = Vec::new();
    for line in &lines[layout.header_length..] {
        let cells: Vec<&str> = line.split('\t').collect();
        let mut values = BTreeMap::new();
        let mut coercion_errors = Vec::new();
        for (spec, column) in specs.iter().zip(&columns) {
            let value = match column {
                None => None,
                Some(idx) => {
                    let raw = cells.get(*idx).map(|cell| cell.trim()).unwrap_or("");
                    match spec.coerce {
                        None => (!raw.is_empty()).then(|| raw.to_string()),
                        Some(coerce) => match coerce(raw) {
                            Ok(value) => value,
                            Err(reason) => {
                                let failure = StrataError::Coercion {
                                    field: spec.field.to_string(),
                                    value: raw.to_string(),
                                    reason,
                                };
                                match policy {
                                    RowPolicy::FailFile => {
                                        return Err(StrataError::SheetParse {
                                            file: file.to_string(),
                                            reason: failure.to_string(),
                                        });
                                    }
                                    RowPolicy::KeepRow => {
                                        coercion_errors.push(failure.to_string());
                                        None
                                    }
                                }
                            }
                        },
                    }
                }
            };
            values.insert(spec.field, value);
        }
        rows.push(SheetRow {
            values,
            context: context.clone(),
            coercion_errors,
        });
    }
    debug!(file, rows = rows.len(), "workbook sheet read");
    Ok(rows)
}

fn resolve_columns(specs: &[FieldSpec], headers: &[String]) -> Vec<Option<usize>> {
    specs
        .iter()
        .map(|spec| {
            spec.matchers.iter().find_map(|matcher| {
                headers
                    .iter()
                    .position(|header| matcher.matches(header))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn write_workbook(content: &str) -> (tempfile::TempDir, camino::Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path =
            camino::Utf8PathBuf::from_path_buf(dir.path().join("facility_metadata.tsv")).unwrap();
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::coerced("sample_id", "Soil sample unique ID", crate::coerce::extract_sample_id),
            FieldSpec::new("sequencer", "Sequencer"),
            FieldSpec::with_matchers(
                "reads",
                vec![
                    ColumnMatcher::exact("# of RAW reads"),
                    ColumnMatcher::exact("# of reads"),
                ],
                Some(crate::coerce::clean_int),
            ),
        ]
    }

    #[test]
    fn header_matching_is_case_and_space_tolerant() {
        let (_dir, path) = write_workbook(
            "batch header\n soil  SAMPLE Unique id \tSequencer\t# of reads\n8101\tHiSeq\t12 M\n",
        );
        let layout = SheetLayout {
            header_length: 2,
            column_name_row: 1,
            ..SheetLayout::default()
        };
        let rows = read_workbook(&path, &specs(), &layout, RowPolicy::FailFile, &RowContext::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("sample_id"), Some("102.100.100/8101"));
        assert_eq!(rows[0].get("sequencer"), Some("HiSeq"));
        assert_eq!(rows[0].get("reads"), Some("12"));
    }

    #[test]
    fn missing_column_is_absent_not_error() {
        let (_dir, path) = write_workbook("Soil sample unique ID\n8101\n");
        let rows = read_workbook(
            &path,
            &specs(),
            &SheetLayout::default(),
            RowPolicy::FailFile,
            &RowContext::default(),
        )
        .unwrap();
        assert_eq!(rows[0].get("sample_id"), Some("102.100.100/8101"));
        assert_eq!(rows[0].get("sequencer"), None);
    }

    #[test]
    fn sheets_combine_in_workbook_order() {
        let (_dir, path) = write_workbook(
            "#sheet\trun1\nSoil sample unique ID\n8101\n#sheet\trun2\nSoil sample unique ID\n8102\n",
        );
        let rows = read_workbook(
            &path,
            &specs(),
            &SheetLayout::default(),
            RowPolicy::FailFile,
            &RowContext::default(),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("sample_id"), Some("102.100.100/8101"));
        assert_eq!(rows[1].get("sample_id"), Some("102.100.100/8102"));
    }

    #[test]
    fn pinned_sheet_name_reads_only_that_sheet() {
        let (_dir, path) = write_workbook(
            "#sheet\trun1\nSoil sample unique ID\n8101\n#sheet\trun2\nSoil sample unique ID\n8102\n",
        );
        let layout = SheetLayout {
            sheet_name: Some("run2".to_string()),
            ..SheetLayout::default()
        };
        let rows = read_workbook(&path, &specs(), &layout, RowPolicy::FailFile, &RowContext::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("sample_id"), Some("102.100.100/8102"));
    }

    fn always_fails(_value: &str) -> Result<Option<String>, String> {
        Err("unusable".to_string())
    }

    #[test]
    fn coercion_failure_respects_row_policy() {
        let (_dir, path) = write_workbook("Depth\n1m\n");
        let specs = vec![FieldSpec::coerced("depth", "Depth", always_fails)];

        let err = read_workbook(
            &path,
            &specs,
            &SheetLayout::default(),
            RowPolicy::FailFile,
            &RowContext::default(),
        )
        .unwrap_err();
        assert_matches!(err, StrataError::SheetParse { .. });

        let rows = read_workbook(
            &path,
            &specs,
            &SheetLayout::default(),
            RowPolicy::KeepRow,
            &RowContext::default(),
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("depth"), None);
        assert_eq!(rows[0].coercion_errors.len(), 1);
    }

    #[test]
    fn bad_layout_is_a_sheet_parse_error() {
        let (_dir, path) = write_workbook("only header\n");
        let layout = SheetLayout {
            header_length: 3,
            column_name_row: 1,
            ..SheetLayout::default()
        };
        let err = read_workbook(&path, &specs(), &layout, RowPolicy::FailFile, &RowContext::default())
            .unwrap_err();
        assert_matches!(err, StrataError::SheetParse { .. });
    }
}
