//! Cell-value cleanup functions applied by field specs.
//!
//! Facility spreadsheets arrive with template residue ("e.g. ...", "i.e. P or
//! F"), inconsistent delimiters and free-text dates. Every function here is
//! total over `&str`: a value that cannot be repaired becomes absent, never a
//! panic. A returned `Err` carries a reason string and is routed through the
//! row policy of the sheet reader.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{error, warn};

/// Canonical handle prefix for archive sample identifiers.
pub const SAMPLE_ID_PREFIX: &str = "102.100.100/";

pub type CoerceFn = fn(&str) -> Result<Option<String>, String>;

static SAMPLE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^102\.100\.100[/.](\d+)$").unwrap());
static SAMPLE_ID_ABBREV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)$").unwrap());
// doubled-dot form seen in the oldest submission batches
static SAMPLE_ID_LEGACY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^102\.100\.\.100[/.](\d+)$").unwrap());
static EXTRACTION_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4,6}_\d").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+\.?\d*").unwrap());

/// Parse a sample identifier with or without the handle prefix, returning the
/// canonical prefixed form. Header residue and blanks are absent, not errors.
pub fn extract_sample_id(value: &str) -> Result<Option<String>, String> {
    Ok(sample_id(value, false))
}

/// As [`extract_sample_id`] but without the anomaly warning, for columns where
/// junk values are routine.
pub fn extract_sample_id_silent(value: &str) -> Result<Option<String>, String> {
    Ok(sample_id(value, true))
}

fn sample_id(value: &str, silent: bool) -> Option<String> {
    let mut s = value.trim().to_string();
    if s.is_empty() || s.starts_with("e.g. ") {
        return None;
    }
    // duplicated prefix, e.g. 102.100.100.102.100.100.25977
    s = s.replace("102.100.100.102.100.100.", "102.100.100/");
    // an extraction number tacked on with an underscore
    if let Some((head, _)) = s.rsplit_once('_') {
        s = head.to_string();
    }
    for re in [&*SAMPLE_ID_RE, &*SAMPLE_ID_ABBREV_RE, &*SAMPLE_ID_LEGACY_RE] {
        if let Some(caps) = re.captures(&s) {
            return Some(format!("{}{}", SAMPLE_ID_PREFIX, &caps[1]));
        }
    }
    if !silent {
        warn!("unable to parse sample id: `{value}'");
    }
    None
}

/// The digits after the handle prefix.
pub fn short_sample_id(sample_id: &str) -> &str {
    sample_id.rsplit('/').next().unwrap_or(sample_id)
}

/// Normalize a `<sample>_<n>` extraction identifier. Bare numeric cells get
/// `_1` appended; `-` was used interchangeably with `_` in early submissions.
pub fn fix_extraction_id(value: &str) -> Result<Option<String>, String> {
    let val = value.trim().replace('-', "_");
    if val.is_empty() || val.starts_with("e.g. ") {
        return Ok(None);
    }
    if val.chars().all(|ch| ch.is_ascii_digit()) {
        return Ok(Some(format!("{val}_1")));
    }
    if !EXTRACTION_ID_RE.is_match(&val) {
        warn!("invalid extraction id: `{value}'");
        return Ok(None);
    }
    Ok(Some(val))
}

/// Default an absent extraction id to `<short sample id>_1`, per the data
/// manager's instruction for sheets that omit the column.
pub fn make_extraction_id(extraction_id: Option<&str>, sample_id: &str) -> String {
    match extraction_id {
        Some(id) => id.to_string(),
        None => format!("{}_1", short_sample_id(sample_id)),
    }
}

/// PCR pass/fail cell: `P`, `F` or blank. Header residue is absent; anything
/// else is recorded as `X` and reported.
pub fn fix_pcr(value: &str) -> Result<Option<String>, String> {
    let val = value.trim();
    if val == "i.e. P or F" {
        return Ok(None);
    }
    match val {
        "" => Ok(None),
        "P" | "F" => Ok(Some(val.to_string())),
        other => {
            error!("PCR value is neither F, P or blank, setting to X: `{other}'");
            Ok(Some("X".to_string()))
        }
    }
}

/// First integer literal buried in a noisy cell.
pub fn clean_int(value: &str) -> Result<Option<String>, String> {
    Ok(clean_number(value)?.map(|n| {
        n.parse::<f64>()
            .map(|f| (f as i64).to_string())
            .unwrap_or(n)
    }))
}

/// First numeric literal buried in a noisy cell.
pub fn clean_number(value: &str) -> Result<Option<String>, String> {
    let val = value.trim();
    if val.is_empty() {
        return Ok(None);
    }
    if val.parse::<f64>().is_ok() {
        return Ok(Some(val.to_string()));
    }
    Ok(NUMBER_RE.find(val).map(|m| m.as_str().to_string()))
}

const DATE_NULL_VOCABULARY: &[&str] = &[
    "unknown",
    "Unknown",
    "Not yet assigned",
    "Not applicable",
    "(null)",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y-%b-%d", "%d/%m/%Y", "%d/%m/%y"];

/// Parse the handful of date formats facilities actually use and emit ISO.
pub fn date_iso(value: &str) -> Result<Option<String>, String> {
    Ok(parse_date(value, false).map(|d| d.format("%Y-%m-%d").to_string()))
}

/// ISO date when the value parses as one, otherwise the value untouched.
pub fn date_or_str(value: &str) -> Result<Option<String>, String> {
    match parse_date(value, true) {
        Some(d) => Ok(Some(d.format("%Y-%m-%d").to_string())),
        None => {
            let val = value.trim();
            Ok((!val.is_empty()).then(|| val.to_string()))
        }
    }
}

fn parse_date(value: &str, silent: bool) -> Option<NaiveDate> {
    let val = value.trim();
    if val.is_empty() || DATE_NULL_VOCABULARY.contains(&val) {
        return None;
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(val, format) {
            return Some(date);
        }
    }
    if !silent {
        error!("date `{val}' is not in a supported format");
    }
    None
}

static TIME_RESIDUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::\d{2})?$").unwrap());

/// Dilution ratios like `1:10` come back from some exports rendered as a
/// clock time. Convert the time residue back to the ratio.
pub fn fix_interval(value: &str) -> Result<Option<String>, String> {
    let val = value.trim();
    if val.is_empty() {
        return Ok(None);
    }
    if let Some(caps) = TIME_RESIDUE_RE.captures(val) {
        return Ok(Some(format!(
            "{}:{}",
            strip_leading_zeros(&caps[1]),
            strip_leading_zeros(&caps[2])
        )));
    }
    Ok(Some(val.to_string()))
}

fn strip_leading_zeros(digits: &str) -> &str {
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() { "0" } else { stripped }
}

pub fn uppercase(value: &str) -> Result<Option<String>, String> {
    let val = value.trim();
    Ok((!val.is_empty()).then(|| val.to_uppercase()))
}
