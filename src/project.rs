//! The project registry: one immutable descriptor per dataset family.
//!
//! Every project shares the reconciliation engine and differs only in this
//! record: which columns its sheets carry, which filename conventions its
//! facilities use, how the linkage tuple is shaped and which historical
//! exceptions apply. The engine is parameterized by the descriptor, never
//! specialized per project.

use std::collections::BTreeMap;

use regex::Regex;

use crate::classify::{FilePattern, PatternLib};
use crate::coerce;
use crate::error::StrataError;
use crate::fieldspec::{ColumnMatcher, FieldSpec, RowPolicy, SheetLayout};

/// Filenames every project intentionally leaves unclassified.
const COMMON_SKIP: &[&str] = &[r"_metadata\.tsv$", r"SampleSheet", r"_Report\.pdf$"];

#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
    pub name: &'static str,
    pub data_type: &'static str,
    pub title_prefix: &'static str,
    /// Fixed tag vocabulary applied to every package.
    pub tags: &'static [&'static str],
    /// Resolved field values appended to the tag list (e.g. the amplicon).
    pub tag_fields: &'static [&'static str],
    pub field_specs: Vec<FieldSpec>,
    pub layout: SheetLayout,
    pub row_policy: RowPolicy,
    pub patterns: PatternLib,
    /// Alternate-role pattern list (experimental controls), when the project
    /// delivers such files alongside regular samples.
    pub control_patterns: Option<PatternLib>,
    /// Ordered field names forming the linkage tuple.
    pub linkage_shape: &'static [&'static str],
    /// Extracts the flow-cell id from the workbook filename itself.
    pub sheet_flow_re: Option<Regex>,
    /// Whether a row's own flow-cell column may feed the linkage tuple.
    /// Only set where the pilot sheets carried the flow cell per row; the
    /// filename rule is the default because resource keys are always
    /// filename-derived.
    pub flow_from_row: bool,
    /// Legacy workbooks whose linkage must fold the index in. Explicit
    /// allow-list; content sniffing cannot distinguish the pilot batches.
    pub index_linkage_sheets: &'static [&'static str],
    pub index_linkage_manifests: &'static [&'static str],
    /// Historical batches with no recoverable spreadsheet, synthesized as
    /// (extraction id, flow cell id) pairs.
    pub missing_packages: &'static [(&'static str, &'static str)],
    /// Some projects emit exact duplicate rows across sheets.
    pub dedup_rows: bool,
    /// Project-specific record shaping applied after field assembly.
    pub shape_hook: Option<fn(&mut BTreeMap<String, String>)>,
}

pub fn registry() -> Result<Vec<ProjectDescriptor>, StrataError> {
    Ok(vec![
        soil_amplicons()?,
        soil_metagenomics()?,
        stemcell_transcriptome()?,
    ])
}

pub fn descriptor(name: &str) -> Result<ProjectDescriptor, StrataError> {
    registry()?
        .into_iter()
        .find(|descriptor| descriptor.name == name)
        .ok_or_else(|| StrataError::UnknownProject(name.to_string()))
}

fn index12(value: &str) -> Result<Option<String>, String> {
    let val = value.trim();
    Ok((!val.is_empty()).then(|| val.chars().take(12).collect()))
}

// fixed read lengths provided by the sequencing facility
fn amplicon_shape(fields: &mut BTreeMap<String, String>) {
    let read_length = match fields.get("amplicon").map(String::as_str) {
        Some("18S") => "150bp",
        _ => "300bp",
    };
    fields.insert("read_length".to_string(), read_length.to_string());
    fields.insert("sample_type".to_string(), "soil".to_string());
}

fn metagenomics_shape(fields: &mut BTreeMap<String, String>) {
    fields.insert("read_length".to_string(), "150bp".to_string());
    fields.insert("sample_type".to_string(), "soil".to_string());
}

fn soil_amplicons() -> Result<ProjectDescriptor, StrataError> {
    let field_specs = vec![
        FieldSpec::coerced("sample_id", "Soil sample unique ID", coerce::extract_sample_id),
        FieldSpec::coerced("extraction_id", "Sample extraction ID", coerce::fix_extraction_id),
        FieldSpec::new("sequencing_facility", "Sequencing facility"),
        FieldSpec::coerced("amplicon", "Target", coerce::uppercase),
        FieldSpec::coerced("index", "Index", index12),
        FieldSpec::coerced("index1", "Index 1", index12),
        FieldSpec::coerced("index2", "Index2", index12),
        FieldSpec::coerced("pcr_1_to_10", "1:10 PCR, P=pass, F=fail", coerce::fix_pcr),
        FieldSpec::coerced("pcr_1_to_100", "1:100 PCR, P=pass, F=fail", coerce::fix_pcr),
        FieldSpec::coerced("pcr_neat", "neat PCR, P=pass, F=fail", coerce::fix_pcr),
        FieldSpec::coerced("dilution", "Dilution used", coerce::fix_interval),
        FieldSpec::new("sequencing_run_number", "Sequencing run number"),
        FieldSpec::new("flow_cell_id", "Flowcell"),
        FieldSpec::with_matchers(
            "reads",
            vec![
                ColumnMatcher::exact("# of RAW reads"),
                ColumnMatcher::exact("# of reads"),
            ],
            Some(coerce::clean_int),
        ),
        FieldSpec::new("sample_name", "Sample name on sample sheet"),
        FieldSpec::new("analysis_software_version", "AnalysisSoftwareVersion"),
        FieldSpec::new("comments", "Comments"),
    ];

    let patterns = PatternLib::new(
        vec![FilePattern::new(
            "amplicon-fastq",
            r"^(?P<id>\d{4,6})_(?P<extraction>\d)_(?P<amplicon>16S|18S|A16S|ITS)_(?P<vendor>AGRF|UNSW)_(?P<flow_cell_id>\w{5,10})_(?P<index>[GATC-]+)_(?P<lane>L\d{3})_(?P<read>[RI][12])\.fastq\.gz$",
        )?],
        COMMON_SKIP,
    )?;

    // control patterns first-match-wins ordering matters to callers that
    // combine the two lists; mock communities before the generic blanks
    let control_patterns = PatternLib::new(
        vec![
            FilePattern::new(
                "amplicon-control-mock",
                r"^(?P<control_type>Mock_community|Soil_DNA)_(?P<amplicon>16S|18S|A16S|ITS)_(?P<vendor>AGRF|UNSW)_(?P<flow_cell_id>\w{5,10})_(?P<index>[GATC-]+)_(?P<lane>L\d{3})_(?P<read>[RI][12])\.fastq\.gz$",
            )?,
            FilePattern::new(
                "amplicon-control-blank",
                r"^(?P<control_type>NTC|STAN)_(?P<amplicon>16S|18S|A16S|ITS)_(?P<vendor>AGRF|UNSW)_(?P<flow_cell_id>\w{5,10})_(?P<index>[GATC-]+)_(?P<lane>L\d{3})_(?P<read>[RI][12])\.fastq\.gz$",
            )?,
        ],
        COMMON_SKIP,
    )?;

    Ok(ProjectDescriptor {
        name: "soil-amplicons",
        data_type: "soil-genomics-amplicon",
        title_prefix: "Soil Amplicons",
        tags: &["amplicons", "soil"],
        tag_fields: &["amplicon"],
        field_specs,
        layout: SheetLayout {
            sheet_name: None,
            header_length: 2,
            column_name_row: 1,
        },
        row_policy: RowPolicy::FailFile,
        patterns,
        control_patterns: Some(control_patterns),
        linkage_shape: &["extraction_id", "amplicon", "amplicon_linkage"],
        sheet_flow_re: Some(flow_re(r"^.*_(\w+)_metadata.*\.tsv$")?),
        flow_from_row: false,
        index_linkage_sheets: &["Soil_18S_UNSW_A6BRJ_metadata.tsv"],
        index_linkage_manifests: &["Soil_18S_UNSW_A6BRJ_checksums.md5"],
        missing_packages: &[],
        dedup_rows: false,
        shape_hook: Some(amplicon_shape),
    })
}

fn soil_metagenomics() -> Result<ProjectDescriptor, StrataError> {
    let field_specs = vec![
        FieldSpec::coerced("sample_id", "Soil sample unique ID", coerce::extract_sample_id),
        FieldSpec::coerced("extraction_id", "Sample extraction ID", coerce::fix_extraction_id),
        FieldSpec::new("insert_size_range", "Insert size range"),
        FieldSpec::new("library_construction_protocol", "Library construction protocol"),
        FieldSpec::new("sequencer", "Sequencer"),
        FieldSpec::new("analysis_software_version", "CASAVA version"),
        FieldSpec::new("flow_cell_id", "Run #:Flow Cell ID"),
    ];

    let patterns = PatternLib::new(
        vec![FilePattern::new(
            "metagenomics-fastq",
            r"^(?P<id>\d{4,6})_(?P<extraction>\d)_(?P<vendor>AGRF|UNSW)_(?P<flow_cell_id>\w{9,10})_(?P<index>[GATC-]+)_(?P<lane>L\d{3})_(?P<read>[RI][12])\.fastq\.gz$",
        )?],
        COMMON_SKIP,
    )?;

    Ok(ProjectDescriptor {
        name: "soil-metagenomics",
        data_type: "soil-metagenomics",
        title_prefix: "Soil Metagenomics",
        tags: &["metagenomics", "soil"],
        tag_fields: &[],
        field_specs,
        layout: SheetLayout {
            sheet_name: None,
            header_length: 2,
            column_name_row: 1,
        },
        row_policy: RowPolicy::FailFile,
        patterns,
        control_patterns: None,
        linkage_shape: &["extraction_id", "flow_cell_id"],
        sheet_flow_re: Some(flow_re(r"^.*_([A-Z0-9]{9})_metadata.*\.tsv$")?),
        // pilot rows carry the flow cell in a column; the main dataset has
        // one flow cell per workbook, named in the filename
        flow_from_row: true,
        index_linkage_sheets: &[],
        index_linkage_manifests: &[],
        // pilot batches with no recoverable spreadsheet; minimal packages
        // are synthesized so their files still land somewhere
        missing_packages: &[
            ("8154_2", "H9BB6ADXX"),
            ("8155_2", "H81M8ADXX"),
            ("8158_2", "H9BB6ADXX"),
            ("8159_2", "H9BB6ADXX"),
            ("8160_3", "H81M8ADXX"),
            ("8161_3", "H81M8ADXX"),
            ("8262_2", "H9EV8ADXX"),
            ("8263_2", "H9BB6ADXX"),
            ("8268_2", "H80EYADXX"),
            ("8268_2", "H9EV8ADXX"),
            ("8269_2", "H80EYADXX"),
            ("8269_2", "H9EV8ADXX"),
            ("8270_2", "H80EYADXX"),
            ("8271_2", "H80EYADXX"),
            ("8271_2", "H9EV8ADXX"),
        ],
        dedup_rows: false,
        shape_hook: Some(metagenomics_shape),
    })
}

fn stemcell_transcriptome() -> Result<ProjectDescriptor, StrataError> {
    let field_specs = vec![
        // junk id cells are routine in these sheets; no point warning per row
        FieldSpec::with_matchers(
            "sample_id",
            vec![ColumnMatcher::pattern(r"^.*sample unique id$")?],
            Some(coerce::extract_sample_id_silent),
        ),
        FieldSpec::new("extraction_id", "Sample extraction ID"),
        FieldSpec::new("insert_size_range", "Insert size range"),
        FieldSpec::new("library_construction_protocol", "Library construction protocol"),
        FieldSpec::new("sequencer", "Sequencer"),
        FieldSpec::new("analysis_software_version", "CASAVA version"),
    ];

    let patterns = PatternLib::new(
        vec![FilePattern::new(
            "transcriptome-fastq",
            r"^(?P<id>\d{4,6})_(?P<library>PE|MP)_(?P<insert_size>\d*bp)_(?P<project>\w+)_(?P<vendor>AGRF|UNSW)_(?P<flow_cell_id>\w{9})_(?P<index>[GATC-]+)_(?P<lane>L\d{3})_(?P<read>[RI][12])\.fastq\.gz$",
        )?],
        COMMON_SKIP,
    )?;

    Ok(ProjectDescriptor {
        name: "stemcell-transcriptome",
        data_type: "stemcell-transcriptomics",
        title_prefix: "Stemcell Transcriptomics",
        tags: &["transcriptome"],
        tag_fields: &[],
        field_specs,
        layout: SheetLayout {
            sheet_name: None,
            header_length: 2,
            column_name_row: 1,
        },
        row_policy: RowPolicy::FailFile,
        patterns,
        control_patterns: None,
        linkage_shape: &["sample_id"],
        sheet_flow_re: None,
        flow_from_row: false,
        index_linkage_sheets: &[],
        index_linkage_manifests: &[],
        missing_packages: &[],
        // duplicate rows are routine in this project's sheets; they have to
        // match exactly and the sample id is the primary key, so uniquifying
        // is harmless
        dedup_rows: true,
        shape_hook: None,
    })
}

fn flow_re(pattern: &str) -> Result<Regex, StrataError> {
    Regex::new(pattern).map_err(|err| StrataError::InvalidPattern {
        name: pattern.to_string(),
        reason: err.to_string(),
    })
}
