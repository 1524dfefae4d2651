use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use strata_reconciler::assemble::{Anomaly, Assembler, IngestOutput};
use strata_reconciler::context::{ContextualSource, TrackSheet};
use strata_reconciler::error::StrataError;
use strata_reconciler::fieldspec::RowContext;
use strata_reconciler::linkage::LinkageKey;
use strata_reconciler::project;

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn write_file(dir: &Utf8Path, name: &str, content: &str) {
    fs::write(dir.join(name).as_std_path(), content).unwrap();
}

/// Annotations recorded against samples and archived files, outside the
/// facility workbooks.
struct FieldNotes;

impl ContextualSource for FieldNotes {
    fn by_sample(&self, sample_id: &str) -> BTreeMap<String, String> {
        if sample_id == "102.100.100/8101" {
            [("vegetation_type".to_string(), "woodland".to_string())].into()
        } else {
            BTreeMap::new()
        }
    }

    fn by_filename(&self, filename: &str) -> BTreeMap<String, String> {
        if filename.ends_with(".fastq.gz") {
            [("archive_checked".to_string(), "2016-04-01".to_string())].into()
        } else {
            BTreeMap::new()
        }
    }
}

fn amplicon_fixture(dir: &Utf8Path) {
    write_file(
        dir,
        "Soil_16S_AGRF_A6BRJ_metadata.tsv",
        "Amplicon sequencing metadata\n\
         Soil sample unique ID\tSample extraction ID\tSequencing facility\tTarget\tIndex\tIndex 1\tDilution used\t# of reads\n\
         8101\t8101_1\tAGRF\t16s\tGGACTCCT-TATCCTCT\tACGTACGTACGTACGT\t01:10:00\tabout 35000\n",
    );
    write_file(
        dir,
        "Soil_16S_AGRF_A6BRJ_checksums.md5",
        "d41d8cd98f00b204e9800998ecf8427e  8101_1_16S_AGRF_A6BRJ_GGACTCCT-TATCCTCT_L001_R1.fastq.gz\n\
         aabbccdd11223344  Mock_community_16S_AGRF_A6BRJ_GGACTCCT-TATCCTCT_L001_R1.fastq.gz\n\
         deadbeef01020304\tSoil_16S_AGRF_A6BRJ_metadata.tsv\n\
         cafebabe01020304  mystery.bin\n",
    );
}

fn amplicon_context() -> BTreeMap<String, RowContext> {
    let context = RowContext {
        ticket: Some("DESK-101".to_string()),
        facility_code: Some("agrf".to_string()),
        base_url: Some("https://mirror.example/amplicons/".to_string()),
    };
    [
        ("Soil_16S_AGRF_A6BRJ_metadata.tsv".to_string(), context.clone()),
        ("Soil_16S_AGRF_A6BRJ_checksums.md5".to_string(), context),
    ]
    .into()
}

fn ingest_amplicons(dir: &Utf8Path, track: Option<TrackSheet>) -> IngestOutput {
    let descriptor = project::descriptor("soil-amplicons").unwrap();
    let assembler = Assembler::new(
        descriptor,
        vec![Box::new(FieldNotes)],
        track,
        amplicon_context(),
    );
    assembler.ingest(dir).unwrap()
}

#[test]
fn amplicon_run_end_to_end() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let dir = root.join("amplicons");
    fs::create_dir(dir.as_std_path()).unwrap();
    amplicon_fixture(&dir);
    write_file(
        &root,
        "track.tsv",
        "ticket\tdate_of_transfer\tdata_generated\tarchive_ingestion_date\n\
         DESK-101\t5/3/2016\tyes\t10/3/2016\n",
    );
    let track = TrackSheet::read(&root.join("track.tsv")).unwrap();

    let output = ingest_amplicons(&dir, Some(track));

    assert_eq!(output.packages.len(), 1);
    let package = &output.packages["soil-genomics-amplicon-8101-1-16s-a6brj"];
    assert_eq!(package.title, "Soil Amplicons 8101_1 16S A6BRJ");
    assert_eq!(package.linkage.parts(), ["8101_1", "16S", "A6BRJ"]);
    assert!(package.tags.iter().any(|t| t == "amplicons"));
    assert!(package.tags.iter().any(|t| t == "16S"));

    let fields = &package.fields;
    assert_eq!(fields.get("sample_id").map(String::as_str), Some("102.100.100/8101"));
    assert_eq!(fields.get("flow_cell_id").map(String::as_str), Some("A6BRJ"));
    assert_eq!(fields.get("reads").map(String::as_str), Some("35000"));
    assert_eq!(fields.get("ticket").map(String::as_str), Some("DESK-101"));
    assert_eq!(fields.get("facility").map(String::as_str), Some("AGRF"));
    // tracking dates normalized to ISO on the way in; the strictly-dated
    // fields drop values that do not parse
    assert_eq!(fields.get("date_of_transfer").map(String::as_str), Some("2016-03-05"));
    assert_eq!(fields.get("archive_ingestion_date").map(String::as_str), Some("2016-03-10"));
    assert_eq!(fields.get("data_generated"), None);
    // index truncation and the clock-time dilution residue
    assert_eq!(fields.get("index1").map(String::as_str), Some("ACGTACGTACGT"));
    assert_eq!(fields.get("dilution").map(String::as_str), Some("1:10"));
    // contextual enrichment and the project shape hook
    assert_eq!(fields.get("vegetation_type").map(String::as_str), Some("woodland"));
    assert_eq!(fields.get("read_length").map(String::as_str), Some("300bp"));
    assert_eq!(fields.get("type").map(String::as_str), Some("soil-genomics-amplicon"));

    // the one sample file becomes a resource sharing the package's linkage
    assert_eq!(output.resources.len(), 1);
    let (key, url, resource) = &output.resources[0];
    assert_eq!(*key, package.linkage);
    assert_eq!(
        url,
        "https://mirror.example/amplicons/8101_1_16S_AGRF_A6BRJ_GGACTCCT-TATCCTCT_L001_R1.fastq.gz"
    );
    assert_eq!(resource.checksum, "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(
        resource.fields.get("sample_id").map(String::as_str),
        Some("102.100.100/8101")
    );
    assert_eq!(
        resource.fields.get("archive_checked").map(String::as_str),
        Some("2016-04-01")
    );

    // the mock community file is accounted to the control list, the workbook
    // itself is skip-listed, and the stray binary is the single anomaly
    assert_eq!(output.other_role.len(), 1);
    assert!(output.other_role[0].starts_with("Mock_community"));
    assert_eq!(output.anomalies.len(), 1);
    assert_matches!(
        &output.anomalies[0],
        Anomaly::Unclassified { filename, .. } if filename == "mystery.bin"
    );
}

#[test]
fn index_linked_batches_fold_the_index_into_linkage() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    write_file(
        &dir,
        "Soil_18S_UNSW_A6BRJ_metadata.tsv",
        "Amplicon sequencing metadata\n\
         Soil sample unique ID\tSample extraction ID\tTarget\tIndex\n\
         8201\t8201_1\t18s\tGGACTCCT\n",
    );
    write_file(
        &dir,
        "Soil_18S_UNSW_A6BRJ_checksums.md5",
        "aabbccdd00112233  8201_1_18S_UNSW_A6BRJ_GGACTCCT_L001_R1.fastq.gz\n",
    );

    let descriptor = project::descriptor("soil-amplicons").unwrap();
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let output = assembler.ingest(&dir).unwrap();

    let package = output.packages.values().next().unwrap();
    assert_eq!(package.linkage.parts(), ["8201_1", "18S", "A6BRJ_GGACTCCT"]);
    // 18S pilot runs were sequenced at the shorter read length
    assert_eq!(package.fields.get("read_length").map(String::as_str), Some("150bp"));

    let (key, _, _) = &output.resources[0];
    assert_eq!(*key, package.linkage);
}

#[test]
fn amplicon_flowcell_column_does_not_rekey_the_package() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    // a filled Flowcell cell is kept as data, but resource keys are derived
    // from delivered filenames, so the linkage flow cell must come from the
    // workbook filename
    write_file(
        &dir,
        "Soil_16S_AGRF_A6BRJ_metadata.tsv",
        "Amplicon sequencing metadata\n\
         Soil sample unique ID\tSample extraction ID\tTarget\tFlowcell\n\
         8101\t8101_1\t16s\tC9999XXX\n",
    );
    write_file(
        &dir,
        "Soil_16S_AGRF_A6BRJ_checksums.md5",
        "d41d8cd98f00b204e9800998ecf8427e  8101_1_16S_AGRF_A6BRJ_GGACTCCT-TATCCTCT_L001_R1.fastq.gz\n",
    );

    let descriptor = project::descriptor("soil-amplicons").unwrap();
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let output = assembler.ingest(&dir).unwrap();

    let package = &output.packages["soil-genomics-amplicon-8101-1-16s-a6brj"];
    assert_eq!(package.linkage.parts(), ["8101_1", "16S", "A6BRJ"]);
    assert_eq!(
        package.fields.get("flow_cell_id").map(String::as_str),
        Some("C9999XXX")
    );
    let (key, _, _) = &output.resources[0];
    assert_eq!(*key, package.linkage);
}

#[test]
fn duplicate_identity_stops_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    write_file(
        &dir,
        "Soil_16S_AGRF_A6BRJ_metadata.tsv",
        "Amplicon sequencing metadata\n\
         Soil sample unique ID\tSample extraction ID\tTarget\n\
         8101\t8101_1\t16s\n\
         8101\t8101_1\t16s\n",
    );

    let descriptor = project::descriptor("soil-amplicons").unwrap();
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let err = assembler.ingest(&dir).unwrap_err();
    assert_matches!(
        err,
        StrataError::IdentityConflict { identity, .. }
            if identity == "soil-genomics-amplicon-8101-1-16s-a6brj"
    );
}

#[test]
fn unparseable_workbook_is_an_anomaly_not_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    amplicon_fixture(&dir);
    // a single line cannot satisfy the two-row header layout
    write_file(&dir, "Broken_XYZ_metadata.tsv", "not a real export\n");

    let output = ingest_amplicons(&dir, None);

    assert_eq!(output.packages.len(), 1);
    let parse_anomalies: Vec<_> = output
        .anomalies
        .iter()
        .filter(|anomaly| matches!(anomaly, Anomaly::SheetParse { file, .. } if file == "Broken_XYZ_metadata.tsv"))
        .collect();
    assert_eq!(parse_anomalies.len(), 1);
}

#[test]
fn transcriptome_duplicate_rows_collapse() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    let header = "Transcriptome sequencing metadata\n\
                  Stemcell sample unique ID\tSample extraction ID\tSequencer\n";
    // the repeated 8101 rows differ only by stray whitespace in a non-key
    // cell; cell trimming makes them exact duplicates
    write_file(
        &dir,
        "Stemcell_AGRF_CA3FHANXX_metadata.tsv",
        &format!("{header}8101\t8101_1\tHiSeq\n"),
    );
    write_file(
        &dir,
        "Stemcell_UNSW_CB2GGANXX_metadata.tsv",
        &format!("{header}8101\t8101_1\t HiSeq \n8102\t8102_1\tHiSeq\n"),
    );

    let descriptor = project::descriptor("stemcell-transcriptome").unwrap();
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let output = assembler.ingest(&dir).unwrap();

    // the repeated row uniquifies instead of tripping the identity check
    assert_eq!(output.packages.len(), 2);
    assert!(output
        .packages
        .contains_key("stemcell-transcriptomics-102-100-100-8101"));
    assert!(output
        .packages
        .contains_key("stemcell-transcriptomics-102-100-100-8102"));
}

fn metagenomics_manifests(dir: &Utf8Path) {
    write_file(
        dir,
        "Soil_AGRF_H9BB6ADXX_checksums.md5",
        "00112233445566778899aabbccddeeff  8154_2_AGRF_H9BB6ADXX_GGACTCCT_L001_R1.fastq.gz\n",
    );
    for manifest in [
        "Soil_AGRF_H81M8ADXX_checksums.md5",
        "Soil_UNSW_H9EV8ADXX_checksums.md5",
        "Soil_UNSW_H80EYADXX_checksums.md5",
    ] {
        write_file(dir, manifest, "");
    }
}

#[test]
fn metagenomics_missing_packages_are_synthesized() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    metagenomics_manifests(&dir);

    let descriptor = project::descriptor("soil-metagenomics").unwrap();
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let output = assembler.ingest(&dir).unwrap();

    // no workbooks at all: every package comes from the exception table
    assert_eq!(output.packages.len(), 15);
    // extractions resequenced on a second flow cell stay distinct packages
    assert!(output
        .packages
        .contains_key("soil-metagenomics-8269-2-h80eyadxx"));
    assert!(output
        .packages
        .contains_key("soil-metagenomics-8269-2-h9ev8adxx"));
    let package = &output.packages["soil-metagenomics-8154-2-h9bb6adxx"];
    assert_eq!(package.linkage.parts(), ["8154_2", "H9BB6ADXX"]);
    assert_eq!(
        package.fields.get("sample_id").map(String::as_str),
        Some("102.100.100/8154")
    );
    assert_eq!(package.fields.get("read_length").map(String::as_str), Some("150bp"));

    // the manifest line for the lost batch still links up
    assert_eq!(output.resources.len(), 1);
    let (key, _, resource) = &output.resources[0];
    assert_eq!(
        *key,
        LinkageKey::new(vec!["8154_2".to_string(), "H9BB6ADXX".to_string()])
    );
    assert_eq!(resource.name, "8154_2_AGRF_H9BB6ADXX_GGACTCCT_L001_R1.fastq.gz");
    assert!(output.anomalies.is_empty());
}

#[test]
fn metagenomics_pilot_rows_carry_their_own_flow_cell() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    metagenomics_manifests(&dir);
    // the workbook filename names no flow cell; the row column must win
    write_file(
        &dir,
        "Soil_pilot_metadata.tsv",
        "Metagenomics sequencing metadata\n\
         Soil sample unique ID\tSample extraction ID\tRun #:Flow Cell ID\n\
         8200\t8200_1\tC0FACACXX\n",
    );

    let descriptor = project::descriptor("soil-metagenomics").unwrap();
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let output = assembler.ingest(&dir).unwrap();

    let package = &output.packages["soil-metagenomics-8200-1-c0facacxx"];
    assert_eq!(package.linkage.parts(), ["8200_1", "C0FACACXX"]);
}
