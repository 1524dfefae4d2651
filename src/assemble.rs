//! The package/resource assembler: drives the field-spec engine and the
//! manifest reconciler over one project directory and emits the two output
//! collections the publishing layer consumes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info};

use crate::classify::basename;
use crate::coerce;
use crate::context::{self, ContextualSource, TrackSheet};
use crate::error::StrataError;
use crate::fieldspec::{self, RowContext, SheetRow};
use crate::linkage::{self, LinkageKey};
use crate::manifest::{self, Outcome};
use crate::project::ProjectDescriptor;

#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub identity: String,
    pub title: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub linkage: LinkageKey,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub checksum: String,
    pub name: String,
    pub resource_type: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// A workbook that could not be parsed; it contributed zero rows.
    SheetParse { file: String, reason: String },
    /// A manifest line matching neither pattern list and no skip rule.
    Unclassified { manifest: String, filename: String },
}

#[derive(Debug, Serialize)]
pub struct IngestOutput {
    pub packages: BTreeMap<String, Package>,
    pub resources: Vec<(LinkageKey, String, Resource)>,
    /// Filenames accounted to the alternate-role list.
    pub other_role: Vec<String>,
    pub anomalies: Vec<Anomaly>,
}

/// Explicit identity-to-provenance map. Two packages collapsing to one
/// identity means a linkage or slug derivation bug, so the conflict carries
/// both provenances and stops the run.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    claimed: BTreeMap<String, String>,
}

impl IdentityRegistry {
    pub fn claim(&mut self, identity: &str, provenance: &str) -> Result<(), StrataError> {
        if let Some(first) = self.claimed.get(identity) {
            return Err(StrataError::IdentityConflict {
                identity: identity.to_string(),
                first: first.clone(),
                second: provenance.to_string(),
            });
        }
        self.claimed.insert(identity.to_string(), provenance.to_string());
        Ok(())
    }
}

pub struct Assembler {
    descriptor: ProjectDescriptor,
    contextual: Vec<Box<dyn ContextualSource>>,
    track: Option<TrackSheet>,
    /// Per-workbook/manifest context, keyed by basename.
    workbook_info: BTreeMap<String, RowContext>,
}

impl Assembler {
    pub fn new(
        descriptor: ProjectDescriptor,
        contextual: Vec<Box<dyn ContextualSource>>,
        track: Option<TrackSheet>,
        workbook_info: BTreeMap<String, RowContext>,
    ) -> Self {
        Self {
            descriptor,
            contextual,
            track,
            workbook_info,
        }
    }

    pub fn ingest(&self, dir: &Utf8Path) -> Result<IngestOutput, StrataError> {
        let mut anomalies = Vec::new();
        let packages = self.packages(dir, &mut anomalies)?;
        let (resources, other_role) = self.resources(dir, &mut anomalies)?;
        Ok(IngestOutput {
            packages,
            resources,
            other_role,
            anomalies,
        })
    }

    pub fn packages(
        &self,
        dir: &Utf8Path,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<BTreeMap<String, Package>, StrataError> {
        info!(project = self.descriptor.name, %dir, "ingesting workbook metadata");
        let mut registry = IdentityRegistry::default();
        let mut packages = BTreeMap::new();

        // historical batches with no recoverable spreadsheet
        for (extraction_id, flow_id) in self.descriptor.missing_packages {
            let manifest = one_matching_manifest(dir, flow_id)?;
            let context = self.context_for(&manifest);
            let package =
                self.synthesize_package(extraction_id, flow_id, &context)?;
            registry.claim(&package.identity, "exception-table")?;
            packages.insert(package.identity.clone(), package);
        }

        let mut rows: Vec<(String, SheetRow)> = Vec::new();
        for workbook in workbook_files(dir)? {
            let file = basename(workbook.as_str()).to_string();
            info!(file = %file, "processing metadata workbook");
            let context = self.context_for(&file);
            match fieldspec::read_workbook(
                &workbook,
                &self.descriptor.field_specs,
                &self.descriptor.layout,
                self.descriptor.row_policy,
                &context,
            ) {
                Ok(sheet_rows) => {
                    rows.extend(sheet_rows.into_iter().map(|row| (file.clone(), row)));
                }
                Err(err) => {
                    // a malformed workbook is not safe to partially trust;
                    // it contributes nothing and the run continues
                    error!(file = %file, %err, "cannot parse workbook, skipping file");
                    anomalies.push(Anomaly::SheetParse {
                        file,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if self.descriptor.dedup_rows {
            // duplicates must match exactly, across workbooks included;
            // output order becomes sorted order over row content
            let mut seen: BTreeSet<SheetRow> = BTreeSet::new();
            rows.retain(|(_, row)| seen.insert(row.clone()));
            rows.sort_by(|a, b| a.1.cmp(&b.1));
        }

        for (file, row) in &rows {
            // a row without a sample id is a template or blank row
            let Some(sample_id) = row.get("sample_id") else {
                continue;
            };
            let package = self.assemble_package(file, sample_id, row)?;
            registry.claim(&package.identity, file)?;
            packages.insert(package.identity.clone(), package);
        }
        Ok(packages)
    }

    fn assemble_package(
        &self,
        file: &str,
        sample_id: &str,
        row: &SheetRow,
    ) -> Result<Package, StrataError> {
        let mut fields = BTreeMap::new();
        for (field, value) in &row.values {
            if let Some(value) = value {
                fields.insert(field.to_string(), value.clone());
            }
        }
        fields.insert("sample_id".to_string(), sample_id.to_string());

        if self.shape_uses("extraction_id") {
            let extraction_id = coerce::make_extraction_id(row.get("extraction_id"), sample_id);
            fields.insert("extraction_id".to_string(), extraction_id);
        }
        if self.needs_flow_id() {
            let flow_id = self.linkage_flow(file, row)?;
            fields
                .entry("flow_cell_id".to_string())
                .or_insert_with(|| flow_id.clone());
            if self.shape_uses("amplicon_linkage") {
                let index_linked = self
                    .descriptor
                    .index_linkage_sheets
                    .iter()
                    .any(|name| *name == file);
                let index = fields.get("index").cloned().unwrap_or_default();
                fields.insert(
                    "amplicon_linkage".to_string(),
                    linkage::amplicon_linkage(index_linked, &flow_id, &index),
                );
            }
        }

        self.finish_package(fields, &row.context)
    }

    fn synthesize_package(
        &self,
        extraction_id: &str,
        flow_id: &str,
        context: &RowContext,
    ) -> Result<Package, StrataError> {
        let short = extraction_id.split('_').next().unwrap_or(extraction_id);
        let mut fields = BTreeMap::new();
        fields.insert(
            "sample_id".to_string(),
            format!("{}{short}", coerce::SAMPLE_ID_PREFIX),
        );
        fields.insert("extraction_id".to_string(), extraction_id.to_string());
        fields.insert("flow_cell_id".to_string(), flow_id.to_string());
        self.finish_package(fields, context)
    }

    /// The tail of assembly shared by spreadsheet-derived and synthesized
    /// packages: tracking fields, contextual enrichment, display fields,
    /// identity.
    fn finish_package(
        &self,
        mut fields: BTreeMap<String, String>,
        context: &RowContext,
    ) -> Result<Package, StrataError> {
        if let Some(ticket) = &context.ticket {
            fields.insert("ticket".to_string(), ticket.clone());
        }
        if let Some(facility) = &context.facility_code {
            fields.insert("facility".to_string(), facility.to_uppercase());
        }
        if let (Some(track), Some(ticket)) = (&self.track, &context.ticket) {
            if let Some(meta) = track.get(ticket) {
                for (key, value) in meta {
                    if key == "ticket" {
                        continue;
                    }
                    let value = match key.as_str() {
                        "date_of_transfer" | "date_of_transfer_to_archive" => {
                            coerce::date_or_str(value)
                                .ok()
                                .flatten()
                                .unwrap_or_else(|| value.clone())
                        }
                        // strictly dates; unparseable values are dropped
                        "data_generated" | "archive_ingestion_date" => {
                            match coerce::date_iso(value).ok().flatten() {
                                Some(date) => date,
                                None => continue,
                            }
                        }
                        _ => value.clone(),
                    };
                    fields.insert(key.clone(), value);
                }
            }
        }

        let sample_id = fields
            .get("sample_id")
            .cloned()
            .ok_or_else(|| StrataError::LinkageField("sample_id".to_string()))?;
        context::apply_sample_context(&self.contextual, &sample_id, &mut fields);

        if let Some(hook) = self.descriptor.shape_hook {
            hook(&mut fields);
        }

        let key = LinkageKey::from_attrs(self.descriptor.linkage_shape, &fields)?;
        let identity = linkage::package_identity(self.descriptor.data_type, &key);
        let title = format!("{} {}", self.descriptor.title_prefix, key.parts().join(" "));

        let mut tags: Vec<String> = self
            .descriptor
            .tags
            .iter()
            .map(|tag| tag.to_string())
            .collect();
        for field in self.descriptor.tag_fields {
            if let Some(value) = fields.get(*field) {
                tags.push(value.clone());
            }
        }

        fields.insert("type".to_string(), self.descriptor.data_type.to_string());
        Ok(Package {
            identity,
            notes: title.clone(),
            title,
            tags,
            linkage: key,
            fields,
        })
    }

    pub fn resources(
        &self,
        dir: &Utf8Path,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<(Vec<(LinkageKey, String, Resource)>, Vec<String>), StrataError> {
        info!(project = self.descriptor.name, %dir, "ingesting manifest information");

        // first pass: names the alternate-role list accounts for
        let other_role_names = match &self.descriptor.control_patterns {
            Some(lib) => manifest::collect_classified(dir, lib)?,
            None => BTreeSet::new(),
        };

        let mut resources = Vec::new();
        let mut other_role = Vec::new();
        for manifest_path in manifest::manifest_files(dir)? {
            let file = basename(manifest_path.as_str()).to_string();
            info!(file = %file, "processing manifest");
            let context = self.context_for(&file);
            let index_linked = self
                .descriptor
                .index_linkage_manifests
                .iter()
                .any(|name| *name == file);
            let entries = manifest::parse_manifest(&manifest_path)?;
            for line in manifest::reconcile(&entries, &self.descriptor.patterns, &other_role_names)
            {
                match line.outcome {
                    Outcome::Matched(attrs) => {
                        let resource =
                            self.assemble_resource(&line.filename, &line.checksum, attrs, index_linked)?;
                        resources.push((
                            resource.0,
                            source_url(&context, &line.filename),
                            resource.1,
                        ));
                    }
                    Outcome::OtherRole => other_role.push(line.filename),
                    Outcome::Skipped => {}
                    Outcome::Unrecognized => anomalies.push(Anomaly::Unclassified {
                        manifest: file.clone(),
                        filename: line.filename,
                    }),
                }
            }
        }
        Ok((resources, other_role))
    }

    fn assemble_resource(
        &self,
        filename: &str,
        checksum: &str,
        mut attrs: BTreeMap<String, String>,
        index_linked: bool,
    ) -> Result<(LinkageKey, Resource), StrataError> {
        if let Some(raw_id) = attrs.get("id").cloned() {
            if let Ok(Some(sample_id)) = coerce::extract_sample_id(&raw_id) {
                if self.shape_uses("extraction_id") {
                    if let Some(extraction) = attrs.get("extraction").cloned() {
                        attrs.insert(
                            "extraction_id".to_string(),
                            format!("{}_{extraction}", coerce::short_sample_id(&sample_id)),
                        );
                    }
                }
                attrs.insert("sample_id".to_string(), sample_id);
            }
        }
        if self.shape_uses("amplicon_linkage") {
            let flow_id = attrs
                .get("flow_cell_id")
                .ok_or_else(|| StrataError::LinkageField("flow_cell_id".to_string()))?;
            let index = attrs.get("index").map(String::as_str).unwrap_or("");
            attrs.insert(
                "amplicon_linkage".to_string(),
                linkage::amplicon_linkage(index_linked, flow_id, index),
            );
        }
        let key = LinkageKey::from_attrs(self.descriptor.linkage_shape, &attrs)?;

        context::apply_filename_context(&self.contextual, filename, &mut attrs);
        let resource = Resource {
            checksum: checksum.to_string(),
            name: filename.to_string(),
            resource_type: self.descriptor.data_type.to_string(),
            fields: attrs,
        };
        Ok((key, resource))
    }

    fn shape_uses(&self, field: &str) -> bool {
        self.descriptor.linkage_shape.contains(&field)
    }

    fn needs_flow_id(&self) -> bool {
        self.shape_uses("flow_cell_id") || self.shape_uses("amplicon_linkage")
    }

    /// Flow cell feeding the linkage tuple. Resource keys are always derived
    /// from the delivered filename, so the package side must use the workbook
    /// filename too; only projects whose pilot sheets carried the flow cell
    /// in a column may prefer the row value.
    fn linkage_flow(&self, file: &str, row: &SheetRow) -> Result<String, StrataError> {
        if self.descriptor.flow_from_row {
            if let Some(flow) = row.get("flow_cell_id") {
                return Ok(flow.to_string());
            }
        }
        self.flow_from_filename(file)
    }

    fn flow_from_filename(&self, file: &str) -> Result<String, StrataError> {
        let re = self
            .descriptor
            .sheet_flow_re
            .as_ref()
            .ok_or_else(|| StrataError::SheetParse {
                file: file.to_string(),
                reason: "no flow cell column and no filename rule".to_string(),
            })?;
        let caps = re.captures(file).ok_or_else(|| StrataError::SheetParse {
            file: file.to_string(),
            reason: "unable to find flow cell in workbook filename".to_string(),
        })?;
        Ok(caps[1].to_string())
    }

    fn context_for(&self, file: &str) -> RowContext {
        self.workbook_info.get(file).cloned().unwrap_or_default()
    }
}

fn workbook_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StrataError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| StrataError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| StrataError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|path| StrataError::Filesystem(format!("non-UTF8 path {}", path.display())))?;
        if path.extension() == Some("tsv") && path.as_str().ends_with("_metadata.tsv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Exactly one manifest in `dir` naming the given flow cell.
fn one_matching_manifest(dir: &Utf8Path, flow_id: &str) -> Result<String, StrataError> {
    let matches: Vec<String> = manifest::manifest_files(dir)?
        .into_iter()
        .map(|path| basename(path.as_str()).to_string())
        .filter(|name| name.contains(flow_id))
        .collect();
    if matches.len() != 1 {
        return Err(StrataError::AmbiguousGlob {
            pattern: format!("*{flow_id}*.md5"),
            count: matches.len(),
        });
    }
    Ok(matches.into_iter().next().unwrap())
}

fn source_url(context: &RowContext, filename: &str) -> String {
    match &context.base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), filename),
        None => filename.to_string(),
    }
}
