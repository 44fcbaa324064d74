//! SRA submission tables built from LabxDB replicates.
//!
//! Each replicate becomes one row of the BioSample sheet and each of its
//! runs one row of the SRA metadata sheet. Replicates already carrying an
//! SRA accession can be moved to a separate table instead.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::db::{SearchCriterion, SearchQuery, SeqDb};
use crate::error::KiraError;
use crate::reconcile::{Report, WarningKind};

const SAMPLE_COLUMNS: &[&str] = &[
    "sample_name",
    "sample_title",
    "bioproject_accession",
    "organism",
    "strain",
    "isolate",
    "breed",
    "cultivar",
    "ecotype",
    "age",
    "dev_stage",
    "sex",
    "tissue",
    "biomaterial_provider",
    "birth_date",
    "birth_location",
    "breeding_history",
    "breeding_method",
    "cell_line",
    "cell_subtype",
    "cell_type",
    "collected_by",
    "collection_date",
    "culture_collection",
    "death_date",
    "disease",
    "disease_stage",
    "genotype",
    "strain_maternal",
    "strain_paternal",
    "geo_loc_name",
    "growth_protocol",
    "health_state",
    "isolation_source",
    "lat_lon",
    "phenotype",
    "sample_type",
    "specimen_voucher",
    "store_cond",
    "stud_book_number",
    "treatment",
    "description",
    "molecule",
    "selection",
    "condition",
    "sample_ref",
    "replicate_ref",
    "replicate_order",
    "project_label_long",
    "project_label_short",
    "sample_label_short",
    "replicate_label_short",
];

const DATA_COLUMNS: &[&str] = &[
    "sample_name",
    "bioproject_accession",
    "biosample_accession",
    "title",
    "library_ID",
    "design_description",
    "library_strategy",
    "library_source",
    "library_selection",
    "library_layout",
    "platform",
    "instrument_model",
    "filetype",
    "filename",
    "filename2",
];

const EXPORTED_COLUMNS: &[&str] = &[
    "project_ref",
    "sample_ref",
    "replicate_ref",
    "replicate_order",
    "project_label_short",
    "label_short",
    "label_long",
    "age",
    "dev_stage",
    "treatment",
    "selection",
    "condition",
    "publication_ref",
    "replicate_sra_ref",
    "run_refs",
    "run_sra_refs",
];

pub const SAMPLES_FILE: &str = "sra_samples.tsv";
pub const DATA_FILE: &str = "sra_data.tsv";
pub const EXPORTED_FILE: &str = "sra_exported.tsv";
pub const FILES_FILE: &str = "data.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportProject {
    pub project_ref: String,
    #[serde(default)]
    pub label_short: Option<String>,
    #[serde(default)]
    pub label_long: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportSample {
    pub sample_ref: String,
    pub project_ref: String,
    #[serde(default)]
    pub label_short: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub age_hpf: Option<Value>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub tissue: Option<String>,
    #[serde(default)]
    pub genotype: Option<String>,
    #[serde(default)]
    pub strain_maternal: Option<String>,
    #[serde(default)]
    pub strain_paternal: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub molecule: Option<String>,
    #[serde(default)]
    pub selection: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub library_protocol: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportReplicate {
    pub replicate_ref: String,
    pub sample_ref: String,
    #[serde(default)]
    pub replicate_order: Option<Value>,
    #[serde(default)]
    pub label_short: Option<String>,
    #[serde(default)]
    pub label_long: Option<String>,
    #[serde(default)]
    pub sra_ref: Option<String>,
    #[serde(default)]
    pub publication_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRun {
    pub run_ref: String,
    #[serde(default)]
    pub sra_ref: Option<String>,
    #[serde(default)]
    pub paired: Option<bool>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl ExportRun {
    fn is_paired(&self) -> bool {
        self.paired.unwrap_or(false)
    }
}

/// `(pattern, replacement)` pairs; only the first pattern found in a label
/// is replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilters(Vec<(String, String)>);

impl LabelFilters {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    /// Two-column CSV without header; extra columns are ignored.
    pub fn from_path(path: &Path) -> Result<Self, KiraError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
            if let (Some(pattern), Some(replacement)) = (record.get(0), record.get(1)) {
                if !pattern.is_empty() {
                    pairs.push((pattern.to_string(), replacement.to_string()));
                }
            }
        }
        Ok(Self(pairs))
    }

    pub fn apply(&self, label: &str) -> String {
        match self.0.iter().find(|(pattern, _)| label.contains(pattern.as_str())) {
            Some((pattern, replacement)) => label.replace(pattern.as_str(), replacement),
            None => label.to_string(),
        }
    }
}

/// Replicate references from a list file: whitespace separated entries,
/// each keeping the text before its first comma.
pub fn read_replicate_list(path: &Path) -> Result<Vec<String>, KiraError> {
    let content = fs::read_to_string(path)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(content
        .split_whitespace()
        .filter_map(|entry| entry.split(',').next())
        .filter(|reference| !reference.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub replicate_refs: Vec<String>,
    pub label_filters: LabelFilters,
    /// Move replicates with an SRA accession to the exported table.
    pub exclude_exported: bool,
}

/// A header and rows of optional cells, written as one TSV file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    fn new(columns: &[&'static str]) -> Self {
        Self {
            columns: columns.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|name| *name == column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    fn push_row(&mut self, cell: impl Fn(&str) -> Option<String>) {
        let row = self.columns.iter().map(|column| cell(column)).collect();
        self.rows.push(row);
    }

    /// Tab separated with a header line, empty cells for missing values.
    pub fn write_tsv(&self, path: &Path) -> Result<(), KiraError> {
        let to_error = |err: csv::Error| KiraError::Filesystem(format!("write {}: {err}", path.display()));
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .terminator(csv::Terminator::Any(b'\n'))
            .from_path(path)
            .map_err(to_error)?;
        writer.write_record(&self.columns).map_err(to_error)?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|cell| cell.as_deref().unwrap_or_default()))
                .map_err(to_error)?;
        }
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(format!("write {}: {err}", path.display())))
    }
}

/// FASTQ file expected for upload, consumed by the file preparation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFile {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub run_ref: String,
    pub pattern: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SraExport {
    pub samples: Table,
    pub data: Table,
    pub exported: Table,
    pub files: Vec<DataFile>,
    pub report: Report,
}

impl SraExport {
    /// Writes the tables and the file list into `dir`; the exported table
    /// only when it has rows.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, KiraError> {
        fs::create_dir_all(dir)
            .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", dir.display())))?;
        let mut written = Vec::new();
        let mut tables = vec![(SAMPLES_FILE, &self.samples), (DATA_FILE, &self.data)];
        if !self.exported.is_empty() {
            tables.push((EXPORTED_FILE, &self.exported));
        }
        for (name, table) in tables {
            let path = dir.join(name);
            table.write_tsv(&path)?;
            written.push(path);
        }
        let path = dir.join(FILES_FILE);
        let json = serde_json::to_vec_pretty(&self.files)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(&path, json)
            .map_err(|err| KiraError::Filesystem(format!("write {}: {err}", path.display())))?;
        written.push(path);
        Ok(written)
    }
}

/// Replicate with its sample, project and non-failed runs.
#[derive(Debug, Clone)]
struct Entry {
    project: ExportProject,
    sample: ExportSample,
    replicate: ExportReplicate,
    runs: Vec<ExportRun>,
}

impl Entry {
    fn sample_name(&self, filters: &LabelFilters) -> String {
        filters.apply(&format!(
            "{} - {} {}",
            text(&self.project.label_short),
            text(&self.replicate.label_short),
            self.replicate.replicate_ref
        ))
    }

    fn sample_title(&self, filters: &LabelFilters) -> String {
        filters.apply(&format!(
            "{} - {}",
            text(&self.project.label_short),
            text(&self.replicate.label_long)
        ))
    }

    fn organism(&self) -> Option<String> {
        match self.sample.species.as_deref() {
            Some("danRer") => Some("Danio rerio".to_string()),
            species => species.map(str::to_string),
        }
    }

    fn age(&self) -> String {
        self.sample
            .age_hpf
            .as_ref()
            .and_then(value_text)
            .unwrap_or_else(|| "not applicable".to_string())
    }

    fn tissue(&self) -> String {
        self.sample
            .tissue
            .clone()
            .unwrap_or_else(|| "embryo".to_string())
    }

    fn genotype(&self) -> Option<String> {
        self.sample
            .genotype
            .clone()
            .filter(|genotype| genotype != "WT")
    }

    fn replicate_order(&self) -> Option<String> {
        self.replicate.replicate_order.as_ref().and_then(value_text)
    }

    fn joined_runs(&self, field: impl Fn(&ExportRun) -> Option<&str>) -> String {
        self.runs
            .iter()
            .filter_map(field)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn sample_cell(&self, column: &str, filters: &LabelFilters) -> Option<String> {
        match column {
            "sample_name" => Some(self.sample_name(filters)),
            "sample_title" => Some(self.sample_title(filters)),
            "organism" => self.organism(),
            "strain" => Some("TU/AB".to_string()),
            "age" => Some(self.age()),
            "dev_stage" => self.sample.stage.clone(),
            "sex" => Some("pooled male and female".to_string()),
            "tissue" => Some(self.tissue()),
            "genotype" => self.genotype(),
            "strain_maternal" => self.sample.strain_maternal.clone(),
            "strain_paternal" => self.sample.strain_paternal.clone(),
            "treatment" => self.sample.treatment.clone(),
            "molecule" => self.sample.molecule.clone(),
            "selection" => self.sample.selection.clone(),
            "condition" => self.sample.condition.clone(),
            "sample_ref" => Some(self.sample.sample_ref.clone()),
            "replicate_ref" => Some(self.replicate.replicate_ref.clone()),
            "replicate_order" => self.replicate_order(),
            "project_label_long" => Some(filters.apply(&text(&self.project.label_long))),
            "project_label_short" => Some(filters.apply(&text(&self.project.label_short))),
            "sample_label_short" => self.sample.label_short.clone(),
            "replicate_label_short" => self.replicate.label_short.clone(),
            _ => None,
        }
    }

    fn data_cell(&self, run: &ExportRun, column: &str, filters: &LabelFilters) -> Option<String> {
        let molecule = self.sample.molecule.as_deref().unwrap_or_default();
        match column {
            "sample_name" => Some(self.sample_name(filters)),
            "title" => Some(self.sample_title(filters)),
            "library_ID" => Some(run.run_ref.clone()),
            "design_description" => self.sample.molecule.clone(),
            "library_strategy" => Some(
                match self.sample.library_protocol.as_deref() {
                    Some("dUTP") => "RNA-seq",
                    _ => "OTHER",
                }
                .to_string(),
            ),
            "library_source" => Some(
                if molecule == "DNA" {
                    "GENOMIC"
                } else if molecule.contains("RNA") {
                    "TRANSCRIPTOMIC"
                } else {
                    "OTHER"
                }
                .to_string(),
            ),
            "library_selection" => Some("unspecified".to_string()),
            "library_layout" => Some(if run.is_paired() { "paired" } else { "single" }.to_string()),
            "platform" => run
                .platform
                .as_deref()
                .filter(|platform| platform.contains("Illumina"))
                .map(|_| "ILLUMINA".to_string()),
            "instrument_model" => run.platform.clone(),
            "filetype" => Some("fastq".to_string()),
            "filename" => Some(format!("{}_R1.fastq.gz", run.run_ref)),
            "filename2" => run
                .is_paired()
                .then(|| format!("{}_R2.fastq.gz", run.run_ref)),
            _ => None,
        }
    }

    fn exported_cell(&self, column: &str) -> Option<String> {
        match column {
            "project_ref" => Some(self.project.project_ref.clone()),
            "sample_ref" => Some(self.sample.sample_ref.clone()),
            "replicate_ref" => Some(self.replicate.replicate_ref.clone()),
            "replicate_order" => self.replicate_order(),
            "project_label_short" => self.project.label_short.clone(),
            "label_short" => self.replicate.label_short.clone(),
            "label_long" => self.replicate.label_long.clone(),
            "age" => Some(self.age()),
            "dev_stage" => self.sample.stage.clone(),
            "treatment" => self.sample.treatment.clone(),
            "selection" => self.sample.selection.clone(),
            "condition" => self.sample.condition.clone(),
            "publication_ref" => self.replicate.publication_ref.clone(),
            "replicate_sra_ref" => self.replicate.sra_ref.clone(),
            "run_refs" => Some(self.joined_runs(|run| Some(run.run_ref.as_str()))),
            "run_sra_refs" => Some(self.joined_runs(|run| run.sra_ref.as_deref())),
            _ => None,
        }
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn order_key(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Loads every replicate of `options` and builds the submission tables.
///
/// Unknown replicates, samples or projects are reported and skipped.
pub fn build_export<D: SeqDb>(db: &D, options: &ExportOptions) -> Result<SraExport, KiraError> {
    let mut report = Report::default();
    let mut entries = Vec::new();
    for replicate_ref in &options.replicate_refs {
        let Some(replicate) = db.get_ref::<ExportReplicate>("replicate", replicate_ref)? else {
            report.warn(
                WarningKind::NotFound,
                format!("replicate {replicate_ref} not found in DB"),
            );
            continue;
        };
        let Some(sample) = db.get_ref::<ExportSample>("sample", &replicate.sample_ref)? else {
            report.warn(
                WarningKind::NotFound,
                format!("sample {} not found in DB", replicate.sample_ref),
            );
            continue;
        };
        let Some(project) = db.get_ref::<ExportProject>("project", &sample.project_ref)? else {
            report.warn(
                WarningKind::NotFound,
                format!("project {} not found in DB", sample.project_ref),
            );
            continue;
        };
        entries.push(Entry {
            project,
            sample,
            replicate,
            runs: Vec::new(),
        });
    }
    entries.sort_by(|left, right| {
        left.project
            .project_ref
            .cmp(&right.project.project_ref)
            .then_with(|| left.sample.sample_ref.cmp(&right.sample.sample_ref))
            .then_with(|| {
                order_key(&left.replicate.replicate_order)
                    .partial_cmp(&order_key(&right.replicate.replicate_order))
                    .unwrap_or(Ordering::Equal)
            })
    });

    let filters = &options.label_filters;
    let mut export = SraExport {
        samples: Table::new(SAMPLE_COLUMNS),
        data: Table::new(DATA_COLUMNS),
        exported: Table::new(EXPORTED_COLUMNS),
        files: Vec::new(),
        report: Report::default(),
    };
    for mut entry in entries {
        entry.runs = db.search(
            "run",
            &SearchQuery::new(vec![
                SearchCriterion::equal(3, "failed", "FALSE"),
                SearchCriterion::equal(3, "replicate_ref", &entry.replicate.replicate_ref),
            ]),
        )?;

        if options.exclude_exported && entry.replicate.sra_ref.is_some() {
            report.warn(
                WarningKind::Conflict,
                format!(
                    "{} \"{}\" already exported in {}",
                    entry.replicate.replicate_ref,
                    text(&entry.replicate.label_short),
                    entry.replicate.publication_ref.as_deref().unwrap_or("no publication")
                ),
            );
            export.exported.push_row(|column| entry.exported_cell(column));
            continue;
        }

        info!(replicate = %entry.replicate.replicate_ref, runs = entry.runs.len(), "exporting");
        export
            .samples
            .push_row(|column| entry.sample_cell(column, filters));
        for run in &entry.runs {
            export
                .data
                .push_row(|column| entry.data_cell(run, column, filters));
            export.files.push(DataFile {
                kind: "single",
                run_ref: run.run_ref.clone(),
                pattern: "_R1.fastq",
            });
            if run.is_paired() {
                export.files.push(DataFile {
                    kind: "single",
                    run_ref: run.run_ref.clone(),
                    pattern: "_R2.fastq",
                });
            }
        }
    }
    export.report = report;
    Ok(export)
}
