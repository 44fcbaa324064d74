use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::db::{LocalReplicate, LocalRun, SearchCriterion, SearchQuery, SeqDb};
use crate::discovery::RunFileIndex;
use crate::domain::{FileDescriptor, Project, ProjectRef};
use crate::error::KiraError;
use crate::fastq;
use crate::reconcile::{Report, WarningKind};

/// A `run/new` record built from the files of one run group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedRun {
    pub run_ref: String,
    pub run_order: u32,
    pub tube_label: String,
    pub barcode: Option<String>,
    pub failed: bool,
    pub flowcell: String,
    pub paired: bool,
    pub max_read_length: usize,
    pub spots: u64,
}

/// Fingerprints every run group of `index` for the staging table.
///
/// Spots are counted on the files of the group's first end only so paired
/// files are not counted twice.
pub fn stage_runs(index: &RunFileIndex, ref_prefix: &str) -> Result<Vec<StagedRun>, KiraError> {
    let mut staged = Vec::with_capacity(index.len());
    for (position, (name, files)) in index.iter().enumerate() {
        let Some(first) = files.first() else {
            continue;
        };
        let identity = fastq::inspect(&first.path(), false)?;
        let mut max_read_length = 0;
        let mut max_pair = 0;
        let mut spots = 0;
        for file in files {
            let info = fastq::inspect(&file.path(), true)?;
            max_read_length = max_read_length.max(info.read_length);
            max_pair = max_pair.max(info.pair_index);
            if file.end == first.end {
                spots += info.spot_count.unwrap_or_default();
            }
        }
        staged.push(StagedRun {
            run_ref: format!("{ref_prefix}{:03}", position + 1),
            run_order: 1,
            tube_label: name.clone(),
            barcode: identity.barcode,
            failed: false,
            flowcell: identity.flowcell,
            paired: max_pair == 2,
            max_read_length,
            spots,
        });
    }
    Ok(staged)
}

#[derive(Debug, Clone, Default)]
pub struct RunMatchOptions {
    pub with_second_barcode: bool,
    pub include_run_refs: Vec<String>,
    pub exclude_run_refs: Vec<String>,
}

/// Local runs found for one run group.
#[derive(Debug, Clone, Serialize)]
pub struct RunMatch {
    pub name: String,
    pub flowcell: String,
    pub run_refs: Vec<String>,
    pub files: Vec<FileDescriptor>,
}

/// Splits `TUBE-LABEL-BARCODE` at its last hyphen.
pub fn split_second_barcode(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once('-')
        .filter(|(label, barcode)| !label.is_empty() && !barcode.is_empty())
}

/// Finds the local runs each run group of `index` belongs to, by flowcell,
/// tube label and optionally the second barcode carried in the name.
pub fn match_local_runs<D: SeqDb>(
    db: &D,
    index: &RunFileIndex,
    options: &RunMatchOptions,
    report: &mut Report,
) -> Result<Vec<RunMatch>, KiraError> {
    let mut matches = Vec::new();
    for (name, files) in index.iter() {
        let mut flowcells = BTreeSet::new();
        for file in files {
            flowcells.insert(fastq::inspect(&file.path(), false)?.flowcell);
        }
        if flowcells.len() > 1 {
            return Err(KiraError::MultipleFlowcells(name.clone()));
        }
        let Some(flowcell) = flowcells.into_iter().next() else {
            continue;
        };

        let mut criteria = vec![SearchCriterion::fuzzy(3, "flowcell", &flowcell)];
        let tube_label = if options.with_second_barcode {
            let Some((label, barcode)) = split_second_barcode(name) else {
                report.warn(
                    WarningKind::NotFound,
                    format!("{name} has no second barcode"),
                );
                continue;
            };
            criteria.push(SearchCriterion::equal(3, "second_barcode", barcode));
            label
        } else {
            name.as_str()
        };
        criteria.push(SearchCriterion::equal(3, "tube_label", tube_label));

        let runs: Vec<LocalRun> = db.search("run", &SearchQuery::new(criteria))?;
        let run_refs: Vec<String> = runs
            .into_iter()
            .map(|run| run.run_ref)
            .filter(|run_ref| {
                options.include_run_refs.is_empty() || options.include_run_refs.contains(run_ref)
            })
            .filter(|run_ref| !options.exclude_run_refs.contains(run_ref))
            .collect();
        if run_refs.is_empty() {
            report.warn(WarningKind::NotFound, format!("{name} had no run"));
            continue;
        }
        info!(%name, runs = ?run_refs, "matched local runs");
        matches.push(RunMatch {
            name: name.clone(),
            flowcell,
            run_refs,
            files: files.clone(),
        });
    }
    Ok(matches)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectImport {
    pub project_created: bool,
    pub runs_created: Vec<String>,
    /// Replicate serial and the sample accession it now carries.
    pub replicates: BTreeMap<String, String>,
}

/// Creates project, runs and replicates in the metadata store for an SRA
/// project that was never seen locally.
pub fn import_project<D: SeqDb>(
    db: &D,
    project: &Project,
    project_ref: &ProjectRef,
) -> Result<ProjectImport, KiraError> {
    let mut summary = ProjectImport::default();
    let reference = project_ref.as_str();

    for sample in &project.samples {
        let existing: Vec<LocalReplicate> = db.search(
            "replicate",
            &SearchQuery::new(vec![SearchCriterion::equal(2, "sra_ref", sample.reference())]),
        )?;
        if !existing.is_empty() {
            return Err(KiraError::AlreadyImported(sample.reference().to_string()));
        }
    }

    if db.get_ref::<Value>("project", reference)?.is_none() {
        db.post(
            "project/new",
            &json!([{
                "project_ref": reference,
                "label_short": reference,
                "label_long": project.title,
                "sra_ref": reference,
            }]),
        )?;
        summary.project_created = true;
    } else {
        info!(project = reference, "project found in DB");
    }

    let mut query = Vec::new();
    for sample in &project.samples {
        let label = sample.display_name();
        for (order, run) in sample.runs.iter().enumerate() {
            db.post(
                "run/new",
                &json!([{
                    "run_ref": run.reference,
                    "run_order": order + 1,
                    "failed": false,
                    "platform": run.platform,
                    "paired": run.paired,
                    "sra_ref": run.reference,
                }]),
            )?;
            summary.runs_created.push(run.reference.clone());
            query.push(json!([
                ["keep", run.reference],
                ["new", label],
                ["new", label],
                ["append", reference],
            ]));
        }
    }
    if query.is_empty() {
        return Ok(summary);
    }

    let assigned = db.post("assign", &json!({"prefix": "SI", "query": query}))?;
    let replicate_refs = &assigned["refs"][1];
    for sample in &project.samples {
        let label = sample.display_name();
        let key = format!("{label}{label}{reference}");
        let serial = match &replicate_refs[key.as_str()]["serial"] {
            Value::Number(number) => number.to_string(),
            Value::String(text) => text.clone(),
            _ => {
                return Err(KiraError::DbResponse(format!(
                    "no replicate assigned for {key}"
                )));
            }
        };
        db.post(
            &format!("replicate/edit/{serial}"),
            &json!([{"sra_ref": sample.reference()}]),
        )?;
        summary
            .replicates
            .insert(serial, sample.reference().to_string());
    }
    Ok(summary)
}
