use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::ResolvedConfig;
use crate::db::{DbOption, Publication, SearchCriterion, SearchQuery, SeqDb};
use crate::discovery::{RunFileIndex, default_fastq_exts};
use crate::domain::{FileDescriptor, Project, ProjectRef, ReadHeaderInfo};
use crate::error::KiraError;
use crate::export::{self, ExportOptions, SraExport};
use crate::fastq;
use crate::filenames::{FilenameConvention, default_conventions};
use crate::import::{self, ProjectImport, RunMatch, RunMatchOptions, StagedRun};
use crate::ncbi::{ProjectFetcher, SraClient};
use crate::reconcile::{Reconciler, Report};
use crate::store::ProjectStore;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn progress(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

fn progress_timed(sink: &dyn ProgressSink, message: impl Into<String>, start: Instant) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: Some(start.elapsed()),
    });
}

/// Settings the workflows read from the resolved configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub fastq_exts: Vec<String>,
    pub conventions: Vec<FilenameConvention>,
    pub ref_prefix: String,
    pub sra_rate_limit: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fastq_exts: default_fastq_exts(),
            conventions: default_conventions(),
            ref_prefix: "TMP_".to_string(),
            sra_rate_limit: Duration::from_secs(1),
        }
    }
}

impl From<&ResolvedConfig> for Settings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            fastq_exts: config.fastq_exts.clone(),
            conventions: config.conventions.clone(),
            ref_prefix: config.ref_prefix.clone(),
            sra_rate_limit: config.sra_rate_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedFile {
    pub file: FileDescriptor,
    pub header: ReadHeaderInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedRun {
    pub name: String,
    pub files: Vec<ScannedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub root: String,
    pub runs: Vec<ScannedRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub dry_run: bool,
    pub runs: Vec<StagedRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunsResult {
    pub matches: Vec<RunMatch>,
    pub report: Report,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    pub runs: BTreeSet<String>,
    pub save_xml: bool,
    pub save_json: bool,
    pub from_json: Option<PathBuf>,
    /// Skip the project cache and always ask the archive.
    pub refresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResult {
    pub project_ref: String,
    pub source: String,
    pub saved_path: Option<String>,
    pub project: Project,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSraResult {
    pub project_ref: String,
    pub dry_run: bool,
    pub samples: usize,
    pub runs: usize,
    pub import: Option<ProjectImport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub out_dir: String,
    pub written: Vec<String>,
    pub samples: usize,
    pub runs: usize,
    pub exported: usize,
    pub report: Report,
}

impl ExportResult {
    pub fn new(out_dir: &Path, written: &[PathBuf], export: SraExport) -> Self {
        Self {
            out_dir: out_dir.display().to_string(),
            written: written.iter().map(|path| path.display().to_string()).collect(),
            samples: export.samples.rows.len(),
            runs: export.data.rows.len(),
            exported: export.exported.rows.len(),
            report: export.report,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub update: bool,
    pub check: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub publication_ref: String,
    pub title: Option<String>,
    pub projects: Vec<String>,
    pub applied: usize,
    pub report: Report,
}

impl SyncResult {
    pub fn warning_count(&self) -> usize {
        self.report.warning_count()
    }

    pub fn error_count(&self) -> usize {
        self.report.errors
    }
}

pub struct App<D: SeqDb, C: SraClient> {
    store: ProjectStore,
    db: D,
    sra: C,
    settings: Settings,
}

impl<D: SeqDb, C: SraClient> App<D, C> {
    pub fn new(store: ProjectStore, db: D, sra: C, settings: Settings) -> Self {
        Self {
            store,
            db,
            sra,
            settings,
        }
    }

    fn discover(&self, root: &Path, sink: &dyn ProgressSink) -> Result<RunFileIndex, KiraError> {
        progress(sink, format!("phase=Discover; walking {}", root.display()));
        let start = Instant::now();
        let index = RunFileIndex::discover(root, &self.settings.fastq_exts, &self.settings.conventions)?;
        index.ensure_valid()?;
        progress_timed(sink, format!("discovered runs={}", index.len()), start);
        Ok(index)
    }

    /// Groups the read files below `root` and inspects each one.
    pub fn scan(&self, root: &Path, spots: bool, sink: &dyn ProgressSink) -> Result<ScanResult, KiraError> {
        let index = self.discover(root, sink)?;
        let mut runs = Vec::with_capacity(index.len());
        for (name, files) in index.iter() {
            progress(sink, format!("phase=Inspect; {name}"));
            let files = files
                .iter()
                .map(|file| {
                    Ok(ScannedFile {
                        header: fastq::inspect(&file.path(), spots)?,
                        file: file.clone(),
                    })
                })
                .collect::<Result<Vec<_>, KiraError>>()?;
            runs.push(ScannedRun {
                name: name.clone(),
                files,
            });
        }
        Ok(ScanResult {
            root: root.display().to_string(),
            runs,
        })
    }

    /// Fingerprints the runs below `root` and adds them to the staging
    /// table unless `dry_run`.
    pub fn stage(
        &self,
        root: &Path,
        ref_prefix: Option<&str>,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<StageResult, KiraError> {
        let index = self.discover(root, sink)?;
        let prefix = ref_prefix.unwrap_or(&self.settings.ref_prefix);
        progress(sink, "phase=Inspect; counting spots");
        let runs = import::stage_runs(&index, prefix)?;
        if !dry_run {
            for run in &runs {
                info!(run = %run.run_ref, tube = %run.tube_label, "adding run");
                self.db.post("run/new", &json!([run]))?;
            }
        }
        Ok(StageResult { dry_run, runs })
    }

    pub fn import_runs(
        &self,
        root: &Path,
        options: &RunMatchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ImportRunsResult, KiraError> {
        let index = self.discover(root, sink)?;
        progress(sink, "phase=Match; querying runs");
        let mut report = Report::default();
        let matches = import::match_local_runs(&self.db, &index, options, &mut report)?;
        Ok(ImportRunsResult { matches, report })
    }

    /// Project from a JSON file, the cache, or the archive, in that order.
    pub fn load_project(
        &self,
        project_ref: &ProjectRef,
        options: &ProjectOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ProjectResult, KiraError> {
        if let Some(path) = &options.from_json {
            let content = fs::read_to_string(path)
                .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
            let project =
                serde_json::from_str(&content).map_err(|err| KiraError::ProjectFormat {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
            return Ok(ProjectResult {
                project_ref: project_ref.to_string(),
                source: "file".to_string(),
                saved_path: None,
                project,
            });
        }

        let cacheable = options.runs.is_empty() && !options.refresh;
        if cacheable {
            if let Some(project) = self.store.load_project(project_ref)? {
                progress(sink, format!("cache hit {project_ref}"));
                return Ok(ProjectResult {
                    project_ref: project_ref.to_string(),
                    source: "cache".to_string(),
                    saved_path: None,
                    project,
                });
            }
        }

        progress(sink, format!("phase=Fetch; SRA {project_ref}"));
        let start = Instant::now();
        let mut fetcher = ProjectFetcher::new(&self.sra, self.settings.sra_rate_limit);
        if options.save_xml {
            fetcher = fetcher.save_xml(&self.store);
        }
        let project = fetcher.fetch(project_ref, &options.runs)?;
        progress_timed(
            sink,
            format!("fetched samples={} runs={}", project.samples.len(), project.run_count()),
            start,
        );

        let saved_path = if options.save_json || cacheable {
            Some(self.store.save_project(project_ref, &project)?.to_string())
        } else {
            None
        };
        Ok(ProjectResult {
            project_ref: project_ref.to_string(),
            source: "sra".to_string(),
            saved_path,
            project,
        })
    }

    pub fn import_sra(
        &self,
        project_ref: &ProjectRef,
        options: &ProjectOptions,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ImportSraResult, KiraError> {
        let loaded = self.load_project(project_ref, options, sink)?;
        let project = loaded.project;
        let import = if dry_run {
            None
        } else {
            progress(sink, "phase=Import; creating records");
            Some(import::import_project(&self.db, &project, project_ref)?)
        };
        Ok(ImportSraResult {
            project_ref: project_ref.to_string(),
            dry_run,
            samples: project.samples.len(),
            runs: project.run_count(),
            import,
        })
    }

    /// Links and/or verifies every SRA project of a publication.
    ///
    /// A spot-count mismatch aborts the whole workflow with
    /// [`KiraError::SpotMismatch`].
    pub fn sync_accessions(
        &self,
        publication_ref: &str,
        options: SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SyncResult, KiraError> {
        let publication: Publication = self
            .db
            .get_ref("publication", publication_ref)?
            .ok_or_else(|| KiraError::PublicationNotFound(publication_ref.to_string()))?;
        info!(title = publication.title.as_deref().unwrap_or_default(), "publication");

        if !options.dry_run {
            self.register_publication(publication_ref)?;
        }

        let reconciler = Reconciler::new(&self.db, publication_ref);
        let mut report = Report::default();
        let mut applied = 0;
        let mut projects = Vec::new();
        for sra_ref in publication.sra_refs() {
            let project_ref: ProjectRef = sra_ref.parse()?;
            progress(sink, format!("loading {project_ref}"));
            let project = self
                .load_project(&project_ref, &ProjectOptions::default(), sink)?
                .project;

            if options.update {
                let mut linked = Report::default();
                reconciler.link(&project, &mut linked)?;
                if !options.dry_run {
                    for mutation in &linked.mutations {
                        self.db.apply(mutation)?;
                        applied += 1;
                    }
                }
                report.merge(linked);
            }
            if options.check {
                reconciler.verify(&project, &mut report)?;
            }
            projects.push(project_ref.to_string());
        }
        progress(
            sink,
            format!(
                "{} warning(s), {} error(s)",
                report.warning_count(),
                report.errors
            ),
        );
        Ok(SyncResult {
            publication_ref: publication_ref.to_string(),
            title: publication.title,
            projects,
            applied,
            report,
        })
    }

    /// Builds the SRA submission tables for `options.replicate_refs`.
    pub fn export_sra(
        &self,
        options: &ExportOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SraExport, KiraError> {
        if options.replicate_refs.is_empty() {
            return Err(KiraError::NoReplicates);
        }
        progress(
            sink,
            format!("phase=Export; replicates={}", options.replicate_refs.len()),
        );
        let start = Instant::now();
        let export = export::build_export(&self.db, options)?;
        progress_timed(
            sink,
            format!(
                "exported samples={} runs={}",
                export.samples.rows.len(),
                export.data.rows.len()
            ),
            start,
        );
        Ok(export)
    }

    fn register_publication(&self, publication_ref: &str) -> Result<(), KiraError> {
        let options: Vec<DbOption> = self.db.search(
            "option",
            &SearchQuery::new(vec![SearchCriterion::equal(
                0,
                "group_name",
                "publication_ref",
            )]),
        )?;
        if options.iter().any(|option| option.option == publication_ref) {
            return Ok(());
        }
        info!(publication = publication_ref, "adding publication option");
        self.db.post(
            "option/new",
            &json!([{"group_name": "publication_ref", "option": publication_ref}]),
        )?;
        Ok(())
    }
}
