//! Attaches SRA accessions to local replicates and runs.
//!
//! Local records predate submission, so runs are matched on their spot
//! count rather than on any shared identifier. Bookkeeping problems become
//! [`Warning`]s in a [`Report`]; a spot-count sum that disagrees with the
//! local run during verification is fatal.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{LocalReplicate, LocalRun, Mutation, SearchCriterion, SearchQuery, SeqDb};
use crate::domain::{Project, Run, Sample};
use crate::error::KiraError;

pub const REPLICATE_REF_TAG: &str = "replicate_ref";
const MULTIPLEX_PREFIX: &str = "Raw multiplex:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Conflict,
    NotFound,
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

/// Accumulated outcome of one or more reconciliation passes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub warnings: Vec<Warning>,
    pub errors: usize,
    pub mutations: Vec<Mutation>,
}

impl Report {
    pub fn warn(&mut self, kind: WarningKind, message: String) {
        warn!(?kind, "{message}");
        self.warnings.push(Warning { kind, message });
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn merge(&mut self, other: Report) {
        self.warnings.extend(other.warnings);
        self.errors += other.errors;
        self.mutations.extend(other.mutations);
    }
}

/// How the link workflow treats a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRoute<'a> {
    /// Pooled multiplex upload; never linked.
    Multiplex,
    /// No `replicate_ref` attribute to link through.
    MissingId,
    Link { replicate_ref: &'a str },
}

impl<'a> SampleRoute<'a> {
    pub fn of(sample: &'a Sample) -> Self {
        if sample
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with(MULTIPLEX_PREFIX))
        {
            return SampleRoute::Multiplex;
        }
        // the last declaration wins when the attribute is repeated
        let declared = sample
            .attributes
            .iter()
            .rev()
            .find(|(tag, _)| tag == REPLICATE_REF_TAG)
            .map(|(_, value)| value.as_str());
        match declared {
            Some(replicate_ref) => SampleRoute::Link { replicate_ref },
            None => SampleRoute::MissingId,
        }
    }
}

/// An archive run waiting for its spot-count check.
#[derive(Debug, Clone)]
pub struct PendingRun<'a> {
    pub run: &'a Run,
    pub replicate_ref: String,
    resolved: bool,
    reported: bool,
}

impl<'a> PendingRun<'a> {
    pub fn new(run: &'a Run, replicate_ref: &str) -> Self {
        Self {
            run,
            replicate_ref: replicate_ref.to_string(),
            resolved: false,
            reported: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

pub struct Reconciler<'a, D: SeqDb> {
    db: &'a D,
    publication_ref: &'a str,
}

impl<'a, D: SeqDb> Reconciler<'a, D> {
    pub fn new(db: &'a D, publication_ref: &'a str) -> Self {
        Self {
            db,
            publication_ref,
        }
    }

    /// Queues the edits linking every sample of `project` to its declared
    /// replicate. Nothing is written; callers apply `report.mutations`.
    pub fn link(&self, project: &Project, report: &mut Report) -> Result<(), KiraError> {
        for sample in &project.samples {
            match SampleRoute::of(sample) {
                SampleRoute::Multiplex => {
                    info!(sample = sample.display_name(), "skipping multiplex");
                }
                SampleRoute::MissingId => {
                    let spots: Vec<u64> = sample.runs.iter().map(|run| run.spots).collect();
                    report.warn(
                        WarningKind::NotFound,
                        format!("no ID found in {} {spots:?}", sample.display_name()),
                    );
                }
                SampleRoute::Link { replicate_ref } => {
                    self.link_sample(sample, replicate_ref, report)?;
                }
            }
        }
        Ok(())
    }

    fn link_sample(
        &self,
        sample: &Sample,
        replicate_ref: &str,
        report: &mut Report,
    ) -> Result<(), KiraError> {
        let Some(replicate) = self
            .db
            .get_ref::<LocalReplicate>("replicate", replicate_ref)?
        else {
            report.warn(
                WarningKind::NotFound,
                format!("replicate {replicate_ref} not found in DB"),
            );
            return Ok(());
        };
        if let Some(existing) = &replicate.sra_ref {
            report.warn(
                WarningKind::Conflict,
                format!(
                    "{} already attached to {existing} ({}) in DB",
                    replicate.replicate_ref,
                    replicate.publication_ref.as_deref().unwrap_or("no publication")
                ),
            );
            return Ok(());
        }

        info!(
            replicate = %replicate.replicate_ref,
            sample = sample.reference(),
            "linking replicate"
        );
        report.mutations.push(Mutation::edit(
            "replicate",
            replicate.replicate_id,
            "sra_ref",
            sample.reference(),
        ));
        if replicate.publication_ref.is_none() {
            report.mutations.push(Mutation::edit(
                "replicate",
                replicate.replicate_id,
                "publication_ref",
                self.publication_ref,
            ));
        }

        let local_runs: Vec<LocalRun> = self.db.search(
            "run",
            &SearchQuery::new(vec![SearchCriterion::equal(
                3,
                "replicate_ref",
                &replicate.replicate_ref,
            )]),
        )?;
        let mut consumed = vec![false; local_runs.len()];
        for run in &sample.runs {
            let eligible = local_runs.iter().enumerate().find(|(index, local)| {
                !consumed[*index] && local.sra_ref.is_none() && local.spots == Some(run.spots)
            });
            if let Some((index, local)) = eligible {
                consumed[index] = true;
                info!(run = %run.reference, local = %local.run_ref, "linking run");
                report.mutations.push(Mutation::edit(
                    "run",
                    local.run_id,
                    "sra_ref",
                    &run.reference,
                ));
                continue;
            }
            // any accession already on the replicate's runs makes this a conflict
            let linked = local_runs.iter().find(|local| local.sra_ref.is_some());
            match linked {
                Some(local) => report.warn(
                    WarningKind::Conflict,
                    format!(
                        "{} already attached to {} in DB",
                        local.run_ref,
                        local.sra_ref.as_deref().unwrap_or_default()
                    ),
                ),
                None => report.warn(
                    WarningKind::NotFound,
                    format!("no run found for {} ({} spots)", run.reference, run.spots),
                ),
            }
        }
        Ok(())
    }

    /// Checks existing links: every sample must resolve to exactly one
    /// replicate of this publication and every run's spots must add up to
    /// the local run carrying its accession.
    pub fn verify(&self, project: &Project, report: &mut Report) -> Result<(), KiraError> {
        let mut pending = Vec::new();
        for sample in &project.samples {
            pending.extend(self.resolve_replicate(sample, report)?);
        }
        self.check_spots(&mut pending, report)
    }

    fn resolve_replicate<'p>(
        &self,
        sample: &'p Sample,
        report: &mut Report,
    ) -> Result<Vec<PendingRun<'p>>, KiraError> {
        let replicates: Vec<LocalReplicate> = self.db.search(
            "replicate",
            &SearchQuery::new(vec![SearchCriterion::fuzzy(2, "sra_ref", sample.reference())]),
        )?;
        let replicate = match replicates.as_slice() {
            [] => {
                report.warn(
                    WarningKind::NotFound,
                    format!(
                        "{} not found in DB ({})",
                        sample.reference(),
                        sample.display_name()
                    ),
                );
                return Ok(Vec::new());
            }
            [replicate] => replicate,
            _ => {
                report.warn(
                    WarningKind::Ambiguous,
                    format!("{} multiple replicates found in DB", sample.reference()),
                );
                return Ok(Vec::new());
            }
        };
        if replicate.publication_ref.as_deref() != Some(self.publication_ref) {
            report.warn(
                WarningKind::Conflict,
                format!(
                    "{} already attached to {} in DB",
                    replicate.replicate_ref,
                    replicate.publication_ref.as_deref().unwrap_or("no publication")
                ),
            );
            return Ok(Vec::new());
        }
        Ok(sample
            .runs
            .iter()
            .map(|run| PendingRun::new(run, &replicate.replicate_ref))
            .collect())
    }

    /// Spot-count cross-check over `pending`. Stops at the first mismatch.
    pub fn check_spots(
        &self,
        pending: &mut [PendingRun<'_>],
        report: &mut Report,
    ) -> Result<(), KiraError> {
        for index in 0..pending.len() {
            if pending[index].is_resolved() || pending[index].reported {
                continue;
            }
            let run_ref = pending[index].run.reference.clone();
            let candidates: Vec<LocalRun> = self.db.search(
                "run",
                &SearchQuery::new(vec![
                    SearchCriterion::equal(3, "replicate_ref", &pending[index].replicate_ref),
                    SearchCriterion::fuzzy(3, "sra_ref", &run_ref),
                ]),
            )?;
            // fuzzy matching also hits longer accessions sharing the prefix
            let candidates: Vec<&LocalRun> = candidates
                .iter()
                .filter(|local| local.sra_refs().contains(&run_ref.as_str()))
                .collect();
            let local = match candidates.as_slice() {
                [] => continue,
                [local] => *local,
                _ => {
                    pending[index].reported = true;
                    report.warn(
                        WarningKind::Ambiguous,
                        format!("more than one run was found in DB for {run_ref}"),
                    );
                    continue;
                }
            };

            let merged = local.sra_refs();
            let mut archive_spots = 0u64;
            for entry in pending.iter_mut() {
                if !entry.is_resolved() && merged.contains(&entry.run.reference.as_str()) {
                    archive_spots += entry.run.spots;
                    entry.resolved = true;
                }
            }
            let local_spots = local.spots.unwrap_or_default();
            if local_spots != archive_spots {
                report.errors += 1;
                error!(
                    run = %run_ref,
                    local = %local.run_ref,
                    local_spots,
                    archive_spots,
                    "spot count mismatch"
                );
                return Err(KiraError::SpotMismatch {
                    run: run_ref,
                    local_run: local.run_ref.clone(),
                    local_spots,
                    archive_spots,
                });
            }
            info!("Found run {run_ref} for {}", local.run_ref);
        }

        for entry in pending.iter().filter(|entry| !entry.is_resolved() && !entry.reported) {
            report.warn(
                WarningKind::NotFound,
                format!(
                    "no run was found in DB for {} ({} spots)",
                    entry.run.reference, entry.run.spots
                ),
            );
        }
        Ok(())
    }
}
