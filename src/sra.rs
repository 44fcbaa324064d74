//! SRA `EXPERIMENT_PACKAGE_SET` documents as returned by efetch.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::domain::{Run, Sample};
use crate::error::KiraError;

#[derive(Debug, Deserialize)]
struct PackageSetXml {
    #[serde(rename = "EXPERIMENT_PACKAGE", default)]
    packages: Vec<PackageXml>,
}

#[derive(Debug, Deserialize)]
struct PackageXml {
    #[serde(rename = "EXPERIMENT")]
    experiment: Option<ExperimentXml>,
    #[serde(rename = "STUDY")]
    study: Option<StudyXml>,
    #[serde(rename = "SAMPLE")]
    sample: Option<SampleXml>,
    #[serde(rename = "RUN_SET")]
    run_set: Option<RunSetXml>,
}

#[derive(Debug, Deserialize)]
struct ExperimentXml {
    #[serde(rename = "DESIGN")]
    design: Option<DesignXml>,
    #[serde(rename = "PLATFORM")]
    platform: Option<PlatformXml>,
}

#[derive(Debug, Deserialize)]
struct DesignXml {
    #[serde(rename = "LIBRARY_DESCRIPTOR")]
    library: Option<LibraryDescriptorXml>,
}

#[derive(Debug, Deserialize)]
struct LibraryDescriptorXml {
    #[serde(rename = "LIBRARY_LAYOUT")]
    layout: Option<LayoutXml>,
}

#[derive(Debug, Deserialize)]
struct LayoutXml {
    #[serde(rename = "SINGLE")]
    single: Option<MarkerXml>,
    #[serde(rename = "PAIRED")]
    paired: Option<MarkerXml>,
}

/// Element whose presence is the only information.
#[derive(Debug, Deserialize)]
struct MarkerXml {}

#[derive(Debug, Deserialize)]
struct PlatformXml {
    #[serde(rename = "ILLUMINA")]
    illumina: Option<InstrumentXml>,
    #[serde(rename = "PACBIO_SMRT")]
    pacbio: Option<InstrumentXml>,
}

#[derive(Debug, Deserialize)]
struct InstrumentXml {
    #[serde(rename = "INSTRUMENT_MODEL")]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StudyXml {
    #[serde(rename = "@accession")]
    accession: Option<String>,
    #[serde(rename = "@alias")]
    alias: Option<String>,
    #[serde(rename = "DESCRIPTOR")]
    descriptor: Option<StudyDescriptorXml>,
}

#[derive(Debug, Deserialize)]
struct StudyDescriptorXml {
    #[serde(rename = "STUDY_TITLE")]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SampleXml {
    #[serde(rename = "@accession")]
    accession: Option<String>,
    #[serde(rename = "@alias")]
    alias: Option<String>,
    #[serde(rename = "TITLE")]
    title: Option<String>,
    #[serde(rename = "SAMPLE_ATTRIBUTES")]
    attributes: Option<SampleAttributesXml>,
}

#[derive(Debug, Deserialize)]
struct SampleAttributesXml {
    #[serde(rename = "SAMPLE_ATTRIBUTE", default)]
    items: Vec<SampleAttributeXml>,
}

#[derive(Debug, Deserialize)]
struct SampleAttributeXml {
    #[serde(rename = "TAG")]
    tag: Option<String>,
    #[serde(rename = "VALUE")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunSetXml {
    #[serde(rename = "RUN", default)]
    runs: Vec<RunXml>,
}

#[derive(Debug, Deserialize)]
struct RunXml {
    #[serde(rename = "@accession")]
    accession: Option<String>,
    #[serde(rename = "@total_spots")]
    total_spots: Option<String>,
    #[serde(rename = "PLATFORM")]
    platform: Option<PlatformXml>,
    #[serde(rename = "Statistics")]
    statistics: Option<StatisticsXml>,
    #[serde(rename = "SRAFiles")]
    files: Option<SraFilesXml>,
}

#[derive(Debug, Deserialize)]
struct StatisticsXml {
    #[serde(rename = "Read", default)]
    reads: Vec<ReadStatXml>,
}

#[derive(Debug, Deserialize)]
struct ReadStatXml {
    #[serde(rename = "@index")]
    index: Option<String>,
    #[serde(rename = "@count")]
    count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SraFilesXml {
    #[serde(rename = "SRAFile", default)]
    files: Vec<SraFileXml>,
}

#[derive(Debug, Deserialize)]
struct SraFileXml {
    #[serde(rename = "@cluster")]
    cluster: Option<String>,
    #[serde(rename = "@supertype")]
    supertype: Option<String>,
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@size")]
    size: Option<String>,
    #[serde(rename = "@md5")]
    md5: Option<String>,
}

impl PlatformXml {
    fn model(&self) -> Option<String> {
        self.illumina
            .as_ref()
            .and_then(|instrument| instrument.model.clone())
            .or_else(|| self.pacbio.as_ref().and_then(|instrument| instrument.model.clone()))
    }
}

impl StudyXml {
    fn matches(&self, project_ref: &str) -> bool {
        self.accession.as_deref() == Some(project_ref) || self.alias.as_deref() == Some(project_ref)
    }
}

/// Parses one efetch document into the project title and its sample.
///
/// When `expected_project` is set and the document belongs to another study,
/// the returned sample is empty and the title unset. `run_filter` keeps only
/// the listed runs unless it is empty.
pub fn parse_sra_xml(
    document: &str,
    expected_project: Option<&str>,
    run_filter: &BTreeSet<String>,
) -> Result<(Option<String>, Sample), KiraError> {
    let set: PackageSetXml = quick_xml::de::from_str(document)
        .map_err(|err| KiraError::ArchiveFormat(err.to_string()))?;

    let study = set.packages.iter().find_map(|package| package.study.as_ref());
    if let Some(project_ref) = expected_project {
        let study = study.ok_or_else(|| KiraError::ArchiveFormat("no STUDY element".to_string()))?;
        if !study.matches(project_ref) {
            return Ok((None, Sample::default()));
        }
    }
    let title = study
        .and_then(|study| study.descriptor.as_ref())
        .and_then(|descriptor| descriptor.title.clone());

    let mut builder = SampleBuilder::default();
    for package in &set.packages {
        builder.add_package(package, run_filter)?;
    }
    Ok((title, builder.build()))
}

/// Accumulates sample facts; anything never seen stays unset.
#[derive(Default)]
struct SampleBuilder {
    sample: Sample,
    platform: Option<String>,
    seen_sample: bool,
}

impl SampleBuilder {
    fn add_package(
        &mut self,
        package: &PackageXml,
        run_filter: &BTreeSet<String>,
    ) -> Result<(), KiraError> {
        if let Some(experiment) = &package.experiment {
            self.add_experiment(experiment);
        }
        if let Some(sample) = &package.sample {
            self.add_sample(sample);
        }
        let runs = package.run_set.iter().flat_map(|set| set.runs.iter());
        for run in runs {
            let run = self.build_run(run)?;
            if run_filter.is_empty() || run_filter.contains(&run.reference) {
                self.sample.runs.push(run);
            }
        }
        Ok(())
    }

    fn add_experiment(&mut self, experiment: &ExperimentXml) {
        if self.sample.paired.is_none() {
            let layout = experiment
                .design
                .as_ref()
                .and_then(|design| design.library.as_ref())
                .and_then(|library| library.layout.as_ref());
            self.sample.paired = match layout {
                Some(layout) if layout.single.is_some() => Some(false),
                Some(layout) if layout.paired.is_some() => Some(true),
                _ => None,
            };
        }
        if self.platform.is_none() {
            self.platform = experiment.platform.as_ref().and_then(PlatformXml::model);
        }
    }

    fn add_sample(&mut self, sample: &SampleXml) {
        if self.seen_sample {
            return;
        }
        self.seen_sample = true;
        self.sample.reference = sample.accession.clone();
        self.sample.name = sample.alias.clone();
        self.sample.label = sample.title.clone().or_else(|| sample.alias.clone());
        self.sample.attributes = sample
            .attributes
            .iter()
            .flat_map(|attributes| attributes.items.iter())
            .filter_map(|attribute| {
                let tag = attribute.tag.clone()?;
                Some((tag, attribute.value.clone().unwrap_or_default()))
            })
            .collect();
    }

    fn build_run(&self, run: &RunXml) -> Result<Run, KiraError> {
        let reference = run
            .accession
            .clone()
            .ok_or_else(|| KiraError::ArchiveFormat("RUN without accession".to_string()))?;
        let spots = run
            .total_spots
            .as_deref()
            .ok_or_else(|| KiraError::ArchiveFormat(format!("{reference}: no total_spots")))
            .and_then(|value| parse_count(&reference, "total_spots", value))?;

        let mut built = Run {
            reference,
            spots,
            paired: false,
            platform: run
                .platform
                .as_ref()
                .and_then(PlatformXml::model)
                .or_else(|| self.platform.clone()),
            ..Run::default()
        };

        let reads = run.statistics.iter().flat_map(|stats| stats.reads.iter());
        for read in reads {
            let Some(count) = read.count.as_deref() else {
                continue;
            };
            match read.index.as_deref() {
                Some("0") => built.nread1 = Some(parse_count(&built.reference, "count", count)?),
                Some("1") => {
                    built.nread2 = Some(parse_count(&built.reference, "count", count)?);
                    built.paired = true;
                }
                _ => {}
            }
        }

        let files = run.files.iter().flat_map(|files| files.files.iter());
        for file in files {
            let is_primary = file.cluster.as_deref() == Some("public")
                && file.supertype.as_deref() == Some("Primary ETL");
            if !is_primary {
                continue;
            }
            built.source_url = file.url.clone();
            built.source_size = file
                .size
                .as_deref()
                .map(|size| parse_count(&built.reference, "size", size))
                .transpose()?;
            if file.md5.is_some() {
                built.source_checksum = file.md5.clone();
            }
        }
        Ok(built)
    }

    fn build(mut self) -> Sample {
        self.sample
            .runs
            .sort_by(|left, right| left.reference.cmp(&right.reference));
        self.sample
    }
}

fn parse_count(run: &str, field: &str, value: &str) -> Result<u64, KiraError> {
    value
        .trim()
        .parse()
        .map_err(|_| KiraError::ArchiveFormat(format!("{run}: invalid {field} '{value}'")))
}
