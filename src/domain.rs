use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// SRA project reference (accession or alias) as given by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef(String);

impl ProjectRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectRef {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(KiraError::InvalidProjectRef(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReadEnd {
    R1,
    R2,
    R3,
    I1,
    I2,
    I3,
}

impl fmt::Display for ReadEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ReadEnd::R1 => "R1",
            ReadEnd::R2 => "R2",
            ReadEnd::R3 => "R3",
            ReadEnd::I1 => "I1",
            ReadEnd::I2 => "I2",
            ReadEnd::I3 => "I3",
        };
        write!(f, "{tag}")
    }
}

impl FromStr for ReadEnd {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "R1" => Ok(ReadEnd::R1),
            "R2" => Ok(ReadEnd::R2),
            "R3" => Ok(ReadEnd::R3),
            "I1" => Ok(ReadEnd::I1),
            "I2" => Ok(ReadEnd::I2),
            "I3" => Ok(ReadEnd::I3),
            _ => Err(KiraError::InvalidReadEnd(value.to_string())),
        }
    }
}

/// What a filename convention extracts from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch {
    pub name: String,
    pub barcode: Option<String>,
    pub lane: Option<String>,
    pub end: Option<ReadEnd>,
}

/// One read file on disk, classified by its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub name: String,
    pub barcode: Option<String>,
    pub lane: Option<String>,
    pub end: Option<ReadEnd>,
    pub directory: PathBuf,
    pub file_name: String,
}

impl FileDescriptor {
    pub fn new(matched: NameMatch, directory: &Path, file_name: &str) -> Self {
        Self {
            name: matched.name,
            barcode: matched.barcode,
            lane: matched.lane,
            end: matched.end,
            directory: directory.to_path_buf(),
            file_name: file_name.to_string(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Identity facts read from the content of a read file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadHeaderInfo {
    pub flowcell: String,
    pub lane: u32,
    pub pair_index: u32,
    pub barcode: Option<String>,
    pub read_length: usize,
    pub spot_count: Option<u64>,
}

impl ReadHeaderInfo {
    /// Flowcell serial: the third colon field of `instrument:run:flowcell`.
    pub fn flowcell_id(&self) -> &str {
        self.flowcell.split(':').nth(2).unwrap_or(self.flowcell.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    #[serde(rename = "ref")]
    pub reference: String,
    pub spots: u64,
    #[serde(default)]
    pub paired: bool,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nread1: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nread2: Option<u64>,
    #[serde(rename = "sra_url", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(rename = "sra_size", default, skip_serializing_if = "Option::is_none")]
    pub source_size: Option<u64>,
    #[serde(rename = "sra_md5", default, skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub paired: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default)]
    pub runs: Vec<Run>,
}

impl Sample {
    pub fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or_default()
    }

    /// Label if present, name otherwise.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }

    /// First value recorded under `tag`, in document order.
    pub fn attribute(&self, tag: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == tag)
            .map(|(_, value)| value.as_str())
    }

    fn sort_key(&self) -> (&str, &str) {
        let first_run = self
            .runs
            .first()
            .map(|run| run.reference.as_str())
            .unwrap_or_default();
        (self.reference(), first_run)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl Project {
    pub fn sort_samples(&mut self) {
        self.samples
            .sort_by(|left, right| left.sort_key().cmp(&right.sort_key()));
    }

    pub fn run_count(&self) -> usize {
        self.samples.iter().map(|sample| sample.runs.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_project_ref() {
        let project: ProjectRef = " SRP123456 ".parse().unwrap();
        assert_eq!(project.as_str(), "SRP123456");
    }

    #[test]
    fn parse_project_ref_invalid() {
        let err = "SRP 1".parse::<ProjectRef>().unwrap_err();
        assert_matches!(err, KiraError::InvalidProjectRef(_));
    }

    #[test]
    fn read_end_roundtrip() {
        let end: ReadEnd = "I2".parse().unwrap();
        assert_eq!(end, ReadEnd::I2);
        assert_eq!(end.to_string(), "I2");
        assert_matches!("r1".parse::<ReadEnd>(), Err(KiraError::InvalidReadEnd(_)));
    }

    #[test]
    fn flowcell_id_uses_third_field() {
        let info = ReadHeaderInfo {
            flowcell: "DCM97JN1:188:C11R8ACXX".to_string(),
            lane: 5,
            pair_index: 1,
            barcode: None,
            read_length: 50,
            spot_count: None,
        };
        assert_eq!(info.flowcell_id(), "C11R8ACXX");
    }

    #[test]
    fn project_json_layout() {
        let project = Project {
            title: Some("Zebrafish MZT".to_string()),
            samples: vec![Sample {
                reference: Some("SRS1".to_string()),
                name: Some("wt_1".to_string()),
                label: Some("WT 1".to_string()),
                paired: None,
                attributes: vec![("replicate_ref".to_string(), "AR001".to_string())],
                runs: vec![Run {
                    reference: "SRR1".to_string(),
                    spots: 10,
                    ..Run::default()
                }],
            }],
        };
        let value = serde_json::to_value(&project).unwrap();
        assert_eq!(value["samples"][0]["ref"], "SRS1");
        assert_eq!(value["samples"][0]["paired"], serde_json::Value::Null);
        assert_eq!(value["samples"][0]["attributes"][0][0], "replicate_ref");
        assert_eq!(value["samples"][0]["runs"][0]["ref"], "SRR1");
        assert!(value["samples"][0]["runs"][0].get("sra_url").is_none());
    }

    #[test]
    fn samples_sort_by_ref_then_first_run() {
        let sample = |reference: &str, run: &str| Sample {
            reference: Some(reference.to_string()),
            runs: vec![Run {
                reference: run.to_string(),
                ..Run::default()
            }],
            ..Sample::default()
        };
        let mut project = Project {
            title: None,
            samples: vec![sample("SRS2", "SRR1"), sample("SRS1", "SRR9"), sample("SRS1", "SRR3")],
        };
        project.sort_samples();
        let order: Vec<_> = project
            .samples
            .iter()
            .map(|s| (s.reference(), s.runs[0].reference.as_str()))
            .collect();
        assert_eq!(order, vec![("SRS1", "SRR3"), ("SRS1", "SRR9"), ("SRS2", "SRR1")]);
    }
}
