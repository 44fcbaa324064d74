//! Naming conventions for raw read files.
//!
//! Each convention is a pure matcher from a file name to a [`NameMatch`].
//! Callers pass an ordered chain; the first convention that matches wins.

use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{NameMatch, ReadEnd};

static ILLUMINA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_([A-Za-z0-9]+)_L(\d{3})_([RI][123])_\d{3}\.(?:fastq|fq)(?:\.(?:gz|zst))?$")
        .expect("valid illumina filename regex")
});

static END_SUFFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_([RI][123])\.(?:fastq|fq)(?:\.(?:gz|zst))?$")
        .expect("valid end suffix filename regex")
});

static PLAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)\.fastq(?:\.(?:gz|zst))?$").expect("valid plain filename regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FilenameConvention {
    /// `NAME_BARCODE_L001_R1_001.fastq.gz`
    Illumina,
    /// `NAME_R1.fastq.gz`
    EndSuffix,
    /// `NAME.fastq.gz`
    Plain,
}

impl FilenameConvention {
    pub fn classify(self, file_name: &str) -> Option<NameMatch> {
        match self {
            FilenameConvention::Illumina => {
                let cap = ILLUMINA_REGEX.captures(file_name)?;
                Some(NameMatch {
                    name: cap[1].to_string(),
                    barcode: Some(cap[2].to_string()),
                    lane: Some(cap[3].to_string()),
                    end: cap[4].parse().ok(),
                })
            }
            FilenameConvention::EndSuffix => {
                let cap = END_SUFFIX_REGEX.captures(file_name)?;
                Some(NameMatch {
                    name: cap[1].to_string(),
                    barcode: None,
                    lane: None,
                    end: cap[2].parse::<ReadEnd>().ok(),
                })
            }
            FilenameConvention::Plain => {
                let cap = PLAIN_REGEX.captures(file_name)?;
                Some(NameMatch {
                    name: cap[1].to_string(),
                    barcode: None,
                    lane: None,
                    end: None,
                })
            }
        }
    }
}

/// Chain used by the import workflows.
pub fn default_conventions() -> Vec<FilenameConvention> {
    vec![FilenameConvention::Illumina, FilenameConvention::EndSuffix]
}

/// Tries `conventions` in order and returns the first match.
pub fn classify(file_name: &str, conventions: &[FilenameConvention]) -> Option<NameMatch> {
    conventions
        .iter()
        .find_map(|convention| convention.classify(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illumina_fields() {
        let matched = FilenameConvention::Illumina
            .classify("sampleA_ACGT_L001_R2_001.fastq.gz")
            .unwrap();
        assert_eq!(matched.name, "sampleA");
        assert_eq!(matched.barcode.as_deref(), Some("ACGT"));
        assert_eq!(matched.lane.as_deref(), Some("001"));
        assert_eq!(matched.end, Some(ReadEnd::R2));
    }

    #[test]
    fn illumina_name_keeps_inner_underscores() {
        let matched = FilenameConvention::Illumina
            .classify("heart_1k_v3_S1_L002_I1_001.fastq")
            .unwrap();
        assert_eq!(matched.name, "heart_1k_v3");
        assert_eq!(matched.barcode.as_deref(), Some("S1"));
        assert_eq!(matched.end, Some(ReadEnd::I1));
    }

    #[test]
    fn illumina_fields_rebuild_file_name() {
        for file_name in [
            "sampleA_ACGT_L001_R1_001.fastq.gz",
            "run-7_GATTACA_L004_I3_002.fastq.zst",
            "x_y_z_S12_L010_R3_999.fastq",
        ] {
            let matched = FilenameConvention::Illumina.classify(file_name).unwrap();
            let rebuilt = format!(
                "{}_{}_L{}_{}_",
                matched.name,
                matched.barcode.unwrap(),
                matched.lane.unwrap(),
                matched.end.unwrap()
            );
            assert!(file_name.starts_with(&rebuilt), "{file_name} vs {rebuilt}");
        }
    }

    #[test]
    fn markers_are_case_sensitive_and_fixed_width() {
        let illumina = FilenameConvention::Illumina;
        assert!(illumina.classify("s_ACGT_l001_R1_001.fastq").is_none());
        assert!(illumina.classify("s_ACGT_L001_r1_001.fastq").is_none());
        assert!(illumina.classify("s_ACGT_L01_R1_001.fastq").is_none());
        assert!(illumina.classify("s_ACGT_L001_R4_001.fastq").is_none());
        assert!(illumina.classify("s_ACGT_L001_R1_0001.fastq").is_none());
        assert!(illumina.classify("s_ACGT_L001_R1_001.fastq.bak").is_none());
    }

    #[test]
    fn end_suffix_and_plain() {
        let matched = FilenameConvention::EndSuffix
            .classify("liver_R1.fastq.zst")
            .unwrap();
        assert_eq!(matched.name, "liver");
        assert_eq!(matched.end, Some(ReadEnd::R1));
        assert!(matched.barcode.is_none());

        let matched = FilenameConvention::Plain.classify("liver.fastq").unwrap();
        assert_eq!(matched.name, "liver");
        assert_eq!(matched.end, None);
        assert!(FilenameConvention::Plain.classify("liver.txt").is_none());
    }

    #[test]
    fn first_matching_convention_wins() {
        let chain = [
            FilenameConvention::Illumina,
            FilenameConvention::EndSuffix,
            FilenameConvention::Plain,
        ];
        let matched = classify("a_ACGT_L001_R1_001.fastq.gz", &chain).unwrap();
        assert_eq!(matched.name, "a");

        let matched = classify("a_R2.fastq.gz", &chain).unwrap();
        assert_eq!(matched.end, Some(ReadEnd::R2));

        let matched = classify("a_R2.fastq.gz", &[FilenameConvention::Plain]).unwrap();
        assert_eq!(matched.name, "a_R2");
        assert_eq!(matched.end, None);

        assert!(classify("notes.md", &chain).is_none());
    }
}
