use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;

use crate::domain::FileDescriptor;
use crate::error::KiraError;
use crate::filenames::{FilenameConvention, classify};
use crate::fs_util;

pub fn default_fastq_exts() -> Vec<String> {
    vec![
        ".fastq".to_string(),
        ".fastq.gz".to_string(),
        ".fastq.zst".to_string(),
    ]
}

/// Read files grouped by logical run name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunFileIndex {
    groups: BTreeMap<String, Vec<FileDescriptor>>,
}

impl RunFileIndex {
    /// Walks `root` (following links) and groups every file ending with one
    /// of `extensions` that a convention in `conventions` recognises.
    pub fn discover(
        root: &Path,
        extensions: &[String],
        conventions: &[FilenameConvention],
    ) -> Result<Self, KiraError> {
        let mut groups: BTreeMap<String, Vec<FileDescriptor>> = BTreeMap::new();
        for path in fs_util::walk_files(root)? {
            let Some(file_name) = path.file_name().and_then(|value| value.to_str()) else {
                continue;
            };
            if !extensions.iter().any(|ext| file_name.ends_with(ext.as_str())) {
                continue;
            }
            let Some(matched) = classify(file_name, conventions) else {
                continue;
            };
            let directory = path.parent().unwrap_or(root);
            let descriptor = FileDescriptor::new(matched, directory, file_name);
            groups
                .entry(descriptor.name.clone())
                .or_default()
                .push(descriptor);
        }
        for files in groups.values_mut() {
            files.sort_by(|left, right| {
                left.file_name
                    .cmp(&right.file_name)
                    .then_with(|| left.directory.cmp(&right.directory))
            });
        }
        Ok(Self { groups })
    }

    pub fn from_groups(groups: BTreeMap<String, Vec<FileDescriptor>>) -> Self {
        Self { groups }
    }

    /// False when any run's files span more than one directory.
    pub fn validate(&self) -> bool {
        self.collision().is_none()
    }

    pub fn ensure_valid(&self) -> Result<(), KiraError> {
        match self.collision() {
            Some((name, directories)) => Err(KiraError::NameCollision {
                name: name.to_string(),
                directories,
            }),
            None => Ok(()),
        }
    }

    fn collision(&self) -> Option<(&str, Vec<String>)> {
        self.groups.iter().find_map(|(name, files)| {
            let directories: BTreeSet<_> = files.iter().map(|file| &file.directory).collect();
            (directories.len() > 1).then(|| {
                (
                    name.as_str(),
                    directories
                        .into_iter()
                        .map(|dir| dir.display().to_string())
                        .collect(),
                )
            })
        })
    }

    pub fn get(&self, name: &str) -> Option<&[FileDescriptor]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<FileDescriptor>)> {
        self.groups.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
