use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Project, ProjectRef};
use crate::error::KiraError;

/// On-disk cache of fetched SRA projects and their raw documents.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: Utf8PathBuf,
}

impl ProjectStore {
    pub fn new() -> Result<Self, KiraError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-seqdb")).ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn project_path(&self, project: &ProjectRef) -> Utf8PathBuf {
        self.root
            .join("projects")
            .join(format!("{}.json", project.as_str()))
    }

    pub fn xml_path(&self, project: &ProjectRef, index: usize) -> Utf8PathBuf {
        self.root
            .join("xml")
            .join(format!("{}_{index}.xml", project.as_str()))
    }

    pub fn metadata_path(&self, project: &ProjectRef) -> Utf8PathBuf {
        self.root
            .join("metadata")
            .join(format!("{}.json", project.as_str()))
    }

    pub fn has_project(&self, project: &ProjectRef) -> bool {
        self.project_path(project).as_std_path().exists()
    }

    pub fn load_project(&self, project: &ProjectRef) -> Result<Option<Project>, KiraError> {
        let path = self.project_path(project);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        let parsed = serde_json::from_str(&content)
            .map_err(|err| KiraError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Some(parsed))
    }

    /// Writes the interchange JSON and its metadata sidecar.
    pub fn save_project(&self, reference: &ProjectRef, project: &Project) -> Result<Utf8PathBuf, KiraError> {
        let path = self.project_path(reference);
        let content = serde_json::to_vec_pretty(project)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&path, &content)?;

        let metadata = Metadata {
            project: reference.as_str().to_string(),
            samples: project.samples.len(),
            runs: project.run_count(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("kira-seqdb/{}", env!("CARGO_PKG_VERSION")),
        };
        let content = serde_json::to_vec_pretty(&metadata)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.metadata_path(reference), &content)?;
        Ok(path)
    }

    pub fn save_xml(&self, project: &ProjectRef, index: usize, document: &str) -> Result<(), KiraError> {
        write_bytes_atomic(&self.xml_path(project, index), document.as_bytes())
    }

    pub fn load_metadata(&self, project: &ProjectRef) -> Result<Option<Metadata>, KiraError> {
        let path = self.metadata_path(project);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub project: String,
    pub samples: usize,
    pub runs: usize,
    pub saved_at: String,
    pub tool: String,
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-seqdb")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}
