use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid project reference: {0}")]
    InvalidProjectRef(String),

    #[error("invalid read end tag: {0}")]
    InvalidReadEnd(String),

    #[error("invalid FASTQ header in {path}: {line}")]
    #[diagnostic(help("read files must start with a '@' record header"))]
    ReadFormat { path: String, line: String },

    #[error("malformed SRA document: {0}")]
    ArchiveFormat(String),

    #[error("malformed project document {path}: {message}")]
    #[diagnostic(help("pass a file written by `sra fetch --save-json`"))]
    ProjectFormat { path: String, message: String },

    #[error("name collision: run {name} found in several directories ({})", directories.join(", "))]
    #[diagnostic(help("runs with the same name must live in a single directory"))]
    NameCollision {
        name: String,
        directories: Vec<String>,
    },

    #[error("multiple flowcells detected in run {0}")]
    MultipleFlowcells(String),

    #[error(
        "spot count mismatch for {run}: local run {local_run} has {local_spots} spots, SRA reports {archive_spots}"
    )]
    #[diagnostic(help("the local reads and the SRA runs no longer describe the same data"))]
    SpotMismatch {
        run: String,
        local_run: String,
        local_spots: u64,
        archive_spots: u64,
    },

    #[error("{0} already imported")]
    AlreadyImported(String),

    #[error("no replicate to export")]
    #[diagnostic(help("pass --replicates or --replicates-file"))]
    NoReplicates,

    #[error("publication not found: {0}")]
    PublicationNotFound(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("database request failed: {0}")]
    DbHttp(String),

    #[error("database returned status {status}: {message}")]
    DbStatus { status: u16, message: String },

    #[error("database query failed: {0}")]
    DbQuery(String),

    #[error("unexpected database response: {0}")]
    DbResponse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
