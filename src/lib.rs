pub mod app;
pub mod config;
pub mod db;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod export;
pub mod fastq;
pub mod filenames;
pub mod fs_util;
pub mod import;
pub mod ncbi;
pub mod output;
pub mod reconcile;
pub mod sra;
pub mod store;
