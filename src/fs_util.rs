use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::warn;

use crate::error::KiraError;

const READ_BUFFER: usize = 1024 * 1024;

/// Opens a read file, decompressing `.gz` and `.zst` transparently.
pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead>, KiraError> {
    let file = fs::File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    let reader: Box<dyn BufRead> = match extension {
        "gz" => Box::new(BufReader::with_capacity(
            READ_BUFFER,
            MultiGzDecoder::new(file),
        )),
        "zst" => {
            let decoder = zstd::stream::read::Decoder::new(file)
                .map_err(|err| KiraError::Filesystem(format!("zstd {}: {err}", path.display())))?;
            Box::new(BufReader::with_capacity(READ_BUFFER, decoder))
        }
        _ => Box::new(BufReader::with_capacity(READ_BUFFER, file)),
    };
    Ok(reader)
}

/// Lists every regular file below `root`, following symbolic links.
///
/// Directories reached twice through links are visited once. Only an
/// unreadable `root` is an error; unreadable subdirectories are logged
/// and skipped.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, KiraError> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    let canonical = fs::canonicalize(root)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", root.display())))?;
    seen.insert(canonical);
    let entries = fs::read_dir(root)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", root.display())))?;
    let mut stack = Vec::new();
    collect_entries(entries, &mut stack, &mut files);
    while let Some(dir) = stack.pop() {
        let canonical = match fs::canonicalize(&dir) {
            Ok(canonical) => canonical,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "skipping directory");
                continue;
            }
        };
        if !seen.insert(canonical) {
            continue;
        }
        match fs::read_dir(&dir) {
            Ok(entries) => collect_entries(entries, &mut stack, &mut files),
            Err(err) => warn!(path = %dir.display(), error = %err, "skipping directory"),
        }
    }
    Ok(files)
}

fn collect_entries(entries: fs::ReadDir, stack: &mut Vec<PathBuf>, files: &mut Vec<PathBuf>) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping directory entry");
                continue;
            }
        };
        let path = entry.path();
        // fs::metadata follows links; dangling links are skipped
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        if metadata.is_dir() {
            stack.push(path);
        } else if metadata.is_file() {
            files.push(path);
        }
    }
}
