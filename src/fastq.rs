//! First-record inspection and full scans of FASTQ files.

use std::io::BufRead;
use std::path::Path;

use crate::domain::ReadHeaderInfo;
use crate::error::KiraError;
use crate::fs_util;

/// Header conventions, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderConvention {
    /// `@instrument:run:flowcell:lane:tile:x:y pair:filtered:control:barcode`
    ColonTags,
    /// `@movie/zmw/ccs` as written by single-end long-read instruments.
    PathSegments,
}

const HEADER_CONVENTIONS: [HeaderConvention; 2] =
    [HeaderConvention::ColonTags, HeaderConvention::PathSegments];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub flowcell: String,
    pub lane: u32,
    pub pair_index: u32,
    pub barcode: Option<String>,
}

impl HeaderConvention {
    pub fn parse(self, header: &str) -> Option<HeaderFields> {
        let body = header.strip_prefix('@')?;
        let mut tokens = body.split_whitespace();
        let identifier = tokens.next()?;
        let meta = tokens.next();
        match self {
            HeaderConvention::ColonTags => {
                let fields: Vec<&str> = identifier.split(':').collect();
                if fields.len() < 5 {
                    return None;
                }
                let flowcell = fields[..fields.len() - 4].join(":");
                let lane = fields[fields.len() - 4].parse().ok()?;
                let (pair_index, barcode) = match meta {
                    Some(meta) => {
                        let pair = leading_digit(meta)?;
                        let barcode = meta.rsplit(':').next().map(str::to_string);
                        (pair, barcode)
                    }
                    None => (leading_digit(fields[fields.len() - 1])?, None),
                };
                Some(HeaderFields {
                    flowcell,
                    lane,
                    pair_index,
                    barcode,
                })
            }
            HeaderConvention::PathSegments => {
                let mut segments = identifier.split('/');
                let movie = segments.next().filter(|value| !value.is_empty())?;
                let hole = segments.next()?;
                if hole.is_empty() || !hole.chars().all(|ch| ch.is_ascii_digit()) {
                    return None;
                }
                Some(HeaderFields {
                    flowcell: movie.to_string(),
                    lane: 1,
                    pair_index: 1,
                    barcode: None,
                })
            }
        }
    }
}

fn leading_digit(value: &str) -> Option<u32> {
    value.chars().next()?.to_digit(10)
}

/// Parses a record header with the first convention that accepts it.
pub fn parse_header(header: &str) -> Option<HeaderFields> {
    HEADER_CONVENTIONS
        .iter()
        .find_map(|convention| convention.parse(header))
}

/// Inspects a (possibly compressed) FASTQ file.
///
/// Without `scan_all` only the first two lines are read. With it, every
/// complete 4-line record is consumed to count spots and find the longest
/// sequence; a truncated trailing record ends the scan silently.
pub fn inspect(path: &Path, scan_all: bool) -> Result<ReadHeaderInfo, KiraError> {
    let reader = fs_util::open_reader(path)?;
    inspect_reader(reader, &path.display().to_string(), scan_all)
}

pub fn inspect_reader<R: BufRead>(
    mut reader: R,
    source: &str,
    scan_all: bool,
) -> Result<ReadHeaderInfo, KiraError> {
    let mut line = String::new();
    let header = match read_trimmed(&mut reader, &mut line, source)? {
        Some(header) => header,
        None => {
            return Err(KiraError::ReadFormat {
                path: source.to_string(),
                line: String::new(),
            });
        }
    };
    let format_error = || KiraError::ReadFormat {
        path: source.to_string(),
        line: header.clone(),
    };
    if !header.starts_with('@') {
        return Err(format_error());
    }
    let fields = parse_header(&header).ok_or_else(format_error)?;
    let sequence = read_trimmed(&mut reader, &mut line, source)?.unwrap_or_default();

    let mut info = ReadHeaderInfo {
        flowcell: fields.flowcell,
        lane: fields.lane,
        pair_index: fields.pair_index,
        barcode: fields.barcode,
        read_length: sequence.len(),
        spot_count: None,
    };

    if scan_all {
        let (spots, max_length) = scan_records(&mut reader, source, info.read_length)?;
        info.spot_count = Some(spots);
        info.read_length = max_length;
    }
    Ok(info)
}

/// Counts records after the first header and sequence lines were consumed.
fn scan_records<R: BufRead>(
    reader: &mut R,
    source: &str,
    first_length: usize,
) -> Result<(u64, usize), KiraError> {
    let mut line = String::new();
    let mut spots = 1u64;
    let mut max_length = first_length;

    // separator and quality of the first record
    for _ in 0..2 {
        if read_trimmed(reader, &mut line, source)?.is_none() {
            return Ok((spots, max_length));
        }
    }

    loop {
        let mut record_length = None;
        for index in 0..4 {
            match read_trimmed(reader, &mut line, source)? {
                Some(value) if index == 1 => record_length = Some(value.len()),
                Some(_) => {}
                None => return Ok((spots, max_length)),
            }
        }
        spots += 1;
        if let Some(length) = record_length {
            max_length = max_length.max(length);
        }
    }
}

fn read_trimmed<R: BufRead>(
    reader: &mut R,
    buffer: &mut String,
    source: &str,
) -> Result<Option<String>, KiraError> {
    buffer.clear();
    let read = reader
        .read_line(buffer)
        .map_err(|err| KiraError::Filesystem(format!("read {source}: {err}")))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(buffer.trim_end_matches(['\n', '\r']).to_string()))
}
