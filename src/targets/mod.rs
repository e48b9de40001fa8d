//! Target list parsing and fingerprinting.
//!
//! A targets file is a plain text file with one page ID per line. Lines
//! are tolerated in several shapes (quoted IDs, trailing CSV columns,
//! trailing whitespace-separated columns); anything that does not start
//! with a clean decimal ID is ignored with a note naming the 1-indexed
//! line, mirroring the messages the export surface shows to users.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use md5::{Digest, Md5};
use tracing::debug;

use crate::download::DownloadError;

/// Result of parsing a targets file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetList {
    /// Ordered page IDs, one per accepted line.
    pub ids: Vec<u64>,
    /// 1-indexed numbers of the lines that were ignored.
    pub ignored_lines: Vec<u64>,
}

impl TargetList {
    /// Messages describing ignored lines, ready for the log buffer.
    #[must_use]
    pub fn ignored_messages(&self) -> Vec<String> {
        self.ignored_lines
            .iter()
            .map(|line| format!("Line number {line} was ignored"))
            .collect()
    }
}

/// Parses targets file content into an ordered list of page IDs.
///
/// # Errors
///
/// Returns [`DownloadError::NoValidTargets`] when no line yields an ID.
pub fn parse_targets(content: &str) -> Result<TargetList, DownloadError> {
    let mut ids = Vec::new();
    let mut ignored_lines = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_number = index as u64 + 1;
        match parse_target_line(line) {
            Some(id) => ids.push(id),
            None => ignored_lines.push(line_number),
        }
    }

    if ids.is_empty() {
        return Err(DownloadError::NoValidTargets);
    }

    debug!(
        accepted = ids.len(),
        ignored = ignored_lines.len(),
        "parsed targets file"
    );

    Ok(TargetList { ids, ignored_lines })
}

/// Reads and parses a targets file from disk.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read, or
/// [`DownloadError::NoValidTargets`] when no line yields an ID.
pub fn parse_targets_file(path: &Path) -> Result<TargetList, DownloadError> {
    let content = fs::read_to_string(path).map_err(|e| DownloadError::io(path, e))?;
    parse_targets(&content)
}

/// Extracts a page ID from one line, or `None` if the line is ignored.
///
/// The first whitespace-separated token is taken, surrounding single or
/// double quotes are stripped, and anything from the first comma on is
/// dropped. The remainder must parse as a decimal unsigned integer.
/// Zero is not a valid page ID, same as a zero crawl ID.
fn parse_target_line(line: &str) -> Option<u64> {
    let token = line.split_whitespace().next()?;
    let token = token.trim_matches('"').trim_matches('\'');
    let token = token.split(',').next().unwrap_or(token);
    token.parse::<u64>().ok().filter(|id| *id != 0)
}

/// MD5 hex digest of a file's bytes, used to detect between-run edits
/// of the targets file. The digest algorithm is part of the resume-file
/// contract and cannot change without invalidating existing sidecars.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn file_md5(path: &Path) -> Result<String, DownloadError> {
    let bytes = fs::read(path).map_err(|e| DownloadError::io(path, e))?;
    let digest = Md5::digest(&bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}
