//! Error types for the download module.
//!
//! This module defines structured errors for every way an export can
//! fail, providing context-rich messages for debugging and user feedback.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while exporting crawl data.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Invalid configuration detected before any I/O was performed.
    #[error("invalid configuration: {message}")]
    Config {
        /// What is wrong with the supplied configuration.
        message: String,
    },

    /// The server rejected the credentials (HTTP 401).
    #[error("wrong credentials")]
    WrongCredentials,

    /// The server denied access (HTTP 403).
    #[error("access denied; wrong credentials?")]
    AccessDenied,

    /// The crawl was not found (HTTP 404).
    #[error("not found; correct crawl ID?")]
    CrawlNotFound,

    /// Any other 4xx response the server may produce.
    #[error("unknown error occurred (code {status})")]
    UnknownStatus {
        /// The HTTP status code returned by the server.
        status: u16,
    },

    /// Network-level failure (DNS, connect, read) on a single request.
    #[error("request to {url} failed: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Transport retries were exhausted; the job can be resumed later.
    #[error(
        "network error after {attempts} attempts; check your connection to the internet and resume the download"
    )]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The last transport error observed.
        #[source]
        source: reqwest::Error,
    },

    /// File system error while writing output or resume state.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A response body could not be interpreted (bad UTF-8, bad count JSON).
    #[error("malformed server response: {message}")]
    Parse {
        /// Description of what failed to parse.
        message: String,
    },

    /// The total-count probe kept returning throttle statuses.
    #[error("could not get the total number of elements (status {status})")]
    ProbeFailed {
        /// The last throttle status observed.
        status: u16,
    },

    /// The persisted resume state is inconsistent with this invocation.
    #[error("{0}")]
    Resume(#[from] ResumeError),

    /// The targets file yielded no usable page IDs.
    #[error("targets file does not contain any valid page ID")]
    NoValidTargets,

    /// The job was stopped cooperatively; progress so far is persisted.
    #[error("download stopped; resume to continue")]
    Cancelled,
}

/// Resume validation failures, one variant per fatal reopen condition.
#[derive(Debug, Error)]
pub enum ResumeError {
    /// Output exists but its resume file is gone: the job already finished.
    #[error("{output} is already downloaded; use --no-resume to download it again")]
    AlreadyDownloaded {
        /// The output filename that already exists.
        output: String,
    },

    /// A resume file exists but the output it describes does not.
    #[error("cannot resume; output file {output} does not exist: use --no-resume to start a new download")]
    OutputMissing {
        /// The missing output filename.
        output: String,
    },

    /// The resume file could not be read or decoded.
    #[error("resume file {path} is unreadable: {message}")]
    Unreadable {
        /// Path of the resume file.
        path: PathBuf,
        /// What went wrong while reading or decoding it.
        message: String,
    },

    /// The detail level changed between runs; appending would corrupt the file.
    #[error(
        "this file was begun with no-details={was}; continuing with no-details={now} would break the file"
    )]
    DetailMismatch {
        /// The persisted detail setting.
        was: bool,
        /// The detail setting of this invocation.
        now: bool,
    },

    /// Targets mode requested but the previous run recorded no targets file.
    #[error("cannot resume; the previous run did not use a targets file")]
    TargetsMissing,

    /// The targets filename differs from the one recorded.
    #[error("cannot resume; targets file changed (previous run used {was})")]
    TargetsRenamed {
        /// The targets filename recorded by the previous run.
        was: String,
    },

    /// The targets file content changed since the fingerprint was taken.
    #[error("cannot resume; targets file content was altered since the previous run")]
    TargetsAltered,

    /// Self-mode metadata no longer points at the first-stage output.
    #[error("cannot resume; resume metadata was altered (targets file does not match the first-stage output)")]
    MetaAltered,
}

impl DownloadError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Maps a fatal HTTP status to its error. Only call for statuses the
    /// engine does not retry (401, 403, 404, other 4xx).
    pub fn from_fatal_status(status: u16) -> Self {
        match status {
            401 => Self::WrongCredentials,
            403 => Self::AccessDenied,
            404 => Self::CrawlNotFound,
            _ => Self::UnknownStatus { status },
        }
    }
}
