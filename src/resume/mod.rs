//! Crash-consistent resume state, persisted beside the output file.
//!
//! Every successfully appended chunk is followed by a full rewrite of a
//! small JSON sidecar named `{output}.audisto_`. On startup the sidecar
//! and the output file together decide whether a job starts fresh,
//! resumes, or refuses to run; the decision table lives in
//! [`evaluate_reopen`]. The write order is always append output, flush
//! output, rewrite sidecar, so the persisted row count never exceeds
//! the rows actually on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::download::DownloadError;
pub use crate::download::ResumeError;

/// Suffix appended to the output filename to name the resume sidecar.
pub const RESUME_SUFFIX: &str = ".audisto_";

/// Suffix inserted before the output extension for the second stage of
/// a self-targets export.
pub const LINKS_SUFFIX: &str = "_links";

/// Progress of the target currently being exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProgress {
    /// Rows of this target already written to the output.
    #[serde(rename = "doneElements")]
    pub done_elements: u64,
    /// Total rows this target will produce.
    #[serde(rename = "totalElements")]
    pub total_elements: u64,
}

impl TargetProgress {
    /// True once every row of the target has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done_elements >= self.total_elements
    }
}

/// The persisted, crash-consistent state of one export job.
///
/// Field names are an on-disk contract; records written by earlier runs
/// must keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// The output filename this record describes.
    #[serde(rename = "outputFilename")]
    pub output_filename: String,
    /// Targets filename, or empty when no targets mode is active.
    #[serde(rename = "targetsFilename")]
    pub targets_filename: String,
    /// MD5 hex fingerprint of the targets file content.
    #[serde(rename = "targetsFileMD5")]
    pub targets_file_md5: String,
    /// Index of the next target to start in the parsed ID list.
    #[serde(rename = "targetsFileNextID")]
    pub targets_file_next_id: u64,
    /// Rows written across the whole job.
    #[serde(rename = "doneElements")]
    pub done_elements: u64,
    /// Total rows the whole job will produce.
    #[serde(rename = "totalElements")]
    pub total_elements: u64,
    /// Progress of the in-flight target.
    #[serde(rename = "currentTarget")]
    pub current_target: TargetProgress,
    /// Whether detailed fields were excluded; must match between runs.
    #[serde(rename = "noDetails")]
    pub no_details: bool,
    /// Whether the first stage of a self-targets export has finished.
    #[serde(rename = "pagesSelfTargetsCompleted")]
    pub pages_self_targets_completed: bool,
}

impl ResumeRecord {
    /// A fresh record for a job that has not fetched anything yet.
    #[must_use]
    pub fn fresh(output_filename: &str, no_details: bool) -> Self {
        Self {
            output_filename: output_filename.to_string(),
            targets_filename: String::new(),
            targets_file_md5: String::new(),
            targets_file_next_id: 0,
            done_elements: 0,
            total_elements: 0,
            current_target: TargetProgress::default(),
            no_details,
            pages_self_targets_completed: false,
        }
    }
}

/// Derives the second-stage output filename: `x.tsv` becomes
/// `x_links.tsv`; a name without extension gets the suffix appended.
#[must_use]
pub fn links_output_filename(output: &str) -> String {
    let path = Path::new(output);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(output);
    let renamed = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{LINKS_SUFFIX}.{ext}"),
        None => format!("{stem}{LINKS_SUFFIX}"),
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(renamed).to_string_lossy().into_owned()
        }
        _ => renamed,
    }
}

/// Handle on the resume sidecar of one output file.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    output_path: PathBuf,
    resume_path: PathBuf,
}

impl ResumeStore {
    /// Store for the sidecar belonging to `output`.
    #[must_use]
    pub fn for_output(output: &str) -> Self {
        Self {
            output_path: PathBuf::from(output),
            resume_path: PathBuf::from(format!("{output}{RESUME_SUFFIX}")),
        }
    }

    /// Path of the resume sidecar file.
    #[must_use]
    pub fn resume_path(&self) -> &Path {
        &self.resume_path
    }

    /// Path of the output file this store belongs to.
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// True if the resume sidecar exists on disk.
    #[must_use]
    pub fn resume_file_exists(&self) -> bool {
        self.resume_path.exists()
    }

    /// True if the output file exists on disk.
    #[must_use]
    pub fn output_exists(&self) -> bool {
        self.output_path.exists()
    }

    /// Loads and decodes the resume sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeError::Unreadable`] if the file cannot be read or
    /// does not decode as a resume record.
    pub fn load(&self) -> Result<ResumeRecord, ResumeError> {
        let bytes = fs::read(&self.resume_path).map_err(|e| ResumeError::Unreadable {
            path: self.resume_path.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ResumeError::Unreadable {
            path: self.resume_path.clone(),
            message: e.to_string(),
        })
    }

    /// Rewrites the resume sidecar in full (pretty JSON, tab indent).
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn persist(&self, record: &ResumeRecord) -> Result<(), DownloadError> {
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        record
            .serialize(&mut ser)
            .map_err(|e| DownloadError::parse(format!("resume record encoding failed: {e}")))?;
        fs::write(&self.resume_path, buf).map_err(|e| DownloadError::io(&self.resume_path, e))
    }

    /// Removes the resume sidecar. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an IO error for any failure other than the file being gone.
    pub fn delete(&self) -> Result<(), DownloadError> {
        match fs::remove_file(&self.resume_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(&self.resume_path, e)),
        }
    }
}

/// How a job starts after the reopen decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reopen {
    /// No usable prior state; start from row zero.
    Fresh,
    /// Continue from the loaded record; the output is opened for append.
    Resume(ResumeRecord),
}

/// Expectations of the current invocation, checked against a loaded record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReopenChecks<'a> {
    /// The detail setting of this invocation.
    pub no_details: bool,
    /// Targets filename this invocation will read, when in targets mode.
    pub targets_filename: Option<&'a str>,
    /// MD5 fingerprint of that targets file's current content.
    pub targets_md5: Option<&'a str>,
    /// In the second stage of a self export: the first-stage output name
    /// the record must still point at.
    pub self_stage_output: Option<&'a str>,
}

/// Applies the reopen decision table for one output file.
///
/// # Errors
///
/// Returns the matching [`ResumeError`] for every fatal row of the table.
pub fn evaluate_reopen(
    store: &ResumeStore,
    no_resume: bool,
    checks: &ReopenChecks<'_>,
) -> Result<Reopen, ResumeError> {
    if no_resume {
        return Ok(Reopen::Fresh);
    }

    let have_resume = store.resume_file_exists();
    let have_output = store.output_exists();

    match (have_resume, have_output) {
        (false, false) => return Ok(Reopen::Fresh),
        (false, true) => {
            return Err(ResumeError::AlreadyDownloaded {
                output: store.output_path.to_string_lossy().into_owned(),
            });
        }
        (true, false) => {
            return Err(ResumeError::OutputMissing {
                output: store.output_path.to_string_lossy().into_owned(),
            });
        }
        (true, true) => {}
    }

    let record = store.load()?;

    if record.no_details != checks.no_details {
        return Err(ResumeError::DetailMismatch {
            was: record.no_details,
            now: checks.no_details,
        });
    }

    if let Some(expected) = checks.targets_filename {
        if record.targets_filename.is_empty() {
            return Err(ResumeError::TargetsMissing);
        }
        if let Some(original) = checks.self_stage_output {
            if record.pages_self_targets_completed && record.targets_filename != original {
                return Err(ResumeError::MetaAltered);
            }
        } else if record.targets_filename != expected {
            return Err(ResumeError::TargetsRenamed {
                was: record.targets_filename.clone(),
            });
        }
        if let Some(md5) = checks.targets_md5 {
            if record.targets_file_md5 != md5 {
                return Err(ResumeError::TargetsAltered);
            }
        }
    }

    debug!(
        done = record.done_elements,
        total = record.total_elements,
        next_target = record.targets_file_next_id,
        "resuming from sidecar"
    );

    Ok(Reopen::Resume(record))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_with(
        output: &str,
        targets: &str,
        md5: &str,
        no_details: bool,
        completed: bool,
    ) -> ResumeRecord {
        let mut record = ResumeRecord::fresh(output, no_details);
        record.targets_filename = targets.to_string();
        record.targets_file_md5 = md5.to_string();
        record.pages_self_targets_completed = completed;
        record
    }

    fn store_in(dir: &TempDir, name: &str) -> ResumeStore {
        ResumeStore::for_output(&dir.path().join(name).to_string_lossy())
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let mut record = ResumeRecord::fresh("crawl.tsv", true);
        record.targets_filename = "targets.txt".into();
        record.targets_file_md5 = "d41d8cd98f00b204e9800998ecf8427e".into();
        record.targets_file_next_id = 3;
        record.done_elements = 12_345;
        record.total_elements = 99_999;
        record.current_target = TargetProgress {
            done_elements: 45,
            total_elements: 80,
        };
        record.pages_self_targets_completed = true;

        let json = serde_json::to_string(&record).unwrap();
        let back: ResumeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_serializes_contract_field_names() {
        let record = ResumeRecord::fresh("crawl.tsv", false);
        let json = serde_json::to_string(&record).unwrap();
        for key in [
            "outputFilename",
            "targetsFilename",
            "targetsFileMD5",
            "targetsFileNextID",
            "doneElements",
            "totalElements",
            "currentTarget",
            "noDetails",
            "pagesSelfTargetsCompleted",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn test_persist_writes_tab_indented_json() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        store.persist(&ResumeRecord::fresh("out.tsv", false)).unwrap();

        let text = std::fs::read_to_string(store.resume_path()).unwrap();
        assert!(text.contains("\n\t\"outputFilename\""), "got: {text}");
    }

    #[test]
    fn test_links_output_filename_with_extension() {
        assert_eq!(links_output_filename("x.tsv"), "x_links.tsv");
        assert_eq!(links_output_filename("dir/x.tsv"), "dir/x_links.tsv");
    }

    #[test]
    fn test_links_output_filename_without_extension() {
        assert_eq!(links_output_filename("crawl"), "crawl_links");
    }

    #[test]
    fn test_resume_path_uses_suffix() {
        let store = ResumeStore::for_output("out.tsv");
        assert_eq!(
            store.resume_path().to_string_lossy(),
            "out.tsv.audisto_"
        );
    }

    #[test]
    fn test_reopen_fresh_when_nothing_exists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        let reopen = evaluate_reopen(&store, false, &ReopenChecks::default()).unwrap();
        assert_eq!(reopen, Reopen::Fresh);
    }

    #[test]
    fn test_reopen_fresh_when_no_resume_requested() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();
        store.persist(&ResumeRecord::fresh("out.tsv", false)).unwrap();

        let reopen = evaluate_reopen(&store, true, &ReopenChecks::default()).unwrap();
        assert_eq!(reopen, Reopen::Fresh);
    }

    #[test]
    fn test_reopen_rejects_already_downloaded() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();

        let err = evaluate_reopen(&store, false, &ReopenChecks::default()).unwrap_err();
        assert!(matches!(err, ResumeError::AlreadyDownloaded { .. }));
    }

    #[test]
    fn test_reopen_rejects_missing_output() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        store.persist(&ResumeRecord::fresh("out.tsv", false)).unwrap();

        let err = evaluate_reopen(&store, false, &ReopenChecks::default()).unwrap_err();
        assert!(matches!(err, ResumeError::OutputMissing { .. }));
    }

    #[test]
    fn test_reopen_rejects_detail_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();
        store.persist(&ResumeRecord::fresh("out.tsv", true)).unwrap();

        let checks = ReopenChecks {
            no_details: false,
            ..ReopenChecks::default()
        };
        let err = evaluate_reopen(&store, false, &checks).unwrap_err();
        assert!(matches!(
            err,
            ResumeError::DetailMismatch {
                was: true,
                now: false
            }
        ));
    }

    #[test]
    fn test_reopen_rejects_record_without_targets() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();
        store.persist(&ResumeRecord::fresh("out.tsv", false)).unwrap();

        let checks = ReopenChecks {
            targets_filename: Some("targets.txt"),
            ..ReopenChecks::default()
        };
        let err = evaluate_reopen(&store, false, &checks).unwrap_err();
        assert!(matches!(err, ResumeError::TargetsMissing));
    }

    #[test]
    fn test_reopen_rejects_renamed_targets_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();
        store
            .persist(&record_with("out.tsv", "old.txt", "abc", false, false))
            .unwrap();

        let checks = ReopenChecks {
            targets_filename: Some("new.txt"),
            ..ReopenChecks::default()
        };
        let err = evaluate_reopen(&store, false, &checks).unwrap_err();
        assert!(matches!(err, ResumeError::TargetsRenamed { was } if was == "old.txt"));
    }

    #[test]
    fn test_reopen_rejects_altered_targets_content() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();
        store
            .persist(&record_with("out.tsv", "targets.txt", "aaaa", false, false))
            .unwrap();

        let checks = ReopenChecks {
            targets_filename: Some("targets.txt"),
            targets_md5: Some("bbbb"),
            ..ReopenChecks::default()
        };
        let err = evaluate_reopen(&store, false, &checks).unwrap_err();
        assert!(matches!(err, ResumeError::TargetsAltered));
    }

    #[test]
    fn test_reopen_rejects_altered_self_stage_metadata() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out_links.tsv");
        std::fs::write(store.output_path(), "data\n").unwrap();
        store
            .persist(&record_with("out_links.tsv", "elsewhere.tsv", "abc", false, true))
            .unwrap();

        let checks = ReopenChecks {
            targets_filename: Some("out.tsv"),
            self_stage_output: Some("out.tsv"),
            ..ReopenChecks::default()
        };
        let err = evaluate_reopen(&store, false, &checks).unwrap_err();
        assert!(matches!(err, ResumeError::MetaAltered));
    }

    #[test]
    fn test_reopen_accepts_matching_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "out.tsv");
        std::fs::write(store.output_path(), "header\nrow\n").unwrap();
        let mut record = record_with("out.tsv", "targets.txt", "cafe", true, false);
        record.done_elements = 1;
        store.persist(&record).unwrap();

        let checks = ReopenChecks {
            no_details: true,
            targets_filename: Some("targets.txt"),
            targets_md5: Some("cafe"),
            ..ReopenChecks::default()
        };
        let reopen = evaluate_reopen(&store, false, &checks).unwrap();
        assert!(matches!(reopen, Reopen::Resume(r) if r.done_elements == 1));
    }
}
