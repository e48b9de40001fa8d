//! Download engine: the state machine that drives an export to completion.
//!
//! One engine instance runs one job. The job is a sequence of targets
//! (the whole crawl, or one page ID each in targets mode); every target
//! is exported by the same per-chunk loop: plan the next request, fetch
//! it with transport retries, react to the status code, append the new
//! rows, flush, persist the resume record. Throttling shrinks the chunk
//! size within a target and resets it on target boundaries.
//!
//! The self-targets workflow runs twice over that machinery: a first
//! stage exports the crawl's pages, then the engine migrates its resume
//! state onto a `_links` output and exports the links of every page
//! listed in the first stage's own output. The stage switch is a state
//! transition, not a recursive call, so the progress sink is closed
//! exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::resume::{
    Reopen, ReopenChecks, ResumeError, ResumeRecord, ResumeStore, TargetProgress, evaluate_reopen,
    links_output_filename,
};
use crate::targets;

use super::client::{ApiClient, ChunkRequest, CrawlSelector, Mode, OutputFormat, parse_total_count};
use super::constants::{
    DEFAULT_CHUNK_SIZE, FETCH_ATTEMPTS, FETCH_RETRY_DELAY, FIRST_SHRINK_CHUNK_SIZE,
    MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, PROBE_ATTEMPTS, PROBE_RETRY_DELAY, PROBE_THROTTLE_DELAY,
    SHRINK_FLOOR, SHRINK_STEP, SPEED_SMOOTHING, THROTTLE_DELAY, TIMEOUTS_BEFORE_SHRINK,
};
use super::error::DownloadError;
use super::planner::plan_chunk;
use super::progress::{LogLevel, ProgressState, StatusReport, spawn_reporter};

/// Where the list of target page IDs comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetsSpec {
    /// A user-supplied file of page IDs.
    File(PathBuf),
    /// Two-stage workflow: export pages first, then the links of every
    /// exported page.
    SelfTargets,
}

/// Job-level options beside the crawl selector.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Rows per chunk; 0 means the default of 10000.
    pub chunk_size: u64,
    /// Output filename; `None` streams to stdout without resume support.
    pub output: Option<String>,
    /// Ignore any existing resume state and start from row zero.
    pub no_resume: bool,
    /// Targets mode, if any.
    pub targets: Option<TargetsSpec>,
}

/// Cooperative cancellation handle; cloneable across tasks.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Requests the engine to stop at the next chunk boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Output destination the engine appends rows to.
struct OutputSink {
    writer: SinkWriter,
    path: PathBuf,
}

enum SinkWriter {
    File(BufWriter<File>),
    Stdout(Stdout),
}

impl OutputSink {
    async fn create(path: &Path) -> Result<Self, DownloadError> {
        let file = File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        Ok(Self {
            writer: SinkWriter::File(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    async fn append(path: &Path) -> Result<Self, DownloadError> {
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        Ok(Self {
            writer: SinkWriter::File(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    fn stdout() -> Self {
        Self {
            writer: SinkWriter::Stdout(tokio::io::stdout()),
            path: PathBuf::from("<stdout>"),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), DownloadError> {
        let result = match &mut self.writer {
            SinkWriter::File(w) => {
                match w.write_all(line.as_bytes()).await {
                    Ok(()) => w.write_all(b"\n").await,
                    Err(e) => Err(e),
                }
            }
            SinkWriter::Stdout(w) => {
                match w.write_all(line.as_bytes()).await {
                    Ok(()) => w.write_all(b"\n").await,
                    Err(e) => Err(e),
                }
            }
        };
        result.map_err(|e| DownloadError::io(&self.path, e))
    }

    async fn flush(&mut self) -> Result<(), DownloadError> {
        let result = match &mut self.writer {
            SinkWriter::File(w) => w.flush().await,
            SinkWriter::Stdout(w) => w.flush().await,
        };
        result.map_err(|e| DownloadError::io(&self.path, e))
    }
}

/// The next throttled chunk size; shrinking only, floored, and a no-op
/// once the floor is reached.
fn shrink_chunk_size(chunk_size: u64) -> u64 {
    if chunk_size == MAX_CHUNK_SIZE {
        FIRST_SHRINK_CHUNK_SIZE
    } else if chunk_size > SHRINK_FLOOR {
        (chunk_size - SHRINK_STEP).max(SHRINK_FLOOR)
    } else {
        chunk_size
    }
}

/// The export state machine. See the module docs for the overall flow.
pub struct DownloadEngine {
    client: ApiClient,
    options: EngineOptions,
    no_details: bool,
    default_chunk_size: u64,
    chunk_size: u64,
    timeout_strikes: u32,
    throttle_delay: Duration,
    retry_delay: Duration,
    probe_throttle_delay: Duration,
    probe_retry_delay: Duration,
    state: Arc<ProgressState>,
    stop: Arc<AtomicBool>,
    sink: Option<mpsc::UnboundedSender<StatusReport>>,
}

impl DownloadEngine {
    /// Validates the configuration and builds an engine against the
    /// production API endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid credentials, a chunk
    /// size outside 1..=10000, or a targets mode without an output file.
    pub fn configure(
        selector: CrawlSelector,
        options: EngineOptions,
    ) -> Result<Self, DownloadError> {
        let client = ApiClient::new(selector)?;
        Self::from_client(client, options)
    }

    /// Like [`configure`](Self::configure) but against an arbitrary base
    /// URL. Used by tests running against a local mock server.
    ///
    /// # Errors
    ///
    /// Same as [`configure`](Self::configure).
    pub fn configure_with_base_url(
        selector: CrawlSelector,
        options: EngineOptions,
        base_url: url::Url,
    ) -> Result<Self, DownloadError> {
        let client = ApiClient::with_base_url(selector, base_url)?;
        Self::from_client(client, options)
    }

    fn from_client(client: ApiClient, mut options: EngineOptions) -> Result<Self, DownloadError> {
        if options.chunk_size == 0 {
            options.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&options.chunk_size) {
            return Err(DownloadError::config(format!(
                "chunk size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}, not {}",
                options.chunk_size
            )));
        }
        if options.targets.is_some() && options.output.is_none() {
            return Err(DownloadError::config(
                "targets mode requires an output file",
            ));
        }

        let no_details = !client.selector().deep;
        let output_name = options.output.clone().unwrap_or_default();
        let state = Arc::new(ProgressState::new(
            client.mode().as_str(),
            &output_name,
            options.chunk_size,
        ));

        Ok(Self {
            client,
            default_chunk_size: options.chunk_size,
            chunk_size: options.chunk_size,
            options,
            no_details,
            timeout_strikes: 0,
            throttle_delay: THROTTLE_DELAY,
            retry_delay: FETCH_RETRY_DELAY,
            probe_throttle_delay: PROBE_THROTTLE_DELAY,
            probe_retry_delay: PROBE_RETRY_DELAY,
            state,
            stop: Arc::new(AtomicBool::new(false)),
            sink: None,
        })
    }

    /// Overrides the backoff pacing. The defaults match what the server
    /// tolerates in production; tests run against a local mock server
    /// with much shorter delays.
    #[must_use]
    pub fn with_backoff_delays(mut self, throttle: Duration, retry: Duration) -> Self {
        self.throttle_delay = throttle;
        self.retry_delay = retry;
        self.probe_throttle_delay = throttle;
        self.probe_retry_delay = retry;
        self
    }

    /// Registers the single progress subscriber. Must be called before
    /// [`start`](Self::start); later calls replace the previous sink.
    pub fn subscribe_progress(&mut self, sink: mpsc::UnboundedSender<StatusReport>) {
        self.sink = Some(sink);
    }

    /// A handle that cancels the run at the next chunk boundary.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Runs the job to completion, failure, or cancellation.
    ///
    /// On success every row has been written, the output is flushed and
    /// the resume sidecar is deleted. On any error the sidecar reflects
    /// exactly the rows that reached the output file.
    ///
    /// # Errors
    ///
    /// See [`DownloadError`] for the failure taxonomy; throttle statuses
    /// are retried internally and never surface here.
    pub async fn start(mut self) -> Result<(), DownloadError> {
        let (done_tx, done_rx) = watch::channel(false);
        let reporter = self
            .sink
            .take()
            .map(|sink| spawn_reporter(Arc::clone(&self.state), sink, done_rx));

        let result = self.run().await;

        let _ = done_tx.send(true);
        if let Some(handle) = reporter {
            let _ = handle.await;
        }
        result
    }

    async fn run(&mut self) -> Result<(), DownloadError> {
        match self.options.targets.clone() {
            None => self.run_plain().await,
            Some(TargetsSpec::File(path)) => {
                let output = self.require_output()?;
                self.run_targets(&path, &output, None).await
            }
            Some(TargetsSpec::SelfTargets) => self.run_self_targets().await,
        }
    }

    fn require_output(&self) -> Result<String, DownloadError> {
        self.options
            .output
            .clone()
            .ok_or_else(|| DownloadError::config("targets mode requires an output file"))
    }

    // ---- plain (whole crawl as a single target) ----------------------

    async fn run_plain(&mut self) -> Result<(), DownloadError> {
        let Some(output) = self.options.output.clone() else {
            return self.run_plain_stdout().await;
        };

        let store = ResumeStore::for_output(&output);
        self.run_single_export(&store, &output).await?;
        store.delete()?;
        info!(output = %output, "export complete");
        Ok(())
    }

    async fn run_plain_stdout(&mut self) -> Result<(), DownloadError> {
        let total = self.probe_total().await?;
        let mut record = ResumeRecord::fresh("", self.no_details);
        record.total_elements = total;
        record.current_target = TargetProgress {
            done_elements: 0,
            total_elements: total,
        };

        let mut writer = OutputSink::stdout();
        self.export_target(&mut record, &mut writer, None).await?;
        writer.flush().await
    }

    /// Exports the whole crawl into `output`, honoring resume state.
    async fn run_single_export(
        &mut self,
        store: &ResumeStore,
        output: &str,
    ) -> Result<(), DownloadError> {
        let checks = ReopenChecks {
            no_details: self.no_details,
            ..ReopenChecks::default()
        };

        let (mut record, mut writer) = match evaluate_reopen(
            store,
            self.options.no_resume,
            &checks,
        )? {
            Reopen::Fresh => {
                if !self.options.no_resume {
                    self.log_info("No download to resume; starting a new...");
                }
                let total = self.probe_total().await?;
                let mut record = ResumeRecord::fresh(output, self.no_details);
                record.total_elements = total;
                record.current_target = TargetProgress {
                    done_elements: 0,
                    total_elements: total,
                };
                store.persist(&record)?;
                let writer = OutputSink::create(store.output_path()).await?;
                (record, writer)
            }
            Reopen::Resume(record) => {
                self.log_info(format!(
                    "Resuming {output} at {} of {} rows",
                    record.done_elements, record.total_elements
                ));
                let writer = OutputSink::append(store.output_path()).await?;
                (record, writer)
            }
        };

        self.export_target(&mut record, &mut writer, Some(store))
            .await?;
        writer.flush().await
    }

    // ---- targets mode ------------------------------------------------

    /// Exports the links of every page ID in `targets_path` into
    /// `output`. `self_stage_output` carries the first-stage output name
    /// when this is the second stage of a self export.
    async fn run_targets(
        &mut self,
        targets_path: &Path,
        output: &str,
        self_stage_output: Option<&str>,
    ) -> Result<(), DownloadError> {
        let list = targets::parse_targets_file(targets_path)?;
        for message in list.ignored_messages() {
            self.log_warning(message);
        }
        let md5 = targets::file_md5(targets_path)?;
        let targets_name = targets_path.to_string_lossy().into_owned();

        let store = ResumeStore::for_output(output);
        let checks = ReopenChecks {
            no_details: self.no_details,
            targets_filename: Some(&targets_name),
            targets_md5: Some(&md5),
            self_stage_output,
        };

        let total_ids = list.ids.len() as u64;
        let mut totals: Vec<u64> = vec![0; list.ids.len()];

        let (mut record, mut writer) = match evaluate_reopen(
            &store,
            self.options.no_resume,
            &checks,
        )? {
            Reopen::Fresh => {
                let mut grand_total = 0;
                for (index, id) in list.ids.iter().enumerate() {
                    self.client.set_target_page_filter(*id);
                    let total = self.probe_total().await?;
                    totals[index] = total;
                    grand_total += total;
                }
                debug!(targets = total_ids, grand_total, "probed all target counts");

                let mut record = ResumeRecord::fresh(output, self.no_details);
                record.targets_filename = targets_name.clone();
                record.targets_file_md5 = md5.clone();
                record.total_elements = grand_total;
                record.pages_self_targets_completed = self_stage_output.is_some();
                store.persist(&record)?;
                let writer = OutputSink::create(store.output_path()).await?;
                (record, writer)
            }
            Reopen::Resume(mut resumed) => {
                let start = resumed.targets_file_next_id as usize;
                if start > list.ids.len() {
                    return Err(DownloadError::Resume(ResumeError::TargetsAltered));
                }
                let in_flight = resumed.current_target.done_elements > 0
                    || resumed.current_target.total_elements > 0;
                for (index, id) in list.ids.iter().enumerate().skip(start) {
                    if index == start && in_flight {
                        totals[index] = resumed.current_target.total_elements;
                        continue;
                    }
                    self.client.set_target_page_filter(*id);
                    totals[index] = self.probe_total().await?;
                }
                if resumed.total_elements == 0 {
                    let remaining: u64 = totals.iter().skip(start).sum();
                    let completed = resumed
                        .done_elements
                        .saturating_sub(resumed.current_target.done_elements);
                    resumed.total_elements = completed + remaining;
                }
                self.log_info(format!(
                    "Resuming {output} at target {} of {total_ids}",
                    resumed.targets_file_next_id + 1
                ));
                let writer = OutputSink::append(store.output_path()).await?;
                (resumed, writer)
            }
        };

        let start = record.targets_file_next_id as usize;
        for (index, id) in list.ids.iter().enumerate().skip(start) {
            self.state.set_targets_progress(total_ids, index as u64 + 1);
            self.chunk_size = self.default_chunk_size;
            self.timeout_strikes = 0;
            self.state.set_chunk_size(self.chunk_size);
            self.client.set_target_page_filter(*id);

            if record.current_target.done_elements == 0
                && record.current_target.total_elements == 0
            {
                record.current_target = TargetProgress {
                    done_elements: 0,
                    total_elements: totals[index],
                };
                store.persist(&record)?;
            }

            self.export_target(&mut record, &mut writer, Some(&store))
                .await?;

            record.targets_file_next_id = index as u64 + 1;
            record.current_target = TargetProgress::default();
            store.persist(&record)?;
        }

        writer.flush().await?;
        store.delete()?;
        info!(output = %output, targets = total_ids, "targets export complete");
        Ok(())
    }

    // ---- self-targets (two stages) -----------------------------------

    async fn run_self_targets(&mut self) -> Result<(), DownloadError> {
        let output = self.require_output()?;
        let links_output = links_output_filename(&output);
        let stage_a_store = ResumeStore::for_output(&output);

        // A finished first stage leaves its output behind without a
        // sidecar; in that case only the second stage is left to run.
        let stage_a_done = !self.options.no_resume
            && stage_a_store.output_exists()
            && !stage_a_store.resume_file_exists();

        if !stage_a_done {
            self.client.set_mode(Mode::Pages);
            self.state.set_stage(Mode::Pages.as_str(), &output);
            self.run_single_export(&stage_a_store, &output).await?;
            self.migrate_to_links_stage(&output, &links_output, &stage_a_store)?;
        }

        self.client.set_mode(Mode::Links);
        self.client.clear_filter();
        self.chunk_size = self.default_chunk_size;
        self.timeout_strikes = 0;
        self.state.set_chunk_size(self.chunk_size);
        self.state.set_stage(Mode::Links.as_str(), &links_output);
        self.log_info(format!(
            "Exporting links for every downloaded page into {links_output}"
        ));

        self.run_targets(Path::new(&output), &links_output, Some(&output))
            .await
    }

    /// Moves the resume state from the finished pages stage onto the
    /// links output: the pages output becomes the targets file, totals
    /// reset, and the sidecar migrates to `{links_output}.audisto_`.
    /// The old sidecar is deleted last so a crash in between replays the
    /// migration instead of losing it.
    fn migrate_to_links_stage(
        &mut self,
        output: &str,
        links_output: &str,
        stage_a_store: &ResumeStore,
    ) -> Result<(), DownloadError> {
        info!(pages = %output, links = %links_output, "first stage complete; migrating resume state");

        let mut record = ResumeRecord::fresh(links_output, self.no_details);
        record.pages_self_targets_completed = true;
        record.targets_filename = output.to_string();
        record.targets_file_md5 = targets::file_md5(Path::new(output))?;

        let links_store = ResumeStore::for_output(links_output);
        links_store.persist(&record)?;
        std::fs::File::create(links_store.output_path())
            .map_err(|e| DownloadError::io(links_store.output_path(), e))?;
        stage_a_store.delete()?;

        self.log_info("Pages stage complete; starting links stage");
        Ok(())
    }

    // ---- the per-chunk loop ------------------------------------------

    /// Exports one target to completion: fetch, react to the status,
    /// append, flush, persist, until every row of the target is on disk.
    async fn export_target(
        &mut self,
        record: &mut ResumeRecord,
        writer: &mut OutputSink,
        store: Option<&ResumeStore>,
    ) -> Result<(), DownloadError> {
        loop {
            self.state.set_target_progress(
                record.current_target.done_elements,
                record.current_target.total_elements,
            );

            if record.current_target.is_complete() {
                return Ok(());
            }
            if self.stop.load(Ordering::SeqCst) {
                debug!("stop requested; leaving at chunk boundary");
                return Err(DownloadError::Cancelled);
            }

            let started = Instant::now();
            let plan = plan_chunk(
                record.current_target.done_elements,
                record.current_target.total_elements,
                self.chunk_size,
            );
            let mut skip = plan.skip_rows;
            if record.current_target.done_elements > 0 {
                // The header line repeats on every chunk but is only
                // written once, so a resumed chunk discards one more row.
                skip += 1;
            }

            let request = ChunkRequest {
                chunk_index: plan.chunk_index,
                chunk_size: plan.chunk_size,
                output: OutputFormat::Tsv,
            };
            let (body, status) = self.fetch_chunk_with_retry(&request).await?;

            if status != 200 {
                self.state.add_error();
            }
            match status {
                200 => {}
                429 => {
                    debug!("throttled (429); backing off");
                    sleep(self.throttle_delay).await;
                    continue;
                }
                504 => {
                    self.state.add_timeout();
                    self.register_gateway_timeout();
                    sleep(self.throttle_delay).await;
                    continue;
                }
                s if (400..500).contains(&s) => {
                    return Err(DownloadError::from_fatal_status(s));
                }
                s if (500..600).contains(&s) => {
                    debug!(status = s, "server error; backing off");
                    sleep(self.throttle_delay).await;
                    continue;
                }
                s => {
                    warn!(status = s, "unexpected status; retrying chunk");
                    continue;
                }
            }
            self.timeout_strikes = 0;

            let text = String::from_utf8(body)
                .map_err(|e| DownloadError::parse(format!("chunk is not valid UTF-8: {e}")))?;
            let mut lines = text.lines();
            let mut processed: u64 = 0;

            if record.current_target.done_elements == 0 {
                // Every chunk repeats the TSV header as its first line.
                // It reaches the output exactly once, at the very start
                // of the whole job; later targets discard it.
                if let Some(header) = lines.next() {
                    if record.done_elements == 0 {
                        writer.write_line(header).await?;
                    }
                }
            }
            for _ in 0..skip {
                let _ = lines.next();
            }
            for line in lines {
                writer.write_line(line).await?;
                record.current_target.done_elements += 1;
                record.done_elements += 1;
                processed += 1;
            }

            writer.flush().await?;
            if let Some(store) = store {
                store.persist(record)?;
            }

            if processed > 0 {
                let last = started.elapsed().as_secs_f64() / (processed as f64 / 1000.0);
                let smoothed =
                    SPEED_SMOOTHING * last + (1.0 - SPEED_SMOOTHING) * self.state.speed();
                self.state.set_speed(smoothed);
            }

            debug!(
                done = record.current_target.done_elements,
                total = record.current_target.total_elements,
                chunk = plan.chunk_index,
                rows = processed,
                "chunk appended"
            );
        }
    }

    /// One 504 observed; every third consecutive one shrinks the chunk
    /// size for the remainder of the target.
    fn register_gateway_timeout(&mut self) {
        self.timeout_strikes += 1;
        debug!(strikes = self.timeout_strikes, "gateway timeout");
        if self.timeout_strikes >= TIMEOUTS_BEFORE_SHRINK {
            let shrunk = shrink_chunk_size(self.chunk_size);
            if shrunk != self.chunk_size {
                info!(
                    from = self.chunk_size,
                    to = shrunk,
                    "shrinking chunk size after repeated gateway timeouts"
                );
                self.chunk_size = shrunk;
                self.state.set_chunk_size(shrunk);
                self.timeout_strikes = 0;
            }
        }
    }

    /// Fetches one chunk with up to [`FETCH_ATTEMPTS`] transport
    /// attempts spaced [`FETCH_RETRY_DELAY`] apart. HTTP statuses are
    /// not retried here; only transport failures are.
    async fn fetch_chunk_with_retry(
        &self,
        request: &ChunkRequest,
    ) -> Result<(Vec<u8>, u16), DownloadError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.fetch_chunk(request).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    warn!(attempt, error = %error, "chunk fetch failed");
                    if attempt >= FETCH_ATTEMPTS {
                        return Err(match error {
                            DownloadError::Network { source, .. } => {
                                DownloadError::RetriesExhausted {
                                    attempts: attempt,
                                    source,
                                }
                            }
                            other => other,
                        });
                    }
                    self.state.add_error();
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Asks the server for the total row count of the current selector,
    /// retrying transport errors and throttle statuses a bounded number
    /// of times. Fatal statuses map to the same errors as the chunk path.
    async fn probe_total(&self) -> Result<u64, DownloadError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.fetch_total_count().await {
                Ok((body, 200)) => return parse_total_count(&body),
                Ok((_, status)) => {
                    self.state.add_error();
                    match status {
                        429 | 504 => {
                            if attempt >= PROBE_ATTEMPTS {
                                return Err(DownloadError::ProbeFailed { status });
                            }
                            debug!(status, "count probe throttled");
                            sleep(self.probe_throttle_delay).await;
                        }
                        s if (400..500).contains(&s) => {
                            return Err(DownloadError::from_fatal_status(s));
                        }
                        s => {
                            if attempt >= PROBE_ATTEMPTS {
                                return Err(DownloadError::ProbeFailed { status: s });
                            }
                            debug!(status = s, "count probe failed; retrying");
                            sleep(self.probe_throttle_delay).await;
                        }
                    }
                }
                Err(error) => {
                    self.state.add_error();
                    warn!(attempt, error = %error, "count probe transport failure");
                    if attempt >= PROBE_ATTEMPTS {
                        return Err(match error {
                            DownloadError::Network { source, .. } => {
                                DownloadError::RetriesExhausted {
                                    attempts: attempt,
                                    source,
                                }
                            }
                            other => other,
                        });
                    }
                    sleep(self.probe_retry_delay).await;
                }
            }
        }
    }

    fn log_info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.state.push_log(LogLevel::Info, message);
    }

    fn log_warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.state.push_log(LogLevel::Warning, message);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink_from_max_drops_to_seven_thousand() {
        assert_eq!(shrink_chunk_size(10_000), 7_000);
    }

    #[test]
    fn test_shrink_steps_down_by_one_thousand() {
        assert_eq!(shrink_chunk_size(7_000), 6_000);
        assert_eq!(shrink_chunk_size(2_000), 1_000);
    }

    #[test]
    fn test_shrink_stops_at_floor() {
        assert_eq!(shrink_chunk_size(1_000), 1_000);
        assert_eq!(shrink_chunk_size(500), 500);
    }

    #[test]
    fn test_shrink_clamps_between_floor_and_step() {
        assert_eq!(shrink_chunk_size(1_500), 1_000);
    }

    #[test]
    fn test_shrink_is_monotonic_from_max() {
        let mut size = MAX_CHUNK_SIZE;
        let mut seen = vec![size];
        loop {
            let next = shrink_chunk_size(size);
            if next == size {
                break;
            }
            assert!(next < size);
            seen.push(next);
            size = next;
        }
        assert_eq!(
            seen,
            vec![10_000, 7_000, 6_000, 5_000, 4_000, 3_000, 2_000, 1_000]
        );
    }

    #[test]
    fn test_configure_rejects_oversized_chunks() {
        let selector = CrawlSelector {
            username: "u".into(),
            password: "p".into(),
            crawl_id: 1,
            mode: Mode::Pages,
            deep: true,
            filter: String::new(),
            order: String::new(),
        };
        let options = EngineOptions {
            chunk_size: 20_000,
            ..EngineOptions::default()
        };
        assert!(DownloadEngine::configure(selector, options).is_err());
    }

    #[test]
    fn test_configure_rejects_targets_to_stdout() {
        let selector = CrawlSelector {
            username: "u".into(),
            password: "p".into(),
            crawl_id: 1,
            mode: Mode::Links,
            deep: true,
            filter: String::new(),
            order: String::new(),
        };
        let options = EngineOptions {
            targets: Some(TargetsSpec::SelfTargets),
            ..EngineOptions::default()
        };
        assert!(DownloadEngine::configure(selector, options).is_err());
    }

    #[test]
    fn test_configure_defaults_chunk_size() {
        let selector = CrawlSelector {
            username: "u".into(),
            password: "p".into(),
            crawl_id: 1,
            mode: Mode::Pages,
            deep: true,
            filter: String::new(),
            order: String::new(),
        };
        let engine = DownloadEngine::configure(selector, EngineOptions::default()).unwrap();
        assert_eq!(engine.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
