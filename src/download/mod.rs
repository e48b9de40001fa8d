//! Resumable, chunked export of crawl data.
//!
//! This module holds the whole download core: the stateless API client,
//! the pure chunk planner, the progress reporter, and the engine that
//! ties them to the resume store and the output file.
//!
//! # Example
//!
//! ```no_run
//! use audisto_dl::download::{CrawlSelector, DownloadEngine, EngineOptions, Mode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let selector = CrawlSelector {
//!     username: "user".into(),
//!     password: "secret".into(),
//!     crawl_id: 12345,
//!     mode: Mode::Pages,
//!     deep: true,
//!     filter: String::new(),
//!     order: String::new(),
//! };
//! let options = EngineOptions {
//!     output: Some("crawl.tsv".into()),
//!     ..EngineOptions::default()
//! };
//! let engine = DownloadEngine::configure(selector, options)?;
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod planner;
mod progress;

pub use client::{
    API_DOMAIN, API_VERSION, ApiClient, ChunkRequest, CrawlSelector, Mode, OutputFormat,
    parse_total_count,
};
pub use constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use engine::{DownloadEngine, EngineOptions, StopHandle, TargetsSpec};
pub use error::{DownloadError, ResumeError};
pub use planner::{ChunkPlan, plan_chunk};
pub use progress::{LogEntry, LogLevel, StatusReport};
