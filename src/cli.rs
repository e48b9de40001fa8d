//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use audisto_dl::download::DEFAULT_CHUNK_SIZE;
use audisto_dl::{CrawlSelector, EngineOptions, Mode, TargetsSpec};

/// Download pages or links data of a crawl as a TSV file.
///
/// An interrupted download is resumed automatically on the next
/// invocation with the same output file; pass --no-resume to start over.
#[derive(Parser, Debug)]
#[command(name = "audisto-dl")]
#[command(author, version, about)]
#[command(after_help = "Examples:
  audisto-dl -u USER -p PASS -c 12345 -o crawl.tsv
  audisto-dl -u USER -p PASS -c 12345 -m links -o links.tsv --no-resume
  audisto-dl -u USER -p PASS -c 12345 -o pages.tsv --targets self")]
pub struct Cli {
    /// API username.
    #[arg(short = 'u', long)]
    pub username: String,

    /// API password.
    #[arg(short = 'p', long)]
    pub password: String,

    /// Crawl ID to export.
    #[arg(short = 'c', long)]
    pub crawl: u64,

    /// What to export: one row per page, or one row per link.
    #[arg(short = 'm', long, value_enum, default_value = "pages")]
    pub mode: ModeArg,

    /// Exclude detailed fields from the export.
    #[arg(long)]
    pub no_details: bool,

    /// Rows requested per chunk (1-10000).
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Output file; omit to stream to stdout (without resume support).
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<String>,

    /// Filter expression forwarded to the API.
    #[arg(short = 'f', long, default_value = "")]
    pub filter: String,

    /// Ordering expression forwarded to the API.
    #[arg(long, default_value = "")]
    pub order: String,

    /// Ignore existing resume state and start from scratch.
    #[arg(long)]
    pub no_resume: bool,

    /// Targets file of page IDs, or "self" to export the links of every
    /// page the crawl downloaded (two-stage).
    #[arg(short = 't', long, value_name = "FILE|self")]
    pub targets: Option<String>,
}

/// Export mode flag values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// One row per crawled page.
    Pages,
    /// One row per link.
    Links,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Pages => Mode::Pages,
            ModeArg::Links => Mode::Links,
        }
    }
}

impl Cli {
    /// The crawl selector described by these arguments.
    #[must_use]
    pub fn selector(&self) -> CrawlSelector {
        CrawlSelector {
            username: self.username.trim().to_string(),
            password: self.password.trim().to_string(),
            crawl_id: self.crawl,
            mode: self.mode.into(),
            deep: !self.no_details,
            filter: self.filter.trim().to_string(),
            order: self.order.trim().to_string(),
        }
    }

    /// The engine options described by these arguments.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        let targets = self.targets.as_deref().map(|t| {
            if t == "self" {
                TargetsSpec::SelfTargets
            } else {
                TargetsSpec::File(PathBuf::from(t))
            }
        });
        EngineOptions {
            chunk_size: self.chunk_size,
            output: self.output.clone(),
            no_resume: self.no_resume,
            targets,
        }
    }
}
