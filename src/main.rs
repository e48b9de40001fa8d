//! CLI entry point: wires the arguments to the engine and renders the
//! progress snapshot stream on stderr.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use audisto_dl::{DownloadEngine, DownloadError, LogLevel, StatusReport};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let render_progress = cli.output.is_some();

    let mut engine = DownloadEngine::configure(cli.selector(), cli.engine_options())?;
    let stop = engine.stop_handle();

    // Progress rendering would corrupt the data stream on stdout, so it
    // only runs when downloading to a file.
    let renderer = if render_progress {
        let (sink, stream) = mpsc::unbounded_channel();
        engine.subscribe_progress(sink);
        Some(tokio::spawn(render_loop(stream)))
    } else {
        None
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nstopping after the current chunk...");
            stop.stop();
        }
    });

    let result = engine.start().await;
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }

    match result {
        Ok(()) => Ok(()),
        Err(DownloadError::Cancelled) => {
            eprintln!("download stopped; run the same command again to resume");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Consumes the snapshot stream: log entries become full lines, the
/// changing counters a single rewritten status line.
async fn render_loop(mut stream: mpsc::UnboundedReceiver<StatusReport>) {
    let mut last_line_len = 0;
    while let Some(report) = stream.recv().await {
        for entry in &report.logs {
            let prefix = match entry.level {
                LogLevel::Info => "",
                LogLevel::Warning => "warning: ",
            };
            eprintln!("\r{:width$}\r{prefix}{}", "", entry.message, width = last_line_len);
            last_line_len = 0;
        }

        let line = status_line(&report);
        eprint!("\r{:width$}\r{line}", "", width = last_line_len);
        last_line_len = line.len();
        let _ = std::io::stderr().flush();
    }
    eprintln!();
}

fn status_line(report: &StatusReport) -> String {
    let mut line = format!(
        "{:5.1}% | ETA {} | Chunk size {} | {} of {} {} | {} timeouts | {} errors",
        report.progress_percentage,
        format_eta(report.eta),
        report.chunk_size,
        report.done_elements,
        report.total_elements,
        report.mode,
        report.timeouts_count,
        report.errors_count,
    );
    if report.targets_mode {
        line.push_str(&format!(
            " | target {} of {}",
            report.current_id_ordinal, report.total_ids
        ));
    }
    line
}

/// Duration rounded to whole seconds; "---" when unknown.
fn format_eta(eta: Duration) -> String {
    if eta.is_zero() {
        return "---".to_string();
    }
    let secs = eta.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}
