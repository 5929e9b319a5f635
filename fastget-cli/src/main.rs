//! fastget CLI - parallel file downloads over HTTP(S).
//!
//! Parses arguments, layers configuration, and renders the download
//! engine's events as one progress bar per worker.

mod error;
mod output;
mod target;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use console::style;
use fastget::config::{retry_policy, ConfigFile, DownloadConfig};
use fastget::download::{parse_header_arg, DownloadJob, Downloader};
use fastget::logging::{init_logging, LogOptions};
use fastget::Url;
use tracing::debug;

use crate::error::CliError;
use crate::output::{format_elapsed, ProgressView};

#[derive(Debug, Parser)]
#[command(
    name = "fastget",
    version,
    about = "Ultra-fast parallel file downloads over HTTP(S)"
)]
struct Cli {
    /// URL of the file to download
    url: String,

    /// Number of parallel workers [default: 3]
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Request header as "Key: Value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Output file, or directory to save into
    #[arg(short = 'o', long, default_value = ".")]
    output: PathBuf,

    /// Print debug logs
    #[arg(short = 'd', long)]
    debug: bool,

    /// Abort the download after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Retries per chunk after the first attempt
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Configuration file [default: <config dir>/fastget/config.ini]
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the result as JSON instead of progress bars
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let _log_guard = init_logging(&LogOptions {
        debug: cli.debug,
        file: cli.log_file.clone(),
        no_color: cli.json,
    })?;

    let file_config = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    };
    let config = resolve_config(&cli, &file_config);
    debug!(?config, "Resolved configuration");

    let url = Url::parse(&cli.url)
        .map_err(|e| CliError::Usage(format!("invalid URL {:?}: {}", cli.url, e)))?;
    let output = target::resolve_output(&url, &cli.output);

    let mut job = DownloadJob::new(&cli.url, output)?;
    for raw in &cli.headers {
        let (key, value) = parse_header_arg(raw)?;
        if !cli.json {
            println!("{}: {}", style(&key).bold(), value);
        }
        job = job.with_header(&key, &value)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(download(job, config, cli.json))
}

/// Layer CLI flags over file values over defaults.
fn resolve_config(cli: &Cli, file: &ConfigFile) -> DownloadConfig {
    let mut config = file.apply(DownloadConfig::default());

    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(retries) = cli.retries {
        config = config.with_retry(retry_policy(
            retries,
            file.backoff_initial_ms
                .unwrap_or(fastget::download::retry::DEFAULT_INITIAL_DELAY_MS),
            file.backoff_max_secs
                .unwrap_or(fastget::download::retry::DEFAULT_MAX_DELAY_SECS),
        ));
    }
    if let Some(secs) = cli.timeout {
        config = config.with_job_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    if cli.json {
        config = config.with_progress_interval(None);
    }
    config
}

async fn download(job: DownloadJob, config: DownloadConfig, json: bool) -> Result<(), CliError> {
    let downloader = Downloader::new(config)?;

    if !json {
        println!("Initializing download..");
    }

    let mut handle = downloader.start(job);

    let token = handle.cancellation_token();
    ctrlc::set_handler(move || {
        token.cancel();
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    let mut view = (!json).then(ProgressView::new);
    while let Some(event) = handle.next_event().await {
        if let Some(view) = view.as_mut() {
            view.handle(&event);
        }
    }

    let result = handle.wait().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Download finished in {}. File: {}",
            format_elapsed(result.elapsed),
            result.path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_short_flags() {
        let cli = Cli::try_parse_from([
            "fastget",
            "https://example.com/file.iso",
            "-w",
            "8",
            "-H",
            "Authorization: Basic abc",
            "-H",
            "X-Trace: 1",
            "-o",
            "/tmp",
            "-d",
        ])
        .unwrap();

        assert_eq!(cli.workers, Some(8));
        assert_eq!(cli.headers.len(), 2);
        assert_eq!(cli.output, PathBuf::from("/tmp"));
        assert!(cli.debug);
        assert!(!cli.json);
    }

    #[test]
    fn test_flags_override_file_config() {
        let cli = Cli::try_parse_from([
            "fastget",
            "https://example.com/f",
            "-w",
            "6",
            "--retries",
            "0",
            "--timeout",
            "90",
        ])
        .unwrap();
        let file = ConfigFile {
            workers: Some(2),
            keep_partial: Some(true),
            ..Default::default()
        };

        let config = resolve_config(&cli, &file);
        assert_eq!(config.workers, 6);
        assert_eq!(config.retry.max_attempts(), 1);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(90)));
        assert!(config.keep_partial);
    }

    #[test]
    fn test_defaults_without_flags() {
        let cli = Cli::try_parse_from(["fastget", "https://example.com/f"]).unwrap();
        let config = resolve_config(&cli, &ConfigFile::default());
        assert_eq!(config.workers, 3);
        assert_eq!(cli.output, PathBuf::from("."));
    }
}
