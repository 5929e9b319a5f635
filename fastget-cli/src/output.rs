//! Terminal rendering of download events.

use std::collections::HashMap;
use std::time::Duration;

use console::style;
use fastget::download::{DownloadEvent, WorkerOutcomeSummary};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{prefix:>4} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {percent:>3}% @ {bytes_per_sec} ETA {eta} {msg}";
const STREAM_TEMPLATE: &str = "{prefix:>4} {spinner:.cyan} {bytes} @ {bytes_per_sec} {msg}";

/// One progress bar per worker, driven by [`DownloadEvent`]s.
pub struct ProgressView {
    multi: MultiProgress,
    bars: HashMap<usize, ProgressBar>,
    bar_style: ProgressStyle,
    stream_style: ProgressStyle,
}

impl Default for ProgressView {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressView {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
            bars: HashMap::new(),
            bar_style: ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
            stream_style: ProgressStyle::with_template(STREAM_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        }
    }

    pub fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::BeforeStart {
                total_size,
                workers,
                ..
            } => {
                match total_size {
                    Some(size) => println!("File size : {}", HumanBytes(*size)),
                    None => println!("File size : unknown"),
                }
                if *workers == 1 {
                    println!("{}", style("Downloading with a single connection").dim());
                }
            }
            DownloadEvent::WorkerStarted {
                worker,
                assigned_length,
            } => {
                let bar = match assigned_length {
                    Some(len) => {
                        let bar = ProgressBar::new(*len);
                        bar.set_style(self.bar_style.clone());
                        bar
                    }
                    None => {
                        let bar = ProgressBar::new_spinner();
                        bar.set_style(self.stream_style.clone());
                        bar.enable_steady_tick(Duration::from_millis(120));
                        bar
                    }
                };
                bar.set_prefix(format!("#{}", worker + 1));
                self.bars.insert(*worker, self.multi.add(bar));
            }
            DownloadEvent::WorkerProgress {
                worker,
                bytes_so_far,
            } => {
                if let Some(bar) = self.bars.get(worker) {
                    bar.set_position(*bytes_so_far);
                }
            }
            DownloadEvent::WorkerRetry {
                worker,
                attempt,
                reason,
                ..
            } => {
                if let Some(bar) = self.bars.get(worker) {
                    bar.set_message(
                        style(format!("retry {} ({})", attempt, reason))
                            .yellow()
                            .to_string(),
                    );
                }
            }
            DownloadEvent::WorkerFinished { worker, outcome } => {
                if let Some(bar) = self.bars.get(worker) {
                    match outcome {
                        WorkerOutcomeSummary::Completed { .. } => {
                            bar.finish_with_message(style("done").green().to_string())
                        }
                        WorkerOutcomeSummary::Failed { reason } => {
                            bar.abandon_with_message(style(reason).red().to_string())
                        }
                        WorkerOutcomeSummary::Cancelled => {
                            bar.abandon_with_message(style("cancelled").dim().to_string())
                        }
                    }
                }
            }
            DownloadEvent::StateChanged { .. }
            | DownloadEvent::Probed(_)
            | DownloadEvent::Progress { .. } => {}
        }
    }
}

/// Render a duration the way the summary line prints it.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}
