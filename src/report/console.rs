//! Terminal output: live progress lines on stderr and the final summary on
//! stdout.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Mutex;

use colored::{ColoredString, Colorize};

use super::display_mode::DisplayMode;
use super::progress::{ProgressEvent, ProgressReporter};
use super::results::RunReport;
use crate::measurements::{format_bytes, LatencyResult, ThroughputResult};
use crate::scoring::{Rating, RatingLabel};
use crate::session::{Phase, PhaseStatus, Session};

const BAR_WIDTH: usize = 30;

/// Render a fixed-width progress bar for `percent` (0..=100).
pub fn render_bar(percent: f64, width: usize) -> String {
    let fraction = (percent / 100.0).clamp(0.0, 1.0);
    let filled = (fraction * width as f64).round() as usize;

    format!("[{}{}]", "#".repeat(filled), " ".repeat(width - filled))
}

fn metric_unit(phase: Phase) -> &'static str {
    match phase {
        Phase::Download | Phase::Upload => "Mbps",
        Phase::Latency => "ms",
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Download => "Download",
        Phase::Upload => "Upload",
        Phase::Latency => "Latency",
    }
}

#[derive(Debug, Default)]
struct ConsoleState {
    /// Phase and whole percent of the last line drawn.
    last_drawn: Option<(Phase, u32)>,
}

/// Progress observer that draws a single updating line per phase.
#[derive(Debug)]
pub struct ConsoleReporter {
    mode: DisplayMode,
    state: Mutex<ConsoleState>,
}

impl ConsoleReporter {
    pub fn new(mode: DisplayMode) -> Self {
        Self { mode, state: Mutex::new(ConsoleState::default()) }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_progress(&self, event: ProgressEvent) {
        if !self.mode.shows_progress() {
            return;
        }

        let whole = event.progress_percent.floor() as u32;
        if let Ok(mut state) = self.state.lock() {
            if state.last_drawn == Some((event.phase, whole)) {
                return;
            }
            state.last_drawn = Some((event.phase, whole));
        }

        let mut stderr = io::stderr().lock();
        let _ = write!(
            stderr,
            "\r{:<9} {} {:>3}% {:>9.2} {}",
            phase_label(event.phase),
            render_bar(event.progress_percent, BAR_WIDTH),
            whole,
            event.instantaneous_metric,
            metric_unit(event.phase)
        );
        let _ = stderr.flush();
    }

    fn on_phase_status(&self, phase: Phase, status: PhaseStatus) {
        if !self.mode.shows_progress() {
            return;
        }

        match status {
            PhaseStatus::Testing => {
                eprintln!("{} {}...", "Testing".bold().white(), phase);
            }
            PhaseStatus::Completed => eprintln!(" {}", "done".green()),
            PhaseStatus::Error => eprintln!(" {}", "failed".red()),
            PhaseStatus::Ready => {}
        }
    }

    fn on_run_complete(&self, session: &Session, rating: &Rating) {
        if !self.mode.shows_progress() {
            return;
        }
        eprintln!(
            "{} {} ({} failed)",
            "Run complete:".bold().white(),
            rating.label,
            session.failed_phases().len()
        );
    }
}

fn colored_label(label: RatingLabel) -> ColoredString {
    match label {
        RatingLabel::Excellent | RatingLabel::VeryGood => {
            label.as_str().bright_green()
        }
        RatingLabel::Good => label.as_str().bright_cyan(),
        RatingLabel::Fair => label.as_str().yellow(),
        RatingLabel::Poor => label.as_str().red(),
        RatingLabel::Unknown => label.as_str().dimmed(),
    }
}

fn throughput_line(status: PhaseStatus, result: Option<&ThroughputResult>) -> String {
    match (status, result) {
        (PhaseStatus::Completed, Some(r)) => format!(
            "{} ({} in {:.2} s)",
            format!("{:.2} Mbps", r.speed_mbps).bright_cyan(),
            format_bytes(r.bytes_transferred),
            r.duration_seconds
        ),
        _ => status.label().red().to_string(),
    }
}

fn latency_line(status: PhaseStatus, result: Option<&LatencyResult>) -> String {
    match (status, result) {
        (PhaseStatus::Completed, Some(r)) => format!(
            "{} (min {:.2}, max {:.2}, jitter {:.2} ms, loss {:.1}%)",
            format!("{:.2} ms", r.avg_ms).bright_cyan(),
            r.min_ms,
            r.max_ms,
            r.jitter_ms,
            r.packet_loss_percent
        ),
        _ => status.label().red().to_string(),
    }
}

/// Human-readable summary of a run.
pub fn format_summary(report: &RunReport) -> String {
    let session = &report.session;
    let mut out = String::new();

    let server = match &report.server {
        Some(info) => format!("{} ({})", report.server_url, info.hostname),
        None => report.server_url.clone(),
    };
    let _ = writeln!(out, "{} {}", "Server:".bold().white(), server.bright_blue());
    let _ = writeln!(out, "{} {}", "Test size:".bold().white(), session.size);
    let _ = writeln!(
        out,
        "{} {}",
        "Download:".bold().white(),
        throughput_line(session.download_status, session.download.as_ref())
    );
    let _ = writeln!(
        out,
        "{} {}",
        "Upload:".bold().white(),
        throughput_line(session.upload_status, session.upload.as_ref())
    );
    let _ = writeln!(
        out,
        "{} {}",
        "Latency:".bold().white(),
        latency_line(session.latency_status, session.latency.as_ref())
    );
    let _ = writeln!(
        out,
        "{} {} - {}",
        "Rating:".bold().white(),
        colored_label(report.rating.label),
        report.rating.description
    );

    out
}

/// Write the final report in the form `mode` asks for.
pub fn print_report(mode: DisplayMode, report: &RunReport) -> io::Result<()> {
    let mut stdout = io::stdout().lock();

    match mode {
        DisplayMode::Json => {
            let json = report.to_json_pretty().map_err(io::Error::other)?;
            writeln!(stdout, "{}", json)
        }
        DisplayMode::Text | DisplayMode::Silent => {
            write!(stdout, "{}", format_summary(report))
        }
    }
}
