//! Operator-facing console output for `proctord`: startup stages and the
//! end-of-session summary. Logging stays on `log`; this is for humans at a TTY.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use crate::session::SessionSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let pretty = is_tty && mode != UiMode::Plain;
        Self { pretty }
    }

    /// Mode from the `--ui` flag, TTY detection from stderr.
    pub fn from_flag(flag: &str) -> Self {
        Self::new(UiMode::parse(flag), std::io::stderr().is_terminal())
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Announce a startup stage; completion (with elapsed time) prints when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if !self.pretty {
            eprintln!("==> {}", name);
            return StageGuard::new(name.to_string(), None);
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("{name}…"));
        StageGuard::new(name.to_string(), Some(spinner))
    }

    pub fn summary(&self, summary: &SessionSummary) {
        for line in summary_lines(summary) {
            eprintln!("{line}");
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Mark the stage as failed but non-fatal (e.g. backend unreachable at startup).
    pub fn warn(&mut self) {
        self.failed = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "!" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn summary_lines(summary: &SessionSummary) -> Vec<String> {
    let subject = summary
        .subject_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut lines = vec![
        format!("session summary for subject {subject}"),
        format!("  frames processed   {}", summary.frames_processed),
    ];
    for (kind, count) in &summary.incidents {
        lines.push(format!("  {:<24} {}", kind.as_str(), count));
    }
    lines.push(format!("  suspicion estimate {:.1}", summary.suspicion_estimate));
    lines.push(format!(
        "  reports sent={} failed={} dropped={}",
        summary.dispatch.sent, summary.dispatch.failed, summary.dispatch.dropped
    ));
    if summary.evidence_failures > 0 {
        lines.push(format!("  evidence failures  {}", summary.evidence_failures));
    }
    lines
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
