//! Terminal progress for upload sessions
//!
//! Finished files scroll above a fixed bottom area: the overall byte bar and
//! a status line with the file in flight, speed and ETA.

use crossterm::{
    cursor,
    style::{Color, Stylize},
    ExecutableCommand,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use skyload::events::{LogLevel, TransferEvent};
use skyload::orchestrator::{SessionOutcome, SessionSummary};
use skyload::progress::format_bytes;

pub struct UploadDisplay {
    _multi: MultiProgress,
    bar: ProgressBar,
    status: ProgressBar,
    start_time: Instant,
    speed: f64,
    eta: Option<Duration>,
    current: String,
    verbose: bool,
}

impl UploadDisplay {
    pub fn new(total_bytes: u64, verbose: bool) -> Self {
        // Raw mode is left off so Ctrl-C still reaches the handler
        let _ = io::stderr().execute(cursor::Hide);

        let multi = MultiProgress::new();
        let bar = multi.add(ProgressBar::new(total_bytes));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%)")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        Self {
            _multi: multi,
            bar,
            status,
            start_time: Instant::now(),
            speed: 0.0,
            eta: None,
            current: String::new(),
            verbose,
        }
    }

    pub fn handle(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::FileProgress { local_path, percent } => {
                self.current = format!("{} ({:.0}%)", display_name(local_path), percent);
                self.refresh_status();
            }
            TransferEvent::FileCompleted {
                local_path,
                success,
                message,
                speed,
            } => {
                if *success && !self.verbose {
                    return;
                }
                let line = if *success {
                    format!(
                        "  {} {} {}",
                        "Uploaded".with(Color::Green).bold(),
                        local_path.display().to_string().with(Color::Cyan),
                        format!("({})", format_speed(*speed)).with(Color::DarkGrey)
                    )
                } else {
                    format!(
                        "  {} {}: {}",
                        "Failed".with(Color::Red).bold(),
                        local_path.display().to_string().with(Color::Cyan),
                        message
                    )
                };
                self.bar.println(line);
            }
            TransferEvent::OverallProgress {
                transferred_bytes,
                total_bytes,
                ..
            } => {
                self.bar.set_length(*total_bytes);
                self.bar.set_position(*transferred_bytes);
                self.refresh_status();
            }
            TransferEvent::Speed {
                bytes_per_sec,
                eta_secs,
            } => {
                self.speed = *bytes_per_sec;
                self.eta = eta_from_secs(*eta_secs);
                self.refresh_status();
            }
            TransferEvent::Log { level, message } => {
                if let Some(line) = log_line(*level, message, self.verbose) {
                    self.bar.println(line);
                }
            }
            TransferEvent::SessionCompleted { .. } => {}
        }
    }

    fn refresh_status(&self) {
        self.status.set_message(format!(
            "{} {} @ {} ETA {}",
            "Uploading".with(Color::Green).bold(),
            self.current,
            format_speed(self.speed),
            format_eta(self.eta)
        ));
    }

    pub fn finish(&self, summary: &SessionSummary) {
        self.status.finish_and_clear();
        self.bar.abandon();

        let (label, color) = outcome_label(summary.outcome);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        eprintln!(
            "{} {} uploaded, {} failed, {} skipped ({} in {:.1}s) - {}",
            label.with(color).bold(),
            summary.succeeded,
            summary.failed,
            summary.skipped,
            format_bytes(summary.uploaded_bytes),
            elapsed,
            summary.message
        );
        self.cleanup();
    }

    fn cleanup(&self) {
        let _ = io::stderr().execute(cursor::Show);
    }
}

impl Drop for UploadDisplay {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn log_line(level: LogLevel, message: &str, verbose: bool) -> Option<String> {
    let tag = match level {
        LogLevel::Error => "error".with(Color::Red).bold(),
        LogLevel::Warning => "warning".with(Color::Yellow).bold(),
        LogLevel::Success if verbose => "ok".with(Color::Green).bold(),
        LogLevel::Info if verbose => "info".with(Color::Blue).bold(),
        LogLevel::Debug if verbose => "debug".with(Color::DarkGrey),
        _ => return None,
    };
    Some(format!("  {tag}: {message}"))
}

fn eta_from_secs(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec <= 0.0 || !bytes_per_sec.is_finite() {
        return "-- /s".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// `mm:ss`, or `h:mm:ss` past an hour. `--:--` when unknown.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "--:--".to_string();
    };
    let secs = eta.as_secs();
    if secs >= 3600 {
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else {
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

pub fn outcome_label(outcome: SessionOutcome) -> (&'static str, Color) {
    match outcome {
        SessionOutcome::Completed => ("Completed", Color::Green),
        SessionOutcome::PartialFailure => ("Partial", Color::Yellow),
        SessionOutcome::Canceled => ("Canceled", Color::Yellow),
        SessionOutcome::Failed => ("Failed", Color::Red),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(None), "--:--");
        assert_eq!(format_eta(Some(Duration::from_secs(75))), "01:15");
        assert_eq!(format_eta(Some(Duration::from_secs(3725))), "1:02:05");
    }

    #[test]
    fn eta_comes_from_the_session_estimate() {
        let mut display = UploadDisplay::new(1_000, false);
        display.handle(&TransferEvent::Speed {
            bytes_per_sec: 0.0,
            eta_secs: Some(42.0),
        });
        // no measured speed yet, the session still knows how long is left
        assert_eq!(display.eta, Some(Duration::from_secs(42)));
        display.handle(&TransferEvent::Speed {
            bytes_per_sec: 10.0,
            eta_secs: None,
        });
        assert_eq!(display.eta, None);
        assert_eq!(eta_from_secs(Some(f64::INFINITY)), None);
        assert_eq!(eta_from_secs(Some(-1.0)), None);
    }

    #[test]
    fn speed_formats() {
        assert_eq!(format_speed(0.0), "-- /s");
        assert_eq!(format_speed(f64::NAN), "-- /s");
        assert_eq!(format_speed(1536.0), "1.5 KB/s");
    }

    #[test]
    fn quiet_mode_keeps_only_problems() {
        assert!(log_line(LogLevel::Info, "hi", false).is_none());
        assert!(log_line(LogLevel::Success, "ok", false).is_none());
        assert!(log_line(LogLevel::Warning, "careful", false).is_some());
        let line = log_line(LogLevel::Error, "boom", false).unwrap();
        assert!(line.contains("boom"));
        assert!(log_line(LogLevel::Debug, "x", true).is_some());
    }

    #[test]
    fn outcome_colors() {
        assert_eq!(outcome_label(SessionOutcome::Completed).1, Color::Green);
        assert_eq!(outcome_label(SessionOutcome::Failed).0, "Failed");
    }

    #[test]
    fn names_fall_back_to_full_path() {
        assert_eq!(display_name(Path::new("/tmp/a/b.txt")), "b.txt");
        assert_eq!(display_name(Path::new("/")), "/");
    }
}
