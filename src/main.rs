//! Skyload - resilient multi-backend file uploader
//!
//! Thin front end over the `skyload` library: resolves configuration, runs
//! one command and maps the outcome to an exit status.

mod cli;
mod display;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::style::{Color, Stylize};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;

use skyload::browse::{check_connection, RemoteBrowser};
use skyload::collector::FileCollector;
use skyload::config::{BackendFactory, Config, UploadSettings};
use skyload::control::SessionControl;
use skyload::events::{EventSink, NullSink, TransferEvent};
use skyload::logger::{Logger, NoopLogger, TextLogger};
use skyload::orchestrator::{Orchestrator, SessionOutcome, SessionSummary};
use skyload::progress::format_bytes;
use skyload::RemoteEntry;

use crate::cli::{Cli, CollectArgs, Command, UploadArgs};
use crate::display::UploadDisplay;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_PARTIAL: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if cli.json {
                println!("{}", serde_json::json!({ "event": "error", "message": format!("{e:#}") }));
            } else {
                eprintln!("{} {:#}", "error:".with(Color::Red).bold(), e);
            }
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let config = Config::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    match &cli.command {
        Command::Upload(args) => upload(cli, &config, args),
        Command::Preview(args) => preview(cli, &config, args),
        Command::Test => test_connection(cli, &config),
        Command::Ls { path } => {
            let mut browser = open_browser(cli, &config)?;
            let entries = browser.list(path.as_deref())?;
            print_entries(cli, &entries)?;
            Ok(EXIT_OK)
        }
        Command::Stat { path } => {
            let mut browser = open_browser(cli, &config)?;
            let entry = browser.info(path)?;
            print_entries(cli, std::slice::from_ref(&entry))?;
            Ok(EXIT_OK)
        }
        Command::Get { remotes, to } => {
            std::fs::create_dir_all(to)
                .with_context(|| format!("creating {}", to.display()))?;
            let mut browser = open_browser(cli, &config)?;
            let (tx, rx) = channel();
            let result = browser.download_many(remotes, to, &tx);
            drop(tx);
            report_events(cli, rx)?;
            Ok(batch_exit(result.succeeded, result.failed))
        }
        Command::Rm { remotes } => {
            let mut browser = open_browser(cli, &config)?;
            let (tx, rx) = channel();
            let result = browser.delete_many(remotes, &tx);
            drop(tx);
            report_events(cli, rx)?;
            Ok(batch_exit(result.succeeded, result.failed))
        }
        Command::Mkdir { path } => {
            let mut browser = open_browser(cli, &config)?;
            let msg = browser.mkdir(path)?;
            emit_result(cli, "mkdir", &msg);
            Ok(EXIT_OK)
        }
    }
}

fn factory(cli: &Cli, config: &Config, bandwidth_limit: u64) -> Result<BackendFactory> {
    let backend = config
        .backend_for(cli.profile.as_deref())
        .context("selecting backend")?;
    Ok(BackendFactory::new(backend, bandwidth_limit)?)
}

fn open_browser(cli: &Cli, config: &Config) -> Result<RemoteBrowser> {
    let factory = factory(cli, config, config.upload.bandwidth_limit)?;
    let target = factory.backend().describe();
    let mut browser = RemoteBrowser::new(Arc::new(factory));
    browser
        .connect()
        .with_context(|| format!("connecting to {target}"))?;
    Ok(browser)
}

fn test_connection(cli: &Cli, config: &Config) -> Result<i32> {
    let factory = factory(cli, config, 0)?;
    let target = factory.backend().describe();
    let greeting = check_connection(&factory).with_context(|| format!("connecting to {target}"))?;
    emit_result(cli, "test", &format!("{target}: {greeting}"));
    Ok(EXIT_OK)
}

fn preview(cli: &Cli, config: &Config, args: &CollectArgs) -> Result<i32> {
    let mut settings = config.upload.clone();
    args.apply(&mut settings);
    let collector = FileCollector::new(&settings.collect_options(), &NullSink);
    let collection = collector.collect(&args.paths, &NullSink);
    let summary = collection.preview();

    if cli.json {
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(EXIT_OK);
    }
    if cli.verbose {
        for task in &collection.tasks {
            println!(
                "  {} -> {} ({})",
                task.local_path.display(),
                task.remote_path,
                format_bytes(task.size)
            );
        }
    }
    println!(
        "{} {} files in {} directories, {}",
        "Would upload".with(Color::Green).bold(),
        summary.files,
        summary.directories,
        format_bytes(summary.total_bytes)
    );
    Ok(EXIT_OK)
}

fn upload(cli: &Cli, config: &Config, args: &UploadArgs) -> Result<i32> {
    let mut settings: UploadSettings = config.upload.clone();
    args.apply(&mut settings);
    let factory = factory(cli, config, settings.bandwidth_limit)?;
    let target = factory.backend().describe();

    let logger: Arc<dyn Logger> = match &cli.log_file {
        Some(path) => Arc::new(
            TextLogger::new(path).with_context(|| format!("opening log file {}", path.display()))?,
        ),
        None => Arc::new(NoopLogger),
    };

    let (tx, rx) = channel();
    let collection =
        FileCollector::new(&settings.collect_options(), &tx).collect(&args.collect.paths, &tx);
    if collection.tasks.is_empty() {
        drop(tx);
        report_events(cli, rx)?;
        emit_result(cli, "upload", "nothing to upload");
        return Ok(EXIT_OK);
    }

    let control = Arc::new(SessionControl::new());
    install_interrupt_handler(Arc::clone(&control))?;

    if !cli.json {
        eprintln!(
            "{} {} files ({}) to {}",
            "Uploading".with(Color::Green).bold(),
            collection.tasks.len(),
            format_bytes(collection.total_bytes()),
            target
        );
    }

    let sink: Arc<dyn EventSink> = Arc::new(tx);
    let orchestrator = Orchestrator::new(Arc::new(factory), settings.upload_options(), sink)
        .with_logger(logger)
        .with_control(control);
    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "event": "session_started", "session_id": orchestrator.session_id() })
        );
    } else if cli.verbose {
        eprintln!("  session {}", orchestrator.session_id());
    }
    let total = collection.total_bytes();
    let tasks = collection.tasks;
    let worker = thread::Builder::new()
        .name("upload-session".to_string())
        .spawn(move || orchestrator.run(&tasks))
        .context("starting upload session")?;

    let mut display = (!cli.json).then(|| UploadDisplay::new(total, cli.verbose));
    // Ends once the session thread drops the orchestrator and its sender
    for event in rx {
        match display.as_mut() {
            Some(d) => d.handle(&event),
            None => print_json(&event)?,
        }
    }
    let summary = worker
        .join()
        .map_err(|_| anyhow!("upload session thread panicked"))?;

    match &display {
        Some(d) => d.finish(&summary),
        None => print_json(&SummaryLine::from(&summary))?,
    }
    Ok(exit_code(summary.outcome))
}

/// First Ctrl-C cancels cooperatively; a second one exits immediately.
fn install_interrupt_handler(control: Arc<SessionControl>) -> Result<()> {
    let interrupted = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted again. Exiting (Ctrl-C)...");
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("\nCanceling after the current transfers. Press Ctrl-C again to exit now.");
        control.cancel();
    })
    .context("installing Ctrl-C handler")
}

fn exit_code(outcome: SessionOutcome) -> i32 {
    match outcome {
        SessionOutcome::Completed => EXIT_OK,
        SessionOutcome::Failed => EXIT_FAILED,
        SessionOutcome::PartialFailure => EXIT_PARTIAL,
        SessionOutcome::Canceled => EXIT_INTERRUPTED,
    }
}

fn batch_exit(succeeded: usize, failed: usize) -> i32 {
    match (succeeded, failed) {
        (_, 0) => EXIT_OK,
        (0, _) => EXIT_FAILED,
        _ => EXIT_PARTIAL,
    }
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    summary: &'a SessionSummary,
    elapsed_secs: f64,
}

impl<'a> From<&'a SessionSummary> for SummaryLine<'a> {
    fn from(summary: &'a SessionSummary) -> Self {
        Self {
            event: "summary",
            summary,
            elapsed_secs: summary.elapsed.as_secs_f64(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn emit_result(cli: &Cli, command: &str, message: &str) {
    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "event": "result", "command": command, "message": message })
        );
    } else {
        println!("{} {}", "ok".with(Color::Green).bold(), message);
    }
}

/// Drains queued events after a synchronous command.
fn report_events(cli: &Cli, rx: Receiver<TransferEvent>) -> Result<()> {
    for event in rx {
        if cli.json {
            print_json(&event)?;
            continue;
        }
        match event {
            TransferEvent::Log { level, message } => println!("  {level}: {message}"),
            TransferEvent::FileCompleted {
                local_path,
                success: false,
                message,
                ..
            } => eprintln!(
                "  {} {}: {}",
                "Failed".with(Color::Red).bold(),
                local_path.display(),
                message
            ),
            _ => {}
        }
    }
    Ok(())
}

fn print_entries(cli: &Cli, entries: &[RemoteEntry]) -> Result<()> {
    if cli.json {
        return print_json(&entries);
    }
    for entry in entries {
        let name = if entry.is_dir() {
            format!("{}/", entry.name).with(Color::Blue).bold().to_string()
        } else {
            entry.name.clone()
        };
        println!(
            "{:>10}  {:<16}  {}",
            if entry.is_dir() {
                "-".to_string()
            } else {
                format_bytes(entry.size)
            },
            entry.modified.as_deref().unwrap_or(""),
            name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_map_to_exit_codes() {
        assert_eq!(exit_code(SessionOutcome::Completed), 0);
        assert_eq!(exit_code(SessionOutcome::Failed), 1);
        assert_eq!(exit_code(SessionOutcome::PartialFailure), 2);
        assert_eq!(exit_code(SessionOutcome::Canceled), 130);
    }

    #[test]
    fn batch_results_map_to_exit_codes() {
        assert_eq!(batch_exit(3, 0), EXIT_OK);
        assert_eq!(batch_exit(0, 0), EXIT_OK);
        assert_eq!(batch_exit(0, 2), EXIT_FAILED);
        assert_eq!(batch_exit(1, 1), EXIT_PARTIAL);
    }
}
