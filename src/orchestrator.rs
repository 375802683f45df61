//! Upload session orchestration
//!
//! Drives a task list through one or more backend connections. Width 1 runs
//! every task in order on the session connection and honors pause. Wider
//! sessions use a rayon pool of exactly `max_threads` workers; each worker
//! owns its own connection and pulls task indices from a shared cursor, so a
//! task is dispatched at most once.

use parking_lot::Mutex;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::{ConnectionGuard, Uploader, UploaderFactory};
use crate::collector::Task;
use crate::control::SessionControl;
use crate::error::UploadError;
use crate::events::{EventSink, LogLevel, TransferEvent};
use crate::logger::{Logger, NoopLogger};
use crate::progress::{format_bytes, ProgressAggregator};
use crate::retry::RetryStrategy;

pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Running,
    Paused,
    Completed,
    PartialFailure,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    PartialFailure,
    Canceled,
    Failed,
}

impl From<SessionOutcome> for SessionState {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::PartialFailure => SessionState::PartialFailure,
            SessionOutcome::Canceled => SessionState::Canceled,
            SessionOutcome::Failed => SessionState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks never attempted because the session was canceled.
    pub skipped: usize,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub message: String,
}

impl SessionSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == SessionOutcome::Completed
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Worker count. 1 selects sequential dispatch.
    pub max_threads: usize,
    pub retry: RetryStrategy,
    pub pause_poll: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_threads: 1,
            retry: RetryStrategy::default(),
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }
}

enum TaskOutcome {
    Uploaded,
    Failed,
    Canceled,
}

#[derive(Default)]
struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record(&self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Uploaded => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Canceled => {}
        }
    }
}

pub struct Orchestrator {
    factory: Arc<dyn UploaderFactory>,
    options: UploadOptions,
    control: Arc<SessionControl>,
    sink: Arc<dyn EventSink>,
    logger: Arc<dyn Logger>,
    progress: Arc<ProgressAggregator>,
    state: Mutex<SessionState>,
    session_id: String,
}

impl Orchestrator {
    pub fn new(
        factory: Arc<dyn UploaderFactory>,
        options: UploadOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            factory,
            options,
            control: Arc::new(SessionControl::new()),
            sink,
            logger: Arc::new(NoopLogger),
            progress: Arc::new(ProgressAggregator::new()),
            state: Mutex::new(SessionState::Idle),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Shares an externally owned control, e.g. one wired to Ctrl-C.
    pub fn with_control(mut self, control: Arc<SessionControl>) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    pub fn progress(&self) -> Arc<ProgressAggregator> {
        Arc::clone(&self.progress)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.sink.log(level, message);
        self.logger.message(level, message);
    }

    /// Runs the whole session. Never panics on adapter failures; the result
    /// always describes what happened.
    pub fn run(&self, tasks: &[Task]) -> SessionSummary {
        let started = Instant::now();
        let width = self.options.max_threads.max(1);
        self.log(
            LogLevel::Info,
            &format!("Starting upload with {width} thread(s)"),
        );

        self.set_state(SessionState::Connecting);
        let session = match ConnectionGuard::open(self.factory.as_ref()) {
            Ok(guard) => guard,
            Err(e) => return self.abort(e, tasks.len(), started),
        };
        self.log(LogLevel::Info, "Connected successfully. Preparing file list...");

        let total = self.compute_total(tasks);
        self.progress.set_total(total);
        self.logger.session_start(&self.session_id, tasks.len(), total);
        self.log(
            LogLevel::Info,
            &format!("Found {} files ({})", tasks.len(), format_bytes(total)),
        );

        self.set_state(SessionState::Running);
        let tally = Tally::default();
        if width == 1 {
            self.dispatch_sequential(session, tasks, &tally);
        } else {
            // workers bring their own connections
            session.close();
            self.dispatch_concurrent(width, tasks, &tally);
        }

        self.finish(tasks.len(), &tally, started)
    }

    /// Sums the sizes of files present right now. Missing files are still attempted.
    fn compute_total(&self, tasks: &[Task]) -> u64 {
        let mut total = 0u64;
        for task in tasks {
            match fs::metadata(&task.local_path) {
                Ok(meta) => total += meta.len(),
                Err(e) => self.log(
                    LogLevel::Warning,
                    &format!("Could not get size of {}: {}", task.local_path.display(), e),
                ),
            }
        }
        total
    }

    fn abort(&self, error: UploadError, task_count: usize, started: Instant) -> SessionSummary {
        let message = match error {
            UploadError::Connection(msg) => msg,
            other => other.to_string(),
        };
        self.log(LogLevel::Error, &message);
        self.set_state(SessionState::Failed);
        self.sink.emit(TransferEvent::SessionCompleted {
            success: false,
            message: message.clone(),
            succeeded: 0,
            failed: 0,
        });
        let elapsed = started.elapsed();
        self.logger
            .done(&self.session_id, 0, 0, elapsed.as_secs_f64());
        SessionSummary {
            outcome: SessionOutcome::Failed,
            succeeded: 0,
            failed: 0,
            skipped: task_count,
            uploaded_bytes: 0,
            total_bytes: 0,
            elapsed,
            message,
        }
    }

    fn finish(&self, task_count: usize, tally: &Tally, started: Instant) -> SessionSummary {
        let succeeded = tally.succeeded.load(Ordering::SeqCst);
        let failed = tally.failed.load(Ordering::SeqCst);
        let (outcome, message) = if self.control.is_canceled() {
            (SessionOutcome::Canceled, "Upload canceled".to_string())
        } else if failed == 0 {
            (
                SessionOutcome::Completed,
                format!("All {task_count} files uploaded successfully"),
            )
        } else {
            (
                SessionOutcome::PartialFailure,
                format!("Upload completed with {failed} errors"),
            )
        };

        self.set_state(outcome.into());
        let level = match outcome {
            SessionOutcome::Completed => LogLevel::Success,
            SessionOutcome::Canceled => LogLevel::Warning,
            _ => LogLevel::Error,
        };
        self.log(level, &message);
        self.sink.emit(TransferEvent::SessionCompleted {
            success: outcome == SessionOutcome::Completed,
            message: message.clone(),
            succeeded,
            failed,
        });
        let elapsed = started.elapsed();
        self.logger
            .done(&self.session_id, succeeded, failed, elapsed.as_secs_f64());

        let snapshot = self.progress.snapshot();
        SessionSummary {
            outcome,
            succeeded,
            failed,
            skipped: task_count.saturating_sub(succeeded + failed),
            uploaded_bytes: snapshot.uploaded_bytes,
            total_bytes: snapshot.total_bytes,
            elapsed,
            message,
        }
    }

    /// Blocks while paused. Returns `false` if canceled while waiting.
    fn wait_while_paused(&self) -> bool {
        if !self.control.is_paused() {
            return !self.control.is_canceled();
        }
        self.set_state(SessionState::Paused);
        self.log(LogLevel::Info, "Upload paused");
        while self.control.is_paused() && !self.control.is_canceled() {
            std::thread::sleep(self.options.pause_poll);
        }
        if self.control.is_canceled() {
            return false;
        }
        self.set_state(SessionState::Running);
        self.log(LogLevel::Info, "Upload resumed");
        true
    }

    fn dispatch_sequential(&self, mut session: ConnectionGuard, tasks: &[Task], tally: &Tally) {
        for (index, task) in tasks.iter().enumerate() {
            if !self.wait_while_paused() {
                break;
            }
            let outcome = self.run_task(index, task, session.adapter());
            tally.record(&outcome);
            if matches!(outcome, TaskOutcome::Canceled) {
                break;
            }
        }
        session.close();
    }

    fn dispatch_concurrent(&self, width: usize, tasks: &[Task], tally: &Tally) {
        if self.control.is_paused() {
            self.log(
                LogLevel::Warning,
                "Pause is only supported with a single thread; ignoring",
            );
        }
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(|i| format!("skyload-worker-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                self.log(LogLevel::Error, &format!("Failed to start worker pool: {e}"));
                tally.failed.fetch_add(tasks.len(), Ordering::SeqCst);
                return;
            }
        };

        let cursor = AtomicUsize::new(0);
        pool.broadcast(|ctx| self.worker(ctx.index(), tasks, &cursor, tally));

        let dispatched = cursor.load(Ordering::SeqCst).min(tasks.len());
        if dispatched < tasks.len() && !self.control.is_canceled() {
            let stranded = tasks.len() - dispatched;
            tally.failed.fetch_add(stranded, Ordering::SeqCst);
            self.log(
                LogLevel::Error,
                &format!("{stranded} files were not attempted: no worker connection available"),
            );
        }
    }

    fn worker(&self, worker: usize, tasks: &[Task], cursor: &AtomicUsize, tally: &Tally) {
        let mut connection = match ConnectionGuard::open(self.factory.as_ref()) {
            Ok(guard) => guard,
            Err(e) => {
                let message = match e {
                    UploadError::Connection(msg) => msg,
                    other => other.to_string(),
                };
                self.log(
                    LogLevel::Error,
                    &format!("Thread connection failed (worker {worker}): {message}"),
                );
                return;
            }
        };
        self.log(LogLevel::Debug, &format!("Worker {worker} connected"));
        loop {
            if self.control.is_canceled() {
                break;
            }
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(task) = tasks.get(index) else {
                break;
            };
            let outcome = self.run_task(index, task, connection.adapter());
            tally.record(&outcome);
            if matches!(outcome, TaskOutcome::Canceled) {
                break;
            }
        }
        connection.close();
    }

    /// Uploads one task with retries. `index` keys the task's in-flight bytes.
    fn run_task(&self, index: usize, task: &Task, adapter: &mut dyn Uploader) -> TaskOutcome {
        let local = &task.local_path;
        let size = fs::metadata(local).map(|m| m.len()).unwrap_or(task.size);
        let task_started = Instant::now();
        self.log(
            LogLevel::Info,
            &format!("Uploading {} to {}", local.display(), task.remote_path),
        );

        let mut attempts = 0u32;
        let mut last_error = String::new();
        loop {
            if attempts > 0 {
                if self.control.is_canceled() {
                    self.progress.clear_in_flight(index);
                    return TaskOutcome::Canceled;
                }
                self.log(
                    LogLevel::Warning,
                    &format!(
                        "Retry {}/{} for {}",
                        attempts,
                        self.options.max_retries,
                        local.display()
                    ),
                );
                if !self.control.sleep_unless_canceled(self.options.retry.delay(attempts)) {
                    self.progress.clear_in_flight(index);
                    return TaskOutcome::Canceled;
                }
            }
            attempts += 1;
            self.progress.clear_in_flight(index);

            let attempt_started = Instant::now();
            let mut on_progress =
                |percent: f64| self.report_progress(index, task, size, percent, attempt_started);
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                adapter.upload_file(local, &task.remote_path, &mut on_progress)
            }));
            match result {
                Ok(Ok(_)) => {
                    let (transferred, total, percent) = self.progress.commit(index, size);
                    self.sink.emit(TransferEvent::OverallProgress {
                        transferred_bytes: transferred,
                        total_bytes: total,
                        percent,
                    });
                    let speed = size as f64 / task_started.elapsed().as_secs_f64().max(1e-6);
                    self.sink.emit(TransferEvent::FileCompleted {
                        local_path: local.clone(),
                        success: true,
                        message: "Success".to_string(),
                        speed,
                    });
                    self.logger.file_done(local, &task.remote_path, size, speed);
                    self.log(
                        LogLevel::Success,
                        &format!(
                            "Successfully uploaded {} ({}/s)",
                            local.display(),
                            format_bytes(speed as u64)
                        ),
                    );
                    return TaskOutcome::Uploaded;
                }
                Ok(Err(e)) => last_error = e.message,
                Err(payload) => {
                    last_error = format!("Upload panicked: {}", panic_message(payload.as_ref()))
                }
            }
            if attempts > self.options.max_retries {
                break;
            }
        }

        self.progress.clear_in_flight(index);
        self.sink.emit(TransferEvent::FileCompleted {
            local_path: local.clone(),
            success: false,
            message: last_error.clone(),
            speed: 0.0,
        });
        self.logger
            .file_failed(local, &task.remote_path, attempts, &last_error);
        let failure = UploadError::Transfer {
            path: local.clone(),
            message: last_error,
        };
        self.log(LogLevel::Error, &failure.to_string());
        TaskOutcome::Failed
    }

    fn report_progress(
        &self,
        index: usize,
        task: &Task,
        size: u64,
        percent: f64,
        attempt_started: Instant,
    ) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let bytes = (size as f64 * percent / 100.0) as u64;
        let (transferred, total, overall) = self.progress.update_in_flight(index, bytes);
        let elapsed = attempt_started.elapsed().as_secs_f64();
        if elapsed > 0.0 && bytes > 0 {
            self.progress.record_speed(bytes as f64 / elapsed);
        }
        self.sink.emit(TransferEvent::FileProgress {
            local_path: task.local_path.clone(),
            percent,
        });
        self.sink.emit(TransferEvent::OverallProgress {
            transferred_bytes: transferred,
            total_bytes: total,
            percent: overall,
        });
        self.sink.emit(TransferEvent::Speed {
            bytes_per_sec: self.progress.smoothed_speed(),
            eta_secs: self.progress.eta().map(|eta| eta.as_secs_f64()),
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
