use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::events::LogLevel;

pub trait Logger: Send + Sync {
    fn session_start(&self, _session: &str, _tasks: usize, _total_bytes: u64) {}
    fn file_done(&self, _local: &Path, _remote: &str, _bytes: u64, _speed: f64) {}
    fn file_failed(&self, _local: &Path, _remote: &str, _attempts: u32, _msg: &str) {}
    fn message(&self, _level: LogLevel, _msg: &str) {}
    fn done(&self, _session: &str, _succeeded: usize, _failed: usize, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn session_start(&self, session: &str, tasks: usize, total_bytes: u64) {
        self.line(&format!(
            "START session={session} files={tasks} bytes={total_bytes}"
        ));
    }
    fn file_done(&self, local: &Path, remote: &str, bytes: u64, speed: f64) {
        self.line(&format!(
            "UPLOAD src={} dst={} bytes={} speed={:.0}B/s",
            local.display(),
            remote,
            bytes,
            speed
        ));
    }
    fn file_failed(&self, local: &Path, remote: &str, attempts: u32, msg: &str) {
        self.line(&format!(
            "FAILED src={} dst={} attempts={} msg={}",
            local.display(),
            remote,
            attempts,
            msg
        ));
    }
    fn message(&self, level: LogLevel, msg: &str) {
        self.line(&format!("{level} {msg}"));
    }
    fn done(&self, session: &str, succeeded: usize, failed: usize, seconds: f64) {
        self.line(&format!(
            "DONE session={session} succeeded={succeeded} failed={failed} seconds={seconds:.3}"
        ));
    }
}
