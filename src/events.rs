//! Events emitted to the consumer of an upload session

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    FileProgress {
        local_path: PathBuf,
        percent: f64,
    },
    FileCompleted {
        local_path: PathBuf,
        success: bool,
        message: String,
        /// Bytes per second over the whole task, retries included.
        speed: f64,
    },
    OverallProgress {
        transferred_bytes: u64,
        total_bytes: u64,
        percent: f64,
    },
    Speed {
        bytes_per_sec: f64,
        /// Time left for the whole session, when it can be estimated.
        eta_secs: Option<f64>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    SessionCompleted {
        success: bool,
        message: String,
        succeeded: usize,
        failed: usize,
    },
}

impl TransferEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        TransferEvent::Log {
            level,
            message: message.into(),
        }
    }
}

/// Receives session events. Called from worker threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);

    fn log(&self, level: LogLevel, message: &str) {
        self.emit(TransferEvent::log(level, message));
    }
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TransferEvent) {}
}

impl EventSink for Sender<TransferEvent> {
    fn emit(&self, event: TransferEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn channel_sink_delivers() {
        let (tx, rx) = channel();
        tx.log(LogLevel::Warning, "careful");
        tx.emit(TransferEvent::Speed {
            bytes_per_sec: 1.0,
            eta_secs: None,
        });
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], TransferEvent::log(LogLevel::Warning, "careful"));
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = channel::<TransferEvent>();
        drop(rx);
        tx.log(LogLevel::Info, "nobody hears this");
    }

    #[test]
    fn events_serialize_with_tag() {
        let e = TransferEvent::SessionCompleted {
            success: true,
            message: "done".into(),
            succeeded: 3,
            failed: 0,
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event\":\"session_completed\""));
        assert!(json.contains("\"succeeded\":3"));
    }
}
