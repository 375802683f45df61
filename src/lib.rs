//! Skyload Library
//!
//! Resilient uploads to FTP, SFTP, HTTP and S3 backends: file discovery,
//! bounded concurrent dispatch, per-file retries, bandwidth throttling and
//! aggregated progress.

pub mod adapter;
pub mod browse;
pub mod collector;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod logger;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod throttle;

pub use adapter::{ConnectionGuard, EntryKind, RemoteEntry, Uploader, UploaderFactory};
pub use collector::{CollectOptions, Collection, FileCollector, StructureMode, Task};
pub use config::{BackendConfig, BackendFactory, Config, UploadSettings};
pub use control::SessionControl;
pub use error::{AdapterError, AdapterErrorKind, AdapterResult, UploadError};
pub use events::{EventSink, LogLevel, NullSink, TransferEvent};
pub use orchestrator::{Orchestrator, SessionOutcome, SessionState, SessionSummary, UploadOptions};
