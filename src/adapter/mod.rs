//! Backend adapter contract
//!
//! Every backend implements [`Uploader`]. The orchestrator only ever talks to
//! this trait and never branches on which backend is behind it.

use serde::Serialize;
use std::path::Path;

use crate::error::{AdapterResult, UploadError};

pub mod local;

#[cfg(feature = "ftp")]
pub mod ftp;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "s3")]
mod sigv4;
#[cfg(feature = "sftp")]
pub mod sftp;

/// Progress callback: percent of the current file in `[0, 100]`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One item of a remote listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub full_path: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Backend supplied timestamp, formatted as the backend reports it.
    pub modified: Option<String>,
    pub permissions: Option<String>,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Capability interface of one backend connection.
///
/// Implementations convert every backend failure into an
/// [`AdapterError`](crate::error::AdapterError). `upload_file` and
/// `download_file` call `progress` only from the calling thread.
pub trait Uploader {
    /// Short backend name used in messages (`"FTP"`, `"S3"`, ...).
    fn backend(&self) -> &'static str;

    fn connect(&mut self) -> AdapterResult<String>;

    /// Releases backend resources. Must tolerate being called when not connected.
    fn disconnect(&mut self);

    /// Transfers one file, creating missing remote parent directories.
    fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String>;

    fn list_directory(&mut self, remote: &str) -> AdapterResult<Vec<RemoteEntry>>;

    fn get_file_info(&mut self, remote: &str) -> AdapterResult<RemoteEntry>;

    fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String>;

    fn delete_file(&mut self, remote: &str) -> AdapterResult<String>;

    fn create_directory(&mut self, remote: &str) -> AdapterResult<String>;
}

/// Produces fresh, unconnected adapters. One per worker.
pub trait UploaderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Uploader>, UploadError>;
}

impl<F> UploaderFactory for F
where
    F: Fn() -> Result<Box<dyn Uploader>, UploadError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Uploader>, UploadError> {
        self()
    }
}

/// Owns a connection and disconnects it exactly once, on every exit path.
pub struct ConnectionGuard {
    adapter: Box<dyn Uploader>,
    connected: bool,
}

impl ConnectionGuard {
    /// Creates an adapter from `factory` and connects it. On a failed connect
    /// the adapter is still disconnected before the error is returned.
    pub fn open(factory: &dyn UploaderFactory) -> Result<Self, UploadError> {
        let adapter = factory.create()?;
        let mut guard = ConnectionGuard {
            adapter,
            connected: true,
        };
        match guard.adapter.connect() {
            Ok(_) => Ok(guard),
            // guard drops here and disconnects the half-open adapter
            Err(e) => Err(UploadError::Connection(e.message)),
        }
    }

    pub fn adapter(&mut self) -> &mut dyn Uploader {
        self.adapter.as_mut()
    }

    /// Explicit early disconnect; the drop afterwards is a no-op.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.connected {
            self.connected = false;
            self.adapter.disconnect();
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Parent directory of a `/`-separated remote path, if any.
pub fn remote_parent(remote: &str) -> Option<&str> {
    let trimmed = remote.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let parent = &trimmed[..idx];
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Last component of a `/`-separated remote path.
pub fn remote_name(remote: &str) -> &str {
    let trimmed = remote.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Cumulative prefixes of a remote directory: `a/b/c` yields `a`, `a/b`, `a/b/c`.
/// Absolute paths keep their leading slash.
pub fn remote_prefixes(dir: &str) -> Vec<String> {
    let absolute = dir.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() || absolute {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        connect_ok: bool,
        disconnects: Arc<AtomicUsize>,
    }

    impl Uploader for Recorder {
        fn backend(&self) -> &'static str {
            "recorder"
        }
        fn connect(&mut self) -> AdapterResult<String> {
            if self.connect_ok {
                Ok("ok".into())
            } else {
                Err(AdapterError::connection("refused"))
            }
        }
        fn disconnect(&mut self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        fn upload_file(&mut self, _: &Path, _: &str, _: ProgressFn<'_>) -> AdapterResult<String> {
            Ok(String::new())
        }
        fn list_directory(&mut self, _: &str) -> AdapterResult<Vec<RemoteEntry>> {
            Ok(vec![])
        }
        fn get_file_info(&mut self, _: &str) -> AdapterResult<RemoteEntry> {
            Err(AdapterError::unsupported("get_file_info", "recorder"))
        }
        fn download_file(&mut self, _: &str, _: &Path, _: ProgressFn<'_>) -> AdapterResult<String> {
            Ok(String::new())
        }
        fn delete_file(&mut self, _: &str) -> AdapterResult<String> {
            Ok(String::new())
        }
        fn create_directory(&mut self, _: &str) -> AdapterResult<String> {
            Ok(String::new())
        }
    }

    fn factory(ok: bool, counter: Arc<AtomicUsize>) -> impl UploaderFactory {
        move || -> Result<Box<dyn Uploader>, UploadError> {
            Ok(Box::new(Recorder {
                connect_ok: ok,
                disconnects: Arc::clone(&counter),
            }))
        }
    }

    #[test]
    fn guard_disconnects_once_on_drop_and_close() {
        let count = Arc::new(AtomicUsize::new(0));
        let f = factory(true, Arc::clone(&count));
        {
            let _g = ConnectionGuard::open(&f).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let g = ConnectionGuard::open(&f).unwrap();
        g.close();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_connect_still_disconnects() {
        let count = Arc::new(AtomicUsize::new(0));
        let f = factory(false, Arc::clone(&count));
        let err = ConnectionGuard::open(&f).err().unwrap();
        assert!(matches!(err, UploadError::Connection(ref m) if m == "refused"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_path_helpers() {
        assert_eq!(remote_parent("a/b/c.txt"), Some("a/b"));
        assert_eq!(remote_parent("/a/c.txt"), Some("/a"));
        assert_eq!(remote_parent("/c.txt"), None);
        assert_eq!(remote_parent("c.txt"), None);
        assert_eq!(remote_name("a/b/c.txt"), "c.txt");
        assert_eq!(remote_name("a/dir/"), "dir");
        assert_eq!(remote_prefixes("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert_eq!(remote_prefixes("/srv//up"), vec!["/srv", "/srv/up"]);
    }
}
