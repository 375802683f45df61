//! Remote browsing over a single long-lived connection
//!
//! Keeps a current directory like a shell session. Listings are sorted
//! directories first, then by case-insensitive name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapter::{remote_name, ConnectionGuard, RemoteEntry, Uploader, UploaderFactory};
use crate::error::{AdapterError, AdapterResult, UploadError};
use crate::events::{EventSink, LogLevel, TransferEvent};

/// Counts from a multi-item operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failed: usize,
}

/// Connects once and immediately disconnects, returning the backend's greeting.
pub fn check_connection(factory: &dyn UploaderFactory) -> Result<String, UploadError> {
    let mut adapter = factory.create()?;
    let result = adapter.connect();
    adapter.disconnect();
    result.map_err(|e| UploadError::Connection(e.message))
}

/// Resolves `path` against `base`, folding `.` and `..`. Always absolute.
pub fn resolve_remote(base: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

pub struct RemoteBrowser {
    factory: Arc<dyn UploaderFactory>,
    connection: Option<ConnectionGuard>,
    current: String,
}

impl RemoteBrowser {
    pub fn new(factory: Arc<dyn UploaderFactory>) -> Self {
        Self {
            factory,
            connection: None,
            current: "/".to_string(),
        }
    }

    pub fn connect(&mut self) -> Result<(), UploadError> {
        self.disconnect();
        self.connection = Some(ConnectionGuard::open(self.factory.as_ref())?);
        self.current = "/".to_string();
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn current_dir(&self) -> &str {
        &self.current
    }

    fn adapter(&mut self) -> AdapterResult<&mut dyn Uploader> {
        self.connection
            .as_mut()
            .map(|c| c.adapter())
            .ok_or_else(AdapterError::not_connected)
    }

    /// Lists `path` (relative to the current directory), or the current directory.
    pub fn list(&mut self, path: Option<&str>) -> AdapterResult<Vec<RemoteEntry>> {
        let target = path.map_or_else(|| self.current.clone(), |p| resolve_remote(&self.current, p));
        let mut items = self.adapter()?.list_directory(&target)?;
        items.sort_by(|a, b| {
            b.is_dir()
                .cmp(&a.is_dir())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(items)
    }

    /// Lists `path` and makes it the current directory if that worked.
    pub fn change_dir(&mut self, path: &str) -> AdapterResult<Vec<RemoteEntry>> {
        let target = resolve_remote(&self.current, path);
        let items = self.list(Some(&target))?;
        self.current = target;
        Ok(items)
    }

    pub fn parent_dir(&mut self) -> AdapterResult<Vec<RemoteEntry>> {
        self.change_dir("..")
    }

    pub fn info(&mut self, path: &str) -> AdapterResult<RemoteEntry> {
        let target = resolve_remote(&self.current, path);
        self.adapter()?.get_file_info(&target)
    }

    /// Downloads one file into `local_dir`, keeping its name. Returns the local path.
    pub fn download(
        &mut self,
        remote: &str,
        local_dir: &Path,
        progress: &mut dyn FnMut(f64),
    ) -> AdapterResult<PathBuf> {
        let target = resolve_remote(&self.current, remote);
        let local = local_dir.join(remote_name(&target));
        self.adapter()?.download_file(&target, &local, progress)?;
        Ok(local)
    }

    pub fn download_many(
        &mut self,
        remotes: &[String],
        local_dir: &Path,
        sink: &dyn EventSink,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        for remote in remotes {
            let local = local_dir.join(remote_name(remote));
            let mut report = |percent: f64| {
                sink.emit(TransferEvent::FileProgress {
                    local_path: local.clone(),
                    percent,
                })
            };
            match self.download(remote, local_dir, &mut report) {
                Ok(path) => {
                    result.succeeded += 1;
                    sink.log(
                        LogLevel::Success,
                        &format!("Downloaded {} to {}", remote, path.display()),
                    );
                    sink.emit(TransferEvent::FileCompleted {
                        local_path: path,
                        success: true,
                        message: "Success".to_string(),
                        speed: 0.0,
                    });
                }
                Err(e) => {
                    result.failed += 1;
                    sink.log(LogLevel::Error, &format!("Failed to download {remote}: {e}"));
                    sink.emit(TransferEvent::FileCompleted {
                        local_path: local,
                        success: false,
                        message: e.message,
                        speed: 0.0,
                    });
                }
            }
        }
        result
    }

    pub fn delete(&mut self, remote: &str) -> AdapterResult<String> {
        let target = resolve_remote(&self.current, remote);
        self.adapter()?.delete_file(&target)
    }

    pub fn delete_many(&mut self, remotes: &[String], sink: &dyn EventSink) -> BatchResult {
        let mut result = BatchResult::default();
        for remote in remotes {
            match self.delete(remote) {
                Ok(msg) => {
                    result.succeeded += 1;
                    sink.log(LogLevel::Success, &format!("{remote}: {msg}"));
                }
                Err(e) => {
                    result.failed += 1;
                    sink.log(LogLevel::Error, &format!("Failed to delete {remote}: {e}"));
                }
            }
        }
        result
    }

    pub fn mkdir(&mut self, remote: &str) -> AdapterResult<String> {
        let target = resolve_remote(&self.current, remote);
        self.adapter()?.create_directory(&target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::local::LocalUploader;
    use crate::error::AdapterErrorKind;
    use crate::events::NullSink;
    use std::fs;
    use std::sync::mpsc::channel;

    fn local_factory(root: &Path) -> Arc<dyn UploaderFactory> {
        let root = root.to_path_buf();
        Arc::new(move || -> Result<Box<dyn Uploader>, UploadError> {
            Ok(Box::new(LocalUploader::new(root.clone(), 0)))
        })
    }

    fn seeded() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("docs/archive")).unwrap();
        fs::write(tmp.path().join("docs/b.txt"), b"bee").unwrap();
        fs::write(tmp.path().join("docs/A.txt"), b"a").unwrap();
        fs::write(tmp.path().join("top.bin"), b"0123").unwrap();
        tmp
    }

    #[test]
    fn resolve_handles_relative_and_dots() {
        assert_eq!(resolve_remote("/", "docs"), "/docs");
        assert_eq!(resolve_remote("/docs", "../top.bin"), "/top.bin");
        assert_eq!(resolve_remote("/docs", "/etc/./x"), "/etc/x");
        assert_eq!(resolve_remote("/", ".."), "/");
        assert_eq!(resolve_remote("/a/b/", "c/"), "/a/b/c");
    }

    #[test]
    fn connection_check_reports_greeting_and_failures() {
        let tmp = seeded();
        assert!(check_connection(local_factory(tmp.path()).as_ref()).is_ok());
        let missing = local_factory(&tmp.path().join("nope"));
        let err = check_connection(missing.as_ref()).unwrap_err();
        assert!(matches!(err, UploadError::Connection(_)));
    }

    #[test]
    fn operations_need_connection() {
        let tmp = seeded();
        let mut browser = RemoteBrowser::new(local_factory(tmp.path()));
        let err = browser.list(None).unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::NotConnected);
    }

    #[test]
    fn navigation_lists_dirs_first() {
        let tmp = seeded();
        let mut browser = RemoteBrowser::new(local_factory(tmp.path()));
        browser.connect().unwrap();

        let items = browser.change_dir("docs").unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["archive", "A.txt", "b.txt"]);
        assert_eq!(browser.current_dir(), "/docs");

        assert!(browser.change_dir("missing").is_err());
        assert_eq!(browser.current_dir(), "/docs");

        let root = browser.parent_dir().unwrap();
        assert_eq!(browser.current_dir(), "/");
        assert_eq!(root.len(), 2);
        assert_eq!(browser.info("top.bin").unwrap().size, 4);
    }

    #[test]
    fn batch_download_and_delete() {
        let tmp = seeded();
        let out = tempfile::tempdir().unwrap();
        let mut browser = RemoteBrowser::new(local_factory(tmp.path()));
        browser.connect().unwrap();

        let (tx, rx) = channel();
        let wanted = vec!["/docs/b.txt".to_string(), "/docs/ghost.txt".to_string()];
        let result = browser.download_many(&wanted, out.path(), &tx);
        assert_eq!(result, BatchResult { succeeded: 1, failed: 1 });
        assert_eq!(fs::read(out.path().join("b.txt")).unwrap(), b"bee");
        let completions = rx
            .try_iter()
            .filter(|e| matches!(e, TransferEvent::FileCompleted { .. }))
            .count();
        assert_eq!(completions, 2);

        browser.mkdir("/docs/new").unwrap();
        let doomed = vec!["/docs/new".to_string(), "/docs/A.txt".to_string()];
        let result = browser.delete_many(&doomed, &NullSink);
        assert_eq!(result.succeeded, 2);
        assert!(!tmp.path().join("docs/A.txt").exists());
    }
}
