//! Local directory backend
//!
//! Treats a directory on the local filesystem (or a mounted share) as the
//! remote root. Remote paths are resolved under that root and may not escape it.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::{remote_name, EntryKind, ProgressFn, RemoteEntry, Uploader};
use crate::error::{AdapterError, AdapterErrorKind, AdapterResult};
use crate::throttle::{self, SharedThrottle, ThrottledReader};

const COPY_BUFFER: usize = 256 * 1024;

pub struct LocalUploader {
    root: PathBuf,
    throttle: SharedThrottle,
    connected: bool,
}

impl LocalUploader {
    pub fn new(root: impl Into<PathBuf>, bandwidth_limit: u64) -> Self {
        Self {
            root: root.into(),
            throttle: throttle::shared(bandwidth_limit),
            connected: false,
        }
    }

    /// Maps a remote path onto the root, rejecting `..` and prefixes.
    fn resolve(&self, remote: &str) -> AdapterResult<PathBuf> {
        let mut out = self.root.clone();
        for comp in Path::new(remote).components() {
            match comp {
                Component::Normal(p) => out.push(p),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(AdapterError::protocol(format!(
                        "invalid remote path: {remote}"
                    )))
                }
            }
        }
        Ok(out)
    }

    fn ensure_connected(&self) -> AdapterResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(AdapterError::not_connected())
        }
    }

    fn entry_for(&self, remote: &str, path: &Path) -> AdapterResult<RemoteEntry> {
        let meta = fs::metadata(path).map_err(|e| AdapterError::io(remote, e))?;
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let modified = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%d %H:%M:%S").to_string());
        Ok(RemoteEntry {
            name: remote_name(remote).to_string(),
            full_path: remote.to_string(),
            kind,
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified,
            permissions: permissions_string(&meta),
        })
    }
}

#[cfg(unix)]
fn permissions_string(meta: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:o}", meta.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permissions_string(meta: &fs::Metadata) -> Option<String> {
    Some(if meta.permissions().readonly() { "r" } else { "rw" }.to_string())
}

/// Streams `reader` into `writer`. Returns bytes copied.
fn pump<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> std::io::Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

impl Uploader for LocalUploader {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn connect(&mut self) -> AdapterResult<String> {
        match fs::metadata(&self.root) {
            Ok(m) if m.is_dir() => {
                self.connected = true;
                Ok(format!("Using local directory {}", self.root.display()))
            }
            Ok(_) => Err(AdapterError::connection(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(AdapterError::connection(format!(
                "Connection failed: {}: {}",
                self.root.display(),
                e
            ))),
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        self.ensure_connected()?;
        let dst = self.resolve(remote)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| AdapterError::io("create directory", e))?;
        }
        let src = File::open(local).map_err(|e| AdapterError::io("open source", e))?;
        let size = src.metadata().map(|m| m.len()).unwrap_or(0);
        let mut reader = ThrottledReader::new(
            BufReader::with_capacity(COPY_BUFFER, src),
            self.throttle.clone(),
            size,
        )
        .with_progress(progress);
        let mut writer = BufWriter::with_capacity(
            COPY_BUFFER,
            File::create(&dst).map_err(|e| AdapterError::io("create destination", e))?,
        );
        pump(&mut reader, &mut writer).map_err(|e| AdapterError::io("Upload failed", e))?;
        Ok("File uploaded successfully".to_string())
    }

    fn list_directory(&mut self, remote: &str) -> AdapterResult<Vec<RemoteEntry>> {
        self.ensure_connected()?;
        let dir = self.resolve(remote)?;
        let mut items = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| AdapterError::io(remote, e))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let full = format!("{}/{}", remote.trim_end_matches('/'), name);
            items.push(self.entry_for(&full, &entry.path())?);
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn get_file_info(&mut self, remote: &str) -> AdapterResult<RemoteEntry> {
        self.ensure_connected()?;
        let path = self.resolve(remote)?;
        self.entry_for(remote, &path)
    }

    fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        self.ensure_connected()?;
        let src_path = self.resolve(remote)?;
        let src = File::open(&src_path).map_err(|e| AdapterError::io("Download failed", e))?;
        let size = src.metadata().map(|m| m.len()).unwrap_or(0);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut reader =
            ThrottledReader::new(BufReader::new(src), self.throttle.clone(), size).with_progress(progress);
        let mut writer = BufWriter::new(File::create(local)?);
        pump(&mut reader, &mut writer).map_err(|e| AdapterError::io("Download failed", e))?;
        Ok("File downloaded successfully".to_string())
    }

    fn delete_file(&mut self, remote: &str) -> AdapterResult<String> {
        self.ensure_connected()?;
        let path = self.resolve(remote)?;
        if path == self.root {
            return Err(AdapterError::new(
                AdapterErrorKind::Protocol,
                "refusing to delete the backend root",
            ));
        }
        let meta = fs::metadata(&path).map_err(|e| AdapterError::io("Delete failed", e))?;
        if meta.is_dir() {
            fs::remove_dir(&path).map_err(|e| AdapterError::io("Delete failed", e))?;
            Ok("Directory deleted successfully".to_string())
        } else {
            fs::remove_file(&path).map_err(|e| AdapterError::io("Delete failed", e))?;
            Ok("File deleted successfully".to_string())
        }
    }

    fn create_directory(&mut self, remote: &str) -> AdapterResult<String> {
        self.ensure_connected()?;
        let path = self.resolve(remote)?;
        fs::create_dir_all(&path).map_err(|e| AdapterError::io("Failed to create directory", e))?;
        Ok("Directory created successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(root: &Path) -> LocalUploader {
        let mut up = LocalUploader::new(root, 0);
        up.connect().unwrap();
        up
    }

    #[test]
    fn connect_requires_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut up = LocalUploader::new(tmp.path().join("missing"), 0);
        let err = up.connect().unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Connection);
    }

    #[test]
    fn operations_fail_when_not_connected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut up = LocalUploader::new(tmp.path(), 0);
        let err = up.list_directory("/").unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::NotConnected);
    }

    #[test]
    fn upload_creates_parents_and_reports_progress() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("data.bin");
        fs::write(&src, vec![1u8; 600_000]).unwrap();

        let mut up = connected(dst_dir.path());
        let mut last = 0.0;
        let mut calls = 0;
        let mut cb = |p: f64| {
            assert!(p >= last);
            last = p;
            calls += 1;
        };
        up.upload_file(&src, "deep/nested/data.bin", &mut cb).unwrap();
        assert_eq!(last, 100.0);
        assert!(calls >= 1);
        let copied = fs::read(dst_dir.path().join("deep/nested/data.bin")).unwrap();
        assert_eq!(copied.len(), 600_000);
    }

    #[test]
    fn browse_roundtrip() {
        let dst_dir = tempfile::tempdir().unwrap();
        let mut up = connected(dst_dir.path());
        up.create_directory("/docs/old").unwrap();
        fs::write(dst_dir.path().join("docs/readme.md"), b"hello").unwrap();

        let items = up.list_directory("/docs").unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["old", "readme.md"]);
        assert!(items[0].is_dir());
        assert_eq!(items[1].size, 5);
        assert_eq!(items[1].full_path, "/docs/readme.md");

        let info = up.get_file_info("docs/readme.md").unwrap();
        assert_eq!(info.kind, EntryKind::File);

        let out = tempfile::tempdir().unwrap();
        let local = out.path().join("copy/readme.md");
        up.download_file("docs/readme.md", &local, &mut |_: f64| {}).unwrap();
        assert_eq!(fs::read(&local).unwrap(), b"hello");

        up.delete_file("docs/readme.md").unwrap();
        up.delete_file("docs/old").unwrap();
        assert!(up.list_directory("docs").unwrap().is_empty());
    }

    #[test]
    fn rejects_escaping_paths() {
        let dst_dir = tempfile::tempdir().unwrap();
        let mut up = connected(dst_dir.path());
        assert!(up.get_file_info("../etc/passwd").is_err());
        assert!(up.delete_file("/").is_err());
    }
}
