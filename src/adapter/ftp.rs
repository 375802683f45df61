//! FTP backend (plain FTP, binary mode)

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};

use super::{remote_name, remote_parent, remote_prefixes, EntryKind, ProgressFn, RemoteEntry, Uploader};
use crate::error::{AdapterError, AdapterResult};
use crate::throttle::{self, SharedThrottle, ThrottledReader};

pub struct FtpUploader {
    host: String,
    port: u16,
    username: String,
    password: String,
    throttle: SharedThrottle,
    stream: Option<FtpStream>,
    /// Working directory right after login; relative paths resolve against it.
    home: String,
}

impl FtpUploader {
    pub fn new(host: &str, port: u16, username: &str, password: &str, bandwidth_limit: u64) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            throttle: throttle::shared(bandwidth_limit),
            stream: None,
            home: "/".to_string(),
        }
    }

    fn stream(&mut self) -> AdapterResult<&mut FtpStream> {
        self.stream.as_mut().ok_or_else(AdapterError::not_connected)
    }

    fn go_home(&mut self) {
        let home = self.home.clone();
        if let Some(ftp) = self.stream.as_mut() {
            let _ = ftp.cwd(&home);
        }
    }

    /// Creates every missing component of `dir`, like `mkdir -p`.
    ///
    /// A successful `CWD` check moves the server side working directory, so
    /// every prefix is made absolute first.
    fn ensure_directory(&mut self, dir: &str) -> AdapterResult<()> {
        let target = anchored(&self.home, dir);
        let result = (|| -> AdapterResult<_> {
            let ftp = self.stream()?;
            for prefix in remote_prefixes(&target) {
                if ftp.cwd(&prefix).is_err() {
                    ftp.mkdir(&prefix).map_err(|e| {
                        AdapterError::protocol(format!("Failed to create directory {prefix}: {e}"))
                    })?;
                }
            }
            Ok(())
        })();
        self.go_home();
        result
    }
}

/// Anchors a relative remote path at the login directory.
fn anchored(home: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", home.trim_end_matches('/'), path)
    }
}

/// Parses one line of a unix style `LIST` reply.
pub(crate) fn parse_list_line(line: &str, dir: &str) -> Option<RemoteEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 9 {
        return None;
    }
    let permissions = parts[0];
    let mut name = parts[8..].join(" ");
    if permissions.starts_with('l') {
        if let Some(idx) = name.find(" -> ") {
            name.truncate(idx);
        }
    }
    if name == "." || name == ".." {
        return None;
    }
    let is_directory = permissions.starts_with('d');
    Some(RemoteEntry {
        full_path: format!("{}/{}", dir.trim_end_matches('/'), name),
        name,
        kind: if is_directory {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        size: if is_directory {
            0
        } else {
            parts[4].parse().unwrap_or(0)
        },
        modified: Some(parts[5..8].join(" ")),
        permissions: Some(permissions.to_string()),
    })
}

impl Uploader for FtpUploader {
    fn backend(&self) -> &'static str {
        "FTP"
    }

    fn connect(&mut self) -> AdapterResult<String> {
        let mut ftp = FtpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| AdapterError::connection(format!("Connection failed: {e}")))?;
        ftp.login(self.username.as_str(), self.password.as_str())
            .map_err(|e| AdapterError::connection(format!("Connection failed: {e}")))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| AdapterError::connection(format!("Connection failed: {e}")))?;
        self.home = ftp.pwd().unwrap_or_else(|_| "/".to_string());
        self.stream = Some(ftp);
        Ok("Connected successfully".to_string())
    }

    fn disconnect(&mut self) {
        if let Some(mut ftp) = self.stream.take() {
            let _ = ftp.quit();
        }
    }

    fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        self.stream()?;
        if let Some(parent) = remote_parent(remote) {
            self.ensure_directory(parent)?;
        }
        let file = File::open(local).map_err(|e| AdapterError::io("Upload failed", e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut reader = ThrottledReader::new(BufReader::new(file), self.throttle.clone(), size)
            .with_progress(progress);
        let target = anchored(&self.home, remote);
        let ftp = self.stream()?;
        ftp.put_file(&target, &mut reader)
            .map_err(|e| AdapterError::protocol(format!("Upload failed: {e}")))?;
        Ok("File uploaded successfully".to_string())
    }

    fn list_directory(&mut self, remote: &str) -> AdapterResult<Vec<RemoteEntry>> {
        let result = (|| -> AdapterResult<_> {
            let ftp = self.stream()?;
            ftp.cwd(remote)
                .map_err(|e| AdapterError::protocol(format!("Cannot open {remote}: {e}")))?;
            let current = ftp.pwd().unwrap_or_else(|_| remote.to_string());
            let lines = ftp
                .list(None)
                .map_err(|e| AdapterError::protocol(format!("LIST failed: {e}")))?;
            Ok(lines
                .iter()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| parse_list_line(l, &current))
                .collect())
        })();
        self.go_home();
        result
    }

    fn get_file_info(&mut self, remote: &str) -> AdapterResult<RemoteEntry> {
        let ftp = self.stream()?;
        if let Ok(size) = ftp.size(remote) {
            return Ok(RemoteEntry {
                name: remote_name(remote).to_string(),
                full_path: remote.to_string(),
                kind: EntryKind::File,
                size: size as u64,
                modified: None,
                permissions: None,
            });
        }
        let is_dir = ftp.cwd(remote).is_ok();
        self.go_home();
        if is_dir {
            Ok(RemoteEntry {
                name: remote_name(remote).to_string(),
                full_path: remote.to_string(),
                kind: EntryKind::Directory,
                size: 0,
                modified: None,
                permissions: None,
            })
        } else {
            Err(AdapterError::protocol(format!("{remote}: no such file or directory")))
        }
    }

    fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        let throttle = self.throttle.clone();
        let ftp = self.stream()?;
        let size = ftp.size(remote).map(|s| s as u64).unwrap_or(0);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(local).map_err(|e| AdapterError::io("Download failed", e))?;
        let mut out = BufWriter::new(file);
        ftp.retr(remote, |stream| {
            let mut reader =
                ThrottledReader::new(stream, throttle.clone(), size).with_progress(&mut *progress);
            io::copy(&mut reader, &mut out).map_err(FtpError::ConnectionError)
        })
        .map_err(|e| AdapterError::protocol(format!("Download failed: {e}")))?;
        out.flush()
            .map_err(|e| AdapterError::io("Download failed", e))?;
        if size == 0 {
            // empty files never produce a read
            progress(100.0);
        }
        Ok("File downloaded successfully".to_string())
    }

    fn delete_file(&mut self, remote: &str) -> AdapterResult<String> {
        let ftp = self.stream()?;
        if ftp.size(remote).is_ok() {
            ftp.rm(remote)
                .map_err(|e| AdapterError::protocol(format!("Delete failed: {e}")))?;
            return Ok("File deleted successfully".to_string());
        }
        ftp.rmdir(remote)
            .map_err(|e| AdapterError::protocol(format!("Delete failed: {e}")))?;
        Ok("Directory deleted successfully".to_string())
    }

    fn create_directory(&mut self, remote: &str) -> AdapterResult<String> {
        self.ensure_directory(remote)?;
        Ok("Directory created successfully".to_string())
    }
}
