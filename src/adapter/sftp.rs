//! SFTP backend over libssh2

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::net::TcpStream;
use std::path::Path;

use chrono::{DateTime, Utc};
use ssh2::{FileStat, Session, Sftp};

use super::{remote_name, remote_parent, remote_prefixes, EntryKind, ProgressFn, RemoteEntry, Uploader};
use crate::error::{AdapterError, AdapterResult};
use crate::throttle::{self, SharedThrottle, ThrottledReader};

const DIR_MODE: i32 = 0o755;

pub struct SftpUploader {
    host: String,
    port: u16,
    username: String,
    password: String,
    throttle: SharedThrottle,
    session: Option<Session>,
    sftp: Option<Sftp>,
}

impl SftpUploader {
    pub fn new(host: &str, port: u16, username: &str, password: &str, bandwidth_limit: u64) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            throttle: throttle::shared(bandwidth_limit),
            session: None,
            sftp: None,
        }
    }

    fn sftp(&self) -> AdapterResult<&Sftp> {
        self.sftp.as_ref().ok_or_else(AdapterError::not_connected)
    }

    fn ensure_directory(&self, dir: &str) -> AdapterResult<()> {
        let sftp = self.sftp()?;
        for prefix in remote_prefixes(dir) {
            let path = Path::new(&prefix);
            if sftp.stat(path).is_ok() {
                continue;
            }
            sftp.mkdir(path, DIR_MODE).map_err(|e| {
                AdapterError::protocol(format!("Failed to create directory {prefix}: {e}"))
            })?;
        }
        Ok(())
    }
}

fn entry_from_stat(name: String, full_path: String, stat: &FileStat) -> RemoteEntry {
    let is_dir = stat.is_dir();
    RemoteEntry {
        name,
        full_path,
        kind: if is_dir {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        size: if is_dir { 0 } else { stat.size.unwrap_or(0) },
        modified: stat
            .mtime
            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        permissions: stat.perm.map(|p| format!("{:o}", p & 0o777)),
    }
}

impl Uploader for SftpUploader {
    fn backend(&self) -> &'static str {
        "SFTP"
    }

    fn connect(&mut self) -> AdapterResult<String> {
        let fail = |e: &dyn std::fmt::Display| AdapterError::connection(format!("Connection failed: {e}"));
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).map_err(|e| fail(&e))?;
        let mut session = Session::new().map_err(|e| fail(&e))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| fail(&e))?;
        session
            .userauth_password(&self.username, &self.password)
            .map_err(|e| fail(&e))?;
        if !session.authenticated() {
            return Err(AdapterError::connection("Connection failed: authentication rejected"));
        }
        let sftp = session.sftp().map_err(|e| fail(&e))?;
        self.sftp = Some(sftp);
        self.session = Some(session);
        Ok("Connected successfully".to_string())
    }

    fn disconnect(&mut self) {
        // the channel must close before the session
        self.sftp = None;
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "closing", None);
        }
    }

    fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        self.sftp()?;
        if let Some(parent) = remote_parent(remote) {
            self.ensure_directory(parent)?;
        }
        let src = File::open(local).map_err(|e| AdapterError::io("Upload failed", e))?;
        let size = src.metadata().map(|m| m.len()).unwrap_or(0);
        let mut reader =
            ThrottledReader::new(BufReader::new(src), self.throttle.clone(), size).with_progress(progress);
        let mut remote_file = self
            .sftp()?
            .create(Path::new(remote))
            .map_err(|e| AdapterError::protocol(format!("Upload failed: {e}")))?;
        io::copy(&mut reader, &mut remote_file).map_err(|e| AdapterError::io("Upload failed", e))?;
        Ok("File uploaded successfully".to_string())
    }

    fn list_directory(&mut self, remote: &str) -> AdapterResult<Vec<RemoteEntry>> {
        let sftp = self.sftp()?;
        let listing = sftp
            .readdir(Path::new(remote))
            .map_err(|e| AdapterError::protocol(format!("Cannot list {remote}: {e}")))?;
        let mut items: Vec<RemoteEntry> = listing
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                let full = format!("{}/{}", remote.trim_end_matches('/'), name);
                Some(entry_from_stat(name, full, &stat))
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn get_file_info(&mut self, remote: &str) -> AdapterResult<RemoteEntry> {
        let stat = self
            .sftp()?
            .stat(Path::new(remote))
            .map_err(|e| AdapterError::protocol(format!("{remote}: {e}")))?;
        Ok(entry_from_stat(remote_name(remote).to_string(), remote.to_string(), &stat))
    }

    fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        let sftp = self.sftp()?;
        let size = sftp
            .stat(Path::new(remote))
            .ok()
            .and_then(|s| s.size)
            .unwrap_or(0);
        let remote_file = sftp
            .open(Path::new(remote))
            .map_err(|e| AdapterError::protocol(format!("Download failed: {e}")))?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut reader = ThrottledReader::new(remote_file, self.throttle.clone(), size).with_progress(progress);
        let mut out = BufWriter::new(File::create(local)?);
        io::copy(&mut reader, &mut out).map_err(|e| AdapterError::io("Download failed", e))?;
        Ok("File downloaded successfully".to_string())
    }

    fn delete_file(&mut self, remote: &str) -> AdapterResult<String> {
        let sftp = self.sftp()?;
        let path = Path::new(remote);
        let stat = sftp
            .stat(path)
            .map_err(|e| AdapterError::protocol(format!("Delete failed: {e}")))?;
        if stat.is_dir() {
            sftp.rmdir(path)
                .map_err(|e| AdapterError::protocol(format!("Delete failed: {e}")))?;
            Ok("Directory deleted successfully".to_string())
        } else {
            sftp.unlink(path)
                .map_err(|e| AdapterError::protocol(format!("Delete failed: {e}")))?;
            Ok("File deleted successfully".to_string())
        }
    }

    fn create_directory(&mut self, remote: &str) -> AdapterResult<String> {
        self.ensure_directory(remote)?;
        Ok("Directory created successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_require_connection() {
        let mut up = SftpUploader::new("localhost", 22, "u", "p", 0);
        assert!(up.get_file_info("/x").is_err());
        assert!(up.create_directory("/x/y").is_err());
        up.disconnect();
        up.disconnect();
    }

    #[test]
    fn connect_to_closed_port_is_a_connection_error() {
        let mut up = SftpUploader::new("127.0.0.1", 1, "u", "p", 0);
        let err = up.connect().unwrap_err();
        assert_eq!(err.kind, crate::error::AdapterErrorKind::Connection);
        assert!(err.message.starts_with("Connection failed"));
    }
}
