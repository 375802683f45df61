//! Configuration file and backend selection
//!
//! Stored as TOML:
//! - Unix: `~/.config/skyload/skyload.toml`
//! - Windows: `%APPDATA%\Skyload\skyload.toml`
//!
//! ```toml
//! [upload]
//! remote_dir = "/incoming"
//! max_threads = 4
//!
//! [backend]
//! protocol = "sftp"
//! host = "files.example.com"
//! username = "deploy"
//!
//! [profiles.archive]
//! protocol = "s3"
//! bucket = "backups"
//! access_key = "..."
//! secret_key = "..."
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::local::LocalUploader;
use crate::adapter::{Uploader, UploaderFactory};
use crate::collector::{CollectOptions, StructureMode};
use crate::error::UploadError;
use crate::orchestrator::{UploadOptions, DEFAULT_PAUSE_POLL};
use crate::retry::RetryStrategy;

/// Upper bound for the automatic worker count.
pub const MAX_AUTO_THREADS: usize = 8;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    pub remote_dir: String,
    pub max_retries: u32,
    pub max_threads: usize, // 0 = auto
    pub bandwidth_limit: u64, // bytes per second per connection, 0 = unlimited
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub include_hidden: bool,
    pub structure: StructureMode,
    pub ignore_patterns: Vec<String>,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            remote_dir: String::new(),
            max_retries: 3,
            max_threads: 1,
            bandwidth_limit: 0,
            retry_delay_ms: 2000,
            exponential_backoff: false,
            include_hidden: false,
            structure: StructureMode::Preserve,
            ignore_patterns: Vec::new(),
        }
    }
}

impl UploadSettings {
    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            ignore_patterns: self.ignore_patterns.clone(),
            include_hidden: self.include_hidden,
            structure: self.structure,
            remote_dir: self.remote_dir.clone(),
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            max_retries: self.max_retries,
            max_threads: effective_threads(self.max_threads),
            retry: RetryStrategy::from_settings(
                Duration::from_millis(self.retry_delay_ms),
                self.exponential_backoff,
            ),
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }
}

/// Resolves a requested worker count; 0 picks `min(cpus, 8)`.
pub fn effective_threads(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().clamp(1, MAX_AUTO_THREADS)
    } else {
        requested
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpAuthKind {
    #[default]
    None,
    Basic,
    /// The token is read from `password`.
    Bearer,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_sftp_port() -> u16 {
    22
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// One backend, tagged by `protocol`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum BackendConfig {
    Ftp {
        host: String,
        #[serde(default = "default_ftp_port")]
        port: u16,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Sftp {
        host: String,
        #[serde(default = "default_sftp_port")]
        port: u16,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Http {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        auth: HttpAuthKind,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    S3 {
        #[serde(default)]
        access_key: String,
        #[serde(default)]
        secret_key: String,
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        /// S3 compatible endpoint (MinIO, R2, ...). Switches to path style URLs.
        #[serde(default)]
        endpoint: Option<String>,
    },
    Local {
        root: PathBuf,
    },
}

fn require(value: &str, what: &str) -> Result<(), UploadError> {
    if value.trim().is_empty() {
        Err(UploadError::config(format!("{what} is required")))
    } else {
        Ok(())
    }
}

impl BackendConfig {
    pub fn protocol(&self) -> &'static str {
        match self {
            BackendConfig::Ftp { .. } => "ftp",
            BackendConfig::Sftp { .. } => "sftp",
            BackendConfig::Http { .. } => "http",
            BackendConfig::S3 { .. } => "s3",
            BackendConfig::Local { .. } => "local",
        }
    }

    /// Rejects configurations that could never connect.
    pub fn validate(&self) -> Result<(), UploadError> {
        match self {
            BackendConfig::Ftp { host, port, .. } | BackendConfig::Sftp { host, port, .. } => {
                require(host, "Host")?;
                if *port == 0 {
                    return Err(UploadError::config("Port must be between 1 and 65535"));
                }
            }
            BackendConfig::Http {
                url,
                auth,
                username,
                password,
                ..
            } => {
                require(url, "URL")?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(UploadError::config(format!(
                        "URL must start with http:// or https://: {url}"
                    )));
                }
                match auth {
                    HttpAuthKind::None => {}
                    HttpAuthKind::Basic => {
                        require(username, "Username for basic auth")?;
                        require(password, "Password for basic auth")?;
                    }
                    HttpAuthKind::Bearer => require(password, "Bearer token (password)")?,
                }
            }
            BackendConfig::S3 {
                access_key,
                secret_key,
                bucket,
                region,
                ..
            } => {
                require(access_key, "Access key")?;
                require(secret_key, "Secret key")?;
                require(bucket, "Bucket name")?;
                require(region, "Region")?;
            }
            BackendConfig::Local { root } => {
                if root.as_os_str().is_empty() {
                    return Err(UploadError::config("Root directory is required"));
                }
            }
        }
        Ok(())
    }

    /// Human readable target without secrets.
    pub fn describe(&self) -> String {
        match self {
            BackendConfig::Ftp {
                host, port, username, ..
            } => format!("ftp://{}@{}:{}", or_anonymous(username), host, port),
            BackendConfig::Sftp {
                host, port, username, ..
            } => format!("sftp://{}@{}:{}", username, host, port),
            BackendConfig::Http { url, method, .. } => format!("{} {}", method.as_str(), url),
            BackendConfig::S3 {
                bucket, endpoint, ..
            } => match endpoint {
                Some(ep) => format!("s3://{bucket} via {ep}"),
                None => format!("s3://{bucket}"),
            },
            BackendConfig::Local { root } => format!("local:{}", root.display()),
        }
    }
}

fn or_anonymous(username: &str) -> &str {
    if username.is_empty() {
        "anonymous"
    } else {
        username
    }
}

/// Builds fresh adapters for one validated backend.
#[derive(Clone, Debug)]
pub struct BackendFactory {
    backend: BackendConfig,
    bandwidth_limit: u64,
}

impl BackendFactory {
    pub fn new(backend: BackendConfig, bandwidth_limit: u64) -> Result<Self, UploadError> {
        backend.validate()?;
        Ok(Self {
            backend,
            bandwidth_limit,
        })
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }
}

#[cfg(not(all(feature = "ftp", feature = "sftp", feature = "http", feature = "s3")))]
fn not_compiled(protocol: &str) -> UploadError {
    UploadError::config(format!(
        "this build of skyload does not include {protocol} support"
    ))
}

impl UploaderFactory for BackendFactory {
    #[allow(unused_variables)]
    fn create(&self) -> Result<Box<dyn Uploader>, UploadError> {
        let limit = self.bandwidth_limit;
        match &self.backend {
            BackendConfig::Local { root } => Ok(Box::new(LocalUploader::new(root.clone(), limit))),
            BackendConfig::Ftp {
                host,
                port,
                username,
                password,
            } => {
                #[cfg(feature = "ftp")]
                {
                    Ok(Box::new(crate::adapter::ftp::FtpUploader::new(
                        host,
                        *port,
                        or_anonymous(username),
                        password,
                        limit,
                    )))
                }
                #[cfg(not(feature = "ftp"))]
                {
                    Err(not_compiled("FTP"))
                }
            }
            BackendConfig::Sftp {
                host,
                port,
                username,
                password,
            } => {
                #[cfg(feature = "sftp")]
                {
                    Ok(Box::new(crate::adapter::sftp::SftpUploader::new(
                        host, *port, username, password, limit,
                    )))
                }
                #[cfg(not(feature = "sftp"))]
                {
                    Err(not_compiled("SFTP"))
                }
            }
            BackendConfig::Http {
                url,
                method,
                auth,
                username,
                password,
                headers,
            } => {
                #[cfg(feature = "http")]
                {
                    use crate::adapter::http::{HttpAuth, HttpUploader};
                    let auth = match auth {
                        HttpAuthKind::None => HttpAuth::None,
                        HttpAuthKind::Basic => HttpAuth::Basic {
                            username: username.clone(),
                            password: password.clone(),
                        },
                        HttpAuthKind::Bearer => HttpAuth::Bearer {
                            token: password.clone(),
                        },
                    };
                    Ok(Box::new(HttpUploader::new(
                        url,
                        *method,
                        auth,
                        headers.clone(),
                        limit,
                    )))
                }
                #[cfg(not(feature = "http"))]
                {
                    Err(not_compiled("HTTP"))
                }
            }
            BackendConfig::S3 {
                access_key,
                secret_key,
                bucket,
                region,
                endpoint,
            } => {
                #[cfg(feature = "s3")]
                {
                    Ok(Box::new(crate::adapter::s3::S3Uploader::new(
                        access_key,
                        secret_key,
                        bucket,
                        region,
                        endpoint.as_deref(),
                        limit,
                    )))
                }
                #[cfg(not(feature = "s3"))]
                {
                    Err(not_compiled("S3"))
                }
            }
        }
    }
}

/// Whole configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub upload: UploadSettings,
    pub backend: Option<BackendConfig>,
    pub profiles: BTreeMap<String, BackendConfig>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, UploadError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let text = std::fs::read_to_string(path).map_err(|e| UploadError::filesystem(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Loads `explicit` (which must exist) or the default file if present.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, UploadError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// The `[backend]` table, or the named profile when one is given.
    pub fn backend_for(&self, profile: Option<&str>) -> Result<BackendConfig, UploadError> {
        match profile {
            Some(name) => self.profiles.get(name).cloned().ok_or_else(|| {
                let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
                UploadError::config(format!(
                    "unknown profile '{name}' (available: {})",
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                ))
            }),
            None => self
                .backend
                .clone()
                .ok_or_else(|| UploadError::config("no [backend] configured")),
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var_os("APPDATA").map(|d| PathBuf::from(d).join("Skyload"))
    }
    #[cfg(not(windows))]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config").join("skyload"))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("skyload.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[upload]
remote_dir = "/incoming"
max_threads = 4
bandwidth_limit = 1048576
exponential_backoff = true
structure = "contents-only"
ignore_patterns = ['\.tmp$', "^node_modules$"]

[backend]
protocol = "sftp"
host = "files.example.com"
username = "deploy"
password = "hunter2"

[profiles.site]
protocol = "http"
url = "https://upload.example.com/api"
method = "PUT"
auth = "bearer"
password = "tok"
headers = { "X-Team" = "web" }

[profiles.scratch]
protocol = "local"
root = "/srv/scratch"
"#;

    #[test]
    fn parses_full_file() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.upload.remote_dir, "/incoming");
        assert_eq!(cfg.upload.max_threads, 4);
        assert_eq!(cfg.upload.max_retries, 3);
        assert_eq!(cfg.upload.retry_delay_ms, 2000);
        assert_eq!(cfg.upload.structure, StructureMode::ContentsOnly);
        assert_eq!(cfg.upload.ignore_patterns.len(), 2);

        match cfg.backend_for(None).unwrap() {
            BackendConfig::Sftp { host, port, .. } => {
                assert_eq!(host, "files.example.com");
                assert_eq!(port, 22);
            }
            other => panic!("unexpected backend {other:?}"),
        }
        match cfg.backend_for(Some("site")).unwrap() {
            BackendConfig::Http {
                method, auth, headers, ..
            } => {
                assert_eq!(method, HttpMethod::Put);
                assert_eq!(auth, HttpAuthKind::Bearer);
                assert_eq!(headers["X-Team"], "web");
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn unknown_profile_lists_available() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        let err = cfg.backend_for(Some("nope")).unwrap_err().to_string();
        assert!(err.contains("scratch, site"), "{err}");
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.upload, UploadSettings::default());
        assert!(cfg.backend_for(None).is_err());
    }

    #[test]
    fn malformed_file_is_a_toml_error() {
        let err = Config::from_toml_str("[backend]\nprotocol = \"gopher\"\n").unwrap_err();
        assert!(matches!(err, UploadError::Toml(_)));
    }

    #[test]
    fn upload_options_map_settings() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        let opts = cfg.upload.upload_options();
        assert_eq!(opts.max_threads, 4);
        assert_eq!(
            opts.retry,
            RetryStrategy::Exponential {
                base: Duration::from_secs(2),
                max: crate::retry::MAX_BACKOFF,
            }
        );
        let collect = cfg.upload.collect_options();
        assert_eq!(collect.remote_dir, "/incoming");
    }

    #[test]
    fn auto_threads_are_bounded() {
        let n = effective_threads(0);
        assert!((1..=MAX_AUTO_THREADS).contains(&n));
        assert_eq!(effective_threads(12), 12);
    }

    #[test]
    fn validation_rejects_missing_fields() {
        let ftp = BackendConfig::Ftp {
            host: " ".into(),
            port: 21,
            username: String::new(),
            password: String::new(),
        };
        assert!(ftp.validate().is_err());

        let http = BackendConfig::Http {
            url: "ftp://wrong".into(),
            method: HttpMethod::Post,
            auth: HttpAuthKind::None,
            username: String::new(),
            password: String::new(),
            headers: BTreeMap::new(),
        };
        assert!(http.validate().is_err());

        let basic = BackendConfig::Http {
            url: "https://ok".into(),
            method: HttpMethod::Post,
            auth: HttpAuthKind::Basic,
            username: "u".into(),
            password: String::new(),
            headers: BTreeMap::new(),
        };
        assert!(basic.validate().is_err());

        let s3 = BackendConfig::S3 {
            access_key: "AK".into(),
            secret_key: "SK".into(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
        };
        let err = s3.validate().unwrap_err().to_string();
        assert!(err.contains("Bucket name is required"), "{err}");

        let local = BackendConfig::Local { root: PathBuf::new() };
        assert!(local.validate().is_err());
        assert!(BackendFactory::new(local, 0).is_err());
    }

    #[test]
    fn describe_hides_secrets() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        let sftp = cfg.backend_for(None).unwrap().describe();
        assert_eq!(sftp, "sftp://deploy@files.example.com:22");
        assert!(!sftp.contains("hunter2"));
        let http = cfg.backend_for(Some("site")).unwrap().describe();
        assert_eq!(http, "PUT https://upload.example.com/api");
    }

    #[test]
    fn factory_builds_local_adapter() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = BackendFactory::new(
            BackendConfig::Local {
                root: tmp.path().to_path_buf(),
            },
            0,
        )
        .unwrap();
        let mut adapter = factory.create().unwrap();
        assert_eq!(adapter.backend(), "local");
        assert!(adapter.connect().is_ok());
    }

    #[test]
    fn load_reports_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, UploadError::Filesystem { .. }));

        let path = tmp.path().join("skyload.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(cfg.profiles.len(), 2);
    }
}
