//! HTTP upload endpoint backend
//!
//! Uploads are a single POST (multipart, `file` field) or PUT (raw body)
//! against a fixed URL. The request body is read by the client's own I/O
//! thread, so progress is reported as 0 and 100 only.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Body, Client, RequestBuilder, Response};

use super::{ProgressFn, RemoteEntry, Uploader};
use crate::config::HttpMethod;
use crate::error::{AdapterError, AdapterResult};
use crate::throttle::{self, OwnedThrottledReader, SharedThrottle};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

pub struct HttpUploader {
    url: String,
    method: HttpMethod,
    auth: HttpAuth,
    headers: BTreeMap<String, String>,
    throttle: SharedThrottle,
    client: Option<Client>,
}

impl HttpUploader {
    pub fn new(
        url: &str,
        method: HttpMethod,
        auth: HttpAuth,
        headers: BTreeMap<String, String>,
        bandwidth_limit: u64,
    ) -> Self {
        Self {
            url: url.to_string(),
            method,
            auth,
            headers,
            throttle: throttle::shared(bandwidth_limit),
            client: None,
        }
    }

    /// Applies auth and the configured extra headers.
    fn decorate(&self, mut req: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            HttpAuth::None => {}
            HttpAuth::Basic { username, password } => {
                req = req.basic_auth(username, Some(password));
            }
            HttpAuth::Bearer { token } => {
                req = req.bearer_auth(token);
            }
        }
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req
    }

    fn client(&self) -> AdapterResult<&Client> {
        self.client.as_ref().ok_or_else(AdapterError::not_connected)
    }
}

/// `HTTP 404: Not Found` style message, with up to 200 chars of body.
fn status_error(resp: Response) -> AdapterError {
    let status = resp.status();
    let body: String = resp
        .text()
        .unwrap_or_default()
        .chars()
        .take(ERROR_BODY_LIMIT)
        .collect();
    let detail = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("").to_string()
    } else {
        body
    };
    AdapterError::protocol(format!("HTTP {}: {}", status.as_u16(), detail))
}

impl Uploader for HttpUploader {
    fn backend(&self) -> &'static str {
        "HTTP"
    }

    fn connect(&mut self) -> AdapterResult<String> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Option::<Duration>::None)
            .build()
            .map_err(|e| AdapterError::connection(format!("Connection failed: {e}")))?;
        let resp = self
            .decorate(client.head(&self.url))
            .send()
            .map_err(|e| AdapterError::connection(format!("Connection failed: {e}")))?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(AdapterError::connection(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }
        self.client = Some(client);
        Ok("Connected successfully".to_string())
    }

    fn disconnect(&mut self) {
        self.client = None;
    }

    fn upload_file(
        &mut self,
        local: &Path,
        _remote: &str,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        let client = self.client()?;
        let file = File::open(local).map_err(|e| AdapterError::io("Upload failed", e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let body = OwnedThrottledReader::new(file, self.throttle.clone());
        progress(0.0);

        let req = match self.method {
            HttpMethod::Post => {
                let file_name = local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string());
                let part = multipart::Part::reader_with_length(body, size)
                    .file_name(file_name)
                    .mime_str("application/octet-stream")
                    .map_err(|e| AdapterError::protocol(format!("Upload failed: {e}")))?;
                client
                    .post(&self.url)
                    .multipart(multipart::Form::new().part("file", part))
            }
            HttpMethod::Put => client.put(&self.url).body(Body::sized(body, size)),
        };
        let resp = self
            .decorate(req)
            .send()
            .map_err(|e| AdapterError::protocol(format!("Upload failed: {e}")))?;
        if resp.status().as_u16() >= 300 {
            return Err(status_error(resp));
        }
        progress(100.0);
        Ok("File uploaded successfully".to_string())
    }

    fn list_directory(&mut self, _remote: &str) -> AdapterResult<Vec<RemoteEntry>> {
        Err(AdapterError::unsupported("Directory listing", self.backend()))
    }

    fn get_file_info(&mut self, _remote: &str) -> AdapterResult<RemoteEntry> {
        Err(AdapterError::unsupported("File info", self.backend()))
    }

    fn download_file(
        &mut self,
        _remote: &str,
        _local: &Path,
        _progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        Err(AdapterError::unsupported("Download", self.backend()))
    }

    fn delete_file(&mut self, _remote: &str) -> AdapterResult<String> {
        Err(AdapterError::unsupported("Delete", self.backend()))
    }

    fn create_directory(&mut self, _remote: &str) -> AdapterResult<String> {
        Err(AdapterError::unsupported("Directory creation", self.backend()))
    }
}
