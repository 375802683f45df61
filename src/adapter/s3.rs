//! S3 (and S3 compatible) object storage backend
//!
//! Requests are signed with SigV4. With a custom endpoint the bucket goes into
//! the path (`http://minio:9000/bucket/key`), otherwise virtual hosted style
//! URLs are used. Directories are emulated with `key/` marker objects and
//! `/`-delimited listings.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{Body, Client, Response};
use reqwest::Method;
use serde::Deserialize;

use super::sigv4::{self, Signer, EMPTY_PAYLOAD_HASH, UNSIGNED_PAYLOAD};
use super::{remote_name, EntryKind, ProgressFn, RemoteEntry, Uploader};
use crate::error::{AdapterError, AdapterResult};
use crate::throttle::{self, OwnedThrottledReader, SharedThrottle, ThrottledReader};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct S3Uploader {
    bucket: String,
    region: String,
    endpoint: Option<String>,
    signer: Signer,
    throttle: SharedThrottle,
    client: Option<Client>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ObjectXml>,
    #[serde(default)]
    common_prefixes: Vec<PrefixXml>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectXml {
    key: String,
    #[serde(default)]
    size: u64,
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PrefixXml {
    prefix: String,
}

fn parse_listing(xml: &str) -> AdapterResult<ListBucketResult> {
    quick_xml::de::from_str(xml)
        .map_err(|e| AdapterError::protocol(format!("Malformed listing response: {e}")))
}

/// Object key for a remote path: no leading slash.
fn object_key(remote: &str) -> &str {
    remote.trim_start_matches('/')
}

/// Listing prefix for a remote directory: empty or ending in `/`.
fn directory_prefix(remote: &str) -> String {
    let key = object_key(remote).trim_end_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

/// Turns one listing page into entries, skipping the directory's own marker.
fn entries_from_listing(prefix: &str, listing: ListBucketResult) -> Vec<RemoteEntry> {
    let mut items = Vec::new();
    for p in listing.common_prefixes {
        let name = p.prefix[prefix.len().min(p.prefix.len())..]
            .trim_end_matches('/')
            .to_string();
        if name.is_empty() {
            continue;
        }
        items.push(RemoteEntry {
            name,
            full_path: p.prefix.trim_end_matches('/').to_string(),
            kind: EntryKind::Directory,
            size: 0,
            modified: None,
            permissions: None,
        });
    }
    for obj in listing.contents {
        if obj.key == prefix {
            continue;
        }
        items.push(RemoteEntry {
            name: obj.key[prefix.len().min(obj.key.len())..].to_string(),
            full_path: obj.key,
            kind: EntryKind::File,
            size: obj.size,
            modified: obj.last_modified,
            permissions: None,
        });
    }
    items
}

fn status_error(context: &str, resp: Response) -> AdapterError {
    let status = resp.status();
    let body: String = resp.text().unwrap_or_default().chars().take(200).collect();
    if body.trim().is_empty() {
        AdapterError::protocol(format!(
            "{context}: HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        ))
    } else {
        AdapterError::protocol(format!("{context}: HTTP {}: {}", status.as_u16(), body))
    }
}

impl S3Uploader {
    pub fn new(
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        bandwidth_limit: u64,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            signer: Signer::new(access_key, secret_key, region, "s3"),
            throttle: throttle::shared(bandwidth_limit),
            client: None,
        }
    }

    /// `(scheme, host, canonical uri)` for an object key. An empty key addresses the bucket.
    fn locate(&self, key: &str) -> (String, String, String) {
        match &self.endpoint {
            Some(endpoint) => {
                let (scheme, host) = match endpoint.split_once("://") {
                    Some((s, h)) => (s.to_string(), h.to_string()),
                    None => ("https".to_string(), endpoint.clone()),
                };
                let uri = if key.is_empty() {
                    format!("/{}", sigv4::uri_encode(&self.bucket))
                } else {
                    format!("/{}/{}", sigv4::uri_encode(&self.bucket), sigv4::uri_encode_path(key))
                };
                (scheme, host, uri)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", sigv4::uri_encode_path(key)),
            ),
        }
    }

    fn send(
        &self,
        method: Method,
        key: &str,
        query: &BTreeMap<String, String>,
        payload_hash: &str,
        body: Option<Body>,
    ) -> AdapterResult<Response> {
        let client = self.client.as_ref().ok_or_else(AdapterError::not_connected)?;
        let (scheme, host, uri) = self.locate(key);
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host.clone());
        let signed = self
            .signer
            .sign(method.as_str(), &uri, query, &headers, payload_hash, Utc::now());

        let mut url = format!("{scheme}://{host}{uri}");
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }
        let mut req = client.request(method, url);
        for (name, value) in signed.iter().filter(|(k, _)| k.as_str() != "host") {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            req = req.body(body);
        }
        req.send()
            .map_err(|e| AdapterError::protocol(format!("Request failed: {e}")))
    }

    fn head_object(&self, key: &str) -> AdapterResult<Option<Response>> {
        let resp = self.send(Method::HEAD, key, &BTreeMap::new(), EMPTY_PAYLOAD_HASH, None)?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error("HEAD failed", resp));
        }
        Ok(Some(resp))
    }

    fn list_page(&self, prefix: &str, token: Option<&str>, max_keys: Option<u32>) -> AdapterResult<ListBucketResult> {
        let mut query = BTreeMap::new();
        query.insert("list-type".to_string(), "2".to_string());
        query.insert("delimiter".to_string(), "/".to_string());
        query.insert("prefix".to_string(), prefix.to_string());
        if let Some(token) = token {
            query.insert("continuation-token".to_string(), token.to_string());
        }
        if let Some(max) = max_keys {
            query.insert("max-keys".to_string(), max.to_string());
        }
        let resp = self.send(Method::GET, "", &query, EMPTY_PAYLOAD_HASH, None)?;
        if !resp.status().is_success() {
            return Err(status_error("List failed", resp));
        }
        let text = resp
            .text()
            .map_err(|e| AdapterError::protocol(format!("List failed: {e}")))?;
        parse_listing(&text)
    }

    /// True when anything lives under `prefix` (marker or children).
    fn prefix_exists(&self, prefix: &str) -> AdapterResult<bool> {
        let page = self.list_page(prefix, None, Some(1))?;
        Ok(!page.contents.is_empty() || !page.common_prefixes.is_empty())
    }
}

impl Uploader for S3Uploader {
    fn backend(&self) -> &'static str {
        "S3"
    }

    fn connect(&mut self) -> AdapterResult<String> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Option::<Duration>::None)
            .build()
            .map_err(|e| AdapterError::connection(format!("Connection failed: {e}")))?;
        self.client = Some(client);
        let head = self
            .send(Method::HEAD, "", &BTreeMap::new(), EMPTY_PAYLOAD_HASH, None)
            .map_err(|e| AdapterError::connection(format!("Connection failed: {}", e.message)));
        match head {
            Ok(resp) if resp.status().is_success() => Ok("Connected successfully".to_string()),
            Ok(resp) => {
                self.client = None;
                Err(AdapterError::connection(format!(
                    "Connection failed: bucket {} returned HTTP {}",
                    self.bucket,
                    resp.status().as_u16()
                )))
            }
            Err(e) => {
                self.client = None;
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        self.client = None;
    }

    fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        let file = File::open(local).map_err(|e| AdapterError::io("Upload failed", e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        progress(0.0);
        let body = Body::sized(OwnedThrottledReader::new(file, self.throttle.clone()), size);
        let resp = self.send(
            Method::PUT,
            object_key(remote),
            &BTreeMap::new(),
            UNSIGNED_PAYLOAD,
            Some(body),
        )?;
        if !resp.status().is_success() {
            return Err(status_error("Upload failed", resp));
        }
        progress(100.0);
        Ok("File uploaded successfully".to_string())
    }

    fn list_directory(&mut self, remote: &str) -> AdapterResult<Vec<RemoteEntry>> {
        let prefix = directory_prefix(remote);
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(&prefix, token.as_deref(), None)?;
            let next = if page.is_truncated {
                page.next_continuation_token.clone()
            } else {
                None
            };
            items.extend(entries_from_listing(&prefix, page));
            match next {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        Ok(items)
    }

    fn get_file_info(&mut self, remote: &str) -> AdapterResult<RemoteEntry> {
        let key = object_key(remote);
        if !key.is_empty() && !key.ends_with('/') {
            if let Some(resp) = self.head_object(key)? {
                let headers = resp.headers();
                let size = headers
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let modified = headers
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                return Ok(RemoteEntry {
                    name: remote_name(key).to_string(),
                    full_path: key.to_string(),
                    kind: EntryKind::File,
                    size,
                    modified,
                    permissions: None,
                });
            }
        }
        let prefix = directory_prefix(remote);
        if prefix.is_empty() || self.prefix_exists(&prefix)? {
            return Ok(RemoteEntry {
                name: remote_name(key).to_string(),
                full_path: prefix.trim_end_matches('/').to_string(),
                kind: EntryKind::Directory,
                size: 0,
                modified: None,
                permissions: None,
            });
        }
        Err(AdapterError::protocol(format!("{remote}: no such object")))
    }

    fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> AdapterResult<String> {
        let resp = self.send(Method::GET, object_key(remote), &BTreeMap::new(), EMPTY_PAYLOAD_HASH, None)?;
        if !resp.status().is_success() {
            return Err(status_error("Download failed", resp));
        }
        let total = resp.content_length().unwrap_or(0);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut reader = ThrottledReader::new(resp, self.throttle.clone(), total).with_progress(progress);
        let mut out = BufWriter::new(File::create(local)?);
        io::copy(&mut reader, &mut out).map_err(|e| AdapterError::io("Download failed", e))?;
        Ok("File downloaded successfully".to_string())
    }

    fn delete_file(&mut self, remote: &str) -> AdapterResult<String> {
        let key = object_key(remote);
        let is_file = !key.ends_with('/') && self.head_object(key)?.is_some();
        let (target, message) = if is_file {
            (key.to_string(), "File deleted successfully")
        } else {
            (directory_prefix(remote), "Directory deleted successfully")
        };
        if target.is_empty() {
            return Err(AdapterError::protocol("refusing to delete the bucket root"));
        }
        let resp = self.send(Method::DELETE, &target, &BTreeMap::new(), EMPTY_PAYLOAD_HASH, None)?;
        if !resp.status().is_success() {
            return Err(status_error("Delete failed", resp));
        }
        Ok(message.to_string())
    }

    fn create_directory(&mut self, remote: &str) -> AdapterResult<String> {
        let marker = directory_prefix(remote);
        if marker.is_empty() {
            return Ok("Directory created successfully".to_string());
        }
        let resp = self.send(
            Method::PUT,
            &marker,
            &BTreeMap::new(),
            EMPTY_PAYLOAD_HASH,
            Some(Body::from(Vec::new())),
        )?;
        if !resp.status().is_success() {
            return Err(status_error("Failed to create directory", resp));
        }
        Ok("Directory created successfully".to_string())
    }
}
