use super::Lookup;
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub bucket: String,
    pub name: String,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    fn store_name(&self) -> &'static str;

    async fn get_text(&self, blob: &BlobRef) -> EngineResult<Lookup<String>>;
}

/// Object store over HTTP (`{base_url}/{bucket}/{name}`), e.g. public GCS buckets.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    retries: u32,
}

impl HttpBlobStore {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .blob_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("BLOB_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("BLOB_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build blob store http client")?;

        Ok(Self {
            http,
            base_url,
            auth_token: settings.blob_auth_token.clone(),
            retries: retries.max(1),
        })
    }

    fn url(&self, blob: &BlobRef) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            blob.bucket.trim_matches('/'),
            blob.name.trim_start_matches('/')
        )
    }

    fn headers(&self) -> EngineResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| EngineError::unavailable("blob", format!("invalid auth token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, blob: &BlobRef) -> Result<Lookup<String>, FetchError> {
        let headers = self.headers().map_err(FetchError::permanent)?;
        let res = self
            .http
            .get(self.url(blob))
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                FetchError::transient(EngineError::unavailable(
                    "blob",
                    format!("GET {blob} failed: {e}"),
                ))
            })?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Lookup::NotFound);
        }
        if !status.is_success() {
            let error = EngineError::unavailable("blob", format!("GET {blob}: HTTP {status}"));
            return Err(if is_retryable(status) {
                FetchError::transient(error)
            } else {
                FetchError::permanent(error)
            });
        }

        let text = res.text().await.map_err(|e| {
            FetchError::transient(EngineError::unavailable(
                "blob",
                format!("failed to read {blob} body: {e}"),
            ))
        })?;
        Ok(Lookup::Found(text))
    }
}

struct FetchError {
    error: EngineError,
    retryable: bool,
}

impl FetchError {
    fn transient(error: EngineError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn permanent(error: EngineError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// Server-side and throttling answers are worth another attempt; other 4xx are not.
fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// 1s, 2s, 4s, ... capped at 2^MAX_BACKOFF_EXPONENT seconds.
fn backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_secs(1 << exponent)
}

#[async_trait::async_trait]
impl BlobStore for HttpBlobStore {
    fn store_name(&self) -> &'static str {
        "http"
    }

    async fn get_text(&self, blob: &BlobRef) -> EngineResult<Lookup<String>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(blob).await {
                Ok(found) => return Ok(found),
                Err(FetchError { error, retryable }) => {
                    if !retryable || attempt >= self.retries {
                        return Err(error);
                    }
                    let delay = backoff(attempt);
                    tracing::warn!(attempt, ?delay, %blob, error = %error, "blob fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Local directory laid out as `{root}/{bucket}/{name}`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, blob: &BlobRef) -> PathBuf {
        self.root.join(&blob.bucket).join(&blob.name)
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    fn store_name(&self) -> &'static str {
        "fs"
    }

    async fn get_text(&self, blob: &BlobRef) -> EngineResult<Lookup<String>> {
        let path = self.path(blob);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Lookup::Found(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Lookup::NotFound),
            Err(e) => Err(EngineError::unavailable(
                "blob",
                format!("read {} failed: {e}", path.display()),
            )),
        }
    }
}

/// In-process store, used by tests and local experiments.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobRef, String>>,
}

impl MemoryBlobStore {
    pub fn put(&self, blob: &BlobRef, text: impl Into<String>) {
        if let Ok(mut guard) = self.blobs.write() {
            guard.insert(blob.clone(), text.into());
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    fn store_name(&self) -> &'static str {
        "memory"
    }

    async fn get_text(&self, blob: &BlobRef) -> EngineResult<Lookup<String>> {
        let guard = self
            .blobs
            .read()
            .map_err(|_| EngineError::unavailable("blob", "memory store lock poisoned"))?;
        Ok(guard.get(blob).cloned().into())
    }
}
