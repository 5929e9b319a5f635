//! Download job description.
//!
//! A [`DownloadJob`] is the immutable input of a download: target URL,
//! request headers, an optional worker count and output path. Jobs that
//! leave the worker count unset use the downloader's configured default. Headers are
//! forwarded verbatim on every request, the probe included.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;

use crate::error::{FetchError, FetchResult};

/// Default number of parallel workers when neither job nor config sets one.
pub const DEFAULT_WORKERS: usize = 3;

/// Immutable description of one download.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    url: Url,
    headers: BTreeMap<String, String>,
    workers: Option<usize>,
    output: PathBuf,
}

impl DownloadJob {
    /// Create a job for `url` written to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidJob`] if the URL does not parse or is not
    /// http(s), or if the output path is empty.
    pub fn new(url: &str, output: impl Into<PathBuf>) -> FetchResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| FetchError::InvalidJob(format!("invalid URL {:?}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidJob(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let output = output.into();
        if output.as_os_str().is_empty() {
            return Err(FetchError::InvalidJob("output path is empty".to_string()));
        }

        Ok(Self {
            url: parsed,
            headers: BTreeMap::new(),
            workers: None,
            output,
        })
    }

    /// Add a request header. Keys are case-insensitive; a later value
    /// replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidJob`] if the name or value is not a
    /// valid HTTP header.
    pub fn with_header(mut self, key: &str, value: &str) -> FetchResult<Self> {
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|_| FetchError::InvalidJob(format!("invalid header name: {:?}", key)))?;
        HeaderValue::from_str(value.trim())
            .map_err(|_| FetchError::InvalidJob(format!("invalid value for header {}", key)))?;

        self.headers
            .insert(name.as_str().to_string(), value.trim().to_string());
        Ok(self)
    }

    /// Add several request headers.
    pub fn with_headers<I, K, V>(self, headers: I) -> FetchResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .try_fold(self, |job, (k, v)| job.with_header(k.as_ref(), v.as_ref()))
    }

    /// Set the requested number of workers (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers, keyed by lowercase header name.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Requested worker count, if the job sets one.
    pub fn workers(&self) -> Option<usize> {
        self.workers
    }

    /// Output file path.
    pub fn output(&self) -> &Path {
        &self.output
    }
}

/// Parse a `"Key: Value"` header argument.
///
/// Splits at the first colon only, so values such as URLs or timestamps
/// survive intact.
pub fn parse_header_arg(arg: &str) -> FetchResult<(String, String)> {
    let (key, value) = arg.split_once(':').ok_or_else(|| {
        FetchError::InvalidJob(format!("header must have the form 'Key: Value': {:?}", arg))
    })?;

    let key = key.trim();
    if key.is_empty() {
        return Err(FetchError::InvalidJob(format!(
            "header name is empty: {:?}",
            arg
        )));
    }

    Ok((key.to_string(), value.trim().to_string()))
}
