//! HTTP client construction and request helpers.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, RequestBuilder, Url};

use crate::config::DownloadConfig;
use crate::error::{FetchError, FetchResult};

/// Build the shared client used for probing and fetching.
///
/// Only the connect timeout is set on the client; body reads are bounded
/// per read by the worker so large chunks are not cut off by a total
/// request deadline.
pub fn build_client(config: &DownloadConfig) -> FetchResult<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| FetchError::HttpClient(e.to_string()))
}

/// Convert the job's header mapping into a `HeaderMap`.
pub fn header_map(headers: &BTreeMap<String, String>) -> FetchResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| FetchError::InvalidJob(format!("invalid header name: {:?}", key)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::InvalidJob(format!("invalid value for header {}", key)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Format an HTTP `Range` value starting at `start`.
///
/// `end` is inclusive; `None` requests everything from `start` on.
pub fn range_value(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={}-{}", start, end),
        None => format!("bytes={}-", start),
    }
}

/// Build a GET request, optionally scoped to a byte range.
pub fn get(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
    range: Option<String>,
) -> RequestBuilder {
    let request = client.get(url.clone()).headers(headers.clone());
    match range {
        Some(range) => request.header(RANGE, range),
        None => request,
    }
}
