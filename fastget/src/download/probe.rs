//! Content probing.
//!
//! Before committing to a plan the downloader asks the origin server how
//! large the resource is and whether it serves byte ranges. A `HEAD`
//! request is tried first; servers that refuse `HEAD` get a one-byte
//! ranged `GET` instead.

use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::error::ProbeError;

/// What the origin server told us about the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContentInfo {
    /// Total length in bytes, if the server advertised it.
    pub total_length: Option<u64>,
    /// Whether the server honors `Range` requests.
    pub supports_ranges: bool,
}

impl ContentInfo {
    /// Whether the content can be split across several workers.
    pub fn can_split(&self) -> bool {
        self.supports_ranges && self.total_length.is_some()
    }
}

/// Probe `url` using the job's headers.
///
/// # Errors
///
/// Returns [`ProbeError`] when the server is unreachable, answers with a
/// non-success status, or sends length headers that cannot be parsed.
pub async fn probe(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
) -> Result<ContentInfo, ProbeError> {
    let response = client
        .head(url.clone())
        .headers(headers.clone())
        .send()
        .await
        .map_err(|e| unreachable(url, e))?;

    let status = response.status();
    debug!(url = %url, status = status.as_u16(), "HEAD probe response");

    if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
        return probe_with_range(client, url, headers).await;
    }

    if !status.is_success() {
        return Err(ProbeError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(ContentInfo {
        total_length: content_length(response.headers())?,
        supports_ranges: accepts_byte_ranges(response.headers()),
    })
}

/// Trial probe: request the first byte and inspect how the server answers.
async fn probe_with_range(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
) -> Result<ContentInfo, ProbeError> {
    let response = client
        .get(url.clone())
        .headers(headers.clone())
        .header(RANGE, "bytes=0-0")
        .send()
        .await
        .map_err(|e| unreachable(url, e))?;

    let status = response.status();
    debug!(url = %url, status = status.as_u16(), "ranged probe response");

    match status {
        StatusCode::PARTIAL_CONTENT => {
            let value = response
                .headers()
                .get(CONTENT_RANGE)
                .ok_or(ProbeError::MalformedHeader {
                    name: "Content-Range",
                    value: String::new(),
                })?;
            let value = header_str(value, "Content-Range")?;
            let range = ContentRange::parse(value).ok_or_else(|| ProbeError::MalformedHeader {
                name: "Content-Range",
                value: value.to_string(),
            })?;
            Ok(ContentInfo {
                total_length: range.total,
                supports_ranges: true,
            })
        }
        s if s.is_success() => Ok(ContentInfo {
            total_length: content_length(response.headers())?,
            supports_ranges: false,
        }),
        s => Err(ProbeError::Status {
            url: url.to_string(),
            status: s.as_u16(),
        }),
    }
}

fn unreachable(url: &Url, e: reqwest::Error) -> ProbeError {
    ProbeError::Unreachable {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn header_str<'a>(
    value: &'a reqwest::header::HeaderValue,
    name: &'static str,
) -> Result<&'a str, ProbeError> {
    value.to_str().map_err(|_| ProbeError::MalformedHeader {
        name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })
}

/// Parse `Content-Length`. Absent means unknown.
fn content_length(headers: &HeaderMap) -> Result<Option<u64>, ProbeError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let text = header_str(value, "Content-Length")?;
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ProbeError::MalformedHeader {
            name: "Content-Length",
            value: text.to_string(),
        })
}

/// Whether `Accept-Ranges` lists the `bytes` unit.
fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}

/// A parsed `Content-Range: bytes start-end/total` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.trim().split_once('-')?;
        let start = start.trim().parse::<u64>().ok()?;
        let end = end.trim().parse::<u64>().ok()?;
        if end < start {
            return None;
        }
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().ok()?),
        };
        Some(Self { start, end, total })
    }
}
