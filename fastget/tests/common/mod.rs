//! In-process origin server for integration tests.
//!
//! Serves one payload at `/file.bin` and can be configured to misbehave:
//! ignore ranges, hide length headers, reject HEAD, fail or abort
//! specific ranges, or stream slowly. Every request is recorded.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31) ^ (i >> 8)) as u8).collect()
}

/// How the origin behaves.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// Answer `Range` requests with 206.
    pub serve_ranges: bool,
    /// Send `Accept-Ranges: bytes`.
    pub advertise_ranges: bool,
    /// Send `Content-Length` (HEAD and GET).
    pub send_content_length: bool,
    /// Answer HEAD with 405.
    pub reject_head: bool,
    /// Reject requests lacking this header with 401.
    pub required_header: Option<(String, String)>,
    /// Range start → (status, times) injected before serving.
    pub fail_ranges: HashMap<u64, (u16, usize)>,
    /// Range start → (bytes sent before abort, times). Trial probes are exempt.
    pub abort_ranges: HashMap<u64, (usize, usize)>,
    /// Stream bodies in pieces of this size with this delay between them.
    pub slow: Option<(usize, Duration)>,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            serve_ranges: true,
            advertise_ranges: true,
            send_content_length: true,
            reject_head: false,
            required_header: None,
            fail_ranges: HashMap::new(),
            abort_ranges: HashMap::new(),
            slow: None,
        }
    }
}

impl OriginConfig {
    /// A server that ignores `Range` and does not advertise support.
    pub fn no_ranges() -> Self {
        Self {
            serve_ranges: false,
            advertise_ranges: false,
            ..Default::default()
        }
    }

    pub fn fail_range(mut self, start: u64, status: u16, times: usize) -> Self {
        self.fail_ranges.insert(start, (status, times));
        self
    }

    pub fn abort_range(mut self, start: u64, after: usize, times: usize) -> Self {
        self.abort_ranges.insert(start, (after, times));
        self
    }

    pub fn slow(mut self, piece: usize, delay: Duration) -> Self {
        self.slow = Some((piece, delay));
        self
    }

    pub fn require_header(mut self, name: &str, value: &str) -> Self {
        self.required_header = Some((name.to_string(), value.to_string()));
        self
    }
}

/// One request as seen by the origin.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub range: Option<String>,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    /// Start offset of the requested range (0 without `Range`).
    pub fn range_start(&self) -> u64 {
        self.range
            .as_deref()
            .and_then(parse_range)
            .map(|(start, _)| start)
            .unwrap_or(0)
    }
}

struct OriginState {
    payload: Bytes,
    config: OriginConfig,
    requests: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<HashMap<u64, (u16, usize)>>,
    aborts: Mutex<HashMap<u64, (usize, usize)>>,
}

/// Running origin server.
pub struct MockOrigin {
    addr: SocketAddr,
    state: Arc<OriginState>,
    task: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn start(payload: Vec<u8>, config: OriginConfig) -> Self {
        let state = Arc::new(OriginState {
            payload: Bytes::from(payload),
            failures: Mutex::new(config.fail_ranges.clone()),
            aborts: Mutex::new(config.abort_ranges.clone()),
            config,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/file.bin", any(serve))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}/file.bin", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::GET)
            .collect()
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    State(origin): State<Arc<OriginState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    origin.requests.lock().push(RecordedRequest {
        method: method.clone(),
        range: range.clone(),
        headers: headers.clone(),
    });

    let config = &origin.config;
    if let Some((name, value)) = &config.required_header {
        let present = headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v == value);
        if !present {
            return status_only(StatusCode::UNAUTHORIZED);
        }
    }

    let total = origin.payload.len() as u64;

    if method == Method::HEAD {
        if config.reject_head {
            return status_only(StatusCode::METHOD_NOT_ALLOWED);
        }
        let mut builder = Response::builder().status(StatusCode::OK);
        if config.send_content_length {
            builder = builder.header(header::CONTENT_LENGTH, total);
        }
        if config.advertise_ranges {
            builder = builder.header(header::ACCEPT_RANGES, "bytes");
        }
        let body = if config.send_content_length {
            Body::empty()
        } else {
            unsized_body(Vec::new())
        };
        return builder.body(body).unwrap();
    }

    if method != Method::GET {
        return status_only(StatusCode::METHOD_NOT_ALLOWED);
    }

    let requested = range.as_deref().and_then(parse_range);
    let start = requested.map(|(s, _)| s).unwrap_or(0);

    {
        let mut failures = origin.failures.lock();
        if let Some((status, times)) = failures.get_mut(&start) {
            if *times > 0 {
                *times -= 1;
                let status = StatusCode::from_u16(*status).unwrap();
                return status_only(status);
            }
        }
    }

    let (status, slice, content_range) = match requested {
        Some((start, end)) if config.serve_ranges => {
            let end = end.unwrap_or(total.saturating_sub(1)).min(total.saturating_sub(1));
            if start >= total {
                return status_only(StatusCode::RANGE_NOT_SATISFIABLE);
            }
            let slice = origin.payload.slice(start as usize..=end as usize);
            let total_text = if config.send_content_length {
                total.to_string()
            } else {
                "*".to_string()
            };
            (
                StatusCode::PARTIAL_CONTENT,
                slice,
                Some(format!("bytes {}-{}/{}", start, end, total_text)),
            )
        }
        _ => (StatusCode::OK, origin.payload.clone(), None),
    };

    // Trial probes (`bytes=0-0`) share start 0 with the first chunk.
    let trial = requested == Some((0, Some(0)));
    let abort_after = if trial {
        None
    } else {
        let mut aborts = origin.aborts.lock();
        match aborts.get_mut(&start) {
            Some((after, times)) if *times > 0 => {
                *times -= 1;
                Some(*after)
            }
            _ => None,
        }
    };

    let mut builder = Response::builder().status(status);
    if config.send_content_length {
        builder = builder.header(header::CONTENT_LENGTH, slice.len());
    }
    if config.advertise_ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if let Some(value) = content_range {
        builder = builder.header(header::CONTENT_RANGE, value);
    }

    builder
        .body(streamed_body(slice, config.slow, abort_after))
        .unwrap()
}

fn status_only(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap()
}

/// Body without a size hint, so no length is derived from it.
fn unsized_body(pieces: Vec<Bytes>) -> Body {
    Body::from_stream(stream::iter(
        pieces.into_iter().map(Ok::<_, io::Error>),
    ))
}

fn streamed_body(data: Bytes, slow: Option<(usize, Duration)>, abort_after: Option<usize>) -> Body {
    let (piece, delay) = slow.unwrap_or((64 * 1024, Duration::ZERO));
    let limit = abort_after.unwrap_or(data.len()).min(data.len());

    let mut items: Vec<(Duration, Result<Bytes, io::Error>)> = Vec::new();
    let mut offset = 0;
    while offset < limit {
        let end = (offset + piece.max(1)).min(limit);
        items.push((delay, Ok(data.slice(offset..end))));
        offset = end;
    }
    if abort_after.is_some() {
        items.push((
            Duration::from_millis(50),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "injected abort")),
        ));
    }

    Body::from_stream(stream::iter(items).then(|(delay, item)| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        item
    }))
}

/// Parse `bytes=start-end` or `bytes=start-`.
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    let (start, end) = ranges.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse().ok()?),
    };
    Some((start, end))
}
