// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! HTTP control socket (§4.7): persistent per-(host, port, TLS)
//! connections, redirect following, resume via `Range`, host-level
//! backoff throttling, and Digest authentication.

pub mod digest;

use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

pub const MAX_REDIRECTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host_port_tls: (String, u16, bool),
}

impl ConnectionKey {
    pub fn new(host: &str, port: u16, tls: bool) -> Self {
        ConnectionKey { host_port_tls: (host.to_ascii_lowercase(), port, tls) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Request { method, url, headers: Vec::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `Range: bytes=N-` for resuming a partial download.
    pub fn with_resume(self, offset: u64) -> Self {
        self.header("Range", format!("bytes={}-", offset))
    }

    pub fn render_request_line_and_headers(&self) -> String {
        let mut s = format!(
            "{} {} HTTP/1.1\r\n",
            self.method.as_str(),
            self.url.path().to_string() + &self.url.query().map(|q| format!("?{}", q)).unwrap_or_default()
        );
        let host = self.url.host_str().unwrap_or_default();
        s.push_str(&format!("Host: {}\r\n", host));
        for (k, v) in &self.headers {
            s.push_str(&format!("{}: {}\r\n", k, v));
        }
        s.push_str("\r\n");
        s
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Parses the status line + header block of an HTTP/1.1 response (up to
/// the blank line; body framing is handled by the caller via
/// `Content-Length`/chunked transfer-encoding).
pub fn parse_response_head(data: &str) -> Option<Response> {
    let mut lines = data.split("\r\n");
    let status_line = lines.next()?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next()?;
    let status: u16 = parts.next()?.parse().ok()?;
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    Some(Response { status, headers })
}

/// Resolves a redirect `Location` against the request that produced it,
/// rejecting non-HTTP(S) schemes and the 305 status outright (§4.7).
pub fn resolve_redirect(original: &Url, status: u16, location: &str) -> Result<Url, String> {
    if status == 305 {
        return Err("305 Use Proxy is not followed".to_string());
    }
    let resolved = original.join(location).map_err(|e| e.to_string())?;
    match resolved.scheme() {
        "http" | "https" => Ok(resolved),
        other => Err(format!("redirect to unsupported scheme {other}")),
    }
}

/// Drives up to [`MAX_REDIRECTS`] hops, yielding the final URL to request
/// or an error once the server keeps redirecting past the cap.
pub struct RedirectFollower {
    hops: u32,
}

impl RedirectFollower {
    pub fn new() -> Self {
        RedirectFollower { hops: 0 }
    }

    pub fn follow(&mut self, original: &Url, response: &Response) -> Result<Url, String> {
        if self.hops >= MAX_REDIRECTS {
            return Err("too many redirects".to_string());
        }
        let location = response.header("Location").ok_or("redirect with no Location header")?;
        let next = resolve_redirect(original, response.status, location)?;
        self.hops += 1;
        Ok(next)
    }
}

impl Default for RedirectFollower {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.7: "on 416 with resume, reset local offset to 0, clear resume
/// flag, retry".
pub fn handle_resume_rejected(status: u16) -> bool {
    status == 416
}

/// Process-global per-host backoff (§4.7). `add_backoff` always extends
/// to the later of any existing deadline, never shortens it.
#[derive(Default)]
pub struct RequestThrottler {
    backoff_until: HashMap<String, Instant>,
}

impl RequestThrottler {
    pub fn new() -> Self {
        RequestThrottler::default()
    }

    pub fn add_backoff(&mut self, host: &str, until: Instant) {
        let entry = self.backoff_until.entry(host.to_ascii_lowercase()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
    }

    /// Returns the remaining backoff for `host`, pruning the entry if it
    /// has already expired.
    pub fn remaining(&mut self, host: &str, now: Instant) -> Option<Duration> {
        let key = host.to_ascii_lowercase();
        match self.backoff_until.get(&key) {
            Some(&until) if until > now => Some(until - now),
            Some(_) => {
                self.backoff_until.remove(&key);
                None
            },
            None => None,
        }
    }
}

/// A request body source (§4.7): either held entirely in memory, or
/// streamed from a local file starting at `start` for `size` bytes.
/// `rewind` is needed when an auth challenge or redirect requires
/// resending the body from the top.
pub trait BodyProvider {
    fn data_request(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn rewind(&mut self) -> std::io::Result<()>;
    fn len(&self) -> u64;
}

pub struct InMemoryBody {
    data: Vec<u8>,
    pos: usize,
}

impl InMemoryBody {
    pub fn new(data: Vec<u8>) -> Self {
        InMemoryBody { data, pos: 0 }
    }
}

impl BodyProvider for InMemoryBody {
    fn data_request(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (self.data.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn rewind(&mut self) -> std::io::Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A file-backed body: `(file, start, size)`, per §4.7.
pub struct FileBody {
    file: std::fs::File,
    start: u64,
    size: u64,
    sent: u64,
}

impl FileBody {
    pub fn new(file: std::fs::File, start: u64, size: u64) -> std::io::Result<Self> {
        let mut body = FileBody { file, start, size, sent: 0 };
        body.rewind()?;
        Ok(body)
    }
}

impl BodyProvider for FileBody {
    fn data_request(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::io::Read;
        let remaining = self.size - self.sent;
        if remaining == 0 {
            return Ok(0);
        }
        let cap = (remaining as usize).min(buf.len());
        let n = self.file.read(&mut buf[..cap])?;
        self.sent += n as u64;
        Ok(n)
    }

    fn rewind(&mut self) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom};
        self.file.seek(SeekFrom::Start(self.start))?;
        self.sent = 0;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.size
    }
}

/// Decodes one chunk-size line of a chunked transfer-encoded body
/// (hex digits, optional `;extension`, terminated by CRLF). Returns the
/// chunk size and the header's byte length including the CRLF.
pub fn parse_chunk_size_line(line: &str) -> Option<u64> {
    let hex = line.split(';').next()?.trim();
    u64::from_str_radix(hex, 16).ok()
}
