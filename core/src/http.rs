//! Transport-level request and response values.
//!
//! # Design
//! These types describe what crosses the boundary to the external transport.
//! The core builds `TransportRequest` values through a kind adapter and
//! receives `TransportResponse` values back through a `Completer`; it never
//! performs the network round-trip itself.
//!
//! All fields use owned types (`String`, `Vec`, `PathBuf`) so values can be
//! handed to transport worker threads and across the C boundary without
//! lifetime concerns.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::descriptor::SeqId;
use crate::policy::RetryPolicy;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// Whether requests with this method carry parameters in the query string
    /// rather than in the body.
    pub fn is_query_only(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a request, used to pick its retry policy and for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Text,
    Binary,
    Upload,
    Download,
    DownloadFile,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::Text,
        RequestKind::Binary,
        RequestKind::Upload,
        RequestKind::Download,
        RequestKind::DownloadFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Text => "text",
            RequestKind::Binary => "binary",
            RequestKind::Upload => "upload",
            RequestKind::Download => "download",
            RequestKind::DownloadFile => "download_file",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request adapted for the transport.
///
/// Built by a kind adapter from a submitted descriptor. The registry attaches
/// the retry policy for the request's kind and any injected headers before the
/// value is handed to `Transport::enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub seq_id: SeqId,
    pub kind: RequestKind,
    pub method: HttpMethod,
    /// Final URL, query string included.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Where the transport should store the response body, for file downloads.
    pub destination: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl TransportRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Insert or replace a header, matching names case-insensitively.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => *slot = (name, value),
            None => self.headers.push((name, value)),
        }
    }
}

/// A response reported by the transport.
///
/// `body` is `None` when the transport delivered no payload at all (a `HEAD`
/// request, or a body streamed to `saved_to`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub saved_to: Option<PathBuf>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_saved_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.saved_to = Some(path.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Status line and headers of a delivered response, handed to success
/// listeners alongside the decoded payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseMeta {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
