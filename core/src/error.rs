//! Error types for request dispatch.
//!
//! # Design
//! Three layers of failure are kept apart:
//! - `TransportError` is what the external transport reports for a request
//!   that never produced a response.
//! - `ModelError` is what a caller's error listener receives: a stable
//!   `ErrorCode` plus a human-readable message.
//! - `DispatchError` is returned synchronously from `submit`/`load` when a
//!   request could not be handed to the transport at all.
//!
//! Cancellation and stale completions are not errors and have no variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-visible error taxonomy. The integer values are stable and shared
/// with the C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic network failure, including a transport dropping the request.
    Network = 1,
    /// The configured timeout was exhausted after the transport's retries.
    Timeout = 2,
    /// No connection could be established.
    NoConnection = 3,
    /// A response arrived with a non-2xx status.
    HttpStatus = 4,
    /// The response payload could not be interpreted as the expected shape.
    Decode = 5,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Failure delivered to a request's error listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code:?}] {message}")]
pub struct ModelError {
    pub code: ErrorCode,
    pub message: String,
}

impl ModelError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Decode, message)
    }

    /// Non-2xx response. The body is included verbatim when it is text.
    pub fn http_status(status: u16, body: Option<&[u8]>) -> Self {
        let text = body.map(String::from_utf8_lossy).unwrap_or_default();
        Self::new(ErrorCode::HttpStatus, format!("HTTP {status}: {text}"))
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::decode(e.to_string())
    }
}

/// Failure reported by the transport for a request that produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("no connection: {0}")]
    NoConnection(String),

    #[error("network error: {0}")]
    Network(String),

    /// The transport released the request without reporting an outcome.
    #[error("request abandoned by transport")]
    Abandoned,
}

impl From<TransportError> for ModelError {
    fn from(e: TransportError) -> Self {
        let code = match &e {
            TransportError::Timeout { .. } => ErrorCode::Timeout,
            TransportError::NoConnection(_) => ErrorCode::NoConnection,
            TransportError::Network(_) | TransportError::Abandoned => ErrorCode::Network,
        };
        ModelError::new(code, e.to_string())
    }
}

/// Returned synchronously when a request cannot be submitted.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch registry has been shut down")]
    ShutDown,

    #[error("transport rejected the request: {0}")]
    Rejected(String),

    #[error("request body could not be serialized: {0}")]
    Serialization(String),
}

/// Invalid dispatch configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidVar { key: &'static str, value: String },
}
