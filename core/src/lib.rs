//! Request orchestration core.
//!
//! # Overview
//! Callers describe HTTP requests through typed fluent models and receive
//! exactly one outcome per request through their listeners. The core never
//! touches the network: an external `Transport` executes adapted requests and
//! reports completions back by sequence id (host-does-IO pattern).
//!
//! # Design
//! - `Model<K>` builds a `RequestDescriptor`; the kind `K` picks the adapter
//!   and the payload type listeners receive.
//! - A `KindAdapter` per request shape (text, binary, upload, download,
//!   download-to-file) maps descriptors to `TransportRequest` values and
//!   responses back to payloads.
//! - `DispatchRegistry` assigns monotonic sequence ids, owns the in-flight
//!   table and guarantees at most one listener invocation per request, under
//!   success, failure and cancellation races alike.
//! - Retry and timeout policy is per request kind and travels with each
//!   `TransportRequest`; the transport applies it.
//! - All shared state is behind one `parking_lot::Mutex` that is never held
//!   across calls into the transport or listeners.

pub mod adapter;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod http;
pub mod listener;
pub mod model;
pub mod policy;
pub mod registry;
pub mod transport;

pub use adapter::{
    BinaryAdapter, DownloadAdapter, DownloadFileAdapter, KindAdapter, TextAdapter, UploadAdapter,
};
pub use config::DispatchConfig;
pub use descriptor::{FormItem, RequestDescriptor, SeqId};
pub use error::{ConfigError, DispatchError, ErrorCode, ModelError, TransportError};
pub use http::{HttpMethod, RequestKind, ResponseMeta, TransportRequest, TransportResponse};
pub use listener::RequestListener;
pub use model::{
    Binary, Download, DownloadFile, Json, Model, ModelKind, ModelListener, Text, Ticket, Upload,
};
pub use policy::{PolicyTable, RetryPolicy};
pub use registry::{DispatchRegistry, HeaderInjector, RegistryBuilder};
pub use transport::{Completer, Transport};
