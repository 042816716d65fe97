//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible fields: `*const c_char`
//! instead of `String`, pointer plus length instead of `Vec`, and enums with
//! explicit discriminants. Values passed into a host callback are borrowed for
//! the duration of that call only; values the host passes in are read and
//! copied, never freed. Conversions live here to keep `lib.rs` focused on the
//! `extern "C"` surface.

use std::borrow::Cow;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

use courier_core::{
    Completer, DispatchRegistry, HeaderInjector, HttpMethod, RequestDescriptor, RequestKind,
    ResponseMeta, SeqId, Transport, TransportError, TransportRequest, TransportResponse,
};

/// Opaque handle to a `DispatchRegistry`.
pub struct FfiRegistry {
    pub(crate) inner: DispatchRegistry,
}

/// Opaque handle to a request being built. Consumed by `courier_request_load`.
pub struct FfiRequest {
    pub(crate) registry: DispatchRegistry,
    pub(crate) kind: FfiRequestKind,
    pub(crate) descriptor: RequestDescriptor,
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Request shape as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiRequestKind {
    Text = 0,
    Binary = 1,
    Upload = 2,
    Download = 3,
    DownloadFile = 4,
}

impl From<RequestKind> for FfiRequestKind {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Text => FfiRequestKind::Text,
            RequestKind::Binary => FfiRequestKind::Binary,
            RequestKind::Upload => FfiRequestKind::Upload,
            RequestKind::Download => FfiRequestKind::Download,
            RequestKind::DownloadFile => FfiRequestKind::DownloadFile,
        }
    }
}

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Head = 4,
    Patch = 5,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Delete => FfiHttpMethod::Delete,
            HttpMethod::Head => FfiHttpMethod::Head,
            HttpMethod::Patch => FfiHttpMethod::Patch,
        }
    }
}

impl From<FfiHttpMethod> for HttpMethod {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => HttpMethod::Get,
            FfiHttpMethod::Post => HttpMethod::Post,
            FfiHttpMethod::Put => HttpMethod::Put,
            FfiHttpMethod::Delete => HttpMethod::Delete,
            FfiHttpMethod::Head => HttpMethod::Head,
            FfiHttpMethod::Patch => HttpMethod::Patch,
        }
    }
}

/// Category of a host-reported transport failure.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiTransportErrorKind {
    Timeout = 0,
    NoConnection = 1,
    Network = 2,
}

// ---------------------------------------------------------------------------
// Host transport
// ---------------------------------------------------------------------------

/// A single HTTP header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// An adapted request handed to the host's `enqueue` callback.
///
/// Every pointer is valid only during the callback; the host copies what it
/// needs. `body` is null when there is no body. `destination` is null unless
/// `kind` is `DownloadFile`.
#[repr(C)]
pub struct FfiTransportRequest {
    pub seq_id: u64,
    pub kind: FfiRequestKind,
    pub method: FfiHttpMethod,
    pub url: *const c_char,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const u8,
    pub body_len: usize,
    pub destination: *const c_char,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_multiplier: f32,
}

/// Callbacks through which the registry drives the host's HTTP stack.
///
/// `enqueue` must return without waiting for the network. The host reports
/// the outcome later with `courier_complete_success` or
/// `courier_complete_error`, from any thread.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiTransport {
    pub user_data: *mut c_void,
    pub enqueue: extern "C" fn(user_data: *mut c_void, request: *const FfiTransportRequest),
    pub cancel: extern "C" fn(user_data: *mut c_void, seq_id: u64),
}

/// Host hook that adds headers to requests flagged with
/// `courier_request_set_fill_extra_headers`.
///
/// Called synchronously on the loading thread, before the request reaches
/// `enqueue`. `url` is valid only during the call. The host adds headers with
/// `courier_header_sink_add`; they replace request headers of the same name.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiHeaderInjector {
    pub user_data: *mut c_void,
    pub extra_headers: extern "C" fn(
        user_data: *mut c_void,
        seq_id: u64,
        method: FfiHttpMethod,
        url: *const c_char,
        sink: *mut FfiHeaderSink,
    ),
}

/// Opaque collector for headers returned by an `FfiHeaderInjector`.
pub struct FfiHeaderSink {
    pub(crate) headers: Vec<(String, String)>,
}

/// `HeaderInjector` implementation backed by a host callback.
pub(crate) struct HostInjector(pub(crate) FfiHeaderInjector);

// SAFETY: same contract as `HostTransport`.
unsafe impl Send for HostInjector {}
unsafe impl Sync for HostInjector {}

impl HeaderInjector for HostInjector {
    fn extra_headers(&self, descriptor: &RequestDescriptor) -> Vec<(String, String)> {
        let url = c_string(&descriptor.url);
        let seq_id = descriptor.seq_id().map_or(0, SeqId::as_u64);
        let mut sink = FfiHeaderSink {
            headers: Vec::new(),
        };
        (self.0.extra_headers)(
            self.0.user_data,
            seq_id,
            descriptor.method.into(),
            url.as_ptr(),
            &mut sink,
        );
        sink.headers
    }
}

/// `Transport` implementation backed by host callbacks.
pub(crate) struct HostTransport(pub(crate) FfiTransport);

// SAFETY: the host promises that `user_data` may be used from any thread, as
// documented on `courier_registry_new`.
unsafe impl Send for HostTransport {}
unsafe impl Sync for HostTransport {}

impl Transport for HostTransport {
    fn enqueue(&self, request: TransportRequest, completer: Completer) {
        let staged = StagedRequest::new(&request);
        let ffi = staged.as_ffi();
        // Completion comes back by id through the C surface.
        completer.into_seq_id();
        (self.0.enqueue)(self.0.user_data, &ffi);
    }

    fn cancel(&self, seq_id: SeqId) {
        (self.0.cancel)(self.0.user_data, seq_id.as_u64());
    }
}

/// Owned C strings backing an `FfiTransportRequest`.
struct StagedRequest<'a> {
    request: &'a TransportRequest,
    url: CString,
    header_strings: Vec<(CString, CString)>,
    headers: Vec<FfiHeader>,
    destination: Option<CString>,
}

impl<'a> StagedRequest<'a> {
    fn new(request: &'a TransportRequest) -> Self {
        let header_strings: Vec<(CString, CString)> = request
            .headers
            .iter()
            .map(|(k, v)| (c_string(k), c_string(v)))
            .collect();
        let headers = header_strings
            .iter()
            .map(|(k, v)| FfiHeader {
                key: k.as_ptr(),
                value: v.as_ptr(),
            })
            .collect();
        Self {
            request,
            url: c_string(&request.url),
            header_strings,
            headers,
            destination: request
                .destination
                .as_ref()
                .map(|p| c_string(&p.to_string_lossy())),
        }
    }

    fn as_ffi(&self) -> FfiTransportRequest {
        debug_assert_eq!(self.headers.len(), self.header_strings.len());
        let (body, body_len) = match &self.request.body {
            Some(b) => (b.as_ptr(), b.len()),
            None => (std::ptr::null(), 0),
        };
        FfiTransportRequest {
            seq_id: self.request.seq_id.as_u64(),
            kind: self.request.kind.into(),
            method: self.request.method.into(),
            url: self.url.as_ptr(),
            headers: if self.headers.is_empty() {
                std::ptr::null()
            } else {
                self.headers.as_ptr()
            },
            headers_len: self.headers.len() as u32,
            body,
            body_len,
            destination: self
                .destination
                .as_ref()
                .map_or(std::ptr::null(), |d| d.as_ptr()),
            timeout_ms: self.request.retry.timeout.as_millis() as u64,
            max_retries: self.request.retry.max_retries,
            backoff_multiplier: self.request.retry.backoff_multiplier,
        }
    }
}

// ---------------------------------------------------------------------------
// Host-provided outcomes
// ---------------------------------------------------------------------------

/// An HTTP response reported by the host. Read, never freed.
///
/// `body` may be null for an empty response; `saved_to` is set by hosts that
/// wrote a `DownloadFile` response to disk.
#[repr(C)]
pub struct FfiResponse {
    pub status: u16,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const u8,
    pub body_len: usize,
    pub saved_to: *const c_char,
}

impl FfiResponse {
    /// # Safety
    /// Every non-null pointer must be valid for its stated length.
    pub(crate) unsafe fn to_core(&self) -> TransportResponse {
        TransportResponse {
            status: self.status,
            headers: read_headers(self.headers, self.headers_len),
            body: read_bytes(self.body, self.body_len).map(<[u8]>::to_vec),
            saved_to: read_str(self.saved_to).map(PathBuf::from),
        }
    }
}

/// A transport failure reported by the host.
#[repr(C)]
pub struct FfiTransportError {
    pub kind: FfiTransportErrorKind,
    /// Attempts made before giving up; only meaningful for `Timeout`.
    pub attempts: u32,
    pub message: *const c_char,
}

impl FfiTransportError {
    /// # Safety
    /// `message` must be null or a valid C string.
    pub(crate) unsafe fn to_core(&self) -> TransportError {
        let message = read_str(self.message).unwrap_or_default().to_string();
        match self.kind {
            FfiTransportErrorKind::Timeout => TransportError::Timeout {
                attempts: self.attempts,
            },
            FfiTransportErrorKind::NoConnection => TransportError::NoConnection(message),
            FfiTransportErrorKind::Network => TransportError::Network(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A successful outcome passed to `FfiListener::on_success`, borrowed for the
/// call. `data` holds the text, the bytes, or the saved file path depending
/// on the request kind, and is null when the response carried none.
#[repr(C)]
pub struct FfiResult {
    pub status: u16,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub data: *const u8,
    pub data_len: usize,
}

/// Caller callbacks for one request. Exactly one of them runs, at most once.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiListener {
    pub user_data: *mut c_void,
    pub on_success: extern "C" fn(user_data: *mut c_void, seq_id: u64, result: *const FfiResult),
    pub on_error: extern "C" fn(
        user_data: *mut c_void,
        seq_id: u64,
        code: i32,
        message: *const c_char,
    ),
}

// SAFETY: listeners run on whichever thread completes the request; the host
// accepts that when it registers them.
unsafe impl Send for FfiListener {}

impl FfiListener {
    pub(crate) fn success(&self, seq_id: SeqId, meta: &ResponseMeta, data: Option<&[u8]>) {
        let header_strings: Vec<(CString, CString)> = meta
            .headers
            .iter()
            .map(|(k, v)| (c_string(k), c_string(v)))
            .collect();
        let headers: Vec<FfiHeader> = header_strings
            .iter()
            .map(|(k, v)| FfiHeader {
                key: k.as_ptr(),
                value: v.as_ptr(),
            })
            .collect();
        let (data, data_len) = match data {
            Some(d) => (d.as_ptr(), d.len()),
            None => (std::ptr::null(), 0),
        };
        let result = FfiResult {
            status: meta.status,
            headers: if headers.is_empty() {
                std::ptr::null()
            } else {
                headers.as_ptr()
            },
            headers_len: headers.len() as u32,
            data,
            data_len,
        };
        (self.on_success)(self.user_data, seq_id.as_u64(), &result);
    }

    pub(crate) fn error(&self, seq_id: SeqId, code: i32, message: &str) {
        let message = c_string(message);
        (self.on_error)(self.user_data, seq_id.as_u64(), code, message.as_ptr());
    }
}

/// Payload types that can be handed to C as a byte range.
pub(crate) trait FfiData {
    fn as_bytes(&self) -> Cow<'_, [u8]>;
}

impl FfiData for String {
    fn as_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(str::as_bytes(self))
    }
}

impl FfiData for Vec<u8> {
    fn as_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl FfiData for PathBuf {
    fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self.to_string_lossy() {
            Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
            Cow::Owned(s) => Cow::Owned(s.into_bytes()),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a C string, dropping interior NUL bytes rather than failing.
pub(crate) fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// # Safety
/// `ptr` must be null or valid for `len` bytes that outlive `'a`.
pub(crate) unsafe fn read_bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

/// # Safety
/// `ptr` must be null or point to `len` headers whose strings are valid.
pub(crate) unsafe fn read_headers(ptr: *const FfiHeader, len: u32) -> Vec<(String, String)> {
    if ptr.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(ptr, len as usize)
        .iter()
        .filter_map(|h| Some((read_str(h.key)?.to_string(), read_str(h.value)?.to_string())))
        .collect()
}
