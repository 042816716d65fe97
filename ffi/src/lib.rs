//! C-ABI wrapper around `courier-core`.
//!
//! # Overview
//! Exposes the dispatch registry through `extern "C"` functions so a host
//! application with its own HTTP stack can build requests, receive adapted
//! requests through callbacks, and report completions back by sequence id.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - The host transport is a struct of callbacks (`FfiTransport`). Requests
//!   passed to it are borrowed for the call; the host copies what it needs.
//! - Request handles are built with setters and consumed by
//!   `courier_request_load`, mirroring `Model::load` in the core.
//! - The C caller owns registry and request handles and releases them with
//!   `courier_registry_free` / `courier_request_free`.

pub mod types;

use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use courier_core::{
    BinaryAdapter, DispatchConfig, DispatchRegistry, DownloadAdapter, DownloadFileAdapter,
    FormItem, KindAdapter, RequestDescriptor, RequestListener, SeqId, TextAdapter, UploadAdapter,
};

use types::*;

// ---------------------------------------------------------------------------
// Registry lifecycle
// ---------------------------------------------------------------------------

/// Create a registry that executes requests through `transport`.
///
/// `config_json` may be null for the default configuration; otherwise it is a
/// JSON object with any of `default_timeout_ms`, `upload_timeout_ms`,
/// `max_retries` and `backoff_multiplier`. Returns null if the configuration
/// does not parse or is invalid. `transport.user_data` must be usable from any
/// thread. The caller must free the returned pointer with
/// `courier_registry_free`.
#[unsafe(no_mangle)]
pub extern "C" fn courier_registry_new(
    transport: FfiTransport,
    config_json: *const c_char,
) -> *mut FfiRegistry {
    courier_registry_new_with_injector(transport, std::ptr::null(), config_json)
}

/// Like `courier_registry_new`, with an optional header injector. A null
/// `injector` leaves `fill_extra_headers` without effect. The injector is
/// copied; its `user_data` must be usable from any thread.
#[unsafe(no_mangle)]
pub extern "C" fn courier_registry_new_with_injector(
    transport: FfiTransport,
    injector: *const FfiHeaderInjector,
    config_json: *const c_char,
) -> *mut FfiRegistry {
    catch_unwind(AssertUnwindSafe(|| {
        let config = if config_json.is_null() {
            DispatchConfig::default()
        } else {
            let raw = unsafe { read_str(config_json) }.unwrap_or("");
            match DispatchConfig::from_json(raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "rejecting registry configuration");
                    return std::ptr::null_mut();
                }
            }
        };
        let mut builder = DispatchRegistry::builder(HostTransport(transport)).config(&config);
        if !injector.is_null() {
            builder = builder.header_injector(HostInjector(unsafe { *injector }));
        }
        Box::into_raw(Box::new(FfiRegistry {
            inner: builder.build(),
        }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Drop every in-flight request without notifying listeners and refuse
/// further loads. Returns the number of requests dropped, or 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn courier_registry_shutdown(registry: *const FfiRegistry) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if registry.is_null() {
            return 0;
        }
        let registry = unsafe { &*registry };
        registry.inner.shutdown() as u32
    }))
    .unwrap_or(0)
}

/// Number of requests currently in flight, or 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn courier_registry_in_flight(registry: *const FfiRegistry) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if registry.is_null() {
            return 0;
        }
        let registry = unsafe { &*registry };
        registry.inner.in_flight() as u32
    }))
    .unwrap_or(0)
}

/// Free a registry created by `courier_registry_new`. Safe to call with null.
///
/// Request handles created from it stay valid until loaded or freed.
#[unsafe(no_mangle)]
pub extern "C" fn courier_registry_free(registry: *mut FfiRegistry) {
    if !registry.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(registry) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

/// Start a request of the given kind.
///
/// `file_path` is required for `DownloadFile` and ignored otherwise. Returns
/// null if `registry` is null or a required path is missing. The handle is
/// consumed by `courier_request_load` or released by `courier_request_free`.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_new(
    registry: *const FfiRegistry,
    kind: FfiRequestKind,
    file_path: *const c_char,
) -> *mut FfiRequest {
    catch_unwind(AssertUnwindSafe(|| {
        if registry.is_null() {
            return std::ptr::null_mut();
        }
        let registry = unsafe { &*registry };
        let mut descriptor = RequestDescriptor::new();
        if kind == FfiRequestKind::DownloadFile {
            match unsafe { read_str(file_path) } {
                Some(path) => descriptor.file_path = Some(PathBuf::from(path)),
                None => return std::ptr::null_mut(),
            }
        }
        Box::into_raw(Box::new(FfiRequest {
            registry: registry.inner.clone(),
            kind,
            descriptor,
        }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Run `f` on the request's descriptor. Returns false for a null request or a
/// caught panic.
fn with_descriptor(
    request: *mut FfiRequest,
    f: impl FnOnce(&mut RequestDescriptor) -> bool,
) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if request.is_null() {
            return false;
        }
        let request = unsafe { &mut *request };
        f(&mut request.descriptor)
    }))
    .unwrap_or(false)
}

/// Set the request URL. Returns false if either argument is null.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_set_url(request: *mut FfiRequest, url: *const c_char) -> bool {
    with_descriptor(request, |d| match unsafe { read_str(url) } {
        Some(url) => {
            d.url = url.to_string();
            true
        }
        None => false,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn courier_request_set_method(
    request: *mut FfiRequest,
    method: FfiHttpMethod,
) -> bool {
    with_descriptor(request, |d| {
        d.method = method.into();
        true
    })
}

/// Add or replace a header.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_add_header(
    request: *mut FfiRequest,
    key: *const c_char,
    value: *const c_char,
) -> bool {
    with_descriptor(request, |d| {
        match unsafe { (read_str(key), read_str(value)) } {
            (Some(k), Some(v)) => {
                d.header(k, v);
                true
            }
            _ => false,
        }
    })
}

/// Add a parameter. `value` is parsed as JSON text; anything that does not
/// parse is taken as a plain string. A JSON `null` value is skipped.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_add_param(
    request: *mut FfiRequest,
    key: *const c_char,
    value: *const c_char,
) -> bool {
    with_descriptor(request, |d| {
        let Some(key) = (unsafe { read_str(key) }) else {
            return false;
        };
        let value = unsafe { read_str(value) }.map(|raw| {
            serde_json::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        });
        d.param_if_not_null(key, value);
        true
    })
}

/// Set the raw request body. A null `body` clears it.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_set_body(
    request: *mut FfiRequest,
    body: *const u8,
    body_len: usize,
) -> bool {
    with_descriptor(request, |d| {
        d.body = unsafe { read_bytes(body, body_len) }.map(<[u8]>::to_vec);
        true
    })
}

/// Ask the registry to run its header injector for this request. Has no
/// effect on a registry created without one.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_set_fill_extra_headers(
    request: *mut FfiRequest,
    fill: bool,
) -> bool {
    with_descriptor(request, |d| {
        d.fill_extra_headers = fill;
        true
    })
}

/// Add a plain multipart field. Only `Upload` requests send form items.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_add_form_field(
    request: *mut FfiRequest,
    name: *const c_char,
    value: *const c_char,
) -> bool {
    with_descriptor(request, |d| {
        match unsafe { (read_str(name), read_str(value)) } {
            (Some(name), Some(value)) => {
                d.form_items.push(FormItem::field(name, value));
                true
            }
            _ => false,
        }
    })
}

/// Add a multipart file part. `data` may be null only when `data_len` is 0.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_add_form_file(
    request: *mut FfiRequest,
    name: *const c_char,
    file_name: *const c_char,
    content_type: *const c_char,
    data: *const u8,
    data_len: usize,
) -> bool {
    with_descriptor(request, |d| {
        let (Some(name), Some(file_name), Some(content_type)) =
            (unsafe { (read_str(name), read_str(file_name), read_str(content_type)) })
        else {
            return false;
        };
        let data = match unsafe { read_bytes(data, data_len) } {
            Some(bytes) => bytes.to_vec(),
            None if data_len == 0 => Vec::new(),
            None => return false,
        };
        d.form_items
            .push(FormItem::file(name, file_name, content_type, data));
        true
    })
}

/// Add a header from inside an `FfiHeaderInjector` callback. Returns false
/// for null arguments.
#[unsafe(no_mangle)]
pub extern "C" fn courier_header_sink_add(
    sink: *mut FfiHeaderSink,
    key: *const c_char,
    value: *const c_char,
) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if sink.is_null() {
            return false;
        }
        let sink = unsafe { &mut *sink };
        match unsafe { (read_str(key), read_str(value)) } {
            (Some(k), Some(v)) => {
                sink.headers.push((k.to_string(), v.to_string()));
                true
            }
            _ => false,
        }
    }))
    .unwrap_or(false)
}

/// Free a request handle that was never loaded. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_free(request: *mut FfiRequest) {
    if !request.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(request) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Load / complete / cancel
// ---------------------------------------------------------------------------

fn submit<A>(
    registry: &DispatchRegistry,
    descriptor: RequestDescriptor,
    adapter: A,
    listener: FfiListener,
) -> Option<SeqId>
where
    A: KindAdapter,
    A::Output: FfiData,
{
    let url = descriptor.url.clone();
    let on_success = listener;
    let on_error = listener;
    let listener = RequestListener::new()
        .on_success(move |seq, meta, data: Option<A::Output>| {
            let bytes = data.as_ref().map(FfiData::as_bytes);
            on_success.success(seq, &meta, bytes.as_deref());
        })
        .on_error(move |seq, e| {
            tracing::warn!(%seq, code = ?e.code, %url, message = %e.message, "request failed");
            on_error.error(seq, e.code.as_i32(), &e.message);
        });
    match registry.submit(descriptor, adapter, listener) {
        Ok(seq) => Some(seq),
        Err(e) => {
            tracing::warn!(error = %e, "request rejected");
            None
        }
    }
}

/// Submit the request and consume the handle.
///
/// Returns the sequence id, or -1 if `request` is null or the registry has
/// been shut down. The listener is never called from inside this function.
#[unsafe(no_mangle)]
pub extern "C" fn courier_request_load(request: *mut FfiRequest, listener: FfiListener) -> i64 {
    if request.is_null() {
        return -1;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let FfiRequest {
            registry,
            kind,
            descriptor,
        } = *unsafe { Box::from_raw(request) };
        let seq = match kind {
            FfiRequestKind::Text => submit(&registry, descriptor, TextAdapter, listener),
            FfiRequestKind::Binary => submit(&registry, descriptor, BinaryAdapter, listener),
            FfiRequestKind::Upload => submit(&registry, descriptor, UploadAdapter, listener),
            FfiRequestKind::Download => submit(&registry, descriptor, DownloadAdapter, listener),
            FfiRequestKind::DownloadFile => {
                submit(&registry, descriptor, DownloadFileAdapter, listener)
            }
        };
        seq.map_or(-1, |s| s.as_u64() as i64)
    }))
    .unwrap_or(-1)
}

/// Report a response for `seq_id`. Returns whether the request was still in
/// flight; false for null arguments.
#[unsafe(no_mangle)]
pub extern "C" fn courier_complete_success(
    registry: *const FfiRegistry,
    seq_id: u64,
    response: *const FfiResponse,
) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if registry.is_null() || response.is_null() {
            return false;
        }
        let registry = unsafe { &*registry };
        let response = unsafe { (*response).to_core() };
        registry
            .inner
            .on_transport_success(SeqId::new(seq_id), response)
    }))
    .unwrap_or(false)
}

/// Report a transport failure for `seq_id`. Same return contract as
/// `courier_complete_success`.
#[unsafe(no_mangle)]
pub extern "C" fn courier_complete_error(
    registry: *const FfiRegistry,
    seq_id: u64,
    error: *const FfiTransportError,
) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if registry.is_null() || error.is_null() {
            return false;
        }
        let registry = unsafe { &*registry };
        let error = unsafe { (*error).to_core() };
        registry.inner.on_transport_error(SeqId::new(seq_id), error)
    }))
    .unwrap_or(false)
}

/// Cancel `seq_id`. No listener runs. Returns whether it was in flight.
#[unsafe(no_mangle)]
pub extern "C" fn courier_cancel(registry: *const FfiRegistry, seq_id: u64) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if registry.is_null() {
            return false;
        }
        let registry = unsafe { &*registry };
        registry.inner.cancel(SeqId::new(seq_id))
    }))
    .unwrap_or(false)
}
