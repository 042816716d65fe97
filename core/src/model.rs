//! Fluent request models.
//!
//! # Design
//! `Model<K>` is the one builder shared by every request shape. The kind
//! parameter `K` fixes, at construction time, which adapter the request goes
//! through and what payload type listeners receive. Every chainable method
//! returns `Model<K>` by value, so methods that only exist for one kind
//! (`form_item` on uploads, `json_body` on JSON models) stay chainable after
//! the shared ones.
//!
//! `load()` consumes the model: the descriptor belongs to the registry from
//! then on, and the caller keeps a `Ticket` for cancellation.

use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::adapter::{
    BinaryAdapter, DownloadAdapter, DownloadFileAdapter, KindAdapter, TextAdapter, UploadAdapter,
};
use crate::descriptor::{FormItem, RequestDescriptor, SeqId};
use crate::error::{DispatchError, ModelError};
use crate::http::{HttpMethod, ResponseMeta};
use crate::listener::{split_once, RequestListener};
use crate::registry::DispatchRegistry;

pub type ModelSuccessFn<D> = Box<dyn FnOnce(ResponseMeta, Option<D>) + Send>;
pub type ModelErrorFn = Box<dyn FnOnce(ModelError) + Send>;
type LifecycleFn = Box<dyn FnOnce(&RequestDescriptor) + Send>;
type FillerFn = Box<dyn FnOnce(&mut RequestDescriptor) + Send>;

/// Caller callbacks in their decoded form, as handed to `ModelKind::submit`.
pub struct ModelListener<D> {
    success: Option<ModelSuccessFn<D>>,
    error: Option<ModelErrorFn>,
}

/// How one kind of model reaches the registry.
///
/// Implementations pick an adapter and a decode step and usually delegate to
/// [`submit_decoded`].
pub trait ModelKind: Send + 'static {
    type Data: Send + 'static;

    /// Seed a freshly created descriptor with kind-specific fields.
    fn prepare(&self, _request: &mut RequestDescriptor) {}

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<Self::Data>,
    ) -> Result<SeqId, DispatchError>;
}

/// Submit through `adapter`, turning its payload into `D` with `decode`.
///
/// A decode failure reaches the error listener with `ErrorCode::Decode`. Every
/// failure is logged with the request URL before the error listener runs.
pub fn submit_decoded<A, D, F>(
    registry: &DispatchRegistry,
    request: RequestDescriptor,
    adapter: A,
    decode: F,
    listener: ModelListener<D>,
) -> Result<SeqId, DispatchError>
where
    A: KindAdapter,
    D: Send + 'static,
    F: FnOnce(A::Output) -> Result<D, ModelError> + Send + 'static,
{
    let ModelListener { success, error } = listener;
    let url = request.url.clone();
    let (on_decode_failure, on_failure) = split_once(move |(seq_id, e): (SeqId, ModelError)| {
        tracing::warn!(%seq_id, code = ?e.code, %url, message = %e.message, "request failed");
        if let Some(f) = error {
            f(e);
        }
    });

    let listener = RequestListener::new()
        .on_success(move |seq_id, meta, raw: Option<A::Output>| {
            match raw.map(decode).transpose() {
                Ok(data) => {
                    if let Some(f) = success {
                        f(meta, data);
                    }
                }
                Err(e) => on_decode_failure((seq_id, e)),
            }
        })
        .on_error(move |seq_id, e| on_failure((seq_id, e)));
    registry.submit(request, adapter, listener)
}

/// Plain text responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl ModelKind for Text {
    type Data = String;

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<String>,
    ) -> Result<SeqId, DispatchError> {
        submit_decoded(registry, request, TextAdapter, Ok, listener)
    }
}

/// Text responses parsed as JSON into `T`.
pub struct Json<T = Value>(PhantomData<fn() -> T>);

impl<T> Json<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send + 'static> ModelKind for Json<T> {
    type Data = T;

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<T>,
    ) -> Result<SeqId, DispatchError> {
        submit_decoded(
            registry,
            request,
            TextAdapter,
            |text: String| serde_json::from_str(&text).map_err(ModelError::from),
            listener,
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Binary;

impl ModelKind for Binary {
    type Data = Vec<u8>;

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<Vec<u8>>,
    ) -> Result<SeqId, DispatchError> {
        submit_decoded(registry, request, BinaryAdapter, Ok, listener)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Upload;

impl ModelKind for Upload {
    type Data = String;

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<String>,
    ) -> Result<SeqId, DispatchError> {
        submit_decoded(registry, request, UploadAdapter, Ok, listener)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Download;

impl ModelKind for Download {
    type Data = Vec<u8>;

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<Vec<u8>>,
    ) -> Result<SeqId, DispatchError> {
        submit_decoded(registry, request, DownloadAdapter, Ok, listener)
    }
}

/// Download streamed to `path` by the transport.
#[derive(Debug, Clone)]
pub struct DownloadFile {
    path: PathBuf,
}

impl DownloadFile {
    pub fn to(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModelKind for DownloadFile {
    type Data = PathBuf;

    fn prepare(&self, request: &mut RequestDescriptor) {
        request.file_path = Some(self.path.clone());
    }

    fn submit(
        &self,
        registry: &DispatchRegistry,
        request: RequestDescriptor,
        listener: ModelListener<PathBuf>,
    ) -> Result<SeqId, DispatchError> {
        submit_decoded(registry, request, DownloadFileAdapter, Ok, listener)
    }
}

/// Fluent builder for one request.
pub struct Model<K: ModelKind> {
    kind: K,
    request: RequestDescriptor,
    success: Option<ModelSuccessFn<K::Data>>,
    error: Option<ModelErrorFn>,
    lifecycle: Option<LifecycleFn>,
    filler: Option<FillerFn>,
    client: DispatchRegistry,
}

impl<K: ModelKind> Model<K> {
    pub fn new(client: DispatchRegistry, kind: K) -> Self {
        let mut request = RequestDescriptor::new();
        kind.prepare(&mut request);
        Self {
            kind,
            request,
            success: None,
            error: None,
            lifecycle: None,
            filler: None,
            client,
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.request.url = url.into();
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.request.method = method;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.header(key, value);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.param(key, value);
        self
    }

    pub fn param_if_not_null<V: Into<Value>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.request.param_if_not_null(key, value);
        self
    }

    pub fn add_params<I, Key, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (Key, V)>,
        Key: Into<String>,
        V: Into<Value>,
    {
        self.request.add_params(params);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Ask the registry's header injector to add its headers to this request.
    pub fn fill_extra_headers(mut self, fill: bool) -> Self {
        self.request.fill_extra_headers = fill;
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ResponseMeta, Option<K::Data>) + Send + 'static,
    {
        self.success = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ModelError) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    /// Register one callback as both the success and the error listener.
    pub fn on_both<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Result<(ResponseMeta, Option<K::Data>), ModelError>) + Send + 'static,
    {
        let (success, error) = split_once(f);
        self.success = Some(Box::new(move |meta: ResponseMeta, data: Option<K::Data>| {
            success(Ok((meta, data)))
        }));
        self.error = Some(Box::new(move |e: ModelError| error(Err(e))));
        self
    }

    /// Hook run at the start of `load()`, before the filler.
    pub fn on_lifecycle<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&RequestDescriptor) + Send + 'static,
    {
        self.lifecycle = Some(Box::new(f));
        self
    }

    /// Last-chance mutation of the descriptor, run inside `load()`.
    pub fn filler<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut RequestDescriptor) + Send + 'static,
    {
        self.filler = Some(Box::new(f));
        self
    }

    /// Submit through a different registry.
    pub fn client(mut self, client: DispatchRegistry) -> Self {
        self.client = client;
        self
    }

    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Always a no-op that returns `false`: a model has no sequence id until
    /// `load()`, and `load()` consumes it. Cancel a loaded request through its
    /// `Ticket`.
    pub fn cancel(&self) -> bool {
        match self.request.seq_id() {
            Some(seq_id) => self.client.cancel(seq_id),
            None => false,
        }
    }

    /// Run the hooks and submit. Listeners are never called from inside
    /// `load()` itself; outcomes arrive through the transport. The returned
    /// `Ticket` cancels the loaded request.
    pub fn load(self) -> Result<Ticket, DispatchError> {
        let Model {
            kind,
            mut request,
            success,
            error,
            lifecycle,
            filler,
            client,
        } = self;

        if let Some(hook) = lifecycle {
            hook(&request);
        }
        if let Some(fill) = filler {
            fill(&mut request);
        }

        let seq_id = kind.submit(&client, request, ModelListener { success, error })?;
        Ok(Ticket {
            seq_id,
            registry: client,
        })
    }

    /// `on_both(f).load()`.
    pub fn load_with<F>(self, f: F) -> Result<Ticket, DispatchError>
    where
        F: FnOnce(Result<(ResponseMeta, Option<K::Data>), ModelError>) + Send + 'static,
    {
        self.on_both(f).load()
    }
}

impl<T: DeserializeOwned + Send + 'static> Model<Json<T>> {
    /// Serialize `body` as the JSON request body.
    pub fn json_body<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, DispatchError> {
        let bytes =
            serde_json::to_vec(body).map_err(|e| DispatchError::Serialization(e.to_string()))?;
        self.request.body = Some(bytes);
        if !self.request.has_header("content-type") {
            self.request.header("Content-Type", "application/json");
        }
        Ok(self)
    }
}

impl Model<Upload> {
    pub fn form_item(mut self, item: FormItem) -> Self {
        self.request.form_items.push(item);
        self
    }

    pub fn form_field(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_item(FormItem::field(name, value))
    }

    pub fn form_file(
        self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.form_item(FormItem::file(name, file_name, content_type, data))
    }
}

impl Model<DownloadFile> {
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.request.file_path = Some(path.into());
        self
    }
}

/// Handle to a loaded request.
#[derive(Debug, Clone)]
pub struct Ticket {
    seq_id: SeqId,
    registry: DispatchRegistry,
}

impl Ticket {
    pub fn seq_id(&self) -> SeqId {
        self.seq_id
    }

    /// Cancel the request. A no-op once it has completed.
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.seq_id)
    }

    pub fn is_pending(&self) -> bool {
        self.registry.is_pending(self.seq_id)
    }
}

impl DispatchRegistry {
    pub fn text(&self) -> Model<Text> {
        Model::new(self.clone(), Text)
    }

    pub fn json<T: DeserializeOwned + Send + 'static>(&self) -> Model<Json<T>> {
        Model::new(self.clone(), Json::new())
    }

    pub fn binary(&self) -> Model<Binary> {
        Model::new(self.clone(), Binary)
    }

    pub fn upload(&self) -> Model<Upload> {
        Model::new(self.clone(), Upload)
    }

    pub fn download(&self) -> Model<Download> {
        Model::new(self.clone(), Download)
    }

    pub fn download_file(&self, path: impl Into<PathBuf>) -> Model<DownloadFile> {
        Model::new(self.clone(), DownloadFile::to(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::http::{TransportRequest, TransportResponse};
    use crate::transport::{Completer, Transport};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::sync::Arc;

    /// Records adapted requests and detaches completers so tests complete by id.
    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl Transport for Recorder {
        fn enqueue(&self, request: TransportRequest, completer: Completer) {
            completer.into_seq_id();
            self.requests.lock().push(request);
        }

        fn cancel(&self, _seq_id: SeqId) {}
    }

    fn registry() -> (DispatchRegistry, Arc<Recorder>) {
        let transport = Arc::new(Recorder::default());
        (DispatchRegistry::new(Arc::clone(&transport)), transport)
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i32,
    }

    #[test]
    fn chaining_keeps_kind_specific_methods() {
        let (registry, transport) = registry();
        registry
            .upload()
            .url("http://h/files")
            .header("X-App", "demo")
            .form_field("title", "t")
            .param("v", 1)
            .form_file("file", "a.bin", "application/octet-stream", vec![1, 2])
            .load()
            .unwrap();
        let req = transport.requests.lock().pop().unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://h/files?v=1");
        assert_eq!(req.header("x-app"), Some("demo"));
    }

    #[test]
    fn json_model_decodes_payload() {
        let (registry, _transport) = registry();
        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        let ticket = registry
            .json::<Point>()
            .url("/a")
            .on_success(move |_, data| *sink.lock() = data)
            .load()
            .unwrap();
        registry.on_transport_success(
            ticket.seq_id(),
            TransportResponse::new(200).with_body(r#"{"x":1}"#),
        );
        assert_eq!(*got.lock(), Some(Point { x: 1 }));
    }

    #[test]
    fn json_decode_failure_reaches_error_listener() {
        let (registry, _transport) = registry();
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        let ticket = registry
            .json::<Point>()
            .url("/a")
            .load_with(move |result| sink.lock().push(result.map(|(_, d)| d)))
            .unwrap();
        registry.on_transport_success(
            ticket.seq_id(),
            TransportResponse::new(200).with_body("not json"),
        );
        let got = got.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].as_ref().unwrap_err().code, ErrorCode::Decode);
        assert!(!ticket.is_pending());
    }

    #[test]
    fn hooks_run_in_order_before_submit() {
        let (registry, transport) = registry();
        let order = Arc::new(Mutex::new(Vec::new()));
        let life = Arc::clone(&order);
        let fill = Arc::clone(&order);
        registry
            .text()
            .url("/a")
            .on_lifecycle(move |req| {
                assert!(req.seq_id().is_none());
                life.lock().push("lifecycle");
            })
            .filler(move |req| {
                fill.lock().push("filler");
                req.header("X-Signature", "sig");
            })
            .load()
            .unwrap();
        assert_eq!(*order.lock(), vec!["lifecycle", "filler"]);
        let req = transport.requests.lock().pop().unwrap();
        assert_eq!(req.header("X-Signature"), Some("sig"));
    }

    #[test]
    fn load_never_calls_listeners_synchronously() {
        let (registry, _transport) = registry();
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let ticket = registry
            .text()
            .url("/a")
            .load_with(move |_| *c.lock() += 1)
            .unwrap();
        assert_eq!(*calls.lock(), 0);
        assert!(ticket.is_pending());
    }

    #[test]
    fn rejected_load_calls_no_listener() {
        struct Rejecting;

        impl Transport for Rejecting {
            fn enqueue(&self, _request: TransportRequest, completer: Completer) {
                drop(completer);
            }

            fn cancel(&self, _seq_id: SeqId) {}
        }

        let registry = DispatchRegistry::new(Rejecting);
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let result = registry
            .text()
            .url("/a")
            .on_error(move |_| *c.lock() += 1)
            .load();

        assert!(matches!(result, Err(DispatchError::Rejected(_))));
        assert_eq!(*calls.lock(), 0);
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn client_override_routes_to_other_registry() {
        let (first, first_transport) = registry();
        let (second, second_transport) = registry();
        first.text().url("/a").client(second.clone()).load().unwrap();
        assert!(first_transport.requests.lock().is_empty());
        assert_eq!(second_transport.requests.lock().len(), 1);
        assert_eq!(second.in_flight(), 1);
    }

    #[test]
    fn download_file_sets_destination_at_construction() {
        let (registry, transport) = registry();
        let model = registry.download_file("/tmp/a.bin").url("/f");
        assert_eq!(model.request().file_path, Some(PathBuf::from("/tmp/a.bin")));
        assert!(!model.cancel());
        model.file_path("/tmp/b.bin").load().unwrap();
        let req = transport.requests.lock().pop().unwrap();
        assert_eq!(req.destination, Some(PathBuf::from("/tmp/b.bin")));
        assert_eq!(req.method, HttpMethod::Get);
    }

    #[test]
    fn ticket_cancel_is_idempotent() {
        let (registry, _transport) = registry();
        let ticket = registry.binary().url("/b").body(vec![1]).load().unwrap();
        assert!(ticket.cancel());
        assert!(!ticket.cancel());
        assert!(!registry.on_transport_success(ticket.seq_id(), TransportResponse::new(200)));
    }

    #[test]
    fn json_body_sets_content_type() {
        let (registry, transport) = registry();
        registry
            .json::<Value>()
            .url("/a")
            .method(HttpMethod::Post)
            .json_body(&serde_json::json!({"x": 1}))
            .unwrap()
            .load()
            .unwrap();
        let req = transport.requests.lock().pop().unwrap();
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.body.as_deref(), Some(&br#"{"x":1}"#[..]));
    }

    #[test]
    fn param_if_not_null_is_chainable() {
        let (registry, transport) = registry();
        registry
            .download()
            .url("/d")
            .param_if_not_null("a", None::<&str>)
            .param_if_not_null("b", Some("1"))
            .load()
            .unwrap();
        let req = transport.requests.lock().pop().unwrap();
        assert_eq!(req.url, "/d?b=1");
    }
}
