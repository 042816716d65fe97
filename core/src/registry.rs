//! The dispatch registry: sequence ids, in-flight bookkeeping and
//! exactly-once delivery.
//!
//! # Design
//! All mutable shared state (the id counter, the pending table and the
//! shutdown flag) sits behind one mutex. Every path that ends a request
//! (success, error, cancel, shutdown) starts with a remove from the pending
//! table under that mutex; whichever path removes the entry owns delivery and
//! every other path sees a miss and does nothing. The lock is never held while
//! calling into the transport, the header injector or a listener, so any of
//! them may call back into the registry.
//!
//! Policies and the header injector are fixed when the registry is built and
//! read without locking afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::adapter::KindAdapter;
use crate::config::DispatchConfig;
use crate::descriptor::{RequestDescriptor, SeqId};
use crate::error::{DispatchError, ModelError, TransportError};
use crate::http::{RequestKind, TransportResponse};
use crate::listener::RequestListener;
use crate::policy::{PolicyTable, RetryPolicy};
use crate::transport::{Completer, Transport};

/// Supplies extra headers for requests flagged with `fill_extra_headers`.
///
/// Called synchronously on the submitting thread. Returned headers replace
/// descriptor headers of the same name.
pub trait HeaderInjector: Send + Sync + 'static {
    fn extra_headers(&self, descriptor: &RequestDescriptor) -> Vec<(String, String)>;
}

impl<F> HeaderInjector for F
where
    F: Fn(&RequestDescriptor) -> Vec<(String, String)> + Send + Sync + 'static,
{
    fn extra_headers(&self, descriptor: &RequestDescriptor) -> Vec<(String, String)> {
        self(descriptor)
    }
}

/// Type-erased "unwrap and notify" step stored in a pending entry.
trait Delivery: Send {
    fn deliver(self: Box<Self>, seq_id: SeqId, outcome: Result<TransportResponse, TransportError>);
}

struct TypedDelivery<A: KindAdapter> {
    adapter: A,
    listener: RequestListener<A::Output>,
}

impl<A: KindAdapter> Delivery for TypedDelivery<A> {
    fn deliver(self: Box<Self>, seq_id: SeqId, outcome: Result<TransportResponse, TransportError>) {
        let TypedDelivery { adapter, listener } = *self;
        let result = outcome.map_err(ModelError::from).and_then(|response| {
            check_status(&response)?;
            adapter.unwrap(response)
        });
        match result {
            Ok((meta, data)) => listener.success(seq_id, meta, data),
            Err(e) => listener.error(seq_id, e),
        }
    }
}

/// Map non-success status codes to an `HttpStatus` error.
fn check_status(response: &TransportResponse) -> Result<(), ModelError> {
    if response.is_success() {
        return Ok(());
    }
    Err(ModelError::http_status(
        response.status,
        response.body.as_deref(),
    ))
}

/// The submitted descriptor is kept read-only here until the request ends.
struct PendingEntry {
    kind: RequestKind,
    descriptor: RequestDescriptor,
    delivery: Box<dyn Delivery>,
    /// Thread currently inside `Transport::enqueue` for this entry.
    enqueuing: Option<ThreadId>,
    /// Outcome reported synchronously from inside `enqueue`.
    rejection: Option<String>,
}

#[derive(Default)]
struct State {
    last_seq: u64,
    pending: HashMap<SeqId, PendingEntry>,
    shut_down: bool,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    transport: Arc<dyn Transport>,
    policies: PolicyTable,
    injector: Option<Arc<dyn HeaderInjector>>,
}

impl Shared {
    /// Remove the entry for `seq_id` and deliver `outcome` to its listener.
    /// Returns `false` when the request was no longer in flight.
    pub(crate) fn complete(
        &self,
        seq_id: SeqId,
        outcome: Result<TransportResponse, TransportError>,
    ) -> bool {
        let entry = {
            let mut state = self.state.lock();
            if let Some(entry) = state.pending.get_mut(&seq_id) {
                // Completing from inside `enqueue` on the submitting thread
                // would run the listener inside `submit`.
                if entry.enqueuing == Some(thread::current().id()) {
                    let first = entry.rejection.is_none();
                    if first {
                        entry.rejection = Some(rejection_reason(&outcome));
                    }
                    return first;
                }
            }
            state.pending.remove(&seq_id)
        };
        let Some(PendingEntry {
            kind,
            descriptor,
            delivery,
            ..
        }) = entry
        else {
            tracing::trace!(%seq_id, "completion for request no longer in flight");
            return false;
        };

        let url = descriptor.url;
        tracing::debug!(%seq_id, %kind, %url, ok = outcome.is_ok(), "request completed");
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| delivery.deliver(seq_id, outcome))) {
            tracing::error!(
                %seq_id,
                %kind,
                %url,
                panic = panic_message(&*panic),
                "listener panicked during delivery"
            );
        }
        true
    }

    fn cancel(&self, seq_id: SeqId) -> bool {
        let entry = self.state.lock().pending.remove(&seq_id);
        match entry {
            Some(entry) => {
                tracing::debug!(%seq_id, kind = %entry.kind, url = %entry.descriptor.url, "request cancelled");
                self.transport.cancel(seq_id);
                true
            }
            None => false,
        }
    }
}

fn rejection_reason(outcome: &Result<TransportResponse, TransportError>) -> String {
    match outcome {
        Ok(response) => format!(
            "completed with status {} before enqueue returned",
            response.status
        ),
        Err(e) => e.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle to a dispatch registry. Cloning is cheap; all clones share the same
/// id space and pending table.
#[derive(Clone)]
pub struct DispatchRegistry {
    shared: Arc<Shared>,
}

impl DispatchRegistry {
    /// Registry with the default configuration.
    pub fn new(transport: impl Transport) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: impl Transport) -> RegistryBuilder {
        RegistryBuilder {
            transport: Arc::new(transport),
            policies: PolicyTable::default(),
            injector: None,
        }
    }

    /// Assign an id, record the pending entry and hand the adapted request to
    /// the transport. Never waits for the network.
    ///
    /// A transport that completes the request on the calling thread before
    /// `enqueue` returns (for example by dropping its `Completer`) gets
    /// `DispatchError::Rejected`. The listener is dropped uncalled.
    pub fn submit<A: KindAdapter>(
        &self,
        mut descriptor: RequestDescriptor,
        adapter: A,
        listener: RequestListener<A::Output>,
    ) -> Result<SeqId, DispatchError> {
        let seq_id = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return Err(DispatchError::ShutDown);
            }
            state.last_seq += 1;
            SeqId::new(state.last_seq)
        };
        descriptor.assign_seq_id(seq_id);

        let kind = adapter.kind();
        let mut request = adapter.adapt(seq_id, &descriptor);
        request.retry = self.shared.policies.get(kind);
        if descriptor.fill_extra_headers {
            if let Some(injector) = &self.shared.injector {
                for (name, value) in injector.extra_headers(&descriptor) {
                    request.set_header(name, value);
                }
            }
        }

        let entry = PendingEntry {
            kind,
            descriptor,
            delivery: Box::new(TypedDelivery { adapter, listener }),
            enqueuing: Some(thread::current().id()),
            rejection: None,
        };
        {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return Err(DispatchError::ShutDown);
            }
            state.pending.insert(seq_id, entry);
        }

        tracing::debug!(%seq_id, %kind, method = %request.method, url = %request.url, "request submitted");
        let completer = Completer::new(seq_id, Arc::downgrade(&self.shared));
        self.shared.transport.enqueue(request, completer);

        let rejection = {
            let mut state = self.shared.state.lock();
            let rejected = match state.pending.get_mut(&seq_id) {
                Some(entry) => {
                    entry.enqueuing = None;
                    entry.rejection.is_some()
                }
                None => false,
            };
            if rejected {
                state.pending.remove(&seq_id).and_then(|e| e.rejection)
            } else {
                None
            }
        };
        match rejection {
            Some(reason) => {
                tracing::warn!(%seq_id, %kind, %reason, "transport rejected request");
                Err(DispatchError::Rejected(reason))
            }
            None => Ok(seq_id),
        }
    }

    /// Deliver a response for `seq_id`. Returns `false` (and does nothing)
    /// when the request already completed or was cancelled.
    pub fn on_transport_success(&self, seq_id: SeqId, response: TransportResponse) -> bool {
        self.shared.complete(seq_id, Ok(response))
    }

    /// Deliver a transport failure for `seq_id`. Same miss semantics as
    /// `on_transport_success`.
    pub fn on_transport_error(&self, seq_id: SeqId, error: TransportError) -> bool {
        self.shared.complete(seq_id, Err(error))
    }

    /// Forget the request and ask the transport to abandon it. No listener is
    /// invoked. Returns whether the request was in flight.
    pub fn cancel(&self, seq_id: SeqId) -> bool {
        self.shared.cancel(seq_id)
    }

    /// Drop every in-flight request without notifying listeners and refuse
    /// further submissions. Returns the number of requests dropped.
    pub fn shutdown(&self) -> usize {
        let drained = {
            let mut state = self.shared.state.lock();
            state.shut_down = true;
            std::mem::take(&mut state.pending)
        };
        for seq_id in drained.keys() {
            self.shared.transport.cancel(*seq_id);
        }
        tracing::debug!(dropped = drained.len(), "dispatch registry shut down");
        drained.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_pending(&self, seq_id: SeqId) -> bool {
        self.shared.state.lock().pending.contains_key(&seq_id)
    }

    pub fn policy(&self, kind: RequestKind) -> RetryPolicy {
        self.shared.policies.get(kind)
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DispatchRegistry")
            .field("last_seq", &state.last_seq)
            .field("in_flight", &state.pending.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

/// Configures a `DispatchRegistry` before any request is submitted.
///
/// `config` resets the whole policy table, so call it before `policy`.
pub struct RegistryBuilder {
    transport: Arc<dyn Transport>,
    policies: PolicyTable,
    injector: Option<Arc<dyn HeaderInjector>>,
}

impl RegistryBuilder {
    pub fn config(mut self, config: &DispatchConfig) -> Self {
        self.policies = PolicyTable::from_config(config);
        self
    }

    pub fn default_policy(mut self, policy: RetryPolicy) -> Self {
        self.policies.set_default(policy);
        self
    }

    pub fn policy(mut self, kind: RequestKind, policy: RetryPolicy) -> Self {
        self.policies.set(kind, policy);
        self
    }

    pub fn header_injector(mut self, injector: impl HeaderInjector) -> Self {
        self.injector = Some(Arc::new(injector));
        self
    }

    pub fn build(self) -> DispatchRegistry {
        DispatchRegistry {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                transport: self.transport,
                policies: self.policies,
                injector: self.injector,
            }),
        }
    }
}
