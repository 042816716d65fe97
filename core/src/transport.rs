//! The port to the external transport.
//!
//! # Design
//! The transport receives each adapted request together with a `Completer`
//! and reports exactly one outcome through it, from whatever thread or event
//! loop it runs on. The completer holds only a weak reference to the
//! registry, so a transport that outlives the registry cannot keep it alive
//! or deliver into it.

use std::sync::{Arc, Weak};

use crate::descriptor::SeqId;
use crate::error::TransportError;
use crate::http::{TransportRequest, TransportResponse};
use crate::registry::Shared;

/// An opaque request execution engine.
///
/// `enqueue` must not block on network completion. `cancel` is advisory: the
/// registry has already forgotten the request by the time it is called, so a
/// completion that still arrives is dropped.
///
/// An outcome reported on the calling thread before `enqueue` returns,
/// including a dropped `Completer`, counts as a rejection: `submit` returns
/// `DispatchError::Rejected` and no listener runs.
pub trait Transport: Send + Sync + 'static {
    fn enqueue(&self, request: TransportRequest, completer: Completer);

    fn cancel(&self, seq_id: SeqId);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn enqueue(&self, request: TransportRequest, completer: Completer) {
        (**self).enqueue(request, completer)
    }

    fn cancel(&self, seq_id: SeqId) {
        (**self).cancel(seq_id)
    }
}

/// One-shot completion handle for a submitted request.
///
/// Consumed by `success` or `error`. Dropping it without reporting an outcome
/// reports `TransportError::Abandoned`, unless it was detached with
/// `into_seq_id`.
#[derive(Debug)]
pub struct Completer {
    seq_id: SeqId,
    registry: Weak<Shared>,
    armed: bool,
}

impl Completer {
    pub(crate) fn new(seq_id: SeqId, registry: Weak<Shared>) -> Self {
        Self {
            seq_id,
            registry,
            armed: true,
        }
    }

    pub fn seq_id(&self) -> SeqId {
        self.seq_id
    }

    /// Report a response. Returns whether the request was still in flight.
    pub fn success(mut self, response: TransportResponse) -> bool {
        self.armed = false;
        match self.registry.upgrade() {
            Some(shared) => shared.complete(self.seq_id, Ok(response)),
            None => false,
        }
    }

    /// Report a failure. Returns whether the request was still in flight.
    pub fn error(mut self, error: TransportError) -> bool {
        self.armed = false;
        match self.registry.upgrade() {
            Some(shared) => shared.complete(self.seq_id, Err(error)),
            None => false,
        }
    }

    /// Give up the handle without reporting. The caller becomes responsible
    /// for completing the request through the registry by id.
    pub fn into_seq_id(mut self) -> SeqId {
        self.armed = false;
        self.seq_id
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(shared) = self.registry.upgrade() {
            shared.complete(self.seq_id, Err(TransportError::Abandoned));
        }
    }
}
