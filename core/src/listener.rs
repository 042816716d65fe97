//! Caller callbacks.
//!
//! Listeners are boxed `FnOnce` closures captured at registration time. The
//! registry consumes a `RequestListener` when it delivers, which is what makes
//! "at most one invocation" a property of the types rather than of listener
//! bookkeeping.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::SeqId;
use crate::error::ModelError;
use crate::http::ResponseMeta;

pub type SuccessFn<T> = Box<dyn FnOnce(SeqId, ResponseMeta, Option<T>) + Send>;
pub type ErrorFn = Box<dyn FnOnce(SeqId, ModelError) + Send>;

/// Success and error callbacks for one submitted request. Either may be
/// absent, in which case that outcome is dropped silently.
pub struct RequestListener<T> {
    success: Option<SuccessFn<T>>,
    error: Option<ErrorFn>,
}

impl<T: Send + 'static> RequestListener<T> {
    pub fn new() -> Self {
        Self {
            success: None,
            error: None,
        }
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SeqId, ResponseMeta, Option<T>) + Send + 'static,
    {
        self.success = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SeqId, ModelError) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    /// One callback for both outcomes.
    pub fn on_both<F>(self, f: F) -> Self
    where
        F: FnOnce(SeqId, Result<(ResponseMeta, Option<T>), ModelError>) + Send + 'static,
    {
        let (success, error) = split_once(
            move |(seq, result): (SeqId, Result<(ResponseMeta, Option<T>), ModelError>)| {
                f(seq, result)
            },
        );
        self.on_success(move |seq, meta, data| success((seq, Ok((meta, data)))))
            .on_error(move |seq, err| error((seq, Err(err))))
    }

    pub(crate) fn success(self, seq_id: SeqId, meta: ResponseMeta, data: Option<T>) {
        if let Some(f) = self.success {
            f(seq_id, meta, data);
        }
    }

    pub(crate) fn error(self, seq_id: SeqId, error: ModelError) {
        if let Some(f) = self.error {
            f(seq_id, error);
        }
    }
}

impl<T: Send + 'static> Default for RequestListener<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Share one `FnOnce` between two callback slots. Whichever half runs first
/// takes the closure; the other half then does nothing.
pub(crate) fn split_once<F, A>(f: F) -> (impl FnOnce(A) + Send, impl FnOnce(A) + Send)
where
    F: FnOnce(A) + Send + 'static,
    A: 'static,
{
    let shared = Arc::new(Mutex::new(Some(f)));
    let other = Arc::clone(&shared);
    let first = move |arg: A| {
        if let Some(f) = shared.lock().take() {
            f(arg);
        }
    };
    let second = move |arg: A| {
        if let Some(f) = other.lock().take() {
            f(arg);
        }
    };
    (first, second)
}
