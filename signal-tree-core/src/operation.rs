//! Operation Handles
//!
//! Submitting a command returns a [`SignalOperation`] that is resolved
//! exactly once with the command's outcome. Outside a transaction the
//! synchronous tree resolves it before `submit` returns; inside a staged
//! transaction it resolves when the transaction commits. Callers should not
//! assume either and use [`SignalOperation::result`] or
//! [`SignalOperation::on_complete`].

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SignalError};

type Callback<R> = Box<dyn FnOnce(&Result<R>) + Send>;

enum Slot<R> {
    Pending(Vec<Callback<R>>),
    Done(Result<R>),
}

/// Pending result of a submitted command.
///
/// Clones share the same result slot.
pub struct SignalOperation<R> {
    slot: Arc<Mutex<Slot<R>>>,
}

impl<R> SignalOperation<R>
where
    R: Clone + Send + 'static,
{
    /// Create an unresolved operation.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Pending(Vec::new()))),
        }
    }

    /// Create an operation that is already resolved.
    pub fn resolved(result: Result<R>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Done(result))),
        }
    }

    /// Resolve the operation.
    ///
    /// # Panics
    ///
    /// If the operation was already resolved.
    pub(crate) fn complete(&self, result: Result<R>) {
        let callbacks = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Done(result.clone())) {
                Slot::Pending(callbacks) => callbacks,
                Slot::Done(previous) => {
                    panic!("operation resolved twice, first with {:?}", previous.err())
                }
            }
        };

        for callback in callbacks {
            callback(&result);
        }
    }

    /// Whether the operation has been resolved.
    pub fn is_done(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Done(_))
    }

    /// The outcome, if resolved.
    pub fn result(&self) -> Option<Result<R>> {
        match &*self.slot.lock() {
            Slot::Done(result) => Some(result.clone()),
            Slot::Pending(_) => None,
        }
    }

    /// Whether the operation resolved successfully.
    pub fn is_success(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Done(Ok(_)))
    }

    /// The error, if the operation resolved unsuccessfully.
    pub fn error(&self) -> Option<SignalError> {
        match &*self.slot.lock() {
            Slot::Done(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Run `callback` when the operation resolves, or right away if it
    /// already has.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Result<R>) + Send + 'static,
    {
        let result = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                Slot::Done(result) => result.clone(),
            }
        };
        callback(&result);
    }

    /// Create an operation resolved with this one's outcome mapped by `f`.
    pub fn map<U, F>(&self, f: F) -> SignalOperation<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(R) -> U + Send + 'static,
    {
        let mapped = SignalOperation::new();
        let target = mapped.clone();
        self.on_complete(move |result| target.complete(result.clone().map(f)));
        mapped
    }
}

impl<R> Default for SignalOperation<R>
where
    R: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for SignalOperation<R> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for SignalOperation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.lock() {
            Slot::Pending(callbacks) => f
                .debug_struct("SignalOperation")
                .field("pending_callbacks", &callbacks.len())
                .finish(),
            Slot::Done(result) => f
                .debug_struct("SignalOperation")
                .field("result", result)
                .finish(),
        }
    }
}

/// An operation backed by a retry loop that can be asked to stop.
///
/// Cancelling stops further retries; it does not roll back a change that
/// was already applied. An operation that succeeds before noticing the
/// cancellation stays successful.
pub struct CancelableOperation<R> {
    operation: SignalOperation<R>,
    cancelled: Arc<AtomicBool>,
}

impl<R> CancelableOperation<R>
where
    R: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            operation: SignalOperation::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the retry loop to stop.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// The underlying operation.
    pub fn operation(&self) -> &SignalOperation<R> {
        &self.operation
    }
}

impl<R> Default for CancelableOperation<R>
where
    R: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for CancelableOperation<R> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<R> Deref for CancelableOperation<R> {
    type Target = SignalOperation<R>;

    fn deref(&self) -> &Self::Target {
        &self.operation
    }
}

impl<R: fmt::Debug> fmt::Debug for CancelableOperation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelableOperation")
            .field("operation", &self.operation)
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .finish()
    }
}

/// An operation that inserts a node, with a signal for the new node.
///
/// The signal is usable right away; it reads as absent until the insert
/// has been applied and forever if the insert fails.
#[derive(Debug, Clone)]
pub struct InsertOperation<S> {
    operation: SignalOperation<()>,
    signal: S,
}

impl<S> InsertOperation<S> {
    pub(crate) fn new(operation: SignalOperation<()>, signal: S) -> Self {
        Self { operation, signal }
    }

    /// The signal for the inserted node.
    pub fn signal(&self) -> &S {
        &self.signal
    }

    pub fn into_signal(self) -> S {
        self.signal
    }
}

impl<S> Deref for InsertOperation<S> {
    type Target = SignalOperation<()>;

    fn deref(&self) -> &Self::Target {
        &self.operation
    }
}

/// Result of running a closure in a transaction.
#[derive(Debug, Clone)]
pub struct TransactionOperation<R> {
    value: R,
    operation: SignalOperation<()>,
}

impl<R> TransactionOperation<R> {
    pub(crate) fn new(value: R, operation: SignalOperation<()>) -> Self {
        Self { value, operation }
    }

    /// What the closure returned.
    pub fn return_value(&self) -> &R {
        &self.value
    }

    pub fn into_return_value(self) -> R {
        self.value
    }
}

impl<R> Deref for TransactionOperation<R> {
    type Target = SignalOperation<()>;

    fn deref(&self) -> &Self::Target {
        &self.operation
    }
}
