//! Capabilities shared by the signal façades.
//!
//! Every façade is a [`Signal`]: a node of a tree seen through a validator.
//! On top of that a façade can be [`Readable`], [`Writable`] when it holds
//! a single value, and a [`StructuralNode`] when it has children.

use std::sync::atomic::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::command::{CommandValidator, SignalCommand};
use crate::error::{Result, SignalError};
use crate::operation::{CancelableOperation, SignalOperation};
use crate::reactive::Computed;
use crate::transaction::run_in_transaction;
use crate::tree::{Accept, Aspect, Data, Id, SignalTree};

use super::core::{encode, encoding_failed, SignalCore};
use super::{ListSignal, MapSignal, NodeSignal, NumberSignal, ValueSignal};

/// A typed view of one node of a signal tree.
pub trait Signal: Sized + 'static {
    fn core(&self) -> &SignalCore;

    /// Create the façade for a node.
    fn from_core(core: SignalCore) -> Self;

    fn tree(&self) -> &SignalTree {
        self.core().tree()
    }

    fn id(&self) -> Id {
        self.core().id()
    }

    fn validator(&self) -> &CommandValidator {
        self.core().validator()
    }

    /// The same node, with `validator` restricting which commands may be
    /// submitted through it and through every signal derived from it.
    fn with_validator(&self, validator: CommandValidator) -> Self {
        Self::from_core(self.core().restricted(&validator))
    }

    /// The same node, refusing every change.
    fn as_readonly(&self) -> Self {
        self.with_validator(CommandValidator::reject_all())
    }

    /// Submit a raw command through this signal's validator and the active
    /// transaction.
    fn submit(&self, command: SignalCommand) -> SignalOperation<()> {
        self.core().submit_void(command)
    }

    /// Like [`submit`](Self::submit), resolving with `extract` applied to
    /// the accepted result.
    fn submit_with<R, F>(&self, command: SignalCommand, extract: F) -> SignalOperation<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(&Accept) -> R + 'static,
    {
        self.core().submit(command, extract)
    }

    fn as_node(&self) -> NodeSignal {
        NodeSignal::from_core(self.core().clone())
    }

    fn as_value<T>(&self) -> ValueSignal<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        ValueSignal::from_core(self.core().clone())
    }

    fn as_number(&self) -> NumberSignal {
        NumberSignal::from_core(self.core().clone())
    }

    fn as_list<T>(&self) -> ListSignal<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        ListSignal::from_core(self.core().clone())
    }

    fn as_map<T>(&self) -> MapSignal<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        MapSignal::from_core(self.core().clone())
    }
}

/// A signal whose content can be read.
pub trait Readable: Signal {
    type Value;

    /// The aspect of the node a tracked read depends on.
    const ASPECT: Aspect;

    /// Build the value from a node snapshot. `None` means the node is gone.
    fn extract(core: &SignalCore, data: Option<&Data>) -> Self::Value;

    /// Read the value, taking part in the active transaction and tracking
    /// scope.
    fn value(&self) -> Self::Value {
        let data = self.core().tracked_data(Self::ASPECT);
        Self::extract(self.core(), data.as_deref())
    }

    /// Read the value as the active transaction sees it, without tracking
    /// the read or making the transaction depend on it.
    fn peek(&self) -> Self::Value {
        let data = self.core().peek_data();
        Self::extract(self.core(), data.as_deref())
    }

    /// Read the value as the tree has it, ignoring uncommitted changes.
    fn peek_confirmed(&self) -> Self::Value {
        let data = self.core().confirmed_data();
        Self::extract(self.core(), data.as_deref())
    }

    /// A computed value applying `mapper` to this signal's value.
    fn map<U, F>(&self, mapper: F) -> Computed<U>
    where
        Self: Clone + Send + Sync,
        U: Clone + Send + 'static,
        F: Fn(Self::Value) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        Computed::new(move || mapper(source.value()))
    }
}

/// A signal holding a single value that can be replaced.
pub trait Writable: Readable
where
    Self::Value: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Replace the value. The operation resolves with the previous value.
    fn set(&self, value: Self::Value) -> SignalOperation<Self::Value> {
        let encoded = match encode(&value) {
            Ok(encoded) => encoded,
            Err(err) => return encoding_failed(err),
        };

        let core = self.core().clone();
        let id = core.id();
        self.core().submit(SignalCommand::set(id, Some(encoded)), move |accept| {
            Self::extract(&core, accept.old_data(id).map(|data| &**data))
        })
    }

    /// Replace the value only if it currently equals `expected`.
    fn replace(&self, expected: Self::Value, value: Self::Value) -> SignalOperation<()> {
        let (expected, value) = match (encode(&expected), encode(&value)) {
            (Ok(expected), Ok(value)) => (expected, value),
            (Err(err), _) | (_, Err(err)) => return encoding_failed(err),
        };

        let id = self.id();
        self.core().submit_void(SignalCommand::transaction(vec![
            SignalCommand::value_condition(id, Some(expected)),
            SignalCommand::set(id, Some(value)),
        ]))
    }

    /// Replace the value with `updater` applied to it.
    ///
    /// If someone else changes the value between reading it and writing
    /// the result, the update is retried with the new value. `updater` is
    /// therefore never applied to a stale value but may run more than once.
    /// The operation resolves with the value `updater` was applied to. It
    /// fails without retrying if the node is gone or a validator refuses
    /// the change.
    ///
    /// The loop runs before this returns, so the returned operation is
    /// already resolved; use [`update_with`](Self::update_with) to cancel
    /// it while it is still retrying.
    fn update<F>(&self, updater: F) -> CancelableOperation<Self::Value>
    where
        F: FnMut(Self::Value) -> Self::Value,
    {
        let operation = CancelableOperation::new();
        self.update_with(&operation, updater);
        operation
    }

    /// Like [`update`](Self::update), resolving `operation`.
    ///
    /// Cancelling `operation` from another thread, or from within
    /// `updater`, stops the loop before its next attempt with
    /// [`SignalError::Cancelled`].
    fn update_with<F>(&self, operation: &CancelableOperation<Self::Value>, updater: F)
    where
        F: FnMut(Self::Value) -> Self::Value,
    {
        run_update::<Self, F>(self.core(), operation, updater);
    }

    /// Check that the value equals `expected`, without changing anything.
    /// Mostly useful inside a transaction.
    fn verify_value(&self, expected: Self::Value) -> SignalOperation<()> {
        match encode(&expected) {
            Ok(expected) => self
                .core()
                .submit_void(SignalCommand::value_condition(self.id(), Some(expected))),
            Err(err) => encoding_failed(err),
        }
    }
}

/// A signal with children.
pub trait StructuralNode: Signal {
    /// Remove every child.
    fn clear(&self) -> SignalOperation<()> {
        self.core().submit_void(SignalCommand::clear(self.id()))
    }

    /// Remove `child` and its subtree. Fails unless `child` is a child of
    /// this node.
    fn remove_child<S: Signal>(&self, child: &S) -> SignalOperation<()> {
        self.core()
            .submit_void(SignalCommand::remove(child.id(), Some(self.id())))
    }
}

/// The retry loop behind [`Writable::update`], resolving `operation`.
fn run_update<S, F>(core: &SignalCore, operation: &CancelableOperation<S::Value>, mut updater: F)
where
    S: Readable,
    S::Value: Serialize + DeserializeOwned + Clone + Send + 'static,
    F: FnMut(S::Value) -> S::Value,
{
    let cancelled = operation.cancel_flag();
    let target = operation.operation().clone();

    loop {
        if cancelled.load(Ordering::SeqCst) {
            warn!(node = %core.id(), "update cancelled");
            target.complete(Err(SignalError::Cancelled));
            return;
        }

        let attempt = run_in_transaction(|| -> Result<S::Value> {
            let data = core.peek_data();
            let raw = data.as_ref().and_then(|data| data.value.clone());
            let current = S::extract(core, data.as_deref());

            let next = encode(&updater(current.clone()))?;
            core.submit_void(SignalCommand::transaction(vec![
                SignalCommand::value_condition(core.id(), raw),
                SignalCommand::set(core.id(), Some(next)),
            ]));
            Ok(current)
        });

        let previous = match attempt.return_value() {
            Ok(previous) => previous.clone(),
            Err(err) => {
                target.complete(Err(err.clone()));
                return;
            }
        };

        match attempt.result() {
            Some(Ok(())) => target.complete(Ok(previous)),
            // Only a failed condition means someone else got in between.
            Some(Err(err @ SignalError::PreconditionFailed { .. })) => {
                debug!(node = %core.id(), %err, "update conflicted, retrying");
                continue;
            }
            Some(Err(err)) => target.complete(Err(err)),
            None => {
                // Staged in an enclosing transaction; the outcome is known
                // when that commits.
                attempt.on_complete(move |result| {
                    target.complete(result.clone().map(|()| previous));
                });
            }
        }
        return;
    }
}
