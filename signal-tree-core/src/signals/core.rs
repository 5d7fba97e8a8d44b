//! The part every signal façade shares: which node it points at and how
//! commands from it are submitted.

use std::any::type_name;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::command::{CommandValidator, SignalCommand};
use crate::error::{Result, SignalError};
use crate::operation::SignalOperation;
use crate::reactive::{UsageRecord, UsageTracker};
use crate::transaction::Transaction;
use crate::tree::{Accept, Aspect, CommandResult, Data, Id, ResultCollector, SignalTree};

/// A node of a tree as seen through a validator.
///
/// Two cores are equal when they point at the same node of the same tree
/// through the same validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalCore {
    tree: SignalTree,
    id: Id,
    validator: CommandValidator,
}

impl SignalCore {
    pub(crate) fn new(tree: SignalTree, id: Id, validator: CommandValidator) -> Self {
        Self { tree, id, validator }
    }

    /// The root of a fresh tree, optionally holding a value.
    pub(crate) fn fresh(value: Option<Value>) -> Self {
        let tree = SignalTree::new();
        if value.is_some() {
            tree.apply(&SignalCommand::set(Id::ZERO, value));
        }
        Self::new(tree, Id::ZERO, CommandValidator::anything_goes())
    }

    pub fn tree(&self) -> &SignalTree {
        &self.tree
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    /// Another node of the same tree, behind the same validator.
    pub(crate) fn child(&self, id: Id) -> Self {
        Self::new(self.tree.clone(), id, self.validator.clone())
    }

    pub(crate) fn restricted(&self, validator: &CommandValidator) -> Self {
        Self::new(self.tree.clone(), self.id, self.validator.and(validator))
    }

    /// Read the node for a caller that depends on `aspect` of it.
    pub(crate) fn tracked_data(&self, aspect: Aspect) -> Option<Arc<Data>> {
        let (data, generation) = Transaction::current().tracked_read(&self.tree, self.id, aspect);
        UsageTracker::register(UsageRecord::new(&self.tree, self.id, aspect, generation));
        data
    }

    /// Read the node as the active transaction sees it, without tracking.
    pub(crate) fn peek_data(&self) -> Option<Arc<Data>> {
        Transaction::current().read(&self.tree, self.id)
    }

    /// Read the node as the tree has it, ignoring staged changes.
    pub(crate) fn confirmed_data(&self) -> Option<Arc<Data>> {
        self.tree.read(self.id)
    }

    /// Submit a command and map an accepted result with `extract`.
    pub(crate) fn submit<R, F>(&self, command: SignalCommand, extract: F) -> SignalOperation<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(&Accept) -> R + 'static,
    {
        let operation = SignalOperation::new();
        let transaction = Transaction::current();

        if !self.validator.accepts(&command) {
            let error = SignalError::ValidationRejected {
                command: command.command_id(),
            };
            debug!(
                command = %command.command_id(),
                kind = command.kind(),
                "command rejected by validator"
            );
            transaction.reject(error.clone());
            operation.complete(Err(error));
            return operation;
        }

        let target = operation.clone();
        transaction.include(
            &self.tree,
            command,
            Box::new(move |result: &CommandResult, _: &ResultCollector| {
                target.complete(match result {
                    CommandResult::Accept(accept) => Ok(extract(accept)),
                    CommandResult::Reject(error) => Err(error.clone()),
                });
            }),
        );
        operation
    }

    /// Submit a command whose result carries nothing.
    pub(crate) fn submit_void(&self, command: SignalCommand) -> SignalOperation<()> {
        self.submit(command, |_| ())
    }
}

/// Encode a typed value for storage in the tree.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Decode a stored value into a façade's declared type.
///
/// # Panics
///
/// If the value does not fit `T`. A missing value is decoded from JSON
/// `null`, so it only fits types like `Option<_>` or `()`.
pub(crate) fn decode<T: DeserializeOwned>(id: Id, value: Option<&Value>) -> T {
    let value = value.cloned().unwrap_or(Value::Null);
    match serde_json::from_value(value) {
        Ok(decoded) => decoded,
        Err(err) => panic!("value of node {id} is not a {}: {err}", type_name::<T>()),
    }
}

/// Resolve an operation with an encoding error instead of submitting.
pub(crate) fn encoding_failed<R>(error: SignalError) -> SignalOperation<R>
where
    R: Clone + Send + 'static,
{
    SignalOperation::resolved(Err(error))
}
