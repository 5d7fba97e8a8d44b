//! Transactions
//!
//! Every submission goes through the transaction that is active on the
//! calling thread:
//!
//! - **Root**: no transaction. Commands are applied to the tree right away
//!   and their operations resolve before `submit` returns.
//! - **Staged**: inside [`run_in_transaction`]. Commands are collected and
//!   applied together when the closure returns, all or nothing. Reads see
//!   the transaction's own changes.
//! - **Write-through**: inside [`run_without_transaction`]. Behaves like the
//!   root even when a staged transaction encloses it.
//!
//! # Example
//!
//! ```rust,ignore
//! use signal_tree_core::{run_in_transaction, NumberSignal};
//!
//! let counter = NumberSignal::new(0.0);
//! let other = NumberSignal::new(0.0);
//!
//! let operation = run_in_transaction(|| {
//!     counter.increment_by(1.0);
//!     other.increment_by(2.0);
//! });
//!
//! assert!(operation.is_success());
//! assert_eq!(counter.peek(), 1.0);
//! assert_eq!(other.peek(), 2.0);
//! ```

mod context;
mod staged;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::command::SignalCommand;
use crate::error::SignalError;
use crate::operation::TransactionOperation;
use crate::tree::{Aspect, Data, Id, SignalTree};

use context::{ContextGuard, Frame};
pub(crate) use staged::ResultCallback;
use staged::StagedTransaction;

/// The transaction submissions on this thread currently go to.
#[derive(Clone)]
pub(crate) enum Transaction {
    Root,
    Staged(Rc<RefCell<StagedTransaction>>),
}

impl Transaction {
    pub(crate) fn current() -> Self {
        match ContextGuard::current() {
            Some(Frame::Staged(staged)) => Transaction::Staged(staged),
            Some(Frame::WriteThrough) | None => Transaction::Root,
        }
    }

    pub(crate) fn is_staged(&self) -> bool {
        matches!(self, Transaction::Staged(_))
    }

    /// Read a node as this transaction sees it.
    pub(crate) fn read(&self, tree: &SignalTree, id: Id) -> Option<Arc<Data>> {
        match self {
            Transaction::Root => tree.read(id),
            Transaction::Staged(staged) => staged.borrow_mut().read(tree, id),
        }
    }

    /// Submit a command. `callback` runs once the command's fate is known,
    /// which for a staged transaction is when it commits.
    pub(crate) fn include(
        &self,
        tree: &SignalTree,
        command: SignalCommand,
        callback: ResultCallback,
    ) {
        match self {
            Transaction::Root => {
                let (result, results) = tree.apply_collecting(&command);
                callback(&result, &results);
            }
            Transaction::Staged(staged) => staged.borrow_mut().include(tree, command, callback),
        }
    }

    /// Read a node for a caller that depends on `aspect` of it, together
    /// with the generation of that aspect the data belongs to.
    ///
    /// A staged transaction reports the generation as of its snapshot and
    /// fails at commit if the node has changed since.
    pub(crate) fn tracked_read(
        &self,
        tree: &SignalTree,
        id: Id,
        aspect: Aspect,
    ) -> (Option<Arc<Data>>, Option<u64>) {
        match self {
            Transaction::Root => tree.read_with_generation(id, aspect),
            Transaction::Staged(staged) => staged.borrow_mut().tracked_read(tree, id, aspect),
        }
    }

    /// Fail the transaction because a command was not allowed.
    pub(crate) fn reject(&self, error: SignalError) {
        if let Transaction::Staged(staged) = self {
            staged.borrow_mut().reject(error);
        }
    }
}

/// Run `task` in a staged transaction.
///
/// Changes made by `task` are applied when it returns, atomically across
/// every tree it touched. Nested calls commit into the enclosing
/// transaction. The returned operation resolves when the changes are
/// applied, or fails with the first error if they are not.
pub fn run_in_transaction<R, F>(task: F) -> TransactionOperation<R>
where
    F: FnOnce() -> R,
{
    let parent = Transaction::current();
    let staged = Rc::new(RefCell::new(StagedTransaction::default()));

    let value = {
        let _guard = ContextGuard::enter(Frame::Staged(Rc::clone(&staged)));
        task()
    };

    let staged = std::mem::take(&mut *staged.borrow_mut());
    TransactionOperation::new(value, staged.commit(parent))
}

/// Run `task` with every submission applied right away, even inside a
/// staged transaction.
pub fn run_without_transaction<R, F>(task: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ContextGuard::enter(Frame::WriteThrough);
    task()
}

/// Whether submissions on this thread are currently staged.
pub fn in_transaction() -> bool {
    Transaction::current().is_staged()
}
