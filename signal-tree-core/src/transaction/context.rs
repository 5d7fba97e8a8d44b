//! Transaction Context
//!
//! Tracks which transaction is active on the current thread. Code running
//! inside [`run_in_transaction`](super::run_in_transaction) sees the staged
//! transaction without it being passed around; code inside
//! [`run_without_transaction`](super::run_without_transaction) sees the
//! root context again.
//!
//! # Implementation
//!
//! A thread-local stack of frames. Entering a scope pushes a frame and
//! returns a guard that pops it when dropped, so the stack stays balanced
//! even if the scoped code panics.

use std::cell::RefCell;
use std::rc::Rc;

use super::staged::StagedTransaction;

thread_local! {
    static TRANSACTION_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One entry of the transaction stack.
#[derive(Clone)]
pub(crate) enum Frame {
    Staged(Rc<RefCell<StagedTransaction>>),
    WriteThrough,
}

impl Frame {
    fn same_as(&self, other: &Frame) -> bool {
        match (self, other) {
            (Frame::Staged(a), Frame::Staged(b)) => Rc::ptr_eq(a, b),
            (Frame::WriteThrough, Frame::WriteThrough) => true,
            _ => false,
        }
    }
}

/// Guard that pops its frame when dropped.
pub(crate) struct ContextGuard {
    frame: Frame,
}

impl ContextGuard {
    pub(crate) fn enter(frame: Frame) -> Self {
        TRANSACTION_STACK.with(|stack| stack.borrow_mut().push(frame.clone()));
        Self { frame }
    }

    /// The innermost frame, if any.
    pub(crate) fn current() -> Option<Frame> {
        TRANSACTION_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Number of frames on this thread's stack.
    pub(crate) fn depth() -> usize {
        TRANSACTION_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        TRANSACTION_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(frame) = popped {
                debug_assert!(
                    frame.same_as(&self.frame),
                    "transaction context mismatch"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_pops_on_drop() {
        assert_eq!(ContextGuard::depth(), 0);
        {
            let _guard = ContextGuard::enter(Frame::WriteThrough);
            assert_eq!(ContextGuard::depth(), 1);
            assert!(matches!(ContextGuard::current(), Some(Frame::WriteThrough)));
        }
        assert_eq!(ContextGuard::depth(), 0);
        assert!(ContextGuard::current().is_none());
    }

    #[test]
    fn nested_frames_unwind_in_order() {
        let staged = Rc::new(RefCell::new(StagedTransaction::default()));
        {
            let _outer = ContextGuard::enter(Frame::Staged(staged.clone()));
            {
                let _inner = ContextGuard::enter(Frame::WriteThrough);
                assert!(matches!(ContextGuard::current(), Some(Frame::WriteThrough)));
            }
            assert!(matches!(ContextGuard::current(), Some(Frame::Staged(_))));
        }
        assert!(ContextGuard::current().is_none());
    }

    #[test]
    fn stacks_are_per_thread() {
        let _guard = ContextGuard::enter(Frame::WriteThrough);
        let depth = std::thread::spawn(ContextGuard::depth).join().unwrap();
        assert_eq!(depth, 0);
    }
}
