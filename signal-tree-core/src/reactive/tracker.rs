//! Usage Tracker
//!
//! Records which nodes a computation reads so that it can be re-run when
//! one of them changes.
//!
//! # Implementation
//!
//! A thread-local stack of recording frames, in the same style as the
//! transaction context. [`UsageTracker::track`] pushes a frame, runs the
//! closure and pops the frame again through a guard. Reads register into
//! the innermost frame only; an outer scope that wants the reads of an
//! inner one (see [`Computed`](super::Computed)) forwards them explicitly.

use std::cell::RefCell;

use super::usage::{Usage, UsageRecord};

thread_local! {
    static TRACKING_STACK: RefCell<Vec<TrackingFrame>> = const { RefCell::new(Vec::new()) };
}

enum TrackingFrame {
    Recording(Vec<UsageRecord>),
    Untracked,
}

/// Pops its frame when dropped.
struct TrackingScope {
    depth: usize,
    finished: bool,
}

impl TrackingScope {
    fn enter(frame: TrackingFrame) -> Self {
        let depth = TRACKING_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(frame);
            stack.len()
        });
        Self { depth, finished: false }
    }

    fn finish(mut self) -> Vec<UsageRecord> {
        self.finished = true;
        match self.pop() {
            Some(TrackingFrame::Recording(records)) => records,
            _ => Vec::new(),
        }
    }

    fn pop(&self) -> Option<TrackingFrame> {
        TRACKING_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "tracking scope mismatch");
            stack.pop()
        })
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Entry points for dependency tracking.
pub struct UsageTracker;

impl UsageTracker {
    /// Run `task` and collect every tracked read it makes.
    pub fn track<R, F>(task: F) -> (R, Usage)
    where
        F: FnOnce() -> R,
    {
        let scope = TrackingScope::enter(TrackingFrame::Recording(Vec::new()));
        let value = task();
        let records = scope.finish();
        (value, Usage::from_records(records))
    }

    /// Run `task` without registering its reads anywhere.
    pub fn untracked<R, F>(task: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _scope = TrackingScope::enter(TrackingFrame::Untracked);
        task()
    }

    /// Whether reads on this thread are currently being recorded.
    pub fn is_active() -> bool {
        TRACKING_STACK.with(|stack| {
            matches!(stack.borrow().last(), Some(TrackingFrame::Recording(_)))
        })
    }

    /// Register a read with the innermost tracking scope, if any.
    pub(crate) fn register(record: UsageRecord) {
        TRACKING_STACK.with(|stack| {
            if let Some(TrackingFrame::Recording(records)) = stack.borrow_mut().last_mut() {
                records.push(record);
            }
        });
    }

    /// Register every read of `usage` with the innermost tracking scope.
    pub fn register_usage(usage: &Usage) {
        TRACKING_STACK.with(|stack| {
            if let Some(TrackingFrame::Recording(records)) = stack.borrow_mut().last_mut() {
                records.extend(usage.records().iter().cloned());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Aspect, Id, SignalTree};

    fn record(tree: &SignalTree) -> UsageRecord {
        UsageRecord::observe(tree, Id::ZERO, Aspect::Value)
    }

    #[test]
    fn track_collects_registered_reads() {
        let tree = SignalTree::new();
        assert!(!UsageTracker::is_active());

        let ((), usage) = UsageTracker::track(|| {
            assert!(UsageTracker::is_active());
            UsageTracker::register(record(&tree));
        });

        assert!(!UsageTracker::is_active());
        assert_eq!(usage.records().len(), 1);
    }

    #[test]
    fn reads_outside_scope_are_ignored() {
        let tree = SignalTree::new();
        UsageTracker::register(record(&tree));

        let ((), usage) = UsageTracker::track(|| {});
        assert!(usage.is_empty());
    }

    #[test]
    fn nested_scopes_do_not_leak() {
        let tree = SignalTree::new();
        let other = SignalTree::new();

        let (inner, outer) = UsageTracker::track(|| {
            UsageTracker::register(record(&tree));
            let ((), inner) = UsageTracker::track(|| UsageTracker::register(record(&other)));
            inner
        });

        assert_eq!(outer.records().len(), 1);
        assert_eq!(inner.records().len(), 1);
        assert_ne!(outer, inner);
    }

    #[test]
    fn untracked_hides_reads() {
        let tree = SignalTree::new();

        let ((), usage) = UsageTracker::track(|| {
            UsageTracker::untracked(|| {
                assert!(!UsageTracker::is_active());
                UsageTracker::register(record(&tree));
            });
        });
        assert!(usage.is_empty());
    }

    #[test]
    fn forwarded_usage_joins_outer_scope() {
        let tree = SignalTree::new();
        let ((), inner) = UsageTracker::track(|| UsageTracker::register(record(&tree)));

        let ((), outer) = UsageTracker::track(|| UsageTracker::register_usage(&inner));
        assert_eq!(outer, inner);
    }

    #[test]
    fn scope_is_popped_on_panic() {
        let result = std::panic::catch_unwind(|| {
            UsageTracker::track(|| panic!("boom"));
        });
        assert!(result.is_err());
        assert!(!UsageTracker::is_active());
    }
}
