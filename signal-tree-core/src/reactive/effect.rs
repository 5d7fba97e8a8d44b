//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a node
//! it read changes.
//!
//! # How Effects Work
//!
//! 1. The effect runs its function inside [`UsageTracker::track`] to find
//!    out which node aspects it depends on.
//!
//! 2. It registers a listener on that [`Usage`]. The first real change to
//!    any of the aspects invalidates the effect.
//!
//! 3. An invalidated effect runs again right away, on the thread that made
//!    the change, and collects a fresh set of dependencies.
//!
//! # Lifecycle
//!
//! `Unscheduled` → (first run) `Tracking` → (dependency changed)
//! `Invalidated` → (re-run) `Tracking` → ... → (dispose) `Disposed`.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::tracker::UsageTracker;
use super::usage::{Usage, UsageRegistration};

/// Lifecycle state of an [`Effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    /// Created but never run.
    Unscheduled,
    /// Ran and is waiting for a dependency to change.
    Tracking,
    /// A dependency changed and the effect is about to run again.
    Invalidated,
    /// Stopped for good.
    Disposed,
}

struct EffectInner {
    id: u64,
    run: Box<dyn Fn() + Send + Sync>,
    state: Mutex<EffectState>,
    usage: Mutex<Usage>,
    registration: Mutex<Option<UsageRegistration>>,
    run_count: AtomicUsize,
}

/// A side-effecting computation that runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// use signal_tree_core::{Effect, ValueSignal};
///
/// let name = ValueSignal::new("a".to_string());
/// let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
///
/// let seen_clone = seen.clone();
/// let name_clone = name.clone();
/// let effect = Effect::new(move || seen_clone.lock().push(name_clone.value()));
///
/// name.set("b".to_string());
/// assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it right away.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create an effect without running it.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        Self {
            inner: Arc::new(EffectInner {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                run: Box::new(run),
                state: Mutex::new(EffectState::Unscheduled),
                usage: Mutex::new(Usage::none()),
                registration: Mutex::new(None),
                run_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Run the effect and start listening for changes to what it read.
    pub fn execute(&self) {
        Self::run(&self.inner);
    }

    fn run(inner: &Arc<EffectInner>) {
        if *inner.state.lock() == EffectState::Disposed {
            return;
        }

        // Stop listening to the previous run's dependencies.
        inner.registration.lock().take();

        let ((), usage) = UsageTracker::track(|| (inner.run)());
        inner.run_count.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = inner.state.lock();
            if *state == EffectState::Disposed {
                return;
            }
            *state = EffectState::Tracking;
        }
        trace!(effect = inner.id, dependencies = usage.records().len(), "effect ran");

        let weak: Weak<EffectInner> = Arc::downgrade(inner);
        let registration = usage.on_next_change(move |_| {
            if let Some(inner) = weak.upgrade() {
                Self::invalidate(&inner);
            }
            false
        });

        // An inactive registration means the listener already fired and a
        // nested run has registered its own.
        if registration.is_active() && *inner.state.lock() != EffectState::Disposed {
            *inner.usage.lock() = usage;
            *inner.registration.lock() = Some(registration);
        }
    }

    fn invalidate(inner: &Arc<EffectInner>) {
        {
            let mut state = inner.state.lock();
            if *state != EffectState::Tracking {
                return;
            }
            *state = EffectState::Invalidated;
        }
        Self::run(inner);
    }

    /// Stop the effect. It will not run again.
    pub fn dispose(&self) {
        *self.inner.state.lock() = EffectState::Disposed;
        self.inner.registration.lock().take();
    }

    pub fn state(&self) -> EffectState {
        *self.inner.state.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == EffectState::Disposed
    }

    /// Number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of node aspects the last run depended on.
    pub fn dependency_count(&self) -> usize {
        self.inner.usage.lock().records().len()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{Readable, Signal, ValueSignal, Writable};
    use crate::tree::Id;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.state(), EffectState::Tracking);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let effect = Effect::new_lazy(|| {});
        assert_eq!(effect.state(), EffectState::Unscheduled);
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.state(), EffectState::Tracking);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let signal = ValueSignal::new(1_i32);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let signal_clone = signal.clone();
        let effect = Effect::new(move || seen_clone.lock().push(signal_clone.value()));
        assert_eq!(effect.dependency_count(), 1);

        signal.set(2);
        signal.set(3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(effect.run_count(), 3);
        assert_eq!(effect.state(), EffectState::Tracking);
    }

    #[test]
    fn effect_ignores_peeked_and_unrelated_signals() {
        let tracked = ValueSignal::new(0_i32);
        let peeked = ValueSignal::new(0_i32);
        let unrelated = ValueSignal::new(0_i32);

        let tracked_clone = tracked.clone();
        let peeked_clone = peeked.clone();
        let effect = Effect::new(move || {
            tracked_clone.value();
            peeked_clone.peek();
        });

        peeked.set(1);
        unrelated.set(1);
        assert_eq!(effect.run_count(), 1);

        tracked.set(1);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = ValueSignal::new(0_i32);
        let signal_clone = signal.clone();
        let effect = Effect::new(move || {
            signal_clone.value();
        });

        effect.dispose();
        assert!(effect.is_disposed());

        signal.set(1);
        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        effect1.execute();
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }

    #[test]
    fn effect_is_invalidated_while_rerunning() {
        let signal = ValueSignal::new(0_i32);
        let slot: Arc<Mutex<Option<Effect>>> = Arc::new(Mutex::new(None));
        let states = Arc::new(Mutex::new(Vec::new()));

        let signal_clone = signal.clone();
        let (slot_clone, states_clone) = (slot.clone(), states.clone());
        let effect = Effect::new_lazy(move || {
            signal_clone.value();
            if let Some(effect) = slot_clone.lock().as_ref() {
                states_clone.lock().push(effect.state());
            }
        });
        *slot.lock() = Some(effect.clone());

        effect.execute();
        signal.set(1);

        assert_eq!(*states.lock(), vec![EffectState::Unscheduled, EffectState::Invalidated]);
        assert_eq!(effect.state(), EffectState::Tracking);
        slot.lock().take();
    }

    #[test]
    fn reruns_do_not_pile_up_observers() {
        let a = ValueSignal::new(0_i32);
        let b = ValueSignal::new(0_i32);

        let (a_clone, b_clone) = (a.clone(), b.clone());
        let effect = Effect::new(move || {
            a_clone.value();
            b_clone.value();
        });

        for i in 1..=1000 {
            a.set(i);
        }

        assert_eq!(effect.run_count(), 1001);
        assert_eq!(a.tree().observer_count(Id::ZERO), 1);
        assert_eq!(b.tree().observer_count(Id::ZERO), 1);

        effect.dispose();
        assert_eq!(b.tree().observer_count(Id::ZERO), 0);
    }
}
