//! Computed Values
//!
//! A [`Computed`] is a cached derived value that is recomputed only when
//! one of the node aspects it read has changed.
//!
//! # How It Works
//!
//! 1. On first access the computation runs inside
//!    [`UsageTracker::track`] and the value is cached with its [`Usage`].
//!
//! 2. On later accesses the cached usage is checked against the live
//!    generations. Nothing changed: the cached value is returned.
//!    Something changed: the computation runs again.
//!
//! 3. Either way the usage is forwarded to the caller's tracking scope, so
//!    an effect reading a computed value depends on what the computed value
//!    read.
//!
//! Staleness is only checked on access; nothing is recomputed eagerly.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::tracker::UsageTracker;
use super::usage::Usage;

/// Whether a [`Computed`] can return its cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// Never computed.
    Empty,
    /// The cached value is up to date.
    Clean,
    /// Something the cached value was computed from has changed.
    Stale,
}

struct Cache<T> {
    value: T,
    usage: Usage,
}

struct ComputedInner<T> {
    compute: Box<dyn Fn() -> T + Send + Sync>,
    cache: Mutex<Option<Cache<T>>>,
    computations: AtomicUsize,
}

/// A lazily computed, cached value derived from signals.
///
/// # Example
///
/// ```rust,ignore
/// use signal_tree_core::{Computed, ValueSignal};
///
/// let width = ValueSignal::new(2_i64);
/// let height = ValueSignal::new(3_i64);
///
/// let (w, h) = (width.clone(), height.clone());
/// let area = Computed::new(move || w.value() * h.value());
///
/// assert_eq!(area.get(), 6);
/// width.set(4);
/// assert_eq!(area.get(), 12);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputedInner {
                compute: Box::new(compute),
                cache: Mutex::new(None),
                computations: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the value, recomputing it if anything it read has changed.
    pub fn get(&self) -> T {
        {
            let cache = self.inner.cache.lock();
            if let Some(cache) = cache.as_ref() {
                if !cache.usage.has_changes() {
                    UsageTracker::register_usage(&cache.usage);
                    return cache.value.clone();
                }
            }
        }

        // The lock is not held while computing so the computation may read
        // other computed values freely.
        let (value, usage) = UsageTracker::track(|| (self.inner.compute)());
        self.inner.computations.fetch_add(1, Ordering::SeqCst);
        UsageTracker::register_usage(&usage);

        *self.inner.cache.lock() = Some(Cache {
            value: value.clone(),
            usage,
        });
        value
    }

    /// Get the cached value without checking whether it is stale.
    pub fn peek(&self) -> Option<T> {
        self.inner.cache.lock().as_ref().map(|cache| cache.value.clone())
    }

    pub fn state(&self) -> ComputedState {
        match self.inner.cache.lock().as_ref() {
            None => ComputedState::Empty,
            Some(cache) if cache.usage.has_changes() => ComputedState::Stale,
            Some(_) => ComputedState::Clean,
        }
    }

    /// Number of times the computation has run.
    pub fn computations(&self) -> usize {
        self.inner.computations.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("cached", &self.inner.cache.lock().is_some())
            .field("computations", &self.inner.computations.load(Ordering::SeqCst))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
