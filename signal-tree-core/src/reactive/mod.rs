//! Reactive Primitives
//!
//! Dependency tracking on top of the signal tree's generation counters.
//!
//! # Concepts
//!
//! ## Usage tracking
//!
//! Reading a signal with `value()` inside [`UsageTracker::track`] records
//! the node, the aspect that was read (value or structure) and the
//! generation it had. The resulting [`Usage`] can later tell whether any of
//! those aspects has changed, or call a listener when one does.
//!
//! ## Effects
//!
//! An [`Effect`] re-runs a side-effecting closure whenever something it
//! read changes.
//!
//! ## Computed values
//!
//! A [`Computed`] caches a derived value and recomputes it on access when
//! something it read has changed.
//!
//! # Implementation Notes
//!
//! Tracking scopes are a thread-local stack. Only the innermost scope
//! records a read, so nested scopes never see each other's reads unless
//! they are forwarded on purpose.

mod computed;
mod effect;
mod tracker;
mod usage;

pub use computed::{Computed, ComputedState};
pub use effect::{Effect, EffectState};
pub use tracker::UsageTracker;
pub use usage::{Usage, UsageRecord, UsageRegistration};
