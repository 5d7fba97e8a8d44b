//! Typed Signal Façades
//!
//! A signal is a cheap handle on one node of a [`SignalTree`]: the tree, the
//! node id and the [`CommandValidator`] that gates commands submitted
//! through it. The façades differ only in how they read the node and which
//! commands they offer:
//!
//! | Façade           | Reads                          | Depends on   |
//! |------------------|--------------------------------|--------------|
//! | [`ValueSignal`]  | the value, decoded as `T`      | value        |
//! | [`NumberSignal`] | the value as `f64`             | value        |
//! | [`ListSignal`]   | list children as value signals | structure    |
//! | [`MapSignal`]    | map children as value signals  | structure    |
//! | [`NodeSignal`]   | value, parent and children     | whole node   |
//!
//! Shared behavior lives in the capability traits [`Signal`], [`Readable`],
//! [`Writable`] and [`StructuralNode`], so bring them into scope to call
//! `value()`, `set()` and friends.
//!
//! [`SignalTree`]: crate::tree::SignalTree
//! [`CommandValidator`]: crate::command::CommandValidator

mod core;
mod list;
mod map;
mod node;
pub(crate) mod traits;
mod value;

pub use self::core::SignalCore;
pub use list::ListSignal;
pub use map::MapSignal;
pub use node::{NodeContent, NodeSignal};
pub use traits::{Readable, Signal, StructuralNode, Writable};
pub use value::{NumberSignal, ValueSignal};
