//! Signal Tree Engine
//!
//! This module implements the authoritative store: a tree of nodes, each
//! holding an optional JSON value, an ordered list of children and a keyed
//! map of children.
//!
//! # Overview
//!
//! - [`Id`] identifies nodes and commands.
//! - [`Data`] is the immutable snapshot of one node.
//! - [`TreeRevision`] is a full node map plus the command interpreter.
//! - [`SignalTree`] owns the current revision, serializes access to it and
//!   tracks generations for usage tracking.
//!
//! # Invariants
//!
//! 1. The root ([`Id::ZERO`]) always exists and has no parent.
//! 2. Every other node is a child of exactly one parent, in either its list
//!    or its map.
//! 3. No node is its own ancestor.
//! 4. A command is applied completely or not at all; a transaction likewise.

mod id;
mod node;
mod result;
mod revision;
mod signal_tree;

pub use id::Id;
pub use node::{Data, ListPosition};
pub use result::{Accept, CommandResult, NodeModification};
pub use revision::{ResultCollector, TreeRevision};
pub(crate) use signal_tree::GenerationSnapshot;
pub use signal_tree::{Aspect, ObserverHandle, ProcessedSubscription, SignalTree, TreeGuard};
