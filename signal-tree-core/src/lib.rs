//! Signal Tree Core
//!
//! This crate provides a transactional, hierarchical store of shared state
//! with fine-grained change tracking. It implements:
//!
//! - A tree of nodes, each with a JSON value, list children and map children
//! - A command algebra applied atomically, including nested transactions
//! - Validators gating which commands a signal may submit
//! - Typed signal façades (value, number, list, map, node)
//! - Usage tracking with effects and computed values on top
//!
//! # Architecture
//!
//! - `tree`: node snapshots, the command interpreter and the locking tree
//! - `command`: the command algebra, validators and the wire codec
//! - `transaction`: ambient transactions and their commit protocol
//! - `operation`: handles for the outcome of submitted commands
//! - `reactive`: usage tracking, effects and computed values
//! - `signals`: the typed façades
//!
//! # Example
//!
//! ```rust,ignore
//! use signal_tree_core::{run_in_transaction, Effect, ListSignal, Readable, ValueSignal, Writable};
//!
//! let name = ValueSignal::new("Ada".to_string());
//! let todos = ListSignal::<String>::new();
//!
//! // Re-runs whenever the name or the set of todos changes.
//! let name_clone = name.clone();
//! let todos_clone = todos.clone();
//! Effect::new(move || {
//!     println!("{} has {} todos", name_clone.value(), todos_clone.value().len());
//! });
//!
//! // Both changes become visible together, or not at all.
//! run_in_transaction(|| {
//!     name.set("Grace".to_string());
//!     todos.insert_last("compile".to_string());
//! });
//! ```

pub mod command;
pub mod error;
pub mod operation;
pub mod reactive;
pub mod signals;
pub mod transaction;
pub mod tree;

pub use command::{CommandValidator, KeyExpectation, SignalCommand};
pub use error::{Result, SignalError};
pub use operation::{CancelableOperation, InsertOperation, SignalOperation, TransactionOperation};
pub use reactive::{Computed, Effect, Usage, UsageTracker};
pub use signals::{
    ListSignal, MapSignal, NodeContent, NodeSignal, NumberSignal, Readable, Signal, StructuralNode,
    ValueSignal, Writable,
};
pub use transaction::{in_transaction, run_in_transaction, run_without_transaction};
pub use tree::{Id, ListPosition, SignalTree};
