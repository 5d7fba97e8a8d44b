//! Signal Commands
//!
//! Every change to a signal tree is expressed as a [`SignalCommand`]. A
//! command is an immutable value with its own fresh [`Id`]; it is applied
//! at most once. Commands come in three groups:
//!
//! - Mutations: set, increment, insert, put, adopt, remove, clear.
//! - Conditions: checks that never change the tree but make an enclosing
//!   transaction fail when they do not hold.
//! - Transactions: an ordered list of commands applied all-or-nothing.
//!
//! Commands that create a node use their own command id as the id of the
//! new node. All commands serialize to a JSON or MessagePack wire form (see
//! [`codec`]) so that they can be shipped to another tree unchanged.

pub mod codec;
mod validator;

pub use validator::CommandValidator;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::{Id, ListPosition};

/// Where an inserted node is attached to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// A list child at the given position.
    Position(ListPosition),
    /// A map child under the given key. Fails if the key is in use.
    Key(String),
}

/// What a [`SignalCommand::KeyCondition`] expects to find under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExpectation {
    /// Any child.
    Present,
    /// No child.
    Absent,
    /// This specific child.
    Child(Id),
}

/// A command against a signal tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalCommand {
    /// Replace the value of a node.
    Set {
        command_id: Id,
        target: Id,
        value: Option<Value>,
    },

    /// Add to the numeric value of a node. A missing value counts as zero.
    Increment {
        command_id: Id,
        target: Id,
        delta: f64,
    },

    /// Create a node with id `command_id` and attach it to `target`.
    Insert {
        command_id: Id,
        target: Id,
        slot: Slot,
        value: Option<Value>,
    },

    /// Set the value of the map child under `key`, creating it if missing.
    Put {
        command_id: Id,
        target: Id,
        key: String,
        value: Option<Value>,
    },

    /// Create a map child under `key` unless one is already there.
    PutIfAbsent {
        command_id: Id,
        target: Id,
        key: String,
        value: Option<Value>,
    },

    /// Move an existing node into the child list of `target`.
    AdoptAt {
        command_id: Id,
        target: Id,
        child: Id,
        position: ListPosition,
    },

    /// Move an existing node into the child map of `target`.
    AdoptAs {
        command_id: Id,
        target: Id,
        child: Id,
        key: String,
    },

    /// Detach a node and drop its subtree.
    Remove {
        command_id: Id,
        target: Id,
        expected_parent: Option<Id>,
    },

    /// Remove the map child under `key`.
    RemoveByKey {
        command_id: Id,
        target: Id,
        key: String,
    },

    /// Remove all children of a node.
    Clear { command_id: Id, target: Id },

    /// Holds if the node's value equals `expected`. A missing value and
    /// JSON `null` are the same.
    ValueCondition {
        command_id: Id,
        target: Id,
        expected: Option<Value>,
    },

    /// Holds if `child` is a list child of `target` at `position`. Unset
    /// anchors are not checked.
    PositionCondition {
        command_id: Id,
        target: Id,
        child: Id,
        position: ListPosition,
    },

    /// Holds if the map child under `key` matches `expected`.
    KeyCondition {
        command_id: Id,
        target: Id,
        key: String,
        expected: KeyExpectation,
    },

    /// Holds if the node was last modified by command `expected`.
    LastUpdateCondition {
        command_id: Id,
        target: Id,
        expected: Id,
    },

    /// Apply all commands in order, or none of them.
    Transaction {
        command_id: Id,
        commands: Vec<SignalCommand>,
    },
}

impl SignalCommand {
    pub fn set(target: Id, value: Option<Value>) -> Self {
        SignalCommand::Set {
            command_id: Id::random(),
            target,
            value,
        }
    }

    pub fn increment(target: Id, delta: f64) -> Self {
        SignalCommand::Increment {
            command_id: Id::random(),
            target,
            delta,
        }
    }

    pub fn insert(target: Id, position: ListPosition, value: Option<Value>) -> Self {
        SignalCommand::Insert {
            command_id: Id::random(),
            target,
            slot: Slot::Position(position),
            value,
        }
    }

    pub fn insert_as(target: Id, key: impl Into<String>, value: Option<Value>) -> Self {
        SignalCommand::Insert {
            command_id: Id::random(),
            target,
            slot: Slot::Key(key.into()),
            value,
        }
    }

    pub fn put(target: Id, key: impl Into<String>, value: Option<Value>) -> Self {
        SignalCommand::Put {
            command_id: Id::random(),
            target,
            key: key.into(),
            value,
        }
    }

    pub fn put_if_absent(target: Id, key: impl Into<String>, value: Option<Value>) -> Self {
        SignalCommand::PutIfAbsent {
            command_id: Id::random(),
            target,
            key: key.into(),
            value,
        }
    }

    pub fn adopt_at(target: Id, child: Id, position: ListPosition) -> Self {
        SignalCommand::AdoptAt {
            command_id: Id::random(),
            target,
            child,
            position,
        }
    }

    pub fn adopt_as(target: Id, child: Id, key: impl Into<String>) -> Self {
        SignalCommand::AdoptAs {
            command_id: Id::random(),
            target,
            child,
            key: key.into(),
        }
    }

    pub fn remove(target: Id, expected_parent: Option<Id>) -> Self {
        SignalCommand::Remove {
            command_id: Id::random(),
            target,
            expected_parent,
        }
    }

    pub fn remove_by_key(target: Id, key: impl Into<String>) -> Self {
        SignalCommand::RemoveByKey {
            command_id: Id::random(),
            target,
            key: key.into(),
        }
    }

    pub fn clear(target: Id) -> Self {
        SignalCommand::Clear {
            command_id: Id::random(),
            target,
        }
    }

    pub fn value_condition(target: Id, expected: Option<Value>) -> Self {
        SignalCommand::ValueCondition {
            command_id: Id::random(),
            target,
            expected,
        }
    }

    pub fn position_condition(target: Id, child: Id, position: ListPosition) -> Self {
        SignalCommand::PositionCondition {
            command_id: Id::random(),
            target,
            child,
            position,
        }
    }

    pub fn key_condition(target: Id, key: impl Into<String>, expected: KeyExpectation) -> Self {
        SignalCommand::KeyCondition {
            command_id: Id::random(),
            target,
            key: key.into(),
            expected,
        }
    }

    pub fn last_update_condition(target: Id, expected: Id) -> Self {
        SignalCommand::LastUpdateCondition {
            command_id: Id::random(),
            target,
            expected,
        }
    }

    pub fn transaction(commands: Vec<SignalCommand>) -> Self {
        SignalCommand::Transaction {
            command_id: Id::random(),
            commands,
        }
    }

    /// The command's own id.
    pub fn command_id(&self) -> Id {
        match self {
            SignalCommand::Set { command_id, .. }
            | SignalCommand::Increment { command_id, .. }
            | SignalCommand::Insert { command_id, .. }
            | SignalCommand::Put { command_id, .. }
            | SignalCommand::PutIfAbsent { command_id, .. }
            | SignalCommand::AdoptAt { command_id, .. }
            | SignalCommand::AdoptAs { command_id, .. }
            | SignalCommand::Remove { command_id, .. }
            | SignalCommand::RemoveByKey { command_id, .. }
            | SignalCommand::Clear { command_id, .. }
            | SignalCommand::ValueCondition { command_id, .. }
            | SignalCommand::PositionCondition { command_id, .. }
            | SignalCommand::KeyCondition { command_id, .. }
            | SignalCommand::LastUpdateCondition { command_id, .. }
            | SignalCommand::Transaction { command_id, .. } => *command_id,
        }
    }

    /// The node the command operates on. Transactions target the root.
    pub fn target(&self) -> Id {
        match self {
            SignalCommand::Set { target, .. }
            | SignalCommand::Increment { target, .. }
            | SignalCommand::Insert { target, .. }
            | SignalCommand::Put { target, .. }
            | SignalCommand::PutIfAbsent { target, .. }
            | SignalCommand::AdoptAt { target, .. }
            | SignalCommand::AdoptAs { target, .. }
            | SignalCommand::Remove { target, .. }
            | SignalCommand::RemoveByKey { target, .. }
            | SignalCommand::Clear { target, .. }
            | SignalCommand::ValueCondition { target, .. }
            | SignalCommand::PositionCondition { target, .. }
            | SignalCommand::KeyCondition { target, .. }
            | SignalCommand::LastUpdateCondition { target, .. } => *target,
            SignalCommand::Transaction { .. } => Id::ZERO,
        }
    }

    /// Whether the command only checks the tree without changing it.
    pub fn is_condition(&self) -> bool {
        matches!(
            self,
            SignalCommand::ValueCondition { .. }
                | SignalCommand::PositionCondition { .. }
                | SignalCommand::KeyCondition { .. }
                | SignalCommand::LastUpdateCondition { .. }
        )
    }

    /// Short name of the command kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalCommand::Set { .. } => "set",
            SignalCommand::Increment { .. } => "increment",
            SignalCommand::Insert { .. } => "insert",
            SignalCommand::Put { .. } => "put",
            SignalCommand::PutIfAbsent { .. } => "put_if_absent",
            SignalCommand::AdoptAt { .. } => "adopt_at",
            SignalCommand::AdoptAs { .. } => "adopt_as",
            SignalCommand::Remove { .. } => "remove",
            SignalCommand::RemoveByKey { .. } => "remove_by_key",
            SignalCommand::Clear { .. } => "clear",
            SignalCommand::ValueCondition { .. } => "value_condition",
            SignalCommand::PositionCondition { .. } => "position_condition",
            SignalCommand::KeyCondition { .. } => "key_condition",
            SignalCommand::LastUpdateCondition { .. } => "last_update_condition",
            SignalCommand::Transaction { .. } => "transaction",
        }
    }
}
