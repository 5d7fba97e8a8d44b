//! Outcomes of applying commands.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SignalError;

use super::{Data, Id};

/// The before and after state of one node touched by a command.
///
/// `old` is `None` for a node created by the command and `new` is `None`
/// for a node removed by it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeModification {
    pub old: Option<Arc<Data>>,
    pub new: Option<Arc<Data>>,
}

/// A command that was accepted, with every node it changed.
///
/// Accepted conditions carry no updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accept {
    pub updates: HashMap<Id, NodeModification>,
}

impl Accept {
    /// The modification of a specific node, if it was touched.
    pub fn modification(&self, id: Id) -> Option<&NodeModification> {
        self.updates.get(&id)
    }

    /// The state of a node before the command, if it was touched and existed.
    pub fn old_data(&self, id: Id) -> Option<&Arc<Data>> {
        self.updates.get(&id).and_then(|m| m.old.as_ref())
    }

    /// Whether the command changed anything.
    pub fn is_noop(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Result of applying one command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Accept(Accept),
    Reject(SignalError),
}

impl CommandResult {
    pub fn ok() -> Self {
        CommandResult::Accept(Accept::default())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        CommandResult::Reject(SignalError::precondition(reason))
    }

    /// Accept if `condition` holds, otherwise fail with `reason`.
    pub fn conditional(condition: bool, reason: impl Into<String>) -> Self {
        if condition {
            Self::ok()
        } else {
            Self::fail(reason)
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandResult::Accept(_))
    }

    pub fn as_accept(&self) -> Option<&Accept> {
        match self {
            CommandResult::Accept(accept) => Some(accept),
            CommandResult::Reject(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Accept, SignalError> {
        match self {
            CommandResult::Accept(accept) => Ok(accept),
            CommandResult::Reject(err) => Err(err),
        }
    }
}

impl From<Result<Accept, SignalError>> for CommandResult {
    fn from(result: Result<Accept, SignalError>) -> Self {
        match result {
            Ok(accept) => CommandResult::Accept(accept),
            Err(err) => CommandResult::Reject(err),
        }
    }
}
