//! Tree Revisions
//!
//! A [`TreeRevision`] is a complete map from node id to [`Data`] snapshot
//! together with the interpreter that applies [`SignalCommand`]s to it.
//!
//! # Applying a Command
//!
//! Applying a command never mutates the revision until the command is known
//! to succeed:
//!
//! 1. A `Manipulator` collects replacement snapshots for every node the
//!    command touches, reading through its own pending changes so that the
//!    steps of a compound operation (detach, then attach) see each other.
//!
//! 2. Any failing check aborts with an error and the pending changes are
//!    dropped.
//!
//! 3. On success the pending changes become an [`Accept`] listing the old
//!    and new snapshot of each touched node, and the revision commits it.
//!    Nodes that end up detached are removed together with their subtrees.
//!
//! Transactions apply their commands one by one to a scratch copy, so later
//! commands observe the effects of earlier ones. The first rejection fails
//! the whole transaction and the scratch copy is discarded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Number, Value};

use crate::command::{KeyExpectation, SignalCommand, Slot};
use crate::error::{Result, SignalError};

use super::result::{Accept, CommandResult, NodeModification};
use super::{Data, Id, ListPosition};

/// Results of a command and of all commands nested in it, by command id.
pub type ResultCollector = HashMap<Id, CommandResult>;

/// A full snapshot of a signal tree that can be advanced by commands.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRevision {
    nodes: HashMap<Id, Arc<Data>>,
}

impl TreeRevision {
    /// Create a revision holding only an empty root node.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(Id::ZERO, Arc::new(Data::empty_root()));
        Self { nodes }
    }

    /// Get the snapshot of a node.
    pub fn data(&self, id: Id) -> Option<&Arc<Data>> {
        self.nodes.get(&id)
    }

    /// Ids of all nodes, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: Id, id: Id) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes.get(&node).and_then(|data| data.parent);
        }
        false
    }

    /// Apply a command, discarding nested results.
    pub fn apply(&mut self, command: &SignalCommand) -> CommandResult {
        self.apply_collecting(command, &mut ResultCollector::new())
    }

    /// Apply a command and record its result, and the results of any
    /// commands nested in it, into `results`.
    pub fn apply_collecting(
        &mut self,
        command: &SignalCommand,
        results: &mut ResultCollector,
    ) -> CommandResult {
        let outcome = match command {
            SignalCommand::Transaction { commands, .. } => {
                self.evaluate_transaction(commands, results)
            }
            _ if !self.nodes.contains_key(&command.target()) => Err(SignalError::NotFound {
                id: command.target(),
            }),
            _ => {
                let mut manipulator = Manipulator::new(self, command.command_id());
                manipulator.handle(command).map(|()| manipulator.finish())
            }
        };

        let result = CommandResult::from(outcome);
        if let CommandResult::Accept(accept) = &result {
            self.commit(accept);
        }

        results.insert(command.command_id(), result.clone());
        debug_assert!(self.is_consistent(), "tree invariants broken by {command:?}");

        result
    }

    /// Apply a transaction to a scratch copy and merge the accepted changes.
    fn evaluate_transaction(
        &self,
        commands: &[SignalCommand],
        results: &mut ResultCollector,
    ) -> Result<Accept> {
        let mut scratch = self.clone();

        let first_reject = commands.iter().find_map(|command| {
            match scratch.apply_collecting(command, results) {
                CommandResult::Reject(err) => Some(err),
                CommandResult::Accept(_) => None,
            }
        });

        if let Some(reject) = first_reject {
            // Commands that seemed fine did not take effect either.
            for command in commands {
                let keep = matches!(
                    results.get(&command.command_id()),
                    Some(CommandResult::Reject(_))
                );
                if !keep {
                    results.insert(command.command_id(), CommandResult::Reject(reject.clone()));
                }
            }
            return Err(reject);
        }

        let mut updates: HashMap<Id, NodeModification> = HashMap::new();
        for command in commands {
            let Some(CommandResult::Accept(accept)) = results.get(&command.command_id()) else {
                continue;
            };
            for (id, modification) in &accept.updates {
                updates
                    .entry(*id)
                    .and_modify(|merged| merged.new = modification.new.clone())
                    .or_insert_with(|| modification.clone());
            }
        }
        updates.retain(|_, m| m.old.is_some() || m.new.is_some());

        Ok(Accept { updates })
    }

    fn commit(&mut self, accept: &Accept) {
        for (id, modification) in &accept.updates {
            match &modification.new {
                Some(data) => {
                    self.nodes.insert(*id, Arc::clone(data));
                }
                None => {
                    self.nodes.remove(id);
                }
            }
        }
    }

    /// Check the structural invariants: parents and children agree, the root
    /// has no parent and every child slot points at an existing node.
    pub fn is_consistent(&self) -> bool {
        let Some(root) = self.nodes.get(&Id::ZERO) else {
            return false;
        };
        if root.parent.is_some() {
            return false;
        }

        self.nodes.iter().all(|(id, data)| {
            let children_ok = data.children().all(|child| {
                self.nodes
                    .get(&child)
                    .is_some_and(|child_data| child_data.parent == Some(*id))
            });
            let parent_ok = match data.parent {
                None => *id == Id::ZERO,
                Some(parent) => self
                    .nodes
                    .get(&parent)
                    .is_some_and(|parent_data| parent_data.children().any(|c| c == *id)),
            };
            children_ok && parent_ok
        })
    }
}

impl Default for TreeRevision {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects the effects of one command against a base revision.
struct Manipulator<'a> {
    base: &'a TreeRevision,
    command_id: Id,
    updated: HashMap<Id, Arc<Data>>,
    detached: HashSet<Id>,
}

impl<'a> Manipulator<'a> {
    fn new(base: &'a TreeRevision, command_id: Id) -> Self {
        Self {
            base,
            command_id,
            updated: HashMap::new(),
            detached: HashSet::new(),
        }
    }

    /// Latest state of a node, including nodes that are currently detached.
    fn raw_data(&self, id: Id) -> Option<Arc<Data>> {
        self.updated
            .get(&id)
            .or_else(|| self.base.data(id))
            .cloned()
    }

    /// Latest state of an attached node.
    fn data(&self, id: Id) -> Option<Arc<Data>> {
        if self.detached.contains(&id) {
            None
        } else {
            self.raw_data(id)
        }
    }

    fn require(&self, id: Id) -> Result<Arc<Data>> {
        self.data(id).ok_or(SignalError::NotFound { id })
    }

    fn value(&self, id: Id) -> Option<Value> {
        self.data(id).and_then(|data| data.value.clone())
    }

    fn map_child(&self, id: Id, key: &str) -> Option<Id> {
        self.data(id).and_then(|data| data.map_children.get(key).copied())
    }

    fn put(&mut self, id: Id, data: Data) {
        self.updated.insert(id, Arc::new(data));
    }

    fn set_value(&mut self, id: Id, value: Option<Value>) -> Result<()> {
        let node = self.require(id)?;
        self.put(
            id,
            Data {
                value,
                last_update: self.command_id,
                ..(*node).clone()
            },
        );
        Ok(())
    }

    fn create_node(&mut self, id: Id, value: Option<Value>) -> Result<()> {
        if self.raw_data(id).is_some() {
            return Err(SignalError::precondition("Node already exists"));
        }

        // Detached until attached by the same command.
        self.detached.insert(id);
        self.put(id, Data::new(None, self.command_id, value));
        Ok(())
    }

    fn detach(&mut self, id: Id) -> Result<()> {
        if id == Id::ZERO {
            return Err(SignalError::precondition("Cannot detach the root"));
        }

        let node = self.require(id)?;
        let parent_id = node
            .parent
            .ok_or_else(|| SignalError::precondition("Node is not attached"))?;
        let parent = self.require(parent_id)?;

        let mut updated_parent = (*parent).clone();
        updated_parent.last_update = self.command_id;
        match updated_parent.key_of(id).map(str::to_owned) {
            Some(key) => {
                updated_parent.map_children.shift_remove(&key);
            }
            None => updated_parent.list_children.retain(|child| *child != id),
        }

        self.put(parent_id, updated_parent);
        self.detached.insert(id);
        Ok(())
    }

    fn attach<F>(&mut self, parent_id: Id, child_id: Id, attacher: F) -> Result<()>
    where
        F: FnOnce(&mut Data, Id) -> Result<()>,
    {
        if !self.detached.contains(&child_id) {
            return Err(SignalError::precondition("Node is not detached"));
        }

        let mut ancestor = Some(parent_id);
        while let Some(id) = ancestor {
            if id == child_id {
                return Err(SignalError::precondition("Cannot attach to own descendant"));
            }
            ancestor = self.raw_data(id).and_then(|data| data.parent);
        }

        let parent = self.require(parent_id)?;
        let mut updated_parent = (*parent).clone();
        updated_parent.last_update = self.command_id;
        attacher(&mut updated_parent, child_id)?;

        let child = self
            .raw_data(child_id)
            .ok_or(SignalError::NotFound { id: child_id })?;

        self.detached.remove(&child_id);
        self.put(parent_id, updated_parent);
        self.put(
            child_id,
            Data {
                parent: Some(parent_id),
                ..(*child).clone()
            },
        );
        Ok(())
    }

    fn attach_as(&mut self, parent_id: Id, key: &str, child_id: Id) -> Result<()> {
        self.attach(parent_id, child_id, |parent, child| {
            if parent.map_children.contains_key(key) {
                return Err(SignalError::precondition("Key is in use"));
            }
            parent.map_children.insert(key.to_owned(), child);
            Ok(())
        })
    }

    fn attach_at(&mut self, parent_id: Id, position: &ListPosition, child_id: Id) -> Result<()> {
        self.attach(parent_id, child_id, |parent, child| {
            let index = position
                .resolve(&parent.list_children)
                .ok_or_else(|| SignalError::precondition("Insert position not matched"))?;
            parent.list_children.insert(index, child);
            Ok(())
        })
    }

    fn handle(&mut self, command: &SignalCommand) -> Result<()> {
        match command {
            SignalCommand::Set { target, value, .. } => self.set_value(*target, value.clone()),
            SignalCommand::Increment { target, delta, .. } => {
                self.handle_increment(*target, *delta)
            }
            SignalCommand::Insert {
                command_id,
                target,
                slot,
                value,
            } => {
                self.create_node(*command_id, value.clone())?;
                match slot {
                    Slot::Position(position) => self.attach_at(*target, position, *command_id),
                    Slot::Key(key) => self.attach_as(*target, key, *command_id),
                }
            }
            SignalCommand::Put {
                command_id,
                target,
                key,
                value,
            } => match self.map_child(*target, key) {
                Some(child) => self.set_value(child, value.clone()),
                None => {
                    self.create_node(*command_id, value.clone())?;
                    self.attach_as(*target, key, *command_id)
                }
            },
            SignalCommand::PutIfAbsent {
                command_id,
                target,
                key,
                value,
            } => match self.map_child(*target, key) {
                Some(_) => Ok(()),
                None => {
                    self.create_node(*command_id, value.clone())?;
                    self.attach_as(*target, key, *command_id)
                }
            },
            SignalCommand::AdoptAt {
                target,
                child,
                position,
                ..
            } => {
                self.detach(*child)?;
                self.attach_at(*target, position, *child)
            }
            SignalCommand::AdoptAs {
                target, child, key, ..
            } => {
                self.detach(*child)?;
                self.attach_as(*target, key, *child)
            }
            SignalCommand::Remove {
                target,
                expected_parent,
                ..
            } => {
                if let Some(expected) = expected_parent {
                    let parent = self.data(*target).and_then(|data| data.parent);
                    if parent != Some(*expected) {
                        return Err(SignalError::precondition("Not a child"));
                    }
                }
                self.detach(*target)
            }
            SignalCommand::RemoveByKey { target, key, .. } => match self.map_child(*target, key) {
                Some(child) => self.detach(child),
                None => Err(SignalError::precondition("Key not present")),
            },
            SignalCommand::Clear { target, .. } => self.handle_clear(*target),
            SignalCommand::ValueCondition {
                target, expected, ..
            } => {
                let actual = self.value(*target).unwrap_or(Value::Null);
                let expected = expected.clone().unwrap_or(Value::Null);
                check(actual == expected, "Unexpected value")
            }
            SignalCommand::PositionCondition {
                target,
                child,
                position,
                ..
            } => self.check_position(*target, *child, position),
            SignalCommand::KeyCondition {
                target,
                key,
                expected,
                ..
            } => {
                let actual = self.map_child(*target, key);
                match expected {
                    KeyExpectation::Present => check(actual.is_some(), "Key not present"),
                    KeyExpectation::Absent => check(actual.is_none(), "A key is present"),
                    KeyExpectation::Child(child) => {
                        check(actual == Some(*child), "Unexpected child")
                    }
                }
            }
            SignalCommand::LastUpdateCondition {
                target, expected, ..
            } => {
                let last_update = self.data(*target).map(|data| data.last_update);
                check(last_update == Some(*expected), "Unexpected last update")
            }
            SignalCommand::Transaction { .. } => {
                unreachable!("transactions are evaluated by the revision")
            }
        }
    }

    fn handle_increment(&mut self, target: Id, delta: f64) -> Result<()> {
        let current = match self.value(target) {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(number)) => number
                .as_f64()
                .ok_or_else(|| SignalError::precondition("Value is not numeric"))?,
            Some(_) => return Err(SignalError::precondition("Value is not numeric")),
        };

        let number = Number::from_f64(current + delta)
            .ok_or_else(|| SignalError::precondition("Result is not a finite number"))?;
        self.set_value(target, Some(Value::Number(number)))
    }

    fn handle_clear(&mut self, target: Id) -> Result<()> {
        let node = self.require(target)?;
        let children: Vec<Id> = node.children().collect();
        if children.is_empty() {
            return Ok(());
        }

        self.detached.extend(children);
        self.put(
            target,
            Data {
                last_update: self.command_id,
                list_children: Vec::new(),
                map_children: Default::default(),
                ..(*node).clone()
            },
        );
        Ok(())
    }

    fn check_position(&self, target: Id, child: Id, position: &ListPosition) -> Result<()> {
        let children = self
            .data(target)
            .map(|data| data.list_children.clone())
            .unwrap_or_default();
        let index = children
            .iter()
            .position(|id| *id == child)
            .ok_or_else(|| SignalError::precondition("Not a child"))?;

        if let Some(after) = position.after {
            if after == Id::EDGE {
                check(index == 0, "Not the first child")?;
            } else {
                let previous = index.checked_sub(1).and_then(|i| children.get(i));
                check(previous == Some(&after), "Not after the provided child")?;
            }
        }

        if let Some(before) = position.before {
            if before == Id::EDGE {
                check(index + 1 == children.len(), "Not the last child")?;
            } else {
                check(children.get(index + 1) == Some(&before), "Not before the provided child")?;
            }
        }

        Ok(())
    }

    /// Turn the collected changes into an [`Accept`], removing the subtrees
    /// of nodes that are still detached.
    fn finish(self) -> Accept {
        let base = self.base;
        let mut updates = HashMap::new();

        for (id, data) in &self.updated {
            if !self.detached.contains(id) {
                updates.insert(
                    *id,
                    NodeModification {
                        old: base.data(*id).cloned(),
                        new: Some(Arc::clone(data)),
                    },
                );
            }
        }

        let mut to_remove: Vec<Id> = self.detached.into_iter().collect();
        while let Some(id) = to_remove.pop() {
            let Some(old) = base.data(id) else {
                continue;
            };
            to_remove.extend(old.children());
            updates.insert(
                id,
                NodeModification {
                    old: Some(Arc::clone(old)),
                    new: None,
                },
            );
        }

        Accept { updates }
    }
}

fn check(condition: bool, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(SignalError::precondition(reason))
    }
}
