//! Untyped node signals.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::command::SignalCommand;
use crate::operation::{InsertOperation, SignalOperation};
use crate::tree::{Aspect, Data, Id, ListPosition};

use super::core::{encode, encoding_failed, SignalCore};
use super::traits::{Readable, Signal, StructuralNode};

/// Everything a node holds, with its parent and children as node signals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeContent {
    pub value: Option<Value>,
    /// `None` for the root and for a node that is gone.
    pub parent: Option<NodeSignal>,
    pub list_children: Vec<NodeSignal>,
    pub map_children: IndexMap<String, NodeSignal>,
}

/// A signal giving full access to one node: its raw value and both kinds of
/// children.
///
/// Any other façade can be viewed as a node with [`Signal::as_node`], and a
/// node can be viewed as any other façade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSignal {
    core: SignalCore,
}

impl NodeSignal {
    /// Create an empty node backed by a new tree.
    pub fn new() -> Self {
        Self::from_core(SignalCore::fresh(None))
    }

    /// Insert a new, empty list child.
    pub fn insert_child(&self, position: ListPosition) -> InsertOperation<NodeSignal> {
        self.insert(SignalCommand::insert(self.id(), position, None))
    }

    /// Insert a new list child holding `value`.
    pub fn insert_child_with_value<T: Serialize>(
        &self,
        value: &T,
        position: ListPosition,
    ) -> InsertOperation<NodeSignal> {
        match encode(value) {
            Ok(value) => self.insert(SignalCommand::insert(self.id(), position, Some(value))),
            Err(err) => InsertOperation::new(encoding_failed(err), self.child(Id::EDGE)),
        }
    }

    fn insert(&self, command: SignalCommand) -> InsertOperation<NodeSignal> {
        let child = self.child(command.command_id());
        InsertOperation::new(self.core.submit_void(command), child)
    }

    /// Store `value` in the map child under `key`, creating the child if
    /// the key is not in use.
    pub fn put_child_with_value<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> SignalOperation<()> {
        match encode(value) {
            Ok(value) => self
                .core
                .submit_void(SignalCommand::put(self.id(), key, Some(value))),
            Err(err) => encoding_failed(err),
        }
    }

    /// Create a map child under `key` holding `value`, unless the key is in
    /// use.
    ///
    /// The signal is for the child under `key` as the submitting thread
    /// sees it once the command is submitted: the existing child if there
    /// was one, otherwise the new one.
    pub fn put_child_if_absent<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> InsertOperation<NodeSignal> {
        let key = key.into();
        let command = match encode(value) {
            Ok(value) => SignalCommand::put_if_absent(self.id(), key.clone(), Some(value)),
            Err(err) => return InsertOperation::new(encoding_failed(err), self.child(Id::EDGE)),
        };

        let inserted = command.command_id();
        let operation = self.core.submit_void(command);
        let child = self
            .core
            .peek_data()
            .and_then(|data| data.map_children.get(&key).copied())
            .unwrap_or(inserted);
        InsertOperation::new(operation, self.child(child))
    }

    /// Move `child` from wherever it is into this node's list. Fails if
    /// `child` is this node or one of its ancestors.
    pub fn adopt_at<S: Signal>(&self, child: &S, position: ListPosition) -> SignalOperation<()> {
        self.core
            .submit_void(SignalCommand::adopt_at(self.id(), child.id(), position))
    }

    /// Move `child` from wherever it is into this node's map under `key`.
    pub fn adopt_as<S: Signal>(&self, child: &S, key: impl Into<String>) -> SignalOperation<()> {
        self.core
            .submit_void(SignalCommand::adopt_as(self.id(), child.id(), key))
    }

    pub fn remove_child_by_key(&self, key: impl Into<String>) -> SignalOperation<()> {
        self.core.submit_void(SignalCommand::remove_by_key(self.id(), key))
    }

    fn child(&self, id: Id) -> NodeSignal {
        Self::from_core(self.core.child(id))
    }
}

impl Default for NodeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal for NodeSignal {
    fn core(&self) -> &SignalCore {
        &self.core
    }

    fn from_core(core: SignalCore) -> Self {
        Self { core }
    }
}

impl Readable for NodeSignal {
    type Value = NodeContent;
    const ASPECT: Aspect = Aspect::Node;

    fn extract(core: &SignalCore, data: Option<&Data>) -> NodeContent {
        let Some(data) = data else {
            return NodeContent::default();
        };

        NodeContent {
            value: data.value.clone(),
            parent: data.parent.map(|id| NodeSignal::from_core(core.child(id))),
            list_children: data
                .list_children
                .iter()
                .map(|id| NodeSignal::from_core(core.child(*id)))
                .collect(),
            map_children: data
                .map_children
                .iter()
                .map(|(key, id)| (key.clone(), NodeSignal::from_core(core.child(*id))))
                .collect(),
        }
    }
}

impl StructuralNode for NodeSignal {}

impl fmt::Display for NodeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = self.peek();
        write!(f, "NodeSignal[{}", content.value.unwrap_or(Value::Null))?;

        if !content.list_children.is_empty() {
            let children: Vec<String> = content
                .list_children
                .iter()
                .map(ToString::to_string)
                .collect();
            write!(f, ", list: [{}]", children.join(", "))?;
        }
        if !content.map_children.is_empty() {
            let children: Vec<String> = content
                .map_children
                .iter()
                .map(|(key, child)| format!("{key}: {child}"))
                .collect();
            write!(f, ", map: {{{}}}", children.join(", "))?;
        }

        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::Writable;
    use crate::transaction::run_in_transaction;
    use serde_json::json;

    #[test]
    fn new_node_is_empty() {
        let node = NodeSignal::new();
        assert_eq!(node.value(), NodeContent::default());
    }

    #[test]
    fn insert_and_put_children() {
        let node = NodeSignal::new();
        let first = node.insert_child_with_value(&1, ListPosition::last()).into_signal();
        assert!(node.put_child_with_value("k", &"v").is_success());

        let content = node.value();
        assert_eq!(content.list_children, vec![first.clone()]);
        assert_eq!(first.value().value, Some(json!(1)));
        assert_eq!(content.map_children["k"].value().value, Some(json!("v")));
    }

    #[test]
    fn insert_child_without_value() {
        let node = NodeSignal::new();
        let first = node.insert_child_with_value(&1, ListPosition::last()).into_signal();
        let empty = node.insert_child(ListPosition::first());

        assert!(empty.is_success());
        assert_eq!(node.value().list_children, vec![empty.signal().clone(), first]);
        assert_eq!(empty.signal().value().value, None);
    }

    #[test]
    fn put_child_if_absent_gives_new_or_existing_child() {
        let node = NodeSignal::new();

        let created = node.put_child_if_absent("k", &1);
        assert!(created.is_success());
        assert_eq!(created.signal().value().value, Some(json!(1)));

        let existing = node.put_child_if_absent("k", &2);
        assert!(existing.is_success());
        assert_eq!(existing.signal(), created.signal());
        assert_eq!(node.value().map_children["k"].value().value, Some(json!(1)));
    }

    #[test]
    fn put_child_if_absent_in_transaction_sees_staged_child() {
        let node = NodeSignal::new();

        let operation = run_in_transaction(|| {
            let first = node.put_child_if_absent("k", &1).into_signal();
            let second = node.put_child_if_absent("k", &2).into_signal();
            assert_eq!(first, second);
            first
        });

        assert!(operation.is_success());
        assert_eq!(node.value().map_children["k"], *operation.return_value());
    }

    #[test]
    fn content_includes_parent() {
        let root = NodeSignal::new();
        let child = root.insert_child(ListPosition::last()).into_signal();
        let grandchild = child.put_child_if_absent("k", &"v").into_signal();

        assert_eq!(root.value().parent, None);
        assert_eq!(child.value().parent, Some(root.clone()));
        assert_eq!(grandchild.value().parent, Some(child.clone()));

        root.remove_child(&child);
        assert_eq!(grandchild.value().parent, None);
    }

    #[test]
    fn map_derives_computed_value() {
        let node = NodeSignal::new();
        let child_count = node.map(|content| content.list_children.len());
        assert_eq!(child_count.get(), 0);

        node.insert_child(ListPosition::last());
        node.insert_child(ListPosition::last());
        assert_eq!(child_count.get(), 2);
        assert_eq!(child_count.computations(), 2);
    }

    #[test]
    fn adopt_moves_child_between_parents() {
        let root = NodeSignal::new();
        let a = root.insert_child_with_value(&"a", ListPosition::last()).into_signal();
        let b = root.insert_child_with_value(&"b", ListPosition::last()).into_signal();

        assert!(b.adopt_as(&a, "moved").is_success());
        assert_eq!(root.value().list_children, vec![b.clone()]);
        assert_eq!(b.value().map_children["moved"], a);
        assert_eq!(a.value().parent, Some(b.clone()));

        assert!(root.adopt_at(&a, ListPosition::first()).is_success());
        assert_eq!(root.value().list_children, vec![a, b.clone()]);
        assert!(b.value().map_children.is_empty());
    }

    #[test]
    fn adopting_an_ancestor_fails() {
        let root = NodeSignal::new();
        let b = root.insert_child_with_value(&"b", ListPosition::last()).into_signal();
        let a = b.insert_child_with_value(&"a", ListPosition::last()).into_signal();
        let before = root.tree().snapshot();

        let operation = a.adopt_at(&b, ListPosition::last());
        assert!(operation.error().unwrap().is_precondition_failure());
        assert!(!a.adopt_as(&a, "self").is_success());

        assert_eq!(root.tree().snapshot(), before);
        assert_eq!(a.value().parent, Some(b));
    }

    #[test]
    fn remove_children() {
        let node = NodeSignal::new();
        let child = node.insert_child_with_value(&1, ListPosition::last()).into_signal();
        node.put_child_with_value("k", &2);

        assert!(node.remove_child(&child).is_success());
        assert!(node.remove_child_by_key("k").is_success());
        assert_eq!(node.value(), NodeContent::default());
        assert!(!node.remove_child_by_key("k").is_success());
    }

    #[test]
    fn remove_child_requires_parent_match() {
        let root = NodeSignal::new();
        let a = root.insert_child_with_value(&"a", ListPosition::last()).into_signal();
        let b = root.insert_child_with_value(&"b", ListPosition::last()).into_signal();

        assert!(!b.remove_child(&a).is_success());
        assert!(root.tree().read(a.id()).is_some());
    }

    #[test]
    fn readonly_children_reject_changes() {
        let node = NodeSignal::new();
        node.put_child_with_value("k", &1);
        let readonly = node.as_readonly();

        let child = readonly.value().map_children["k"].clone();
        assert!(child.as_value::<i32>().set(5).error().unwrap().is_validation_rejected());
        assert!(!readonly.clear().is_success());
        assert!(node.clear().is_success());
    }

    #[test]
    fn views_share_the_node() {
        let node = NodeSignal::new();
        node.as_value::<i32>().set(4);
        assert_eq!(node.as_number().value(), 4.0);
        assert_eq!(node.value().value, Some(json!(4)));
    }

    #[test]
    fn display_renders_children() {
        let node = NodeSignal::new();
        node.insert_child_with_value(&1, ListPosition::last());
        node.put_child_with_value("k", &"v");

        assert_eq!(
            node.to_string(),
            "NodeSignal[null, list: [NodeSignal[1]], map: {k: NodeSignal[\"v\"]}]"
        );
    }
}
