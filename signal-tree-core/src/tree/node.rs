//! Node snapshots and list positions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Id;

/// Immutable snapshot of one node in a signal tree.
///
/// A node has an optional JSON value, an optional parent and two kinds of
/// children: an ordered list and a keyed map. A child is attached to at
/// most one slot of one parent at a time. Snapshots are shared between
/// revisions behind `Arc` and replaced, never mutated, when a command
/// changes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// The node's value, if any.
    pub value: Option<Value>,

    /// The parent node. `None` for the root and for detached nodes.
    pub parent: Option<Id>,

    /// Id of the last command that modified this node.
    pub last_update: Id,

    /// Children in list order.
    pub list_children: Vec<Id>,

    /// Children by key, in insertion order.
    pub map_children: IndexMap<String, Id>,
}

impl Data {
    /// Create a childless node.
    pub fn new(parent: Option<Id>, last_update: Id, value: Option<Value>) -> Self {
        Self {
            value,
            parent,
            last_update,
            list_children: Vec::new(),
            map_children: IndexMap::new(),
        }
    }

    /// The empty root node of a new tree.
    pub fn empty_root() -> Self {
        Self::new(None, Id::ZERO, None)
    }

    /// All direct children, list children first.
    pub fn children(&self) -> impl Iterator<Item = Id> + '_ {
        self.list_children
            .iter()
            .copied()
            .chain(self.map_children.values().copied())
    }

    /// The key under which `child` is attached, if it is a map child.
    pub fn key_of(&self, child: Id) -> Option<&str> {
        self.map_children
            .iter()
            .find(|(_, id)| **id == child)
            .map(|(key, _)| key.as_str())
    }

    /// Whether the structural part (children) differs from `other`.
    pub fn structure_differs(&self, other: &Data) -> bool {
        self.list_children != other.list_children
            || !self.map_children.iter().eq(other.map_children.iter())
    }

    /// The value, treating an explicit JSON `null` like a missing value.
    pub fn value_or_null(&self) -> &Value {
        self.value.as_ref().unwrap_or(&Value::Null)
    }
}

/// A position in a child list, expressed relative to neighbours.
///
/// `after` names the child that must immediately precede the position and
/// `before` the one that must immediately follow it. [`Id::EDGE`] stands for
/// the start of the list in `after` and the end of the list in `before`.
/// A position with neither set only makes sense for existence checks and is
/// never accepted for inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ListPosition {
    pub after: Option<Id>,
    pub before: Option<Id>,
}

impl ListPosition {
    /// The start of the list.
    pub fn first() -> Self {
        Self {
            after: Some(Id::EDGE),
            before: None,
        }
    }

    /// The end of the list.
    pub fn last() -> Self {
        Self {
            after: None,
            before: Some(Id::EDGE),
        }
    }

    /// Directly after the given child.
    pub fn after(id: Id) -> Self {
        Self {
            after: Some(id),
            before: None,
        }
    }

    /// Directly before the given child.
    pub fn before(id: Id) -> Self {
        Self {
            after: None,
            before: Some(id),
        }
    }

    /// Between two adjacent children. Fails to resolve unless they are
    /// still adjacent when the command is applied.
    pub fn between(after: Id, before: Id) -> Self {
        Self {
            after: Some(after),
            before: Some(before),
        }
    }

    /// Whether neither anchor is set.
    pub fn is_unset(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }

    /// Resolve the insertion index in `children`.
    ///
    /// Returns `None` when an anchor is missing from the list, when the
    /// anchors are no longer adjacent, or when the position is unset.
    pub fn resolve(&self, children: &[Id]) -> Option<usize> {
        match (self.after, self.before) {
            (None, None) => None,
            (Some(after), before) => {
                let index = if after == Id::EDGE {
                    0
                } else {
                    children.iter().position(|id| *id == after)? + 1
                };

                if let Some(before) = before {
                    let at_index = children.get(index).copied().unwrap_or(Id::EDGE);
                    if at_index != before {
                        return None;
                    }
                }

                Some(index)
            }
            (None, Some(before)) => {
                if before == Id::EDGE {
                    Some(children.len())
                } else {
                    children.iter().position(|id| *id == before)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u64) -> Vec<Id> {
        (1..=n).map(Id::from).collect()
    }

    #[test]
    fn edges_resolve_to_list_ends() {
        let children = ids(3);
        assert_eq!(ListPosition::first().resolve(&children), Some(0));
        assert_eq!(ListPosition::last().resolve(&children), Some(3));
        assert_eq!(ListPosition::first().resolve(&[]), Some(0));
        assert_eq!(ListPosition::last().resolve(&[]), Some(0));
    }

    #[test]
    fn anchors_resolve_relative_to_neighbours() {
        let children = ids(3);
        assert_eq!(ListPosition::after(Id::from(2)).resolve(&children), Some(2));
        assert_eq!(ListPosition::before(Id::from(2)).resolve(&children), Some(1));
        assert_eq!(
            ListPosition::between(Id::from(1), Id::from(2)).resolve(&children),
            Some(1)
        );
        assert_eq!(
            ListPosition::between(Id::from(3), Id::EDGE).resolve(&children),
            Some(3)
        );
    }

    #[test]
    fn stale_anchors_fail_closed() {
        let children = ids(3);
        assert_eq!(ListPosition::after(Id::from(9)).resolve(&children), None);
        assert_eq!(ListPosition::before(Id::from(9)).resolve(&children), None);
        assert_eq!(
            ListPosition::between(Id::from(1), Id::from(3)).resolve(&children),
            None
        );
        assert_eq!(ListPosition::default().resolve(&children), None);
    }

    #[test]
    fn key_lookup_and_structure_diff() {
        let mut data = Data::empty_root();
        data.map_children.insert("a".to_string(), Id::from(7));
        assert_eq!(data.key_of(Id::from(7)), Some("a"));
        assert_eq!(data.key_of(Id::from(8)), None);

        let mut other = data.clone();
        assert!(!data.structure_differs(&other));
        other.list_children.push(Id::from(8));
        assert!(data.structure_differs(&other));
    }
}
