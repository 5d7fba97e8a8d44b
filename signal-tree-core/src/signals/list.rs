//! List signals.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::command::SignalCommand;
use crate::operation::{InsertOperation, SignalOperation};
use crate::tree::{Aspect, Data, Id, ListPosition};

use super::core::{encode, SignalCore};
use super::traits::{Readable, Signal, StructuralNode};
use super::ValueSignal;

/// A signal holding an ordered list of child value signals.
///
/// Reading the list gives the child signals, not their values, so a
/// computation that reads the list only depends on its structure and is
/// not invalidated when one child's value changes.
pub struct ListSignal<T> {
    core: SignalCore,
    _type: PhantomData<fn() -> T>,
}

impl<T> ListSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Create an empty list backed by a new tree.
    pub fn new() -> Self {
        Self::from_core(SignalCore::fresh(None))
    }

    pub fn insert_first(&self, value: T) -> InsertOperation<ValueSignal<T>> {
        self.insert_at(value, ListPosition::first())
    }

    pub fn insert_last(&self, value: T) -> InsertOperation<ValueSignal<T>> {
        self.insert_at(value, ListPosition::last())
    }

    /// Insert a value at `position`. The insert fails if the neighbours
    /// named by `position` are not adjacent in the list when it is applied.
    pub fn insert_at(&self, value: T, position: ListPosition) -> InsertOperation<ValueSignal<T>> {
        let command = match encode(&value) {
            Ok(value) => SignalCommand::insert(self.id(), position, Some(value)),
            Err(err) => {
                let child = ValueSignal::from_core(self.core.child(Id::EDGE));
                return InsertOperation::new(SignalOperation::resolved(Err(err)), child);
            }
        };

        let child = ValueSignal::from_core(self.core.child(command.command_id()));
        InsertOperation::new(self.core.submit_void(command), child)
    }

    /// Move an existing child of this list to `position`.
    pub fn move_to(&self, child: &ValueSignal<T>, position: ListPosition) -> SignalOperation<()> {
        self.core
            .submit_void(SignalCommand::adopt_at(self.id(), child.id(), position))
    }

    /// Remove a child of this list.
    pub fn remove(&self, child: &ValueSignal<T>) -> SignalOperation<()> {
        self.remove_child(child)
    }

    /// Check that `child` is in this list at `position`.
    pub fn verify_position(
        &self,
        child: &ValueSignal<T>,
        position: ListPosition,
    ) -> SignalOperation<()> {
        self.core
            .submit_void(SignalCommand::position_condition(self.id(), child.id(), position))
    }

    /// Check that `child` is in this list, anywhere.
    pub fn verify_child(&self, child: &ValueSignal<T>) -> SignalOperation<()> {
        self.verify_position(child, ListPosition::default())
    }
}

impl<T> Default for ListSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal for ListSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn core(&self) -> &SignalCore {
        &self.core
    }

    fn from_core(core: SignalCore) -> Self {
        Self {
            core,
            _type: PhantomData,
        }
    }
}

impl<T> Readable for ListSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    type Value = Vec<ValueSignal<T>>;
    const ASPECT: Aspect = Aspect::Structure;

    fn extract(core: &SignalCore, data: Option<&Data>) -> Self::Value {
        data.map(|data| {
            data.list_children
                .iter()
                .map(|id| ValueSignal::from_core(core.child(*id)))
                .collect()
        })
        .unwrap_or_default()
    }
}

impl<T> StructuralNode for ListSignal<T> where
    T: Serialize + DeserializeOwned + Clone + Send + 'static
{
}

impl<T> Clone for ListSignal<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> PartialEq for ListSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core
    }
}

impl<T> Eq for ListSignal<T> {}

impl<T> Hash for ListSignal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.hash(state);
    }
}

impl<T> fmt::Debug for ListSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSignal")
            .field("tree", &self.core.tree().tree_id())
            .field("id", &self.core.id())
            .finish()
    }
}

impl<T> fmt::Display for ListSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children: Vec<String> = self.peek().iter().map(ToString::to_string).collect();
        write!(f, "ListSignal[{}]", children.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignalError;
    use crate::reactive::UsageTracker;
    use crate::signals::Writable;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    fn values(list: &ListSignal<String>) -> Vec<String> {
        list.value().iter().map(Readable::value).collect()
    }

    #[test]
    fn inserts_at_edges() {
        let list = ListSignal::new();
        list.insert_last("a".to_string());
        list.insert_last("b".to_string());
        assert_eq!(values(&list), ["a", "b"]);

        list.insert_first("c".to_string());
        assert_eq!(values(&list), ["c", "a", "b"]);
    }

    #[test]
    fn insert_returns_usable_child() {
        let list = ListSignal::new();
        let operation = list.insert_last("a".to_string());

        assert!(operation.is_success());
        assert_eq!(operation.signal().value(), "a");
        assert_eq!(list.value()[0], *operation.signal());
    }

    #[test]
    fn insert_between_neighbours() {
        let list = ListSignal::new();
        let a = list.insert_last("a".to_string()).into_signal();
        let c = list.insert_last("c".to_string()).into_signal();

        let between = ListPosition::between(a.id(), c.id());
        assert!(list.insert_at("b".to_string(), between).is_success());
        assert_eq!(values(&list), ["a", "b", "c"]);

        // a and c are no longer adjacent
        let stale = list.insert_at("x".to_string(), ListPosition::between(a.id(), c.id()));
        assert!(stale.error().unwrap().is_precondition_failure());
        assert_eq!(values(&list), ["a", "b", "c"]);
    }

    #[test]
    fn move_and_remove() {
        let list = ListSignal::new();
        let a = list.insert_last("a".to_string()).into_signal();
        list.insert_last("b".to_string());

        assert!(list.move_to(&a, ListPosition::last()).is_success());
        assert_eq!(values(&list), ["b", "a"]);

        assert!(list.remove(&a).is_success());
        assert_eq!(values(&list), ["b"]);
        assert!(list.remove(&a).error().is_some());
    }

    #[test]
    fn verify_child_and_position() {
        let list = ListSignal::new();
        let a = list.insert_last("a".to_string()).into_signal();
        let b = list.insert_last("b".to_string()).into_signal();

        assert!(list.verify_child(&a).is_success());
        assert!(list.verify_position(&b, ListPosition::after(a.id())).is_success());
        assert!(!list.verify_position(&a, ListPosition::after(b.id())).is_success());

        list.remove(&a);
        assert!(!list.verify_child(&a).is_success());
    }

    #[test]
    fn update_on_removed_child_fails_without_retrying() {
        let list = ListSignal::<Option<i32>>::new();
        let child = list.insert_last(Some(1)).into_signal();
        list.remove(&child);

        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let (sender, receiver) = mpsc::channel();
        std::thread::spawn(move || {
            let operation = child.update(move |value| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                value
            });
            let _ = sender.send(operation.result());
        });

        let result = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("update on a removed node did not resolve");
        assert!(matches!(result, Some(Err(SignalError::NotFound { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_removes_all_children() {
        let list = ListSignal::new();
        let a = list.insert_last("a".to_string()).into_signal();
        list.insert_last("b".to_string());

        assert!(list.clear().is_success());
        assert!(list.value().is_empty());
        assert!(list.tree().read(a.id()).is_none());
    }

    #[test]
    fn reading_list_tracks_structure_only() {
        let list = ListSignal::new();
        let a = list.insert_last("a".to_string()).into_signal();

        let (_, usage) = UsageTracker::track(|| list.value());
        a.set("changed".to_string());
        assert!(!usage.has_changes());

        list.insert_last("b".to_string());
        assert!(usage.has_changes());
    }

    #[test]
    fn readonly_list_children_are_readonly() {
        let list = ListSignal::new();
        list.insert_last("a".to_string());
        let readonly = list.as_readonly();

        assert!(readonly.insert_last("b".to_string()).error().unwrap().is_validation_rejected());
        let children = readonly.value();
        assert!(children[0].set("x".to_string()).error().unwrap().is_validation_rejected());
        assert_eq!(values(&list), ["a"]);
    }

    #[test]
    fn display_lists_children() {
        let list = ListSignal::new();
        list.insert_last(1_i32);
        list.insert_last(2_i32);
        assert_eq!(list.to_string(), "ListSignal[ValueSignal[1], ValueSignal[2]]");
    }
}
