//! Map signals.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::command::{KeyExpectation, SignalCommand};
use crate::operation::SignalOperation;
use crate::tree::{Accept, Aspect, Data, Id};

use super::core::{decode, encode, encoding_failed, SignalCore};
use super::traits::{Readable, Signal, StructuralNode};
use super::ValueSignal;

/// A signal holding string-keyed child value signals, in insertion order.
///
/// Like [`ListSignal`](super::ListSignal), reading the map gives the child
/// signals and depends only on which keys exist.
pub struct MapSignal<T> {
    core: SignalCore,
    _type: PhantomData<fn() -> T>,
}

impl<T> MapSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Create an empty map backed by a new tree.
    pub fn new() -> Self {
        Self::from_core(SignalCore::fresh(None))
    }

    /// Store `value` under `key`. An existing child keeps its identity and
    /// only gets the new value. Resolves with the previous value, if any.
    pub fn put(&self, key: impl Into<String>, value: T) -> SignalOperation<Option<T>> {
        let value = match encode(&value) {
            Ok(value) => value,
            Err(err) => return encoding_failed(err),
        };

        let id = self.id();
        self.core.submit(SignalCommand::put(id, key, Some(value)), move |accept| {
            previous_child_value(accept, id)
        })
    }

    /// Store `value` under `key` unless the key is in use. Resolves with
    /// whether the value was stored.
    pub fn put_if_absent(&self, key: impl Into<String>, value: T) -> SignalOperation<bool> {
        let value = match encode(&value) {
            Ok(value) => value,
            Err(err) => return encoding_failed(err),
        };

        let command = SignalCommand::put_if_absent(self.id(), key, Some(value));
        let inserted = command.command_id();
        self.core
            .submit(command, move |accept| accept.updates.contains_key(&inserted))
    }

    /// Remove the child under `key`. Fails if there is none.
    pub fn remove(&self, key: impl Into<String>) -> SignalOperation<()> {
        self.core.submit_void(SignalCommand::remove_by_key(self.id(), key))
    }

    /// Check that `child` is the child under `key`.
    pub fn verify_key(
        &self,
        key: impl Into<String>,
        child: &ValueSignal<T>,
    ) -> SignalOperation<()> {
        self.verify(key, KeyExpectation::Child(child.id()))
    }

    pub fn verify_has_key(&self, key: impl Into<String>) -> SignalOperation<()> {
        self.verify(key, KeyExpectation::Present)
    }

    pub fn verify_key_absent(&self, key: impl Into<String>) -> SignalOperation<()> {
        self.verify(key, KeyExpectation::Absent)
    }

    fn verify(&self, key: impl Into<String>, expected: KeyExpectation) -> SignalOperation<()> {
        self.core
            .submit_void(SignalCommand::key_condition(self.id(), key, expected))
    }
}

/// The old value of the map child a `put` overwrote.
fn previous_child_value<T: DeserializeOwned>(accept: &Accept, map: Id) -> Option<T> {
    accept.updates.iter().find_map(|(id, modification)| {
        let old = modification.old.as_ref()?;
        let new = modification.new.as_ref()?;
        if new.parent != Some(map) {
            return None;
        }
        decode::<Option<T>>(*id, old.value.as_ref())
    })
}

impl<T> Default for MapSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal for MapSignal<T>
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

impl<T> Readable for MapSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    type Value = IndexMap<String, ValueSignal<T>>;
    const ASPECT: Aspect = Aspect::Structure;

    fn extract(core: &SignalCore, data: Option<&Data>) -> Self::Value {
        data.map(|data| {
            data.map_children
                .iter()
                .map(|(key, id)| (key.clone(), ValueSignal::from_core(core.child(*id))))
                .collect()
        })
        .unwrap_or_default()
    }
}

impl<T> StructuralNode for MapSignal<T> where
    T: Serialize + DeserializeOwned + Clone + Send + 'static
{
}

impl<T> Clone for MapSignal<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> PartialEq for MapSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core
    }
}

impl<T> Eq for MapSignal<T> {}

impl<T> Hash for MapSignal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.hash(state);
    }
}

impl<T> fmt::Debug for MapSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapSignal")
            .field("tree", &self.core.tree().tree_id())
            .field("id", &self.core.id())
            .finish()
    }
}

impl<T> fmt::Display for MapSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .peek()
            .iter()
            .map(|(key, child)| format!("{key}: {child}"))
            .collect();
        write!(f, "MapSignal{{{}}}", entries.join(", "))
    }
}
