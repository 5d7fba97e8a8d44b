//! Signal Tree
//!
//! The [`SignalTree`] owns the node graph of one shared state and is the
//! only thing that changes it. It wraps a [`TreeRevision`] with:
//!
//! - A lock serializing every `apply` and `read`, so generation counters
//!   follow one total order of commands.
//! - Generation counters: one global counter bumped by every command that
//!   changes something, and per node one counter for each [`Aspect`]
//!   recording the global generation of its last change.
//! - Change observers keyed by node id, invoked after the lock has been
//!   released so that they may read from and write to the tree again.
//! - Subscribers receiving every processed top-level command and its result.
//!
//! # Thread Safety
//!
//! `SignalTree` is a cheap handle (`Arc`) and can be shared across threads.
//! Observers live in a concurrent map so notifying them never needs the
//! tree lock.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::command::SignalCommand;

use super::revision::{ResultCollector, TreeRevision};
use super::result::{Accept, CommandResult};
use super::{Data, Id};

/// The part of a node a reader depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aspect {
    /// The node's value.
    Value,
    /// The node's list and map children.
    Structure,
    /// Anything about the node, including its parent and last update.
    Node,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeGenerations {
    value: u64,
    structure: u64,
    node: u64,
}

impl NodeGenerations {
    fn get(&self, aspect: Aspect) -> u64 {
        match aspect {
            Aspect::Value => self.value,
            Aspect::Structure => self.structure,
            Aspect::Node => self.node,
        }
    }
}

struct TreeState {
    revision: TreeRevision,
    generation: u64,
    generations: HashMap<Id, NodeGenerations>,
}

impl TreeState {
    fn node_generation(&self, id: Id, aspect: Aspect) -> Option<u64> {
        self.revision.data(id)?;
        Some(
            self.generations
                .get(&id)
                .map(|generations| generations.get(aspect))
                .unwrap_or_default(),
        )
    }

    /// Record the generation bump for an accepted command. Returns the ids
    /// of the nodes that changed.
    fn record(&mut self, accept: &Accept) -> Vec<Id> {
        if accept.is_noop() {
            return Vec::new();
        }

        self.generation += 1;
        let generation = self.generation;
        trace!(generation, nodes = accept.updates.len(), "generation bumped");

        let mut changed = Vec::with_capacity(accept.updates.len());
        for (id, modification) in &accept.updates {
            changed.push(*id);
            match (&modification.old, &modification.new) {
                (_, None) => {
                    self.generations.remove(id);
                }
                (old, Some(new)) => {
                    let entry = self.generations.entry(*id).or_default();
                    if old.as_ref().map_or(true, |old| old.value != new.value) {
                        entry.value = generation;
                    }
                    if old.as_ref().map_or(true, |old| old.structure_differs(new)) {
                        entry.structure = generation;
                    }
                    entry.node = generation;
                }
            }
        }
        changed
    }
}

/// Node generations frozen at the time a revision was copied.
#[derive(Debug, Clone, Default)]
pub(crate) struct GenerationSnapshot {
    generations: HashMap<Id, NodeGenerations>,
}

impl GenerationSnapshot {
    /// Generation of an aspect of a node, or `None` if the node did not
    /// exist in the copied revision.
    pub(crate) fn get(&self, id: Id, aspect: Aspect) -> Option<u64> {
        self.generations.get(&id).map(|generations| generations.get(aspect))
    }
}

type Listener = Box<dyn FnMut() -> bool + Send>;
type ProcessedCallback = Arc<dyn Fn(&SignalCommand, &CommandResult) + Send + Sync>;

struct Observer {
    active: AtomicBool,
    listener: Mutex<Listener>,
}

struct TreeInner {
    id: u64,
    state: Mutex<TreeState>,
    observers: DashMap<Id, Vec<Arc<Observer>>>,
    processed: DashMap<u64, ProcessedCallback>,
}

/// The authoritative owner of a tree of signal nodes.
#[derive(Clone)]
pub struct SignalTree {
    inner: Arc<TreeInner>,
}

impl SignalTree {
    /// Create a tree holding only an empty root node.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        Self {
            inner: Arc::new(TreeInner {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(TreeState {
                    revision: TreeRevision::new(),
                    generation: 0,
                    generations: HashMap::new(),
                }),
                observers: DashMap::new(),
                processed: DashMap::new(),
            }),
        }
    }

    /// Unique id of this tree within the process.
    pub fn tree_id(&self) -> u64 {
        self.inner.id
    }

    /// Get the current snapshot of a node.
    pub fn read(&self, id: Id) -> Option<Arc<Data>> {
        self.inner.state.lock().revision.data(id).cloned()
    }

    /// Get the current snapshot of a node and the generation of `aspect`
    /// it belongs to.
    pub(crate) fn read_with_generation(
        &self,
        id: Id,
        aspect: Aspect,
    ) -> (Option<Arc<Data>>, Option<u64>) {
        let state = self.inner.state.lock();
        (state.revision.data(id).cloned(), state.node_generation(id, aspect))
    }

    /// Copy the current revision.
    pub fn snapshot(&self) -> TreeRevision {
        self.inner.state.lock().revision.clone()
    }

    /// Copy the current revision along with the generations of its nodes.
    pub(crate) fn snapshot_with_generations(&self) -> (TreeRevision, GenerationSnapshot) {
        let state = self.inner.state.lock();
        let generations = state
            .revision
            .ids()
            .map(|id| (id, state.generations.get(&id).copied().unwrap_or_default()))
            .collect();
        (state.revision.clone(), GenerationSnapshot { generations })
    }

    /// The global generation counter.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Generation of the last change to an aspect of a node, or `None` if
    /// the node does not exist.
    pub fn node_generation(&self, id: Id, aspect: Aspect) -> Option<u64> {
        self.inner.state.lock().node_generation(id, aspect)
    }

    /// Apply a command.
    pub fn apply(&self, command: &SignalCommand) -> CommandResult {
        self.lock().apply(command).0
    }

    /// Apply a command and return the results of nested commands as well.
    pub fn apply_collecting(&self, command: &SignalCommand) -> (CommandResult, ResultCollector) {
        self.lock().apply(command)
    }

    /// Take the tree lock for a sequence of operations.
    ///
    /// Notifications for changes made through the guard are delivered when
    /// it is dropped, after the lock is released.
    pub fn lock(&self) -> TreeGuard<'_> {
        TreeGuard {
            tree: self,
            state: Some(self.inner.state.lock()),
            changed: Vec::new(),
            processed: Vec::new(),
        }
    }

    /// Invoke `listener` on the next change to node `id`.
    ///
    /// The listener returns `true` to stay registered for the change after
    /// that. Dropping the returned handle unregisters it.
    #[must_use = "the observer is removed when the handle is dropped"]
    pub fn observe_next_change<F>(&self, id: Id, listener: F) -> ObserverHandle
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let observer = Arc::new(Observer {
            active: AtomicBool::new(true),
            listener: Mutex::new(Box::new(listener)),
        });
        {
            let mut observers = self.inner.observers.entry(id).or_default();
            observers.retain(|observer| observer.active.load(Ordering::SeqCst));
            observers.push(Arc::clone(&observer));
        }

        ObserverHandle {
            tree: Arc::downgrade(&self.inner),
            node: id,
            observer,
        }
    }

    /// Number of observers waiting for a change to node `id`.
    #[cfg(test)]
    pub(crate) fn observer_count(&self, id: Id) -> usize {
        self.inner.observers.get(&id).map_or(0, |observers| observers.len())
    }

    /// Receive every processed top-level command and its result.
    ///
    /// Dropping the returned handle unsubscribes.
    #[must_use = "the subscriber is removed when the handle is dropped"]
    pub fn subscribe_processed<F>(&self, callback: F) -> ProcessedSubscription
    where
        F: Fn(&SignalCommand, &CommandResult) + Send + Sync + 'static,
    {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let key = COUNTER.fetch_add(1, Ordering::Relaxed);
        self.inner.processed.insert(key, Arc::new(callback));

        ProcessedSubscription {
            tree: Arc::downgrade(&self.inner),
            key,
        }
    }

    fn notify(&self, changed: Vec<Id>, processed: Vec<(SignalCommand, CommandResult)>) {
        if !processed.is_empty() && !self.inner.processed.is_empty() {
            let callbacks: Vec<ProcessedCallback> = self
                .inner
                .processed
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            for (command, result) in &processed {
                for callback in &callbacks {
                    callback(command, result);
                }
            }
        }

        for id in changed {
            let Some((_, observers)) = self.inner.observers.remove(&id) else {
                continue;
            };
            trace!(node = %id, observers = observers.len(), "notifying observers");

            let exists = self.read(id).is_some();
            for observer in observers {
                if !observer.active.load(Ordering::SeqCst) {
                    continue;
                }
                let keep = {
                    let mut listener = observer.listener.lock();
                    (&mut **listener)()
                };
                if keep && exists && observer.active.load(Ordering::SeqCst) {
                    self.inner.observers.entry(id).or_default().push(observer);
                } else {
                    observer.active.store(false, Ordering::SeqCst);
                }
            }
        }
    }
}

impl Default for SignalTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SignalTree {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SignalTree {}

impl Hash for SignalTree {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for SignalTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalTree")
            .field("id", &self.inner.id)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Exclusive access to a tree.
pub struct TreeGuard<'a> {
    tree: &'a SignalTree,
    state: Option<MutexGuard<'a, TreeState>>,
    changed: Vec<Id>,
    processed: Vec<(SignalCommand, CommandResult)>,
}

impl TreeGuard<'_> {
    fn state(&mut self) -> &mut TreeState {
        self.state.as_mut().expect("tree guard used after release")
    }

    /// Check whether a command would be accepted, without applying it.
    pub fn can_apply(&mut self, command: &SignalCommand) -> bool {
        self.dry_run(command).0.is_accepted()
    }

    /// Evaluate a command against a copy of the current revision.
    pub fn dry_run(&mut self, command: &SignalCommand) -> (CommandResult, ResultCollector) {
        let mut scratch = self.state().revision.clone();
        let mut results = ResultCollector::new();
        let result = scratch.apply_collecting(command, &mut results);
        (result, results)
    }

    /// Release the lock now. Observers are still notified on drop.
    ///
    /// Lets a caller holding several guards release all locks before any
    /// observer runs.
    pub fn release(&mut self) {
        self.state.take();
    }

    /// Apply a command under this guard.
    pub fn apply(&mut self, command: &SignalCommand) -> (CommandResult, ResultCollector) {
        let mut results = ResultCollector::new();
        let state = self.state();
        let result = state.revision.apply_collecting(command, &mut results);

        let changed = match &result {
            CommandResult::Accept(accept) => state.record(accept),
            CommandResult::Reject(_) => Vec::new(),
        };
        debug!(
            command = %command.command_id(),
            kind = command.kind(),
            accepted = result.is_accepted(),
            changed = changed.len(),
            "applied command"
        );

        self.changed.extend(changed);
        self.processed.push((command.clone(), result.clone()));
        (result, results)
    }
}

impl Drop for TreeGuard<'_> {
    fn drop(&mut self) {
        // Release the lock before anyone gets to react to the changes.
        self.state.take();

        let mut changed = std::mem::take(&mut self.changed);
        changed.sort_unstable();
        changed.dedup();
        let processed = std::mem::take(&mut self.processed);
        self.tree.notify(changed, processed);
    }
}

/// Registration of a change observer. Unregisters when dropped.
pub struct ObserverHandle {
    tree: Weak<TreeInner>,
    node: Id,
    observer: Arc<Observer>,
}

impl ObserverHandle {
    /// Whether the observer is still waiting for a change.
    pub fn is_active(&self) -> bool {
        self.observer.active.load(Ordering::SeqCst)
    }

    /// Unregister the observer.
    pub fn cancel(&self) {
        self.observer.active.store(false, Ordering::SeqCst);
        let Some(tree) = self.tree.upgrade() else {
            return;
        };
        tree.observers.remove_if_mut(&self.node, |_, observers| {
            observers.retain(|observer| !Arc::ptr_eq(observer, &self.observer));
            observers.is_empty()
        });
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Registration of a processed-command subscriber. Unsubscribes when dropped.
pub struct ProcessedSubscription {
    tree: Weak<TreeInner>,
    key: u64,
}

impl Drop for ProcessedSubscription {
    fn drop(&mut self) {
        if let Some(tree) = self.tree.upgrade() {
            tree.processed.remove(&self.key);
        }
    }
}
