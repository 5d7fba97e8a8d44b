//! Usages
//!
//! A [`Usage`] is the set of node aspects a computation read, each with the
//! generation it saw. Comparing those generations with the live ones tells
//! whether the computation is out of date.

use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::tree::{Aspect, Id, ObserverHandle, SignalTree};

/// One tracked read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageRecord {
    pub tree: SignalTree,
    pub node: Id,
    pub aspect: Aspect,
    /// Generation at the time of the read, `None` if the node was absent.
    pub generation: Option<u64>,
}

impl UsageRecord {
    pub(crate) fn new(
        tree: &SignalTree,
        node: Id,
        aspect: Aspect,
        generation: Option<u64>,
    ) -> Self {
        Self {
            tree: tree.clone(),
            node,
            aspect,
            generation,
        }
    }

    /// Record the current generation of an aspect of a node.
    pub fn observe(tree: &SignalTree, node: Id, aspect: Aspect) -> Self {
        Self::new(tree, node, aspect, tree.node_generation(node, aspect))
    }

    pub fn has_changes(&self) -> bool {
        self.tree.node_generation(self.node, self.aspect) != self.generation
    }

    fn refresh(&mut self) {
        self.generation = self.tree.node_generation(self.node, self.aspect);
    }

    fn same_source(&self, other: &UsageRecord) -> bool {
        self.tree == other.tree && self.node == other.node && self.aspect == other.aspect
    }
}

/// The reads made by one tracked computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    records: SmallVec<[UsageRecord; 4]>,
}

impl Usage {
    pub(crate) fn from_records(records: Vec<UsageRecord>) -> Self {
        let mut deduped: SmallVec<[UsageRecord; 4]> = SmallVec::new();
        for record in records {
            if !deduped.iter().any(|seen| seen.same_source(&record)) {
                deduped.push(record);
            }
        }
        Self { records: deduped }
    }

    /// A usage that never changes.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[UsageRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether anything read has changed since.
    pub fn has_changes(&self) -> bool {
        self.records.iter().any(UsageRecord::has_changes)
    }

    /// Invoke `listener` when something read by this usage changes.
    ///
    /// The listener gets `true` when it is invoked right away because the
    /// usage had already changed. It returns whether it wants to hear about
    /// the next change too. Changes that leave every recorded aspect as it
    /// was, such as setting a value to itself, do not invoke it.
    #[must_use = "the listener is removed when the registration is dropped"]
    pub fn on_next_change<F>(&self, listener: F) -> UsageRegistration
    where
        F: FnMut(bool) -> bool + Send + 'static,
    {
        let shared = Arc::new(SharedListener {
            state: Mutex::new(ListenerState {
                records: self.records.clone(),
                active: true,
            }),
            listener: Mutex::new(Box::new(listener)),
        });

        if self.has_changes() {
            let keep = {
                let mut listener = shared.listener.lock();
                (&mut **listener)(true)
            };
            if !keep {
                return UsageRegistration { handles: Vec::new() };
            }
            shared.state.lock().records.iter_mut().for_each(UsageRecord::refresh);
        }

        let mut handles = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let shared = Arc::clone(&shared);
            handles.push(record.tree.observe_next_change(record.node, move || shared.on_change()));
        }

        UsageRegistration { handles }
    }
}

type Listener = Box<dyn FnMut(bool) -> bool + Send>;

struct ListenerState {
    records: SmallVec<[UsageRecord; 4]>,
    active: bool,
}

struct SharedListener {
    state: Mutex<ListenerState>,
    listener: Mutex<Listener>,
}

impl SharedListener {
    /// Called by a tree observer. Returns whether that observer should stay.
    fn on_change(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.active {
                return false;
            }
            if !state.records.iter().any(UsageRecord::has_changes) {
                return true;
            }
        }

        // A listener that changes the tree may land here again.
        let Some(mut listener) = self.listener.try_lock() else {
            return true;
        };

        self.state.lock().records.iter_mut().for_each(UsageRecord::refresh);
        trace!("usage changed");
        let keep = (&mut **listener)(false);
        drop(listener);

        if !keep {
            self.state.lock().active = false;
        }
        keep
    }
}

/// Registration of a usage listener. Unregisters when dropped.
pub struct UsageRegistration {
    handles: Vec<ObserverHandle>,
}

impl UsageRegistration {
    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.handles.iter().any(ObserverHandle::is_active)
    }

    pub fn cancel(&self) {
        self.handles.iter().for_each(ObserverHandle::cancel);
    }
}

impl std::fmt::Debug for UsageRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRegistration")
            .field("observers", &self.handles.len())
            .finish()
    }
}
