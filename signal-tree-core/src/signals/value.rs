//! Value and number signals.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::command::SignalCommand;
use crate::operation::SignalOperation;
use crate::tree::{Aspect, Data};

use super::core::{decode, encode, SignalCore};
use super::traits::{Readable, Signal, Writable};

/// A signal holding one value of type `T`.
///
/// The value is stored as JSON. Reading a value that does not decode into
/// `T` is a programming error and panics; use `Option<T>` for values that
/// may be missing.
pub struct ValueSignal<T> {
    core: SignalCore,
    _type: PhantomData<fn() -> T>,
}

impl<T> ValueSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Create a signal backed by a new tree.
    ///
    /// # Panics
    ///
    /// If `initial` cannot be represented as JSON.
    pub fn new(initial: T) -> Self {
        match encode(&initial) {
            Ok(value) => Self::from_core(SignalCore::fresh(Some(value))),
            Err(err) => panic!("initial value cannot be stored: {err}"),
        }
    }
}

impl<T> Signal for ValueSignal<T>
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

impl<T> Readable for ValueSignal<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    type Value = T;
    const ASPECT: Aspect = Aspect::Value;

    fn extract(core: &SignalCore, data: Option<&Data>) -> T {
        decode(core.id(), data.and_then(|data| data.value.as_ref()))
    }
}

impl<T> Writable for ValueSignal<T> where
    T: Serialize + DeserializeOwned + Clone + Send + 'static
{
}

impl<T> Clone for ValueSignal<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> PartialEq for ValueSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core
    }
}

impl<T> Eq for ValueSignal<T> {}

impl<T> Hash for ValueSignal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.hash(state);
    }
}

impl<T> fmt::Debug for ValueSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSignal")
            .field("tree", &self.core.tree().tree_id())
            .field("id", &self.core.id())
            .finish()
    }
}

impl<T> fmt::Display for ValueSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self
            .core
            .peek_data()
            .and_then(|data| data.value.clone())
            .unwrap_or(Value::Null);
        write!(f, "ValueSignal[{value}]")
    }
}

/// A signal holding a number.
///
/// A missing value reads as zero. Increments are applied by the tree, so
/// concurrent increments never conflict with each other.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NumberSignal {
    inner: ValueSignal<f64>,
}

impl NumberSignal {
    /// Create a number signal backed by a new tree.
    pub fn new(initial: f64) -> Self {
        Self {
            inner: ValueSignal::new(initial),
        }
    }

    /// Add `delta` to the value. The operation resolves with the new value.
    pub fn increment_by(&self, delta: f64) -> SignalOperation<f64> {
        let core = self.core().clone();
        let id = core.id();
        self.core().submit(SignalCommand::increment(id, delta), move |accept| {
            let data = accept.modification(id).and_then(|modification| modification.new.as_ref());
            Self::extract(&core, data.map(|data| &**data))
        })
    }

    /// The value rounded towards zero.
    pub fn value_as_int(&self) -> i64 {
        self.value() as i64
    }

    /// This signal as a plain value signal.
    pub fn as_value_signal(&self) -> &ValueSignal<f64> {
        &self.inner
    }
}

impl Signal for NumberSignal {
    fn core(&self) -> &SignalCore {
        self.inner.core()
    }

    fn from_core(core: SignalCore) -> Self {
        Self {
            inner: ValueSignal::from_core(core),
        }
    }
}

impl Readable for NumberSignal {
    type Value = f64;
    const ASPECT: Aspect = Aspect::Value;

    fn extract(core: &SignalCore, data: Option<&Data>) -> f64 {
        match data.and_then(|data| data.value.as_ref()) {
            None | Some(Value::Null) => 0.0,
            Some(value) => decode(core.id(), Some(value)),
        }
    }
}

impl Writable for NumberSignal {}

impl fmt::Debug for NumberSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberSignal")
            .field("tree", &self.core().tree().tree_id())
            .field("id", &self.core().id())
            .finish()
    }
}

impl fmt::Display for NumberSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumberSignal[{}]", self.peek())
    }
}
