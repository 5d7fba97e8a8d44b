//! Command validators.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::SignalCommand;

type Predicate = dyn Fn(&SignalCommand) -> bool + Send + Sync;

/// A predicate deciding whether a façade may submit a command.
///
/// Validators compose by logical AND: a façade derived from another one
/// carries the validator of its origin combined with its own. Two
/// validators are equal only if they are the same instance, so façades
/// built from the same validator compare equal while façades built from
/// two separately created closures do not.
#[derive(Clone)]
pub struct CommandValidator(Arc<Predicate>);

static ANYTHING_GOES: OnceLock<CommandValidator> = OnceLock::new();
static REJECT_ALL: OnceLock<CommandValidator> = OnceLock::new();

impl CommandValidator {
    /// Create a validator from a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&SignalCommand) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// The validator that accepts every command.
    pub fn anything_goes() -> Self {
        ANYTHING_GOES
            .get_or_init(|| CommandValidator::new(|_| true))
            .clone()
    }

    /// The validator that rejects every mutation.
    pub fn reject_all() -> Self {
        REJECT_ALL
            .get_or_init(|| CommandValidator::new(|_| false))
            .clone()
    }

    /// Combine with another validator. Both must accept a command.
    pub fn and(&self, other: &CommandValidator) -> CommandValidator {
        if self.is_anything_goes() {
            other.clone()
        } else if other.is_anything_goes() || self == other {
            self.clone()
        } else {
            let first = Arc::clone(&self.0);
            let second = Arc::clone(&other.0);
            CommandValidator::new(move |command| first(command) && second(command))
        }
    }

    /// Check a command.
    ///
    /// Conditions never change the tree and always pass. A transaction
    /// passes if every command in it passes; its commands are checked in
    /// order and checking stops at the first rejection.
    pub fn accepts(&self, command: &SignalCommand) -> bool {
        match command {
            SignalCommand::Transaction { commands, .. } => {
                commands.iter().all(|command| self.accepts(command))
            }
            command if command.is_condition() => true,
            command => (self.0)(command),
        }
    }

    fn is_anything_goes(&self) -> bool {
        ANYTHING_GOES
            .get()
            .is_some_and(|anything| Arc::ptr_eq(&anything.0, &self.0))
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::anything_goes()
    }
}

impl PartialEq for CommandValidator {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for CommandValidator {}

impl Hash for CommandValidator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for CommandValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anything_goes() {
            f.write_str("CommandValidator(anything_goes)")
        } else if *self == CommandValidator::reject_all() {
            f.write_str("CommandValidator(reject_all)")
        } else {
            write!(f, "CommandValidator({:#x})", self.addr())
        }
    }
}
