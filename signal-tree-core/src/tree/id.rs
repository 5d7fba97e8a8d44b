//! Node and command identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node or a command in a signal tree.
///
/// Ids are random 64-bit values. A command that creates a node uses its own
/// id as the id of the new node, so both share the same space. Two values
/// are reserved: [`Id::ZERO`] addresses the root node and [`Id::EDGE`]
/// marks the start or end of a child list in a [`ListPosition`].
///
/// [`ListPosition`]: super::ListPosition
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    /// The id of the root node of every tree.
    pub const ZERO: Id = Id(0);

    /// Marker for the edge of a child list.
    pub const EDGE: Id = Id(u64::MAX);

    /// Generate a new random id that does not collide with the sentinels.
    pub fn random() -> Self {
        loop {
            let raw: u64 = rand::random();
            let id = Id(raw);
            if !id.is_sentinel() {
                return id;
            }
        }
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whether this is one of the reserved ids.
    pub fn is_sentinel(&self) -> bool {
        *self == Id::ZERO || *self == Id::EDGE
    }
}

impl From<u64> for Id {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Id::ZERO => f.write_str("Id(ZERO)"),
            Id::EDGE => f.write_str("Id(EDGE)"),
            Id(raw) => write!(f, "Id({raw:016x})"),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
