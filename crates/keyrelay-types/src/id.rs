//! Identifier types for keyrelay.
//!
//! All identifiers are UUID v4 based so that causal ids stay unique
//! across every input adapter without coordination.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an event group (a command context or a batch).
///
/// Every published event carries the id of the
/// group that caused it as its `parent_id`, which is how the event trail
/// is stitched back together by listeners.
///
/// # Why No Default?
///
/// A group id is minted exactly once, by the group factory, at the moment
/// the group is created. A `Default` impl would make it too easy to create
/// dangling parent references.
///
/// # Example
///
/// ```
/// use keyrelay_types::GroupId;
///
/// let a = GroupId::new();
/// let b = GroupId::new();
/// assert_ne!(a, b);
/// assert!(a.to_string().starts_with("grp:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    /// Creates a new [`GroupId`] with a random UUID v4.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grp:{}", self.0)
    }
}

/// Identifier of a single published event.
///
/// # Example
///
/// ```
/// use keyrelay_types::EventId;
///
/// let id = EventId::new();
/// assert!(id.to_string().starts_with("evt:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new [`EventId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}
