//! Entity identity and the transient identity set.

use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// The identity half of an entity key.
///
/// New, not-yet-saved entities carry a client-local identity; entities
/// the server has confirmed carry the server-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// Server-assigned identifier.
    Persistent(String),
    /// Client-local temporary identity for a new entity.
    Client(Uuid),
}

/// A stable (type, identity) handle for a tracked entity.
///
/// All inter-entity references (to-one targets, collection members,
/// graph edges) are expressed as keys, never as owned pointers, so
/// cyclic entity graphs stay representable. A key never changes for the
/// lifetime of a tracked entity; adopting a server identifier is
/// recorded on the entity and in the store index instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    /// Entity type name.
    pub entity_type: String,
    /// Persistent or client-local identity.
    pub identity: Identity,
}

impl EntityKey {
    /// Creates a key for a server-confirmed entity.
    pub fn persistent(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: Identity::Persistent(id.into()),
        }
    }

    /// Creates a key with a fresh client-local identity.
    pub fn client(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: Identity::Client(Uuid::new_v4()),
        }
    }

    /// Returns the server identifier, if the identity is persistent.
    pub fn id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Persistent(id) => Some(id),
            Identity::Client(_) => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Identity::Persistent(id) => write!(f, "{}:{}", self.entity_type, id),
            Identity::Client(uuid) => write!(f, "{}:client({})", self.entity_type, uuid),
        }
    }
}

/// A transient set of entity keys used to break cycles.
///
/// One identity set is scoped to a single merge pass or a single graph
/// build and discarded afterwards; it is not a cache and must never be
/// reused across passes.
#[derive(Debug, Default)]
pub struct IdentitySet {
    seen: HashSet<EntityKey>,
}

impl IdentitySet {
    /// Creates an empty identity set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key; returns true if it was not already present.
    pub fn insert(&mut self, key: &EntityKey) -> bool {
        self.seen.insert(key.clone())
    }

    /// Returns true if the key has been recorded.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.seen.contains(key)
    }

    /// Number of recorded keys.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if no keys have been recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_keys_compare_by_type_and_id() {
        let a = EntityKey::persistent("post", "1");
        let b = EntityKey::persistent("post", "1");
        let c = EntityKey::persistent("comment", "1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.id(), Some("1"));
    }

    #[test]
    fn client_keys_are_unique() {
        let a = EntityKey::client("post");
        let b = EntityKey::client("post");
        assert_ne!(a, b);
        assert_eq!(a.id(), None);
    }

    #[test]
    fn identity_set_deduplicates() {
        let mut set = IdentitySet::new();
        let key = EntityKey::persistent("post", "1");
        assert!(set.insert(&key));
        assert!(!set.insert(&key));
        assert!(set.contains(&key));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_formats() {
        let key = EntityKey::persistent("post", "17");
        assert_eq!(key.to_string(), "post:17");
        let key = EntityKey::client("post");
        assert!(key.to_string().starts_with("post:client("));
    }
}
