//! Ordered to-many relationship collections.

use crate::identity::EntityKey;
use crate::value::Value;

/// An ordered collection of related entity keys with an owner
/// back-reference.
///
/// A collection belongs to exactly one entity. Assigning collection
/// content to another entity copies the members; the collection value
/// itself is never shared between two owners. The optional `meta`
/// payload carries collection-level data such as pagination info.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipCollection {
    owner: EntityKey,
    name: String,
    members: Vec<EntityKey>,
    meta: Option<Value>,
}

impl RelationshipCollection {
    /// Creates an empty collection bound to its owner.
    pub fn new(owner: EntityKey, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            members: Vec::new(),
            meta: None,
        }
    }

    /// The entity holding this collection.
    pub fn owner(&self) -> &EntityKey {
        &self.owner
    }

    /// The relationship name this collection materializes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in order.
    pub fn members(&self) -> &[EntityKey] {
        &self.members
    }

    /// Collection-level metadata.
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Sets the collection-level metadata.
    pub fn set_meta(&mut self, meta: Option<Value>) {
        self.meta = meta;
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the collection has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if the key is a member.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.members.contains(key)
    }

    /// Removes all members. Owner binding is untouched.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Appends a member.
    pub fn push(&mut self, key: EntityKey) {
        self.members.push(key);
    }

    /// Replaces the members in place, preserving the owner binding.
    pub fn replace(&mut self, contents: Vec<EntityKey>) {
        self.members = contents;
    }

    /// Iterates over the members in order.
    pub fn iter(&self) -> std::slice::Iter<'_, EntityKey> {
        self.members.iter()
    }
}
