//! Last-confirmed entity snapshots.

use std::collections::BTreeMap;

use crate::entity::{Entity, RelationshipValue};
use crate::identity::EntityKey;
use crate::value::Value;

/// An immutable snapshot of an entity as of the last successful server
/// confirmation.
///
/// One shadow exists per tracked entity, captured on first load or
/// successful create and replaced atomically on every successful
/// commit. It is only ever used as a diff baseline and is never mutated
/// in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Shadow {
    pub(crate) key: EntityKey,
    pub(crate) id: Option<String>,
    pub(crate) attributes: BTreeMap<String, Value>,
    pub(crate) relationships: BTreeMap<String, RelationshipValue>,
    pub(crate) client_rev: u64,
    pub(crate) meta: Option<Value>,
}

impl Shadow {
    /// Captures a snapshot of the entity's current state.
    pub fn capture(entity: &Entity) -> Self {
        Self {
            key: entity.key.clone(),
            id: entity.id.clone(),
            attributes: entity.attributes.clone(),
            relationships: entity.relationships.clone(),
            client_rev: entity.client_rev,
            meta: entity.meta.clone(),
        }
    }

    /// The key of the snapshotted entity.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Server identifier at snapshot time.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Client revision at snapshot time.
    pub fn client_rev(&self) -> u64 {
        self.client_rev
    }

    /// Metadata payload at snapshot time.
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Attributes at snapshot time.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// One attribute at snapshot time.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// One relationship slot at snapshot time.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    /// Reconstitutes an entity carrying the snapshotted state.
    ///
    /// Used to report the last-confirmed state instead of a
    /// half-applied local entity when a commit fails.
    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::with_key(self.key.clone());
        entity.id = self.id.clone();
        entity.attributes = self.attributes.clone();
        entity.relationships = self.relationships.clone();
        entity.client_rev = self.client_rev;
        entity.meta = self.meta.clone();
        entity
    }
}
