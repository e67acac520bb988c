//! Tracked entities.

use std::collections::BTreeMap;

use crate::collection::RelationshipCollection;
use crate::identity::EntityKey;
use crate::value::Value;

/// The value held in one relationship slot of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipValue {
    /// A to-one reference, possibly cleared.
    Reference(Option<EntityKey>),
    /// A materialized to-many collection.
    Collection(RelationshipCollection),
    /// To-many content supplied before the collection is materialized.
    Pending(Vec<EntityKey>),
}

/// A typed, identifiable record tracked by the sync core.
///
/// An entity has a stable [`EntityKey`], an optional server identifier
/// (absent while the entity is new), attribute and relationship slots,
/// a client revision counter, and an optional opaque metadata payload.
/// Application code and the sync core mutate entities in place; the
/// enclosing store serializes access.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub(crate) key: EntityKey,
    pub(crate) id: Option<String>,
    pub(crate) attributes: BTreeMap<String, Value>,
    pub(crate) relationships: BTreeMap<String, RelationshipValue>,
    pub(crate) client_rev: u64,
    pub(crate) meta: Option<Value>,
    pub(crate) deleted: bool,
}

impl Entity {
    /// Creates a new entity with a fresh client-local identity and no
    /// server identifier.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::with_key(EntityKey::client(entity_type))
    }

    /// Creates an entity for server-confirmed data, keyed by its
    /// server identifier.
    pub fn persistent(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut entity = Self::with_key(EntityKey::persistent(entity_type, id.clone()));
        entity.id = Some(id);
        entity
    }

    /// Creates an empty entity under an explicit key, adopting the
    /// key's persistent identifier if it has one.
    ///
    /// Used when reconstituting fetched data or building a merge
    /// destination placeholder for an entity not seen before.
    pub fn with_key(key: EntityKey) -> Self {
        let id = key.id().map(str::to_string);
        Self {
            key,
            id,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            client_rev: 0,
            meta: None,
            deleted: false,
        }
    }

    /// The stable key of this entity.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.key.entity_type
    }

    /// Server identifier, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Records the server identifier on this entity.
    ///
    /// The store's identifier index is maintained separately via
    /// [`crate::EntityStore::adopt_identifier`]; call that instead for
    /// tracked entities.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Returns true while the entity has no server identifier.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Returns true once the entity is marked deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Marks the entity deleted. The remote delete happens on the next
    /// commit.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Client revision counter.
    pub fn client_rev(&self) -> u64 {
        self.client_rev
    }

    /// Sets the client revision counter.
    pub fn set_client_rev(&mut self, rev: u64) {
        self.client_rev = rev;
    }

    /// Increments the client revision counter.
    pub fn bump_client_rev(&mut self) {
        self.client_rev += 1;
    }

    /// Opaque metadata payload.
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Sets the metadata payload.
    pub fn set_meta(&mut self, meta: Option<Value>) {
        self.meta = meta;
    }

    /// All attributes by name.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// One attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Sets an attribute, returning true if the stored value actually
    /// changed (value equality). Unchanged writes are skipped so they
    /// produce no change notifications.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if self.attributes.get(&name) == Some(&value) {
            return false;
        }
        self.attributes.insert(name, value);
        true
    }

    /// All relationship slots by name.
    pub fn relationships(&self) -> &BTreeMap<String, RelationshipValue> {
        &self.relationships
    }

    /// One relationship slot by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    /// The target of a to-one relationship, if set.
    pub fn reference(&self, name: &str) -> Option<&EntityKey> {
        match self.relationships.get(name) {
            Some(RelationshipValue::Reference(target)) => target.as_ref(),
            _ => None,
        }
    }

    /// Sets a to-one relationship target, returning true if it changed.
    pub fn set_reference(&mut self, name: impl Into<String>, target: Option<EntityKey>) -> bool {
        let name = name.into();
        if self.reference(&name) == target.as_ref() && self.relationships.contains_key(&name) {
            return false;
        }
        if self.reference(&name) == target.as_ref() && target.is_none() {
            // absent slot and cleared slot are the same state
            return false;
        }
        self.relationships
            .insert(name, RelationshipValue::Reference(target));
        true
    }

    /// The materialized collection of a to-many relationship.
    pub fn collection(&self, name: &str) -> Option<&RelationshipCollection> {
        match self.relationships.get(name) {
            Some(RelationshipValue::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    /// Mutable access to a materialized collection.
    pub fn collection_mut(&mut self, name: &str) -> Option<&mut RelationshipCollection> {
        match self.relationships.get_mut(name) {
            Some(RelationshipValue::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    /// Members of a to-many relationship, materialized or pending.
    pub fn to_many_members(&self, name: &str) -> &[EntityKey] {
        match self.relationships.get(name) {
            Some(RelationshipValue::Collection(collection)) => collection.members(),
            Some(RelationshipValue::Pending(members)) => members,
            _ => &[],
        }
    }

    /// Collection-level metadata of a to-many relationship.
    pub fn to_many_meta(&self, name: &str) -> Option<&Value> {
        self.collection(name).and_then(RelationshipCollection::meta)
    }

    /// Supplies to-many content ahead of materialization.
    ///
    /// The content seeds the collection created on first access.
    pub fn set_pending_contents(&mut self, name: impl Into<String>, members: Vec<EntityKey>) {
        self.relationships
            .insert(name.into(), RelationshipValue::Pending(members));
    }

    /// Materializes the collection for a to-many relationship, seeding
    /// it from any pending content and binding this entity as owner.
    ///
    /// Returns the existing collection if one is already materialized.
    pub fn materialize_collection(&mut self, name: &str) -> &mut RelationshipCollection {
        let already = matches!(
            self.relationships.get(name),
            Some(RelationshipValue::Collection(_))
        );
        if !already {
            let seed = match self.relationships.get(name) {
                Some(RelationshipValue::Pending(members)) => members.clone(),
                _ => Vec::new(),
            };
            let mut collection = RelationshipCollection::new(self.key.clone(), name);
            collection.replace(seed);
            self.relationships
                .insert(name.to_string(), RelationshipValue::Collection(collection));
        }
        match self.relationships.get_mut(name) {
            Some(RelationshipValue::Collection(collection)) => collection,
            _ => unreachable!("collection slot was just materialized"),
        }
    }
}
