//! The entity store: tracked entities, shadows, and the identifier
//! index.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::change_feed::{ChangeBatch, ChangeEvent, ChangeFeed};
use crate::entity::{Entity, RelationshipValue};
use crate::identity::EntityKey;
use crate::schema::{Cardinality, SchemaRegistry};
use crate::shadow::Shadow;
use crate::value::Value;

/// Holds all locally tracked entities together with their shadows and
/// a (type, identifier) index for resolving fetched server data.
///
/// The store is the single mutation point for tracked state: lazy
/// relationship materialization, identifier adoption, and shadow
/// replacement all go through it, and its change feed delivers
/// coalesced notifications for every logical operation.
pub struct EntityStore {
    schema: Arc<SchemaRegistry>,
    entities: HashMap<EntityKey, Entity>,
    shadows: HashMap<EntityKey, Shadow>,
    by_id: HashMap<(String, String), EntityKey>,
    feed: ChangeFeed,
}

impl EntityStore {
    /// Creates an empty store over the given schema.
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self {
            schema,
            entities: HashMap::new(),
            shadows: HashMap::new(),
            by_id: HashMap::new(),
            feed: ChangeFeed::new(),
        }
    }

    /// The relationship schema this store was built over.
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Subscribes to coalesced change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Publishes an accumulated change batch.
    pub fn publish(&self, batch: ChangeBatch) {
        self.feed.publish(batch);
    }

    /// Starts tracking an entity without a confirmation baseline.
    ///
    /// Used for newly created, not-yet-saved entities. Panics if the
    /// entity's identifier is already tracked under a different key.
    pub fn track(&mut self, entity: Entity) -> EntityKey {
        let key = entity.key().clone();
        if let Some(id) = entity.id() {
            Self::index_identifier(&mut self.by_id, &key, id);
        }
        trace!(key = %key, "tracking entity");
        self.entities.insert(key.clone(), entity);
        key
    }

    /// Starts tracking a server-confirmed entity, capturing its shadow.
    pub fn load(&mut self, entity: Entity) -> EntityKey {
        let key = self.track(entity);
        self.refresh_shadow(&key);
        key
    }

    /// Looks up an entity.
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    /// Looks up an entity mutably.
    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut Entity> {
        self.entities.get_mut(key)
    }

    /// Returns true if the key is tracked.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entities are tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates over the tracked keys.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entities.keys()
    }

    /// Resolves a (type, identifier) pair to a tracked key.
    pub fn lookup(&self, entity_type: &str, id: &str) -> Option<&EntityKey> {
        self.by_id
            .get(&(entity_type.to_string(), id.to_string()))
    }

    /// The last-confirmed shadow of an entity, if one exists.
    pub fn shadow(&self, key: &EntityKey) -> Option<&Shadow> {
        self.shadows.get(key)
    }

    /// Replaces the shadow with a snapshot of the entity's current
    /// state. No-op for untracked keys.
    pub fn refresh_shadow(&mut self, key: &EntityKey) {
        if let Some(entity) = self.entities.get(key) {
            let snapshot = Shadow::capture(entity);
            self.shadows.insert(key.clone(), snapshot);
        }
    }

    /// Rebases the shadow onto freshly fetched server state.
    ///
    /// The confirmed entity's attributes and metadata overwrite the
    /// baseline; attributes it does not mention keep their previous
    /// baseline values, so local edits the server has not seen stay
    /// diffable and are committed later. Relationship slots are
    /// snapshotted from the entity's current state. An entity with no
    /// prior shadow starts from an empty baseline. No-op for untracked
    /// keys.
    pub fn rebase_shadow(&mut self, key: &EntityKey, confirmed: &Entity) {
        let Some(entity) = self.entities.get(key) else {
            return;
        };
        let mut baseline = match self.shadows.get(key) {
            Some(shadow) => shadow.to_entity(),
            None => Entity::with_key(key.clone()),
        };
        baseline.id = entity.id.clone();
        for (name, value) in confirmed.attributes() {
            baseline.set_attribute(name.clone(), value.clone());
        }
        if confirmed.meta().is_some() {
            baseline.set_meta(confirmed.meta().cloned());
        }
        baseline.relationships = entity.relationships.clone();
        baseline.client_rev = entity.client_rev;
        self.shadows.insert(key.clone(), Shadow::capture(&baseline));
    }

    /// Records a server-assigned identifier on a tracked entity and in
    /// the index. The entity's key is untouched.
    ///
    /// Panics if the identifier is already tracked under a different
    /// key (an entity must never be present twice with distinct
    /// identities for the same type and identifier).
    pub fn adopt_identifier(&mut self, key: &EntityKey, id: impl Into<String>) {
        let id = id.into();
        let Some(entity) = self.entities.get_mut(key) else {
            panic!("cannot adopt identifier for untracked entity {key}");
        };
        if entity.id().is_none() {
            debug!(key = %key, id = %id, "adopting server identifier");
            entity.set_id(id.clone());
        }
        Self::index_identifier(&mut self.by_id, key, &id);
    }

    /// Applies a confirmed entity after a successful commit and
    /// replaces the shadow atomically.
    ///
    /// Attributes, metadata, and the client revision come from the
    /// confirmed entity; relationship slots keep their local content
    /// (relationship keys are client-side handles the server does not
    /// know about).
    pub fn confirm(&mut self, key: &EntityKey, confirmed: &Entity) {
        if let Some(id) = confirmed.id() {
            let id = id.to_string();
            self.adopt_identifier(key, id);
        }
        let Some(entity) = self.entities.get_mut(key) else {
            panic!("cannot confirm untracked entity {key}");
        };
        entity.attributes = confirmed.attributes.clone();
        entity.meta = confirmed.meta.clone();
        entity.client_rev = confirmed.client_rev;
        entity.deleted = false;
        let snapshot = Shadow::capture(entity);
        self.shadows.insert(key.clone(), snapshot);
    }

    /// Stops tracking an entity, dropping its shadow and index entry.
    /// Used after a confirmed delete.
    pub fn remove(&mut self, key: &EntityKey) -> Option<Entity> {
        let entity = self.entities.remove(key)?;
        self.shadows.remove(key);
        if let Some(id) = entity.id() {
            self.by_id
                .remove(&(entity.entity_type().to_string(), id.to_string()));
        }
        Some(entity)
    }

    /// Reads a relationship slot, lazily materializing the collection
    /// of a to-many relationship on a new entity.
    ///
    /// The lazily created collection is bound to the entity as owner
    /// and seeded from any pending content supplied earlier.
    pub fn get_relationship(&mut self, key: &EntityKey, name: &str) -> Option<&RelationshipValue> {
        let entity = self.entities.get_mut(key)?;
        let descriptor = self.schema.descriptor(entity.entity_type(), name)?;
        if descriptor.cardinality == Cardinality::ToMany
            && entity.is_new()
            && entity.collection(name).is_none()
        {
            entity.materialize_collection(name);
        }
        self.entities.get(key).and_then(|entity| entity.relationship(name))
    }

    /// Assigns a to-one relationship target, recording one coalesced
    /// change when the target actually changes.
    ///
    /// Panics if the relationship is not declared to-one for the
    /// entity's type (malformed relationship metadata is a programming
    /// error).
    pub fn set_reference(
        &mut self,
        key: &EntityKey,
        name: &str,
        target: Option<EntityKey>,
        batch: &mut ChangeBatch,
    ) {
        let Some(entity) = self.entities.get_mut(key) else {
            panic!("cannot set relationship on untracked entity {key}");
        };
        match self.schema.descriptor(entity.entity_type(), name) {
            Some(descriptor) if descriptor.cardinality == Cardinality::ToOne => {}
            Some(_) => panic!(
                "relationship '{name}' on '{}' is not to-one",
                entity.entity_type()
            ),
            None => panic!(
                "relationship '{name}' is not declared for '{}'",
                entity.entity_type()
            ),
        }
        if entity.set_reference(name, target) {
            batch.record_relationship(key, name);
        }
    }

    /// Assigns to-many content, copying it into the entity's own
    /// collection.
    ///
    /// An already-materialized collection is updated in place
    /// (clear and re-add) so its owner binding and any observers
    /// survive; otherwise a collection is materialized and bound to the
    /// entity. Content is always copied, never aliased, so no two
    /// entities ever share a collection. At most one coalesced change
    /// is recorded per call, and none when the content is unchanged.
    ///
    /// Panics if the relationship is not declared to-many for the
    /// entity's type.
    pub fn set_collection(
        &mut self,
        key: &EntityKey,
        name: &str,
        contents: Vec<EntityKey>,
        meta: Option<Value>,
        batch: &mut ChangeBatch,
    ) {
        let Some(entity) = self.entities.get_mut(key) else {
            panic!("cannot set relationship on untracked entity {key}");
        };
        match self.schema.descriptor(entity.entity_type(), name) {
            Some(descriptor) if descriptor.cardinality == Cardinality::ToMany => {}
            Some(_) => panic!(
                "relationship '{name}' on '{}' is not to-many",
                entity.entity_type()
            ),
            None => panic!(
                "relationship '{name}' is not declared for '{}'",
                entity.entity_type()
            ),
        }

        let unchanged = entity.collection(name).is_some()
            && entity.to_many_members(name) == contents.as_slice()
            && entity.to_many_meta(name) == meta.as_ref();
        if unchanged {
            return;
        }

        let collection = entity.materialize_collection(name);
        collection.replace(contents);
        collection.set_meta(meta);
        batch.record_relationship(key, name);
    }

    fn index_identifier(
        by_id: &mut HashMap<(String, String), EntityKey>,
        key: &EntityKey,
        id: &str,
    ) {
        match by_id.entry((key.entity_type.clone(), id.to_string())) {
            Entry::Vacant(slot) => {
                slot.insert(key.clone());
            }
            Entry::Occupied(slot) => {
                assert_eq!(
                    slot.get(),
                    key,
                    "identifier {}:{id} is already tracked under a different identity",
                    key.entity_type
                );
            }
        }
    }
}
