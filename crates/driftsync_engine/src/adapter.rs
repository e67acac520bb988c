//! The adapter seam and an in-memory implementation for tests.
//!
//! The [`Adapter`] is the only point where the sync core touches
//! transport, serialization, or storage. It answers ownership and
//! embedding predicates synchronously and performs the actual remote
//! create/update/delete calls asynchronously.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use driftsync_model::{
    DiffEntry, Entity, EntityKey, EntityStore, RelationshipDescriptor, RelationshipValue, Shadow,
    Value,
};

/// Response from a remote create/update/delete call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterResponse {
    /// The server-confirmed entity, or `None` when the server returned
    /// no body (local state is then assumed authoritative).
    pub entity: Option<Entity>,
    /// Embedded children confirmed as part of this entity's commit.
    /// Their operations settle from this list instead of issuing their
    /// own remote calls.
    pub embedded: Vec<Entity>,
}

impl AdapterResponse {
    /// A response with no body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A response carrying the server-confirmed entity.
    pub fn entity(entity: Entity) -> Self {
        Self {
            entity: Some(entity),
            embedded: Vec::new(),
        }
    }

    /// Attaches confirmed embedded children.
    pub fn with_embedded(mut self, embedded: Vec<Entity>) -> Self {
        self.embedded = embedded;
        self
    }
}

/// A failed remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterError {
    /// Human-readable failure message.
    pub message: String,
    /// Server-reported error detail tied to specific fields.
    pub detail: Option<Value>,
    /// A richer server error payload, if the server supplied one.
    /// When absent, the operation reports the shadow instead of the
    /// mutated local entity.
    pub entity: Option<Entity>,
}

impl AdapterError {
    /// Creates a failure with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
            entity: None,
        }
    }

    /// Attaches server-reported error detail.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Attaches a richer server error payload.
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }
}

/// External collaborator performing remote persistence.
///
/// Implementations own the wire protocol, retries, and timeouts; the
/// sync core only sequences the calls and interprets their results.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Whether changes to this relationship are the holding entity's
    /// responsibility to persist.
    fn is_relationship_owner(&self, descriptor: &RelationshipDescriptor) -> bool {
        descriptor.owning
    }

    /// Whether the given relationship diff entries alone make the
    /// entity dirty (embedded and referenced associations differ here).
    fn is_dirty_from_relationships(
        &self,
        entity: &Entity,
        shadow: &Shadow,
        entries: &[DiffEntry],
    ) -> bool;

    /// Whether this entity's persistence is folded into a parent's
    /// commit.
    fn is_embedded(&self, entity: &Entity) -> bool;

    /// Whether this entity should be saved with its own remote call.
    fn should_save(&self, entity: &Entity) -> bool;

    /// The entity embedding this one, if it is embedded.
    fn embedded_parent(&self, entity: &Entity) -> Option<EntityKey>;

    /// The entities embedded in this one. Adapters use this to assemble
    /// the confirmed embedded children of a parent's response.
    fn embedded_children(&self, parent: &Entity) -> Vec<EntityKey>;

    /// Creates the entity remotely. The store is read-only resolution
    /// context for following relationship keys while building the
    /// payload.
    async fn create(
        &self,
        entity: &Entity,
        store: &EntityStore,
    ) -> Result<AdapterResponse, AdapterError>;

    /// Updates the entity remotely.
    async fn update(
        &self,
        entity: &Entity,
        store: &EntityStore,
    ) -> Result<AdapterResponse, AdapterError>;

    /// Deletes the entity remotely.
    async fn delete(
        &self,
        entity: &Entity,
        store: &EntityStore,
    ) -> Result<AdapterResponse, AdapterError>;
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    /// A create call for the given entity.
    Create(EntityKey),
    /// An update call for the given entity.
    Update(EntityKey),
    /// A delete call for the given entity.
    Delete(EntityKey),
}

/// An in-memory adapter for tests.
///
/// Assigns sequential identifiers on create, resolves to-one reference
/// keys into `<name>_id` attributes on the confirmed entity, records
/// every remote call, and supports scripted failures, unsaved entities,
/// and embedded parent/child registration.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    next_id: AtomicU64,
    calls: Mutex<Vec<AdapterCall>>,
    failures: Mutex<HashMap<EntityKey, AdapterError>>,
    embedded: Mutex<HashMap<EntityKey, EntityKey>>,
    unsaved: Mutex<HashSet<EntityKey>>,
    relationship_dirtiness: AtomicBool,
}

impl MemoryAdapter {
    /// Creates an adapter whose first assigned identifier is "1".
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// All remote calls recorded so far, in order.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Scripts the next call for this entity to fail.
    pub fn fail_with(&self, key: EntityKey, error: AdapterError) {
        self.failures.lock().insert(key, error);
    }

    /// Registers `child` as embedded in `parent`.
    ///
    /// Embedded entities answer `is_embedded` and are not saved with
    /// their own remote call.
    pub fn mark_embedded(&self, child: EntityKey, parent: EntityKey) {
        self.embedded.lock().insert(child, parent);
    }

    /// Marks an entity as never needing its own remote call.
    pub fn mark_unsaved(&self, key: EntityKey) {
        self.unsaved.lock().insert(key);
    }

    /// Controls whether relationship-only diffs dirty an entity.
    pub fn set_relationship_dirtiness(&self, dirty: bool) {
        self.relationship_dirtiness.store(dirty, Ordering::SeqCst);
    }

    fn assign_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn confirm(&self, entity: &Entity, store: &EntityStore) -> AdapterResponse {
        let confirmed = self.confirm_entity(entity, store);
        let embedded = self
            .embedded_children(&confirmed)
            .into_iter()
            .filter_map(|child| store.get(&child))
            .map(|child| self.confirm_entity(child, store))
            .collect();
        AdapterResponse::entity(confirmed).with_embedded(embedded)
    }

    fn confirm_entity(&self, entity: &Entity, store: &EntityStore) -> Entity {
        let mut confirmed = entity.clone();
        if confirmed.id().is_none() {
            confirmed.set_id(self.assign_id());
        }
        let references: Vec<(String, EntityKey)> = entity
            .relationships()
            .iter()
            .filter_map(|(name, slot)| match slot {
                RelationshipValue::Reference(Some(target)) => {
                    Some((name.clone(), target.clone()))
                }
                _ => None,
            })
            .collect();
        for (name, target) in references {
            if let Some(id) = store.get(&target).and_then(Entity::id) {
                confirmed.set_attribute(format!("{name}_id"), Value::text(id));
            }
        }
        confirmed
    }

    fn scripted_failure(&self, key: &EntityKey) -> Option<AdapterError> {
        self.failures.lock().remove(key)
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn is_dirty_from_relationships(
        &self,
        _entity: &Entity,
        _shadow: &Shadow,
        entries: &[DiffEntry],
    ) -> bool {
        self.relationship_dirtiness.load(Ordering::SeqCst) && !entries.is_empty()
    }

    fn is_embedded(&self, entity: &Entity) -> bool {
        self.embedded.lock().contains_key(entity.key())
    }

    fn should_save(&self, entity: &Entity) -> bool {
        !self.is_embedded(entity) && !self.unsaved.lock().contains(entity.key())
    }

    fn embedded_parent(&self, entity: &Entity) -> Option<EntityKey> {
        self.embedded.lock().get(entity.key()).cloned()
    }

    fn embedded_children(&self, parent: &Entity) -> Vec<EntityKey> {
        self.embedded
            .lock()
            .iter()
            .filter(|(_, p)| *p == parent.key())
            .map(|(child, _)| child.clone())
            .collect()
    }

    async fn create(
        &self,
        entity: &Entity,
        store: &EntityStore,
    ) -> Result<AdapterResponse, AdapterError> {
        self.calls
            .lock()
            .push(AdapterCall::Create(entity.key().clone()));
        if let Some(error) = self.scripted_failure(entity.key()) {
            return Err(error);
        }
        Ok(self.confirm(entity, store))
    }

    async fn update(
        &self,
        entity: &Entity,
        store: &EntityStore,
    ) -> Result<AdapterResponse, AdapterError> {
        self.calls
            .lock()
            .push(AdapterCall::Update(entity.key().clone()));
        if let Some(error) = self.scripted_failure(entity.key()) {
            return Err(error);
        }
        Ok(self.confirm(entity, store))
    }

    async fn delete(
        &self,
        entity: &Entity,
        _store: &EntityStore,
    ) -> Result<AdapterResponse, AdapterError> {
        self.calls
            .lock()
            .push(AdapterCall::Delete(entity.key().clone()));
        if let Some(error) = self.scripted_failure(entity.key()) {
            return Err(error);
        }
        Ok(AdapterResponse::empty())
    }
}
