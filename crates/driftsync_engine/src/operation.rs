//! One pending commit unit for one entity.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::adapter::{Adapter, AdapterError};
use crate::error::{CommitError, CommitResult};
use driftsync_model::{diff, DiffEntry, Entity, EntityKey, EntityStore, SchemaRegistry, Shadow};

/// Index of an operation within its graph.
///
/// Edges are expressed as indices rather than owned pointers so the
/// dependency graph stays representable without reference cycles.
pub type OpId = usize;

/// Commit classification of an entity, derived by diffing it against
/// its shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyType {
    /// Entity matches its shadow; nothing to commit.
    None,
    /// Entity has no server identifier yet. New entities are always
    /// `Created`; this cannot be forced to another value.
    Created,
    /// Entity differs from its shadow (or is forced).
    Updated,
    /// Entity is marked deleted.
    Deleted,
}

impl DirtyType {
    /// Returns true when a remote commit is needed.
    pub fn is_dirty(&self) -> bool {
        !matches!(self, DirtyType::None)
    }
}

/// One pending mutation for a single entity.
///
/// An operation settles exactly once; its classification is recomputed
/// from the entity/shadow diff, never stored authoritatively.
#[derive(Debug)]
pub struct Operation {
    pub(crate) key: EntityKey,
    pub(crate) shadow: Option<Shadow>,
    pub(crate) force: bool,
    pub(crate) parents: BTreeSet<OpId>,
    pub(crate) children: BTreeSet<OpId>,
    pub(crate) outcome: Option<CommitResult<Entity>>,
    pub(crate) embedded_confirmed: Vec<Entity>,
}

impl Operation {
    pub(crate) fn new(key: EntityKey, shadow: Option<Shadow>) -> Self {
        Self {
            key,
            shadow,
            force: false,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            outcome: None,
            embedded_confirmed: Vec::new(),
        }
    }

    /// Key of the entity this operation commits.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Operations this operation waits on.
    pub fn parents(&self) -> &BTreeSet<OpId> {
        &self.parents
    }

    /// Operations waiting on this operation.
    pub fn children(&self) -> &BTreeSet<OpId> {
        &self.children
    }

    /// Returns true once the operation has settled.
    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<&CommitResult<Entity>> {
        self.outcome.as_ref()
    }

    /// Classifies the entity for commit.
    ///
    /// New entities are always `Created` and deleted entities always
    /// `Deleted`. Otherwise the entity is diffed against its shadow:
    /// any attribute change is dirty; relationship-only changes are
    /// delegated to the adapter's relationship-dirtiness predicate; the
    /// `force` flag dirties a clean entity.
    pub fn dirty_type(
        &self,
        entity: &Entity,
        adapter: &dyn Adapter,
        schema: &SchemaRegistry,
    ) -> DirtyType {
        if entity.is_new() {
            return DirtyType::Created;
        }
        if entity.is_deleted() {
            return DirtyType::Deleted;
        }
        let shadow = self.shadow_or_panic();
        let mut attribute_dirty = false;
        let mut relationship_entries = Vec::new();
        for entry in diff(entity, shadow, schema) {
            if entry.is_attribute() {
                attribute_dirty = true;
            } else {
                relationship_entries.push(entry);
            }
        }
        if attribute_dirty
            || adapter.is_dirty_from_relationships(entity, shadow, &relationship_entries)
            || self.force
        {
            DirtyType::Updated
        } else {
            DirtyType::None
        }
    }

    /// The relationship diff entries this operation is responsible for
    /// persisting: the owning subset of the entity/shadow diff, or
    /// every owning relationship unconditionally for a new entity.
    pub fn dirty_relationships(
        &self,
        entity: &Entity,
        adapter: &dyn Adapter,
        schema: &SchemaRegistry,
    ) -> Vec<DiffEntry> {
        if entity.is_new() {
            return schema
                .relationships(entity.entity_type())
                .iter()
                .filter(|descriptor| adapter.is_relationship_owner(descriptor))
                .map(|descriptor| DiffEntry::Relationship {
                    name: descriptor.name.clone(),
                    cardinality: descriptor.cardinality,
                    owning: descriptor.owning,
                    old: None,
                })
                .collect();
        }
        let shadow = self.shadow_or_panic();
        diff(entity, shadow, schema)
            .into_iter()
            .filter(|entry| {
                entry.is_relationship()
                    && schema
                        .descriptor(entity.entity_type(), entry.name())
                        .is_some_and(|descriptor| adapter.is_relationship_owner(descriptor))
            })
            .collect()
    }

    /// Performs the commit, settling to a confirmed entity or an error.
    ///
    /// Clean or unsavable entities resolve without a remote call; if
    /// embedded, the outcome is derived from the confirmed children the
    /// already-settled parent operation's response carried
    /// (`parent_confirmed`). Dirty entities delegate to the adapter
    /// call matching their classification. The second element of a
    /// successful result holds the response's confirmed embedded
    /// children, for dependent operations to settle from.
    pub(crate) async fn perform(
        &self,
        entity: &Entity,
        store: &EntityStore,
        adapter: &dyn Adapter,
        schema: &SchemaRegistry,
        parent_confirmed: Option<&[Entity]>,
    ) -> CommitResult<(Entity, Vec<Entity>)> {
        let dirty = self.dirty_type(entity, adapter, schema);
        trace!(key = %self.key, ?dirty, "performing operation");

        if !dirty.is_dirty() || !adapter.should_save(entity) {
            if adapter.is_embedded(entity) {
                let Some(siblings) = parent_confirmed else {
                    panic!("embedded parent operation for {} has not settled", self.key);
                };
                let confirmed = siblings
                    .iter()
                    .find(|child| child.key() == &self.key)
                    .cloned();
                return Ok((self.interpret_success(entity, confirmed), Vec::new()));
            }
            // nothing to do remotely
            return Ok((entity.clone(), Vec::new()));
        }

        debug!(key = %self.key, ?dirty, "issuing remote call");
        let response = match dirty {
            DirtyType::Created => adapter.create(entity, store).await,
            DirtyType::Updated => adapter.update(entity, store).await,
            DirtyType::Deleted => adapter.delete(entity, store).await,
            DirtyType::None => return Ok((entity.clone(), Vec::new())),
        };

        match response {
            Ok(response) => Ok((
                self.interpret_success(entity, response.entity),
                response.embedded,
            )),
            Err(error) => Err(self.interpret_failure(error)),
        }
    }

    /// Applies the success post-processing rules: an empty body means
    /// server state equals local state; a meta-only body updates the
    /// metadata and keeps local fields authoritative; the client
    /// revision is never regressed to the unset default.
    fn interpret_success(&self, entity: &Entity, confirmed: Option<Entity>) -> Entity {
        let Some(mut confirmed) = confirmed else {
            return entity.clone();
        };
        let meta_only = confirmed.meta().is_some()
            && confirmed.id().is_none()
            && confirmed.attributes().is_empty()
            && confirmed.relationships().is_empty();
        if meta_only {
            let mut resolved = entity.clone();
            resolved.set_meta(confirmed.meta().cloned());
            return resolved;
        }
        if confirmed.client_rev() == 0 && entity.client_rev() != 0 {
            confirmed.set_client_rev(entity.client_rev());
        }
        confirmed
    }

    /// Maps an adapter failure onto the completion signal. Without a
    /// richer server payload, the shadow (carrying the error detail)
    /// is reported instead of the mutated local entity.
    fn interpret_failure(&self, error: AdapterError) -> CommitError {
        if let Some(reported) = error.entity {
            return CommitError::Validation {
                entity: reported,
                message: error.message,
                detail: error.detail,
            };
        }
        if let Some(shadow) = &self.shadow {
            return CommitError::Validation {
                entity: shadow.to_entity(),
                message: error.message,
                detail: error.detail,
            };
        }
        CommitError::Rejected {
            message: error.message,
            detail: error.detail,
        }
    }

    fn shadow_or_panic(&self) -> &Shadow {
        match &self.shadow {
            Some(shadow) => shadow,
            None => panic!(
                "persistent entity {} has no shadow; load it before committing",
                self.key
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use driftsync_model::{RelationshipDescriptor, Value};
    use std::sync::Arc;

    fn blog_schema() -> Arc<SchemaRegistry> {
        let mut schema = SchemaRegistry::new();
        schema.register(
            "post",
            vec![
                RelationshipDescriptor::to_many("comments", true),
                RelationshipDescriptor::to_one("author", false),
            ],
        );
        Arc::new(schema)
    }

    fn store() -> EntityStore {
        EntityStore::new(blog_schema())
    }

    #[test]
    fn new_entities_classify_as_created() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let entity = Entity::new("post");
        let op = Operation::new(entity.key().clone(), None);
        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::Created);
    }

    #[test]
    fn clean_entities_classify_as_none() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut entity = Entity::persistent("post", "1");
        entity.set_attribute("title", Value::text("A"));
        let shadow = Shadow::capture(&entity);
        let op = Operation::new(entity.key().clone(), Some(shadow));
        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::None);
    }

    #[test]
    fn attribute_change_classifies_as_updated() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut entity = Entity::persistent("post", "1");
        entity.set_attribute("title", Value::text("A"));
        let shadow = Shadow::capture(&entity);
        entity.set_attribute("title", Value::text("B"));
        let op = Operation::new(entity.key().clone(), Some(shadow));
        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::Updated);
    }

    #[test]
    fn deleted_entities_classify_as_deleted() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut entity = Entity::persistent("post", "1");
        let shadow = Shadow::capture(&entity);
        entity.mark_deleted();
        let op = Operation::new(entity.key().clone(), Some(shadow));
        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::Deleted);
    }

    #[test]
    fn relationship_only_change_follows_adapter_policy() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut entity = Entity::persistent("post", "1");
        let shadow = Shadow::capture(&entity);
        entity
            .materialize_collection("comments")
            .push(EntityKey::client("comment"));
        let op = Operation::new(entity.key().clone(), Some(shadow));

        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::None);
        adapter.set_relationship_dirtiness(true);
        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::Updated);
    }

    #[test]
    fn force_dirties_a_clean_entity() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let entity = Entity::persistent("post", "1");
        let shadow = Shadow::capture(&entity);
        let mut op = Operation::new(entity.key().clone(), Some(shadow));
        op.force = true;
        assert_eq!(op.dirty_type(&entity, &adapter, &schema), DirtyType::Updated);
    }

    #[test]
    fn new_entities_own_every_owning_relationship() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let entity = Entity::new("post");
        let op = Operation::new(entity.key().clone(), None);

        let rels = op.dirty_relationships(&entity, &adapter, &schema);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].name(), "comments");
        assert!(rels[0].is_owning_relationship());
    }

    #[tokio::test]
    async fn empty_response_body_means_local_state_is_authoritative() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut store = store();
        let mut entity = Entity::persistent("post", "1");
        entity.set_attribute("title", Value::text("A"));
        let shadow = Shadow::capture(&entity);
        entity.mark_deleted();
        store.load(entity.clone());

        let op = Operation::new(entity.key().clone(), Some(shadow));
        let (resolved, _) = op
            .perform(&entity, &store, &adapter, &schema, None)
            .await
            .unwrap();
        // MemoryAdapter deletes return no body
        assert_eq!(resolved.attribute("title"), Some(&Value::text("A")));
    }

    #[tokio::test]
    async fn embedded_entities_settle_from_the_parent_response() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut store = store();
        let parent = Entity::new("post");
        let child = Entity::new("comment");
        store.track(parent.clone());
        store.track(child.clone());
        adapter.mark_embedded(child.key().clone(), parent.key().clone());

        let mut confirmed_child = child.clone();
        confirmed_child.set_id("7");
        let siblings = vec![confirmed_child];

        let op = Operation::new(child.key().clone(), None);
        let (resolved, _) = op
            .perform(&child, &store, &adapter, &schema, Some(&siblings))
            .await
            .unwrap();
        assert_eq!(resolved.id(), Some("7"));
    }

    #[tokio::test]
    async fn meta_only_response_keeps_local_fields() {
        struct MetaOnly;
        #[async_trait::async_trait]
        impl Adapter for MetaOnly {
            fn is_dirty_from_relationships(
                &self,
                _: &Entity,
                _: &Shadow,
                _: &[DiffEntry],
            ) -> bool {
                false
            }
            fn is_embedded(&self, _: &Entity) -> bool {
                false
            }
            fn should_save(&self, _: &Entity) -> bool {
                true
            }
            fn embedded_parent(&self, _: &Entity) -> Option<EntityKey> {
                None
            }
            fn embedded_children(&self, _: &Entity) -> Vec<EntityKey> {
                Vec::new()
            }
            async fn create(
                &self,
                _: &Entity,
                _: &EntityStore,
            ) -> Result<crate::adapter::AdapterResponse, AdapterError> {
                unimplemented!("not exercised")
            }
            async fn update(
                &self,
                _: &Entity,
                _: &EntityStore,
            ) -> Result<crate::adapter::AdapterResponse, AdapterError> {
                let mut meta_only = Entity::new("post");
                meta_only.set_meta(Some(Value::text("etag-2")));
                Ok(crate::adapter::AdapterResponse::entity(meta_only))
            }
            async fn delete(
                &self,
                _: &Entity,
                _: &EntityStore,
            ) -> Result<crate::adapter::AdapterResponse, AdapterError> {
                unimplemented!("not exercised")
            }
        }

        let schema = blog_schema();
        let mut store = EntityStore::new(Arc::clone(&schema));
        let mut entity = Entity::persistent("post", "1");
        entity.set_attribute("title", Value::text("A"));
        entity.set_client_rev(4);
        let shadow = Shadow::capture(&entity);
        entity.set_attribute("title", Value::text("B"));
        store.load(entity.clone());

        let op = Operation::new(entity.key().clone(), Some(shadow));
        let (resolved, _) = op
            .perform(&entity, &store, &MetaOnly, &schema, None)
            .await
            .unwrap();
        assert_eq!(resolved.attribute("title"), Some(&Value::text("B")));
        assert_eq!(resolved.meta(), Some(&Value::text("etag-2")));
        assert_eq!(resolved.client_rev(), 4);
    }

    #[tokio::test]
    async fn failure_without_payload_reports_the_shadow() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut store = store();
        let mut entity = Entity::persistent("post", "1");
        entity.set_attribute("title", Value::text("A"));
        let shadow = Shadow::capture(&entity);
        entity.set_attribute("title", Value::text("B"));
        store.load(entity.clone());

        adapter.fail_with(
            entity.key().clone(),
            AdapterError::new("title is taken").with_detail(Value::text("title")),
        );

        let op = Operation::new(entity.key().clone(), Some(shadow));
        let error = op
            .perform(&entity, &store, &adapter, &schema, None)
            .await
            .unwrap_err();
        let reported = error.reported_entity().unwrap();
        assert_eq!(reported.attribute("title"), Some(&Value::text("A")));
        assert_eq!(error.detail(), Some(&Value::text("title")));
    }

    #[tokio::test]
    async fn failure_of_a_new_entity_is_rejected_without_a_shadow() {
        let adapter = MemoryAdapter::new();
        let schema = blog_schema();
        let mut store = store();
        let entity = Entity::new("post");
        store.track(entity.clone());
        adapter.fail_with(entity.key().clone(), AdapterError::new("nope"));

        let op = Operation::new(entity.key().clone(), None);
        let error = op
            .perform(&entity, &store, &adapter, &schema, None)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            CommitError::Rejected {
                message: "nope".into(),
                detail: None,
            }
        );
    }
}
