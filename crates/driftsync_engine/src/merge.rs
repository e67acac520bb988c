//! Merging fetched server state into locally held entities.
//!
//! Whenever new server data arrives via a fetch, the merge engine
//! reconciles it into the entities already held locally, according to
//! the active strategy. A pass is cycle-safe (each distinct source
//! entity is processed at most once, tracked via an [`IdentitySet`])
//! and publishes one coalesced change event per touched entity.

use std::sync::Arc;

use tracing::{debug, trace};

use driftsync_model::{
    ChangeBatch, Entity, EntityKey, EntityStore, IdentitySet, SchemaRegistry,
};

/// Everything one merge pass needs: the incoming data, the local
/// store, the visited set, and the accumulating change batch.
///
/// A context is created per pass and discarded afterwards; the visited
/// set is never reused.
pub struct MergeContext<'a> {
    /// Detached store holding the fetched server data.
    pub incoming: &'a EntityStore,
    /// The local store being merged into.
    pub local: &'a mut EntityStore,
    /// Relationship schema shared by both stores.
    pub schema: Arc<SchemaRegistry>,
    /// Source entities already processed in this pass.
    pub visited: IdentitySet,
    /// Changes accumulated for coalesced publication.
    pub batch: ChangeBatch,
    /// (destination, source) pairs merged in this pass, for shadow
    /// rebasing.
    pub merged: Vec<(EntityKey, EntityKey)>,
}

/// A conflict-resolution strategy, selected when the engine is built.
pub trait MergeStrategy: Send + Sync {
    /// Merges one source entity (and, recursively, everything it
    /// references) into the local store, returning the key of the
    /// merged local entity.
    fn merge_entity(&self, ctx: &mut MergeContext<'_>, source: &EntityKey) -> EntityKey;
}

/// Recursively merges fetched server data into the local store.
pub struct MergeEngine {
    strategy: Arc<dyn MergeStrategy>,
}

impl MergeEngine {
    /// Creates an engine with the default [`Theirs`] strategy.
    pub fn new() -> Self {
        Self::with_strategy(Arc::new(Theirs))
    }

    /// Creates an engine with an explicit strategy.
    pub fn with_strategy(strategy: Arc<dyn MergeStrategy>) -> Self {
        Self { strategy }
    }

    /// Merges the source entity graph from `incoming` into `local`.
    ///
    /// Returns the key of the merged local root. The whole pass is one
    /// logical batch: observers see at most one coalesced change event
    /// per touched entity, and none for entities whose values were
    /// already identical. Shadows are rebased onto the fetched values:
    /// server-confirmed attributes and metadata become the new
    /// baseline, while local edits the server has not seen stay dirty
    /// and are committed later.
    pub fn merge(
        &self,
        incoming: &EntityStore,
        source: &EntityKey,
        local: &mut EntityStore,
    ) -> EntityKey {
        debug!(source = %source, "merge pass");
        let schema = Arc::clone(local.schema());
        let mut ctx = MergeContext {
            incoming,
            local,
            schema,
            visited: IdentitySet::new(),
            batch: ChangeBatch::new(),
            merged: Vec::new(),
        };
        let destination = self.strategy.merge_entity(&mut ctx, source);
        let MergeContext {
            local,
            batch,
            merged,
            ..
        } = ctx;
        for (dest, source) in &merged {
            if let Some(server) = incoming.get(source) {
                local.rebase_shadow(dest, server);
            }
        }
        local.publish(batch);
        destination
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The default merge strategy: the server's values win.
///
/// Not version aware; attributes are copied where they differ, to-one
/// targets are merged in place, and to-many collections are replaced
/// with the recursively merged source members in source order.
pub struct Theirs;

impl Theirs {
    fn destination_for(&self, ctx: &mut MergeContext<'_>, source: &Entity) -> EntityKey {
        if let Some(id) = source.id() {
            if let Some(key) = ctx.local.lookup(source.entity_type(), id) {
                return key.clone();
            }
        }
        if ctx.local.contains(source.key()) {
            return source.key().clone();
        }
        trace!(key = %source.key(), "creating merge destination");
        ctx.local.track(Entity::with_key(source.key().clone()))
    }

    fn copy_attributes(&self, ctx: &mut MergeContext<'_>, source: &Entity, dest: &EntityKey) {
        let Some(entity) = ctx.local.get_mut(dest) else {
            panic!("merge destination {dest} vanished mid-pass");
        };
        for (name, value) in source.attributes() {
            if entity.set_attribute(name.clone(), value.clone()) {
                ctx.batch.record_attribute(dest, name);
            }
        }
        if source.meta().is_some() && entity.meta() != source.meta() {
            entity.set_meta(source.meta().cloned());
            ctx.batch.record_meta(dest);
        }
    }

    fn copy_relationships(&self, ctx: &mut MergeContext<'_>, source: &Entity, dest: &EntityKey) {
        let descriptors = ctx
            .schema
            .relationships(source.entity_type())
            .to_vec();
        for descriptor in descriptors {
            if descriptor.is_to_many() {
                let members = source.to_many_members(&descriptor.name).to_vec();
                let merged: Vec<EntityKey> = members
                    .iter()
                    .map(|member| self.merge_entity(ctx, member))
                    .collect();
                let meta = source.to_many_meta(&descriptor.name).cloned();
                ctx.local
                    .set_collection(dest, &descriptor.name, merged, meta, &mut ctx.batch);
            } else {
                let source_child = source.reference(&descriptor.name).cloned();
                let dest_child = ctx
                    .local
                    .get(dest)
                    .and_then(|entity| entity.reference(&descriptor.name))
                    .cloned();
                match (source_child, dest_child) {
                    (Some(child), Some(_)) => {
                        // merge in place, the reference itself stays
                        self.merge_entity(ctx, &child);
                    }
                    (Some(child), None) => {
                        let merged = self.merge_entity(ctx, &child);
                        ctx.local
                            .set_reference(dest, &descriptor.name, Some(merged), &mut ctx.batch);
                    }
                    (None, Some(_)) => {
                        ctx.local
                            .set_reference(dest, &descriptor.name, None, &mut ctx.batch);
                    }
                    (None, None) => {}
                }
            }
        }
    }
}

impl MergeStrategy for Theirs {
    fn merge_entity(&self, ctx: &mut MergeContext<'_>, source: &EntityKey) -> EntityKey {
        let Some(entity) = ctx.incoming.get(source) else {
            panic!("source entity {source} is not present in the incoming data");
        };
        let entity = entity.clone();
        let destination = self.destination_for(ctx, &entity);
        if !ctx.visited.insert(source) {
            return destination;
        }
        trace!(source = %source, destination = %destination, "merging entity");
        ctx.merged.push((destination.clone(), source.clone()));
        self.copy_attributes(ctx, &entity, &destination);
        self.copy_relationships(ctx, &entity, &destination);
        destination
    }
}
