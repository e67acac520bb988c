//! Dependency-ordered commit scheduling.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::adapter::Adapter;
use crate::error::{CommitError, CommitResult};
use crate::operation::{OpId, Operation};
use driftsync_model::{
    Cardinality, Entity, EntityKey, EntityStore, IdentitySet, SchemaRegistry,
};

/// Per-entity outcomes of one graph execution.
#[derive(Debug)]
pub struct GraphResult {
    outcomes: BTreeMap<EntityKey, CommitResult<Entity>>,
}

impl GraphResult {
    /// The outcome for one entity, if it was part of the graph.
    pub fn outcome(&self, key: &EntityKey) -> Option<&CommitResult<Entity>> {
        self.outcomes.get(key)
    }

    /// The confirmed entity for a successful outcome.
    pub fn confirmed(&self, key: &EntityKey) -> Option<&Entity> {
        match self.outcomes.get(key) {
            Some(Ok(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Returns true when every operation succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(Result::is_ok)
    }

    /// The failed outcomes, in key order.
    pub fn failures(&self) -> impl Iterator<Item = (&EntityKey, &CommitError)> {
        self.outcomes.iter().filter_map(|(key, outcome)| {
            outcome.as_ref().err().map(|error| (key, error))
        })
    }

    /// Iterates over all outcomes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &CommitResult<Entity>)> {
        self.outcomes.iter()
    }

    /// Number of operations that ran.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true for an empty graph.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// A one-shot commit plan: one operation per distinct entity reachable
/// from the requested roots, with dependency edges deciding execution
/// order.
///
/// Build it, optionally force individual entities, then [`execute`]
/// once. A cyclic edge set is a programming error and panics during
/// execution.
///
/// [`execute`]: OperationGraph::execute
pub struct OperationGraph {
    adapter: Arc<dyn Adapter>,
    schema: Arc<SchemaRegistry>,
    ops: Vec<Operation>,
    by_key: HashMap<EntityKey, OpId>,
}

impl OperationGraph {
    /// Builds the commit plan for the given roots.
    ///
    /// The walk follows owning relationships (cycle-safe) and the
    /// adapter's embedded-parent edges; members pointing at untracked
    /// keys are skipped. Edges are wired so that:
    /// - a to-many member of a new owner waits on the owner,
    /// - an entity referencing a new entity waits on that entity,
    /// - an adapter-embedded entity waits on its embedding parent.
    pub fn build(adapter: Arc<dyn Adapter>, store: &EntityStore, roots: &[EntityKey]) -> Self {
        let schema = Arc::clone(store.schema());
        let mut ops = Vec::new();
        let mut by_key = HashMap::new();
        let mut visited = IdentitySet::new();
        let mut frontier: Vec<EntityKey> = roots.to_vec();

        while let Some(key) = frontier.pop() {
            if !visited.insert(&key) {
                continue;
            }
            let Some(entity) = store.get(&key) else {
                panic!("cannot build an operation for untracked entity {key}");
            };
            trace!(key = %key, "adding operation");
            by_key.insert(key.clone(), ops.len());
            ops.push(Operation::new(key.clone(), store.shadow(&key).cloned()));

            for descriptor in schema.relationships(entity.entity_type()) {
                if !adapter.is_relationship_owner(descriptor) {
                    continue;
                }
                match descriptor.cardinality {
                    Cardinality::ToOne => {
                        if let Some(target) = entity.reference(&descriptor.name) {
                            if store.contains(target) {
                                frontier.push(target.clone());
                            }
                        }
                    }
                    Cardinality::ToMany => {
                        for member in entity.to_many_members(&descriptor.name) {
                            if store.contains(member) {
                                frontier.push(member.clone());
                            }
                        }
                    }
                }
            }
            if let Some(parent) = adapter.embedded_parent(entity) {
                frontier.push(parent);
            }
        }

        let mut graph = Self {
            adapter,
            schema,
            ops,
            by_key,
        };
        graph.wire_edges(store);
        debug!(operations = graph.ops.len(), "commit graph built");
        graph
    }

    /// Number of operations in the graph.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true for an empty graph.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The operation for one entity, if it is part of the graph.
    pub fn operation(&self, key: &EntityKey) -> Option<&Operation> {
        self.by_key.get(key).map(|&id| &self.ops[id])
    }

    /// Forces a commit of the given entity even if it is clean.
    ///
    /// Panics if the entity is not part of the graph. A new entity
    /// stays `Created`; force cannot change that.
    pub fn set_force(&mut self, key: &EntityKey) {
        let Some(&id) = self.by_key.get(key) else {
            panic!("no operation for {key} in this graph");
        };
        self.ops[id].force = true;
    }

    fn wire_edges(&mut self, store: &EntityStore) {
        for id in 0..self.ops.len() {
            let key = self.ops[id].key().clone();
            let Some(entity) = store.get(&key) else {
                unreachable!("operation was built from a tracked entity");
            };

            let mut edges: Vec<(OpId, OpId)> = Vec::new();
            for descriptor in self.schema.relationships(entity.entity_type()) {
                match descriptor.cardinality {
                    Cardinality::ToOne => {
                        let Some(target) = entity.reference(&descriptor.name) else {
                            continue;
                        };
                        if let Some(&target_id) = self.by_key.get(target) {
                            if store.get(target).is_some_and(Entity::is_new) {
                                edges.push((target_id, id));
                            }
                        }
                    }
                    Cardinality::ToMany => {
                        if !entity.is_new() {
                            continue;
                        }
                        for member in entity.to_many_members(&descriptor.name) {
                            if let Some(&member_id) = self.by_key.get(member) {
                                edges.push((id, member_id));
                            }
                        }
                    }
                }
            }
            if let Some(parent) = self.adapter.embedded_parent(entity) {
                let Some(&parent_id) = self.by_key.get(&parent) else {
                    panic!("embedded entity {key} has no parent operation in this graph");
                };
                edges.push((parent_id, id));
            }
            for (parent, child) in edges {
                self.add_edge(parent, child);
            }
        }
    }

    /// Records `child` as depending on `parent` on both endpoints.
    fn add_edge(&mut self, parent: OpId, child: OpId) {
        if parent == child {
            return;
        }
        trace!(
            parent = %self.ops[parent].key(),
            child = %self.ops[child].key(),
            "wiring dependency edge"
        );
        self.ops[parent].children.insert(child);
        self.ops[child].parents.insert(parent);
    }

    /// Runs every operation in dependency order.
    ///
    /// An operation runs only once all of its parents settled
    /// successfully. A parent failure settles every transitive
    /// dependent with [`CommitError::DependencyFailure`] without a
    /// remote call; independent branches run to completion. Successful
    /// outcomes are applied to the store (identifier adoption, shadow
    /// replacement, or removal for a confirmed delete).
    ///
    /// Panics if the wired edges contain a cycle.
    pub async fn execute(mut self, store: &mut EntityStore) -> GraphResult {
        let total = self.ops.len();
        let mut settled = 0usize;

        while settled < total {
            let mut progressed = false;

            for id in 0..total {
                if self.ops[id].is_settled() {
                    continue;
                }
                let failed_parent = self.ops[id].parents().iter().find_map(|&parent| {
                    match self.ops[parent].outcome() {
                        Some(Err(_)) => Some(self.ops[parent].key().clone()),
                        _ => None,
                    }
                });
                if let Some(failed) = failed_parent {
                    debug!(key = %self.ops[id].key(), failed = %failed, "dependency failed");
                    self.ops[id].outcome = Some(Err(CommitError::DependencyFailure { failed }));
                    settled += 1;
                    progressed = true;
                }
            }

            let ready = (0..total).find(|&id| {
                !self.ops[id].is_settled()
                    && self.ops[id]
                        .parents()
                        .iter()
                        .all(|&parent| matches!(self.ops[parent].outcome(), Some(Ok(_))))
            });
            if let Some(id) = ready {
                let key = self.ops[id].key().clone();
                let Some(entity) = store.get(&key).cloned() else {
                    panic!("entity {key} disappeared during graph execution");
                };
                let parent_children = self.settled_parent_children(&key, &entity);
                let outcome = self.ops[id]
                    .perform(
                        &entity,
                        store,
                        self.adapter.as_ref(),
                        &self.schema,
                        parent_children.as_deref(),
                    )
                    .await;
                let outcome = match outcome {
                    Ok((confirmed, embedded)) => {
                        if entity.is_deleted() {
                            store.remove(&key);
                        } else {
                            store.confirm(&key, &confirmed);
                        }
                        self.ops[id].embedded_confirmed = embedded;
                        Ok(confirmed)
                    }
                    Err(error) => Err(error),
                };
                self.ops[id].outcome = Some(outcome);
                settled += 1;
                progressed = true;
            }

            if !progressed {
                panic!("commit graph contains a dependency cycle");
            }
        }

        let mut outcomes = BTreeMap::new();
        for op in self.ops {
            let Operation { key, outcome, .. } = op;
            match outcome {
                Some(outcome) => {
                    outcomes.insert(key, outcome);
                }
                None => unreachable!("every operation settles before the loop exits"),
            }
        }
        GraphResult { outcomes }
    }

    /// Resolves the confirmed embedded children carried by the settled
    /// parent operation's response, if this entity is embedded.
    fn settled_parent_children(&self, key: &EntityKey, entity: &Entity) -> Option<Vec<Entity>> {
        if !self.adapter.is_embedded(entity) {
            return None;
        }
        let Some(parent_key) = self.adapter.embedded_parent(entity) else {
            panic!("embedded entity {key} reports no parent");
        };
        let Some(&parent_id) = self.by_key.get(&parent_key) else {
            panic!("embedded entity {key} has no parent operation in this graph");
        };
        match self.ops[parent_id].outcome() {
            Some(Ok(_)) => Some(self.ops[parent_id].embedded_confirmed.clone()),
            _ => panic!("embedded parent operation for {key} has not settled"),
        }
    }
}
