//! Coalescing change notifications.
//!
//! Mutations performed during one logical operation (a merge pass, a
//! relationship assignment, a commit settlement) are accumulated in a
//! [`ChangeBatch`] and published as at most one [`ChangeEvent`] per
//! touched entity, so observers see one coalesced change instead of one
//! notification per field.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::identity::EntityKey;

/// A single coalesced change event for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The changed entity.
    pub key: EntityKey,
    /// Names of changed attributes, sorted.
    pub attributes: Vec<String>,
    /// Names of changed relationships, sorted.
    pub relationships: Vec<String>,
    /// Whether the entity's metadata payload changed.
    pub meta: bool,
}

#[derive(Debug, Default)]
struct PendingChange {
    attributes: BTreeSet<String>,
    relationships: BTreeSet<String>,
    meta: bool,
}

/// Accumulates changes during one logical operation.
///
/// Publishing the batch emits one event per touched entity; an empty
/// batch emits nothing.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    entries: HashMap<EntityKey, PendingChange>,
}

impl ChangeBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attribute change.
    pub fn record_attribute(&mut self, key: &EntityKey, name: &str) {
        self.entries
            .entry(key.clone())
            .or_default()
            .attributes
            .insert(name.to_string());
    }

    /// Records a relationship change.
    pub fn record_relationship(&mut self, key: &EntityKey, name: &str) {
        self.entries
            .entry(key.clone())
            .or_default()
            .relationships
            .insert(name.to_string());
    }

    /// Records a metadata payload change.
    pub fn record_meta(&mut self, key: &EntityKey) {
        self.entries.entry(key.clone()).or_default().meta = true;
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Coalesces the batch into events, one per entity, ordered by key.
    pub fn into_events(self) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = self
            .entries
            .into_iter()
            .map(|(key, pending)| ChangeEvent {
                key,
                attributes: pending.attributes.into_iter().collect(),
                relationships: pending.relationships.into_iter().collect(),
                meta: pending.meta,
            })
            .collect();
        events.sort_by(|a, b| a.key.cmp(&b.key));
        events
    }
}

/// Delivers coalesced change events to subscribers.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to change events.
    ///
    /// Events are delivered in batch order; dropped receivers are
    /// pruned on the next publish.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.write().push(sender);
        receiver
    }

    /// Publishes a batch, emitting one event per touched entity.
    pub fn publish(&self, batch: ChangeBatch) {
        let events = batch.into_events();
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| {
            events
                .iter()
                .all(|event| sender.send(event.clone()).is_ok())
        });
    }
}
