//! Diffing an entity against its shadow.

use crate::entity::{Entity, RelationshipValue};
use crate::identity::EntityKey;
use crate::schema::{Cardinality, SchemaRegistry};
use crate::shadow::Shadow;
use crate::value::Value;

/// One unit of change between an entity and its shadow.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffEntry {
    /// An attribute whose value differs from the snapshot.
    Attribute {
        /// Attribute name.
        name: String,
        /// Snapshot value, if any.
        old: Option<Value>,
        /// Current value, if any.
        new: Option<Value>,
    },
    /// A relationship whose content differs from the snapshot.
    Relationship {
        /// Relationship name.
        name: String,
        /// Cardinality of the relationship.
        cardinality: Cardinality,
        /// Whether this side owns the relationship.
        owning: bool,
        /// Snapshot slot content, if any.
        old: Option<RelationshipValue>,
    },
}

impl DiffEntry {
    /// Returns true for attribute entries.
    pub fn is_attribute(&self) -> bool {
        matches!(self, DiffEntry::Attribute { .. })
    }

    /// Returns true for relationship entries.
    pub fn is_relationship(&self) -> bool {
        matches!(self, DiffEntry::Relationship { .. })
    }

    /// The changed attribute or relationship name.
    pub fn name(&self) -> &str {
        match self {
            DiffEntry::Attribute { name, .. } => name,
            DiffEntry::Relationship { name, .. } => name,
        }
    }

    /// Returns true for relationship entries on the owning side.
    pub fn is_owning_relationship(&self) -> bool {
        matches!(self, DiffEntry::Relationship { owning: true, .. })
    }
}

/// Normalized relationship content, so that a pending seed and a
/// materialized collection with the same members compare equal, and an
/// absent slot equals a cleared one.
#[derive(PartialEq)]
enum SlotView {
    Reference(Option<EntityKey>),
    Members(Vec<EntityKey>),
}

fn slot_view(slot: Option<&RelationshipValue>, cardinality: Cardinality) -> SlotView {
    match cardinality {
        Cardinality::ToOne => SlotView::Reference(match slot {
            Some(RelationshipValue::Reference(target)) => target.clone(),
            _ => None,
        }),
        Cardinality::ToMany => SlotView::Members(match slot {
            Some(RelationshipValue::Collection(collection)) => collection.members().to_vec(),
            Some(RelationshipValue::Pending(members)) => members.clone(),
            _ => Vec::new(),
        }),
    }
}

/// Computes the changes between an entity and its shadow.
///
/// Attribute entries cover the union of attribute names on both sides
/// and compare by value equality. Relationship entries cover every
/// declared relationship whose content differs from the snapshot.
pub fn diff(entity: &Entity, shadow: &Shadow, schema: &SchemaRegistry) -> Vec<DiffEntry> {
    let mut entries = Vec::new();

    let mut names: Vec<&str> = entity.attributes().keys().map(String::as_str).collect();
    for name in shadow.attributes().keys() {
        if !entity.attributes().contains_key(name) {
            names.push(name);
        }
    }
    names.sort_unstable();

    for name in names {
        let new = entity.attribute(name);
        let old = shadow.attribute(name);
        if new != old {
            entries.push(DiffEntry::Attribute {
                name: name.to_string(),
                old: old.cloned(),
                new: new.cloned(),
            });
        }
    }

    for descriptor in schema.relationships(entity.entity_type()) {
        let current = slot_view(entity.relationship(&descriptor.name), descriptor.cardinality);
        let baseline = slot_view(shadow.relationship(&descriptor.name), descriptor.cardinality);
        if current != baseline {
            entries.push(DiffEntry::Relationship {
                name: descriptor.name.clone(),
                cardinality: descriptor.cardinality,
                owning: descriptor.owning,
                old: shadow.relationship(&descriptor.name).cloned(),
            });
        }
    }

    entries
}
