//! Relationship schema: descriptors and the per-type registry.

use std::collections::HashMap;

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Single reference to another entity.
    ToOne,
    /// Ordered collection of related entities.
    ToMany,
}

/// Metadata describing one named relationship on an entity type.
///
/// Descriptors are immutable and declared once per entity type. Only
/// the owning side's changes make the owning entity's operation dirty,
/// and only owning relationships are traversed when building a commit
/// graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    /// Relationship name.
    pub name: String,
    /// Single reference or ordered collection.
    pub cardinality: Cardinality,
    /// Whether this side is responsible for persisting the relationship.
    pub owning: bool,
}

impl RelationshipDescriptor {
    /// Declares a to-one relationship.
    pub fn to_one(name: impl Into<String>, owning: bool) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::ToOne,
            owning,
        }
    }

    /// Declares a to-many relationship.
    pub fn to_many(name: impl Into<String>, owning: bool) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::ToMany,
            owning,
        }
    }

    /// Returns true for to-many relationships.
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

/// Relationship declarations for all entity types.
///
/// Iteration order per type is declaration order, which makes merge and
/// traversal walks deterministic.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, Vec<RelationshipDescriptor>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the relationships of an entity type.
    ///
    /// Replaces any previous declaration for the same type.
    pub fn register(
        &mut self,
        entity_type: impl Into<String>,
        relationships: Vec<RelationshipDescriptor>,
    ) {
        self.types.insert(entity_type.into(), relationships);
    }

    /// Relationships declared for a type, in declaration order.
    ///
    /// Unknown types have no relationships.
    pub fn relationships(&self, entity_type: &str) -> &[RelationshipDescriptor] {
        self.types
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Looks up one relationship by type and name.
    pub fn descriptor(&self, entity_type: &str, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships(entity_type)
            .iter()
            .find(|descriptor| descriptor.name == name)
    }
}
