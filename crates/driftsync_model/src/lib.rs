//! # Driftsync Model
//!
//! Entity data model for the Driftsync client sync core.
//!
//! This crate provides:
//! - Self-describing attribute values ([`Value`])
//! - Stable entity identity ([`EntityKey`], [`Identity`]) and the
//!   transient [`IdentitySet`] used to break cycles during traversals
//! - Tracked entities ([`Entity`]) with attribute and relationship slots
//! - Relationship schema ([`RelationshipDescriptor`], [`SchemaRegistry`])
//! - Single-owner ordered relationship collections ([`RelationshipCollection`])
//! - Last-confirmed snapshots ([`Shadow`]) and diffing ([`diff`])
//! - The coalescing change feed ([`ChangeFeed`], [`ChangeBatch`])
//! - The [`EntityStore`] holding tracked entities, shadows, and the
//!   identifier index
//!
//! ## Key Invariants
//!
//! - An entity's [`EntityKey`] never changes; server-identifier adoption
//!   is recorded on the entity and in the store index, not by rekeying
//! - A relationship collection has exactly one owner at all times;
//!   assignment copies content, it never aliases a collection
//! - A shadow is replaced atomically and never mutated in place
//! - Change events are coalesced: one event per touched entity per batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod collection;
mod diff;
mod entity;
mod identity;
mod schema;
mod shadow;
mod store;
mod value;

pub use change_feed::{ChangeBatch, ChangeEvent, ChangeFeed};
pub use collection::RelationshipCollection;
pub use diff::{diff, DiffEntry};
pub use entity::{Entity, RelationshipValue};
pub use identity::{EntityKey, Identity, IdentitySet};
pub use schema::{Cardinality, RelationshipDescriptor, SchemaRegistry};
pub use shadow::Shadow;
pub use store::EntityStore;
pub use value::Value;
