//! # Driftsync Engine
//!
//! Merge engine and commit operation graph for the Driftsync client
//! sync core.
//!
//! This crate provides:
//! - Conflict resolution between fetched server state and locally held
//!   entities ([`MergeEngine`] with pluggable [`MergeStrategy`])
//! - Diff-based dirty classification of pending mutations
//!   ([`Operation`], [`DirtyType`])
//! - Dependency-ordered commit scheduling ([`OperationGraph`]) with
//!   identifier propagation from created parents to their dependents
//! - The [`Adapter`] trait, the only seam to transport, serialization,
//!   and storage, plus an in-memory [`MemoryAdapter`] for tests
//!
//! ## Key Invariants
//!
//! - A merge pass visits each distinct entity at most once, so cyclic
//!   entity graphs terminate
//! - Each distinct entity reachable from the requested roots maps to
//!   exactly one operation per graph execution
//! - An operation's remote call is never issued before all of its
//!   parent operations have settled successfully; a parent failure
//!   fails all transitive dependents without a remote call, while
//!   independent branches run to completion
//! - A failed commit reports the last-confirmed shadow, never a
//!   half-applied local entity, unless the server supplied a richer
//!   error payload

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod graph;
mod merge;
mod operation;

pub use adapter::{Adapter, AdapterCall, AdapterError, AdapterResponse, MemoryAdapter};
pub use error::{CommitError, CommitResult};
pub use graph::{GraphResult, OperationGraph};
pub use merge::{MergeContext, MergeEngine, MergeStrategy, Theirs};
pub use operation::{DirtyType, OpId, Operation};
