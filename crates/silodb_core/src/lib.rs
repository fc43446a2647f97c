//! # silodb Core
//!
//! Revision model and conflict resolution engine for silodb.
//!
//! This crate provides:
//! - Document, revision and attachment types
//! - The per-document revision tree (DAG with deletion tombstones)
//! - The `RevisionStore` persistence surface and an in-memory store
//! - Conflict enumeration and resolver-driven collapse

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attachment;
pub mod conflict;
pub mod error;
pub mod revision;
pub mod store;
pub mod tree;
pub mod types;

pub use attachment::{AttachmentEncoding, SavedAttachment, UnsavedAttachment};
pub use conflict::{ConflictEngine, ConflictResolver, ResolveError};
pub use error::{CoreError, CoreResult};
pub use revision::{Body, DocumentRevision, Revision};
pub use store::{MemoryRevisionStore, RevisionStore, RevisionWriteTxn};
pub use tree::{RevisionNode, RevisionTree};
pub use types::{DocId, RevisionId, RevisionIdError, Sequence};
