//! Error types for silodb core.

use crate::types::{DocId, RevisionId, RevisionIdError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in revision store operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A revision id failed to parse.
    #[error(transparent)]
    RevisionId(#[from] RevisionIdError),

    /// The named document does not exist.
    #[error("document not found: {doc_id}")]
    DocumentNotFound {
        /// The document that was looked up.
        doc_id: DocId,
    },

    /// The named revision does not exist in the document's tree.
    #[error("revision not found: {rev_id} in document {doc_id}")]
    RevisionNotFound {
        /// The document searched.
        doc_id: DocId,
        /// The revision id that was not found.
        rev_id: RevisionId,
    },

    /// A write targeted a non-leaf revision without `allow_conflict`.
    #[error("update conflict on document {doc_id}: {rev_id} is not a leaf")]
    UpdateConflict {
        /// The document being written.
        doc_id: DocId,
        /// The stale parent revision.
        rev_id: RevisionId,
    },

    /// A forced insert violated the tree's structural invariants.
    #[error("invalid revision insert on document {doc_id}: {message}")]
    InvalidInsert {
        /// The document being written.
        doc_id: DocId,
        /// Description of the violation.
        message: String,
    },

    /// The transaction was aborted by the store.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },
}

impl CoreError {
    /// Creates a document-not-found error.
    pub fn document_not_found(doc_id: DocId) -> Self {
        Self::DocumentNotFound { doc_id }
    }

    /// Creates a revision-not-found error.
    pub fn revision_not_found(doc_id: DocId, rev_id: RevisionId) -> Self {
        Self::RevisionNotFound { doc_id, rev_id }
    }

    /// Creates an update-conflict error.
    pub fn update_conflict(doc_id: DocId, rev_id: RevisionId) -> Self {
        Self::UpdateConflict { doc_id, rev_id }
    }

    /// Creates an invalid-insert error.
    pub fn invalid_insert(doc_id: DocId, message: impl Into<String>) -> Self {
        Self::InvalidInsert {
            doc_id,
            message: message.into(),
        }
    }

    /// Creates a transaction-aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }
}
