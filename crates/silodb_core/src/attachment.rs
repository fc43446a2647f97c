//! Attachment metadata.
//!
//! Attachment rows are keyed by the [`Sequence`] of the revision that
//! introduced or carried them, not by revision id. A revision updated
//! without touching its attachments re-keys the ancestor's rows under its
//! own sequence with the `revpos` unchanged, so a collapse of the revision
//! tree can never leave a dangling reference.

use crate::types::Sequence;
use serde::{Deserialize, Serialize};

/// On-disk encoding of an attachment's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AttachmentEncoding {
    /// Stored verbatim.
    #[default]
    Plain,
    /// Stored gzip-compressed.
    Gzip,
}

/// An attachment row already persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAttachment {
    /// Sequence of the revision this row is keyed by.
    pub sequence: Sequence,
    /// Attachment filename, unique within a revision.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Decoded length in bytes.
    pub length: u64,
    /// Generation of the revision that introduced the attachment.
    pub revpos: u64,
    /// Stored encoding.
    pub encoding: AttachmentEncoding,
    /// Stored length in bytes; equals `length` for plain encoding.
    pub encoded_length: u64,
}

impl SavedAttachment {
    /// Re-keys this row under a new sequence, preserving `revpos`.
    ///
    /// Used when a revision is updated without attachment changes.
    #[must_use]
    pub fn carried_to(&self, sequence: Sequence) -> Self {
        Self {
            sequence,
            ..self.clone()
        }
    }
}

/// An attachment to be written alongside a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedAttachment {
    /// Attachment filename, unique within a revision.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Decoded length in bytes.
    pub length: u64,
    /// Desired stored encoding.
    pub encoding: AttachmentEncoding,
    /// Stored length; `None` means the attachment is not re-encoded.
    pub encoded_length: Option<u64>,
}

impl UnsavedAttachment {
    /// Creates a plain attachment descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            length,
            encoding: AttachmentEncoding::Plain,
            encoded_length: None,
        }
    }

    /// Converts into a saved row keyed by `sequence` at `revpos`.
    #[must_use]
    pub fn into_saved(self, sequence: Sequence, revpos: u64) -> SavedAttachment {
        let encoded_length = self.encoded_length.unwrap_or(self.length);
        SavedAttachment {
            sequence,
            name: self.name,
            mime_type: self.mime_type,
            length: self.length,
            revpos,
            encoding: self.encoding,
            encoded_length,
        }
    }
}
