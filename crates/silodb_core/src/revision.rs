//! Revision records.

use crate::attachment::SavedAttachment;
use crate::types::{DocId, RevisionId, Sequence};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON document body.
pub type Body = Map<String, Value>;

/// A single revision as stored in the revision tree.
///
/// This is the low-level record the store and transport operate on. The
/// user-facing projection is [`DocumentRevision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Document this revision belongs to.
    pub doc_id: DocId,
    /// Revision id; the generation prefix equals this node's depth from the
    /// root of the tree.
    pub rev_id: RevisionId,
    /// Parent revision id; `None` for a root.
    pub parent: Option<RevisionId>,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
    /// JSON body; empty for tombstones.
    pub body: Body,
    /// Sequence assigned at insertion.
    pub sequence: Sequence,
}

impl Revision {
    /// Returns the generation of this revision.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.rev_id.generation()
    }
}

/// A user-facing view of a revision.
///
/// This is what conflict resolvers and push filters see. Attachments are
/// populated for resolvers and intentionally left empty in filter views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    /// Document id.
    pub doc_id: DocId,
    /// Revision id.
    pub rev_id: RevisionId,
    /// JSON body.
    pub body: Body,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
    /// Attachments carried by this revision.
    pub attachments: Vec<SavedAttachment>,
    /// Sequence assigned at insertion.
    pub sequence: Sequence,
}

impl DocumentRevision {
    /// Projects a low-level revision into a view carrying `attachments`.
    #[must_use]
    pub fn from_revision(rev: &Revision, attachments: Vec<SavedAttachment>) -> Self {
        Self {
            doc_id: rev.doc_id.clone(),
            rev_id: rev.rev_id.clone(),
            body: rev.body.clone(),
            deleted: rev.deleted,
            attachments,
            sequence: rev.sequence,
        }
    }

    /// Returns the generation of this revision.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.rev_id.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::UnsavedAttachment;

    fn body(key: &str, value: &str) -> Body {
        let mut map = Map::new();
        map.insert(key.to_string(), Value::String(value.to_string()));
        map
    }

    #[test]
    fn projection_carries_fields() {
        let rev = Revision {
            doc_id: DocId::new("doc0"),
            rev_id: RevisionId::parse("2-b").unwrap(),
            parent: Some(RevisionId::parse("1-a").unwrap()),
            deleted: false,
            body: body("foo", "bar"),
            sequence: Sequence::new(5),
        };
        let attachment =
            UnsavedAttachment::new("a.txt", "text/plain", 3).into_saved(Sequence::new(5), 2);

        let view = DocumentRevision::from_revision(&rev, vec![attachment.clone()]);
        assert_eq!(view.doc_id, rev.doc_id);
        assert_eq!(view.rev_id, rev.rev_id);
        assert_eq!(view.generation(), 2);
        assert_eq!(view.attachments, vec![attachment]);
    }
}
