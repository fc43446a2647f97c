//! Revision store.
//!
//! [`RevisionStore`] is the persistence surface the conflict engine and the
//! replication layer consume. [`MemoryRevisionStore`] is the in-memory
//! implementation used throughout the tests; a durable store implements the
//! same traits.

use crate::attachment::{SavedAttachment, UnsavedAttachment};
use crate::error::{CoreError, CoreResult};
use crate::revision::{Body, DocumentRevision, Revision};
use crate::tree::RevisionTree;
use crate::types::{DocId, RevisionId, Sequence};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Write surface available inside a [`RevisionStore`] transaction.
///
/// All writes are buffered; nothing becomes visible to readers until the
/// transaction commits, and a failing transaction leaves the store
/// untouched.
pub trait RevisionWriteTxn {
    /// Inserts a new revision as a child of `parent`.
    ///
    /// A fresh revision id and sequence are generated. `parent` must name an
    /// existing revision and, unless `allow_conflict` is set, a leaf; a
    /// `None` parent creates the document and is rejected when the document
    /// already exists unless `allow_conflict` is set. Attachment rows of the
    /// direct ancestor are re-keyed under the new sequence with their
    /// `revpos` unchanged.
    fn put_revision(
        &mut self,
        doc_id: &DocId,
        parent: Option<&RevisionId>,
        body: Body,
        deleted: bool,
        allow_conflict: bool,
    ) -> CoreResult<Revision>;

    /// Inserts a revision under a caller-supplied id.
    ///
    /// This is the replication-style insert: a pulled revision arrives with
    /// its id already assigned and may open a new branch, so branching is
    /// always permitted. The structural invariants still hold: the parent
    /// must exist and the generation prefix must be exactly one above it.
    fn force_revision(
        &mut self,
        doc_id: &DocId,
        rev_id: RevisionId,
        parent: Option<&RevisionId>,
        body: Body,
        deleted: bool,
    ) -> CoreResult<Revision>;

    /// Replaces the attachment rows keyed by `rev`'s sequence.
    ///
    /// Each row's `revpos` is set to `rev`'s generation.
    fn set_attachments(
        &mut self,
        rev: &Revision,
        attachments: Vec<UnsavedAttachment>,
    ) -> CoreResult<()>;
}

/// A transactional store of documents, revisions and attachments.
pub trait RevisionStore: Send + Sync {
    /// Returns the ids of all documents with at least one revision.
    fn document_ids(&self) -> CoreResult<Vec<DocId>>;

    /// Returns the deterministic winning revision of `doc_id`.
    ///
    /// `None` when the document does not exist or every branch ends in a
    /// tombstone.
    fn winning_revision(&self, doc_id: &DocId) -> CoreResult<Option<Revision>>;

    /// Returns all active revisions of `doc_id`: non-deleted leaves of its
    /// revision tree. The order is unspecified.
    fn active_revisions(&self, doc_id: &DocId) -> CoreResult<Vec<Revision>>;

    /// Returns the attachment rows keyed by `sequence`.
    fn attachments_at(&self, sequence: Sequence) -> CoreResult<Vec<SavedAttachment>>;

    /// Runs `f` inside a single transaction.
    ///
    /// The transaction commits iff `f` returns `Ok`; any error aborts it and
    /// the store is left exactly as it was. Most callers want the
    /// [`transaction`](RevisionStore::transaction) convenience instead.
    fn execute(
        &self,
        f: &mut dyn FnMut(&mut dyn RevisionWriteTxn) -> CoreResult<()>,
    ) -> CoreResult<()>;

    /// Closure-friendly wrapper over [`execute`](RevisionStore::execute).
    fn transaction<F>(&self, mut f: F) -> CoreResult<()>
    where
        Self: Sized,
        F: FnMut(&mut dyn RevisionWriteTxn) -> CoreResult<()>,
    {
        self.execute(&mut f)
    }

    /// Returns the user-facing view of `doc_id`'s winning revision, with its
    /// attachments populated.
    fn get(&self, doc_id: &DocId) -> CoreResult<Option<DocumentRevision>> {
        match self.winning_revision(doc_id)? {
            Some(rev) => {
                let attachments = self.attachments_at(rev.sequence)?;
                Ok(Some(DocumentRevision::from_revision(&rev, attachments)))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    docs: BTreeMap<DocId, RevisionTree>,
    attachments: BTreeMap<Sequence, Vec<SavedAttachment>>,
    last_sequence: Sequence,
}

struct MemoryTxn {
    state: StoreState,
}

impl MemoryTxn {
    fn insert(
        &mut self,
        doc_id: &DocId,
        rev_id: RevisionId,
        parent: Option<&RevisionId>,
        body: Body,
        deleted: bool,
    ) -> CoreResult<Revision> {
        let sequence = self.state.last_sequence.next();
        let tree = self.state.docs.entry(doc_id.clone()).or_default();
        tree.insert(
            doc_id,
            rev_id.clone(),
            parent.cloned(),
            deleted,
            body.clone(),
            sequence,
        )?;
        self.state.last_sequence = sequence;
        Ok(Revision {
            doc_id: doc_id.clone(),
            rev_id,
            parent: parent.cloned(),
            deleted,
            body,
            sequence,
        })
    }

    fn inherit_attachments(&mut self, parent: Option<&RevisionId>, doc_id: &DocId, to: Sequence) {
        let Some(parent_id) = parent else { return };
        let Some(parent_seq) = self
            .state
            .docs
            .get(doc_id)
            .and_then(|tree| tree.node(parent_id))
            .map(|node| node.sequence)
        else {
            return;
        };
        let carried: Vec<_> = self
            .state
            .attachments
            .get(&parent_seq)
            .map(|rows| rows.iter().map(|row| row.carried_to(to)).collect())
            .unwrap_or_default();
        if !carried.is_empty() {
            self.state.attachments.insert(to, carried);
        }
    }
}

impl RevisionWriteTxn for MemoryTxn {
    fn put_revision(
        &mut self,
        doc_id: &DocId,
        parent: Option<&RevisionId>,
        body: Body,
        deleted: bool,
        allow_conflict: bool,
    ) -> CoreResult<Revision> {
        match parent {
            None => {
                let exists = self
                    .state
                    .docs
                    .get(doc_id)
                    .map_or(false, |tree| !tree.is_empty());
                if exists && !allow_conflict {
                    return Err(CoreError::invalid_insert(
                        doc_id.clone(),
                        "document already exists",
                    ));
                }
            }
            Some(parent_id) => {
                let tree = self
                    .state
                    .docs
                    .get(doc_id)
                    .ok_or_else(|| CoreError::document_not_found(doc_id.clone()))?;
                if !tree.contains(parent_id) {
                    return Err(CoreError::revision_not_found(
                        doc_id.clone(),
                        parent_id.clone(),
                    ));
                }
                if !tree.is_leaf(parent_id) && !allow_conflict {
                    return Err(CoreError::update_conflict(
                        doc_id.clone(),
                        parent_id.clone(),
                    ));
                }
            }
        }

        let rev_id = RevisionId::child_of(parent);
        let rev = self.insert(doc_id, rev_id, parent, body, deleted)?;
        self.inherit_attachments(parent, doc_id, rev.sequence);
        Ok(rev)
    }

    fn force_revision(
        &mut self,
        doc_id: &DocId,
        rev_id: RevisionId,
        parent: Option<&RevisionId>,
        body: Body,
        deleted: bool,
    ) -> CoreResult<Revision> {
        self.insert(doc_id, rev_id, parent, body, deleted)
    }

    fn set_attachments(
        &mut self,
        rev: &Revision,
        attachments: Vec<UnsavedAttachment>,
    ) -> CoreResult<()> {
        let known = self
            .state
            .docs
            .get(&rev.doc_id)
            .map_or(false, |tree| tree.contains(&rev.rev_id));
        if !known {
            return Err(CoreError::revision_not_found(
                rev.doc_id.clone(),
                rev.rev_id.clone(),
            ));
        }
        let rows = attachments
            .into_iter()
            .map(|a| a.into_saved(rev.sequence, rev.generation()))
            .collect();
        self.state.attachments.insert(rev.sequence, rows);
        Ok(())
    }
}

/// An in-memory [`RevisionStore`].
///
/// Transactions run against a copy of the state and are swapped in on
/// commit, so a failed transaction rolls back completely.
#[derive(Debug, Default)]
pub struct MemoryRevisionStore {
    state: RwLock<StoreState>,
}

impl MemoryRevisionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence assigned to the most recent insertion.
    #[must_use]
    pub fn last_sequence(&self) -> Sequence {
        self.state.read().last_sequence
    }
}

impl RevisionStore for MemoryRevisionStore {
    fn document_ids(&self) -> CoreResult<Vec<DocId>> {
        Ok(self
            .state
            .read()
            .docs
            .iter()
            .filter(|(_, tree)| !tree.is_empty())
            .map(|(doc_id, _)| doc_id.clone())
            .collect())
    }

    fn winning_revision(&self, doc_id: &DocId) -> CoreResult<Option<Revision>> {
        let state = self.state.read();
        Ok(state.docs.get(doc_id).and_then(|tree| {
            tree.winner()
                .cloned()
                .and_then(|rev_id| tree.revision(doc_id, &rev_id))
        }))
    }

    fn active_revisions(&self, doc_id: &DocId) -> CoreResult<Vec<Revision>> {
        let state = self.state.read();
        let Some(tree) = state.docs.get(doc_id) else {
            return Ok(Vec::new());
        };
        let mut revs: Vec<_> = tree
            .active_leaves()
            .into_iter()
            .filter_map(|rev_id| tree.revision(doc_id, rev_id))
            .collect();
        revs.sort_by(|a, b| a.rev_id.cmp(&b.rev_id));
        Ok(revs)
    }

    fn attachments_at(&self, sequence: Sequence) -> CoreResult<Vec<SavedAttachment>> {
        Ok(self
            .state
            .read()
            .attachments
            .get(&sequence)
            .cloned()
            .unwrap_or_default())
    }

    fn execute(
        &self,
        f: &mut dyn FnMut(&mut dyn RevisionWriteTxn) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        let mut txn = MemoryTxn {
            state: state.clone(),
        };
        f(&mut txn)?;
        *state = txn.state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn body(key: &str, value: &str) -> Body {
        let mut map = Map::new();
        map.insert(key.to_string(), Value::String(value.to_string()));
        map
    }

    fn create_doc(store: &MemoryRevisionStore, doc: &DocId) -> Revision {
        let mut created = None;
        store
            .transaction(|txn| {
                created = Some(txn.put_revision(doc, None, body("foo", "bar"), false, false)?);
                Ok(())
            })
            .unwrap();
        created.unwrap()
    }

    #[test]
    fn create_and_update() {
        let store = MemoryRevisionStore::new();
        let doc = DocId::new("doc0");
        let root = create_doc(&store, &doc);
        assert_eq!(root.generation(), 1);

        let mut updated = None;
        store
            .transaction(|txn| {
                updated = Some(txn.put_revision(
                    &doc,
                    Some(&root.rev_id),
                    body("foo", "baz"),
                    false,
                    false,
                )?);
                Ok(())
            })
            .unwrap();
        let updated = updated.unwrap();
        assert_eq!(updated.generation(), 2);

        let winner = store.winning_revision(&doc).unwrap().unwrap();
        assert_eq!(winner.rev_id, updated.rev_id);
        assert_eq!(winner.body, body("foo", "baz"));
    }

    #[test]
    fn stale_parent_is_rejected_unless_conflict_allowed() {
        let store = MemoryRevisionStore::new();
        let doc = DocId::new("doc0");
        let root = create_doc(&store, &doc);
        store
            .transaction(|txn| {
                txn.put_revision(&doc, Some(&root.rev_id), Body::new(), false, false)?;
                Ok(())
            })
            .unwrap();

        let stale = store.transaction(|txn| {
            txn.put_revision(&doc, Some(&root.rev_id), Body::new(), false, false)?;
            Ok(())
        });
        assert!(matches!(stale, Err(CoreError::UpdateConflict { .. })));

        store
            .transaction(|txn| {
                txn.put_revision(&doc, Some(&root.rev_id), Body::new(), false, true)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.active_revisions(&doc).unwrap().len(), 2);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = MemoryRevisionStore::new();
        let doc = DocId::new("doc0");
        create_doc(&store, &doc);
        let before = store.last_sequence();

        let result = store.transaction(|txn| {
            txn.put_revision(&DocId::new("doc1"), None, Body::new(), false, false)?;
            Err(CoreError::transaction_aborted("test abort"))
        });
        assert!(result.is_err());
        assert_eq!(store.last_sequence(), before);
        assert_eq!(store.document_ids().unwrap(), vec![doc]);
    }

    #[test]
    fn attachments_are_inherited_across_updates() {
        let store = MemoryRevisionStore::new();
        let doc = DocId::new("doc0");
        let root = create_doc(&store, &doc);

        store
            .transaction(|txn| {
                txn.set_attachments(
                    &root,
                    vec![UnsavedAttachment::new("photo.jpg", "image/jpeg", 1024)],
                )?;
                Ok(())
            })
            .unwrap();

        let mut updated = None;
        store
            .transaction(|txn| {
                updated = Some(txn.put_revision(
                    &doc,
                    Some(&root.rev_id),
                    body("foo", "baz"),
                    false,
                    false,
                )?);
                Ok(())
            })
            .unwrap();
        let updated = updated.unwrap();

        // Carried to the new sequence at the original revpos, and still
        // addressable at the sequence that introduced it.
        let carried = store.attachments_at(updated.sequence).unwrap();
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].revpos, 1);
        assert_eq!(carried[0].sequence, updated.sequence);
        assert_eq!(store.attachments_at(root.sequence).unwrap().len(), 1);

        let view = store.get(&doc).unwrap().unwrap();
        assert_eq!(view.attachments.len(), 1);
    }

    #[test]
    fn force_revision_builds_branches() {
        let store = MemoryRevisionStore::new();
        let doc = DocId::new("doc0");
        let one_a = RevisionId::parse("1-a").unwrap();
        store
            .transaction(|txn| {
                txn.force_revision(&doc, one_a.clone(), None, body("v", "1"), false)?;
                txn.force_revision(
                    &doc,
                    RevisionId::parse("2-a").unwrap(),
                    Some(&one_a),
                    body("v", "2a"),
                    false,
                )?;
                txn.force_revision(
                    &doc,
                    RevisionId::parse("2-b").unwrap(),
                    Some(&one_a),
                    body("v", "2b"),
                    false,
                )?;
                Ok(())
            })
            .unwrap();

        let active = store.active_revisions(&doc).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(
            store.winning_revision(&doc).unwrap().unwrap().rev_id.as_str(),
            "2-b"
        );
    }

    #[test]
    fn get_returns_none_for_missing_or_deleted() {
        let store = MemoryRevisionStore::new();
        let doc = DocId::new("doc0");
        assert!(store.get(&doc).unwrap().is_none());

        let root = create_doc(&store, &doc);
        store
            .transaction(|txn| {
                txn.put_revision(&doc, Some(&root.rev_id), Body::new(), true, false)?;
                Ok(())
            })
            .unwrap();
        assert!(store.get(&doc).unwrap().is_none());
    }
}
