//! Conflict detection and resolution.
//!
//! A document is conflicted when its revision tree has two or more active
//! leaves, which is what concurrent edits on different replicas produce
//! once they replicate together. The engine enumerates conflicted
//! documents, hands the active revisions to a user-supplied
//! [`ConflictResolver`], and collapses the tree around the chosen winner by
//! tombstoning every losing branch inside one transaction.
//!
//! The engine never picks a winner itself: a resolver that declines leaves
//! the document conflicted, and equal generations are the resolver's call.

use crate::error::{CoreError, CoreResult};
use crate::revision::{Body, DocumentRevision};
use crate::store::RevisionStore;
use crate::types::{DocId, RevisionId};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`ConflictEngine::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// [`ConflictEngine::resolve_all`] was called with no resolver
    /// configured.
    #[error("no conflict resolver configured")]
    ResolverNotFound,

    /// The resolver returned a revision that is not part of the conflict
    /// set. The tree is left unchanged.
    #[error("resolver for document {doc_id} returned a revision outside the conflict set: {rev_id}")]
    InvalidResolverOutput {
        /// The document being resolved.
        doc_id: DocId,
        /// The offending revision id.
        rev_id: RevisionId,
    },

    /// The underlying store transaction failed; surfaced verbatim.
    #[error(transparent)]
    Store(#[from] CoreError),
}

/// Chooses the winning revision of a conflicted document.
pub trait ConflictResolver: Send + Sync {
    /// Picks a winner among `conflicts`, the document's active revisions.
    ///
    /// The returned revision must be one of `conflicts`, compared by
    /// revision id. `None` declines resolution and leaves the document
    /// conflicted.
    fn resolve(&self, doc_id: &DocId, conflicts: Vec<DocumentRevision>)
        -> Option<DocumentRevision>;
}

/// Conflict operations over a [`RevisionStore`].
pub struct ConflictEngine<S: RevisionStore> {
    store: Arc<S>,
    resolver: RwLock<Option<Arc<dyn ConflictResolver>>>,
}

impl<S: RevisionStore> ConflictEngine<S> {
    /// Creates an engine over `store` with no resolver configured.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            resolver: RwLock::new(None),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Sets or clears the resolver used by
    /// [`resolve_all`](ConflictEngine::resolve_all).
    pub fn set_resolver(&self, resolver: Option<Arc<dyn ConflictResolver>>) {
        *self.resolver.write() = resolver;
    }

    /// Returns every document id with two or more active revisions.
    ///
    /// The order is unspecified and need not be stable across calls.
    pub fn conflicted_document_ids(&self) -> CoreResult<Vec<DocId>> {
        let mut conflicted = Vec::new();
        for doc_id in self.store.document_ids()? {
            if self.store.active_revisions(&doc_id)?.len() >= 2 {
                conflicted.push(doc_id);
            }
        }
        Ok(conflicted)
    }

    /// Resolves conflicts on one document in a single transaction.
    ///
    /// With fewer than two active revisions the resolver is not invoked and
    /// the call succeeds. A `None` from the resolver also succeeds, leaving
    /// the document conflicted. Otherwise every losing branch gets a fresh
    /// tombstone child; the chosen winner stays the only active leaf.
    pub fn resolve(
        &self,
        doc_id: &DocId,
        resolver: &dyn ConflictResolver,
    ) -> Result<(), ResolveError> {
        let active = self.store.active_revisions(doc_id)?;
        if active.len() < 2 {
            return Ok(());
        }

        let mut conflicts = Vec::with_capacity(active.len());
        for rev in &active {
            let attachments = self.store.attachments_at(rev.sequence)?;
            conflicts.push(DocumentRevision::from_revision(rev, attachments));
        }

        let Some(winner) = resolver.resolve(doc_id, conflicts) else {
            tracing::debug!(doc_id = %doc_id, "resolver declined, document stays conflicted");
            return Ok(());
        };

        if !active.iter().any(|rev| rev.rev_id == winner.rev_id) {
            tracing::warn!(
                doc_id = %doc_id,
                rev_id = %winner.rev_id,
                "resolver returned a revision outside the conflict set"
            );
            return Err(ResolveError::InvalidResolverOutput {
                doc_id: doc_id.clone(),
                rev_id: winner.rev_id,
            });
        }

        let losers: Vec<RevisionId> = active
            .iter()
            .filter(|rev| rev.rev_id != winner.rev_id)
            .map(|rev| rev.rev_id.clone())
            .collect();

        self.store.transaction(|txn| {
            for loser in &losers {
                txn.put_revision(doc_id, Some(loser), Body::new(), true, false)?;
            }
            Ok(())
        })?;

        tracing::debug!(
            doc_id = %doc_id,
            winner = %winner.rev_id,
            tombstoned = losers.len(),
            "collapsed conflicted document"
        );
        Ok(())
    }

    /// Runs the configured resolver over every conflicted document.
    ///
    /// Fails with [`ResolveError::ResolverNotFound`] when no resolver has
    /// been configured; a resolver that declines some documents leaves those
    /// conflicted and is not an error.
    pub fn resolve_all(&self) -> Result<(), ResolveError> {
        let resolver = self
            .resolver
            .read()
            .clone()
            .ok_or(ResolveError::ResolverNotFound)?;
        for doc_id in self.conflicted_document_ids()? {
            self.resolve(&doc_id, resolver.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::UnsavedAttachment;
    use crate::store::{MemoryRevisionStore, RevisionWriteTxn};
    use crate::types::Sequence;
    use serde_json::{Map, Value};
    use std::collections::BTreeSet;

    fn rev(id: &str) -> RevisionId {
        RevisionId::parse(id).unwrap()
    }

    fn body_for(id: &str) -> Body {
        // "2-b" gets {foo2.b: bar2.b}, mirroring the revision it sits on.
        let tag = id.replace('-', ".");
        let mut map = Map::new();
        map.insert(
            format!("foo{tag}"),
            Value::String(format!("bar{tag}")),
        );
        map
    }

    /// Seeds `doc` with `1-a → 2-a → 3-a`, `1-a → 2-b`, `1-a → 2-c
    /// (deleted)`; active revisions are `{3-a, 2-b}`.
    fn seed_conflicted(store: &MemoryRevisionStore, doc: &DocId) {
        store
            .transaction(|txn| {
                txn.force_revision(doc, rev("1-a"), None, body_for("1-a"), false)?;
                txn.force_revision(doc, rev("2-a"), Some(&rev("1-a")), body_for("2-a"), false)?;
                txn.force_revision(doc, rev("3-a"), Some(&rev("2-a")), body_for("3-a"), false)?;
                txn.force_revision(doc, rev("2-b"), Some(&rev("1-a")), body_for("2-b"), false)?;
                txn.force_revision(doc, rev("2-c"), Some(&rev("1-a")), Body::new(), true)?;
                Ok(())
            })
            .unwrap();
    }

    fn engine_with_seed() -> (ConflictEngine<MemoryRevisionStore>, DocId) {
        let store = Arc::new(MemoryRevisionStore::new());
        let doc = DocId::new("doc0");
        seed_conflicted(&store, &doc);
        (ConflictEngine::new(store), doc)
    }

    fn active_ids(engine: &ConflictEngine<MemoryRevisionStore>, doc: &DocId) -> Vec<String> {
        engine
            .store()
            .active_revisions(doc)
            .unwrap()
            .iter()
            .map(|r| r.rev_id.as_str().to_string())
            .collect()
    }

    /// Picks the highest generation, breaking ties by revision id.
    struct BiggestGeneration;

    impl ConflictResolver for BiggestGeneration {
        fn resolve(
            &self,
            _doc_id: &DocId,
            conflicts: Vec<DocumentRevision>,
        ) -> Option<DocumentRevision> {
            conflicts.into_iter().max_by(|a, b| {
                (a.generation(), a.rev_id.clone()).cmp(&(b.generation(), b.rev_id.clone()))
            })
        }
    }

    /// Picks a fixed revision id.
    struct Pick(&'static str);

    impl ConflictResolver for Pick {
        fn resolve(
            &self,
            _doc_id: &DocId,
            conflicts: Vec<DocumentRevision>,
        ) -> Option<DocumentRevision> {
            conflicts.into_iter().find(|c| c.rev_id.as_str() == self.0)
        }
    }

    /// Returns a freshly constructed revision that was never in the set.
    struct Fabricator;

    impl ConflictResolver for Fabricator {
        fn resolve(
            &self,
            doc_id: &DocId,
            _conflicts: Vec<DocumentRevision>,
        ) -> Option<DocumentRevision> {
            Some(DocumentRevision {
                doc_id: doc_id.clone(),
                rev_id: rev("9-fabricated"),
                body: Body::new(),
                deleted: false,
                attachments: Vec::new(),
                sequence: Sequence::new(999),
            })
        }
    }

    /// Declines everything.
    struct Decline;

    impl ConflictResolver for Decline {
        fn resolve(
            &self,
            _doc_id: &DocId,
            _conflicts: Vec<DocumentRevision>,
        ) -> Option<DocumentRevision> {
            None
        }
    }

    /// Resolves only the named documents, declining the rest.
    struct Subset(&'static [&'static str]);

    impl ConflictResolver for Subset {
        fn resolve(
            &self,
            doc_id: &DocId,
            conflicts: Vec<DocumentRevision>,
        ) -> Option<DocumentRevision> {
            if self.0.contains(&doc_id.as_str()) {
                BiggestGeneration.resolve(doc_id, conflicts)
            } else {
                None
            }
        }
    }

    #[test]
    fn collapse_to_biggest_generation() {
        let (engine, doc) = engine_with_seed();
        engine.resolve(&doc, &BiggestGeneration).unwrap();

        assert!(engine.conflicted_document_ids().unwrap().is_empty());
        let winner = engine.store().get(&doc).unwrap().unwrap();
        assert_eq!(winner.generation(), 3);
        assert_eq!(winner.body, body_for("3-a"));
        assert_eq!(active_ids(&engine, &doc), ["3-a"]);
    }

    #[test]
    fn collapse_to_smaller_generation() {
        let (engine, doc) = engine_with_seed();
        engine.resolve(&doc, &Pick("2-b")).unwrap();

        let winner = engine.store().get(&doc).unwrap().unwrap();
        assert_eq!(winner.generation(), 2);
        assert_eq!(winner.body, body_for("2-b"));
        assert_eq!(active_ids(&engine, &doc), ["2-b"]);

        // The 3-a branch now ends in a generation-4 tombstone: 3-a is no
        // longer a leaf, yet the winner is still 2-b.
        let stale = engine.store().transaction(|txn| {
            txn.put_revision(&doc, Some(&rev("3-a")), Body::new(), false, false)?;
            Ok(())
        });
        assert!(matches!(stale, Err(CoreError::UpdateConflict { .. })));
    }

    #[test]
    fn invalid_resolver_output_leaves_tree_unchanged() {
        let (engine, doc) = engine_with_seed();
        let before = active_ids(&engine, &doc);

        let err = engine.resolve(&doc, &Fabricator).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidResolverOutput { .. }));

        assert_eq!(engine.conflicted_document_ids().unwrap(), vec![doc.clone()]);
        assert_eq!(active_ids(&engine, &doc), before);
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn declining_resolver_keeps_conflict() {
        let (engine, doc) = engine_with_seed();
        engine.resolve(&doc, &Decline).unwrap();
        assert_eq!(engine.conflicted_document_ids().unwrap(), vec![doc]);
    }

    #[test]
    fn resolve_all_over_a_subset() {
        let store = Arc::new(MemoryRevisionStore::new());
        let docs: Vec<DocId> = (0..4).map(|i| DocId::new(format!("doc{i}"))).collect();
        for doc in &docs {
            seed_conflicted(&store, doc);
        }
        let engine = ConflictEngine::new(store);
        engine.set_resolver(Some(Arc::new(Subset(&["doc0", "doc1"]))));
        engine.resolve_all().unwrap();

        let remaining: BTreeSet<_> = engine
            .conflicted_document_ids()
            .unwrap()
            .into_iter()
            .collect();
        let expected: BTreeSet<_> = [docs[2].clone(), docs[3].clone()].into_iter().collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn resolve_all_without_resolver_fails() {
        let (engine, _) = engine_with_seed();
        assert!(matches!(
            engine.resolve_all(),
            Err(ResolveError::ResolverNotFound)
        ));
    }

    #[test]
    fn non_conflicted_document_skips_the_resolver() {
        struct Unreachable;
        impl ConflictResolver for Unreachable {
            fn resolve(
                &self,
                _doc_id: &DocId,
                _conflicts: Vec<DocumentRevision>,
            ) -> Option<DocumentRevision> {
                panic!("resolver must not run for a non-conflicted document");
            }
        }

        let store = Arc::new(MemoryRevisionStore::new());
        let doc = DocId::new("doc0");
        store
            .transaction(|txn| {
                txn.force_revision(&doc, rev("1-a"), None, body_for("1-a"), false)?;
                // A tombstoned branch does not make the document conflicted.
                txn.force_revision(&doc, rev("2-c"), Some(&rev("1-a")), Body::new(), true)?;
                txn.force_revision(&doc, rev("2-a"), Some(&rev("1-a")), body_for("2-a"), false)?;
                Ok(())
            })
            .unwrap();
        let engine = ConflictEngine::new(store);

        assert!(engine.conflicted_document_ids().unwrap().is_empty());
        engine.resolve(&doc, &Unreachable).unwrap();
        engine.resolve(&DocId::new("missing"), &Unreachable).unwrap();
    }

    #[test]
    fn resolve_is_idempotent() {
        let (engine, doc) = engine_with_seed();
        engine.resolve(&doc, &BiggestGeneration).unwrap();
        let after_first = active_ids(&engine, &doc);
        let seq_after_first = engine.store().last_sequence();

        engine.resolve(&doc, &BiggestGeneration).unwrap();
        assert_eq!(active_ids(&engine, &doc), after_first);
        assert_eq!(engine.store().last_sequence(), seq_after_first);
    }

    #[test]
    fn attachments_stay_addressable_after_resolve() {
        let (engine, doc) = engine_with_seed();

        // Attach to the losing branch's leaf.
        let loser = engine
            .store()
            .active_revisions(&doc)
            .unwrap()
            .into_iter()
            .find(|r| r.rev_id.as_str() == "2-b")
            .unwrap();
        engine
            .store()
            .transaction(|txn| {
                txn.set_attachments(
                    &loser,
                    vec![UnsavedAttachment::new("audit.log", "text/plain", 42)],
                )?;
                Ok(())
            })
            .unwrap();

        engine.resolve(&doc, &BiggestGeneration).unwrap();

        let rows = engine.store().attachments_at(loser.sequence).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "audit.log");
    }
}
