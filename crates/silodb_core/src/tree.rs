//! Per-document revision tree.
//!
//! The tree is a DAG of revisions addressable by [`RevisionId`]. It is
//! append-only: updates add children, deletions add tombstone children, and
//! nothing is ever removed. All queries here are pure; persistence and
//! transactions live in [`crate::store`].

use crate::error::{CoreError, CoreResult};
use crate::revision::{Body, Revision};
use crate::types::{DocId, RevisionId, Sequence};
use std::collections::HashMap;

/// A single node of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionNode {
    /// Parent revision id; `None` for a root.
    pub parent: Option<RevisionId>,
    /// Whether this node is a deletion tombstone.
    pub deleted: bool,
    /// JSON body; empty for tombstones.
    pub body: Body,
    /// Sequence assigned at insertion.
    pub sequence: Sequence,
}

/// The revision DAG of one document.
#[derive(Debug, Clone, Default)]
pub struct RevisionTree {
    nodes: HashMap<RevisionId, RevisionNode>,
    children: HashMap<RevisionId, Vec<RevisionId>>,
}

impl RevisionTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the tree has no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the tree contains `rev_id`.
    #[must_use]
    pub fn contains(&self, rev_id: &RevisionId) -> bool {
        self.nodes.contains_key(rev_id)
    }

    /// Returns the node for `rev_id`, if present.
    #[must_use]
    pub fn node(&self, rev_id: &RevisionId) -> Option<&RevisionNode> {
        self.nodes.get(rev_id)
    }

    /// Returns true if `rev_id` has no children.
    #[must_use]
    pub fn is_leaf(&self, rev_id: &RevisionId) -> bool {
        self.children.get(rev_id).map_or(true, |c| c.is_empty())
    }

    /// Inserts a revision.
    ///
    /// Rejects duplicate ids, missing parents, and children whose generation
    /// is not exactly one above their parent's. Roots may carry any positive
    /// generation, which is what a replicated branch with a trimmed history
    /// looks like.
    pub fn insert(
        &mut self,
        doc_id: &DocId,
        rev_id: RevisionId,
        parent: Option<RevisionId>,
        deleted: bool,
        body: Body,
        sequence: Sequence,
    ) -> CoreResult<()> {
        if self.nodes.contains_key(&rev_id) {
            return Err(CoreError::invalid_insert(
                doc_id.clone(),
                format!("revision {rev_id} already present"),
            ));
        }
        if let Some(parent_id) = &parent {
            if !self.nodes.contains_key(parent_id) {
                return Err(CoreError::revision_not_found(
                    doc_id.clone(),
                    parent_id.clone(),
                ));
            }
            if rev_id.generation() != parent_id.generation() + 1 {
                return Err(CoreError::invalid_insert(
                    doc_id.clone(),
                    format!(
                        "generation {} does not follow parent {}",
                        rev_id.generation(),
                        parent_id
                    ),
                ));
            }
            self.children
                .entry(parent_id.clone())
                .or_default()
                .push(rev_id.clone());
        }
        self.nodes.insert(
            rev_id,
            RevisionNode {
                parent,
                deleted,
                body,
                sequence,
            },
        );
        Ok(())
    }

    /// Returns all leaves, tombstones included.
    #[must_use]
    pub fn leaves(&self) -> Vec<&RevisionId> {
        self.nodes
            .keys()
            .filter(|rev_id| self.is_leaf(rev_id))
            .collect()
    }

    /// Returns all active leaves: leaves that are not tombstones.
    ///
    /// A document with two or more active leaves is conflicted.
    #[must_use]
    pub fn active_leaves(&self) -> Vec<&RevisionId> {
        self.nodes
            .iter()
            .filter(|(rev_id, node)| !node.deleted && self.is_leaf(rev_id))
            .map(|(rev_id, _)| rev_id)
            .collect()
    }

    /// Returns true if the document has two or more active leaves.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        self.active_leaves().len() >= 2
    }

    /// Walks from `rev_id` to the root, inclusive.
    pub fn parent_chain(&self, doc_id: &DocId, rev_id: &RevisionId) -> CoreResult<Vec<RevisionId>> {
        if !self.contains(rev_id) {
            return Err(CoreError::revision_not_found(
                doc_id.clone(),
                rev_id.clone(),
            ));
        }
        let mut chain = Vec::new();
        let mut current = Some(rev_id.clone());
        while let Some(rev_id) = current {
            current = self.nodes.get(&rev_id).and_then(|n| n.parent.clone());
            chain.push(rev_id);
        }
        Ok(chain)
    }

    /// Returns the deterministic winning revision.
    ///
    /// The winner is the active leaf with the highest generation; equal
    /// generations are broken by the lexicographically greatest revision id.
    /// `None` means every branch ends in a tombstone and the document reads
    /// as deleted.
    #[must_use]
    pub fn winner(&self) -> Option<&RevisionId> {
        self.active_leaves().into_iter().max_by(|a, b| {
            (a.generation(), a.as_str()).cmp(&(b.generation(), b.as_str()))
        })
    }

    /// Materializes the full revision record for `rev_id`.
    #[must_use]
    pub fn revision(&self, doc_id: &DocId, rev_id: &RevisionId) -> Option<Revision> {
        self.nodes.get(rev_id).map(|node| Revision {
            doc_id: doc_id.clone(),
            rev_id: rev_id.clone(),
            parent: node.parent.clone(),
            deleted: node.deleted,
            body: node.body.clone(),
            sequence: node.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn rev(id: &str) -> RevisionId {
        RevisionId::parse(id).unwrap()
    }

    /// The three-branch tree used across the conflict tests:
    /// `1-a → 2-a → 3-a`, `1-a → 2-b`, `1-a → 2-c (deleted)`.
    fn seeded() -> (DocId, RevisionTree) {
        let doc = DocId::new("doc0");
        let mut tree = RevisionTree::new();
        let mut seq = Sequence::new(0);
        let mut insert = |id: &str, parent: Option<&str>, deleted: bool| {
            seq = seq.next();
            tree.insert(
                &doc,
                rev(id),
                parent.map(rev),
                deleted,
                Map::new(),
                seq,
            )
            .unwrap();
        };
        insert("1-a", None, false);
        insert("2-a", Some("1-a"), false);
        insert("3-a", Some("2-a"), false);
        insert("2-b", Some("1-a"), false);
        insert("2-c", Some("1-a"), true);
        (doc, tree)
    }

    #[test]
    fn active_leaves_exclude_tombstones_and_interior_nodes() {
        let (_, tree) = seeded();
        let mut active: Vec<_> = tree.active_leaves().iter().map(|r| r.as_str()).collect();
        active.sort_unstable();
        assert_eq!(active, ["2-b", "3-a"]);
        assert!(tree.is_conflicted());
    }

    #[test]
    fn winner_prefers_higher_generation() {
        let (_, tree) = seeded();
        assert_eq!(tree.winner().unwrap().as_str(), "3-a");
    }

    #[test]
    fn winner_breaks_generation_ties_lexicographically() {
        let doc = DocId::new("doc1");
        let mut tree = RevisionTree::new();
        tree.insert(&doc, rev("1-a"), None, false, Map::new(), Sequence::new(1))
            .unwrap();
        tree.insert(
            &doc,
            rev("2-a"),
            Some(rev("1-a")),
            false,
            Map::new(),
            Sequence::new(2),
        )
        .unwrap();
        tree.insert(
            &doc,
            rev("2-b"),
            Some(rev("1-a")),
            false,
            Map::new(),
            Sequence::new(3),
        )
        .unwrap();
        assert_eq!(tree.winner().unwrap().as_str(), "2-b");
    }

    #[test]
    fn all_tombstoned_tree_has_no_winner() {
        let doc = DocId::new("doc2");
        let mut tree = RevisionTree::new();
        tree.insert(&doc, rev("1-a"), None, false, Map::new(), Sequence::new(1))
            .unwrap();
        tree.insert(
            &doc,
            rev("2-a"),
            Some(rev("1-a")),
            true,
            Map::new(),
            Sequence::new(2),
        )
        .unwrap();
        assert!(tree.winner().is_none());
        assert!(!tree.is_conflicted());
    }

    #[test]
    fn parent_chain_walks_to_root() {
        let (doc, tree) = seeded();
        let chain: Vec<_> = tree
            .parent_chain(&doc, &rev("3-a"))
            .unwrap()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();
        assert_eq!(chain, ["3-a", "2-a", "1-a"]);
    }

    #[test]
    fn insert_rejects_missing_parent() {
        let doc = DocId::new("doc3");
        let mut tree = RevisionTree::new();
        let err = tree
            .insert(
                &doc,
                rev("2-a"),
                Some(rev("1-z")),
                false,
                Map::new(),
                Sequence::new(1),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::RevisionNotFound { .. }));
    }

    #[test]
    fn insert_rejects_generation_gap() {
        let doc = DocId::new("doc4");
        let mut tree = RevisionTree::new();
        tree.insert(&doc, rev("1-a"), None, false, Map::new(), Sequence::new(1))
            .unwrap();
        let err = tree
            .insert(
                &doc,
                rev("3-x"),
                Some(rev("1-a")),
                false,
                Map::new(),
                Sequence::new(2),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInsert { .. }));
    }

    #[test]
    fn insert_rejects_duplicates() {
        let doc = DocId::new("doc5");
        let mut tree = RevisionTree::new();
        tree.insert(&doc, rev("1-a"), None, false, Map::new(), Sequence::new(1))
            .unwrap();
        let err = tree
            .insert(&doc, rev("1-a"), None, false, Map::new(), Sequence::new(2))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInsert { .. }));
    }
}
