//! Push filter bridging.
//!
//! Users express push filters over the high-level [`DocumentRevision`]
//! view; the transport evaluates filters over the low-level [`Revision`] it
//! moves on the wire. The bridge adapts one to the other.

use silodb_core::{DocumentRevision, Revision};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameters passed through to a filter on every invocation.
pub type FilterParams = BTreeMap<String, String>;

/// A user-supplied push filter over the high-level revision view.
pub type PushFilter = Arc<dyn Fn(&DocumentRevision, &FilterParams) -> bool + Send + Sync>;

/// The filter shape the transport consumes.
pub type TransportFilter = Arc<dyn Fn(&Revision, &FilterParams) -> bool + Send + Sync>;

/// Wraps a user push filter into a transport filter.
///
/// The user filter is captured by value at wrap time; later changes to the
/// configuration it came from do not affect in-flight filtering. Each
/// low-level revision is projected into a [`DocumentRevision`] before
/// invocation; attachments are intentionally left empty in the filter view.
#[must_use]
pub fn bridge_push_filter(filter: PushFilter) -> TransportFilter {
    Arc::new(move |rev: &Revision, params: &FilterParams| {
        let view = DocumentRevision::from_revision(rev, Vec::new());
        filter(&view, params)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use silodb_core::{Body, DocId, RevisionId, Sequence};

    fn sample_revision() -> Revision {
        let mut body = Body::new();
        body.insert("kind".into(), serde_json::Value::String("note".into()));
        Revision {
            doc_id: DocId::new("doc0"),
            rev_id: RevisionId::parse("2-b").unwrap(),
            parent: Some(RevisionId::parse("1-a").unwrap()),
            deleted: false,
            body,
            sequence: Sequence::new(7),
        }
    }

    #[test]
    fn bridged_filter_sees_the_projected_view() {
        let filter: PushFilter = Arc::new(|view, params| {
            assert_eq!(view.doc_id.as_str(), "doc0");
            assert_eq!(view.rev_id.as_str(), "2-b");
            assert_eq!(view.sequence, Sequence::new(7));
            assert!(view.attachments.is_empty());
            !view.deleted && params.get("kind").map(String::as_str) == Some("note")
        });
        let bridged = bridge_push_filter(filter);

        let mut params = FilterParams::new();
        params.insert("kind".into(), "note".into());
        assert!(bridged(&sample_revision(), &params));

        params.insert("kind".into(), "photo".into());
        assert!(!bridged(&sample_revision(), &params));
    }

    #[test]
    fn bridge_captures_the_filter_by_value() {
        let filter: PushFilter = Arc::new(|_, _| true);
        let bridged = bridge_push_filter(Arc::clone(&filter));
        drop(filter);
        assert!(bridged(&sample_revision(), &FilterParams::new()));
    }
}
