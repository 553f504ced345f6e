//! Per-node decision procedure mapping a freshly stat'd node and its previous register record
//! to an operation code.

use crate::missing::{MissingList, Reason};
use crate::types::{NodeKind, NodeMetadata, OpCode};

/// Decide the operation code for `live` against `previous`, the node's last live record in the
/// old register (`None` if the path has no prior record, or its last record was a tombstone).
#[must_use]
pub fn decide(previous: Option<&NodeMetadata>, live: &NodeMetadata, missing: &MissingList) -> OpCode {
    let Some(prev) = previous else {
        return OpCode::Add;
    };
    if prev.is_tombstone() {
        return OpCode::Add;
    }

    if let (NodeKind::Link { target: prev_target }, NodeKind::Link { target: live_target }) =
        (&prev.kind, &live.kind)
    {
        if prev_target != live_target {
            return OpCode::LinkChanged;
        }
    }

    if !prev.same_type_size_mtime(live) {
        return OpCode::Modified;
    }

    // Type, size and mtime agree: this is metadata-only unless the previous file record's
    // fingerprint itself needs attention.
    if let NodeKind::File { fingerprint } = &prev.kind {
        let Some(fp) = fingerprint else {
            return OpCode::Incomplete;
        };
        if let Some(entry) = missing.get(fp) {
            if !entry.recovered {
                return match entry.reason {
                    Reason::Missing => OpCode::Recover,
                    Reason::Inconsistent => OpCode::Conflict,
                };
            }
        }
    }
    OpCode::MetaOnly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fingerprint;

    fn file(fp: Option<Fingerprint>, size: i64, mtime: i64) -> NodeMetadata {
        NodeMetadata { kind: NodeKind::File { fingerprint: fp }, size, mtime, uid: 0, gid: 0, mode: 0o644 }
    }

    #[test]
    fn no_previous_record_is_add() {
        let missing = MissingList::new();
        let live = file(None, 10, 100);
        assert_eq!(decide(None, &live, &missing), OpCode::Add);
    }

    #[test]
    fn tombstoned_previous_is_add() {
        let missing = MissingList::new();
        let prev = NodeMetadata::tombstone();
        let live = file(None, 10, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::Add);
    }

    #[test]
    fn changed_size_is_modified() {
        let missing = MissingList::new();
        let prev = file(Some(Fingerprint::new("aaaa", 0)), 10, 100);
        let live = file(None, 20, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::Modified);
    }

    #[test]
    fn unchanged_with_fingerprint_is_meta_only() {
        let missing = MissingList::new();
        let prev = file(Some(Fingerprint::new("aaaa", 0)), 10, 100);
        let live = file(None, 10, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::MetaOnly);
    }

    #[test]
    fn unchanged_without_fingerprint_is_incomplete() {
        let missing = MissingList::new();
        let prev = file(None, 10, 100);
        let live = file(None, 10, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::Incomplete);
    }

    #[test]
    fn unchanged_with_missing_fingerprint_is_recover() {
        let mut missing = MissingList::new();
        let fp = Fingerprint::new("aaaa", 0);
        missing.mark(fp.clone(), Reason::Missing, 10);
        let prev = file(Some(fp), 10, 100);
        let live = file(None, 10, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::Recover);
    }

    #[test]
    fn unchanged_with_inconsistent_fingerprint_is_conflict() {
        let mut missing = MissingList::new();
        let fp = Fingerprint::new("aaaa", 0);
        missing.mark(fp.clone(), Reason::Inconsistent, 10);
        let prev = file(Some(fp), 10, 100);
        let live = file(None, 10, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::Conflict);
    }

    #[test]
    fn recovered_missing_fingerprint_is_meta_only() {
        let mut missing = MissingList::new();
        let fp = Fingerprint::new("aaaa", 0);
        missing.mark(fp.clone(), Reason::Missing, 10);
        missing.mark_recovered(&fp);
        let prev = file(Some(fp), 10, 100);
        let live = file(None, 10, 100);
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::MetaOnly);
    }

    #[test]
    fn link_target_change_is_link_changed() {
        let missing = MissingList::new();
        let prev = NodeMetadata {
            kind: NodeKind::Link { target: "a".into() },
            size: 1,
            mtime: 100,
            uid: 0,
            gid: 0,
            mode: 0o777,
        };
        let live = NodeMetadata { kind: NodeKind::Link { target: "b".into() }, ..prev.clone() };
        assert_eq!(decide(Some(&prev), &live, &missing), OpCode::LinkChanged);
    }
}
