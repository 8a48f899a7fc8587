//! Minimal edit computation between two text snapshots.
//!
//! Trims the longest common prefix and suffix, then emits at most one
//! delete plus one insert covering the differing middle. Linear time,
//! one contiguous region: exactly the shape produced by single-cursor
//! typing and pasting. A multi-region edit (two independent changes in
//! one change event) collapses into one oversized delete+insert pair:
//! less compact, but the receiver still lands on the same final text.

use crate::document::TextSnapshot;
use crate::protocol::Operation;

/// Longest common prefix length, in UTF-16 units.
fn common_prefix(a: &[u16], b: &[u16]) -> usize {
    let max = a.len().min(b.len());
    let mut p = 0;
    while p < max && a[p] == b[p] {
        p += 1;
    }
    p
}

/// Longest common suffix length, scanning only the region the prefix
/// has not already claimed. The bound keeps the two windows from
/// overlapping when both texts share one long common run.
fn common_suffix(a: &[u16], b: &[u16], prefix: usize) -> usize {
    let max = (a.len() - prefix).min(b.len() - prefix);
    let mut s = 0;
    while s < max && a[a.len() - 1 - s] == b[b.len() - 1 - s] {
        s += 1;
    }
    s
}

/// Compute the operations transforming `old` into `new`.
///
/// Returns zero, one, or two operations. The delete is always emitted
/// before the insert so a receiver applying them in order performs a
/// replace-in-place against the same old text.
pub fn diff(old: &TextSnapshot, new: &TextSnapshot, doc_id: &str, source: &str) -> Vec<Operation> {
    let mut ops = Vec::new();
    if old == new {
        return ops;
    }

    let a = old.units();
    let b = new.units();
    let prefix = common_prefix(a, b);
    let suffix = common_suffix(a, b, prefix);

    let old_mid = &a[prefix..a.len() - suffix];
    let new_mid = &b[prefix..b.len() - suffix];

    if !old_mid.is_empty() {
        ops.push(Operation::delete(
            doc_id,
            prefix,
            String::from_utf16_lossy(old_mid),
            source,
        ));
    }
    if !new_mid.is_empty() {
        ops.push(Operation::insert(
            doc_id,
            prefix,
            String::from_utf16_lossy(new_mid),
            source,
        ));
    }
    ops
}
