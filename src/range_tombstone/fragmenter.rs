// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::RangeTombstone;
use crate::UserKey;

/// Splits overlapping tombstones at every start and end boundary.
///
/// The output is sorted by `(start asc, seqno desc)`. Any two fragments
/// either have identical bounds or are disjoint. Every key covered by an input
/// tombstone at seqno `s` is covered by exactly one output fragment at `s`.
#[must_use]
pub fn fragment(mut tombstones: Vec<RangeTombstone>) -> Vec<RangeTombstone> {
    if tombstones.len() < 2 {
        return tombstones;
    }

    let mut boundaries = tombstones
        .iter()
        .flat_map(|t| [t.start.clone(), t.end.clone()])
        .collect::<Vec<UserKey>>();
    boundaries.sort();
    boundaries.dedup();

    tombstones.sort();

    let mut fragments = Vec::with_capacity(tombstones.len());

    for window in boundaries.windows(2) {
        let [lo, hi] = window else {
            continue;
        };

        // Inputs are sorted by start, so anything starting at or after `hi` is irrelevant
        let relevant = tombstones.partition_point(|t| t.start < *hi);

        for t in tombstones.iter().take(relevant) {
            if t.start <= *lo && *hi <= t.end {
                fragments.push(RangeTombstone {
                    start: lo.clone(),
                    end: hi.clone(),
                    seqno: t.seqno,
                });
            }
        }
    }

    fragments.sort();
    fragments.dedup();

    log::trace!(
        "fragmented {} range tombstones into {} fragments",
        tombstones.len(),
        fragments.len(),
    );

    fragments
}
