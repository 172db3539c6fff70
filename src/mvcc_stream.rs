// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    internal_iter::InternalIterator,
    merge::MergingIter,
    merge_operator::{merge_without_operator, MergeOperator},
    InternalValue, UserKey, UserValue, ValueType,
};
use std::sync::Arc;

/// A user key and the value it resolves to
pub type KvPair = (UserKey, UserValue);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Unpositioned,
    Forward,
    Reverse,
}

/// Consumes a [`MergingIter`] and emits one entry per user key according to
/// MVCC and tombstone rules
///
/// For each user key, the newest version visible to the merging iterator
/// decides: a value is returned, a point tombstone hides the key, and merge
/// operands are folded over the next older value (see [`MergeOperator`]).
///
/// This iterator is used for read operations.
#[allow(clippy::module_name_repetitions)]
pub struct MvccStream<'a> {
    inner: MergingIter<'a>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    direction: Direction,

    /// First version of the next user key in the current direction,
    /// already pulled from the inner iterator
    lookahead: Option<InternalValue>,

    current_key: Option<UserKey>,
}

impl<'a> MvccStream<'a> {
    /// Initializes a new MVCC stream
    #[must_use]
    pub fn new(inner: MergingIter<'a>) -> Self {
        Self {
            inner,
            merge_operator: None,
            direction: Direction::Unpositioned,
            lookahead: None,
            current_key: None,
        }
    }

    /// Sets the merge operator used to fold merge operands.
    #[must_use]
    pub fn with_merge_operator(mut self, merge_operator: Option<Arc<dyn MergeOperator>>) -> Self {
        self.merge_operator = merge_operator;
        self
    }

    /// Moves to the first user key `>= key`.
    pub fn seek_ge<K: AsRef<[u8]>>(&mut self, key: K) -> Option<KvPair> {
        self.direction = Direction::Forward;
        let head = self.inner.seek_ge(key.as_ref());
        self.find_next(head)
    }

    /// Moves to the last user key `< key`.
    pub fn seek_lt<K: AsRef<[u8]>>(&mut self, key: K) -> Option<KvPair> {
        self.direction = Direction::Reverse;
        let head = self.inner.seek_lt(key.as_ref());
        self.find_prev(head)
    }

    /// Moves to the first user key.
    pub fn first(&mut self) -> Option<KvPair> {
        self.direction = Direction::Forward;
        let head = self.inner.first();
        self.find_next(head)
    }

    /// Moves to the last user key.
    pub fn last(&mut self) -> Option<KvPair> {
        self.direction = Direction::Reverse;
        let head = self.inner.last();
        self.find_prev(head)
    }

    /// Moves to the next user key.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<KvPair> {
        match (self.direction, self.current_key.clone()) {
            (Direction::Forward, _) => {
                let head = self.lookahead.take();
                self.find_next(head)
            }
            (Direction::Reverse, Some(key)) => {
                self.direction = Direction::Forward;

                let mut head = self.inner.seek_ge(&key);
                while head.as_ref().is_some_and(|v| v.key.user_key == key) {
                    head = self.inner.next();
                }

                self.find_next(head)
            }
            (Direction::Reverse | Direction::Unpositioned, None)
            | (Direction::Unpositioned, Some(_)) => self.first(),
        }
    }

    /// Moves to the previous user key.
    pub fn prev(&mut self) -> Option<KvPair> {
        match (self.direction, self.current_key.clone()) {
            (Direction::Reverse, _) => {
                let head = self.lookahead.take();
                self.find_prev(head)
            }
            (Direction::Forward, Some(key)) => {
                self.direction = Direction::Reverse;
                let head = self.inner.seek_lt(&key);
                self.find_prev(head)
            }
            (Direction::Forward | Direction::Unpositioned, None)
            | (Direction::Unpositioned, Some(_)) => self.last(),
        }
    }

    /// Returns the error that stopped the iterator, if any.
    #[must_use]
    pub fn error(&self) -> Option<&crate::Error> {
        self.inner.error()
    }

    /// Releases the iterator.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an underlying iterator hit an error.
    pub fn close(&mut self) -> crate::Result<()> {
        self.lookahead = None;
        self.current_key = None;
        self.inner.close()
    }

    /// Restricts the iterator to user keys in `[lower, upper)`.
    ///
    /// The iterator must be repositioned afterwards.
    pub fn set_bounds(&mut self, lower: Option<UserKey>, upper: Option<UserKey>) {
        self.direction = Direction::Unpositioned;
        self.lookahead = None;
        self.current_key = None;
        self.inner.set_bounds(lower, upper);
    }

    /// Reads all user keys in forward direction, consuming the stream.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an underlying iterator hit an error.
    pub fn collect_vec(mut self) -> crate::Result<Vec<KvPair>> {
        let mut items = vec![];

        let mut item = self.first();
        while let Some(kv) = item {
            items.push(kv);
            item = self.next();
        }

        // NOTE: Closing hands out the error that stopped the iteration, if any
        self.close()?;

        Ok(items)
    }

    fn land(&mut self, key: Option<UserKey>) {
        self.current_key = key;
    }

    fn find_next(&mut self, mut head: Option<InternalValue>) -> Option<KvPair> {
        loop {
            let Some(first) = head else {
                self.lookahead = None;
                self.land(None);
                return None;
            };

            let user_key = first.key.user_key.clone();
            let mut settled = first.key.value_type != ValueType::Merge;

            // Versions arrive newest first; everything below the first
            // non-merge version is irrelevant
            let mut versions = vec![first];

            let next_key = loop {
                match self.inner.next() {
                    Some(v) if v.key.user_key == user_key => {
                        if !settled {
                            settled = v.key.value_type != ValueType::Merge;
                            versions.push(v);
                        }
                    }
                    other => break other,
                }
            };

            if self.inner.error().is_some() {
                self.lookahead = None;
                self.land(None);
                return None;
            }

            self.lookahead = next_key;

            if let Some(value) = self.resolve(&user_key, versions.iter()) {
                self.land(Some(user_key.clone()));
                return Some((user_key, value));
            }

            head = self.lookahead.take();
        }
    }

    fn find_prev(&mut self, mut head: Option<InternalValue>) -> Option<KvPair> {
        loop {
            let Some(first) = head else {
                self.lookahead = None;
                self.land(None);
                return None;
            };

            let user_key = first.key.user_key.clone();

            // Versions arrive oldest first
            let mut versions = vec![first];

            let prev_key = loop {
                match self.inner.prev() {
                    Some(v) if v.key.user_key == user_key => versions.push(v),
                    other => break other,
                }
            };

            if self.inner.error().is_some() {
                self.lookahead = None;
                self.land(None);
                return None;
            }

            self.lookahead = prev_key;

            if let Some(value) = self.resolve(&user_key, versions.iter().rev()) {
                self.land(Some(user_key.clone()));
                return Some((user_key, value));
            }

            head = self.lookahead.take();
        }
    }

    /// Resolves the versions of a user key, given newest first.
    fn resolve<'v>(
        &self,
        key: &[u8],
        versions: impl Iterator<Item = &'v InternalValue>,
    ) -> Option<UserValue> {
        let mut operands: Vec<&[u8]> = vec![];

        for version in versions {
            match version.key.value_type {
                ValueType::Value => return self.fold(key, Some(&version.value), operands),
                ValueType::Tombstone | ValueType::WeakTombstone => {
                    return self.fold(key, None, operands)
                }
                ValueType::Merge => operands.push(&version.value),
                ValueType::RangeTombstone => {}
            }
        }

        self.fold(key, None, operands)
    }

    /// Folds operands (given newest first) over a base value.
    fn fold(
        &self,
        key: &[u8],
        base: Option<&UserValue>,
        mut operands: Vec<&[u8]>,
    ) -> Option<UserValue> {
        if operands.is_empty() {
            return base.cloned();
        }

        operands.reverse();

        match &self.merge_operator {
            Some(op) => Some(op.merge(key, base.map(|b| &**b), &operands)),
            None => merge_without_operator(&operands),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        merge::MergingIterLevel, range_tombstone::RangeTombstone, run::SortedRun, SeqNo,
    };
    use test_log::test;

    fn v(key: &str, value: &str, seqno: SeqNo, value_type: ValueType) -> InternalValue {
        InternalValue::from_components(key, value, seqno, value_type)
    }

    /// Builds one level per item list, newest level first
    fn stream(levels: Vec<Vec<InternalValue>>, snapshot: SeqNo) -> MvccStream<'static> {
        let levels = levels
            .into_iter()
            .map(|items| {
                let run = Arc::new(SortedRun::new(items, vec![]));
                MergingIterLevel::new(Box::new(run.iter()))
            })
            .collect();

        MvccStream::new(MergingIter::with_snapshot(levels, snapshot))
    }

    fn kv(key: &str, value: &str) -> KvPair {
        (key.into(), value.into())
    }

    fn forward(stream: &mut MvccStream<'_>) -> Vec<KvPair> {
        let mut out = vec![];
        let mut item = stream.first();
        while let Some(kv) = item {
            out.push(kv);
            item = stream.next();
        }
        assert!(stream.error().is_none());
        out
    }

    fn backward(stream: &mut MvccStream<'_>) -> Vec<KvPair> {
        let mut out = vec![];
        let mut item = stream.last();
        while let Some(kv) = item {
            out.push(kv);
            item = stream.prev();
        }
        out
    }

    struct Concat;

    impl MergeOperator for Concat {
        fn merge(&self, _: &[u8], base: Option<&[u8]>, operands: &[&[u8]]) -> UserValue {
            let mut v = base.unwrap_or_default().to_vec();
            for op in operands {
                v.extend_from_slice(op);
            }
            v.into()
        }
    }

    #[test]
    fn mvcc_stream_newest_version_wins() -> crate::Result<()> {
        let mut stream = stream(
            vec![
                vec![v("a", "a3", 3, ValueType::Value)],
                vec![v("a", "a1", 1, ValueType::Value), v("b", "b1", 1, ValueType::Value)],
            ],
            SeqNo::MAX,
        );

        assert_eq!(vec![kv("a", "a3"), kv("b", "b1")], forward(&mut stream));
        assert_eq!(vec![kv("b", "b1"), kv("a", "a3")], backward(&mut stream));

        Ok(())
    }

    #[test]
    fn mvcc_stream_tombstones_hide_keys() -> crate::Result<()> {
        let mut stream = stream(
            vec![
                vec![
                    v("a", "", 5, ValueType::Tombstone),
                    v("c", "", 5, ValueType::WeakTombstone),
                ],
                vec![
                    v("a", "a1", 1, ValueType::Value),
                    v("b", "b1", 1, ValueType::Value),
                    v("c", "c1", 1, ValueType::Value),
                ],
            ],
            SeqNo::MAX,
        );

        assert_eq!(vec![kv("b", "b1")], forward(&mut stream));
        assert_eq!(vec![kv("b", "b1")], backward(&mut stream));

        Ok(())
    }

    #[test]
    fn mvcc_stream_snapshot() -> crate::Result<()> {
        let mut stream = stream(
            vec![
                vec![v("a", "", 5, ValueType::Tombstone)],
                vec![v("a", "a1", 1, ValueType::Value)],
            ],
            4,
        );

        assert_eq!(vec![kv("a", "a1")], forward(&mut stream));

        Ok(())
    }

    #[test]
    fn mvcc_stream_merge_operands() -> crate::Result<()> {
        let levels = || {
            vec![
                vec![v("a", "c", 4, ValueType::Merge), v("b", "y", 4, ValueType::Merge)],
                vec![v("a", "b", 3, ValueType::Merge), v("b", "", 3, ValueType::Tombstone)],
                vec![v("a", "a", 2, ValueType::Value), v("b", "x", 2, ValueType::Value)],
            ]
        };

        let mut with_op = stream(levels(), SeqNo::MAX).with_merge_operator(Some(Arc::new(Concat)));
        assert_eq!(vec![kv("a", "abc"), kv("b", "y")], forward(&mut with_op));
        assert_eq!(vec![kv("b", "y"), kv("a", "abc")], backward(&mut with_op));

        let without_op = stream(levels(), SeqNo::MAX);
        assert_eq!(vec![kv("a", "c"), kv("b", "y")], without_op.collect_vec()?);

        Ok(())
    }

    #[test]
    fn mvcc_stream_direction_switch() {
        let mut stream = stream(
            vec![
                vec![v("a", "a2", 2, ValueType::Value)],
                vec![
                    v("a", "a1", 1, ValueType::Value),
                    v("b", "b1", 1, ValueType::Value),
                    v("c", "c1", 1, ValueType::Value),
                ],
            ],
            SeqNo::MAX,
        );

        assert_eq!(Some(kv("a", "a2")), stream.first());
        assert_eq!(Some(kv("b", "b1")), stream.next());
        assert_eq!(Some(kv("a", "a2")), stream.prev());
        assert_eq!(None, stream.prev());
        assert_eq!(Some(kv("a", "a2")), stream.next());
        assert_eq!(Some(kv("b", "b1")), stream.next());
        assert_eq!(Some(kv("c", "c1")), stream.next());
        assert_eq!(None, stream.next());
        assert_eq!(Some(kv("c", "c1")), stream.prev());
    }

    #[test]
    fn mvcc_stream_seek_round_trip() {
        let mut stream = stream(
            vec![
                vec![v("b", "b2", 2, ValueType::Value)],
                vec![v("a", "a1", 1, ValueType::Value), v("c", "c1", 1, ValueType::Value)],
            ],
            SeqNo::MAX,
        );

        let direct = stream.seek_ge("b");
        assert_eq!(Some(kv("b", "b2")), direct);
        assert_eq!(Some(kv("a", "a1")), stream.prev());
        assert_eq!(direct, stream.next());

        assert_eq!(Some(kv("a", "a1")), stream.seek_lt("b"));
    }

    #[test]
    fn mvcc_stream_range_tombstone() -> crate::Result<()> {
        let run = Arc::new(SortedRun::new(vec![], vec![RangeTombstone::new("b", "d", 9)]));
        let older = Arc::new(SortedRun::new(
            vec![
                v("a", "a1", 1, ValueType::Value),
                v("b", "b1", 1, ValueType::Value),
                v("c", "c1", 1, ValueType::Value),
                v("d", "d1", 1, ValueType::Value),
            ],
            vec![],
        ));

        let levels = vec![
            MergingIterLevel::new(Box::new(run.iter()))
                .with_tombstones(Box::new(run.tombstone_iter().unwrap())),
            MergingIterLevel::new(Box::new(older.iter())),
        ];
        let mut stream = MvccStream::new(MergingIter::new(levels));

        assert_eq!(vec![kv("a", "a1"), kv("d", "d1")], forward(&mut stream));
        assert_eq!(vec![kv("d", "d1"), kv("a", "a1")], backward(&mut stream));

        Ok(())
    }

    #[test]
    fn mvcc_stream_bounds() -> crate::Result<()> {
        let mut stream = stream(
            vec![vec![
                v("a", "a1", 1, ValueType::Value),
                v("b", "b1", 1, ValueType::Value),
                v("c", "c1", 1, ValueType::Value),
            ]],
            SeqNo::MAX,
        );

        stream.set_bounds(Some("b".into()), None);
        assert_eq!(vec![kv("b", "b1"), kv("c", "c1")], forward(&mut stream));

        Ok(())
    }
}
