//! Parallel iteration over two sorted maps, keyed in lockstep.
//!
//! This is the reusable building block the design notes call out: the scalar merge
//! (§4.4 phase 2), the lifecycle phase (§4.4 phase 1), the roster-delta construction
//! (§4.6), and attribute-cell merging all walk two `BTreeMap`s side by side and need
//! to know, at each step, whether the current key is present on the left only, the
//! right only, or both.

use std::collections::BTreeMap;
use std::iter::Peekable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side<L, R> {
    Left(L),
    Right(R),
    Both(L, R),
}

/// advances two `BTreeMap` iterators in key order, yielding one [`Side`] per distinct key.
pub struct ParallelIter<'a, K, VL, VR> {
    left: Peekable<std::collections::btree_map::Iter<'a, K, VL>>,
    right: Peekable<std::collections::btree_map::Iter<'a, K, VR>>,
}

impl<'a, K: Ord, VL, VR> ParallelIter<'a, K, VL, VR> {
    pub fn new(left: &'a BTreeMap<K, VL>, right: &'a BTreeMap<K, VR>) -> Self {
        Self { left: left.iter().peekable(), right: right.iter().peekable() }
    }
}

impl<'a, K: Ord, VL, VR> Iterator for ParallelIter<'a, K, VL, VR> {
    type Item = (&'a K, Side<&'a VL, &'a VR>);

    fn next(&mut self) -> Option<Self::Item> {
        match (self.left.peek(), self.right.peek()) {
            (None, None) => None,
            (Some(_), None) => {
                let (k, v) = self.left.next().unwrap();
                Some((k, Side::Left(v)))
            }
            (None, Some(_)) => {
                let (k, v) = self.right.next().unwrap();
                Some((k, Side::Right(v)))
            }
            (Some((lk, _)), Some((rk, _))) => match lk.cmp(rk) {
                std::cmp::Ordering::Less => {
                    let (k, v) = self.left.next().unwrap();
                    Some((k, Side::Left(v)))
                }
                std::cmp::Ordering::Greater => {
                    let (k, v) = self.right.next().unwrap();
                    Some((k, Side::Right(v)))
                }
                std::cmp::Ordering::Equal => {
                    let (k, lv) = self.left.next().unwrap();
                    let (_, rv) = self.right.next().unwrap();
                    Some((k, Side::Both(lv, rv)))
                }
            },
        }
    }
}

pub fn parallel_iter<'a, K: Ord, VL, VR>(
    left: &'a BTreeMap<K, VL>,
    right: &'a BTreeMap<K, VR>,
) -> ParallelIter<'a, K, VL, VR> {
    ParallelIter::new(left, right)
}
