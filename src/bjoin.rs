//! BJOIN: a compact cross-product bitmap representing the result of a join
//! between two item spaces A and B.
//!
//! The result lives in a single ordered bitmap over the address space
//! `a * (offset + 1) + b + 1`, where `offset` (`W`) is fixed at construction
//! and must be `>= max item id in B`. Address `a * (offset + 1)` (the `b`
//! slot `0`, shifted) is a left-outer tombstone meaning "`a` has no B
//! partner". This packs matched pairs and orphaned A items into one
//! ascending-ordered bitmap and makes grouped enumeration a single linear
//! pass.

use roaring::RoaringTreemap;

use crate::error::{Error, Result};

/// One grouped row of a [`Bjoin`]: item `a` of A and all of its B partners
/// (empty for a tombstone-only row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub a: u64,
    pub b: Vec<u64>,
}

/// A cross-product bitmap over A x B.
#[derive(Debug, Clone)]
pub struct Bjoin {
    cp: RoaringTreemap,
    offset: u64,
}

impl Bjoin {
    /// Creates an empty matrix. `offset` must be `>= max item id in B`.
    pub fn new(offset: u64) -> Self {
        Self {
            cp: RoaringTreemap::new(),
            offset,
        }
    }

    /// Convenience constructor: `offset = max(b) + 1`, followed by
    /// `add_pairs(a, Some(b))`.
    pub fn cross_join(a: &RoaringTreemap, b: &RoaringTreemap) -> Self {
        let offset = b.max().unwrap_or(0) + 1;
        let mut join = Self::new(offset);
        join.add_pairs(a, Some(b));
        join
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.cp.is_empty()
    }

    pub fn len(&self) -> u64 {
        self.cp.len()
    }

    fn idx_a(&self, a: u64) -> u64 {
        a * (self.offset + 1)
    }

    fn idx(&self, a: u64, b: u64) -> u64 {
        a * (self.offset + 1) + b + 1
    }

    /// Replaces every entry under each `a` in `a` with either a tombstone
    /// (if `b` is `None` or empty) or one pair address per `b_id < offset`
    /// in `b`.
    pub fn add_pairs(&mut self, a: &RoaringTreemap, b: Option<&RoaringTreemap>) {
        for a_val in a.iter() {
            let start = self.idx_a(a_val);
            // Clear the whole per-`a` span (tombstone slot plus every
            // `b`-slot) before writing the new entries for this `a`.
            self.cp.remove_range(start..=start + self.offset);
            match b {
                None => {
                    self.cp.insert(start);
                }
                Some(b) if b.is_empty() => {
                    self.cp.insert(start);
                }
                Some(b) => {
                    for b_val in b.iter() {
                        if b_val < self.offset {
                            self.cp.insert(self.idx(a_val, b_val));
                        }
                    }
                }
            }
        }
    }

    fn check_offsets(&self, other: &Bjoin) -> Result<()> {
        if self.offset != other.offset {
            return Err(Error::DifferentOffset {
                left: self.offset,
                right: other.offset,
            });
        }
        Ok(())
    }

    pub fn and(&mut self, other: &Bjoin) -> Result<()> {
        self.check_offsets(other)?;
        self.cp &= &other.cp;
        Ok(())
    }

    pub fn or(&mut self, other: &Bjoin) -> Result<()> {
        self.check_offsets(other)?;
        self.cp |= &other.cp;
        Ok(())
    }

    pub fn and_not(&mut self, other: &Bjoin) -> Result<()> {
        self.check_offsets(other)?;
        self.cp -= &other.cp;
        Ok(())
    }

    /// Lazy grouped iteration of `(a, [b...])` rows, in ascending `(a, b)`
    /// order. `cancel` is polled before every produced element; once it
    /// returns `true` the iterator finishes after at most one more element.
    pub fn pairs<C: Fn() -> bool>(&self, cancel: C) -> PairsIter<'_, C> {
        PairsIter {
            inner: Box::new(self.cp.iter()),
            offset: self.offset,
            cancel,
            pending: None,
            done: false,
        }
    }

    /// Lazy enumeration of the `a` values that carry only a tombstone (no
    /// B partner).
    pub fn singles<C: Fn() -> bool>(&self, cancel: C) -> SinglesIter<'_, C> {
        SinglesIter {
            inner: Box::new(self.cp.iter()),
            offset: self.offset,
            cancel,
        }
    }

    /// Ungrouped `(a, raw_b)` view; `raw_b == 0` means tombstone, `raw_b >
    /// 0` means the real b id is `raw_b - 1`.
    pub fn ab_pairs<C: Fn() -> bool>(&self, cancel: C) -> AbIter<'_, C> {
        AbIter {
            inner: Box::new(self.cp.iter()),
            offset: self.offset,
            cancel,
        }
    }
}

pub struct PairsIter<'a, C: Fn() -> bool> {
    inner: Box<dyn Iterator<Item = u64> + 'a>,
    offset: u64,
    cancel: C,
    pending: Option<(u64, Vec<u64>)>,
    done: bool,
}

impl<'a, C: Fn() -> bool> Iterator for PairsIter<'a, C> {
    type Item = Pair;

    fn next(&mut self) -> Option<Pair> {
        if self.done {
            return None;
        }
        loop {
            if (self.cancel)() {
                self.done = true;
                return self.pending.take().map(|(a, b)| Pair { a, b });
            }
            match self.inner.next() {
                Some(addr) => {
                    let a = addr / (self.offset + 1);
                    let rem = addr % (self.offset + 1);
                    match &mut self.pending {
                        Some((pa, bs)) if *pa == a => {
                            if rem != 0 {
                                bs.push(rem - 1);
                            }
                        }
                        Some(_) => {
                            let finished = self.pending.take().unwrap();
                            self.pending =
                                Some((a, if rem != 0 { vec![rem - 1] } else { Vec::new() }));
                            return Some(Pair {
                                a: finished.0,
                                b: finished.1,
                            });
                        }
                        None => {
                            self.pending =
                                Some((a, if rem != 0 { vec![rem - 1] } else { Vec::new() }));
                        }
                    }
                }
                None => {
                    self.done = true;
                    return self.pending.take().map(|(a, b)| Pair { a, b });
                }
            }
        }
    }
}

pub struct SinglesIter<'a, C: Fn() -> bool> {
    inner: Box<dyn Iterator<Item = u64> + 'a>,
    offset: u64,
    cancel: C,
}

impl<'a, C: Fn() -> bool> Iterator for SinglesIter<'a, C> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if (self.cancel)() {
                return None;
            }
            let addr = self.inner.next()?;
            let rem = addr % (self.offset + 1);
            if rem == 0 {
                return Some(addr / (self.offset + 1));
            }
        }
    }
}

pub struct AbIter<'a, C: Fn() -> bool> {
    inner: Box<dyn Iterator<Item = u64> + 'a>,
    offset: u64,
    cancel: C,
}

impl<'a, C: Fn() -> bool> Iterator for AbIter<'a, C> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        if (self.cancel)() {
            return None;
        }
        let addr = self.inner.next()?;
        Some((addr / (self.offset + 1), addr % (self.offset + 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(vals: impl IntoIterator<Item = u64>) -> RoaringTreemap {
        vals.into_iter().collect()
    }

    #[test]
    fn s1_tombstones_only() {
        let a = bitmap(0..=5);
        let mut join = Bjoin::new(11);
        join.add_pairs(&a, None);
        let raw: Vec<u64> = join_raw(&join);
        assert_eq!(raw, vec![0, 12, 24, 36, 48, 60]);

        let mut i = 0u64;
        for pair in join.pairs(|| false) {
            assert_eq!(pair.a, i);
            assert!(pair.b.is_empty());
            i += 1;
        }
        assert_eq!(i, 6);
    }

    #[test]
    fn s2_full_cross_product() {
        let a = bitmap(0..=5);
        let b = bitmap(0..=5);
        let mut join = Bjoin::new(11);
        join.add_pairs(&a, Some(&b));
        let raw = join_raw(&join);
        let want: Vec<u64> = vec![
            1, 2, 3, 4, 5, 6, 13, 14, 15, 16, 17, 18, 25, 26, 27, 28, 29, 30, 37, 38, 39, 40, 41,
            42, 49, 50, 51, 52, 53, 54, 61, 62, 63, 64, 65, 66,
        ];
        assert_eq!(raw, want);

        let mut i = 0u64;
        for pair in join.pairs(|| false) {
            assert_eq!(pair.a, i);
            assert_eq!(pair.b, vec![0, 1, 2, 3, 4, 5]);
            i += 1;
        }
        assert_eq!(i, 6);
    }

    #[test]
    fn add_pairs_overwrites_previous_entries_for_a() {
        let a = bitmap(0..=5);
        let b = bitmap(0..=5);
        let mut join = Bjoin::new(11);
        join.add_pairs(&a, Some(&b));
        join.add_pairs(&a, None);
        let raw = join_raw(&join);
        assert_eq!(raw, vec![0, 12, 24, 36, 48, 60]);
    }

    #[test]
    fn singles_finds_tombstone_only_rows() {
        let mut join = Bjoin::new(11);
        let first = bitmap(6..=10);
        join.add_pairs(&first, None);
        let second_a = bitmap(11..=15);
        let second_b = bitmap(6..=10);
        join.add_pairs(&second_a, Some(&second_b));
        let singles: Vec<u64> = join.singles(|| false).collect();
        assert_eq!(singles, vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn mismatched_offsets_error() {
        let mut x = Bjoin::new(11);
        let y = Bjoin::new(12);
        assert!(matches!(
            x.and(&y),
            Err(Error::DifferentOffset {
                left: 11,
                right: 12
            })
        ));
    }

    fn join_raw(join: &Bjoin) -> Vec<u64> {
        join.cp.iter().collect()
    }
}
