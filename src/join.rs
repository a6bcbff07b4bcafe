//! The join engine: level-synchronous traversal of two [`BitmapIndex`]es.
//!
//! `check_intersection` and `check_contains_in` are short-circuiting
//! predicates; `join_intersects` materializes every matching pair (and,
//! optionally, left-outer tombstones) into a [`Bjoin`] matrix.

use roaring::RoaringTreemap;

use crate::bjoin::Bjoin;
use crate::h3b::BitmapIndex;

const FULL_DIGIT: usize = 7;

fn intersect(a: &RoaringTreemap, b: &RoaringTreemap) -> RoaringTreemap {
    let mut out = a.clone();
    out &= b;
    out
}

/// Do `a` and `b` share any cell at any resolution?
pub fn check_intersection(a: &BitmapIndex, b: &BitmapIndex) -> bool {
    let shared_bases = intersect(a.base_cells_mask(), b.base_cells_mask());
    let levels = a.res().min(b.res()) as usize;

    for bn in shared_bases.iter() {
        let Some(base_a0) = a.base_cell_bitmap(bn as u8) else {
            continue;
        };
        let Some(base_b0) = b.base_cell_bitmap(bn as u8) else {
            continue;
        };
        let mut base_a = base_a0.clone();
        let mut base_b = base_b0.clone();

        for r in 0..levels {
            let mut res_a = RoaringTreemap::new();
            let mut res_b = RoaringTreemap::new();
            let mut all_a = false;
            let mut all_b = false;

            for cn in (0..=FULL_DIGIT).rev() {
                let cma = a
                    .res_map(r, cn)
                    .map(|bm| intersect(bm, &base_a))
                    .unwrap_or_default();
                let cmb = b
                    .res_map(r, cn)
                    .map(|bm| intersect(bm, &base_b))
                    .unwrap_or_default();

                if cn == FULL_DIGIT {
                    all_a = !cma.is_empty();
                    all_b = !cmb.is_empty();
                    continue;
                }

                if (all_a && !cmb.is_empty()) || (all_b && !cma.is_empty()) {
                    return true;
                }
                res_a |= &cma;
                res_b |= &cmb;
            }

            if res_a.is_empty() || res_b.is_empty() {
                break;
            }
            base_a = res_a;
            base_b = res_b;
        }
    }
    false
}

/// Is every item of `a` contained in some item of `b`?
pub fn check_contains_in(a: &BitmapIndex, b: &BitmapIndex) -> bool {
    let bases_a = a.base_cells_mask();
    let bases_b = b.base_cells_mask();
    if !bases_a.iter().all(|bn| bases_b.contains(bn)) {
        return false;
    }
    let levels = a.res().min(b.res()) as usize;

    'bases: for bn in bases_a.iter() {
        let Some(base_a0) = a.base_cell_bitmap(bn as u8) else {
            continue;
        };
        if base_a0.is_empty() {
            continue;
        }
        let Some(base_b0) = b.base_cell_bitmap(bn as u8) else {
            return false;
        };
        if base_b0.is_empty() {
            return false;
        }
        let mut base_a = base_a0.clone();
        let mut base_b = base_b0.clone();

        for r in 0..levels {
            if base_a.is_empty() {
                continue 'bases;
            }

            // Digit 7 is checked first, exactly like `check_intersection`'s
            // `FULL_DIGIT`-down-to-`0` order: a B item terminating here
            // covers every A item still live at this level, so `all_b` must
            // be known before the per-digit loop can decide a false.
            let full_b = b
                .res_map(r, FULL_DIGIT)
                .map(|bm| intersect(bm, &base_b))
                .unwrap_or_default();
            let all_b = !full_b.is_empty();
            if all_b {
                // B has a coarser ancestor than whatever A still has left;
                // containment for this base cell is settled.
                continue 'bases;
            }

            // A terminating here while B is still real (not caught above)
            // means these A items are coarser than B at this level: they
            // can't be a subset of B's still-finer cell.
            let full_a = a
                .res_map(r, FULL_DIGIT)
                .map(|bm| intersect(bm, &base_a))
                .unwrap_or_default();
            if !full_a.is_empty() {
                return false;
            }

            let mut res_a = RoaringTreemap::new();
            let mut res_b = RoaringTreemap::new();
            for cn in 0..FULL_DIGIT {
                let cma = a
                    .res_map(r, cn)
                    .map(|bm| intersect(bm, &base_a))
                    .unwrap_or_default();
                let cmb = b
                    .res_map(r, cn)
                    .map(|bm| intersect(bm, &base_b))
                    .unwrap_or_default();
                if !cma.is_empty() && cmb.is_empty() {
                    return false;
                }
                res_a |= &cma;
                res_b |= &cmb;
            }

            if res_a.is_empty() && res_b.is_empty() {
                continue 'bases;
            }
            base_a = res_a;
            base_b = res_b;
        }
    }
    true
}

/// Emits `(a, b)` into a [`Bjoin`] for every pair whose cells share an
/// ancestor at or below the shared resolution. With `left_outer`, every `a`
/// that never intersects any `b` gets a tombstone row instead.
pub fn join_intersects(a: &BitmapIndex, b: &BitmapIndex, left_outer: bool) -> Bjoin {
    let offset = b.max_item_index() + 1;
    let mut join = Bjoin::new(offset);
    let shared_bases = intersect(a.base_cells_mask(), b.base_cells_mask());
    let levels = a.res().min(b.res()) as usize;
    let mut intersects_a = RoaringTreemap::new();
    let mut no_intersects_a = RoaringTreemap::new();

    for bn in shared_bases.iter() {
        let Some(base_a0) = a.base_cell_bitmap(bn as u8) else {
            continue;
        };
        let Some(base_b0) = b.base_cell_bitmap(bn as u8) else {
            continue;
        };
        let mut base_a = base_a0.clone();
        let mut base_b = base_b0.clone();

        for r in 0..levels {
            if base_a.is_empty() || base_b.is_empty() {
                break;
            }
            let full_a = a
                .res_map(r, FULL_DIGIT)
                .map(|bm| intersect(bm, &base_a))
                .unwrap_or_default();
            let full_b = b
                .res_map(r, FULL_DIGIT)
                .map(|bm| intersect(bm, &base_b))
                .unwrap_or_default();
            let mut res_a = RoaringTreemap::new();
            let mut res_b = RoaringTreemap::new();
            for cn in 0..FULL_DIGIT {
                if let Some(bm) = a.res_map(r, cn) {
                    res_a |= &intersect(bm, &base_a);
                }
                if let Some(bm) = b.res_map(r, cn) {
                    res_b |= &intersect(bm, &base_b);
                }
            }

            if !full_a.is_empty() && (!full_b.is_empty() || !res_b.is_empty()) {
                if !full_b.is_empty() {
                    join.add_pairs(&full_a, Some(&full_b));
                }
                if !res_b.is_empty() {
                    join.add_pairs(&full_a, Some(&res_b));
                }
                intersects_a |= &full_a;
            }
            if !full_b.is_empty() && !res_a.is_empty() {
                join.add_pairs(&res_a, Some(&full_b));
                intersects_a |= &res_a;
            }

            if left_outer {
                let mut a_only = full_a.clone();
                a_only |= &res_a;
                if full_b.is_empty() && res_b.is_empty() {
                    no_intersects_a |= &a_only;
                }
            }

            base_a = res_a;
            base_b = res_b;
        }
    }

    if left_outer {
        let mut orphans = RoaringTreemap::new();
        for bn in a.base_cells_mask().iter() {
            if !b.base_cells_mask().contains(bn) {
                if let Some(bm) = a.base_cell_bitmap(bn as u8) {
                    orphans |= bm;
                }
            }
        }
        orphans |= &no_intersects_a;
        orphans -= &intersects_a;
        join.add_pairs(&orphans, None);
    }

    join
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seven_siblings() -> BitmapIndex {
        let mut idx = BitmapIndex::new(15);
        let cells: [u64; 7] = [
            0x851205a3fffffff,
            0x851205a7fffffff,
            0x851205abfffffff,
            0x851205affffffff,
            0x851205b3fffffff,
            0x851205b7fffffff,
            0x851205bbfffffff,
        ];
        for (i, &c) in cells.iter().enumerate() {
            idx.insert(i as u64, c);
        }
        idx
    }

    #[test]
    fn s4_join_intersects_singleton_ancestor() {
        let a = seven_siblings();
        let mut b = BitmapIndex::new(15);
        b.insert(0, 0x831205fffffffff);
        b.insert(1, 0x842aac1ffffffff);

        let join = join_intersects(&a, &b, false);
        let pairs: Vec<_> = join.pairs(|| false).collect();
        assert_eq!(pairs.len(), 7);
        for (i, pair) in pairs.iter().enumerate() {
            assert_eq!(pair.a, i as u64);
            assert_eq!(pair.b, vec![0]);
        }
    }

    #[test]
    fn self_join_contains_every_item_paired_with_itself() {
        let idx = seven_siblings();
        let join = join_intersects(&idx, &idx, false);
        for i in 0..7u64 {
            let row = join.pairs(|| false).find(|p| p.a == i).unwrap();
            assert!(row.b.contains(&i));
        }
    }

    #[test]
    fn check_intersection_is_symmetric() {
        let a = seven_siblings();
        let mut b = BitmapIndex::new(15);
        b.insert(0, 0x831205fffffffff);
        assert_eq!(check_intersection(&a, &b), check_intersection(&b, &a));
        assert!(check_intersection(&a, &b));
    }

    #[test]
    fn check_contains_in_reflexive_and_implies_intersection() {
        let a = seven_siblings();
        assert!(check_contains_in(&a, &a));
        let mut disjoint = BitmapIndex::new(15);
        disjoint.insert(0, 0x842aac1ffffffff);
        assert!(!check_contains_in(&a, &disjoint));
    }

    #[test]
    fn check_contains_in_holds_across_resolutions() {
        // A's single item is a fine (res 5) cell whose ancestor at res 3 is
        // exactly B's single (coarser) item: A is contained in B even though
        // B terminates (digit 7) several levels above where A does.
        let mut a = BitmapIndex::new(15);
        a.insert(0, 0x851205a3fffffff);
        let mut b = BitmapIndex::new(15);
        b.insert(0, 0x831205fffffffff);
        assert!(check_contains_in(&a, &b));
        assert!(!check_contains_in(&b, &a));
    }
}
