//! Pure bit manipulation on the 64-bit H3 cell word.
//!
//! The layout matches `h3o::CellIndex` exactly (mode, resolution, base cell,
//! 15 three-bit digits), so cells can be moved between this crate's raw
//! `u64` representation and `h3o::CellIndex` with a plain `From`/`TryFrom`
//! round trip. Everything here is O(1) and total: an out-of-range resolution
//! degrades gracefully rather than panicking.

/// Sentinel digit meaning "unused at this resolution or below".
pub const UNUSED_DIGIT: u8 = 7;

const MODE_CELL: u64 = 1 << 59;
const RESOLUTION_SHIFT: u32 = 52;
const RESOLUTION_MASK: u64 = 0xf;
const BASE_CELL_SHIFT: u32 = 45;
const BASE_CELL_MASK: u64 = 0x7f;
const DIGIT_BITS: u32 = 3;
const MAX_RESOLUTION: u8 = 15;

/// Resolution of `c`, in `0..=15`.
pub fn resolution(c: u64) -> u8 {
    ((c >> RESOLUTION_SHIFT) & RESOLUTION_MASK) as u8
}

/// Base-cell number of `c`, in `0..=121`.
pub fn base_cell(c: u64) -> u8 {
    ((c >> BASE_CELL_SHIFT) & BASE_CELL_MASK) as u8
}

/// Digit of `c` at resolution `r` (`1..=15`), in `0..=6`, or [`UNUSED_DIGIT`]
/// for any `r` outside that range.
pub fn digit(c: u64, r: u8) -> u8 {
    if r == 0 || r > MAX_RESOLUTION {
        return UNUSED_DIGIT;
    }
    let shift = BASE_CELL_SHIFT - DIGIT_BITS * r as u32;
    ((c >> shift) & 0x7) as u8
}

/// Parent of `c` at resolution `r`: overwrite the resolution field with `r`
/// and set every digit below `r` to [`UNUSED_DIGIT`].
///
/// `r` must be in `0..=15`; callers are expected to pass a resolution
/// obtained from this module, not an arbitrary integer.
pub fn parent(c: u64, r: u8) -> u64 {
    if r > MAX_RESOLUTION {
        return 0;
    }
    let cleared = (c & !(RESOLUTION_MASK << RESOLUTION_SHIFT)) | ((r as u64) << RESOLUTION_SHIFT);
    let trailing_bits = (MAX_RESOLUTION - r) as u32 * DIGIT_BITS;
    cleared | (1u64.checked_shl(trailing_bits).unwrap_or(0).wrapping_sub(1))
}

/// Builds a cell from a base-cell number and its digits (resolution 1 first).
/// Digits past the given slice default to [`UNUSED_DIGIT`]; the resulting
/// resolution is the count of non-sentinel digits supplied.
pub fn build(base: u8, digits: &[u8]) -> u64 {
    let mut res: u8 = 0;
    let mut bits: u64 = 0;
    for r in 1..=MAX_RESOLUTION {
        let d = digits.get((r - 1) as usize).copied().unwrap_or(UNUSED_DIGIT);
        if d != UNUSED_DIGIT {
            res = r;
        }
        let shift = BASE_CELL_SHIFT - DIGIT_BITS * r as u32;
        bits |= (d as u64) << shift;
    }
    MODE_CELL
        | ((res as u64) << RESOLUTION_SHIFT)
        | ((base as u64 & BASE_CELL_MASK) << BASE_CELL_SHIFT)
        | bits
}

/// Deepest common ancestor of `c1` and `c2`. If either is the zero cell, the
/// other is returned unchanged.
pub fn common_ancestor(c1: u64, c2: u64) -> u64 {
    if c1 == 0 {
        return c2;
    }
    if c2 == 0 {
        return c1;
    }
    let min_res = resolution(c1).min(resolution(c2));
    for r in (1..=min_res).rev() {
        if parent(c1, r) == parent(c2, r) {
            return parent(c1, r);
        }
    }
    0
}

/// True if `c1` and `c2` share a common ancestor at `min(resolution(c1),
/// resolution(c2))` — i.e. one is a descendant of (or equal to) the other.
pub fn is_descendant(c1: u64, c2: u64) -> bool {
    if c1 == c2 {
        return true;
    }
    let r = resolution(c1).min(resolution(c2));
    parent(c1, r) == parent(c2, r)
}

/// Compacts a cell set: repeatedly replaces all 7 children of a cell with
/// their parent, from the deepest resolution present up to base cells.
///
/// This is the cell-word equivalent of H3's `compactCells`, expressed
/// directly over this module's codec rather than over an external H3
/// library call, since the address arithmetic needed (parent/digit) is
/// already owned by this module.
pub fn compact(cells: &[u64]) -> Vec<u64> {
    let mut current: Vec<u64> = cells.to_vec();
    current.sort_unstable();
    current.dedup();

    loop {
        let deepest = current.iter().map(|&c| resolution(c)).max().unwrap_or(0);
        if deepest == 0 {
            break;
        }

        let mut groups: std::collections::HashMap<u64, Vec<(u8, u64)>> =
            std::collections::HashMap::new();
        let mut next = Vec::with_capacity(current.len());
        for &c in &current {
            if resolution(c) == deepest {
                let p = parent(c, deepest - 1);
                groups.entry(p).or_default().push((digit(c, deepest), c));
            } else {
                next.push(c);
            }
        }

        let mut merged_any = false;
        for (p, mut children) in groups {
            children.sort_unstable();
            children.dedup_by_key(|(d, _)| *d);
            if children.len() == 7 && children.iter().enumerate().all(|(i, (d, _))| *d == i as u8)
            {
                next.push(p);
                merged_any = true;
            } else {
                next.extend(children.into_iter().map(|(_, c)| c));
            }
        }

        current = next;
        current.sort_unstable();
        current.dedup();
        if !merged_any {
            break;
        }
    }
    current
}
