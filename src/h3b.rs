//! H3B: a level-decomposed bitmap index from item id to occupied cells.
//!
//! Every cell ever inserted is decomposed into (base cell, resolution,
//! digit) coordinates and scattered into a table of bitmaps, so that any
//! probe cell can be matched against the index by walking at most
//! `resolution(probe)` levels — never by enumerating descendants.

use roaring::RoaringTreemap;

use crate::cell;

pub type ItemId = u64;

const BASE_CELL_COUNT: usize = 122;
const MAX_LEVELS: usize = 15;
const DIGIT_SLOTS: usize = 8;
const FULL_DIGIT: usize = cell::UNUSED_DIGIT as usize;

/// A level-decomposed bitmap index.
///
/// See `SPEC_FULL.md` §3.2/§4.2 for the full invariants this type
/// maintains.
#[derive(Debug, Clone)]
pub struct BitmapIndex {
    pub(crate) res: u8,
    pub(crate) min_res: u8,
    pub(crate) max_item_index: u64,
    pub(crate) base_cells_mask: RoaringTreemap,
    pub(crate) base_cell_map: [Option<RoaringTreemap>; BASE_CELL_COUNT],
    pub(crate) res_maps: [[Option<RoaringTreemap>; DIGIT_SLOTS]; MAX_LEVELS],
}

impl BitmapIndex {
    /// Creates an empty index with a declared maximum resolution (`1..=15`).
    pub fn new(res: u8) -> Self {
        Self {
            res: res.clamp(1, 15),
            min_res: 0,
            max_item_index: 0,
            base_cells_mask: RoaringTreemap::new(),
            base_cell_map: std::array::from_fn(|_| None),
            res_maps: std::array::from_fn(|_| std::array::from_fn(|_| None)),
        }
    }

    pub fn res(&self) -> u8 {
        self.res
    }

    pub fn max_item_index(&self) -> u64 {
        self.max_item_index
    }

    /// Updates `max_item_index` to `max(current, x)`. Returns `true` iff the
    /// new maximum equals `x` (i.e. `x` actually advanced the maximum, or
    /// already was it).
    pub fn set_max_item_index(&mut self, x: u64) -> bool {
        self.max_item_index = self.max_item_index.max(x);
        self.max_item_index == x
    }

    pub fn base_cells_mask(&self) -> &RoaringTreemap {
        &self.base_cells_mask
    }

    pub fn base_cells_count(&self) -> u64 {
        self.base_cells_mask.len()
    }

    pub(crate) fn base_cell_bitmap(&self, bn: u8) -> Option<&RoaringTreemap> {
        self.base_cell_map[bn as usize].as_ref()
    }

    pub(crate) fn res_map(&self, r: usize, digit: usize) -> Option<&RoaringTreemap> {
        self.res_maps[r][digit].as_ref()
    }

    /// Inserts `(id, cell)`. Idempotent: inserting the same pair twice
    /// leaves the index bit-identical to inserting it once.
    pub fn insert(&mut self, id: ItemId, cell: u64) {
        let bn = cell::base_cell(cell) as usize;
        self.base_cell_map[bn]
            .get_or_insert_with(RoaringTreemap::new)
            .insert(id);
        self.base_cells_mask.insert(bn as u64);

        let cell_res = cell::resolution(cell);
        for r in 0..self.res {
            if r + 1 > cell_res {
                self.res_maps[r as usize][FULL_DIGIT]
                    .get_or_insert_with(RoaringTreemap::new)
                    .insert(id);
                break;
            }
            let crn = cell::digit(cell, r + 1) as usize;
            self.res_maps[r as usize][crn]
                .get_or_insert_with(RoaringTreemap::new)
                .insert(id);
        }

        self.min_res = if self.min_res == 0 {
            cell_res
        } else {
            self.min_res.min(cell_res)
        };
        if self.min_res == 0 {
            self.min_res = 1;
        }
        self.set_max_item_index(id);
    }

    /// Removes `id` from every bitmap it appears in. Returns `true` iff it
    /// was present anywhere.
    pub fn remove(&mut self, id: ItemId) -> bool {
        let occupied: Vec<u64> = self.base_cells_mask.iter().collect();
        let mut removed = false;
        let mut emptied = Vec::new();
        for bn in occupied {
            if let Some(bm) = self.base_cell_map[bn as usize].as_mut() {
                if bm.remove(id) {
                    removed = true;
                    if bm.is_empty() {
                        emptied.push(bn);
                    }
                }
            }
        }
        if !removed {
            return false;
        }
        for bn in emptied {
            self.base_cell_map[bn as usize] = None;
            self.base_cells_mask.remove(bn);
        }
        for level in self.res_maps.iter_mut() {
            for slot in level.iter_mut() {
                if let Some(bm) = slot {
                    bm.remove(id);
                }
            }
        }
        true
    }

    /// Does any indexed item have a cell that equals, contains, or is
    /// contained by `probe`?
    pub fn has_cell(&self, probe: u64) -> bool {
        let bn = cell::base_cell(probe);
        let Some(base_bm) = self.base_cell_bitmap(bn) else {
            return false;
        };
        let mut base = base_bm.clone();
        let probe_res = cell::resolution(probe);
        let upper = self.res.min(probe_res);
        let mut r = self.min_res.saturating_sub(1);
        while r < upper {
            let crn = cell::digit(probe, r + 1) as usize;
            let mut layer = self
                .res_map(r as usize, crn)
                .cloned()
                .unwrap_or_default();
            if let Some(full) = self.res_map(r as usize, FULL_DIGIT) {
                layer |= full;
            }
            if layer.is_empty() {
                return false;
            }
            base &= &layer;
            if base.is_empty() {
                return false;
            }
            r += 1;
        }
        !base.is_empty()
    }

    /// Union of [`Self::has_cell`] across `cells`.
    pub fn intersects(&self, cells: &[u64]) -> bool {
        cells.iter().any(|&c| self.has_cell(c))
    }

    /// Union, as a bitmap of item ids, of the items matching any of `cells`
    /// under [`Self::has_cell`]'s semantics.
    pub fn intersection(&self, cells: &[u64]) -> RoaringTreemap {
        let mut out = RoaringTreemap::new();
        for &probe in cells {
            let bn = cell::base_cell(probe);
            let Some(base_bm) = self.base_cell_bitmap(bn) else {
                continue;
            };
            let mut base = base_bm.clone();
            let probe_res = cell::resolution(probe);
            let upper = self.res.min(probe_res);
            let mut r = self.min_res.saturating_sub(1);
            let mut hit = true;
            while r < upper {
                let crn = cell::digit(probe, r + 1) as usize;
                let mut layer = self
                    .res_map(r as usize, crn)
                    .cloned()
                    .unwrap_or_default();
                if let Some(full) = self.res_map(r as usize, FULL_DIGIT) {
                    layer |= full;
                }
                base &= &layer;
                if base.is_empty() {
                    hit = false;
                    break;
                }
                r += 1;
            }
            if hit {
                out |= &base;
            }
        }
        out
    }

    /// Ids whose cells lie within any of `cells`.
    pub fn contains_in_items(&self, cells: &[u64]) -> RoaringTreemap {
        let mut out = RoaringTreemap::new();
        for &probe in cells {
            let bn = cell::base_cell(probe);
            let Some(base_bm) = self.base_cell_bitmap(bn) else {
                continue;
            };
            let probe_res = cell::resolution(probe);
            let mut base = base_bm.clone();
            let mut full_children = RoaringTreemap::new();
            for r in 0..self.res as usize {
                if base.is_empty() {
                    break;
                }
                if (r as u8) < probe_res {
                    let crn = cell::digit(probe, r as u8 + 1) as usize;
                    let layer = self.res_map(r, crn).cloned().unwrap_or_default();
                    base &= &layer;
                } else {
                    if let Some(full) = self.res_map(r, FULL_DIGIT) {
                        let mut terminated = full.clone();
                        terminated &= &base;
                        full_children |= &terminated;
                    }
                    let mut descendants = RoaringTreemap::new();
                    for d in 0..7 {
                        if let Some(layer) = self.res_map(r, d) {
                            descendants |= layer;
                        }
                    }
                    base &= &descendants;
                }
            }
            out |= &base;
            out |= &full_children;
        }
        out
    }

    /// For each occupied base cell, the deepest common-ancestor cell
    /// containing every item indexed under that base cell.
    pub fn parent_cells(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.base_cells_mask.len() as usize);
        for bn in self.base_cells_mask.iter() {
            if let Some(cell) = self.parent_cell_for_base_cell(bn as u8) {
                out.push(cell);
            }
        }
        out
    }

    fn parent_cell_for_base_cell(&self, bn: u8) -> Option<u64> {
        let base_bm = self.base_cell_bitmap(bn)?;
        let mut live = base_bm.clone();
        let mut digits = Vec::new();
        for r in 0..self.res as usize {
            if live.is_empty() {
                break;
            }
            let full = self.res_map(r, FULL_DIGIT);
            let full_nonempty = full.is_some_and(|f| !f.clone_intersect(&live).is_empty());
            if full_nonempty {
                break;
            }
            let mut hit_digit = None;
            let mut hit_count = 0;
            for d in 0..7u8 {
                if let Some(layer) = self.res_map(r, d as usize) {
                    if !layer.clone_intersect(&live).is_empty() {
                        hit_count += 1;
                        hit_digit = Some(d);
                        if hit_count > 1 {
                            break;
                        }
                    }
                }
            }
            if hit_count != 1 {
                break;
            }
            let d = hit_digit.unwrap();
            digits.push(d);
            if let Some(layer) = self.res_map(r, d as usize) {
                live &= layer;
            }
        }
        Some(cell::build(bn, &digits))
    }

    /// All cells owned by `id`.
    pub fn item_cells(&self, id: ItemId) -> Vec<u64> {
        let mut out = Vec::new();
        for bn in self.base_cells_mask.iter() {
            let Some(base_bm) = self.base_cell_bitmap(bn as u8) else {
                continue;
            };
            if !base_bm.contains(id) {
                continue;
            }
            let mut paths: Vec<Vec<u8>> = vec![Vec::new()];
            for r in 0..self.res as usize {
                let mut next_paths = Vec::new();
                for d in 0..7u8 {
                    let Some(bm) = self.res_map(r, d as usize) else {
                        continue;
                    };
                    if !bm.contains(id) {
                        continue;
                    }
                    for path in &paths {
                        let mut extended = path.clone();
                        extended.push(d);
                        next_paths.push(extended);
                    }
                }
                if let Some(full) = self.res_map(r, FULL_DIGIT) {
                    if full.contains(id) {
                        for path in &paths {
                            out.push(cell::build(bn as u8, path));
                        }
                    }
                }
                paths = next_paths;
            }
        }
        out
    }
}

trait CloneIntersect {
    fn clone_intersect(&self, other: &RoaringTreemap) -> RoaringTreemap;
}

impl CloneIntersect for RoaringTreemap {
    fn clone_intersect(&self, other: &RoaringTreemap) -> RoaringTreemap {
        let mut c = self.clone();
        c &= other;
        c
    }
}
