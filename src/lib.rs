//! A spatial index for 2-D geometries built on a hierarchical hexagonal
//! (H3) bitmap.
//!
//! The core engineering lives one level down, in [`h3b`] (the
//! level-decomposed bitmap index) and [`bjoin`]/[`join`] (the
//! set-operation engine). This module is the facade: it stores caller
//! geometries behind an [`adapters::Adapter`], keeps one shared [`h3b`]
//! bitmap for fast screening, and falls back to `geo`'s exact predicates to
//! confirm a hit.

pub mod error;

mod adapters;
mod bjoin;
mod cell;
mod geom;
mod h3b;
mod join;

pub use adapters::{Adapter, BoundAdapter, RasterizedAdapter};
pub use bjoin::{Bjoin, Pair};
pub use error::{Error, Result};
pub use h3b::{BitmapIndex, ItemId};

use geo_types::Geometry;
use h3o::Resolution;
use intmap::IntMap;

/// How a [`SpatialIndex`] turns a stored geometry into the cells it seeds
/// into the shared [`BitmapIndex`] (§4.7).
type AdapterFactory = Box<dyn Fn(&Geometry<f64>, Resolution, bool) -> Result<Adapter> + Send + Sync>;

fn bound_factory() -> AdapterFactory {
    Box::new(|geometry, res, mercator| {
        Ok(Adapter::Bound(BoundAdapter::new(
            geometry.clone(),
            res,
            mercator,
        )?))
    })
}

fn rasterized_factory(compact: bool) -> AdapterFactory {
    Box::new(move |geometry, res, _mercator| {
        Ok(Adapter::Rasterized(RasterizedAdapter::new(
            geometry, res, compact,
        )?))
    })
}

/// Construction options for a [`SpatialIndex`] (§4.6).
///
/// `res` defaults to `Resolution::Fifteen`, the deepest H3 resolution, and
/// the default adapter is the *bound* one (§4.7): cheap to build, exact on
/// confirmation, coarse on first screening.
pub struct Options {
    res: Resolution,
    mercator: bool,
    factory: AdapterFactory,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            res: Resolution::Fifteen,
            mercator: false,
            factory: bound_factory(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared maximum resolution of the index, `1..=15`.
    pub fn max_resolution(mut self, res: Resolution) -> Self {
        self.res = res;
        self
    }

    /// Geometries passed to [`SpatialIndex::insert`] are in Web Mercator
    /// rather than WGS84. Only affects the bound adapter's cross-projection
    /// predicates (§4.7); cell coverage always works in lat/lng.
    pub fn mercator_projection(mut self) -> Self {
        self.mercator = true;
        self
    }

    /// Switches the default adapter to *rasterized*: every item gets its
    /// own full H3 covering at `res`, optionally compacted.
    pub fn indexed_items(mut self, compact: bool) -> Self {
        self.factory = rasterized_factory(compact);
        self
    }

    /// Supplies a custom adapter factory, bypassing the bound/rasterized
    /// choice above entirely.
    pub fn custom_indexed_items<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Geometry<f64>, Resolution, bool) -> Result<Adapter> + Send + Sync + 'static,
    {
        self.factory = Box::new(factory);
        self
    }
}

/// A spatial index over caller-supplied geometries, tagged by
/// caller-supplied `u64` ids (§3.4).
///
/// Ids need not be unique; inserting an id that already exists rewrites
/// its previous entry. There is no enforced relationship between ids and
/// insertion order.
pub struct SpatialIndex {
    res: Resolution,
    mercator: bool,
    factory: AdapterFactory,
    items: IntMap<ItemId, Adapter>,
    bitmap: BitmapIndex,
}

impl SpatialIndex {
    pub fn new(options: Options) -> Self {
        Self {
            res: options.res,
            mercator: options.mercator,
            factory: options.factory,
            items: IntMap::new(),
            bitmap: BitmapIndex::new(u8::from(options.res)),
        }
    }

    pub fn res(&self) -> Resolution {
        self.res
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Builds an adapter for `geometry` without storing it, using this
    /// index's configured factory. Used both by [`Self::insert`] and to
    /// represent an ephemeral probe geometry for [`Self::contains_in_items`]
    /// / [`Self::intersection_with`].
    fn build_adapter(&self, geometry: &Geometry<f64>) -> Result<Adapter> {
        (self.factory)(geometry, self.res, self.mercator)
    }

    /// Indexes `geometry` under `id`, replacing any prior entry for that
    /// id.
    pub fn insert(&mut self, id: ItemId, geometry: Geometry<f64>) -> Result<()> {
        self.remove(id);
        let adapter = self.build_adapter(&geometry)?;
        for &cell in adapter.seed_cells() {
            self.bitmap.insert(id, cell);
        }
        self.items.insert(id, adapter);
        Ok(())
    }

    /// Removes `id`'s geometry and its bitmap entries. A no-op if `id`
    /// isn't present.
    pub fn remove(&mut self, id: ItemId) {
        if self.items.remove(id).is_some() {
            self.bitmap.remove(id);
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Items whose geometry is entirely contained within `probe`: a
    /// bitmap screen via [`BitmapIndex::contains_in_items`] followed by an
    /// exact [`Adapter::contains_in`] confirmation per candidate (§4.6).
    pub fn contains_in_items(&self, probe: &Geometry<f64>) -> Result<Vec<ItemId>> {
        let probe_adapter = self.build_adapter(probe)?;
        let probe_cells = probe_adapter.indexed_cells();
        let candidates = self.bitmap.contains_in_items(&probe_cells);
        let mut out = Vec::new();
        for id in candidates.iter() {
            let Some(item) = self.items.get(id) else {
                continue;
            };
            if item.contains_in(&probe_adapter) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Items whose geometry intersects `probe`: a bitmap screen via
    /// [`BitmapIndex::intersection`] followed by an exact
    /// [`Adapter::intersects`] confirmation per candidate (§4.6).
    pub fn intersection_with(&self, probe: &Geometry<f64>) -> Result<Vec<ItemId>> {
        let probe_adapter = self.build_adapter(probe)?;
        let probe_cells = probe_adapter.indexed_cells();
        let candidates = self.bitmap.intersection(&probe_cells);
        let mut out = Vec::new();
        for id in candidates.iter() {
            let Some(item) = self.items.get(id) else {
                continue;
            };
            if item.intersects(&probe_adapter) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Joins this index against `other` by intersection, delegating to
    /// [`join::join_intersects`] on the two underlying bitmaps (§4.5).
    /// With `left_outer`, every item of `self` that intersects nothing in
    /// `other` gets a tombstone row instead of being dropped.
    pub fn join_intersects(&self, other: &SpatialIndex, left_outer: bool) -> Bjoin {
        join::join_intersects(&self.bitmap, &other.bitmap, left_outer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ])
    }

    #[test]
    fn insert_then_remove_forgets_the_item() {
        let mut index = SpatialIndex::new(Options::new());
        index.insert(0, square(2.30, 48.85, 2.40, 48.90)).unwrap();
        assert!(index.contains(0));
        index.remove(0);
        assert!(!index.contains(0));
        assert_eq!(index.bitmap.item_cells(0), Vec::<u64>::new());
    }

    #[test]
    fn insert_rewrites_prior_entry_for_same_id() {
        let mut index = SpatialIndex::new(Options::new());
        index.insert(0, square(0.0, 0.0, 1.0, 1.0)).unwrap();
        index.insert(0, square(10.0, 10.0, 11.0, 11.0)).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index
            .intersection_with(&square(10.2, 10.2, 10.8, 10.8))
            .unwrap();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn intersection_with_screens_then_confirms() {
        let mut index = SpatialIndex::new(Options::new());
        index.insert(0, square(2.30, 48.85, 2.40, 48.90)).unwrap();
        index.insert(1, square(10.0, 10.0, 11.0, 11.0)).unwrap();
        let hits = index
            .intersection_with(&square(2.35, 48.87, 2.45, 48.92))
            .unwrap();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn contains_in_items_finds_only_fully_enclosed_items() {
        let mut index = SpatialIndex::new(Options::new().indexed_items(false));
        index
            .insert(0, square(2.35, 48.87, 2.36, 48.88))
            .unwrap();
        index
            .insert(1, square(2.20, 48.70, 2.50, 49.00))
            .unwrap();
        let hits = index
            .contains_in_items(&square(2.30, 48.85, 2.40, 48.90))
            .unwrap();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn join_intersects_pairs_overlapping_indexes() {
        let mut a = SpatialIndex::new(Options::new().indexed_items(false));
        a.insert(0, square(2.30, 48.85, 2.40, 48.90)).unwrap();
        let mut b = SpatialIndex::new(Options::new().indexed_items(false));
        b.insert(0, square(2.35, 48.87, 2.45, 48.92)).unwrap();
        b.insert(1, square(10.0, 10.0, 11.0, 11.0)).unwrap();

        let join = a.join_intersects(&b, true);
        let pairs: Vec<_> = join.pairs(|| false).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].a, 0);
        assert_eq!(pairs[0].b, vec![0]);
    }
}
