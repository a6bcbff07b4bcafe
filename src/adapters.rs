//! Item adapters: two ways of approximating a stored geometry's occupied
//! cells for bitmap screening (§4.7), sharing one dispatch surface so the
//! facade never needs to know which kind backs a given id.
//!
//! A [`BoundAdapter`] keeps the exact geometry and represents it to the
//! shared H3B by 1-2 bounding-box corner cells; its predicates fall back to
//! the exact geometry engine whenever the peer is also bound. A
//! [`RasterizedAdapter`] keeps only a covering of cells (no original
//! geometry) and always answers through the bitmap join primitives in
//! [`crate::join`], trading precision for speed.

use geo_types::{
    Coord, Geometry, GeometryCollection, Line, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Point, Polygon,
};
use h3o::{LatLng, Resolution};

use crate::cell;
use crate::error::Result;
use crate::geom::cells_of;
use crate::h3b::BitmapIndex;
use crate::join;

/// The single id under which a standalone adapter's own bitmap is indexed.
/// [`RasterizedAdapter`] and the temporary bitmaps built by [`lift`] each
/// hold exactly one item, so any constant works; `0` matches the rest of
/// this crate's convention of ids starting at zero.
const SELF_ITEM: u64 = 0;

/// Mean Earth radius in meters (spherical approximation), used for the Web
/// Mercator projection applied when reconciling a bound-vs-bound predicate
/// across projections.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

fn to_mercator(c: Coord) -> Coord {
    let lat = c.y.to_radians();
    Coord {
        x: c.x.to_radians() * EARTH_RADIUS_M,
        y: (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln() * EARTH_RADIUS_M,
    }
}

fn to_wgs84(c: Coord) -> Coord {
    let y = c.y / EARTH_RADIUS_M;
    Coord {
        x: (c.x / EARTH_RADIUS_M).to_degrees(),
        y: (2.0 * y.exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}

/// Applies `f` to every coordinate of `g`, preserving geometry kind.
/// `Rect`/`Triangle` degrade to their polygon form since a projection can
/// turn an axis-aligned box into a non-axis-aligned one.
fn map_coords(g: &Geometry<f64>, f: &impl Fn(Coord) -> Coord) -> Geometry<f64> {
    match g {
        Geometry::Point(p) => Geometry::Point(Point(f(p.0))),
        Geometry::MultiPoint(mp) => {
            Geometry::MultiPoint(MultiPoint(mp.0.iter().map(|p| Point(f(p.0))).collect()))
        }
        Geometry::Line(l) => Geometry::Line(Line::new(f(l.start), f(l.end))),
        Geometry::LineString(ls) => {
            Geometry::LineString(LineString(ls.0.iter().map(|&c| f(c)).collect()))
        }
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString(
            mls.0
                .iter()
                .map(|ls| LineString(ls.0.iter().map(|&c| f(c)).collect()))
                .collect(),
        )),
        Geometry::Polygon(poly) => Geometry::Polygon(map_polygon(poly, f)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon(
            mp.0.iter().map(|poly| map_polygon(poly, f)).collect(),
        )),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.0.iter().map(|g| map_coords(g, f)).collect(),
        )),
        Geometry::Rect(r) => map_coords(&Geometry::Polygon(r.to_polygon()), f),
        Geometry::Triangle(t) => map_coords(&Geometry::Polygon(t.to_polygon()), f),
    }
}

fn map_polygon(poly: &Polygon, f: &impl Fn(Coord) -> Coord) -> Polygon {
    Polygon::new(
        LineString(poly.exterior().0.iter().map(|&c| f(c)).collect()),
        poly.interiors()
            .iter()
            .map(|ring| LineString(ring.0.iter().map(|&c| f(c)).collect()))
            .collect(),
    )
}

/// Reprojects `geometry` (currently in `from_mercator`'s frame) into
/// `to_mercator`'s frame. A no-op when the two frames already match.
fn reproject(geometry: &Geometry<f64>, from_mercator: bool, to_mercator: bool) -> Geometry<f64> {
    if from_mercator == to_mercator {
        return geometry.clone();
    }
    if to_mercator {
        map_coords(geometry, &to_mercator_coord)
    } else {
        map_coords(geometry, &to_wgs84)
    }
}

fn to_mercator_coord(c: Coord) -> Coord {
    to_mercator(c)
}

/// Cells derived from `geometry`'s lat/lng bounding box: the common ancestor
/// of the two corner cells if one exists, else both corners (§4.7). Empty
/// for a geometry with no bounding box (an empty `GeometryCollection`).
fn bound_cells(geometry: &Geometry<f64>, res: Resolution) -> Result<Vec<u64>> {
    let Some(rect) = geo::BoundingRect::bounding_rect(geometry) else {
        return Ok(Vec::new());
    };
    let min = LatLng::new(rect.min().y, rect.min().x)?.to_cell(res);
    let max = LatLng::new(rect.max().y, rect.max().x)?.to_cell(res);
    if min == max {
        return Ok(vec![u64::from(min)]);
    }
    let ancestor = cell::common_ancestor(u64::from(min), u64::from(max));
    Ok(if ancestor != 0 {
        vec![ancestor]
    } else {
        vec![u64::from(min), u64::from(max)]
    })
}

fn lift(cells: &[u64], res: u8) -> BitmapIndex {
    let mut bitmap = BitmapIndex::new(res);
    for &c in cells {
        bitmap.insert(SELF_ITEM, c);
    }
    bitmap
}

/// Approximates a geometry by 1-2 cells covering its bounding box, keeping
/// the exact geometry for precise confirmation against another bound peer.
#[derive(Debug, Clone)]
pub struct BoundAdapter {
    geometry: Geometry<f64>,
    mercator: bool,
    cells: Vec<u64>,
}

impl BoundAdapter {
    pub fn new(geometry: Geometry<f64>, res: Resolution, mercator: bool) -> Result<Self> {
        let cells = bound_cells(&geometry, res)?;
        Ok(Self {
            geometry,
            mercator,
            cells,
        })
    }
}

/// Approximates a geometry by its full H3 covering at the index resolution,
/// optionally compacted. Holds no original geometry; every predicate is
/// answered through the bitmap join primitives.
#[derive(Debug, Clone)]
pub struct RasterizedAdapter {
    cells: Vec<u64>,
    bitmap: BitmapIndex,
}

impl RasterizedAdapter {
    pub fn new(geometry: &Geometry<f64>, res: Resolution, compact: bool) -> Result<Self> {
        let cells = cells_of(geometry, res, compact)?;
        let bitmap = lift(&cells, u8::from(res));
        Ok(Self { cells, bitmap })
    }
}

/// One item's cell-backed approximation, in either indexing mode (§4.7).
#[derive(Debug, Clone)]
pub enum Adapter {
    Bound(BoundAdapter),
    Rasterized(RasterizedAdapter),
}

impl Adapter {
    /// Cells this adapter seeds into the facade's shared H3B under its item
    /// id. For [`RasterizedAdapter`] this is the full covering, not the
    /// coarser [`Self::indexed_cells`].
    pub fn seed_cells(&self) -> &[u64] {
        match self {
            Adapter::Bound(b) => &b.cells,
            Adapter::Rasterized(r) => &r.cells,
        }
    }

    /// The cells this adapter reports as its tight cover: the same 1-2
    /// cells for a bound adapter, or the deepest common ancestors per base
    /// cell (`parent_cells`) for a rasterized one.
    pub fn indexed_cells(&self) -> Vec<u64> {
        match self {
            Adapter::Bound(b) => b.cells.clone(),
            Adapter::Rasterized(r) => r.bitmap.parent_cells(),
        }
    }

    /// Resolution this adapter was built at.
    fn res(&self) -> u8 {
        match self {
            Adapter::Bound(_) => 15,
            Adapter::Rasterized(r) => r.bitmap.res(),
        }
    }

    /// Does `self` intersect `other`?
    pub fn intersects(&self, other: &Adapter) -> bool {
        match (self, other) {
            (Adapter::Bound(a), Adapter::Bound(b)) => {
                let peer = reproject(&b.geometry, b.mercator, a.mercator);
                geo::Intersects::intersects(&a.geometry, &peer)
            }
            (Adapter::Rasterized(a), Adapter::Rasterized(b)) => {
                join::check_intersection(&a.bitmap, &b.bitmap)
            }
            (Adapter::Rasterized(a), Adapter::Bound(b)) => {
                join::check_intersection(&a.bitmap, &lift(&b.cells, a.res()))
            }
            (Adapter::Bound(a), Adapter::Rasterized(b)) => {
                join::check_intersection(&lift(&a.cells, b.res()), &b.bitmap)
            }
        }
    }

    /// Is `self` contained in `other`?
    pub fn contains_in(&self, other: &Adapter) -> bool {
        match (self, other) {
            (Adapter::Bound(a), Adapter::Bound(b)) => {
                let peer = reproject(&b.geometry, b.mercator, a.mercator);
                geo::Contains::contains(&peer, &a.geometry)
            }
            (Adapter::Rasterized(a), Adapter::Rasterized(b)) => {
                join::check_contains_in(&a.bitmap, &b.bitmap)
            }
            (Adapter::Rasterized(a), Adapter::Bound(b)) => {
                join::check_contains_in(&a.bitmap, &lift(&b.cells, a.res()))
            }
            (Adapter::Bound(a), Adapter::Rasterized(b)) => {
                join::check_contains_in(&lift(&a.cells, b.res()), &b.bitmap)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;

    fn small_square(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ])
    }

    #[test]
    fn bound_adapter_intersects_overlapping_square() {
        let a = BoundAdapter::new(small_square(2.30, 48.85, 2.40, 48.90), Resolution::Nine, false)
            .unwrap();
        let b = BoundAdapter::new(small_square(2.35, 48.87, 2.45, 48.92), Resolution::Nine, false)
            .unwrap();
        let (a, b) = (Adapter::Bound(a), Adapter::Bound(b));
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
    }

    #[test]
    fn bound_adapter_disjoint_squares_do_not_intersect() {
        let a = BoundAdapter::new(small_square(0.0, 0.0, 1.0, 1.0), Resolution::Seven, false)
            .unwrap();
        let b = BoundAdapter::new(small_square(10.0, 10.0, 11.0, 11.0), Resolution::Seven, false)
            .unwrap();
        let (a, b) = (Adapter::Bound(a), Adapter::Bound(b));
        assert!(!a.intersects(&b));
    }

    #[test]
    fn rasterized_adapter_contains_in_smaller_square() {
        let inner =
            RasterizedAdapter::new(&small_square(2.35, 48.87, 2.36, 48.88), Resolution::Nine, false)
                .unwrap();
        let outer = RasterizedAdapter::new(
            &small_square(2.30, 48.85, 2.40, 48.90),
            Resolution::Nine,
            false,
        )
        .unwrap();
        let (inner, outer) = (Adapter::Rasterized(inner), Adapter::Rasterized(outer));
        assert!(inner.contains_in(&outer));
        assert!(!outer.contains_in(&inner));
    }

    #[test]
    fn mixed_bound_and_rasterized_adapters_can_be_compared() {
        let bound =
            Adapter::Bound(BoundAdapter::new(small_square(2.30, 48.85, 2.40, 48.90), Resolution::Nine, false).unwrap());
        let raster = Adapter::Rasterized(
            RasterizedAdapter::new(&small_square(2.35, 48.87, 2.36, 48.88), Resolution::Nine, false)
                .unwrap(),
        );
        assert!(bound.intersects(&raster));
        assert!(raster.intersects(&bound));
    }
}
