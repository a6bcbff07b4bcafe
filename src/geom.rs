//! Geometry -> cells bridge: turns a `geo_types::Geometry` into the set of
//! H3 cells that cover it at a chosen resolution.
//!
//! Polygon coverage is delegated to `h3o::geom::TilerBuilder`. Lines are
//! walked segment by segment with `CellIndex::grid_path_cells` (§4.3/§6's
//! `gridPath`); the one case that call can't handle is two distinct
//! endpoints aliasing to the same cell (a zero-length path), which falls
//! back to the fraction-space bisection in [`segment_cells`].

use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use h3o::{
    geom::{ContainmentMode, TilerBuilder},
    CellIndex, LatLng, Resolution,
};

use crate::cell;
use crate::error::Result;

/// Bail-out depth for the aliasing bisection (§4.3): past this many
/// halvings the midpoint is accepted as distinct from `start` regardless,
/// so degenerate (near-)coincident endpoints still terminate.
const MAX_SPLIT_DEPTH: u32 = 24;

const MAX_RESOLUTION: u8 = 14;
const COMPACTION_THRESHOLD: usize = 100;

fn succ(res: Resolution) -> Option<Resolution> {
    Resolution::try_from(u8::from(res) + 1).ok()
}

fn latlng_to_cell(coord: Coord, res: Resolution) -> Result<CellIndex> {
    Ok(LatLng::new(coord.y, coord.x)?.to_cell(res))
}

fn frac_point(start: Coord, end: Coord, frac: f64) -> Coord {
    Coord {
        x: start.x + (end.x - start.x) * frac,
        y: start.y + (end.y - start.y) * frac,
    }
}

/// Cells covering a single segment. The general case is `gridPath(start,
/// end)` via `CellIndex::grid_path_cells`. When the endpoints are distinct
/// points that alias to the same cell at this resolution, that call would
/// produce a zero-length path, so §4.3's fallback kicks in instead: halve
/// the fraction toward `end` until the midpoint lands in a different cell,
/// then stitch the two halves' paths back together.
fn segment_cells(start: Coord, end: Coord, res: Resolution, depth: u32) -> Result<Vec<CellIndex>> {
    let start_cell = latlng_to_cell(start, res)?;
    let end_cell = latlng_to_cell(end, res)?;

    if start_cell != end_cell {
        let path = start_cell
            .grid_path_cells(end_cell)?
            .collect::<std::result::Result<Vec<CellIndex>, _>>()?;
        return Ok(path);
    }
    if start == end || depth >= MAX_SPLIT_DEPTH {
        return Ok(vec![start_cell]);
    }

    let mut frac = 0.5;
    loop {
        let mid = frac_point(start, end, frac);
        let mid_cell = latlng_to_cell(mid, res)?;
        if mid_cell != start_cell || depth + 1 >= MAX_SPLIT_DEPTH {
            let mut left = segment_cells(start, mid, res, depth + 1)?;
            let right = segment_cells(mid, end, res, depth + 1)?;
            if left.last() == right.first() {
                left.pop();
            }
            left.extend(right);
            return Ok(left);
        }
        frac /= 2.0;
    }
}

/// Cells covering a chain of points (a `LineString`/ring): walks each
/// segment, dropping the last cell of every segment but the final one so
/// shared endpoints aren't double counted.
fn linestring_cells(line: &LineString, res: Resolution) -> Result<Vec<u64>> {
    let coords: Vec<Coord> = line.0.clone();
    let mut out = Vec::new();
    let n = coords.len();
    for (i, window) in coords.windows(2).enumerate() {
        let cells = segment_cells(window[0], window[1], res, 0)?;
        let is_last_segment = i + 2 == n;
        let take = if is_last_segment {
            cells.len()
        } else {
            cells.len().saturating_sub(1)
        };
        out.extend(cells.into_iter().take(take).map(u64::from));
    }
    Ok(out)
}

/// Fills a polygon with cells at `res`, optionally compacting the result.
/// If the coverage is empty at `res` (degenerate/small polygon), coarsens
/// by one resolution step at a time up to [`MAX_RESOLUTION`] before giving
/// up and returning an empty coverage.
fn polygon_cells(polygon: &Polygon, res: Resolution, compact: bool) -> Result<Vec<u64>> {
    let mut current_res = res;
    loop {
        let mut tiler = TilerBuilder::new(current_res)
            .containment_mode(ContainmentMode::Covers)
            .build();
        tiler.add(polygon.clone())?;
        let cells: Vec<CellIndex> = tiler.into_coverage().collect();

        if !cells.is_empty() {
            let raw: Vec<u64> = cells.into_iter().map(u64::from).collect();
            return Ok(if compact && raw.len() >= COMPACTION_THRESHOLD {
                cell::compact(&raw)
            } else {
                raw
            });
        }

        let Some(next) = succ(current_res) else {
            return Ok(Vec::new());
        };
        if u8::from(next) > MAX_RESOLUTION {
            return Ok(Vec::new());
        }
        current_res = next;
    }
}

/// Pure function dispatched by geometry kind: the set of cells, at
/// resolution `res`, whose union covers `geometry`.
pub fn cells_of(geometry: &Geometry<f64>, res: Resolution, compact: bool) -> Result<Vec<u64>> {
    match geometry {
        Geometry::Point(p) => Ok(vec![u64::from(latlng_to_cell(p.0, res)?)]),
        Geometry::MultiPoint(mp) => multi_point_cells(mp, res),
        Geometry::Line(l) => Ok(segment_cells(l.start, l.end, res, 0)?
            .into_iter()
            .map(u64::from)
            .collect()),
        Geometry::LineString(ls) => linestring_cells(ls, res),
        Geometry::MultiLineString(mls) => multi_linestring_cells(mls, res),
        Geometry::Polygon(poly) => polygon_cells(poly, res, compact),
        Geometry::MultiPolygon(mp) => multi_polygon_cells(mp, res, compact),
        Geometry::GeometryCollection(gc) => {
            let mut out = Vec::new();
            for g in gc {
                out.extend(cells_of(g, res, compact)?);
            }
            Ok(out)
        }
        Geometry::Rect(rect) => polygon_cells(&rect.to_polygon(), res, compact),
        Geometry::Triangle(tri) => polygon_cells(&tri.to_polygon(), res, compact),
    }
}

fn multi_point_cells(mp: &MultiPoint, res: Resolution) -> Result<Vec<u64>> {
    mp.0.iter()
        .map(|p: &Point| Ok(u64::from(latlng_to_cell(p.0, res)?)))
        .collect()
}

fn multi_linestring_cells(mls: &MultiLineString, res: Resolution) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    for ls in &mls.0 {
        out.extend(linestring_cells(ls, res)?);
    }
    Ok(out)
}

fn multi_polygon_cells(mp: &MultiPolygon, res: Resolution, compact: bool) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    for poly in &mp.0 {
        out.extend(polygon_cells(poly, res, compact)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    #[test]
    fn point_maps_to_one_cell() {
        let g = Geometry::Point(point!(x: 2.349, y: 48.853));
        let cells = cells_of(&g, Resolution::Nine, false).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cell::resolution(cells[0]), 9);
    }

    #[test]
    fn linestring_covers_every_segment() {
        let ls = line_string![
            (x: 2.349, y: 48.853),
            (x: 2.360, y: 48.860),
            (x: 2.370, y: 48.870),
        ];
        let g = Geometry::LineString(ls);
        let cells = cells_of(&g, Resolution::Nine, false).unwrap();
        assert!(!cells.is_empty());
        for &c in &cells {
            assert_eq!(cell::resolution(c), 9);
        }
    }

    #[test]
    fn polygon_coverage_is_non_empty() {
        let poly = polygon![
            (x: 2.33, y: 48.85),
            (x: 2.40, y: 48.85),
            (x: 2.40, y: 48.90),
            (x: 2.33, y: 48.90),
        ];
        let g = Geometry::Polygon(poly);
        let cells = cells_of(&g, Resolution::Seven, false).unwrap();
        assert!(!cells.is_empty());
    }

    #[test]
    fn segment_with_identical_endpoints_returns_single_cell() {
        let c = Point::new(2.349, 48.853).0;
        let cells = segment_cells(c, c, Resolution::Nine, 0).unwrap();
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn aliasing_endpoints_still_resolve_via_bisection() {
        // Distinct points, but close enough that a coarse resolution maps
        // both to the same cell: `grid_path_cells` would see a zero-length
        // path, so the fraction-bisection fallback must take over.
        let start = Point::new(2.349, 48.853).0;
        let end = Point::new(2.3490001, 48.8530001).0;
        assert_ne!(start, end);
        let cells = segment_cells(start, end, Resolution::One, 0).unwrap();
        assert!(!cells.is_empty());
    }

    #[test]
    fn distinct_cell_segment_uses_grid_path() {
        let start = Point::new(2.349, 48.853).0;
        let end = Point::new(2.370, 48.870).0;
        let cells = segment_cells(start, end, Resolution::Nine, 0).unwrap();
        assert!(cells.len() > 1);
        for &c in &cells {
            assert_eq!(cell::resolution(u64::from(c)), 9);
        }
    }
}
