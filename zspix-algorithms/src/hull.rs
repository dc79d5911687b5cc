//! Convex outlines of pixel sets.

use zspix_core::{Contour, PixelCoord};

/// Closed convex hull of the corners of `pixels`, counter-clockwise.
///
/// Pixel `(x, y)` covers the unit square `[x, x+1) × [y, y+1)`, so a single
/// pixel yields a square of area 1. Collinear corners are dropped.
#[must_use]
pub fn convex_hull(pixels: &[PixelCoord]) -> Contour {
    let mut points: Vec<(i64, i64)> = pixels
        .iter()
        .flat_map(|p| {
            let (x, y) = (i64::from(p.x), i64::from(p.y));
            [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]
        })
        .collect();
    points.sort_unstable();
    points.dedup();

    if points.len() < 3 {
        return Contour::default();
    }

    // Andrew's monotone chain.
    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(points.len() * 2);
    for &p in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0
        {
            hull.pop();
        }
        hull.push(p);
    }
    // The last point repeats the first.
    hull.pop();

    #[allow(clippy::cast_precision_loss)]
    let vertices = hull.into_iter().map(|(x, y)| (x as f64, y as f64)).collect();
    Contour { vertices }
}

fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}
