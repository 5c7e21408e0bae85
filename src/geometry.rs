//! Geometric helpers shared by the frame filters and the track joiners.

use nalgebra::{Point2, Vector2};

/// Euclidean distance between two points.
#[inline]
pub fn distance(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (b - a).norm()
}

/// Ray-casting point-in-polygon test (odd/even crossing count).
///
/// The polygon is implicitly closed. Polygons with fewer than three vertices
/// contain nothing.
pub fn point_in_polygon(x: f64, y: f64, polygon: &[Point2<f64>]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = polygon[i];
        let pj = polygon[j];
        if (pi.y > y) != (pj.y > y) && x < (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Step length used when scoring candidate paths.
///
/// Both squared terms use the x-difference; the y-difference does not enter.
/// Kept as-is until the intended metric is confirmed, since joins already
/// produced with it depend on this scoring.
#[inline]
pub fn path_step(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let dx = a.x - b.x;
    (dx * dx + dx * dx).sqrt()
}

/// Sum of [`path_step`] over consecutive points.
pub fn track_length(points: &[Point2<f64>]) -> f64 {
    points.windows(2).map(|w| path_step(&w[0], &w[1])).sum()
}

/// Distance of `p` from the line through `a` and `b`.
///
/// The line length in the denominator uses the same x-only step as
/// [`path_step`]. When that length vanishes the direct distance to `a` is
/// returned.
pub fn calc_dist_from_line(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let line_len = path_step(a, b);
    if line_len < f64::EPSILON {
        return distance(p, a);
    }
    let cross = (b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y);
    cross.abs() / line_len
}

/// Interior angle at `b` of the triangle `a`, `b`, `c` via the law of cosines.
///
/// Returns radians in `[0, π]`, or `None` when `b` coincides with a neighbour.
pub fn turn_angle(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> Option<f64> {
    let ab = distance(a, b);
    let bc = distance(b, c);
    let ac = distance(a, c);
    if ab < f64::EPSILON || bc < f64::EPSILON {
        return None;
    }
    let cos = (ab * ab + bc * bc - ac * ac) / (2.0 * ab * bc);
    Some(cos.clamp(-1.0, 1.0).acos())
}

/// Unsigned angle between two vectors in radians, `None` if either is zero.
pub fn angle_between(u: &Vector2<f64>, v: &Vector2<f64>) -> Option<f64> {
    let nu = u.norm();
    let nv = v.norm();
    if nu < f64::EPSILON || nv < f64::EPSILON {
        return None;
    }
    Some((u.dot(v) / (nu * nv)).clamp(-1.0, 1.0).acos())
}
