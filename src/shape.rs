//! Shape descriptors derived from blob contours.
//!
//! Descriptors follow the usual blob-detector definitions:
//!
//! - circularity: `4π·area / perimeter²` (1.0 for a disc)
//! - inertia: ratio of the minor to the major second moment (1.0 for isotropic blobs)
//! - convexity: `area / convex hull area`
//! - radius: median distance of the contour points from the contour centroid

use nalgebra::{Point2, Vector2};
use std::f64::consts::PI;

/// Raw spatial moments of a closed polygon, up to second order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
}

impl Moments {
    /// Centroid of the polygon, or `None` for a degenerate (zero-area) contour.
    pub fn centroid(&self) -> Option<Point2<f64>> {
        if self.m00.abs() < f64::EPSILON {
            return None;
        }
        Some(Point2::new(self.m10 / self.m00, self.m01 / self.m00))
    }

    /// Second-order central moments `(mu20, mu11, mu02)`.
    pub fn central(&self) -> Option<(f64, f64, f64)> {
        let c = self.centroid()?;
        let mu20 = self.m20 - c.x * self.m10;
        let mu11 = self.m11 - c.x * self.m01;
        let mu02 = self.m02 - c.y * self.m01;
        Some((mu20, mu11, mu02))
    }
}

/// Shape descriptors of a contour.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShapeDescriptors {
    pub circularity: f64,
    pub inertia: f64,
    pub convexity: f64,
    pub radius: f64,
}

impl ShapeDescriptors {
    /// Compute all descriptors for a closed contour.
    ///
    /// Contours with fewer than three points (or zero area) only get a radius.
    pub fn from_contour(contour: &[Point2<i32>]) -> Self {
        let points = to_f64(contour);
        let moments = contour_moments(&points);
        let area = moments.m00;

        let center = moments.centroid().unwrap_or_else(|| mean_point(&points));
        let radius = median_radius(&points, &center);

        if points.len() < 3 || area.abs() < f64::EPSILON {
            return Self {
                radius,
                ..Self::default()
            };
        }

        let perimeter = perimeter(&points);
        let circularity = if perimeter > 0.0 {
            4.0 * PI * area / (perimeter * perimeter)
        } else {
            0.0
        };

        let hull_area = polygon_area(&convex_hull(&points));
        let convexity = if hull_area > 0.0 { area / hull_area } else { 0.0 };

        Self {
            circularity,
            inertia: inertia_ratio(&moments),
            convexity,
            radius,
        }
    }
}

fn to_f64(contour: &[Point2<i32>]) -> Vec<Point2<f64>> {
    contour
        .iter()
        .map(|p| Point2::new(p.x as f64, p.y as f64))
        .collect()
}

fn mean_point(points: &[Point2<f64>]) -> Point2<f64> {
    if points.is_empty() {
        return Point2::origin();
    }
    let sum = points
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords);
    Point2::from(sum / points.len() as f64)
}

/// Green's theorem moments of a closed polygon.
///
/// The result is orientation independent (clockwise contours are flipped).
pub fn contour_moments(points: &[Point2<f64>]) -> Moments {
    let n = points.len();
    if n < 3 {
        return Moments::default();
    }

    let mut m = Moments::default();
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        let a = p.x * q.y - q.x * p.y;

        m.m00 += a;
        m.m10 += a * (p.x + q.x);
        m.m01 += a * (p.y + q.y);
        m.m20 += a * (p.x * p.x + p.x * q.x + q.x * q.x);
        m.m02 += a * (p.y * p.y + p.y * q.y + q.y * q.y);
        m.m11 += a * (2.0 * p.x * p.y + p.x * q.y + q.x * p.y + 2.0 * q.x * q.y);
    }

    m.m00 /= 2.0;
    m.m10 /= 6.0;
    m.m01 /= 6.0;
    m.m20 /= 12.0;
    m.m02 /= 12.0;
    m.m11 /= 24.0;

    if m.m00 < 0.0 {
        m.m00 = -m.m00;
        m.m10 = -m.m10;
        m.m01 = -m.m01;
        m.m20 = -m.m20;
        m.m02 = -m.m02;
        m.m11 = -m.m11;
    }

    m
}

/// Length of the closed polyline through `points`.
pub fn perimeter(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| (points[(i + 1) % n] - points[i]).norm())
        .sum()
}

/// Absolute shoelace area of a polygon.
pub fn polygon_area(points: &[Point2<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    (area / 2.0).abs()
}

/// Convex hull (monotone chain), counter-clockwise without repeated endpoint.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    sorted.dedup();

    if sorted.len() < 3 {
        return sorted;
    }

    let cross = |o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(sorted.len() * 2);
    for p in sorted.iter() {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }

    let lower_len = hull.len() + 1;
    for p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }

    hull.pop();
    hull
}

fn inertia_ratio(moments: &Moments) -> f64 {
    let Some((mu20, mu11, mu02)) = moments.central() else {
        return 0.0;
    };

    let denominator = ((2.0 * mu11).powi(2) + (mu20 - mu02).powi(2)).sqrt();
    if denominator <= 1e-2 {
        return 1.0;
    }

    let cos_min = (mu20 - mu02) / denominator;
    let sin_min = 2.0 * mu11 / denominator;
    let i_min = 0.5 * (mu20 + mu02) - 0.5 * (mu20 - mu02) * cos_min - mu11 * sin_min;
    let i_max = 0.5 * (mu20 + mu02) + 0.5 * (mu20 - mu02) * cos_min + mu11 * sin_min;

    if i_max.abs() < f64::EPSILON {
        0.0
    } else {
        i_min / i_max
    }
}

fn median_radius(points: &[Point2<f64>], center: &Point2<f64>) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mut dists: Vec<f64> = points.iter().map(|p| (p - center).norm()).collect();
    dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    dists[(dists.len() - 1) / 2]
}
