//! DetectionPoint struct for a single blob detected in a frame.

use crate::shape::ShapeDescriptors;
use nalgebra::Point2;

/// Flag values carried by detections and track samples.
pub mod flags {
    /// Detection is usable.
    pub const VALID: i32 = 1;
    /// Detection was rejected.
    pub const INVALID: i32 = -1;
    /// Survivor marker used by two-phase filters.
    pub const KEEPME: i32 = 8;
}

/// A detected blob in one frame.
///
/// The shape descriptors are only meaningful when a contour is present
/// (see [`DetectionPoint::has_contour`]); they stay at zero otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionPoint {
    /// Sub-pixel x position.
    pub x: f64,

    /// Sub-pixel y position.
    pub y: f64,

    /// Blob area in pixels.
    pub area: f64,

    /// Peak intensity inside the blob.
    pub peak_intensity: f64,

    /// `4π·area / perimeter²`, derived from the contour.
    pub circularity: f64,

    /// Minor / major second-moment ratio, derived from the contour.
    pub inertia: f64,

    /// Area / convex hull area, derived from the contour.
    pub convexity: f64,

    /// Median contour radius, derived from the contour.
    pub radius: f64,

    /// Optional outline polygon.
    pub contour: Option<Vec<Point2<i32>>>,

    /// Flag bitmask (see [`flags`]).
    pub flags: i32,
}

impl DetectionPoint {
    /// Create a detection without contour.
    pub fn new(x: f64, y: f64, area: f64, peak_intensity: f64) -> Self {
        Self {
            x,
            y,
            area,
            peak_intensity,
            circularity: 0.0,
            inertia: 0.0,
            convexity: 0.0,
            radius: 0.0,
            contour: None,
            flags: flags::VALID,
        }
    }

    /// Create a detection with a contour, deriving the shape descriptors from it.
    pub fn with_contour(
        x: f64,
        y: f64,
        area: f64,
        peak_intensity: f64,
        contour: Vec<Point2<i32>>,
    ) -> Self {
        let mut point = Self::new(x, y, area, peak_intensity);
        point.set_contour(contour);
        point
    }

    /// Replace the contour and recompute the shape descriptors.
    pub fn set_contour(&mut self, contour: Vec<Point2<i32>>) {
        let shape = ShapeDescriptors::from_contour(&contour);
        self.circularity = shape.circularity;
        self.inertia = shape.inertia;
        self.convexity = shape.convexity;
        self.radius = shape.radius;
        self.contour = Some(contour);
    }

    /// Drop the contour and reset the shape descriptors.
    pub fn clear_contour(&mut self) {
        self.contour = None;
        self.circularity = 0.0;
        self.inertia = 0.0;
        self.convexity = 0.0;
        self.radius = 0.0;
    }

    /// Whether shape descriptors are valid for this detection.
    pub fn has_contour(&self) -> bool {
        self.contour.is_some()
    }

    /// Position as a point.
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    /// Euclidean distance to another detection.
    pub fn distance_to(&self, other: &DetectionPoint) -> f64 {
        self.distance_to_xy(other.x, other.y)
    }

    /// Euclidean distance to a position.
    pub fn distance_to_xy(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }

    /// Shape descriptors, or `None` without a contour.
    pub fn shape(&self) -> Option<ShapeDescriptors> {
        self.has_contour().then_some(ShapeDescriptors {
            circularity: self.circularity,
            inertia: self.inertia,
            convexity: self.convexity,
            radius: self.radius,
        })
    }

    pub(crate) fn is_marked(&self, flag: i32) -> bool {
        self.flags & flag != 0
    }
}

impl Default for DetectionPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Soft link from a track sample back to the detection it was copied from.
///
/// Holds the frame number (trigger number in sparse sequences), the detection
/// position and optionally the index the detection had at copy time. The index
/// is only a hint: resolution validates it against the position and falls back
/// to a search, so a reference survives detections being removed or reordered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionRef {
    pub frame: i64,
    pub x: f64,
    pub y: f64,
    pub index: Option<usize>,
}

impl DetectionRef {
    /// Positions closer than this are considered the same detection.
    pub const POSITION_TOLERANCE: f64 = 1e-6;

    pub fn new(frame: i64, x: f64, y: f64) -> Self {
        Self {
            frame,
            x,
            y,
            index: None,
        }
    }

    /// Attach the index the detection had when the reference was taken.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Resolve against the detections of the referenced frame.
    pub fn resolve(&self, detections: &[DetectionPoint]) -> Option<usize> {
        if let Some(index) = self.index {
            let hit = detections
                .get(index)
                .is_some_and(|d| d.distance_to_xy(self.x, self.y) <= Self::POSITION_TOLERANCE);
            if hit {
                return Some(index);
            }
        }

        detections
            .iter()
            .enumerate()
            .map(|(i, d)| (i, d.distance_to_xy(self.x, self.y)))
            .filter(|(_, dist)| *dist <= Self::POSITION_TOLERANCE)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }
}
