//! Per-frame detection list with its frame-level metadata.

use crate::detection::{flags, DetectionPoint};
use crate::geometry::point_in_polygon;
use nalgebra::Point2;

/// Capture time of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub millis: u16,
    pub micros: u16,
}

impl Timestamp {
    pub fn new(seconds: i64, millis: u16, micros: u16) -> Self {
        Self {
            seconds,
            millis,
            micros,
        }
    }

    /// Timestamp as fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.millis as f64 * 1e-3 + self.micros as f64 * 1e-6
    }
}

/// All detections of one frame plus the detector parameters used for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    /// Detections in no particular order.
    pub detections: Vec<DetectionPoint>,

    /// Frame number (trigger number in sparse sequences).
    pub frame_no: i64,

    /// Capture time.
    pub timestamp: Timestamp,

    /// Maximum difference value reported by the detector.
    pub max_diff: f64,

    pub min_area: f64,
    pub max_area: f64,
    pub threshold: f64,
    pub min_threshold: f64,
    pub ith_offset: i32,
}

impl FrameDetections {
    /// Create an empty frame.
    pub fn new(frame_no: i64) -> Self {
        Self {
            frame_no,
            ..Self::default()
        }
    }

    /// Number of detections.
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Append a detection and return its index.
    pub fn add_detection(&mut self, detection: DetectionPoint) -> usize {
        self.detections.push(detection);
        self.detections.len() - 1
    }

    /// Remove the detection at `index`.
    pub fn remove_detection(&mut self, index: usize) -> Option<DetectionPoint> {
        if index < self.detections.len() {
            Some(self.detections.remove(index))
        } else {
            None
        }
    }

    /// Remove every detection within `radius` of `(x, y)`.
    ///
    /// Returns the number of removed detections.
    pub fn remove_detection_near(&mut self, x: f64, y: f64, radius: f64) -> usize {
        let before = self.detections.len();
        self.detections.retain(|d| d.distance_to_xy(x, y) > radius);
        before - self.detections.len()
    }

    /// Remove all detections.
    pub fn remove_all(&mut self) {
        self.detections.clear();
    }

    /// Index of the detection nearest to `(x, y)`.
    pub fn nearest(&self, x: f64, y: f64) -> Option<usize> {
        self.detections
            .iter()
            .enumerate()
            .map(|(i, d)| (i, d.distance_to_xy(x, y)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }

    /// Collapse detections closer than `min_distance`, keeping the brighter one.
    ///
    /// Ties on intensity keep the larger area. This is a greedy single pass over
    /// pairs in index order, not a clustering: a chain of neighbours may only
    /// partially collapse.
    ///
    /// Returns the number of removed detections.
    pub fn clean(&mut self, min_distance: f64) -> usize {
        let n = self.detections.len();
        for d in &mut self.detections {
            d.flags = flags::KEEPME;
        }

        for i in 0..n {
            if !self.detections[i].is_marked(flags::KEEPME) {
                continue;
            }
            for j in (i + 1)..n {
                if !self.detections[j].is_marked(flags::KEEPME) {
                    continue;
                }
                let (a, b) = (&self.detections[i], &self.detections[j]);
                if a.distance_to(b) >= min_distance {
                    continue;
                }

                let keep_i = a.peak_intensity > b.peak_intensity
                    || (a.peak_intensity == b.peak_intensity && a.area >= b.area);
                if keep_i {
                    self.detections[j].flags = flags::VALID;
                } else {
                    self.detections[i].flags = flags::VALID;
                    break;
                }
            }
        }

        self.sweep()
    }

    /// Group detections by proximity and return the clusters with more than
    /// `min_count` members, as lists of detection indices.
    ///
    /// A detection joins a cluster when it is within `min_dist` of any member;
    /// clusters reached by the same detection are merged.
    pub fn get_clusters(&self, min_dist: f64, min_count: usize) -> Vec<Vec<usize>> {
        let mut clusters: Vec<Vec<usize>> = Vec::new();

        for (i, d) in self.detections.iter().enumerate() {
            let touching: Vec<usize> = clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| {
                    c.iter()
                        .any(|&k| self.detections[k].distance_to(d) < min_dist)
                })
                .map(|(ci, _)| ci)
                .collect();

            match touching.split_first() {
                None => clusters.push(vec![i]),
                Some((&first, rest)) => {
                    // Merge from the back so the remaining indices stay valid.
                    for &ci in rest.iter().rev() {
                        let merged = clusters.remove(ci);
                        clusters[first].extend(merged);
                    }
                    clusters[first].push(i);
                }
            }
        }

        clusters.retain(|c| c.len() > min_count);
        for c in &mut clusters {
            c.sort_unstable();
        }
        clusters
    }

    /// Remove every member of clusters with more than `min_count` members.
    ///
    /// Crowded clusters are treated as noise and dropped entirely.
    pub fn clean_clusters(&mut self, min_dist: f64, min_count: usize) -> usize {
        let clusters = self.get_clusters(min_dist, min_count);
        for d in &mut self.detections {
            d.flags = flags::KEEPME;
        }
        for &i in clusters.iter().flatten() {
            self.detections[i].flags = flags::VALID;
        }
        self.sweep()
    }

    /// Keep detections with `area >= threshold` (`<=` when inverted).
    pub fn filter_by_area(&mut self, threshold: f64, invert: bool) -> usize {
        self.filter_by(threshold, invert, false, |d| d.area)
    }

    /// Keep detections with `peak_intensity >= threshold` (`<=` when inverted).
    pub fn filter_by_max_int(&mut self, threshold: f64, invert: bool) -> usize {
        self.filter_by(threshold, invert, false, |d| d.peak_intensity)
    }

    /// Shape filter on circularity; detections without contour are kept.
    pub fn filter_by_circularity(&mut self, threshold: f64, invert: bool) -> usize {
        self.filter_by(threshold, invert, true, |d| d.circularity)
    }

    /// Shape filter on inertia ratio; detections without contour are kept.
    pub fn filter_by_inertia(&mut self, threshold: f64, invert: bool) -> usize {
        self.filter_by(threshold, invert, true, |d| d.inertia)
    }

    /// Shape filter on convexity; detections without contour are kept.
    pub fn filter_by_convexity(&mut self, threshold: f64, invert: bool) -> usize {
        self.filter_by(threshold, invert, true, |d| d.convexity)
    }

    /// Shape filter on radius; detections without contour are kept.
    pub fn filter_by_radius(&mut self, threshold: f64, invert: bool) -> usize {
        self.filter_by(threshold, invert, true, |d| d.radius)
    }

    /// Indices of detections inside `polygon`.
    pub fn points_inside_of_polygon(&self, polygon: &[Point2<f64>]) -> Vec<usize> {
        self.detections
            .iter()
            .enumerate()
            .filter(|(_, d)| point_in_polygon(d.x, d.y, polygon))
            .map(|(i, _)| i)
            .collect()
    }

    /// Remove detections inside `polygon`, returning how many were removed.
    pub fn remove_points_inside_of_polygon(&mut self, polygon: &[Point2<f64>]) -> usize {
        let before = self.detections.len();
        self.detections
            .retain(|d| !point_in_polygon(d.x, d.y, polygon));
        before - self.detections.len()
    }

    // Two-pass filter: reset to VALID, mark survivors KEEPME, sweep.
    fn filter_by<F>(&mut self, threshold: f64, invert: bool, needs_contour: bool, value: F) -> usize
    where
        F: Fn(&DetectionPoint) -> f64,
    {
        for d in &mut self.detections {
            d.flags = flags::VALID;
        }

        for d in &mut self.detections {
            let keep = if needs_contour && !d.has_contour() {
                true
            } else if invert {
                value(d) <= threshold
            } else {
                value(d) >= threshold
            };
            if keep {
                d.flags |= flags::KEEPME;
            }
        }

        self.sweep()
    }

    // Drop detections not marked KEEPME and clear the marker on the rest.
    fn sweep(&mut self) -> usize {
        let before = self.detections.len();
        self.detections.retain(|d| d.is_marked(flags::KEEPME));
        for d in &mut self.detections {
            d.flags = flags::VALID;
        }
        before - self.detections.len()
    }
}
