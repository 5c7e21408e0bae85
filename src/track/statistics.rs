//! Motion statistics of tracks and the statistics-based join check.

use super::{Track, TrackRegistry};
use crate::geometry::angle_between;
use nalgebra::Vector2;
use std::f64::consts::FRAC_PI_4;

/// Relative speed tolerance of [`TrackRegistry::join_based_on_statistics`].
const SPEED_TOLERANCE: f64 = 0.1;

/// Mean motion of a track, in pixels per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackStatistics {
    /// Mean of the per-step velocity vectors.
    pub mean_velocity: Vector2<f64>,

    /// Mean of the per-step speeds.
    pub mean_speed: f64,

    /// Frames between the first and the last sample.
    pub duration: i64,

    /// Number of steps that entered the means.
    pub steps: usize,
}

/// Mean velocity and speed over consecutive samples.
///
/// Steps between samples of the same frame are skipped. Returns `None` when no
/// step is left.
pub fn track_statistics(track: &Track) -> Option<TrackStatistics> {
    let mut velocity = Vector2::zeros();
    let mut speed = 0.0;
    let mut steps = 0;

    for w in track.samples().windows(2) {
        let dt = w[1].frame - w[0].frame;
        if dt <= 0 {
            continue;
        }
        let v = (w[1].position() - w[0].position()) / dt as f64;
        velocity += v;
        speed += v.norm();
        steps += 1;
    }

    if steps == 0 {
        return None;
    }

    let (first, last) = track.frame_range()?;
    Some(TrackStatistics {
        mean_velocity: velocity / steps as f64,
        mean_speed: speed / steps as f64,
        duration: last - first,
        steps,
    })
}

impl TrackRegistry {
    /// Whether joining tracks `n` and `m` is plausible given their motion.
    ///
    /// The tracks are put in time order and must not overlap. The velocity
    /// needed to bridge the gap between them has to be within ±10% of the
    /// average of both mean speeds, and its direction has to diverge from the
    /// combined mean direction by more than 45°.
    ///
    /// Advisory only: nothing in the joining pipeline calls this.
    pub fn join_based_on_statistics(&self, n: usize, m: usize) -> bool {
        let (Some(a), Some(b)) = (self.tracks.get(n), self.tracks.get(m)) else {
            return false;
        };
        if n == m || a.overlaps(b) {
            return false;
        }

        let (early, late) = match (a.first(), b.first()) {
            (Some(fa), Some(fb)) if fa.frame <= fb.frame => (a, b),
            (Some(_), Some(_)) => (b, a),
            _ => return false,
        };

        let (Some(s_early), Some(s_late)) = (track_statistics(early), track_statistics(late)) else {
            return false;
        };
        let (Some(end), Some(start)) = (early.last(), late.first()) else {
            return false;
        };

        let dt = start.frame - end.frame;
        if dt <= 0 {
            return false;
        }
        let bridge = (start.position() - end.position()) / dt as f64;

        let expected = 0.5 * (s_early.mean_speed + s_late.mean_speed);
        let speed = bridge.norm();
        let speed_ok = speed >= expected * (1.0 - SPEED_TOLERANCE)
            && speed <= expected * (1.0 + SPEED_TOLERANCE);

        let heading = s_early.mean_velocity + s_late.mean_velocity;
        let divergence = angle_between(&bridge, &heading);
        let direction_ok = divergence.is_some_and(|a| a > FRAC_PI_4);

        let acceleration = (s_late.mean_velocity - s_early.mean_velocity).norm() / dt as f64;
        tracing::debug!(
            n,
            m,
            speed,
            expected,
            divergence = divergence.unwrap_or(f64::NAN),
            acceleration,
            "statistics join check"
        );

        speed_ok && direction_ok
    }
}
