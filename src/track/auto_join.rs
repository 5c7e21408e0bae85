//! Automated multi-pass track joining.
//!
//! [`TrackRegistry::auto_join_tracks`] runs the stages in order, each one
//! completing before the next starts:
//!
//! 1. endpoint joins anchored on the last sample,
//! 2. endpoint joins anchored on the second-to-last sample,
//! 3. merging of overlapping tracks that run along the same line,
//! 4. spike removal,
//! 5. pruning of short tracks.
//!
//! Every stage reports progress per track index and stops at the next outer
//! iteration once cancellation is requested. Joins already made are kept.

use super::{Merge, Track, TrackRegistry, TrackSample};
use crate::config::AutoJoinConfig;
use crate::geometry::{calc_dist_from_line, distance, turn_angle};
use crate::progress::Progress;

/// Which sample of a track the endpoint search is anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAnchor {
    /// Search from the last sample forward and from the first backward.
    Last,
    /// Search from the second-to-last sample forward and from the second backward.
    SecondToLast,
}

impl EndpointAnchor {
    fn min_len(self, config: &AutoJoinConfig) -> usize {
        match self {
            EndpointAnchor::Last => config.min_anchor_len,
            EndpointAnchor::SecondToLast => config.min_anchor_len.max(3),
        }
    }

    // (sample searched forward from, sample searched backward from)
    fn endpoints(self, track: &Track) -> Option<(&TrackSample, &TrackSample)> {
        let n = track.len();
        match self {
            EndpointAnchor::Last => Some((track.last()?, track.first()?)),
            EndpointAnchor::SecondToLast if n >= 2 => Some((track.get(n - 2)?, track.get(1)?)),
            EndpointAnchor::SecondToLast => None,
        }
    }
}

impl TrackRegistry {
    /// Run the full joining pipeline.
    ///
    /// Returns `false` in every case, including when joins were made; the
    /// per-stage counts are logged at info level. Use the individual stages
    /// when the counts are needed.
    pub fn auto_join_tracks(
        &mut self,
        config: &AutoJoinConfig,
        progress: &mut dyn Progress,
    ) -> bool {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "auto join skipped");
            return false;
        }

        let before = self.tracks.len();

        let joined = self.join_endpoints(config, EndpointAnchor::Last, progress);
        tracing::info!(joined, tracks = self.tracks.len(), "endpoint pass");
        if progress.is_cancelled() {
            return false;
        }

        let joined = self.join_endpoints(config, EndpointAnchor::SecondToLast, progress);
        tracing::info!(joined, tracks = self.tracks.len(), "second-to-last endpoint pass");
        if progress.is_cancelled() {
            return false;
        }

        let merged = self.resolve_overlaps(config, progress);
        tracing::info!(merged, tracks = self.tracks.len(), "overlap pass");
        if progress.is_cancelled() {
            return false;
        }

        let spikes = self.remove_spikes(config, progress);
        tracing::info!(spikes, "spike pass");
        if progress.is_cancelled() {
            return false;
        }

        let pruned = self.remove_short_tracks(config.min_track_len);
        tracing::info!(
            pruned,
            before,
            after = self.tracks.len(),
            "auto join finished"
        );

        false
    }

    /// Join each track with its nearest reachable successor and predecessor.
    ///
    /// A candidate successor starts `dt` frames after the anchor sample with
    /// `0 < dt <= max_time_gap` and lies closer than `max_speed * dt`; a
    /// predecessor is found the same way backwards. A track that gained
    /// samples is examined again. Returns the number of joins.
    pub fn join_endpoints(
        &mut self,
        config: &AutoJoinConfig,
        anchor: EndpointAnchor,
        progress: &mut dyn Progress,
    ) -> usize {
        let min_len = anchor.min_len(config);
        let mut joined = 0;
        let mut i = 0;

        while i < self.tracks.len() {
            progress.report_progress(i, self.tracks.len());
            if progress.is_cancelled() {
                break;
            }

            let track = &self.tracks[i];
            if track.len() < min_len {
                i += 1;
                continue;
            }
            let Some((tail, head)) = anchor.endpoints(track) else {
                i += 1;
                continue;
            };

            let forward = self.nearest_successor(i, tail, config);
            let backward = self.nearest_predecessor(i, head, config);

            let mut current = i;
            let mut grown = false;
            let mut last_merge: Option<Merge> = None;

            if let Some(f) = forward {
                match self.merge(current, f) {
                    Ok(merge) => {
                        current = merge.kept;
                        last_merge = Some(merge);
                        grown = true;
                        joined += 1;
                    }
                    Err(e) => tracing::debug!(
                        track = i,
                        candidate = f,
                        error = %e,
                        "forward join skipped"
                    ),
                }
            }

            if let Some(b) = backward {
                if Some(b) != forward {
                    let b = last_merge.map_or(b, |m| m.shift(b));
                    match self.merge(current, b) {
                        Ok(merge) => {
                            current = merge.kept;
                            grown = true;
                            joined += 1;
                        }
                        Err(e) => tracing::debug!(
                            track = current,
                            candidate = b,
                            error = %e,
                            "backward join skipped"
                        ),
                    }
                }
            }

            i = if grown { current } else { i + 1 };
        }

        joined
    }

    fn nearest_successor(
        &self,
        i: usize,
        tail: &TrackSample,
        config: &AutoJoinConfig,
    ) -> Option<usize> {
        self.nearest_candidate(i, config, |other| {
            let start = other.first()?;
            Some((start.frame - tail.frame, distance(&tail.position(), &start.position())))
        })
    }

    fn nearest_predecessor(
        &self,
        i: usize,
        head: &TrackSample,
        config: &AutoJoinConfig,
    ) -> Option<usize> {
        self.nearest_candidate(i, config, |other| {
            let end = other.last()?;
            Some((head.frame - end.frame, distance(&head.position(), &end.position())))
        })
    }

    // Closest track whose (gap, distance) from `gap_of` fits the speed cone.
    fn nearest_candidate<F>(&self, i: usize, config: &AutoJoinConfig, gap_of: F) -> Option<usize>
    where
        F: Fn(&Track) -> Option<(i64, f64)>,
    {
        let mut best: Option<(usize, f64)> = None;
        for (j, other) in self.tracks.iter().enumerate() {
            if j == i {
                continue;
            }
            let Some((dt, dist)) = gap_of(other) else {
                continue;
            };
            if dt <= 0 || dt > config.max_time_gap {
                continue;
            }
            if dist >= config.max_speed * dt as f64 {
                continue;
            }
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((j, dist));
            }
        }
        best.map(|(j, _)| j)
    }

    /// Merge pairs of overlapping tracks that follow the same line.
    ///
    /// A pair is joined when the mean of [`line_line_distance`](Self::line_line_distance)
    /// is below `overlap_mean_distance` and its minimum below `max_speed`.
    /// Returns the number of merges.
    pub fn resolve_overlaps(
        &mut self,
        config: &AutoJoinConfig,
        progress: &mut dyn Progress,
    ) -> usize {
        let mut merged = 0;
        let mut i = 0;

        while i < self.tracks.len() {
            progress.report_progress(i, self.tracks.len());
            if progress.is_cancelled() {
                break;
            }

            let mut j = i + 1;
            while j < self.tracks.len() {
                if !self.tracks[i].overlaps(&self.tracks[j]) {
                    j += 1;
                    continue;
                }

                let distances = self.line_line_distance(i, j);
                if distances.is_empty() {
                    j += 1;
                    continue;
                }
                let mean = distances.iter().sum::<f64>() / distances.len() as f64;
                let min = distances.iter().copied().fold(f64::INFINITY, f64::min);

                if mean < config.overlap_mean_distance && min < config.max_speed {
                    match self.merge(i, j) {
                        Ok(_) => {
                            merged += 1;
                            j = i + 1;
                            continue;
                        }
                        Err(e) => tracing::debug!(i, j, mean, error = %e, "overlap merge skipped"),
                    }
                }
                j += 1;
            }
            i += 1;
        }

        merged
    }

    /// Per-frame distances between tracks `a` and `b` over their common frame span.
    ///
    /// Frames where both tracks have exactly one sample give the direct
    /// distance. Frames where one track has no sample give the distance of the
    /// other track's sample from the line through the missing track's nearest
    /// fixed neighbours. Other frames contribute nothing.
    pub fn line_line_distance(&self, a: usize, b: usize) -> Vec<f64> {
        let (Some(ta), Some(tb)) = (self.tracks.get(a), self.tracks.get(b)) else {
            return Vec::new();
        };
        let (Some((a0, a1)), Some((b0, b1))) = (ta.frame_range(), tb.frame_range()) else {
            return Vec::new();
        };
        let (from, to) = (a0.max(b0), a1.min(b1));

        let mut frames: Vec<i64> = ta
            .iter()
            .chain(tb.iter())
            .map(|s| s.frame)
            .filter(|f| (from..=to).contains(f))
            .collect();
        frames.sort_unstable();
        frames.dedup();

        let mut distances = Vec::new();
        for frame in frames {
            let sa = ta.samples_at(frame);
            let sb = tb.samples_at(frame);
            match (sa.as_slice(), sb.as_slice()) {
                ([pa], [pb]) => distances.push(distance(&pa.position(), &pb.position())),
                ([], [p]) => {
                    if let Some((before, after)) = ta.fixed_neighbours(frame) {
                        distances.push(calc_dist_from_line(
                            &p.position(),
                            &before.position(),
                            &after.position(),
                        ));
                    }
                }
                ([p], []) => {
                    if let Some((before, after)) = tb.fixed_neighbours(frame) {
                        distances.push(calc_dist_from_line(
                            &p.position(),
                            &before.position(),
                            &after.position(),
                        ));
                    }
                }
                _ => {}
            }
        }
        distances
    }

    /// Remove samples where the track turns back sharper than `spike_angle`.
    ///
    /// Each track is walked from its end towards its start. Returns the number
    /// of samples removed.
    pub fn remove_spikes(
        &mut self,
        config: &AutoJoinConfig,
        progress: &mut dyn Progress,
    ) -> usize {
        let mut removed = 0;
        let total = self.tracks.len();

        for (i, track) in self.tracks.iter_mut().enumerate() {
            progress.report_progress(i, total);
            if progress.is_cancelled() {
                break;
            }

            let samples = &mut track.samples;
            let mut k = samples.len().saturating_sub(2);
            while k >= 1 {
                let angle = turn_angle(
                    &samples[k - 1].position(),
                    &samples[k].position(),
                    &samples[k + 1].position(),
                );
                if angle.is_some_and(|a| a < config.spike_angle) {
                    samples.remove(k);
                    removed += 1;
                }
                k -= 1;
            }
        }

        removed
    }

    /// Remove every track with fewer than `min_len` samples. Returns how many went.
    pub fn remove_short_tracks(&mut self, min_len: usize) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.len() >= min_len);
        before - self.tracks.len()
    }

    /// Connect tracks of an object that stopped and was picked up again nearby.
    ///
    /// Candidate pairs run from the end of one track to the start of another
    /// with a forward gap `0 < dt < max_time_gap` frames and a distance below
    /// `max_dist`. Pairs whose ends take part in more than one candidate pair
    /// are left alone. Returns the number of joins.
    pub fn connect_resting_tracks(
        &mut self,
        max_time_gap: i64,
        max_dist: f64,
        progress: &mut dyn Progress,
    ) -> usize {
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (i, a) in self.tracks.iter().enumerate() {
            let Some(end) = a.last() else { continue };
            for (j, b) in self.tracks.iter().enumerate() {
                if i == j {
                    continue;
                }
                let Some(start) = b.first() else { continue };
                let dt = start.frame - end.frame;
                let close = distance(&end.position(), &start.position()) < max_dist;
                if dt > 0 && dt < max_time_gap && close {
                    edges.push((i, j));
                }
            }
        }

        let n = self.tracks.len();
        let mut outgoing = vec![0usize; n];
        let mut incoming = vec![0usize; n];
        for &(a, b) in &edges {
            outgoing[a] += 1;
            incoming[b] += 1;
        }
        let candidates = edges.len();
        edges.retain(|&(a, b)| outgoing[a] == 1 && incoming[b] == 1);
        if edges.len() < candidates {
            tracing::debug!(
                contested = candidates - edges.len(),
                "skipping contested resting-track pairs"
            );
        }

        let total = edges.len();
        let mut joined = 0;
        for k in 0..edges.len() {
            progress.report_progress(k, total);
            if progress.is_cancelled() {
                break;
            }

            let (a, b) = edges[k];
            if a == b {
                continue;
            }
            let merge = match self.merge(a, b) {
                Ok(merge) => merge,
                Err(e) => {
                    tracing::debug!(a, b, error = %e, "resting join skipped");
                    continue;
                }
            };
            joined += 1;

            let reindex = |x: usize| {
                if x == a || x == b {
                    merge.kept
                } else {
                    merge.shift(x)
                }
            };
            for edge in edges.iter_mut().skip(k + 1) {
                *edge = (reindex(edge.0), reindex(edge.1));
            }
        }

        joined
    }
}
