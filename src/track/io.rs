//! Track text format.
//!
//! One tab-separated line per sample:
//! `x y intensity area maxDiff frame minFrame maxFrame trackID sec ms us`.
//! `minFrame`/`maxFrame` repeat the frame span of the sample's track and are
//! ignored on load. Lines sharing a track ID form one track regardless of
//! where they appear in the file.

use super::{Track, TrackRegistry, TrackSample};
use crate::detection::DetectionRef;
use crate::frame::Timestamp;
use crate::Result;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const FIELD_COUNT: usize = 12;

impl TrackRegistry {
    /// Load a registry from a track file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "failed to open track file '{}': {}",
                    path.as_ref().display(),
                    e
                ),
            )
        })?;
        Self::read_from(BufReader::new(file))
    }

    /// Read track lines.
    ///
    /// Tracks are ordered by the first appearance of their ID and sorted by
    /// frame. Malformed lines are logged and skipped.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut slots: HashMap<i64, usize> = HashMap::new();
        let mut tracks: Vec<Vec<TrackSample>> = Vec::new();
        let mut malformed = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((id, sample)) = parse_track_line(trimmed) else {
                tracing::warn!(line = line_no + 1, "skipping malformed track line");
                malformed += 1;
                continue;
            };

            let slot = *slots.entry(id).or_insert_with(|| {
                tracks.push(Vec::new());
                tracks.len() - 1
            });
            tracks[slot].push(sample);
        }

        let registry = Self {
            tracks: tracks.into_iter().map(Track::from).collect(),
        };
        tracing::info!(
            tracks = registry.len(),
            samples = registry.total_samples(),
            malformed,
            "loaded tracks"
        );
        Ok(registry)
    }

    /// Save the registry to a track file. Returns the number of samples written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let file = File::create(&path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "failed to create track file '{}': {}",
                    path.as_ref().display(),
                    e
                ),
            )
        })?;
        let mut writer = BufWriter::new(file);
        let written = self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(written)
    }

    /// Write track lines, using the track index as ID.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = 0;
        for (id, track) in self.tracks.iter().enumerate() {
            let Some((min_frame, max_frame)) = track.frame_range() else {
                continue;
            };
            for s in track {
                writeln!(
                    writer,
                    "{:.16}\t{:.16}\t{:.16}\t{:.16}\t{:.16}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    s.x,
                    s.y,
                    s.intensity,
                    s.area,
                    s.max_diff,
                    s.frame,
                    min_frame,
                    max_frame,
                    id,
                    s.timestamp.seconds,
                    s.timestamp.millis,
                    s.timestamp.micros
                )?;
                written += 1;
            }
        }
        Ok(written)
    }
}

fn parse_track_line(line: &str) -> Option<(i64, TrackSample)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return None;
    }

    let float = |i: usize| fields[i].parse::<f64>().ok();
    let int = |i: usize| fields[i].parse::<i64>().ok();

    let x = float(0)?;
    let y = float(1)?;
    let frame = int(5)?;
    let id = int(8)?;

    let mut sample = TrackSample::new(x, y, frame);
    sample.intensity = float(2)?;
    sample.area = float(3)?;
    sample.max_diff = float(4)?;
    sample.timestamp = Timestamp::new(
        int(9)?,
        fields[10].parse().ok()?,
        fields[11].parse().ok()?,
    );
    sample.detection_ref = Some(DetectionRef::new(frame, x, y));
    Some((id, sample))
}
