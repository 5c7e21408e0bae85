//! Position text format.
//!
//! One tab-separated line per detection:
//! `x y intensity area maxDiff frame timestampSec timestampMillis timestampUsec`
//! with floats written to 16 decimals. A detection with a contour is followed
//! by `#contour N x1 y1 ... xN yN`.

use super::{Addressing, DetectionSequence};
use crate::config::LoadOptions;
use crate::detection::DetectionPoint;
use crate::frame::{FrameDetections, Timestamp};
use crate::progress::Progress;
use crate::Result;
use nalgebra::Point2;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const FIELD_COUNT: usize = 9;
const CONTOUR_TAG: &str = "#contour";

/// Counts reported by a position load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Detections added to the sequence.
    pub detections: usize,
    /// Contours attached to loaded detections.
    pub contours: usize,
    /// Malformed lines that were skipped.
    pub malformed: usize,
    /// Well-formed lines outside the range or the known frames.
    pub out_of_range: usize,
    /// Reading stopped early on cancellation.
    pub cancelled: bool,
}

struct PositionLine {
    detection: DetectionPoint,
    max_diff: f64,
    frame: i64,
    timestamp: Timestamp,
}

impl DetectionSequence {
    /// Load a position file.
    pub fn load_positions<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: &LoadOptions,
        progress: &mut dyn Progress,
    ) -> Result<LoadSummary> {
        let file = File::open(&path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "failed to open position file '{}': {}",
                    path.as_ref().display(),
                    e
                ),
            )
        })?;
        self.read_positions(BufReader::new(file), options, progress)
    }

    /// Read position lines into the sequence.
    ///
    /// Detections are appended to their frames. Malformed lines, including
    /// lines that are not valid UTF-8, are logged and skipped. Progress is
    /// reported per line with a total of 0, as the line count is not known up
    /// front. Cancellation stops reading and keeps what was loaded.
    ///
    /// Sparse sequences are re-sorted by trigger afterwards, also when reading
    /// stops on cancellation or on an I/O error.
    pub fn read_positions<R: BufRead>(
        &mut self,
        reader: R,
        options: &LoadOptions,
        progress: &mut dyn Progress,
    ) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        let read = self.read_position_lines(reader, options, progress, &mut summary);

        if self.is_sparse() {
            self.sort_frames();
        }
        read?;

        tracing::info!(
            detections = summary.detections,
            contours = summary.contours,
            malformed = summary.malformed,
            out_of_range = summary.out_of_range,
            cancelled = summary.cancelled,
            "loaded positions"
        );
        Ok(summary)
    }

    fn read_position_lines<R: BufRead>(
        &mut self,
        mut reader: R,
        options: &LoadOptions,
        progress: &mut dyn Progress,
        summary: &mut LoadSummary,
    ) -> Result<()> {
        let limit = self.growth_limit(options.max_frames);
        // (slot, index) of the detection a following contour line belongs to
        let mut last: Option<(usize, usize)> = None;
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            if progress.is_cancelled() {
                tracing::info!(line = line_no, "position load cancelled");
                summary.cancelled = true;
                return Ok(());
            }

            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            line_no += 1;
            progress.report_progress(line_no, 0);

            let Ok(line) = std::str::from_utf8(&buf) else {
                tracing::warn!(line = line_no, "skipping position line that is not UTF-8");
                summary.malformed += 1;
                last = None;
                continue;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix(CONTOUR_TAG) {
                let Some((slot, index)) = last.take() else {
                    continue;
                };
                match parse_contour(rest) {
                    Some(contour) => {
                        self.frames[slot].detections[index].set_contour(contour);
                        summary.contours += 1;
                    }
                    None => {
                        tracing::warn!(line = line_no, "skipping malformed contour line");
                        summary.malformed += 1;
                    }
                }
                continue;
            }

            if trimmed.starts_with('#') {
                continue;
            }

            last = None;
            let Some(parsed) = parse_position(trimmed) else {
                tracing::warn!(line = line_no, "skipping malformed position line");
                summary.malformed += 1;
                continue;
            };

            if !options.accepts(parsed.frame) {
                summary.out_of_range += 1;
                continue;
            }

            let Some(slot) = self.load_slot(parsed.frame, options.grow, limit) else {
                tracing::debug!(frame = parsed.frame, "no slot for frame, skipping line");
                summary.out_of_range += 1;
                continue;
            };

            let frame = &mut self.frames[slot];
            frame.timestamp = parsed.timestamp;
            frame.max_diff = parsed.max_diff;
            let index = frame.add_detection(parsed.detection);
            last = Some((slot, index));
            summary.detections += 1;
        }
    }

    // Slot for a loaded line; appends unsorted in sparse mode, sort_frames fixes order.
    fn load_slot(&mut self, frame_no: i64, grow: bool, limit: usize) -> Option<usize> {
        if let Addressing::Sparse { triggers } = &mut self.addressing {
            if let Some(slot) = triggers.iter().position(|&t| t == frame_no) {
                return Some(slot);
            }
            if !grow {
                return None;
            }
            triggers.push(frame_no);
            self.frames.push(FrameDetections::new(frame_no));
            return Some(self.frames.len() - 1);
        }

        let slot = usize::try_from(frame_no).ok()?;
        if slot >= self.frames.len() {
            if !grow {
                return None;
            }
            if slot >= limit {
                tracing::warn!(frame = frame_no, limit, "frame number past growth limit");
                return None;
            }
            self.grow_dense(slot + 1);
        }
        Some(slot)
    }

    /// Save all frames (or the frame numbers in `[from, to)`) to a position file.
    pub fn save_positions<P: AsRef<Path>>(
        &self,
        path: P,
        range: Option<(i64, i64)>,
    ) -> Result<usize> {
        let file = File::create(&path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "failed to create position file '{}': {}",
                    path.as_ref().display(),
                    e
                ),
            )
        })?;
        let mut writer = BufWriter::new(file);
        let written = self.write_positions(&mut writer, range)?;
        writer.flush()?;
        Ok(written)
    }

    /// Write position lines, returning the number of detections written.
    pub fn write_positions<W: Write>(
        &self,
        writer: &mut W,
        range: Option<(i64, i64)>,
    ) -> Result<usize> {
        let mut written = 0;
        for frame in &self.frames {
            if let Some((from, to)) = range {
                if !(frame.frame_no >= from && frame.frame_no < to) {
                    continue;
                }
            }

            for d in &frame.detections {
                writeln!(
                    writer,
                    "{:.16}\t{:.16}\t{:.16}\t{:.16}\t{:.16}\t{}\t{}\t{}\t{}",
                    d.x,
                    d.y,
                    d.peak_intensity,
                    d.area,
                    frame.max_diff,
                    frame.frame_no,
                    frame.timestamp.seconds,
                    frame.timestamp.millis,
                    frame.timestamp.micros
                )?;

                if let Some(contour) = &d.contour {
                    write!(writer, "{} {}", CONTOUR_TAG, contour.len())?;
                    for p in contour {
                        write!(writer, " {} {}", p.x, p.y)?;
                    }
                    writeln!(writer)?;
                }
                written += 1;
            }
        }
        Ok(written)
    }
}

fn parse_position(line: &str) -> Option<PositionLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return None;
    }

    let float = |i: usize| fields[i].parse::<f64>().ok();
    let x = float(0)?;
    let y = float(1)?;
    let intensity = float(2)?;
    let area = float(3)?;
    let max_diff = float(4)?;
    let frame = fields[5].parse::<i64>().ok()?;
    let timestamp = Timestamp::new(
        fields[6].parse().ok()?,
        fields[7].parse().ok()?,
        fields[8].parse().ok()?,
    );

    Some(PositionLine {
        detection: DetectionPoint::new(x, y, area, intensity),
        max_diff,
        frame,
        timestamp,
    })
}

fn parse_contour(rest: &str) -> Option<Vec<Point2<i32>>> {
    let mut values = rest.split_whitespace();
    let n: usize = values.next()?.parse().ok()?;
    let coords: Vec<i32> = values.map(|v| v.parse().ok()).collect::<Option<_>>()?;
    if n.checked_mul(2) != Some(coords.len()) {
        return None;
    }
    Some(
        coords
            .chunks_exact(2)
            .map(|c| Point2::new(c[0], c[1]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::sequence::FrameKey;
    use crate::source::TriggerTable;
    use approx::assert_relative_eq;
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn sample_sequence() -> DetectionSequence {
        let mut seq = DetectionSequence::dense(3);
        {
            let frame = seq.frame_at_mut(FrameKey::Frame(0)).unwrap();
            frame.timestamp = Timestamp::new(100, 250, 17);
            frame.max_diff = 42.5;
            frame.add_detection(DetectionPoint::new(1.25, 2.5, 30.0, 180.0));
        }
        {
            let frame = seq.frame_at_mut(FrameKey::Frame(2)).unwrap();
            frame.timestamp = Timestamp::new(101, 0, 3);
            let contour = vec![
                Point2::new(10, 10),
                Point2::new(14, 10),
                Point2::new(14, 13),
                Point2::new(10, 13),
            ];
            frame.add_detection(DetectionPoint::with_contour(
                12.123456789,
                11.5,
                12.0,
                99.0,
                contour,
            ));
        }
        seq
    }

    #[test]
    fn test_round_trip_with_contour() {
        let seq = sample_sequence();
        let file = NamedTempFile::new().unwrap();
        assert_eq!(seq.save_positions(file.path(), None).unwrap(), 2);

        let mut loaded = DetectionSequence::dense(3);
        let summary = loaded
            .load_positions(file.path(), &LoadOptions::default(), &mut NoProgress)
            .unwrap();
        assert_eq!(summary.detections, 2);
        assert_eq!(summary.contours, 1);

        let original = &seq.frames()[2].detections[0];
        let restored = &loaded.frames()[2].detections[0];
        assert_relative_eq!(restored.x, original.x, epsilon = 1e-12);
        assert_eq!(restored.contour, original.contour);
        assert_relative_eq!(restored.circularity, original.circularity, epsilon = 1e-12);
        assert_relative_eq!(restored.radius, original.radius, epsilon = 1e-12);

        assert_eq!(loaded.frames()[0].timestamp, Timestamp::new(100, 250, 17));
        assert_relative_eq!(loaded.frames()[0].max_diff, 42.5);
        assert!(!loaded.frames()[0].detections[0].has_contour());
    }

    #[test]
    fn test_line_format() {
        let seq = sample_sequence();
        let mut out = Vec::new();
        seq.write_positions(&mut out, Some((0, 1))).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "1.2500000000000000\t2.5000000000000000\t180.0000000000000000\t\
             30.0000000000000000\t42.5000000000000000\t0\t100\t250\t17\n"
        );
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let input = "1.0\t2.0\t3.0\n\
                     1.0\t2.0\t3.0\t4.0\t5.0\t1\t0\t0\t0\n\
                     #contour 2 1 2\n\
                     x\t2.0\t3.0\t4.0\t5.0\t1\t0\t0\t0\n";
        let mut seq = DetectionSequence::dense(2);
        let summary = seq
            .read_positions(Cursor::new(input), &LoadOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(summary.detections, 1);
        assert_eq!(summary.malformed, 3);
        assert!(!seq.frames()[1].detections[0].has_contour());
    }

    #[test]
    fn test_partial_range_load() {
        let input = "1\t1\t1\t1\t0\t0\t0\t0\t0\n\
                     2\t2\t1\t1\t0\t1\t0\t0\t0\n\
                     #contour 3 0 0 1 0 0 1\n\
                     3\t3\t1\t1\t0\t2\t0\t0\t0\n";
        let mut seq = DetectionSequence::dense(3);
        let options = LoadOptions::default().with_range(0, 1);
        let summary = seq
            .read_positions(Cursor::new(input), &options, &mut NoProgress)
            .unwrap();

        assert_eq!(summary.detections, 1);
        assert_eq!(summary.out_of_range, 2);
        assert_eq!(summary.contours, 0);
        assert_eq!(seq.total_detections(), 1);
    }

    #[test]
    fn test_dense_growth() {
        let input = "1\t1\t1\t1\t0\t4\t0\t0\t0\n";

        let mut fixed = DetectionSequence::dense(2);
        let summary = fixed
            .read_positions(Cursor::new(input), &LoadOptions::default(), &mut NoProgress)
            .unwrap();
        assert_eq!(summary.out_of_range, 1);
        assert_eq!(fixed.len(), 2);

        let mut growing = DetectionSequence::dense(2);
        growing
            .read_positions(Cursor::new(input), &LoadOptions::growing(), &mut NoProgress)
            .unwrap();
        assert_eq!(growing.len(), 5);
        assert_eq!(growing.frames()[4].frame_no, 4);
        assert_eq!(growing.frames()[4].len(), 1);
    }

    #[test]
    fn test_sparse_incremental_load_sorts() {
        let input = "1\t1\t1\t1\t0\t30\t0\t0\t0\n\
                     2\t2\t1\t1\t0\t10\t0\t0\t0\n\
                     3\t3\t1\t1\t0\t30\t0\t0\t0\n\
                     4\t4\t1\t1\t0\t20\t0\t0\t0\n";
        let mut seq = DetectionSequence::sparse();
        seq.read_positions(Cursor::new(input), &LoadOptions::growing(), &mut NoProgress)
            .unwrap();

        assert_eq!(seq.trigger_lookup().unwrap(), &[10, 20, 30]);
        assert_eq!(seq.frame_at(FrameKey::Trigger(30)).unwrap().len(), 2);
        assert_eq!(seq.frames()[0].frame_no, 10);
    }

    #[test]
    fn test_sparse_without_growth_skips_unknown() {
        let input = "1\t1\t1\t1\t0\t30\t0\t0\t0\n";
        let mut seq = DetectionSequence::sparse();
        let summary = seq
            .read_positions(Cursor::new(input), &LoadOptions::default(), &mut NoProgress)
            .unwrap();
        assert_eq!(summary.out_of_range, 1);
        assert!(seq.is_empty());
    }

    #[test]
    fn test_contour_count_overflow_is_malformed() {
        let input = "1\t1\t1\t1\t0\t0\t0\t0\t0\n\
                     #contour 9223372036854775808\n\
                     2\t2\t1\t1\t0\t0\t0\t0\t0\n\
                     #contour 9223372036854775808 1 2\n";
        let mut seq = DetectionSequence::dense(1);
        let summary = seq
            .read_positions(Cursor::new(input), &LoadOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(summary.detections, 2);
        assert_eq!(summary.malformed, 2);
        assert_eq!(summary.contours, 0);
        assert!(seq.frames()[0].detections.iter().all(|d| !d.has_contour()));
    }

    #[test]
    fn test_non_utf8_line_skipped_and_triggers_sorted() {
        let mut input = b"1\t1\t1\t1\t0\t30\t0\t0\t0\n\
                          2\t2\t1\t1\t0\t10\t0\t0\t0\n"
            .to_vec();
        input.extend_from_slice(&[0xff, 0xfe, b'\n']);
        input.extend_from_slice(b"3\t3\t1\t1\t0\t20\t0\t0\t0\n");

        let mut seq = DetectionSequence::sparse();
        let summary = seq
            .read_positions(Cursor::new(input), &LoadOptions::growing(), &mut NoProgress)
            .unwrap();

        assert_eq!(summary.detections, 3);
        assert_eq!(summary.malformed, 1);
        assert_eq!(seq.trigger_lookup().unwrap(), &[10, 20, 30]);
    }

    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl std::io::Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(std::io::Error::new(std::io::ErrorKind::Other, "device gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_read_error_still_sorts_triggers() {
        let data = b"1\t1\t1\t1\t0\t30\t0\t0\t0\n\
                     2\t2\t1\t1\t0\t10\t0\t0\t0\n"
            .to_vec();
        let reader = BufReader::new(FailingReader {
            data: Cursor::new(data),
        });

        let mut seq = DetectionSequence::sparse();
        let result = seq.read_positions(reader, &LoadOptions::growing(), &mut NoProgress);

        assert!(result.is_err());
        assert_eq!(seq.trigger_lookup().unwrap(), &[10, 30]);
    }

    #[test]
    fn test_dense_growth_limit() {
        let input = "1\t1\t1\t1\t0\t9223372036854775807\t0\t0\t0\n\
                     2\t2\t1\t1\t0\t12\t0\t0\t0\n\
                     3\t3\t1\t1\t0\t7\t0\t0\t0\n";
        let mut seq = DetectionSequence::dense(2);
        let options = LoadOptions::growing().with_max_frames(10);
        let summary = seq
            .read_positions(Cursor::new(input), &options, &mut NoProgress)
            .unwrap();

        assert_eq!(summary.detections, 1);
        assert_eq!(summary.out_of_range, 2);
        assert_eq!(seq.len(), 8);
    }

    #[test]
    fn test_dense_growth_capped_by_source() {
        let input = "1\t1\t1\t1\t0\t2\t0\t0\t0\n\
                     2\t2\t1\t1\t0\t3\t0\t0\t0\n";
        let table = TriggerTable::from_triggers(&[100, 101, 102]);
        let mut seq = DetectionSequence::dense(1).with_source(Arc::new(table));
        let summary = seq
            .read_positions(Cursor::new(input), &LoadOptions::growing(), &mut NoProgress)
            .unwrap();

        assert_eq!(summary.detections, 1);
        assert_eq!(summary.out_of_range, 1);
        assert_eq!(seq.len(), 3);
    }

    struct CancelAfter {
        reports: usize,
        limit: usize,
    }

    impl Progress for CancelAfter {
        fn report_progress(&mut self, _done: usize, _total: usize) {
            self.reports += 1;
        }

        fn is_cancelled(&self) -> bool {
            self.reports >= self.limit
        }
    }

    #[test]
    fn test_cancelled_sparse_load_keeps_sorted_prefix() {
        let input = "1\t1\t1\t1\t0\t30\t0\t0\t0\n\
                     2\t2\t1\t1\t0\t10\t0\t0\t0\n\
                     3\t3\t1\t1\t0\t20\t0\t0\t0\n\
                     4\t4\t1\t1\t0\t5\t0\t0\t0\n";
        let mut progress = CancelAfter {
            reports: 0,
            limit: 2,
        };
        let mut seq = DetectionSequence::sparse();
        let summary = seq
            .read_positions(Cursor::new(input), &LoadOptions::growing(), &mut progress)
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.detections, 2);
        assert_eq!(progress.reports, 2);
        assert_eq!(seq.trigger_lookup().unwrap(), &[10, 30]);
    }

    #[test]
    fn test_load_missing_file() {
        let mut seq = DetectionSequence::dense(1);
        let result = seq.load_positions(
            "/nonexistent/positions.txt",
            &LoadOptions::default(),
            &mut NoProgress,
        );
        assert!(result.is_err());
    }
}
