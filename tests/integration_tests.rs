//! Integration tests for blobtrack.
//!
//! These tests run complete workflows across the detection store and the
//! track registry.

use std::sync::Arc;

use blobtrack_rs::{
    flags, AutoJoinConfig, DetectionPoint, DetectionSequence, EndpointAnchor, FrameKey,
    LoadOptions, NoProgress, RangeKind, Timestamp, Track, TrackRegistry, TrackSample,
    TriggerTable,
};
use nalgebra::Point2;
use tempfile::NamedTempFile;

const FRAMES: i64 = 30;

/// Position of object A (moving right) and object B (moving down) in `frame`.
fn object_positions(frame: i64) -> [(f64, f64); 2] {
    let f = frame as f64;
    [(10.0 + 2.0 * f, 10.0), (100.0, 10.0 + 2.0 * f)]
}

/// Dense sequence with the two objects, a weaker re-detection of A every
/// fifth frame and one spurious blob.
fn two_object_sequence() -> DetectionSequence {
    let mut seq = DetectionSequence::dense(FRAMES as usize);
    for frame in 0..FRAMES {
        let slot = seq.frame_at_mut(FrameKey::Frame(frame)).unwrap();
        slot.timestamp = Timestamp::new(100 + frame / 10, (frame % 10 * 100) as u16, 0);
        for (x, y) in object_positions(frame) {
            slot.add_detection(DetectionPoint::new(x, y, 20.0, 200.0));
        }
        if frame % 5 == 0 {
            let (x, y) = object_positions(frame)[0];
            slot.add_detection(DetectionPoint::new(x + 0.5, y, 15.0, 90.0));
        }
        if frame == 15 {
            slot.add_detection(DetectionPoint::new(300.0, 300.0, 5.0, 40.0));
        }
    }
    seq
}

fn chaining_config() -> AutoJoinConfig {
    let mut config = AutoJoinConfig::new(5.0, 3);
    config.min_anchor_len = 1;
    config
}

fn assert_frames_non_decreasing(registry: &TrackRegistry) {
    for track in registry.tracks() {
        let frames: Vec<i64> = track.iter().map(|s| s.frame).collect();
        assert!(
            frames.windows(2).all(|w| w[0] <= w[1]),
            "track frames out of order: {:?}",
            frames
        );
    }
}

// =============================================================================
// Test 1: Complete pipeline
// =============================================================================

#[test]
fn test_integration_complete_pipeline() {
    let seq = two_object_sequence();

    // Position file round trip
    let positions = NamedTempFile::new().unwrap();
    let written = seq.save_positions(positions.path(), None).unwrap();
    assert_eq!(written, seq.total_detections());

    let mut loaded = DetectionSequence::dense(0);
    let summary = loaded
        .load_positions(positions.path(), &LoadOptions::growing(), &mut NoProgress)
        .unwrap();
    assert_eq!(summary.detections, written);
    assert_eq!(loaded.len(), FRAMES as usize);

    // Re-detections collapse onto the stronger blob
    let removed = loaded.clean(2.0);
    assert_eq!(removed, 6);
    assert_eq!(loaded.total_detections(), 2 * FRAMES as usize + 1);

    let mut registry = TrackRegistry::from_sequence(&loaded, None);
    assert_eq!(registry.len(), 2 * FRAMES as usize + 1);

    let result = registry.auto_join_tracks(&chaining_config(), &mut NoProgress);
    assert!(!result);
    assert_eq!(registry.len(), 2);
    assert_frames_non_decreasing(&registry);

    for track in registry.tracks() {
        assert_eq!(track.len(), FRAMES as usize);
        let first = track.first().unwrap();
        let last = track.last().unwrap();
        assert_eq!(first.frame, 0);
        assert_eq!(last.frame, FRAMES - 1);
        // Each track follows exactly one object
        let object = if first.y == last.y { 0 } else { 1 };
        for s in track {
            assert_eq!((s.x, s.y), object_positions(s.frame)[object]);
        }
    }
}

// =============================================================================
// Test 2: Flags pushed back onto the detections
// =============================================================================

#[test]
fn test_integration_push_flags_then_filter() {
    let mut seq = two_object_sequence();
    seq.clean(2.0);

    let mut registry = TrackRegistry::from_sequence(&seq, None);
    registry.auto_join_tracks(&chaining_config(), &mut NoProgress);
    assert_eq!(registry.len(), 2);

    // Reject the track of object B and write the verdict back
    let b = registry
        .tracks()
        .iter()
        .position(|t| t.first().unwrap().x == 100.0)
        .unwrap();
    registry.set_track_flag(b, flags::INVALID);
    assert_eq!(registry.push_flags(&mut seq), 2 * FRAMES as usize);

    let rejected = seq
        .frames()
        .iter()
        .flat_map(|f| f.detections.iter())
        .filter(|d| d.flags == flags::INVALID)
        .count();
    assert_eq!(rejected, FRAMES as usize);

    // A fresh conversion skips the rejected detections
    let again = TrackRegistry::from_sequence(&seq, None);
    assert_eq!(again.len(), FRAMES as usize + 1);
    assert!(again.tracks().iter().all(|t| t.first().unwrap().x != 100.0));
}

// =============================================================================
// Test 3: Sparse trigger-keyed sequence
// =============================================================================

#[test]
fn test_integration_sparse_sequence() {
    let text = "\
1.0\t1.0\t10.0\t4.0\t0.0\t1007\t5\t0\t0
2.0\t1.0\t10.0\t4.0\t0.0\t1003\t5\t0\t0
3.0\t1.0\t10.0\t4.0\t0.0\t1005\t5\t0\t0
4.0\t1.0\t10.0\t4.0\t0.0\t1003\t5\t0\t0
";
    let source = Arc::new(TriggerTable::from_triggers(&[1001, 1003, 1005, 1007, 1009]));
    let mut seq = DetectionSequence::sparse().with_source(source);
    let summary = seq
        .read_positions(
            std::io::Cursor::new(text),
            &LoadOptions::growing(),
            &mut NoProgress,
        )
        .unwrap();
    assert_eq!(summary.detections, 4);

    let triggers = seq.trigger_lookup().unwrap();
    assert_eq!(triggers, &[1003, 1005, 1007]);
    assert!(triggers.windows(2).all(|w| w[0] < w[1]));

    // Frame numbers translate through the trigger table
    assert_eq!(seq.frame_at(FrameKey::Frame(1)).unwrap().len(), 2);
    assert!(seq.frame_at(FrameKey::Frame(0)).is_none());
    assert_eq!(seq.slot_range(1, 3, RangeKind::Frames), vec![0, 1]);
    assert_eq!(seq.slot_range(1004, 1010, RangeKind::Triggers), vec![1, 2]);
    assert_eq!(seq.find_trigger_nearest(1004), Some(1));

    // Tracks keep the trigger as frame number
    let registry = TrackRegistry::from_sequence(&seq, Some((1004, 1010)));
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.tracks()[0].first().unwrap().frame, 1005);
}

// =============================================================================
// Test 4: Polygon removal and filters over a frame range
// =============================================================================

#[test]
fn test_integration_polygon_and_filters() {
    let mut seq = two_object_sequence();
    let polygon = vec![
        Point2::new(90.0, 0.0),
        Point2::new(110.0, 0.0),
        Point2::new(110.0, 200.0),
        Point2::new(90.0, 200.0),
    ];

    let inside = seq.points_inside_of_polygon(&polygon, 0, 10, RangeKind::Frames);
    assert_eq!(inside.len(), 10);
    assert!(inside.iter().all(|&(frame, _)| (0..10).contains(&frame)));

    let removed = seq.remove_points_inside_of_polygon(&polygon, 0, FRAMES, RangeKind::Frames);
    assert_eq!(removed, FRAMES as usize);

    // Drop the weak blobs by peak intensity
    let filtered = seq.filter_by_max_int(100.0, false);
    assert_eq!(filtered, 7);
    assert_eq!(seq.total_detections(), FRAMES as usize);
    assert!(seq
        .frames()
        .iter()
        .flat_map(|f| f.detections.iter())
        .all(|d| d.flags == flags::VALID));
}

// =============================================================================
// Test 5: Manual editing and track file round trip
// =============================================================================

#[test]
fn test_integration_manual_edit_and_track_file() {
    let mut registry = TrackRegistry::new();
    let id = registry.register_new_track();
    for f in 0..6 {
        let mut sample = TrackSample::new(f as f64, 0.0, f);
        sample.intensity = 50.0;
        registry.update_track(id, sample);
    }

    // Split at the fourth sample and join the halves back
    assert!(registry.remove_point_from_track(id, 3, true));
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.tracks()[1].first().unwrap().frame, 3);
    assert_eq!(registry.join_tracks(1, 0), Ok(0));
    assert_eq!(registry.len(), 1);

    // Replace a sample in place
    assert!(registry.add_point_to_track(0, TrackSample::new(2.0, 0.25, 2), true));
    assert_eq!(registry.tracks()[0].len(), 6);
    assert_frames_non_decreasing(&registry);

    let file = NamedTempFile::new().unwrap();
    assert_eq!(registry.save(file.path()).unwrap(), 6);
    let loaded = TrackRegistry::load(file.path()).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.tracks()[0].samples()[2].y, 0.25);
    assert_eq!(loaded.tracks()[0].samples()[0].intensity, 50.0);
}

// =============================================================================
// Test 6: Individual stages
// =============================================================================

#[test]
fn test_integration_stages_individually() {
    let a = Track::from(
        (0..5)
            .map(|f| TrackSample::new(f as f64, 0.0, f))
            .collect::<Vec<_>>(),
    );
    let mut registry = TrackRegistry::new();
    for track in [a.clone(), a] {
        let id = registry.register_new_track();
        for s in &track {
            let mut shifted = s.clone();
            shifted.frame += 7 * id as i64;
            shifted.x += 7.0 * id as f64;
            registry.update_track(id, shifted);
        }
    }

    let config = AutoJoinConfig::new(2.0, 3);
    let joined = registry.join_endpoints(&config, EndpointAnchor::Last, &mut NoProgress);
    assert_eq!(joined, 1);
    assert_eq!(registry.tracks()[0].len(), 10);
    assert_eq!(registry.remove_spikes(&config, &mut NoProgress), 0);
    assert_eq!(registry.remove_short_tracks(11), 1);
    assert!(registry.is_empty());
}
