//! End-to-end fixture tests for the joining pipeline.
//!
//! Each fixture lists input tracks as `[x, y, frame]` samples, the pipeline
//! configuration and the frame lists of the tracks expected afterwards.
//!
//! Run with: cargo test fixture

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use blobtrack_rs::{AutoJoinConfig, NoProgress, TrackRegistry, TrackSample};

// ============================================================================
// Fixture JSON Schema
// ============================================================================

#[derive(Debug, Deserialize)]
struct Fixture {
    description: String,
    config: AutoJoinConfig,
    tracks: Vec<Vec<(f64, f64, i64)>>,
    expected_tracks: Vec<Vec<i64>>,
}

// ============================================================================
// Test Helpers
// ============================================================================

fn find_testdata_dir() -> PathBuf {
    let candidates = [
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/fixtures"),
        PathBuf::from("testdata/fixtures"),
    ];

    for candidate in &candidates {
        if candidate.exists() {
            return candidate.clone();
        }
    }
    panic!("Could not find testdata/fixtures directory");
}

fn load_fixture(scenario: &str) -> Fixture {
    let path = find_testdata_dir().join(format!("fixture_{}.json", scenario));

    let content = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture file {:?}: {}", path, e));

    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture file {:?}: {}", path, e))
}

fn build_registry(tracks: &[Vec<(f64, f64, i64)>]) -> TrackRegistry {
    let mut registry = TrackRegistry::new();
    for samples in tracks {
        let id = registry.register_new_track();
        for &(x, y, frame) in samples {
            registry.update_track(id, TrackSample::new(x, y, frame));
        }
    }
    registry
}

// ============================================================================
// Fixture Test Runner
// ============================================================================

fn run_fixture_test(scenario: &str) {
    let fixture = load_fixture(scenario);
    fixture
        .config
        .validate()
        .unwrap_or_else(|e| panic!("Fixture '{}' has invalid config: {}", scenario, e));

    let mut registry = build_registry(&fixture.tracks);
    registry.auto_join_tracks(&fixture.config, &mut NoProgress);

    let actual: Vec<Vec<i64>> = registry
        .tracks()
        .iter()
        .map(|t| t.iter().map(|s| s.frame).collect())
        .collect();

    assert_eq!(
        actual, fixture.expected_tracks,
        "Fixture '{}' ({}) diverged",
        scenario, fixture.description
    );

    for track in registry.tracks() {
        assert!(track.len() >= fixture.config.min_track_len);
    }

    println!(
        "Fixture test '{}' passed: {} tracks in, {} tracks out",
        scenario,
        fixture.tracks.len(),
        registry.len()
    );
}

// ============================================================================
// Test Cases
// ============================================================================

#[test]
fn test_fixture_small() {
    run_fixture_test("small");
}

#[test]
fn test_fixture_medium() {
    run_fixture_test("medium");
}

#[test]
fn test_fixture_config_defaults() {
    let fixture = load_fixture("small");
    let defaults = AutoJoinConfig::default();
    assert_eq!(fixture.config.min_track_len, defaults.min_track_len);
    assert_eq!(fixture.config.spike_angle, defaults.spike_angle);
}
