// tc-test-utils: Shared test utilities for the transcode dispatch suite.
//
// Provides a mock broadcaster endpoint plus small fixture helpers for
// broadcaster list files and pre-segmented inputs.

use std::path::{Path, PathBuf};

pub mod mock_broadcaster;

pub use mock_broadcaster::{BOUNDARY, BroadcasterBehavior, MockBroadcaster, ReceivedDispatch};

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

/// Write a `broadcasters.list` with the given `url|user|password` lines into
/// `dir` and return its path.
pub fn write_broadcaster_list(dir: &Path, lines: &[String]) -> PathBuf {
    let path = dir.join("broadcasters.list");
    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(&path, contents).expect("write broadcaster list");
    path
}

/// Lay out a pre-segmented input in `dir`: one small `<stem>_<N>.ts` file
/// per window (0-based, the segmenter's naming) plus the `<stem>.csv`
/// listing them. Returns the CSV path.
pub fn write_segments(dir: &Path, stem: &str, windows: &[(f64, f64)]) -> PathBuf {
    let mut csv = String::new();
    for (i, (start, end)) in windows.iter().enumerate() {
        let name = format!("{stem}_{i}.ts");
        std::fs::write(dir.join(&name), format!("segment-{i}")).expect("write segment file");
        csv.push_str(&format!("{name},{start},{end}\n"));
    }
    let path = dir.join(format!("{stem}.csv"));
    std::fs::write(&path, csv).expect("write segment csv");
    path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
