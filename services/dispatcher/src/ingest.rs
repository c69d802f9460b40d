//! Segment list ingestion.
//!
//! The upstream segmenter leaves behind a CSV, one segment per line:
//! `relative_filename,start_seconds,end_seconds`. Each line becomes one
//! `segments` row in `queued`, numbered 1..K in file order. The whole batch
//! goes through a single store transaction, so a job either gets its full
//! segment set or none of it.

use crate::storage::store::{NewSegment, Store, StoreError};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Substituted when a line's start or end time does not parse.
const FALLBACK_WINDOW: (f64, f64) = (0.0, 10.0);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not open segment list '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not create segment records: {0}")]
    Store(#[from] StoreError),
}

/// Parse the segmenter's CSV at `csv_path` and materialize the segment rows
/// for `transcode_id`. Returns the number of segments created.
pub fn ingest_segment_list(
    store: &Store,
    csv_path: &Path,
    work_dir: &Path,
    transcode_id: &str,
) -> Result<usize, IngestError> {
    info!(request_id = %transcode_id, "processing segment list");

    let text = std::fs::read_to_string(csv_path).map_err(|source| IngestError::Open {
        path: csv_path.display().to_string(),
        source,
    })?;

    let mut rows = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let (start, end) = match (
            fields.get(1).and_then(|v| v.parse::<f64>().ok()),
            fields.get(2).and_then(|v| v.parse::<f64>().ok()),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => FALLBACK_WINDOW,
        };
        rows.push(NewSegment {
            segfile: work_dir.join(fields[0]).to_string_lossy().into_owned(),
            start,
            end,
            num: rows.len() as i64 + 1,
        });
    }

    store.insert_segments(transcode_id, &rows)?;
    info!(request_id = %transcode_id, segments = rows.len(), "segment list ingested");
    Ok(rows.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
