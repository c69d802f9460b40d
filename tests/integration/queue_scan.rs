//! Queue scanner behavior: batch size, oldest-first pick, failure
//! threshold, and the state-machine guard on re-entry.

use async_trait::async_trait;
use dispatcher::config::ScannerConfig;
use dispatcher::dispatch::DispatchTuning;
use dispatcher::external::{DownloadsDisabled, ExternalError, Segmenter};
use dispatcher::orchestrate::Orchestrator;
use dispatcher::scanner::Scanner;
use dispatcher::storage::store::{Status, Store, UploadRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tc_test_utils::write_broadcaster_list;

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Jobs in these tests never reach segmentation (their upload is
/// incomplete); a segmenter that trips makes that explicit.
struct UnreachableSegmenter;

#[async_trait]
impl Segmenter for UnreachableSegmenter {
    async fn segment(
        &self,
        _input: &Path,
        _input_format: &str,
        _work_dir: &Path,
        _target_seg_dur: u64,
    ) -> Result<PathBuf, ExternalError> {
        Err("segmenter must not be reached in scanner tests".into())
    }
}

const WAITING: &str = "transcode will start when upload is complete";

struct Harness {
    store: Arc<Store>,
    scanner: Scanner,
    _dir: tempfile::TempDir,
}

fn harness(batch: u32, max_failures: i64) -> Harness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let dir = tempfile::tempdir().unwrap();

    // One shared, incomplete upload: every picked job parks itself on the
    // waiting message, which is the observable "the scanner ran me" marker.
    store
        .insert_upload(&UploadRecord {
            localfile: dir.path().join("input.mp4").display().to_string(),
            filename: "input.mp4".to_owned(),
            filetype: "video/mp4".to_owned(),
            user: "user-1".to_owned(),
            complete: false,
        })
        .unwrap();

    let broadcasters_file =
        write_broadcaster_list(dir.path(), &["http://127.0.0.1:1||".to_owned()]);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(DownloadsDisabled),
        Arc::new(UnreachableSegmenter),
        dir.path().to_path_buf(),
        10,
        DispatchTuning::default(),
    ));
    let scanner = Scanner::new(
        store.clone(),
        orchestrator,
        broadcasters_file,
        ScannerConfig {
            interval_secs: 60,
            batch,
            max_failures,
        },
    );
    Harness {
        store,
        scanner,
        _dir: dir,
    }
}

fn request_json() -> String {
    serde_json::json!({
        "input": {"type": "file", "path": "input.mp4"},
        "storage": {"type": "local", "path": "out/"},
        "outputs": [],
        "profiles": [],
        "parallel_transcoding": true
    })
    .to_string()
}

fn submit_job(store: &Store) -> String {
    store
        .create_transcode("input.mp4", &request_json(), "user-1")
        .unwrap()
        .id
}

/// Wait until `expected` jobs carry the waiting message (the spawned
/// orchestrator tasks finish asynchronously).
async fn wait_for_picked(store: &Store, ids: &[String], expected: usize) {
    for _ in 0..50 {
        let picked = ids
            .iter()
            .filter(|id| {
                store
                    .get_transcode(id)
                    .unwrap()
                    .is_some_and(|t| t.status_message == WAITING)
            })
            .count();
        if picked >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("expected {expected} jobs to be picked up in time");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Twenty-five queued jobs, batch of twenty: the twenty oldest are picked,
/// the five newest wait for the next tick.
#[tokio::test]
async fn scan_picks_the_twenty_oldest_of_twenty_five() {
    let h = harness(20, 10);
    let ids: Vec<String> = (0..25).map(|_| submit_job(&h.store)).collect();

    h.scanner.tick().await;
    wait_for_picked(&h.store, &ids, 20).await;

    for id in &ids[..20] {
        let job = h.store.get_transcode(id).unwrap().unwrap();
        assert_eq!(job.status, Status::Queued);
        assert_eq!(job.status_message, WAITING);
    }
    for id in &ids[20..] {
        let job = h.store.get_transcode(id).unwrap().unwrap();
        assert_eq!(job.status_message, "", "newest five must wait for the next tick");
    }
}

/// Jobs at the failure threshold and jobs already in progress are left
/// alone.
#[tokio::test]
async fn scan_skips_exhausted_and_in_progress_jobs() {
    let h = harness(20, 10);
    let fresh = submit_job(&h.store);
    let exhausted = submit_job(&h.store);
    let running = submit_job(&h.store);

    for _ in 0..10 {
        h.store.record_transcode_failure(&exhausted, "x").unwrap();
    }
    h.store
        .set_transcode_status(&exhausted, Status::Queued, "")
        .unwrap();
    h.store
        .set_transcode_status(&running, Status::InProgress, "segmenting video")
        .unwrap();

    h.scanner.tick().await;
    wait_for_picked(&h.store, std::slice::from_ref(&fresh), 1).await;

    let job = h.store.get_transcode(&exhausted).unwrap().unwrap();
    assert_eq!(job.status_message, "", "10 failures is over the threshold");
    let job = h.store.get_transcode(&running).unwrap().unwrap();
    assert_eq!(job.status_message, "segmenting video");
}

/// A tick with nothing queued does nothing (and does not try to read the
/// broadcaster list).
#[tokio::test]
async fn empty_scan_is_a_no_op() {
    let h = harness(20, 10);
    h.scanner.tick().await;
    assert!(h.store.queued_transcodes(20, 10).unwrap().is_empty());
}

/// Picked jobs that park on an incomplete upload stay queued, so the next
/// tick picks them again — re-entry is idempotent, not duplicating rows.
#[tokio::test]
async fn parked_jobs_are_picked_again_without_duplication() {
    let h = harness(20, 10);
    let id = submit_job(&h.store);

    h.scanner.tick().await;
    wait_for_picked(&h.store, std::slice::from_ref(&id), 1).await;
    h.scanner.tick().await;
    wait_for_picked(&h.store, std::slice::from_ref(&id), 1).await;

    // Still exactly one row for the job, still queued.
    let jobs = h.store.queued_transcodes(20, 10).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
}
