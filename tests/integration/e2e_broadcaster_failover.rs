//! Broadcaster failover end-to-end: jobs complete against a degraded pool
//! as long as one endpoint in the ordered list answers correctly.

use async_trait::async_trait;
use dispatcher::dispatch::DispatchTuning;
use dispatcher::external::{DownloadsDisabled, ExternalError, Segmenter};
use dispatcher::orchestrate::Orchestrator;
use dispatcher::registry::{Broadcaster, load_broadcasters};
use dispatcher::storage::store::{Status, Store, UploadRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tc_test_utils::{BroadcasterBehavior, MockBroadcaster, write_broadcaster_list};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

struct PreparedSegmenter {
    windows: Vec<(f64, f64)>,
}

#[async_trait]
impl Segmenter for PreparedSegmenter {
    async fn segment(
        &self,
        input: &Path,
        _input_format: &str,
        work_dir: &Path,
        _target_seg_dur: u64,
    ) -> Result<PathBuf, ExternalError> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or("invalid file provided")?;
        Ok(tc_test_utils::write_segments(work_dir, stem, &self.windows))
    }
}

struct Harness {
    store: Arc<Store>,
    orchestrator: Orchestrator,
    dir: tempfile::TempDir,
}

fn harness(windows: &[(f64, f64)]) -> Harness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let dir = tempfile::tempdir().unwrap();

    let localfile = dir.path().join("input.mp4");
    std::fs::write(&localfile, "raw-video-bytes").unwrap();
    store
        .insert_upload(&UploadRecord {
            localfile: localfile.display().to_string(),
            filename: "input.mp4".to_owned(),
            filetype: "video/mp4".to_owned(),
            user: "user-1".to_owned(),
            complete: true,
        })
        .unwrap();

    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(DownloadsDisabled),
        Arc::new(PreparedSegmenter {
            windows: windows.to_vec(),
        }),
        dir.path().to_path_buf(),
        10,
        DispatchTuning {
            max_inflight: 5,
            passes: 3,
            attempts: 1,
            base_delay: Duration::ZERO,
        },
    );
    Harness {
        store,
        orchestrator,
        dir,
    }
}

fn request_json() -> String {
    serde_json::json!({
        "input": {"type": "file", "path": "input.mp4"},
        "storage": {"type": "local", "path": "out/"},
        "outputs": [],
        "profiles": [
            {"name": "240p0", "width": 426, "height": 240, "encoder": "h264"}
        ],
        "parallel_transcoding": true
    })
    .to_string()
}

fn broadcasters_from(dir: &Path, lines: &[String]) -> Arc<Vec<Broadcaster>> {
    let path = write_broadcaster_list(dir, lines);
    Arc::new(load_broadcasters(&path).expect("load broadcasters"))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// First broadcaster answers 502, second answers well-formed multipart:
/// every segment succeeds on its first attempt, counted against the second
/// broadcaster, with no recorded failures.
#[tokio::test]
async fn http_502_first_broadcaster_fails_over() {
    let bad = MockBroadcaster::start(BroadcasterBehavior::Reject(502)).await.unwrap();
    let good = MockBroadcaster::start(BroadcasterBehavior::Renditions(vec![
        "240p0.ts".to_owned(),
    ]))
    .await
    .unwrap();
    let h = harness(&[(0.0, 10.0), (10.0, 20.0)]);
    let broadcasters =
        broadcasters_from(h.dir.path(), &[bad.list_line(), good.list_line()]);

    let record = h.orchestrator.submit(&request_json(), "user-1").unwrap();
    h.orchestrator
        .run(record.clone(), broadcasters)
        .await
        .expect("run");

    let job = h.store.get_transcode(&record.id).unwrap().unwrap();
    assert_eq!(job.status, Status::Complete);

    // The dead endpoint was tried first for each segment, then skipped over.
    assert_eq!(bad.request_count(), 2);
    assert_eq!(good.request_count(), 2);
    for segment in h.store.segments_for_transcode(&record.id).unwrap() {
        assert_eq!(segment.status, Status::Complete);
        assert_eq!(segment.failures, 0, "failover must not count as a failure");
    }
}

/// First broadcaster violates the protocol (JSON body on a 200): the
/// dispatcher treats it like a dead endpoint and completes via the second.
#[tokio::test]
async fn non_multipart_200_fails_over() {
    let liar = MockBroadcaster::start(BroadcasterBehavior::NonMultipart).await.unwrap();
    let good = MockBroadcaster::start(BroadcasterBehavior::Renditions(vec![
        "240p0.ts".to_owned(),
    ]))
    .await
    .unwrap();
    let h = harness(&[(0.0, 10.0)]);
    let broadcasters =
        broadcasters_from(h.dir.path(), &[liar.list_line(), good.list_line()]);

    let record = h.orchestrator.submit(&request_json(), "user-1").unwrap();
    h.orchestrator
        .run(record.clone(), broadcasters)
        .await
        .expect("run");

    let job = h.store.get_transcode(&record.id).unwrap().unwrap();
    assert_eq!(job.status, Status::Complete);
    assert_eq!(liar.request_count(), 1);
    assert_eq!(good.request_count(), 1);
}

/// A rendition filename trying to escape the work dir is neutralized before
/// the file is created.
#[tokio::test]
async fn path_escape_rendition_is_confined_to_the_work_dir() {
    let sneaky = MockBroadcaster::start(BroadcasterBehavior::PathEscape(
        "../secret".to_owned(),
    ))
    .await
    .unwrap();
    let h = harness(&[(0.0, 10.0)]);
    let broadcasters = broadcasters_from(h.dir.path(), &[sneaky.list_line()]);

    let record = h.orchestrator.submit(&request_json(), "user-1").unwrap();
    h.orchestrator
        .run(record.clone(), broadcasters)
        .await
        .expect("run");

    let confined = h.dir.path().join(format!("{}_secret", record.id));
    assert_eq!(std::fs::read_to_string(confined).unwrap(), "escaped");
    let escaped = h
        .dir
        .path()
        .parent()
        .unwrap()
        .join(format!("{}_secret", record.id));
    assert!(!escaped.exists(), "rendition must not escape the work dir");
}
