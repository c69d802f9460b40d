//! Job orchestration.
//!
//! One orchestrator run drives one job through its whole lifecycle:
//! resolve the input file, segment it, ingest the segment list, dispatch
//! the segments, and write the terminal job status. Jobs enter through
//! [`Orchestrator::submit`] (new requests) or are re-entered by the queue
//! scanner via [`Orchestrator::run`]; runs are expected to be spawned as
//! background tasks, so callers get their acknowledgement (the stored
//! `queued` row) before any work happens.
//!
//! A job reaches `complete` only when every one of its segments did; any
//! other outcome is `error` with the failure counter bumped, which keeps
//! the job eligible for scanner re-entry until the counter exhausts.

use crate::dispatch::{DispatchTuning, Dispatcher};
use crate::external::{Segmenter, SourceDownloader};
use crate::ingest::ingest_segment_list;
use crate::registry::Broadcaster;
use crate::storage::store::{Status, Store, StoreError, TranscodeRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tc_protocol::TranscodeRequest;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("could not parse request: {0}")]
    Request(#[from] serde_json::Error),
    #[error("transcode failed: could not create record: {0}")]
    CreateRecord(#[source] StoreError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// The job ran and ended in `error`; the message is already on the row.
    #[error("{0}")]
    JobFailed(String),
}

/// Drives submitted transcode jobs to a terminal state.
pub struct Orchestrator {
    store: Arc<Store>,
    downloader: Arc<dyn SourceDownloader>,
    segmenter: Arc<dyn Segmenter>,
    work_dir: PathBuf,
    target_seg_dur: u64,
    tuning: DispatchTuning,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        downloader: Arc<dyn SourceDownloader>,
        segmenter: Arc<dyn Segmenter>,
        work_dir: PathBuf,
        target_seg_dur: u64,
        tuning: DispatchTuning,
    ) -> Self {
        Orchestrator {
            store,
            downloader,
            segmenter,
            work_dir,
            target_seg_dur,
            tuning,
        }
    }

    /// Validate a submitted request and persist the `queued` job row.
    ///
    /// No work happens here — the returned record is the acknowledgement;
    /// pass it to [`run`](Self::run) in a background task (or let the queue
    /// scanner pick it up).
    pub fn submit(&self, request_json: &str, user: &str) -> Result<TranscodeRecord, OrchestrateError> {
        let request: TranscodeRequest = serde_json::from_str(request_json)?;
        self.store
            .create_transcode(&request.input.path, request_json, user)
            .map_err(OrchestrateError::CreateRecord)
    }

    /// Drive `record` through its lifecycle.
    ///
    /// Re-reads the row first and only proceeds when it is still `queued` —
    /// the state-machine guard that makes scanner re-entry idempotent.
    pub async fn run(
        &self,
        record: TranscodeRecord,
        broadcasters: Arc<Vec<Broadcaster>>,
    ) -> Result<(), OrchestrateError> {
        let Some(job) = self.store.get_transcode(&record.id)? else {
            return Err(OrchestrateError::JobFailed(format!(
                "transcode record {} not found",
                record.id
            )));
        };
        if job.status != Status::Queued {
            info!(
                request_id = %job.id,
                status = job.status.as_str(),
                "skipping job, already picked up"
            );
            return Ok(());
        }

        let request: TranscodeRequest = match serde_json::from_str(&job.request) {
            Ok(request) => request,
            Err(err) => {
                return self.job_failed(&job, format!("could not parse request: {err}"));
            }
        };

        // Resolve the input to a local file.
        let (input_file, input_format): (PathBuf, String);
        if request.input.kind == "s3" {
            self.update_status(&job, Status::Queued, "downloading s3 file");
            match self.downloader.download(&request.input, &self.work_dir).await {
                Ok(path) => {
                    input_format = container_format(&path, &request.input.kind);
                    input_file = path;
                }
                Err(err) => {
                    return self.job_failed(&job, format!("could not download file: {err}"));
                }
            }
        } else {
            match self.store.find_upload(&request.input.path, &job.user) {
                Ok(Some(upload)) if !upload.complete => {
                    info!(
                        request_id = %job.id,
                        "could not start transcode, file upload not complete"
                    );
                    self.update_status(
                        &job,
                        Status::Queued,
                        "transcode will start when upload is complete",
                    );
                    return Ok(());
                }
                Ok(Some(upload)) => {
                    input_format =
                        container_format(Path::new(&upload.localfile), &upload.filetype);
                    input_file = PathBuf::from(upload.localfile);
                }
                Ok(None) => {
                    return self.job_failed(
                        &job,
                        "could not start transcode, local file not found".to_owned(),
                    );
                }
                Err(err) => {
                    return self.job_failed(&job, format!("could not look up upload: {err}"));
                }
            }
        }

        if !request.parallel_transcoding {
            return self.job_failed(&job, "serial transcoding not supported".to_owned());
        }

        self.update_status(&job, Status::InProgress, "segmenting video");
        let seg_list = match self
            .segmenter
            .segment(&input_file, &input_format, &self.work_dir, self.target_seg_dur)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                return self.job_failed(&job, format!("video segmenter had error: {err}"));
            }
        };

        if let Err(err) = ingest_segment_list(&self.store, &seg_list, &self.work_dir, &job.id) {
            return self.job_failed(&job, err.to_string());
        }

        let dispatcher = Dispatcher::new(
            self.store.clone(),
            broadcasters,
            self.work_dir.clone(),
            self.target_seg_dur,
            self.tuning.clone(),
        );
        let summary = match dispatcher.run(&job, &request.profiles).await {
            Ok(summary) => summary,
            Err(err) => {
                return self.job_failed(&job, format!("error transcoding: {err}"));
            }
        };

        if summary.all_complete() {
            self.update_status(&job, Status::Complete, "complete");
            info!(request_id = %job.id, segments = summary.total, "transcode complete");
            Ok(())
        } else {
            self.job_failed(
                &job,
                format!(
                    "{} of {} segments failed to transcode",
                    summary.total - summary.complete,
                    summary.total
                ),
            )
        }
    }

    fn job_failed(&self, job: &TranscodeRecord, message: String) -> Result<(), OrchestrateError> {
        error!(request_id = %job.id, "transcode failed: {message}");
        if let Err(err) = self.store.record_transcode_failure(&job.id, &message) {
            error!(request_id = %job.id, error = %err, "transcode could not update status");
        }
        Err(OrchestrateError::JobFailed(message))
    }

    fn update_status(&self, job: &TranscodeRecord, status: Status, message: &str) {
        if let Err(err) = self.store.set_transcode_status(&job.id, status, message) {
            error!(request_id = %job.id, error = %err, "failed to save status update");
        }
    }
}

// ---------------------------------------------------------------------------
// Input format helpers
// ---------------------------------------------------------------------------

/// Container format hint handed to the segmenter: the file's own extension
/// when it has one, otherwise mapped from the stored mime type.
fn container_format(path: &Path, filetype: &str) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_owned(),
        None => ext_from_file_type(filetype).trim_start_matches('.').to_owned(),
    }
}

fn ext_from_file_type(filetype: &str) -> &'static str {
    match filetype {
        "video/mp4" => ".mp4",
        "video/MP2T" => ".ts",
        "video/webm" => ".webm",
        "video/x-matroska" => ".mkv",
        _ => ".mp4",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
