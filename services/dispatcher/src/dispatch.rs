//! Segment dispatcher: fans one job's segments out to the broadcaster pool.
//!
//! # Concurrency
//! At most `max_inflight` segment dispatches run at once, enforced by a
//! semaphore acquired on the launching side. Each pass over the segment
//! list ends with a join barrier, so a segment never has two attempts in
//! flight and the dispatcher returns only after every task has finished.
//!
//! # Pacing
//! A shared advisory counter (`seg_pace`, starting at 2) spaces launches
//! out: the launcher sleeps `max(2, seg_pace)` seconds after each
//! submission. Fast successes (< 15 s end-to-end) decrement it, failures
//! increment it. The stored value is left unclamped; the floor applies
//! when the sleep is computed.
//!
//! # Retry ladder
//! Up to `passes` passes over the list; within a pass each non-complete
//! segment gets up to `attempts` attempts, each attempt trying every
//! broadcaster in file order, with a linear cooldown of
//! `attempt * 2 * base_delay` after every failed attempt. The full matrix
//! is `passes x attempts x |broadcasters|` HTTP requests per segment,
//! worst case.

use crate::multipart::{MultipartError, save_renditions};
use crate::registry::Broadcaster;
use crate::storage::store::{SegmentRecord, Status, Store, StoreError, TranscodeRecord};
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tc_protocol::{Profile, TranscodeConfig};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Launches are never spaced closer than this many seconds.
const PACE_FLOOR_SECS: f64 = 2.0;

/// A dispatch at least this fast speeds the pacing counter up.
const FAST_DISPATCH: Duration = Duration::from_secs(15);

/// Per-request deadline is the target segment duration times this.
const REQUEST_DEADLINE_FACTOR: u64 = 20;

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Dispatch knobs; the defaults are the production values.
#[derive(Debug, Clone)]
pub struct DispatchTuning {
    /// Concurrent segment dispatches per job.
    pub max_inflight: usize,
    /// Passes over the segment list.
    pub passes: u32,
    /// Attempts per segment per pass.
    pub attempts: u32,
    /// Base unit of the linear retry cooldown.
    pub base_delay: Duration,
}

impl Default for DispatchTuning {
    fn default() -> Self {
        DispatchTuning {
            max_inflight: 5,
            passes: 3,
            attempts: 5,
            base_delay: Duration::from_secs(15),
        }
    }
}

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// Tally of one dispatcher run.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSummary {
    pub total: usize,
    pub complete: usize,
}

impl DispatchSummary {
    pub fn all_complete(&self) -> bool {
        self.complete == self.total
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not get segments for transcode: {0}")]
    Store(#[from] StoreError),
}

/// Why a single end-to-end attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("no broadcasters configured")]
    NoBroadcasters,
    #[error("failed to build transcode config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to open input file: {0}")]
    SegmentRead(#[from] std::io::Error),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error("broadcaster returned no rendition parts")]
    EmptyResponse,
    #[error("all broadcasters failed, need to retry segment")]
    Exhausted,
}

impl AttemptError {
    /// Retrying cannot help when there is nothing to dispatch to.
    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::NoBroadcasters)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Drives every segment of one job to a terminal state.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    client: reqwest::Client,
    broadcasters: Arc<Vec<Broadcaster>>,
    work_dir: PathBuf,
    target_seg_dur: u64,
    tuning: DispatchTuning,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        broadcasters: Arc<Vec<Broadcaster>>,
        work_dir: PathBuf,
        target_seg_dur: u64,
        tuning: DispatchTuning,
    ) -> Self {
        Dispatcher {
            store,
            client: reqwest::Client::new(),
            broadcasters,
            work_dir,
            target_seg_dur,
            tuning,
        }
    }

    /// Run the retry passes over `job`'s segments and return the final
    /// tally. Per-segment failures are recorded on the segment rows, not
    /// surfaced here; only store access on the job itself errors out.
    pub async fn run(
        &self,
        job: &TranscodeRecord,
        profiles: &[Profile],
    ) -> Result<DispatchSummary, DispatchError> {
        let profiles = Arc::new(profiles.to_vec());
        let seg_pace = Arc::new(Mutex::new(2.0_f64));
        let semaphore = Arc::new(Semaphore::new(self.tuning.max_inflight));

        let total = self.store.segments_for_transcode(&job.id)?.len();
        info!(request_id = %job.id, segments = total, "transcoding segments");

        for pass in 1..=self.tuning.passes {
            let segments = self.store.segments_for_transcode(&job.id)?;
            let mut inflight = JoinSet::new();
            for segment in segments {
                if segment.status == Status::Complete {
                    info!(
                        request_id = %job.id,
                        num = segment.num,
                        "skipping segment, transcoding complete"
                    );
                    continue;
                }

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore closed");
                let worker = self.clone();
                let job_id = job.id.clone();
                let manifest_id = job.manifest_id.clone();
                let profiles = profiles.clone();
                let pace = seg_pace.clone();
                let num = segment.num;
                inflight.spawn(async move {
                    let _permit = permit;
                    worker
                        .transcode_segment(&job_id, &manifest_id, &segment, &profiles, &pace)
                        .await;
                });

                // Pace submissions; floor applied on read, the raw counter
                // may drift below it.
                let delay = pace_delay(&seg_pace);
                info!(
                    request_id = %job.id,
                    num,
                    pass,
                    wait_secs = delay.as_secs_f64(),
                    "sending next segment after pacing delay"
                );
                tokio::time::sleep(delay).await;
            }

            // Join barrier: every outstanding dispatch finishes before the
            // next pass re-reads segment state.
            while inflight.join_next().await.is_some() {}
        }

        let segments = self.store.segments_for_transcode(&job.id)?;
        let complete = segments
            .iter()
            .filter(|s| s.status == Status::Complete)
            .count();
        Ok(DispatchSummary {
            total: segments.len(),
            complete,
        })
    }

    /// The per-segment attempt ladder: up to `attempts` dispatches with a
    /// linear cooldown after each failure.
    async fn transcode_segment(
        &self,
        job_id: &str,
        manifest_id: &str,
        segment: &SegmentRecord,
        profiles: &[Profile],
        pace: &Mutex<f64>,
    ) {
        let mut attempt = 1u32;
        loop {
            info!(
                request_id = %job_id,
                num = segment.num,
                attempt = segment.failures + i64::from(attempt),
                "segment transcode attempt"
            );
            let started = Instant::now();
            match self.send_segment(manifest_id, segment, profiles).await {
                Ok(renditions) => {
                    if started.elapsed() <= FAST_DISPATCH {
                        bump_pace(pace, -1.0);
                    }
                    if let Err(err) = self.store.complete_segment(&segment.id) {
                        error!(
                            request_id = %job_id,
                            segment = %segment.id,
                            error = %err,
                            "segment could not update status"
                        );
                    }
                    info!(
                        request_id = %job_id,
                        num = segment.num,
                        renditions,
                        "segment transcoded"
                    );
                    return;
                }
                Err(err) => {
                    bump_pace(pace, 1.0);
                    if let Err(store_err) =
                        self.store.record_segment_failure(&segment.id, &err.to_string())
                    {
                        error!(
                            request_id = %job_id,
                            segment = %segment.id,
                            error = %store_err,
                            "segment could not update status"
                        );
                    }
                    warn!(
                        request_id = %job_id,
                        num = segment.num,
                        error = %err,
                        "segment transcode failed"
                    );
                    if !err.is_retryable() {
                        return;
                    }

                    let wait = cooldown(attempt, self.tuning.base_delay);
                    info!(
                        request_id = %job_id,
                        num = segment.num,
                        wait_secs = wait.as_secs(),
                        "segment did not complete, waiting"
                    );
                    tokio::time::sleep(wait).await;
                    if attempt >= self.tuning.attempts {
                        return;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One end-to-end attempt: mark in-progress, read the segment file, and
    /// POST it to each broadcaster in order until one returns a valid
    /// multipart response.
    async fn send_segment(
        &self,
        manifest_id: &str,
        segment: &SegmentRecord,
        profiles: &[Profile],
    ) -> Result<usize, AttemptError> {
        if let Err(err) =
            self.store
                .set_segment_status(&segment.id, Status::InProgress, "transcoding")
        {
            error!(segment = %segment.id, error = %err, "segment could not update status");
        }
        if self.broadcasters.is_empty() {
            return Err(AttemptError::NoBroadcasters);
        }

        let config = TranscodeConfig::new(self.target_seg_dur, profiles.to_vec()).to_json()?;
        let data = Bytes::from(tokio::fs::read(&segment.segfile).await?);
        let duration_ms = ((segment.end - segment.start) * 1000.0).round() as i64;
        let ext = segment_ext(&segment.segfile);
        let deadline = Duration::from_secs(self.target_seg_dur * REQUEST_DEADLINE_FACTOR);

        for broadcaster in self.broadcasters.iter() {
            let url = format!(
                "{}/{}/{}{}",
                broadcaster.url.as_str().trim_end_matches('/'),
                manifest_id,
                segment.num,
                ext
            );
            let mut request = self
                .client
                .post(&url)
                .timeout(deadline)
                .header(ACCEPT, tc_protocol::MULTIPART_MIXED)
                .header(tc_protocol::CONTENT_DURATION, duration_ms)
                .header(tc_protocol::CONTENT_RESOLUTION, tc_protocol::SOURCE_RESOLUTION)
                .header(tc_protocol::TRANSCODE_CONFIGURATION, &config)
                .body(data.clone());
            if let Some(auth) = &broadcaster.auth {
                request = request.basic_auth(&auth.user, Some(&auth.password));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!(url = %url, error = %err, "failed to send request to transcode");
                    continue;
                }
            };
            if response.status() != StatusCode::OK {
                warn!(url = %url, status = %response.status(), "failed to send transcode");
                continue;
            }
            let Some(boundary) = multipart_boundary(response.headers()) else {
                warn!(url = %url, "response header invalid, expected multipart/mixed");
                continue;
            };

            let renditions = save_renditions(
                response.bytes_stream(),
                &boundary,
                &self.work_dir,
                &segment.transcode,
            )
            .await?;
            if renditions == 0 {
                return Err(AttemptError::EmptyResponse);
            }
            return Ok(renditions);
        }

        Err(AttemptError::Exhausted)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Linear retry cooldown: `attempt * 2 * base_delay`.
fn cooldown(attempt: u32, base_delay: Duration) -> Duration {
    base_delay * (attempt * 2)
}

fn pace_delay(pace: &Mutex<f64>) -> Duration {
    let raw = *pace
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Duration::from_secs_f64(PACE_FLOOR_SECS.max(raw))
}

fn bump_pace(pace: &Mutex<f64>, delta: f64) {
    *pace
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) += delta;
}

/// The dot-prefixed extension of a segment file, or empty when it has none.
fn segment_ext(segfile: &str) -> String {
    match Path::new(segfile).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{ext}"),
        None => String::new(),
    }
}

/// Extract the multipart boundary from a 200 response's `Content-Type`.
/// Anything other than well-formed `multipart/mixed` yields `None`.
fn multipart_boundary(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media: mime::Mime = content_type.parse().ok()?;
    if media.essence_str() != tc_protocol::MULTIPART_MIXED {
        return None;
    }
    Some(media.get_param(mime::BOUNDARY)?.as_str().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
