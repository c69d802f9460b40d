//! Seams to the external collaborators.
//!
//! The engine does not download source objects and does not split video —
//! it consumes the artifacts those tools leave behind. Deployments plug the
//! real tools in through these traits; the command adapters below run them
//! as configured child processes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tc_protocol::TranscodeSource;
use tokio::process::Command;
use tracing::info;
use uuid::Uuid;

pub type ExternalError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Fetches an object-store input to local disk.
#[async_trait]
pub trait SourceDownloader: Send + Sync {
    /// Download the object described by `source` into `dest_dir` and return
    /// the local file path.
    async fn download(
        &self,
        source: &TranscodeSource,
        dest_dir: &Path,
    ) -> Result<PathBuf, ExternalError>;
}

/// Splits a local input file into key-frame-aligned segments.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Split `input` into roughly `target_seg_dur`-second pieces inside
    /// `work_dir`, writing `<stem>_<N><ext>` segment files plus a
    /// `<stem>.csv` listing (`filename,start,end` per line). Returns the
    /// CSV path. `input_format` is the container format hint (extension
    /// without the dot) for inputs whose filename is not self-describing.
    async fn segment(
        &self,
        input: &Path,
        input_format: &str,
        work_dir: &Path,
        target_seg_dur: u64,
    ) -> Result<PathBuf, ExternalError>;
}

// ---------------------------------------------------------------------------
// Command adapters
// ---------------------------------------------------------------------------

/// Runs the configured segmenter command as
/// `<command> <input> <work_dir> <target_seg_dur> <input_format>` and
/// expects it to leave `<work_dir>/<input stem>.csv` behind.
pub struct CommandSegmenter {
    command: PathBuf,
}

impl CommandSegmenter {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        CommandSegmenter {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Segmenter for CommandSegmenter {
    async fn segment(
        &self,
        input: &Path,
        input_format: &str,
        work_dir: &Path,
        target_seg_dur: u64,
    ) -> Result<PathBuf, ExternalError> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or("invalid file provided")?;
        let seg_list = work_dir.join(format!("{stem}.csv"));

        // A stale listing from an earlier run would be re-ingested wholesale.
        match tokio::fs::remove_file(&seg_list).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(format!("could not delete segment list: {err}").into()),
        }

        info!(input = %input.display(), command = %self.command.display(), "segmenting video");
        let status = Command::new(&self.command)
            .arg(input)
            .arg(work_dir)
            .arg(target_seg_dur.to_string())
            .arg(input_format)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|err| format!("could not run segmenter: {err}"))?;
        if !status.success() {
            return Err(format!("video segmenter had error: exit {status}").into());
        }
        if !seg_list.is_file() {
            return Err("segmenter did not produce a segment list".into());
        }
        Ok(seg_list)
    }
}

/// Runs the configured downloader command as
/// `<command> <endpoint> <bucket> <path> <dest_file>`. Credentials go
/// through the environment (`TC_ACCESS_KEY_ID` / `TC_SECRET_ACCESS_KEY`),
/// never onto the argument list.
pub struct CommandDownloader {
    command: PathBuf,
}

impl CommandDownloader {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        CommandDownloader {
            command: command.into(),
        }
    }
}

#[async_trait]
impl SourceDownloader for CommandDownloader {
    async fn download(
        &self,
        source: &TranscodeSource,
        dest_dir: &Path,
    ) -> Result<PathBuf, ExternalError> {
        let ext = Path::new(&source.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let dest = dest_dir.join(format!("{}.{ext}", Uuid::new_v4()));

        info!(bucket = %source.bucket, path = %source.path, "downloading source object");
        let status = Command::new(&self.command)
            .arg(&source.endpoint)
            .arg(&source.bucket)
            .arg(&source.path)
            .arg(&dest)
            .env("TC_ACCESS_KEY_ID", &source.access_key_id)
            .env("TC_SECRET_ACCESS_KEY", &source.secret_access_key)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|err| format!("could not run downloader: {err}"))?;
        if !status.success() {
            return Err(format!("failed to download video: exit {status}").into());
        }
        if !dest.is_file() {
            return Err("failed to download video: downloader produced no file".into());
        }
        Ok(dest)
    }
}

/// Stand-in wired when no downloader command is configured: object-store
/// inputs are rejected up front.
pub struct DownloadsDisabled;

#[async_trait]
impl SourceDownloader for DownloadsDisabled {
    async fn download(
        &self,
        _source: &TranscodeSource,
        _dest_dir: &Path,
    ) -> Result<PathBuf, ExternalError> {
        Err("object-store inputs need a configured downloader command".into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
