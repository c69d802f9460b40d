//! Multipart response reading.
//!
//! A successful segment dispatch comes back as `multipart/mixed`, one part
//! per rendition. Each part's body is streamed straight to disk as
//! `<work_dir>/<job_id>_<part_filename>`; part contents are never
//! inspected.
//!
//! Part filenames come from the remote `Content-Disposition` header, so
//! they are sanitized before touching the filesystem: every `/` and every
//! `..` is deleted, and a name that ends up empty fails the segment.

use bytes::Bytes;
use futures_util::Stream;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("multipart response parsing error (could not read part, {0})")]
    Part(#[source] multer::Error),
    #[error("no filename returned with rendition part")]
    MissingFilename,
    #[error("could not create file for part data '{path}': {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write part data '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Delete path separators and parent references from a remote filename.
pub(crate) fn sanitize_filename(name: &str) -> String {
    name.replace('/', "").replace("..", "")
}

/// Stream every rendition part of a `multipart/mixed` body to the working
/// directory. Returns the number of parts written; clean end-of-parts
/// terminates normally.
pub async fn save_renditions<S, B, E>(
    stream: S,
    boundary: &str,
    work_dir: &Path,
    transcode_id: &str,
) -> Result<usize, MultipartError>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let mut parts = multer::Multipart::new(stream, boundary);
    let mut written = 0usize;

    while let Some(mut field) = parts.next_field().await.map_err(MultipartError::Part)? {
        let name = sanitize_filename(field.file_name().unwrap_or_default());
        if name.is_empty() {
            return Err(MultipartError::MissingFilename);
        }

        let path = work_dir.join(format!("{transcode_id}_{name}"));
        let mut file = File::create(&path).await.map_err(|source| MultipartError::Create {
            path: path.display().to_string(),
            source,
        })?;
        while let Some(chunk) = field.chunk().await.map_err(MultipartError::Part)? {
            file.write_all(&chunk)
                .await
                .map_err(|source| MultipartError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| MultipartError::Write {
            path: path.display().to_string(),
            source,
        })?;

        debug!(request_id = %transcode_id, rendition = %name, "rendition part saved");
        written += 1;
    }

    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
