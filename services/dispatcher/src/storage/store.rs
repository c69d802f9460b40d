//! SQLite adapter for job and segment tracking.
//!
//! # Schema
//! - `transcodes`: one row per submitted job.
//! - `segments`: one row per dispatched segment, keyed to its parent job;
//!   `UNIQUE (transcode, num)` makes a repeated ingest of the same job abort.
//! - `uploads`: written by the upload receiver, read here to resolve local
//!   input files.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000,
//! foreign_keys=ON. PRAGMA integrity_check runs at open; returns error if it
//! fails.
//!
//! The connection sits behind a mutex so segment workers can report status
//! concurrently; every write is a single short statement except the segment
//! batch insert, which is one transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Integrity check failed: {0}")]
    IntegrityCheckFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state shared by jobs and segments.
///
/// `Complete` and `Error` are terminal; a segment in `Error` may still be
/// re-entered by a later dispatcher pass, a job in `Error` by the scanner
/// while its failure count stays under the scan threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Queued,
    InProgress,
    Complete,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::InProgress => "in_progress",
            Status::Complete => "complete",
            Status::Error => "error",
        }
    }

    fn from_db(value: String) -> rusqlite::Result<Status> {
        match value.as_str() {
            "queued" => Ok(Status::Queued),
            "in_progress" => Ok(Status::InProgress),
            "complete" => Ok(Status::Complete),
            "error" => Ok(Status::Error),
            other => Err(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown status '{other}'").into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A `transcodes` row.
#[derive(Debug, Clone)]
pub struct TranscodeRecord {
    pub id: String,
    pub filename: String,
    /// The submitted request, serialized; re-parsed on every (re-)entry.
    pub request: String,
    pub status: Status,
    pub status_message: String,
    pub failures: i64,
    pub user: String,
    /// Stable for the job's lifetime; path component of every dispatch URL.
    pub manifest_id: String,
    pub created: String,
}

/// A `segments` row.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub id: String,
    pub segfile: String,
    pub start: f64,
    pub end: f64,
    pub failures: i64,
    pub transcode: String,
    pub status: Status,
    pub status_message: String,
    pub num: i64,
}

/// A segment row about to be inserted by the ingester.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub segfile: String,
    pub start: f64,
    pub end: f64,
    pub num: i64,
}

/// An `uploads` row (read-only here).
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub localfile: String,
    pub filename: String,
    pub filetype: String,
    pub user: String,
    pub complete: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The job/segment store for a single dispatcher instance.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates tables if
    /// needed. Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA wal_autocheckpoint=1000;
             PRAGMA foreign_keys=ON;",
        )?;
        let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; the guard is still a
        // valid connection handle.
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Transcode jobs
    // -----------------------------------------------------------------------

    /// Create a job row in `queued` and return it.
    ///
    /// Assigns the job id and the job-level manifest id (both UUID v4).
    pub fn create_transcode(
        &self,
        filename: &str,
        request_json: &str,
        user: &str,
    ) -> StoreResult<TranscodeRecord> {
        let record = TranscodeRecord {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_owned(),
            request: request_json.to_owned(),
            status: Status::Queued,
            status_message: String::new(),
            failures: 0,
            user: user.to_owned(),
            manifest_id: Uuid::new_v4().to_string(),
            created: Utc::now().to_rfc3339(),
        };
        self.conn().execute(
            "INSERT INTO transcodes
                 (id, filename, request, status, status_message, failures, user, manifest_id, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.filename,
                record.request,
                record.status.as_str(),
                record.status_message,
                record.failures,
                record.user,
                record.manifest_id,
                record.created,
            ],
        )?;
        Ok(record)
    }

    pub fn get_transcode(&self, id: &str) -> StoreResult<Option<TranscodeRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT id, filename, request, status, status_message, failures, user, manifest_id, created
                 FROM transcodes WHERE id = ?1",
                params![id],
                map_transcode,
            )
            .optional()?;
        Ok(record)
    }

    pub fn set_transcode_status(
        &self,
        id: &str,
        status: Status,
        message: &str,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE transcodes SET status = ?2, status_message = ?3 WHERE id = ?1",
            params![id, status.as_str(), message],
        )?;
        Ok(())
    }

    /// Terminal failure: status `error`, message recorded, failure count bumped.
    pub fn record_transcode_failure(&self, id: &str, message: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE transcodes
             SET status = 'error', status_message = ?2, failures = failures + 1
             WHERE id = ?1",
            params![id, message],
        )?;
        Ok(())
    }

    /// Jobs eligible for a scanner pick: `queued`, failure count under the
    /// threshold, oldest first, at most `limit` rows.
    pub fn queued_transcodes(
        &self,
        limit: u32,
        max_failures: i64,
    ) -> StoreResult<Vec<TranscodeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, filename, request, status, status_message, failures, user, manifest_id, created
             FROM transcodes
             WHERE status = 'queued' AND failures < ?1
             ORDER BY created ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![max_failures, limit], map_transcode)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Segments
    // -----------------------------------------------------------------------

    /// Insert every row or none: the whole batch runs in one transaction, so
    /// a failed insert (including the `UNIQUE (transcode, num)` violation on
    /// re-ingest) leaves the store unchanged.
    pub fn insert_segments(&self, transcode_id: &str, rows: &[NewSegment]) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT INTO segments
                     (id, segfile, start, \"end\", failures, transcode, status, status_message, num)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, 'queued', '', ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    row.segfile,
                    row.start,
                    row.end,
                    transcode_id,
                    row.num,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// All segments of a job, in dispatch (sequence-number) order.
    pub fn segments_for_transcode(&self, transcode_id: &str) -> StoreResult<Vec<SegmentRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, segfile, start, \"end\", failures, transcode, status, status_message, num
             FROM segments WHERE transcode = ?1 ORDER BY num ASC",
        )?;
        let rows = stmt.query_map(params![transcode_id], map_segment)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_segment(&self, id: &str) -> StoreResult<Option<SegmentRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT id, segfile, start, \"end\", failures, transcode, status, status_message, num
                 FROM segments WHERE id = ?1",
                params![id],
                map_segment,
            )
            .optional()?;
        Ok(record)
    }

    pub fn set_segment_status(&self, id: &str, status: Status, message: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE segments SET status = ?2, status_message = ?3 WHERE id = ?1",
            params![id, status.as_str(), message],
        )?;
        Ok(())
    }

    /// Failed attempt: status `error`, last error message, failure count bumped.
    pub fn record_segment_failure(&self, id: &str, message: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE segments
             SET status = 'error', status_message = ?2, failures = failures + 1
             WHERE id = ?1",
            params![id, message],
        )?;
        Ok(())
    }

    pub fn complete_segment(&self, id: &str) -> StoreResult<()> {
        self.set_segment_status(id, Status::Complete, "complete")
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Look up an upload by original filename and owning user.
    ///
    /// Zero rows is a normal outcome (`None`), not an error.
    pub fn find_upload(&self, filename: &str, user: &str) -> StoreResult<Option<UploadRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT localfile, filename, filetype, user, complete
                 FROM uploads WHERE filename = ?1 AND user = ?2 LIMIT 1",
                params![filename, user],
                |row| {
                    Ok(UploadRecord {
                        localfile: row.get(0)?,
                        filename: row.get(1)?,
                        filetype: row.get(2)?,
                        user: row.get(3)?,
                        complete: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Record an upload. Called by the upload receiver sharing this store;
    /// the dispatcher itself never writes uploads.
    pub fn insert_upload(&self, upload: &UploadRecord) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO uploads (id, localfile, filename, filetype, user, complete)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                upload.localfile,
                upload.filename,
                upload.filetype,
                upload.user,
                i64::from(upload.complete),
            ],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn map_transcode(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscodeRecord> {
    Ok(TranscodeRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        request: row.get(2)?,
        status: Status::from_db(row.get(3)?)?,
        status_message: row.get(4)?,
        failures: row.get(5)?,
        user: row.get(6)?,
        manifest_id: row.get(7)?,
        created: row.get(8)?,
    })
}

fn map_segment(row: &rusqlite::Row<'_>) -> rusqlite::Result<SegmentRecord> {
    Ok(SegmentRecord {
        id: row.get(0)?,
        segfile: row.get(1)?,
        start: row.get(2)?,
        end: row.get(3)?,
        failures: row.get(4)?,
        transcode: row.get(5)?,
        status: Status::from_db(row.get(6)?)?,
        status_message: row.get(7)?,
        num: row.get(8)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
