use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;

use super::{JobPosting, JobRecord, JobStatus, Recommendation, ScoreResult};
use crate::sqlite::configure_connection;

const JOBS_SCHEMA: &str = include_str!("../../../sql/jobs.sql");

/// Hard cap on routing notes and error text stored per job. Anything longer
/// is model or page output that only bloats the row.
const MAX_NOTE_LEN: usize = 500;

pub type JobStoreResult<T> = Result<T, JobStoreError>;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("failed to open job store at {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("job store query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("unknown job status '{0}'")]
    InvalidStatus(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {job_id} already routed to {status}")]
    AlreadyRouted { job_id: String, status: JobStatus },
    #[error("job store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("job export serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("backup failed: {0}")]
    Backup(rusqlite::Error),
}

/// Builder for [`SqliteJobStore`] handles.
#[derive(Debug, Clone)]
pub struct SqliteJobStoreBuilder {
    path: PathBuf,
    read_only: bool,
    create_if_missing: bool,
}

impl SqliteJobStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
            create_if_missing: true,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn build(self) -> SqliteJobStore {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        SqliteJobStore {
            path: self.path,
            flags,
        }
    }
}

/// Filter for [`SqliteJobStore::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub company: Option<String>,
    pub limit: Option<u32>,
}

/// One row of routing history for a job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobAttempt {
    pub status_from: String,
    pub status_to: String,
    pub note: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// SQLite-backed job queue. One file holds every routing state; status
/// transitions are transactional so that concurrent runners never route the
/// same job twice.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteJobStore {
    pub fn builder(path: impl Into<PathBuf>) -> SqliteJobStoreBuilder {
        SqliteJobStoreBuilder::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> JobStoreResult<Connection> {
        let conn =
            Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
                JobStoreError::Open {
                    source,
                    path: self.path.clone(),
                }
            })?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    /// Creates the schema if it does not exist yet.
    pub fn initialize(&self) -> JobStoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    /// Inserts a scored posting as `pending`. Returns `None` when the URL is
    /// already known, which is the dedupe path for overlapping hunts.
    pub fn enqueue(
        &self,
        job_id: &str,
        posting: &JobPosting,
        score: Option<&ScoreResult>,
    ) -> JobStoreResult<Option<String>> {
        self.insert(job_id, posting, score, JobStatus::Pending, None)
    }

    /// Inserts a posting directly as `skipped` so the same URL is never
    /// re-scored on the next hunt.
    pub fn record_skipped(
        &self,
        job_id: &str,
        posting: &JobPosting,
        score: Option<&ScoreResult>,
        reason: &str,
    ) -> JobStoreResult<Option<String>> {
        self.insert(job_id, posting, score, JobStatus::Skipped, Some(reason))
    }

    fn insert(
        &self,
        job_id: &str,
        posting: &JobPosting,
        score: Option<&ScoreResult>,
        status: JobStatus,
        note: Option<&str>,
    ) -> JobStoreResult<Option<String>> {
        let conn = self.open()?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO jobs
                 (job_id, url, title, company, location, description, remote,
                  salary, status, score, recommendation, score_reason, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job_id,
                posting.url,
                posting.title,
                posting.company,
                posting.location,
                posting.description,
                posting.remote as i64,
                posting.salary,
                status.as_str(),
                score.map(|s| s.score as i64),
                score.map(|s| s.recommendation.as_str()),
                score.map(|s| s.reason.as_str()),
                note.map(truncate_note),
            ],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        Ok(Some(job_id.to_string()))
    }

    /// Whether a posting URL is already in the store, in any status.
    pub fn knows_url(&self, url: &str) -> JobStoreResult<bool> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Claims the oldest pending job and marks it `in_progress`.
    ///
    /// The claim runs inside `BEGIN IMMEDIATE` so two runners sharing the
    /// store file cannot pick up the same row. Returns `None` when the
    /// pending queue is empty.
    pub fn claim_pending(&self) -> JobStoreResult<Option<JobRecord>> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let candidate = tx
            .query_row(
                "SELECT * FROM jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [],
                JobRecord::from_row,
            )
            .optional()?;
        let Some(mut record) = candidate else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE jobs
                SET status = 'in_progress',
                    attempts = attempts + 1,
                    updated_at = CURRENT_TIMESTAMP
              WHERE id = ?1",
            params![record.id],
        )?;
        tx.execute(
            "INSERT INTO job_attempts (job_id, status_from, status_to, note)
             VALUES (?1, 'pending', 'in_progress', NULL)",
            params![record.job_id],
        )?;
        tx.commit()?;
        record.status = JobStatus::InProgress;
        record.attempts += 1;
        Ok(Some(record))
    }

    /// Routes a claimed job to its settled status and appends the move to the
    /// attempt history. Exactly one caller wins: a job that already left
    /// `pending`/`in_progress` reports [`JobStoreError::AlreadyRouted`].
    pub fn route(
        &self,
        job_id: &str,
        to: JobStatus,
        note: Option<&str>,
    ) -> JobStoreResult<()> {
        let note = note.map(truncate_note);
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(JobStoreError::NotFound(job_id.to_string()));
        };
        let affected = tx.execute(
            "UPDATE jobs
                SET status = ?2,
                    last_error = ?3,
                    updated_at = CURRENT_TIMESTAMP
              WHERE job_id = ?1
                AND status IN ('pending', 'in_progress')",
            params![job_id, to.as_str(), note],
        )?;
        if affected == 0 {
            return Err(JobStoreError::AlreadyRouted {
                job_id: job_id.to_string(),
                status: current.parse()?,
            });
        }
        tx.execute(
            "INSERT INTO job_attempts (job_id, status_from, status_to, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, current, to.as_str(), note],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Returns a claimed job to `pending` without counting the claim as a
    /// routing move. Used by dry runs and graceful shutdown.
    pub fn release(&self, job_id: &str) -> JobStoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE jobs
                SET status = 'pending',
                    attempts = CASE WHEN attempts > 0 THEN attempts - 1 ELSE 0 END,
                    updated_at = CURRENT_TIMESTAMP
              WHERE job_id = ?1 AND status = 'in_progress'",
            params![job_id],
        )?;
        if affected == 0 {
            return Err(JobStoreError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Returns stale `in_progress` claims to `pending`. Claims go stale when
    /// a runner dies mid-job; anything older than `older_than` is fair game.
    pub fn release_stale(&self, older_than: Duration) -> JobStoreResult<usize> {
        let conn = self.open()?;
        let cutoff = format!("-{} seconds", older_than.as_secs());
        let affected = conn.execute(
            "UPDATE jobs
                SET status = 'pending',
                    updated_at = CURRENT_TIMESTAMP
              WHERE status = 'in_progress'
                AND updated_at < datetime('now', ?1)",
            params![cutoff],
        )?;
        Ok(affected)
    }

    pub fn fetch(&self, job_id: &str) -> JobStoreResult<Option<JobRecord>> {
        let conn = self.open()?;
        let record = conn
            .query_row(
                "SELECT * FROM jobs WHERE job_id = ?1",
                params![job_id],
                JobRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Routing history for one job, oldest first.
    pub fn history(&self, job_id: &str) -> JobStoreResult<Vec<JobAttempt>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT status_from, status_to, note, created_at
               FROM job_attempts
              WHERE job_id = ?1
              ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok(JobAttempt {
                status_from: row.get("status_from")?,
                status_to: row.get("status_to")?,
                note: row.get("note")?,
                created_at: parse_timestamp(row.get("created_at")?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Per-status row counts, including zero entries for absent statuses.
    pub fn counts(&self) -> JobStoreResult<HashMap<JobStatus, i64>> {
        let conn = self.open()?;
        let mut counts: HashMap<JobStatus, i64> = [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Applied,
            JobStatus::Failed,
            JobStatus::Manual,
            JobStatus::Skipped,
            JobStatus::External,
        ]
        .into_iter()
        .map(|status| (status, 0))
        .collect();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            counts.insert(status.parse()?, count);
        }
        Ok(counts)
    }

    pub fn list(&self, filter: &JobFilter) -> JobStoreResult<Vec<JobRecord>> {
        let conn = self.open()?;
        let mut sql = String::from("SELECT * FROM jobs");
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string().into());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(company) = &filter.company {
            values.push(format!("%{company}%").into());
            clauses.push(format!("company LIKE ?{}", values.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY updated_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), JobRecord::from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Writes every record in `status` as a flat JSON list, the exchange
    /// format other tooling reads.
    pub fn export_status_json(&self, status: JobStatus, path: &Path) -> JobStoreResult<usize> {
        let records = self.list(&JobFilter {
            status: Some(status),
            ..JobFilter::default()
        })?;
        let mut file = File::create(path)?;
        serde_json::to_writer_pretty(&mut file, &records)?;
        file.write_all(b"\n")?;
        Ok(records.len())
    }

    /// Writes a gzipped JSON archive of the whole store, keyed by status.
    pub fn export_archive(&self, path: &Path) -> JobStoreResult<usize> {
        let records = self.list(&JobFilter::default())?;
        let mut by_status: HashMap<&'static str, Vec<&JobRecord>> = HashMap::new();
        for record in &records {
            by_status.entry(record.status.as_str()).or_default().push(record);
        }
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, &by_status)?;
        encoder.finish()?;
        Ok(records.len())
    }

    /// Copies the live database into `path` using SQLite's online backup.
    pub fn backup_to(&self, path: &Path) -> JobStoreResult<()> {
        let source = self.open()?;
        let mut target = Connection::open(path).map_err(|source| JobStoreError::Open {
            source,
            path: path.to_path_buf(),
        })?;
        let backup = rusqlite::backup::Backup::new(&source, &mut target)
            .map_err(JobStoreError::Backup)?;
        backup
            .run_to_completion(64, Duration::from_millis(50), None)
            .map_err(JobStoreError::Backup)?;
        Ok(())
    }
}

impl JobRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let status = status.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "status".into(), rusqlite::types::Type::Text)
        })?;
        let recommendation: Option<String> = row.get("recommendation")?;
        Ok(JobRecord {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            url: row.get("url")?,
            title: row.get("title")?,
            company: row.get("company")?,
            location: row.get("location")?,
            description: row.get("description")?,
            remote: row.get::<_, i64>("remote")? != 0,
            salary: row.get("salary")?,
            status,
            score: row.get::<_, Option<i64>>("score")?.map(|s| s as u8),
            recommendation: recommendation
                .as_deref()
                .map(Recommendation::from_model_answer),
            score_reason: row.get("score_reason")?,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            created_at: parse_timestamp(row.get("created_at")?),
            updated_at: parse_timestamp(row.get("updated_at")?),
        })
    }
}

fn parse_timestamp(raw: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    raw.map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn truncate_note(note: &str) -> String {
    if note.len() <= MAX_NOTE_LEN {
        return note.to_string();
    }
    let mut end = MAX_NOTE_LEN;
    while !note.is_char_boundary(end) {
        end -= 1;
    }
    note[..end].to_string()
}
