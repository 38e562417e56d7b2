use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_INGEST_DOCUMENT: &str = "ingest-document";

/// Attempts a job gets before an interrupted run is no longer requeued.
pub const MAX_ATTEMPTS: i32 = 3;

pub const INTERRUPTED_ERROR: &str = "interrupted before completion";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub failed: usize,
}

#[cfg(test)]
pub fn enqueue_job(
    conn: &mut SqliteConnection,
    job_type: &str,
    payload: &Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    enqueue_job_with_id(
        conn,
        &uuid::Uuid::new_v4().to_string(),
        job_type,
        payload,
        run_after,
    )
}

/// Enqueues a job under a caller-chosen id. Ingestion jobs reuse the id of
/// the document they produce.
pub fn enqueue_job_with_id(
    conn: &mut SqliteConnection,
    id: &str,
    job_type: &str,
    payload: &Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let now = Utc::now().naive_utc();
    let new_job = NewJob {
        id: id.to_string(),
        job_type: job_type.to_string(),
        payload: serde_json::to_string(payload)?,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or(now),
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(jobs::table)
        .values(&new_job)
        .execute(conn)?;

    let job = jobs::table.find(&new_job.id).first(conn)?;
    Ok(job)
}

pub fn find_job(conn: &mut SqliteConnection, job_id: &str) -> JobQueueResult<Option<Job>> {
    Ok(jobs::table.find(job_id).first(conn).optional()?)
}

/// Jobs of `job_type` that are not finished successfully, oldest first.
pub fn unfinished_jobs(conn: &mut SqliteConnection, job_type: &str) -> JobQueueResult<Vec<Job>> {
    Ok(jobs::table
        .filter(jobs::job_type.eq(job_type))
        .filter(jobs::status.ne(STATUS_SUCCEEDED))
        .order(jobs::created_at.asc())
        .load(conn)?)
}

pub fn delete_job(conn: &mut SqliteConnection, job_id: &str) -> JobQueueResult<bool> {
    let removed = diesel::delete(jobs::table.find(job_id)).execute(conn)?;
    Ok(removed > 0)
}

/// Claims the oldest runnable job. SQLite has no row locks, so the select and
/// the status flip run inside an immediate transaction that holds the write
/// lock for the whole claim.
pub fn reserve_job(
    conn: &mut SqliteConnection,
    job_types: &[&str],
) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.immediate_transaction(|conn| {
        let job_opt = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order((jobs::run_after.asc(), jobs::created_at.asc()))
            .first::<Job>(conn)
            .optional()?;

        if let Some(job) = job_opt {
            diesel::update(jobs::table.find(&job.id))
                .set((
                    jobs::status.eq(STATUS_PROCESSING),
                    jobs::attempts.eq(job.attempts + 1),
                    jobs::updated_at.eq(now),
                ))
                .execute(conn)?;

            let refreshed = jobs::table.find(&job.id).first(conn)?;
            Ok::<Option<Job>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<Job>, diesel::result::Error>(None)
        }
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut SqliteConnection, job_id: &str) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut SqliteConnection,
    job_id: &str,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(next_run.naive_utc()),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_failed(
    conn: &mut SqliteConnection,
    job_id: &str,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Puts jobs left in `processing` by a crashed worker back in the queue, or
/// fails them once they have used up their attempts.
pub fn recover_stale_jobs(conn: &mut SqliteConnection) -> JobQueueResult<RecoveryReport> {
    let now = Utc::now().naive_utc();

    conn.immediate_transaction(|conn| {
        let requeued = diesel::update(
            jobs::table
                .filter(jobs::status.eq(STATUS_PROCESSING))
                .filter(jobs::attempts.lt(MAX_ATTEMPTS)),
        )
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(now),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;

        let failed = diesel::update(jobs::table.filter(jobs::status.eq(STATUS_PROCESSING)))
            .set((
                jobs::status.eq(STATUS_FAILED),
                jobs::last_error.eq(Some(INTERRUPTED_ERROR.to_string())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok::<RecoveryReport, diesel::result::Error>(RecoveryReport { requeued, failed })
    })
    .map_err(JobQueueError::from)
}

/// Moves every failed job back to `queued` with a fresh attempt budget.
pub fn requeue_failed_jobs(conn: &mut SqliteConnection) -> JobQueueResult<usize> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(jobs::table.filter(jobs::status.eq(STATUS_FAILED)))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::attempts.eq(0),
            jobs::run_after.eq(now),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(updated)
}

/// Deletes succeeded jobs last touched before `older_than`.
pub fn purge_succeeded_jobs(
    conn: &mut SqliteConnection,
    older_than: NaiveDateTime,
) -> JobQueueResult<usize> {
    let removed = diesel::delete(
        jobs::table
            .filter(jobs::status.eq(STATUS_SUCCEEDED))
            .filter(jobs::updated_at.lt(older_than)),
    )
    .execute(conn)?;
    Ok(removed)
}
