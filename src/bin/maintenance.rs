use std::env;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;

use askdoc::{
    config::AppConfig,
    db,
    jobs::{self, STATUS_FAILED},
    models::Job,
    schema::jobs as jobs_table,
};

const USAGE: &str =
    "Usage: maintenance <recover-stale | requeue-failed | list-failed | purge-succeeded [days]>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("recover-stale") => recover_stale()?,
        Some("requeue-failed") => requeue_failed()?,
        Some("list-failed") => list_failed()?,
        Some("purge-succeeded") => {
            let days = match args.next() {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| anyhow!("days must be a whole number, got {raw}"))?,
                None => 7,
            };
            purge_succeeded(days)?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::SqlitePooledConnection> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_path = %config.database_path,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_path, 1)?;
    db::run_migrations(&pool)?;
    pool.get().context("failed to get database connection")
}

fn recover_stale() -> Result<()> {
    let mut conn = connect()?;
    let report = jobs::recover_stale_jobs(&mut conn).context("failed to recover jobs")?;
    println!(
        "Requeued {} interrupted jobs, failed {} that ran out of attempts.",
        report.requeued, report.failed
    );
    Ok(())
}

fn requeue_failed() -> Result<()> {
    let mut conn = connect()?;
    let count = jobs::requeue_failed_jobs(&mut conn).context("failed to requeue jobs")?;
    println!("Requeued {count} failed jobs.");
    Ok(())
}

fn list_failed() -> Result<()> {
    let mut conn = connect()?;
    let failed: Vec<Job> = jobs_table::table
        .filter(jobs_table::status.eq(STATUS_FAILED))
        .order(jobs_table::updated_at.desc())
        .load(&mut conn)
        .context("failed to load jobs")?;

    if failed.is_empty() {
        println!("No failed jobs.");
        return Ok(());
    }

    for job in &failed {
        println!(
            "{}\t{}\tattempts={}\t{}",
            job.id,
            job.job_type,
            job.attempts,
            job.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn purge_succeeded(days: i64) -> Result<()> {
    let mut conn = connect()?;
    let cutoff = (Utc::now() - Duration::days(days.max(0))).naive_utc();
    let removed = jobs::purge_succeeded_jobs(&mut conn, cutoff).context("failed to purge jobs")?;
    println!("Removed {removed} succeeded jobs older than {days} days.");
    Ok(())
}
