use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use sqlx::PgPool;

use crate::config::EngineSettings;
use crate::scrape::orchestrator;

pub const WEEKLY_JOB: &str = "weekly_comprehensive";
pub const DAILY_JOB: &str = "daily_incremental";

// Comprehensive sweep early Sunday morning; light incremental pass every
// morning. Local wall-clock times.
const WEEKLY_AT: (Weekday, u32, u32) = (Weekday::Sun, 2, 0);
const DAILY_AT: (u32, u32) = (6, 0);

/// Recurring trigger loop. A single loop fires at most one run at a time,
/// and the persisted run-lock rejects overlap across processes; a trigger
/// that lands while the previous run is still holding the lock is dropped,
/// never queued on top of it.
pub async fn run(pool: &PgPool, settings: &EngineSettings) -> anyhow::Result<()> {
    tracing::info!(
        "scheduler started (weekly {:?} {:02}:{:02}, daily {:02}:{:02})",
        WEEKLY_AT.0,
        WEEKLY_AT.1,
        WEEKLY_AT.2,
        DAILY_AT.0,
        DAILY_AT.1
    );

    loop {
        let now = Local::now().naive_local();
        let (job_name, fire_at) = next_trigger(now);
        let wait = (fire_at - now).to_std().unwrap_or_default();
        tracing::info!(job = job_name, at = %fire_at, "next trigger scheduled");

        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, exiting scheduler");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                match orchestrator::run_job(pool, settings, job_name).await {
                    Ok(Some(status)) => {
                        tracing::info!(job = job_name, status = status.as_str(), "scheduled run finished");
                    }
                    Ok(None) => {
                        tracing::warn!(job = job_name, "scheduled trigger rejected: run lock held");
                    }
                    Err(e) => {
                        // Scheduler errors are logged, never fatal: the loop
                        // must survive to the next trigger.
                        tracing::error!(job = job_name, error = %e, "scheduled run errored");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Next job to fire strictly after `now`, weekly winning ties.
pub fn next_trigger(now: NaiveDateTime) -> (&'static str, NaiveDateTime) {
    let weekly = next_weekly(now, WEEKLY_AT.0, WEEKLY_AT.1, WEEKLY_AT.2);
    let daily = next_daily(now, DAILY_AT.0, DAILY_AT.1);
    if weekly <= daily {
        (WEEKLY_JOB, weekly)
    } else {
        (DAILY_JOB, daily)
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
}

pub fn next_daily(after: NaiveDateTime, hour: u32, minute: u32) -> NaiveDateTime {
    let mut candidate = at(after.date(), hour, minute);
    if candidate <= after {
        candidate += ChronoDuration::days(1);
    }
    candidate
}

pub fn next_weekly(after: NaiveDateTime, weekday: Weekday, hour: u32, minute: u32) -> NaiveDateTime {
    let mut candidate = at(after.date(), hour, minute);
    while candidate.weekday() != weekday || candidate <= after {
        candidate += ChronoDuration::days(1);
    }
    candidate
}
