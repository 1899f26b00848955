use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::ScrapeError;
use crate::sources::Source;

/// Per-source outcome counters for one run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SourceCounts {
    pub fetched: u64,
    pub validated: u64,
    pub deduped: u64,
    pub stored_new: u64,
    pub stored_updated: u64,
    pub expired: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every configured source was exhausted cleanly.
    Completed,
    /// Some sources succeeded; others failed, were aborted, or were never
    /// started before the wall-clock budget ran out.
    Partial,
    /// No source succeeded.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Audit record of one scrape run. Opened at run start, finalized exactly
/// once at run end, immutable afterwards.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ScrapeRun {
    pub id: i32,
    pub job_name: String,
    pub status: String,
    pub source_counts: serde_json::Value,
    pub error_summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ScrapeRun {
    pub async fn begin(pool: &PgPool, job_name: &str) -> Result<ScrapeRun, ScrapeError> {
        let run = sqlx::query_as::<_, ScrapeRun>(
            "INSERT INTO scrape_runs (job_name) VALUES ($1) RETURNING *",
        )
        .bind(job_name)
        .fetch_one(pool)
        .await?;
        Ok(run)
    }

    /// Close the run with its final status and counters. Guarded on
    /// `status = 'running'` so a finalized run can never be rewritten.
    pub async fn finalize(
        pool: &PgPool,
        id: i32,
        status: RunStatus,
        counts: &BTreeMap<Source, SourceCounts>,
        error_summary: Option<&str>,
    ) -> Result<(), ScrapeError> {
        let counts_json = serde_json::to_value(
            counts
                .iter()
                .map(|(source, c)| (source.as_str().to_string(), c.clone()))
                .collect::<BTreeMap<String, SourceCounts>>(),
        )
        .unwrap_or_else(|_| serde_json::json!({}));

        sqlx::query(
            "UPDATE scrape_runs
             SET status = $2,
                 source_counts = $3,
                 error_summary = $4,
                 finished_at = NOW(),
                 duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(counts_json)
        .bind(error_summary)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Recent runs, optionally filtered by job name.
    pub async fn recent(
        pool: &PgPool,
        job_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ScrapeRun>, ScrapeError> {
        let runs = sqlx::query_as::<_, ScrapeRun>(
            "SELECT * FROM scrape_runs WHERE ($1::text IS NULL OR job_name = $1) ORDER BY started_at DESC LIMIT $2",
        )
        .bind(job_name)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(runs)
    }
}
