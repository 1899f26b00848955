use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;

use crate::error::ScrapeError;
use crate::sources::{SearchQuery, Source};

/// A named scrape job (`weekly_comprehensive`, `daily_incremental`). The
/// cadences share one pipeline; only this row's config differs.
#[derive(Debug, sqlx::FromRow)]
pub struct ScrapeJob {
    pub id: i32,
    pub name: String,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decoded shape of `scrape_jobs.config`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub sources: Vec<Source>,
    pub queries: Vec<SearchQuery>,
    #[serde(default)]
    pub fetch_details: bool,
    #[serde(default)]
    pub detail_limit: u32,
}

impl ScrapeJob {
    pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<ScrapeJob, ScrapeError> {
        sqlx::query_as::<_, ScrapeJob>("SELECT * FROM scrape_jobs WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ScrapeError::Config(format!("scrape job '{name}' not found")))
    }

    pub fn job_config(&self) -> Result<JobConfig, ScrapeError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| ScrapeError::Config(format!("invalid config for job '{}': {e}", self.name)))
    }

    pub async fn record_run(
        pool: &PgPool,
        name: &str,
        error: Option<&str>,
    ) -> Result<(), ScrapeError> {
        sqlx::query(
            "UPDATE scrape_jobs SET last_run_at = NOW(), last_error = $2, updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }
}
