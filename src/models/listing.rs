use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Row};

use crate::error::ScrapeError;
use crate::sources::{DetailFields, SalaryKind, Source};

/// A stored job listing. `(source, source_job_id)` is the natural key;
/// re-ingesting the same listing updates mutable fields and advances
/// `last_seen_at`, never creating a second row.
#[derive(Debug, Serialize, FromRow)]
pub struct Listing {
    pub id: i32,
    pub source: String,
    pub source_job_id: String,
    pub title: String,
    pub company_name: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub salary_type: String,
    pub has_salary_data: bool,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub seniority_level: Option<String>,
    pub skills: Vec<String>,
    pub benefits: Vec<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_active: bool,
    pub unseen_runs: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated record ready for persistence.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub source: Source,
    pub source_job_id: String,
    pub title: String,
    pub company_name: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub salary_type: SalaryKind,
    pub has_salary_data: bool,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub seniority_level: Option<String>,
    pub skills: Vec<String>,
    pub benefits: Vec<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Where to fetch long-text fields from; not persisted itself.
    pub detail_url: Option<String>,
}

impl Listing {
    /// Insert or update by natural key. `scraped_at` is preserved on
    /// update; `posted_at` only moves forward to a known value. Returns the
    /// row and whether it was newly inserted.
    pub async fn upsert(pool: &PgPool, input: &NewListing) -> Result<(Listing, bool), ScrapeError> {
        let row = sqlx::query(
            "INSERT INTO listings (source, source_job_id, title, company_name, salary_min, salary_max, salary_currency, salary_type, has_salary_data, location, employment_type, seniority_level, skills, benefits, posted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (source, source_job_id) DO UPDATE SET
                 title = EXCLUDED.title,
                 company_name = EXCLUDED.company_name,
                 salary_min = EXCLUDED.salary_min,
                 salary_max = EXCLUDED.salary_max,
                 salary_currency = EXCLUDED.salary_currency,
                 salary_type = EXCLUDED.salary_type,
                 has_salary_data = EXCLUDED.has_salary_data,
                 location = EXCLUDED.location,
                 employment_type = EXCLUDED.employment_type,
                 seniority_level = EXCLUDED.seniority_level,
                 skills = EXCLUDED.skills,
                 benefits = EXCLUDED.benefits,
                 posted_at = COALESCE(EXCLUDED.posted_at, listings.posted_at),
                 is_active = TRUE,
                 unseen_runs = 0,
                 last_seen_at = NOW(),
                 updated_at = NOW()
             RETURNING *, (xmax = 0) AS inserted",
        )
        .bind(input.source.as_str())
        .bind(&input.source_job_id)
        .bind(&input.title)
        .bind(&input.company_name)
        .bind(input.salary_min)
        .bind(input.salary_max)
        .bind(&input.salary_currency)
        .bind(input.salary_type.as_str())
        .bind(input.has_salary_data)
        .bind(&input.location)
        .bind(&input.employment_type)
        .bind(&input.seniority_level)
        .bind(&input.skills)
        .bind(&input.benefits)
        .bind(input.posted_at)
        .fetch_one(pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        let listing = Listing::from_row(&row)?;
        Ok((listing, inserted))
    }

    /// Attach detail-page fields to an existing row.
    pub async fn set_detail(
        pool: &PgPool,
        id: i32,
        detail: &DetailFields,
    ) -> Result<(), ScrapeError> {
        sqlx::query(
            "UPDATE listings SET description = COALESCE($2, description), requirements = COALESCE($3, requirements), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(&detail.description)
        .bind(&detail.requirements)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Soft expiry after a clean source run: every active listing for the
    /// source not seen this run accrues one miss; listings at the miss
    /// threshold are flagged inactive. Nothing is ever deleted. Returns the
    /// number of listings flipped inactive.
    pub async fn mark_unseen(
        pool: &PgPool,
        source: Source,
        run_started_at: DateTime<Utc>,
        miss_threshold: i32,
    ) -> Result<u64, ScrapeError> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            "UPDATE listings SET unseen_runs = unseen_runs + 1, updated_at = NOW() WHERE source = $1 AND is_active AND last_seen_at < $2",
        )
        .bind(source.as_str())
        .bind(run_started_at)
        .execute(&mut *tx)
        .await?;

        let expired = sqlx::query(
            "UPDATE listings SET is_active = FALSE, updated_at = NOW() WHERE source = $1 AND is_active AND unseen_runs >= $2",
        )
        .bind(source.as_str())
        .bind(miss_threshold)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(expired.rows_affected())
    }
}
