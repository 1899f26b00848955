use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::ScrapeError;

/// Derived per-company aggregate, rebuilt wholesale from `listings` by the
/// `rebuild-aggregates` subcommand. The scrape pipeline never writes here.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CompanyStats {
    pub company_name: String,
    pub active_listings: i64,
    pub avg_salary_min: Option<i64>,
    pub avg_salary_max: Option<i64>,
    pub rebuilt_at: DateTime<Utc>,
}

impl CompanyStats {
    /// Truncate and rebuild the aggregate table. Returns the number of
    /// companies aggregated.
    pub async fn rebuild(pool: &PgPool) -> Result<u64, ScrapeError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM company_stats").execute(&mut *tx).await?;
        let inserted = sqlx::query(
            "INSERT INTO company_stats (company_name, active_listings, avg_salary_min, avg_salary_max, rebuilt_at)
             SELECT company_name, COUNT(*), AVG(salary_min)::BIGINT, AVG(salary_max)::BIGINT, NOW()
             FROM listings
             WHERE is_active
             GROUP BY company_name",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(inserted.rows_affected())
    }

    /// Largest employers by active listing count.
    pub async fn top(pool: &PgPool, limit: i64) -> Result<Vec<CompanyStats>, ScrapeError> {
        let rows = sqlx::query_as::<_, CompanyStats>(
            "SELECT * FROM company_stats ORDER BY active_listings DESC, company_name LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
