use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ScrapeError;

/// Persisted run-lock keyed by job name. Held for the duration of an
/// orchestration run; a crashed holder's lock times out and becomes
/// reclaimable, so a process restart cannot silently double-run.
#[derive(Debug)]
pub struct RunLock {
    pub job_name: String,
    pub holder: Uuid,
}

impl RunLock {
    /// Try to take the lock. Returns `None` when another live holder has
    /// it; an expired holder's row is taken over atomically.
    pub async fn acquire(
        pool: &PgPool,
        job_name: &str,
        ttl: Duration,
    ) -> Result<Option<RunLock>, ScrapeError> {
        let holder = Uuid::new_v4();
        let row: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO run_locks (job_name, holder, acquired_at, expires_at)
             VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3))
             ON CONFLICT (job_name) DO UPDATE
                 SET holder = EXCLUDED.holder,
                     acquired_at = NOW(),
                     expires_at = EXCLUDED.expires_at
                 WHERE run_locks.expires_at < NOW()
             RETURNING holder",
        )
        .bind(job_name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|_| RunLock {
            job_name: job_name.to_string(),
            holder,
        }))
    }

    /// Release the lock. Guarded on the holder id: a lock reclaimed after
    /// our crash-recovery timeout is never released by us.
    pub async fn release(&self, pool: &PgPool) -> Result<(), ScrapeError> {
        sqlx::query("DELETE FROM run_locks WHERE job_name = $1 AND holder = $2")
            .bind(&self.job_name)
            .bind(self.holder)
            .execute(pool)
            .await?;
        Ok(())
    }
}
