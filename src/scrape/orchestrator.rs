use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::time::Instant;

use crate::config::EngineSettings;
use crate::error::ScrapeError;
use crate::models::listing::Listing;
use crate::models::run_lock::RunLock;
use crate::models::scrape_job::{JobConfig, ScrapeJob};
use crate::models::scrape_run::{RunStatus, ScrapeRun, SourceCounts};
use crate::scrape::antidetect::IdentityPool;
use crate::scrape::dedupe::dedupe;
use crate::scrape::fetcher::{HttpFetcher, PageFetch};
use crate::scrape::pagination::{self, DriveEnd, DriveParams};
use crate::scrape::ratelimit::RateLimiter;
use crate::scrape::validate::Validator;
use crate::sources::{Pace, Source, SourceAdapter, adapter_for};

/// How one source finished within a run.
enum SourceEnd {
    Complete,
    Partial,
    Failed(String),
}

struct SourceReport {
    counts: SourceCounts,
    end: SourceEnd,
}

/// Execute one named scrape job end to end. Returns `None` when another
/// run holds the job's lock (overlapping triggers are rejected, never run
/// concurrently). Source-level failures never propagate: the run always
/// finishes with a recorded status.
pub async fn run_job(
    pool: &PgPool,
    settings: &EngineSettings,
    job_name: &str,
) -> anyhow::Result<Option<RunStatus>> {
    let job = ScrapeJob::get_by_name(pool, job_name).await?;
    if !job.enabled {
        anyhow::bail!("scrape job '{job_name}' is disabled");
    }
    let cfg = job.job_config()?;

    let Some(lock) = RunLock::acquire(pool, job_name, settings.run_lock_ttl()).await? else {
        tracing::warn!(job = job_name, "another run holds the lock, rejecting trigger");
        return Ok(None);
    };

    let status = execute(pool, settings, job_name, &cfg).await;
    if let Err(e) = lock.release(pool).await {
        tracing::warn!(job = job_name, error = %e, "failed to release run lock");
    }
    Ok(Some(status?))
}

async fn execute(
    pool: &PgPool,
    settings: &EngineSettings,
    job_name: &str,
    cfg: &JobConfig,
) -> anyhow::Result<RunStatus> {
    let run = ScrapeRun::begin(pool, job_name).await?;
    tracing::info!(
        job = job_name,
        run_id = run.id,
        sources = cfg.sources.len(),
        queries = cfg.queries.len(),
        "scrape run started"
    );

    let limiter = Arc::new(RateLimiter::new(settings));
    let identities = IdentityPool::builtin();
    let validator = Validator::new();
    let deadline = Instant::now() + settings.run_budget();

    let mut counts: BTreeMap<Source, SourceCounts> = BTreeMap::new();
    let mut ends = Vec::with_capacity(cfg.sources.len());
    let mut failures = Vec::new();

    // Sources run sequentially: one browser identity at a time, and the
    // aggregate request rate stays predictable.
    for &source in &cfg.sources {
        if Instant::now() >= deadline {
            tracing::warn!(job = job_name, source = %source, "wall-clock budget exhausted, source not started");
            failures.push(format!("{source}: not started, wall-clock budget exhausted"));
            counts.insert(source, SourceCounts::default());
            ends.push(SourceEnd::Failed("budget exhausted".to_string()));
            continue;
        }

        let report = scrape_source(
            pool,
            settings,
            &limiter,
            &identities,
            &validator,
            source,
            cfg,
            run.started_at,
            deadline,
        )
        .await;

        match &report.end {
            SourceEnd::Complete => {}
            SourceEnd::Partial => failures.push(format!("{source}: partial")),
            SourceEnd::Failed(reason) => failures.push(format!("{source}: {reason}")),
        }
        counts.insert(source, report.counts);
        ends.push(report.end);
    }

    let status = overall_status(&ends);
    let error_summary = (!failures.is_empty()).then(|| failures.join("; "));

    if let Err(e) =
        ScrapeRun::finalize(pool, run.id, status, &counts, error_summary.as_deref()).await
    {
        tracing::error!(run_id = run.id, error = %e, "failed to finalize run record");
    }
    if let Err(e) = ScrapeJob::record_run(pool, job_name, error_summary.as_deref()).await {
        tracing::warn!(job = job_name, error = %e, "failed to update job record");
    }

    tracing::info!(
        job = job_name,
        run_id = run.id,
        status = status.as_str(),
        "scrape run finished"
    );
    Ok(status)
}

fn overall_status(ends: &[SourceEnd]) -> RunStatus {
    let completed = ends
        .iter()
        .filter(|e| matches!(e, SourceEnd::Complete))
        .count();
    let failed = ends
        .iter()
        .filter(|e| matches!(e, SourceEnd::Failed(_)))
        .count();

    if completed == ends.len() {
        RunStatus::Completed
    } else if failed == ends.len() && !ends.is_empty() {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    }
}

#[allow(clippy::too_many_arguments)]
async fn scrape_source(
    pool: &PgPool,
    settings: &EngineSettings,
    limiter: &Arc<RateLimiter>,
    identities: &IdentityPool,
    validator: &Validator,
    source: Source,
    cfg: &JobConfig,
    run_started_at: DateTime<Utc>,
    deadline: Instant,
) -> SourceReport {
    let adapter = adapter_for(source);
    let mut counts = SourceCounts::default();

    let identity = identities.next_identity();
    let fetcher = match HttpFetcher::new(source, &identity, settings, Arc::clone(limiter)) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(source = %source, error = %e, "failed to build source session");
            return SourceReport {
                counts,
                end: SourceEnd::Failed(e.to_string()),
            };
        }
    };

    // Session state is scoped to this source within this run: acquired
    // here, released below on every path.
    if adapter.profile().requires_auth
        && let Err(e) = adapter.open_session(&fetcher, settings).await
    {
        tracing::error!(source = %source, error = %e, "session open failed");
        adapter.close_session(&fetcher).await;
        return SourceReport {
            counts,
            end: SourceEnd::Failed(format!("session: {e}")),
        };
    }

    let end = scrape_queries(
        pool,
        settings,
        adapter.as_ref(),
        &fetcher,
        validator,
        cfg,
        &mut counts,
        deadline,
    )
    .await;

    adapter.close_session(&fetcher).await;

    // Soft expiry only after a clean pass: an aborted source must not
    // expire listings it simply failed to re-fetch.
    if matches!(end, SourceEnd::Complete) {
        match Listing::mark_unseen(pool, source, run_started_at, settings.expiry_miss_threshold)
            .await
        {
            Ok(expired) => {
                counts.expired = expired;
                if expired > 0 {
                    tracing::info!(source = %source, expired, "soft-expired unseen listings");
                }
            }
            Err(e) => {
                counts.errors += 1;
                tracing::warn!(source = %source, error = %e, "soft expiry failed");
            }
        }
    }

    SourceReport { counts, end }
}

#[allow(clippy::too_many_arguments)]
async fn scrape_queries(
    pool: &PgPool,
    settings: &EngineSettings,
    adapter: &dyn SourceAdapter,
    fetcher: &HttpFetcher,
    validator: &Validator,
    cfg: &JobConfig,
    counts: &mut SourceCounts,
    deadline: Instant,
) -> SourceEnd {
    let source = adapter.source();
    let profile = adapter.profile();
    let mut challenges_used: u32 = 0;
    let mut any_partial = false;
    let mut detail_budget = if cfg.fetch_details { cfg.detail_limit } else { 0 };

    for query in &cfg.queries {
        if Instant::now() >= deadline {
            tracing::warn!(source = %source, "wall-clock budget exhausted mid-source");
            any_partial = true;
            break;
        }

        let params = DriveParams {
            query,
            page_limit: query.page_limit.unwrap_or(profile.default_page_limit),
            retries: settings.page_retries,
            backoff_ms: settings.retry_backoff_ms,
            challenge_budget: settings.challenge_limit.saturating_sub(challenges_used),
        };
        let outcome = pagination::drive(adapter, fetcher, params).await;
        challenges_used += outcome.challenges;
        counts.fetched += outcome.records.len() as u64;

        let now = Utc::now();
        let mut valid = Vec::with_capacity(outcome.records.len());
        for mut raw in outcome.records {
            raw.detail_url = adapter.detail_url(&raw);
            match validator.validate(source, adapter.salary_kind(), raw, now) {
                Ok(listing) => valid.push(listing),
                Err(e) => {
                    counts.errors += 1;
                    tracing::debug!(source = %source, error = %e, "record dropped by validation");
                }
            }
        }
        counts.validated += valid.len() as u64;

        let batch = dedupe(valid);
        counts.deduped += batch.len() as u64;

        // Per-record persistence failures are isolated: count, log, move on.
        let mut fresh = Vec::new();
        for record in &batch {
            match Listing::upsert(pool, record).await {
                Ok((listing, true)) => {
                    counts.stored_new += 1;
                    fresh.push((listing.id, record.detail_url.clone()));
                }
                Ok((_, false)) => counts.stored_updated += 1,
                Err(e) => {
                    counts.errors += 1;
                    tracing::warn!(
                        source = %source,
                        source_job_id = %record.source_job_id,
                        error = %e,
                        "failed to persist record"
                    );
                }
            }
        }

        for (id, detail_url) in fresh {
            if detail_budget == 0 {
                break;
            }
            let Some(url) = detail_url else { continue };
            detail_budget -= 1;
            match fetch_detail(adapter, fetcher, pool, id, &url).await {
                Ok(()) => {}
                Err(challenged) => {
                    counts.errors += 1;
                    if challenged {
                        challenges_used += 1;
                    }
                }
            }
        }

        match outcome.end {
            DriveEnd::Complete => {}
            DriveEnd::Partial => any_partial = true,
            DriveEnd::Structural { url } => {
                return SourceEnd::Failed(format!("structural extraction failure at {url}"));
            }
            DriveEnd::ChallengeAborted => {
                return SourceEnd::Failed("anti-bot challenge limit reached".to_string());
            }
        }
        if challenges_used >= settings.challenge_limit {
            return SourceEnd::Failed("anti-bot challenge limit reached".to_string());
        }
    }

    if any_partial {
        SourceEnd::Partial
    } else {
        SourceEnd::Complete
    }
}

/// Fetch and attach one detail page. Returns Err(true) when the failure
/// was a challenge signal.
async fn fetch_detail(
    adapter: &dyn SourceAdapter,
    fetcher: &HttpFetcher,
    pool: &PgPool,
    id: i32,
    url: &str,
) -> Result<(), bool> {
    match fetcher.fetch(url, Pace::Listing).await {
        Ok(page) => {
            let detail = adapter.extract_detail(&page);
            if let Err(e) = Listing::set_detail(pool, id, &detail).await {
                tracing::warn!(id, error = %e, "failed to store detail fields");
                return Err(false);
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "detail fetch failed");
            Err(matches!(e, ScrapeError::AntiBotChallenge { .. }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_sources_complete_means_completed() {
        let ends = vec![SourceEnd::Complete, SourceEnd::Complete];
        assert_eq!(overall_status(&ends), RunStatus::Completed);
    }

    #[test]
    fn mixed_outcomes_mean_partial() {
        let ends = vec![SourceEnd::Complete, SourceEnd::Failed("layout changed".into())];
        assert_eq!(overall_status(&ends), RunStatus::Partial);
        let ends = vec![SourceEnd::Partial, SourceEnd::Complete];
        assert_eq!(overall_status(&ends), RunStatus::Partial);
    }

    #[test]
    fn all_sources_failed_means_failed() {
        let ends = vec![
            SourceEnd::Failed("a".into()),
            SourceEnd::Failed("b".into()),
        ];
        assert_eq!(overall_status(&ends), RunStatus::Failed);
    }
}
