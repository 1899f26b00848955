use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::EngineSettings;
use crate::sources::Source;

/// Token bucket for one source. Time comes from `tokio::time::Instant` so a
/// paused test clock drives refill deterministically.
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
}

impl Bucket {
    fn new(requests_per_minute: u32) -> Self {
        Bucket {
            // Starts empty: a fresh bucket must not grant a burst above the
            // configured per-minute ceiling.
            tokens: 0.0,
            capacity: 1.0,
            refill_per_sec: f64::from(requests_per_minute) / 60.0,
            last_refill: Instant::now(),
            cooldown_until: None,
        }
    }

    fn effective_rate(&self, now: Instant) -> f64 {
        match self.cooldown_until {
            Some(until) if now < until => self.refill_per_sec / 2.0,
            _ => self.refill_per_sec,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.effective_rate(now)).min(self.capacity);
        self.last_refill = now;
        if self.cooldown_until.is_some_and(|until| now >= until) {
            self.cooldown_until = None;
        }
    }

    /// Take one token if available, else the wait until one accrues.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(deficit / self.effective_rate(now)))
    }
}

/// Per-source request budgets. `acquire` blocks the caller until the
/// source's bucket permits another request; the effective rate never
/// exceeds the configured ceiling even under concurrent callers, because
/// every take goes through the same mutex-guarded bucket.
pub struct RateLimiter {
    buckets: Mutex<HashMap<Source, Bucket>>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(settings: &EngineSettings) -> Self {
        Self::with_rates(
            &[
                (Source::Mcf, settings.mcf_rpm),
                (Source::Glassdoor, settings.glassdoor_rpm),
            ],
            settings.throttle_cooldown(),
        )
    }

    pub fn with_rates(rates: &[(Source, u32)], cooldown: Duration) -> Self {
        let buckets = rates
            .iter()
            .map(|&(source, rpm)| (source, Bucket::new(rpm)))
            .collect();
        RateLimiter {
            buckets: Mutex::new(buckets),
            cooldown,
        }
    }

    /// Block until the source's budget permits another request.
    pub async fn acquire(&self, source: Source) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(source)
                    .or_insert_with(|| Bucket::new(DEFAULT_RPM));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// The target answered with a rate-limit or challenge signal: drain the
    /// bucket and halve its refill rate for the cool-down window.
    pub async fn report_throttled(&self, source: Source) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(source)
            .or_insert_with(|| Bucket::new(DEFAULT_RPM));
        let now = Instant::now();
        bucket.refill(now);
        bucket.tokens = 0.0;
        bucket.cooldown_until = Some(now + self.cooldown);
        tracing::warn!(
            source = %source,
            cooldown_secs = self.cooldown.as_secs(),
            "throttle signal received, halving refill rate"
        );
    }
}

/// Budget for a source nobody configured. Conservative on purpose.
const DEFAULT_RPM: u32 = 10;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter(rpm: u32) -> RateLimiter {
        RateLimiter::with_rates(&[(Source::Mcf, rpm)], Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_concurrent_callers_never_exceed_the_ceiling() {
        let limiter = Arc::new(limiter(30));
        let grants = Arc::new(AtomicU32::new(0));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let grants = Arc::clone(&grants);
            workers.push(tokio::spawn(async move {
                let start = Instant::now();
                loop {
                    limiter.acquire(Source::Mcf).await;
                    if start.elapsed() >= Duration::from_secs(60) {
                        break;
                    }
                    grants.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for w in workers {
            w.await.unwrap();
        }

        let granted = grants.load(Ordering::SeqCst);
        assert!(granted <= 30, "granted {granted} requests in one minute, ceiling is 30");
        assert!(granted >= 25, "limiter starved its callers: only {granted} grants");
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_report_halves_the_refill_rate() {
        let limiter = limiter(60);

        // Warm through one grant so the bucket is empty either way.
        limiter.acquire(Source::Mcf).await;
        limiter.report_throttled(Source::Mcf).await;

        // At 60 rpm a token accrues each second; halved it takes two.
        let start = Instant::now();
        limiter.acquire(Source::Mcf).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1900), "waited only {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires_and_rate_recovers() {
        let limiter = RateLimiter::with_rates(&[(Source::Mcf, 60)], Duration::from_secs(2));
        limiter.report_throttled(Source::Mcf).await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        // Past the cool-down the full rate applies again and tokens have
        // accrued in the meantime.
        let start = Instant::now();
        limiter.acquire(Source::Mcf).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn sources_have_independent_budgets() {
        let limiter = RateLimiter::with_rates(
            &[(Source::Mcf, 60), (Source::Glassdoor, 60)],
            Duration::from_secs(300),
        );
        limiter.report_throttled(Source::Glassdoor).await;

        tokio::time::sleep(Duration::from_secs(1)).await;

        // MCF is unaffected by Glassdoor's throttle.
        let start = Instant::now();
        limiter.acquire(Source::Mcf).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
