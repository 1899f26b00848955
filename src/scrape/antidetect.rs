use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::sources::Pace;

/// One rotated browser identity: user-agent, viewport, optional upstream
/// proxy. Viewport and proxy ride along to whatever transport consumes the
/// identity; the plain HTTP fetcher only applies user-agent and proxy.
#[derive(Debug, Clone)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub proxy: Option<String>,
}

impl BrowserIdentity {
    fn fallback() -> Self {
        BrowserIdentity {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            viewport: (1920, 1080),
            proxy: None,
        }
    }
}

/// Pool of rotated identities. Draws are random but non-repeating until the
/// pool is exhausted (shuffled-deck order, reshuffled on wraparound).
pub struct IdentityPool {
    identities: Vec<BrowserIdentity>,
    deck: Mutex<Vec<usize>>,
}

impl IdentityPool {
    pub fn new(identities: Vec<BrowserIdentity>) -> Self {
        IdentityPool {
            identities,
            deck: Mutex::new(Vec::new()),
        }
    }

    /// Built-in identity set used when no pool is configured externally.
    pub fn builtin() -> Self {
        let uas = [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        ];
        let viewports = [(1920, 1080), (1536, 864), (1440, 900), (1366, 768), (2560, 1440)];
        let identities = uas
            .iter()
            .zip(viewports)
            .map(|(ua, viewport)| BrowserIdentity {
                user_agent: ua.to_string(),
                viewport,
                proxy: None,
            })
            .collect();
        Self::new(identities)
    }

    /// Next identity from the shuffled deck. An empty pool degrades to a
    /// single fixed identity with a warning; it never fails.
    pub fn next_identity(&self) -> BrowserIdentity {
        if self.identities.is_empty() {
            tracing::warn!("identity pool is empty, degrading to the default identity");
            return BrowserIdentity::fallback();
        }

        let mut deck = self.deck.lock().unwrap_or_else(|e| e.into_inner());
        if deck.is_empty() {
            *deck = (0..self.identities.len()).collect();
            deck.shuffle(&mut rand::rng());
        }
        let idx = deck.pop().unwrap_or(0);
        self.identities[idx].clone()
    }
}

/// Jittered delay bounds per pace class, in milliseconds.
pub fn delay_range(pace: Pace) -> (u64, u64) {
    match pace {
        Pace::Listing => (2_000, 5_000),
        Pace::Pagination => (5_000, 8_000),
        Pace::Strict => (8_000, 12_000),
    }
}

/// Randomized human-like pause before the next request. Uniform timing is a
/// detection signature, so every call draws fresh jitter.
pub fn politeness_delay(pace: Pace) -> Duration {
    let (lo, hi) = delay_range(pace);
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identities_do_not_repeat_within_a_cycle() {
        let pool = IdentityPool::builtin();
        let n = 5;
        let drawn: HashSet<String> = (0..n).map(|_| pool.next_identity().user_agent).collect();
        assert_eq!(drawn.len(), n, "each identity should appear once per cycle");
    }

    #[test]
    fn empty_pool_falls_back_to_default() {
        let pool = IdentityPool::new(Vec::new());
        let id = pool.next_identity();
        assert!(id.user_agent.contains("Mozilla"));
        let again = pool.next_identity();
        assert_eq!(id.user_agent, again.user_agent);
    }

    #[test]
    fn delays_stay_within_their_band() {
        for pace in [Pace::Listing, Pace::Pagination, Pace::Strict] {
            let (lo, hi) = delay_range(pace);
            for _ in 0..50 {
                let d = politeness_delay(pace).as_millis() as u64;
                assert!(d >= lo && d <= hi, "{d}ms outside {lo}..={hi}");
            }
        }
    }

    #[test]
    fn strict_band_is_slowest() {
        assert!(delay_range(Pace::Strict).0 > delay_range(Pace::Pagination).0);
        assert!(delay_range(Pace::Pagination).0 > delay_range(Pace::Listing).0);
    }
}
