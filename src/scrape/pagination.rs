use std::time::Duration;

use crate::error::ScrapeError;
use crate::scrape::fetcher::{FetchedPage, PageFetch};
use crate::sources::{RawListing, SearchQuery, SourceAdapter};

/// Knobs for one (source, query) drive. Retry counts and challenge budgets
/// come from configuration, never constants.
pub struct DriveParams<'a> {
    pub query: &'a SearchQuery,
    pub page_limit: u32,
    pub retries: u32,
    pub backoff_ms: u64,
    /// Challenges this drive may absorb before the source must be aborted.
    pub challenge_budget: u32,
}

/// How the drive reached `Exhausted`.
#[derive(Debug, PartialEq, Eq)]
pub enum DriveEnd {
    /// Every reachable page was fetched and extracted.
    Complete,
    /// Fetch retries ran out on some page; earlier pages were kept.
    Partial,
    /// A non-empty page yielded no recognizable records. Site layout likely
    /// changed; the whole source must be aborted for this run.
    Structural { url: String },
    /// The challenge budget ran out.
    ChallengeAborted,
}

pub struct DriveOutcome {
    pub records: Vec<RawListing>,
    pub pages_fetched: u32,
    pub challenges: u32,
    pub end: DriveEnd,
}

impl DriveOutcome {
    pub fn complete(&self) -> bool {
        self.end == DriveEnd::Complete
    }

    /// Whether the source as a whole should stop after this query.
    pub fn aborts_source(&self) -> bool {
        matches!(self.end, DriveEnd::Structural { .. } | DriveEnd::ChallengeAborted)
    }
}

enum State {
    Start,
    FetchingPage { page: u32 },
    ExtractingRecords { page: u32, fetched: FetchedPage },
    HasNextPage { page: u32 },
    Exhausted,
}

/// Drive one search query through its result pages:
/// `Start -> FetchingPage -> ExtractingRecords -> {HasNextPage -> FetchingPage | Exhausted}`.
/// Page fetches within a drive are sequential by construction; the next
/// page's existence is only known after the current page is extracted.
pub async fn drive(
    adapter: &dyn SourceAdapter,
    fetcher: &dyn PageFetch,
    params: DriveParams<'_>,
) -> DriveOutcome {
    let mut out = DriveOutcome {
        records: Vec::new(),
        pages_fetched: 0,
        challenges: 0,
        end: DriveEnd::Complete,
    };
    let mut state = State::Start;

    loop {
        state = match state {
            State::Start => State::FetchingPage { page: 0 },

            State::FetchingPage { page } => {
                let url = adapter.search_url(params.query, page);
                match fetch_with_retry(adapter, fetcher, &url, &params, &mut out).await {
                    Ok(fetched) => State::ExtractingRecords { page, fetched },
                    Err(end) => {
                        out.end = end;
                        State::Exhausted
                    }
                }
            }

            State::ExtractingRecords { page, fetched } => match adapter.extract_listings(&fetched) {
                Ok(records) => {
                    out.pages_fetched += 1;
                    tracing::debug!(
                        source = %adapter.source(),
                        page,
                        records = records.len(),
                        "page extracted"
                    );
                    let empty = records.is_empty();
                    out.records.extend(records);

                    if empty || out.pages_fetched >= params.page_limit {
                        State::Exhausted
                    } else if adapter.has_next_page(&fetched, page) {
                        State::HasNextPage { page }
                    } else {
                        State::Exhausted
                    }
                }
                Err(ScrapeError::StructuralExtraction { url }) => {
                    tracing::error!(
                        source = %adapter.source(),
                        url = %url,
                        "structural extraction failure, aborting source"
                    );
                    out.end = DriveEnd::Structural { url };
                    State::Exhausted
                }
                Err(e) => {
                    tracing::warn!(source = %adapter.source(), error = %e, "extraction failed");
                    out.end = DriveEnd::Partial;
                    State::Exhausted
                }
            },

            State::HasNextPage { page } => State::FetchingPage { page: page + 1 },

            State::Exhausted => break,
        };
    }

    out
}

/// Fetch one page with bounded retries and exponential backoff. Challenges
/// count against the drive's budget and also burn a retry attempt.
async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    fetcher: &dyn PageFetch,
    url: &str,
    params: &DriveParams<'_>,
    out: &mut DriveOutcome,
) -> Result<FetchedPage, DriveEnd> {
    let pace = adapter.profile().pace;
    for attempt in 0..=params.retries {
        match fetcher.fetch(url, pace).await {
            Ok(page) => return Ok(page),
            Err(ScrapeError::AntiBotChallenge { source }) => {
                out.challenges += 1;
                tracing::warn!(
                    source = %source,
                    url,
                    challenges = out.challenges,
                    budget = params.challenge_budget,
                    "anti-bot challenge"
                );
                if out.challenges >= params.challenge_budget {
                    return Err(DriveEnd::ChallengeAborted);
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(url, attempt, error = %e, "page fetch failed");
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "page fetch failed, not retrying");
                return Err(DriveEnd::Partial);
            }
        }
        if attempt < params.retries {
            tokio::time::sleep(Duration::from_millis(params.backoff_ms << attempt)).await;
        }
    }
    Err(DriveEnd::Partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::sources::{
        DetailFields, Pace, SalaryKind, Source, SourceProfile,
    };

    /// Three pages of ten records each, served from "mock://search?page=N".
    struct FakeAdapter {
        pages: u32,
        structural_on: Option<u32>,
    }

    impl FakeAdapter {
        fn three_pages() -> Self {
            FakeAdapter { pages: 3, structural_on: None }
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source(&self) -> Source {
            Source::Mcf
        }

        fn profile(&self) -> SourceProfile {
            SourceProfile {
                pace: Pace::Pagination,
                default_page_limit: 10,
                requires_auth: false,
            }
        }

        fn salary_kind(&self) -> SalaryKind {
            SalaryKind::Actual
        }

        fn search_url(&self, _query: &SearchQuery, page: u32) -> String {
            format!("mock://search?page={page}")
        }

        fn extract_listings(&self, page: &FetchedPage) -> Result<Vec<RawListing>, ScrapeError> {
            let n: u32 = page.body.parse().unwrap();
            if self.structural_on == Some(n) {
                return Err(ScrapeError::StructuralExtraction { url: page.url.clone() });
            }
            Ok((0..10)
                .map(|i| RawListing {
                    source_job_id: format!("p{n}-{i}"),
                    title: Some("Engineer".to_string()),
                    company_name: Some("Acme".to_string()),
                    ..Default::default()
                })
                .collect())
        }

        fn has_next_page(&self, page: &FetchedPage, _page_index: u32) -> bool {
            let n: u32 = page.body.parse().unwrap();
            n + 1 < self.pages
        }

        fn detail_url(&self, _raw: &RawListing) -> Option<String> {
            None
        }

        fn extract_detail(&self, _page: &FetchedPage) -> DetailFields {
            DetailFields::default()
        }
    }

    /// Serves the page number as the body. The first `failures` fetches and
    /// every fetch from `fail_from` onward return a scripted error.
    struct FakeFetcher {
        failures: u32,
        fail_from: u32,
        attempts: AtomicU32,
        challenge: bool,
    }

    impl FakeFetcher {
        fn reliable() -> Self {
            FakeFetcher {
                failures: 0,
                fail_from: u32::MAX,
                attempts: AtomicU32::new(0),
                challenge: false,
            }
        }

        fn flaky(failures: u32) -> Self {
            FakeFetcher { failures, ..Self::reliable() }
        }

        fn failing_from(fail_from: u32) -> Self {
            FakeFetcher { fail_from, ..Self::reliable() }
        }

        fn challenging() -> Self {
            FakeFetcher { failures: u32::MAX, challenge: true, ..Self::reliable() }
        }
    }

    #[async_trait]
    impl PageFetch for FakeFetcher {
        async fn fetch(&self, url: &str, _pace: Pace) -> Result<FetchedPage, ScrapeError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures || n >= self.fail_from {
                if self.challenge {
                    return Err(ScrapeError::AntiBotChallenge { source: Source::Mcf });
                }
                return Err(ScrapeError::FetchTimeout { url: url.to_string() });
            }
            let page = url.rsplit('=').next().unwrap().to_string();
            Ok(FetchedPage { url: url.to_string(), status: 200, body: page })
        }
    }

    fn query() -> SearchQuery {
        SearchQuery {
            keywords: "engineer".to_string(),
            locations: Vec::new(),
            page_limit: None,
        }
    }

    fn params(query: &SearchQuery, page_limit: u32) -> DriveParams<'_> {
        DriveParams {
            query,
            page_limit,
            retries: 3,
            backoff_ms: 1,
            challenge_budget: 3,
        }
    }

    #[tokio::test]
    async fn three_pages_terminate_with_all_records() {
        let adapter = FakeAdapter::three_pages();
        let fetcher = FakeFetcher::reliable();
        let q = query();

        let out = drive(&adapter, &fetcher, params(&q, 10)).await;
        assert_eq!(out.records.len(), 30);
        assert_eq!(out.pages_fetched, 3);
        assert!(out.complete());
    }

    #[tokio::test]
    async fn page_limit_forces_exhaustion() {
        let adapter = FakeAdapter::three_pages();
        let fetcher = FakeFetcher::reliable();
        let q = query();

        let out = drive(&adapter, &fetcher, params(&q, 2)).await;
        assert_eq!(out.records.len(), 20);
        assert!(out.complete());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_through() {
        let adapter = FakeAdapter::three_pages();
        let fetcher = FakeFetcher::flaky(2);
        let q = query();

        let out = drive(&adapter, &fetcher, params(&q, 10)).await;
        assert_eq!(out.records.len(), 30);
        assert!(out.complete());
    }

    #[tokio::test]
    async fn retry_exhaustion_keeps_earlier_pages() {
        let adapter = FakeAdapter::three_pages();
        // Page 0 succeeds, then every attempt on page 1 fails.
        let fetcher = FakeFetcher::failing_from(1);
        let q = query();

        let out = drive(&adapter, &fetcher, params(&q, 10)).await;
        assert_eq!(out.records.len(), 10);
        assert_eq!(out.end, DriveEnd::Partial);
        assert!(!out.aborts_source());
    }

    #[tokio::test]
    async fn structural_failure_aborts_the_source() {
        let adapter = FakeAdapter { pages: 3, structural_on: Some(1) };
        let fetcher = FakeFetcher::reliable();
        let q = query();

        let out = drive(&adapter, &fetcher, params(&q, 10)).await;
        assert_eq!(out.records.len(), 10, "page 0 records are kept");
        assert!(matches!(out.end, DriveEnd::Structural { .. }));
        assert!(out.aborts_source());
    }

    #[tokio::test]
    async fn challenge_budget_exhaustion_aborts_the_source() {
        let adapter = FakeAdapter::three_pages();
        let fetcher = FakeFetcher::challenging();
        let q = query();

        let out = drive(&adapter, &fetcher, params(&q, 10)).await;
        assert_eq!(out.end, DriveEnd::ChallengeAborted);
        assert_eq!(out.challenges, 3);
        assert!(out.aborts_source());
    }
}
