// Source adapters: one module per target site. Each adapter knows how to
// build search/detail requests and turn raw page payloads into candidate
// records; everything downstream of that is shared pipeline.

pub mod glassdoor;
pub mod mcf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::error::ScrapeError;
use crate::scrape::fetcher::{FetchedPage, PageFetch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Mcf,
    Glassdoor,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Mcf => "mcf",
            Source::Glassdoor => "glassdoor",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Source {}

impl std::str::FromStr for Source {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcf" => Ok(Source::Mcf),
            "glassdoor" => Ok(Source::Glassdoor),
            other => Err(ScrapeError::Config(format!("unknown source '{other}'"))),
        }
    }
}

/// Inter-request pacing class. Sources with tighter defenses get the
/// slower cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Listing-to-listing fetches (detail pages): 2-5s.
    Listing,
    /// Pagination steps on an ordinary source: 5-8s.
    Pagination,
    /// Pagination on a defended source: 8-12s.
    Strict,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceProfile {
    pub pace: Pace,
    pub default_page_limit: u32,
    pub requires_auth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalaryKind {
    /// Employer-listed figures.
    Actual,
    /// Site-modelled estimate.
    Estimated,
}

impl SalaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalaryKind::Actual => "actual",
            SalaryKind::Estimated => "estimated",
        }
    }
}

/// One search configuration from a scrape job's config JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub keywords: String,
    #[serde(default)]
    pub locations: Vec<String>,
    pub page_limit: Option<u32>,
}

/// Candidate record as extracted from a page, before validation.
/// Every field except the source job id is allowed to be missing; the
/// validator decides what is fatal.
#[derive(Debug, Clone, Default)]
pub struct RawListing {
    pub source_job_id: String,
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_text: Option<String>,
    pub salary_currency: Option<String>,
    pub employment_type: Option<String>,
    pub seniority_level: Option<String>,
    pub skills: Vec<String>,
    pub benefits: Vec<String>,
    pub posted_text: Option<String>,
    pub detail_url: Option<String>,
}

/// Long-text fields only available from a detail page.
#[derive(Debug, Clone, Default)]
pub struct DetailFields {
    pub description: Option<String>,
    pub requirements: Option<String>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn profile(&self) -> SourceProfile;

    /// Salary semantics for this source.
    fn salary_kind(&self) -> SalaryKind;

    /// URL of the given result page (0-based) for a search query.
    fn search_url(&self, query: &SearchQuery, page: u32) -> String;

    /// Extract candidate records from a listing page. An empty Vec means a
    /// recognizable no-results page; an unrecognizable payload is a
    /// `StructuralExtraction` error.
    fn extract_listings(&self, page: &FetchedPage) -> Result<Vec<RawListing>, ScrapeError>;

    /// Whether the page advertises a further result page.
    fn has_next_page(&self, page: &FetchedPage, page_index: u32) -> bool;

    /// URL of the detail page for a record, when the source has one.
    fn detail_url(&self, raw: &RawListing) -> Option<String>;

    fn extract_detail(&self, page: &FetchedPage) -> DetailFields;

    /// Acquire per-run session state (login). No-op for open sources.
    async fn open_session(
        &self,
        _fetcher: &dyn PageFetch,
        _settings: &EngineSettings,
    ) -> Result<(), ScrapeError> {
        Ok(())
    }

    /// Release session state. Must be called on both success and failure
    /// paths; never fatal.
    async fn close_session(&self, _fetcher: &dyn PageFetch) {}
}

pub fn adapter_for(source: Source) -> Box<dyn SourceAdapter> {
    match source {
        Source::Mcf => Box::new(mcf::McfAdapter),
        Source::Glassdoor => Box::new(glassdoor::GlassdoorAdapter),
    }
}
