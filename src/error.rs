use crate::sources::Source;

/// Record-level rejection: the only two fields a listing cannot live without.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listing has no title")]
    MissingTitle,

    #[error("listing has no company name")]
    MissingCompany,
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// Page fetch exceeded its deadline. Transient, retried by the driver.
    #[error("fetch timed out: {url}")]
    FetchTimeout { url: String },

    /// Transport or HTTP-status failure. Transient, retried by the driver.
    #[error("fetch failed: {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Rate-limit or challenge signature in the response. Counts against the
    /// per-source challenge budget; repeated hits abort the source.
    #[error("anti-bot challenge from {source}")]
    AntiBotChallenge { source: Source },

    /// A non-empty page yielded no recognizable records. The site layout
    /// likely changed; aborts the source for this run.
    #[error("no records extracted from non-empty page: {url}")]
    StructuralExtraction { url: String },

    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("session error: {0}")]
    Session(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl ScrapeError {
    /// Whether the pagination driver should retry the page fetch.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::FetchTimeout { .. } | ScrapeError::Fetch { .. }
        )
    }
}
