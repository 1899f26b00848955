use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobharvest", about = "Scheduled job-listing scraping engine")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    #[command(flatten)]
    pub engine: EngineSettings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the recurring scheduler (weekly + daily cadences)
    Schedule,
    /// Trigger one named scrape job immediately
    Run {
        /// Job name (must match a row in the scrape_jobs table)
        #[arg(long)]
        job: String,
    },
    /// Rebuild the derived per-company aggregate table
    RebuildAggregates,
    /// Print recent scrape runs as JSON
    Runs {
        /// Filter by job name
        #[arg(long)]
        job: Option<String>,

        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Operational tunables for the scrape pipeline. The retry/cool-down numbers
/// are deliberately configuration, not constants: they get re-tuned whenever
/// a target site changes its defenses.
#[derive(clap::Args, Debug, Clone)]
pub struct EngineSettings {
    /// Per-page fetch timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "15")]
    pub fetch_timeout_secs: u64,

    /// Fetch retries per page before giving up on the query
    #[arg(long, env = "PAGE_RETRIES", default_value = "3")]
    pub page_retries: u32,

    /// Base backoff between page retries, in milliseconds (doubles per attempt)
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "2000")]
    pub retry_backoff_ms: u64,

    /// Anti-bot challenges tolerated per source per run before aborting it
    #[arg(long, env = "CHALLENGE_LIMIT", default_value = "3")]
    pub challenge_limit: u32,

    /// Cool-down window after a throttle signal, in seconds
    #[arg(long, env = "THROTTLE_COOLDOWN_SECS", default_value = "300")]
    pub throttle_cooldown_secs: u64,

    /// MCF request budget, requests per minute
    #[arg(long, env = "MCF_RPM", default_value = "50")]
    pub mcf_rpm: u32,

    /// Glassdoor request budget, requests per minute
    #[arg(long, env = "GLASSDOOR_RPM", default_value = "20")]
    pub glassdoor_rpm: u32,

    /// Wall-clock budget for a whole run, in minutes
    #[arg(long, env = "RUN_BUDGET_MINS", default_value = "240")]
    pub run_budget_mins: u64,

    /// Consecutive runs a listing may go unseen before it is marked inactive
    #[arg(long, env = "EXPIRY_MISS_THRESHOLD", default_value = "1")]
    pub expiry_miss_threshold: i32,

    /// Run-lock TTL in minutes; a crashed run's lock is reclaimable after this
    #[arg(long, env = "RUN_LOCK_TTL_MINS", default_value = "300")]
    pub run_lock_ttl_mins: u64,

    /// Glassdoor account email (required for that source)
    #[arg(long, env = "GLASSDOOR_EMAIL")]
    pub glassdoor_email: Option<String>,

    /// Glassdoor account password
    #[arg(long, env = "GLASSDOOR_PASSWORD")]
    pub glassdoor_password: Option<String>,
}

impl EngineSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_secs(self.throttle_cooldown_secs)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_mins * 60)
    }

    pub fn run_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.run_lock_ttl_mins * 60)
    }
}
