mod config;
mod db;
mod error;
mod models;
mod scrape;
mod sources;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{Command, Config};
use crate::models::company::CompanyStats;
use crate::models::scrape_run::ScrapeRun;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobharvest=info")),
        )
        .init();

    let config = Config::parse();

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    match &config.command {
        Command::Schedule => {
            scrape::scheduler::run(&pool, &config.engine).await?;
        }
        Command::Run { job } => {
            match scrape::orchestrator::run_job(&pool, &config.engine, job).await? {
                Some(status) => {
                    tracing::info!(job = %job, status = status.as_str(), "run finished");
                }
                None => {
                    tracing::warn!(job = %job, "run rejected: another run holds the lock");
                }
            }
        }
        Command::RebuildAggregates => {
            let companies = CompanyStats::rebuild(&pool).await?;
            tracing::info!(companies, "company aggregates rebuilt");
            for stats in CompanyStats::top(&pool, 5).await? {
                tracing::info!(
                    company = %stats.company_name,
                    active_listings = stats.active_listings,
                    "top employer"
                );
            }
        }
        Command::Runs { job, limit } => {
            let runs = ScrapeRun::recent(&pool, job.as_deref(), *limit).await?;
            for run in runs {
                println!("{}", serde_json::to_string(&run)?);
            }
        }
    }

    Ok(())
}
