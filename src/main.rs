use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

mod actions;
mod config;
mod feed;
mod models;
mod scorers;
mod severity;
mod signals;
mod store;
mod validate;

use config::SiteConfig;
use severity::Thresholds;

#[derive(Parser)]
#[command(name = "ops-risk-feed")]
#[command(about = "External-signal risk cards and UI feed builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Domain {
    Delivery,
    LateArrival,
    ReservationFlow,
    LogisticsCost,
}

impl Domain {
    fn card_filename(self) -> &'static str {
        match self {
            Domain::Delivery => "delivery_risk.json",
            Domain::LateArrival => "late_arrival_risk.json",
            Domain::ReservationFlow => "reservation_flow_risk.json",
            Domain::LogisticsCost => "logistics_cost_pressure_risk.json",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Score one risk domain and write its card artifact
    Score {
        #[arg(long, value_enum)]
        domain: Domain,
        #[arg(long, default_value = "config/site.json")]
        config: PathBuf,
        /// Defaults to outputs/cards/<domain>.json
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Score every risk domain, isolating per-domain failures
    ScoreAll {
        #[arg(long, default_value = "config/site.json")]
        config: PathBuf,
        #[arg(long, default_value = "outputs/cards")]
        cards_dir: PathBuf,
    },
    /// Build the aggregated feed from the card artifacts
    BuildFeed {
        #[arg(long, default_value = "config/site.json")]
        config: PathBuf,
        #[arg(long, default_value = "outputs/cards")]
        cards_dir: PathBuf,
        #[arg(long, default_value = "outputs/feed.json")]
        out: PathBuf,
    },
    /// Validate a feed document against the consumer contract
    Validate {
        #[arg(long, default_value = "outputs/feed.json")]
        feed: PathBuf,
    },
}

async fn connect_store() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must point at the signal store, e.g. sqlite://data/signals.db")?;

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to the signal store")
}

async fn run_domain(
    domain: Domain,
    pool: &SqlitePool,
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    out: &Path,
) -> anyhow::Result<()> {
    match domain {
        Domain::Delivery => scorers::delivery::run(pool, cfg, thresholds, out).await,
        Domain::LateArrival => scorers::late_arrival::run(pool, cfg, thresholds, out).await,
        Domain::ReservationFlow => scorers::reservation::run(pool, cfg, thresholds, out).await,
        Domain::LogisticsCost => scorers::logistics::run(pool, cfg, thresholds, out).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let thresholds = Thresholds::default();

    match cli.command {
        Commands::Score { domain, config, out } => {
            let cfg = SiteConfig::load(&config)?;
            let pool = connect_store().await?;
            let out = out.unwrap_or_else(|| {
                PathBuf::from("outputs/cards").join(domain.card_filename())
            });
            run_domain(domain, &pool, &cfg, &thresholds, &out).await?;
        }
        Commands::ScoreAll { config, cards_dir } => {
            let cfg = SiteConfig::load(&config)?;
            let pool = connect_store().await?;

            // One domain's missing upstream data must not block the others.
            let mut written = 0usize;
            for domain in [
                Domain::ReservationFlow,
                Domain::LateArrival,
                Domain::Delivery,
                Domain::LogisticsCost,
            ] {
                let out = cards_dir.join(domain.card_filename());
                match run_domain(domain, &pool, &cfg, &thresholds, &out).await {
                    Ok(()) => written += 1,
                    Err(err) => eprintln!("{domain:?} scorer failed: {err:#}"),
                }
            }
            if written == 0 {
                anyhow::bail!("every scorer failed; no cards written");
            }
            println!("Cards written: {written} of 4.");
        }
        Commands::BuildFeed { config, cards_dir, out } => {
            let cfg = SiteConfig::load(&config)?;
            let cards = feed::load_cards_dir(&cards_dir)?;
            let feed = feed::build_feed(&cfg, cards);
            feed::write_feed(&feed, &out)?;
            println!(
                "Feed written to {} ({} cards, overall {}).",
                out.display(),
                feed.cards.len(),
                feed.rollups.overall_status.as_str()
            );
        }
        Commands::Validate { feed } => {
            let report = validate::validate_feed_file(&feed);
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            if !report.passed() {
                eprintln!("Feed validation failed:");
                for error in &report.errors {
                    eprintln!("- {error}");
                }
                std::process::exit(1);
            }
            println!("Feed validation passed.");
        }
    }

    Ok(())
}
