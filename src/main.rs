//! Progression Store CLI
//!
//! Admin and pipeline entry point over the progression database.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and write a default config
//! progression-store init
//!
//! # Load reference data
//! progression-store seed catalog.toml
//!
//! # Feed a qualifying action, then claim the task reward
//! progression-store record-action --user 42 --action play_hand
//! progression-store claim-reward --user 42 --task play_3_hands
//!
//! # Season pass
//! progression-store add-points --user 42 --season s1 --points 250
//! progression-store claim-milestone --user 42 --season s1 --milestone 3 --track paid
//! progression-store season --user 42
//! progression-store claim-eligible --user 42 --season s1
//! ```
//!
//! Results are printed as JSON. Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use progression_store::services::events::spawn_logging_listener;
use progression_store::{Config, SeedCatalog, Services, Track};

#[derive(Parser, Debug)]
#[command(name = "progression-store")]
#[command(about = "Daily task and season pass progression store")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "PROGRESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "PROGRESSION_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Task set used for dates without a calendar entry
    #[arg(long, env = "PROGRESSION_DEFAULT_SET")]
    default_set: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and write config.toml if missing
    Init,

    /// Import a TOML seed catalog
    Seed {
        file: PathBuf,
    },

    /// Apply a qualifying action to today's matching tasks
    RecordAction {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        action: String,
        /// RFC 3339 instant; defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Record a user's daily reset and print the board
    DailyReset {
        #[arg(long)]
        user: i64,
        /// Defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Claim a completed task's reward
    ClaimReward {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        task: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Add season points to a user
    AddPoints {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        season: String,
        #[arg(long)]
        points: i64,
    },

    /// Claim a season milestone on a track
    ClaimMilestone {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        season: String,
        #[arg(long)]
        milestone: i32,
        /// free or paid
        #[arg(long, default_value = "free")]
        track: Track,
    },

    /// Claim every milestone the user has enough points for
    ClaimEligible {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        season: String,
        #[arg(long, default_value = "free")]
        track: Track,
    },

    /// Show a season's milestones with the user's claim status
    Season {
        #[arg(long)]
        user: i64,
        /// Defaults to the season active today
        #[arg(long)]
        season: Option<String>,
    },

    /// Season participation and claim statistics
    Analytics {
        #[arg(long)]
        season: String,
    },

    /// Row counts per table
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("progression_store=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(set_id) = args.default_set {
        config.default_set_id = Some(set_id);
    }

    let services = Services::open(&config)?;
    let _listener = spawn_logging_listener(services.events.clone());
    let progression = Arc::clone(&services.progression);

    match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!("Wrote default config to {:?}", config_path);
            }
            print_json(&serde_json::json!({
                "database": services.db.path(),
                "config": config_path,
            }))?;
        }
        Command::Seed { file } => {
            let catalog = SeedCatalog::load(&file)
                .with_context(|| format!("Failed to read seed catalog {}", file.display()))?;
            print_json(&services.catalog.import_seed(&catalog)?)?;
        }
        Command::RecordAction { user, action, at } => {
            let occurred_at = at.unwrap_or_else(Utc::now);
            print_json(&progression.record_action(user, &action, occurred_at)?)?;
        }
        Command::DailyReset { user, date } => {
            let date = date.unwrap_or_else(|| progression.today());
            print_json(&progression.daily_reset(user, date)?)?;
        }
        Command::ClaimReward { user, task, date } => {
            let date = date.unwrap_or_else(|| progression.today());
            print_json(&progression.claim_reward(user, &task, date)?)?;
        }
        Command::AddPoints { user, season, points } => {
            print_json(&progression.add_season_points(user, &season, points)?)?;
        }
        Command::ClaimMilestone { user, season, milestone, track } => {
            print_json(&progression.claim_milestone(user, &season, milestone, track)?)?;
        }
        Command::ClaimEligible { user, season, track } => {
            print_json(&progression.claim_eligible_milestones(user, &season, track)?)?;
        }
        Command::Season { user, season } => {
            let season_id = match season {
                Some(season_id) => season_id,
                None => progression
                    .current_season(progression.today())?
                    .map(|season| season.season_id)
                    .context("No season is active today")?,
            };
            print_json(&progression.season_overview(user, &season_id)?)?;
        }
        Command::Analytics { season } => {
            print_json(&progression.season_analytics(&season)?)?;
        }
        Command::Stats => {
            print_json(&progression.stats()?)?;
        }
    }

    Ok(())
}
