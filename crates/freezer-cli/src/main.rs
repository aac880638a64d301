//! freezer - account freeze operator CLI
//!
//! Applies, lifts and inspects account freezes against a local `SQLite`
//! database. Every command prints JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use freezer_core::{AccountId, FreezeType, FreezerConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// freezer - account freeze operator CLI
#[derive(Parser, Debug)]
#[command(name = "freezer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the database (overrides the configuration file)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage accounts
    #[command(subcommand)]
    Account(AccountCommands),

    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Apply a freeze or warning
    Freeze {
        /// Freeze type (billing, billing-warning, violation, legal,
        /// delayed-bot, bot, trial-expiration)
        freeze_type: FreezeType,

        /// Account id
        account: AccountId,

        /// Days until a delayed bot freeze escalates
        #[arg(long)]
        days: Option<i64>,
    },

    /// Lift a freeze or warning
    Unfreeze {
        /// Freeze type
        freeze_type: FreezeType,

        /// Account id
        account: AccountId,
    },

    /// Escalate an account's overdue events
    Escalate {
        /// Account id
        account: AccountId,

        /// Escalate this event even if its grace period has not elapsed
        #[arg(long = "type")]
        freeze_type: Option<FreezeType>,
    },

    /// Show an account, its projects and its freeze events
    Status {
        /// Account id
        account: AccountId,
    },

    /// List freeze events across all accounts
    List {
        /// Only list these types (repeatable)
        #[arg(long = "type")]
        types: Vec<FreezeType>,

        /// Start after this account id
        #[arg(long)]
        after: Option<AccountId>,

        /// Page size
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// List events whose grace period has elapsed
    Due {
        /// Evaluate as of this RFC 3339 timestamp instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommands {
    /// Create an active account
    Add {
        /// Owner email
        email: String,

        /// Default storage limit for new projects, in bytes
        #[arg(long, default_value_t = 25_000_000_000)]
        storage: i64,

        /// Default bandwidth limit for new projects, in bytes
        #[arg(long, default_value_t = 25_000_000_000)]
        bandwidth: i64,

        /// Default segment limit for new projects
        #[arg(long, default_value_t = 10_000)]
        segment: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommands {
    /// Create a project owned by an account
    Add {
        /// Owner account id
        owner: AccountId,

        /// Project name
        name: String,

        /// Storage limit, in bytes
        #[arg(long, default_value_t = 25_000_000_000)]
        storage: i64,

        /// Bandwidth limit, in bytes
        #[arg(long, default_value_t = 25_000_000_000)]
        bandwidth: i64,

        /// Segment limit
        #[arg(long, default_value_t = 10_000)]
        segment: i64,

        /// Request rate limit
        #[arg(long)]
        rate: Option<i64>,

        /// Request burst limit
        #[arg(long)]
        burst: Option<i64>,
    },
}

fn load_config(cli: &Cli) -> Result<FreezerConfig> {
    let mut config = match &cli.config {
        Some(path) => FreezerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FreezerConfig::default(),
    };
    if let Some(path) = &cli.database {
        config.database.path.clone_from(path);
    }
    if let Some(level) = &cli.log_level {
        config.log.level.clone_from(level);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let ctx = commands::App::open(&config)?;

    match cli.command {
        Commands::Account(AccountCommands::Add {
            email,
            storage,
            bandwidth,
            segment,
        }) => commands::account::add(&ctx, &email, storage, bandwidth, segment),
        Commands::Project(ProjectCommands::Add {
            owner,
            name,
            storage,
            bandwidth,
            segment,
            rate,
            burst,
        }) => commands::account::add_project(
            &ctx,
            owner,
            &name,
            [storage, bandwidth, segment],
            rate,
            burst,
        ),
        Commands::Freeze {
            freeze_type,
            account,
            days,
        } => commands::freeze::freeze(&ctx, account, freeze_type, days),
        Commands::Unfreeze {
            freeze_type,
            account,
        } => commands::freeze::unfreeze(&ctx, account, freeze_type),
        Commands::Escalate {
            account,
            freeze_type,
        } => commands::freeze::escalate(&ctx, account, freeze_type, Utc::now()),
        Commands::Status { account } => commands::query::status(&ctx, account),
        Commands::List {
            types,
            after,
            limit,
        } => commands::query::list(&ctx, &types, after, limit),
        Commands::Due { now } => commands::query::due(&ctx, now.unwrap_or_else(Utc::now)),
    }
}
