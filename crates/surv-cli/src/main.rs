//! surv CLI: routine surveillance reporting
//!
//! Commands: init, load-indicators, ingest, validate, reject, edit, record,
//! auto-validate, completeness, series, refresh-cache, completions

mod commands;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use surv_metrics::OutputFormat;

#[derive(Parser)]
#[command(name = "surv")]
#[command(version)]
#[command(about = "Routine surveillance reporting: validation workflow and completeness")]
struct Cli {
    /// Configuration file (defaults to ./surv.toml when present)
    #[arg(long, global = true, env = "SURV_CONFIG")]
    config: Option<PathBuf>,

    /// Evaluate deadlines as of this instant (RFC 3339) instead of now
    #[arg(long, global = true, env = "SURV_NOW")]
    now: Option<DateTime<Utc>>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Write a default surv.toml and create the databases
    Init,
    /// Load indicator definitions from a YAML or JSON file
    LoadIndicators { file: PathBuf },
    /// Ingest a batch of submission rows (YAML or JSON list)
    Ingest {
        file: PathBuf,
        /// Rows come from the automated feed
        #[arg(long)]
        feed: bool,
        /// Auto-validate records created by this batch
        #[arg(long)]
        auto_validate: bool,
        #[arg(long, env = "SURV_ACTOR", default_value = "operator")]
        actor: String,
    },
    /// Accept a record
    Validate {
        id: i64,
        #[arg(long, env = "SURV_ACTOR", default_value = "operator")]
        actor: String,
    },
    /// Reject a record
    Reject {
        id: i64,
        #[arg(long, env = "SURV_ACTOR", default_value = "operator")]
        actor: String,
    },
    /// Correct the values of a record
    Edit {
        id: i64,
        numerator: f64,
        denominator: f64,
        #[arg(long, env = "SURV_ACTOR", default_value = "operator")]
        actor: String,
    },
    /// Show a record with its computed value
    Record { id: i64 },
    /// Auto-validate records past their validation deadline
    AutoValidate,
    /// Completeness of an entity for one period
    #[command(alias = "c")]
    Completeness {
        entity: String,
        period: String,
        /// Restrict to one indicator (default: weighted average of routine indicators)
        #[arg(long)]
        indicator: Option<String>,
        /// One row per child entity
        #[arg(long, conflicts_with = "indicator")]
        points: bool,
        /// json, table or markdown (md)
        #[arg(long, short, default_value = "json")]
        format: OutputFormat,
    },
    /// Completeness of an entity for one indicator over a period range
    Series {
        entity: String,
        from: String,
        to: String,
        #[arg(long)]
        indicator: String,
        /// json, table or markdown (md)
        #[arg(long, short, default_value = "json")]
        format: OutputFormat,
    },
    /// Recompute the computed-value cache
    RefreshCache,
    /// Print shell completions
    Completions { shell: Shell },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn run(ctx: &commands::Context, command: Commands) -> anyhow::Result<String> {
    match command {
        Commands::Init => commands::init(ctx),
        Commands::LoadIndicators { file } => commands::load_indicators(ctx, &file),
        Commands::Ingest {
            file,
            feed,
            auto_validate,
            actor,
        } => commands::ingest(ctx, &file, feed, auto_validate, &actor),
        Commands::Validate { id, actor } => commands::validate(ctx, id, &actor),
        Commands::Reject { id, actor } => commands::reject(ctx, id, &actor),
        Commands::Edit {
            id,
            numerator,
            denominator,
            actor,
        } => commands::edit(ctx, id, numerator, denominator, &actor),
        Commands::Record { id } => commands::record(ctx, id),
        Commands::AutoValidate => commands::auto_validate(ctx),
        Commands::Completeness {
            entity,
            period,
            indicator,
            points,
            format,
        } => commands::completeness(ctx, &entity, &period, indicator.as_deref(), points, format),
        Commands::Series {
            entity,
            from,
            to,
            indicator,
            format,
        } => commands::series(ctx, &entity, &from, &to, &indicator, format),
        Commands::RefreshCache => commands::refresh_cache(ctx),
        Commands::Completions { shell } => {
            let mut script = Vec::new();
            clap_complete::generate(shell, &mut Cli::command(), "surv", &mut script);
            Ok(String::from_utf8_lossy(&script).into_owned())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = commands::Context::new(cli.config.as_deref(), cli.now.unwrap_or_else(Utc::now))?;
    let output = run(&ctx, cli.command)?;
    println!("{}", output.trim_end());
    Ok(())
}
