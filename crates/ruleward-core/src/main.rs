//! Ruleward CLI
//!
//! Command-line tools around the rule execution runtime.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ruleward::execution::{rule_range_tuples, RangeRequest, RuleMessageBuilder};
use ruleward::models::ExecutionResult;
use ruleward::Config;
use serde_json::json;
use tracing::{debug, info};

/// Ruleward - security detection rule runtime
#[derive(Parser)]
#[command(name = "ruleward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "RULEWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the search windows of one rule execution
    Tuples {
        /// Window start (date math such as `now-6m`, or RFC 3339)
        #[arg(long, default_value = "now-6m")]
        from: String,

        /// Window end
        #[arg(long, default_value = "now")]
        to: String,

        /// Rule interval
        #[arg(long, default_value = "5m")]
        interval: String,

        /// How long ago the previous execution started
        #[arg(long)]
        previous: Option<humantime::Duration>,

        /// Start of this execution, RFC 3339 (defaults to now)
        #[arg(long)]
        started_at: Option<DateTime<Utc>>,

        /// Signal budget of the rule
        #[arg(long, default_value = "100")]
        max_signals: u32,
    },

    /// Validate an execution result document
    CheckResult {
        /// JSON file holding the result
        path: PathBuf,
    },

    /// Build a rule-scoped log message
    Message {
        /// Rule saved object id
        #[arg(long)]
        id: String,

        /// Human-assigned rule id
        #[arg(long)]
        rule_id: Option<String>,

        /// Rule name
        #[arg(long)]
        name: String,

        /// Signals index (configured index if not specified)
        #[arg(long)]
        index: Option<String>,

        /// Message parts
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config, cli.verbose);

    let result = match cli.command {
        Commands::Tuples {
            from,
            to,
            interval,
            previous,
            started_at,
            max_signals,
        } => run_tuples(
            &config,
            &TuplesArgs {
                from,
                to,
                interval,
                previous,
                started_at,
                max_signals,
            },
            cli.format,
        ),
        Commands::CheckResult { path } => run_check_result(&path, cli.format),
        Commands::Message {
            id,
            rule_id,
            name,
            index,
            messages,
        } => {
            let index = index.unwrap_or_else(|| config.detection.signals_index.clone());
            let builder = RuleMessageBuilder::new(id, rule_id, index, name);
            println!("{}", builder.build(&messages));
            Ok(())
        }
        Commands::Config => run_config(&config, cli.format),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

struct TuplesArgs {
    from: String,
    to: String,
    interval: String,
    previous: Option<humantime::Duration>,
    started_at: Option<DateTime<Utc>>,
    max_signals: u32,
}

fn previous_start(
    started_at: DateTime<Utc>,
    ago: Option<humantime::Duration>,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    ago.map(|ago| {
        chrono::Duration::from_std(*ago)
            .ok()
            .and_then(|ago| started_at.checked_sub_signed(ago))
            .context("previous execution is too far in the past")
    })
    .transpose()
}

fn run_tuples(config: &Config, args: &TuplesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let started_at = args.started_at.unwrap_or_else(Utc::now);
    let previous_started_at = previous_start(started_at, args.previous)?;

    let range = rule_range_tuples(&RangeRequest {
        previous_started_at,
        started_at,
        from: &args.from,
        to: &args.to,
        interval: &args.interval,
        max_signals: args.max_signals.min(config.detection.max_signals),
        max_gap_ratio: config.detection.max_rule_gap_ratio,
    })?;
    debug!(tuples = range.tuples.len(), "Computed range tuples");

    match format {
        OutputFormat::Json => {
            let output = json!({
                "tuples": range.tuples,
                "remainingGapMs": range.remaining_gap.num_milliseconds(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for (i, tuple) in range.tuples.iter().enumerate() {
                println!(
                    "{i:>2}  {} .. {}  max_signals={}",
                    tuple.from.to_rfc3339(),
                    tuple.to.to_rfc3339(),
                    tuple.max_signals
                );
            }
            if range.has_gap() {
                let gap = range.remaining_gap.to_std().unwrap_or_default();
                println!(
                    "gap: {} not covered by any window",
                    humantime::format_duration(gap)
                );
            }
        }
    }

    Ok(())
}

fn run_check_result(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    info!(path = %path.display(), "Checking execution result");
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let result: ExecutionResult =
        serde_json::from_str(&raw).context("not a well-formed execution result")?;

    let consistent = result.is_consistent();
    match format {
        OutputFormat::Json => {
            let output = json!({
                "success": result.success,
                "warning": result.warning,
                "createdSignalsCount": result.created_signals_count,
                "createdSignals": result.created_signals.len(),
                "errors": result.errors.len(),
                "consistent": consistent,
                "searchDurationMs": result.total_search_duration_ms(),
                "indexingDurationMs": result.total_indexing_duration_ms(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("success:   {}", result.success);
            println!("warning:   {}", result.warning);
            println!(
                "signals:   {} reported, {} present",
                result.created_signals_count,
                result.created_signals.len()
            );
            println!("errors:    {}", result.errors.len());
            println!("search:    {:.2}ms", result.total_search_duration_ms());
            println!("indexing:  {:.2}ms", result.total_indexing_duration_ms());
        }
    }

    if !consistent {
        bail!(
            "createdSignalsCount is {} but {} signals are present",
            result.created_signals_count,
            result.created_signals.len()
        );
    }
    Ok(())
}

fn run_config(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => println!("{config:#?}"),
    }
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ruleward", &mut io::stdout());
}
