//! Windlass CLI — offline inspection of the turn engine.
//!
//! Commands:
//! - `decode` — Decode a text file into stream events
//! - `prune`  — Prune a conversation snapshot under a token budget
//! - `marks`  — Show or edit a conversation's deletion mark
//! - `config` — Show, validate or locate the configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "windlass",
    about = "Windlass — bounded-context tool-call engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Use this config file instead of ~/.windlass/config.toml
    #[arg(long = "config", global = true, env = "WINDLASS_CONFIG")]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into fragments, decode it, print one JSON event per line
    Decode {
        /// Text file holding a model reply
        file: PathBuf,

        /// Fragment size in characters
        #[arg(short, long, default_value_t = 16)]
        chunk: usize,

        /// Merge adjacent plain-text events before printing
        #[arg(long)]
        coalesce: bool,
    },

    /// Prune a conversation snapshot and print the view sent to the model
    Prune {
        /// Conversation snapshot (JSON)
        file: PathBuf,

        /// Token budget (defaults to budget.max_context_tokens)
        #[arg(short, long)]
        budget: Option<usize>,

        /// Write deletions back to the snapshot and the mark store
        #[arg(long)]
        apply: bool,
    },

    /// Inspect or edit deletion marks
    Marks {
        #[command(subcommand)]
        action: MarksCommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
}

#[derive(Args)]
struct MarkTarget {
    /// Conversation id
    #[arg(short, long)]
    conversation: String,
}

#[derive(Args)]
struct MarkEdit {
    #[command(flatten)]
    target: MarkTarget,

    /// Short message ids
    ids: Vec<String>,

    /// Override the pair-integrity flag
    #[arg(long)]
    preserve_pairs: Option<bool>,
}

#[derive(Subcommand)]
enum MarksCommand {
    /// Print the stored mark
    Show(MarkTarget),
    /// Replace the marked set
    Set(MarkEdit),
    /// Add ids to the marked set
    Append(MarkEdit),
    /// Remove ids from the marked set
    Remove(MarkEdit),
    /// Drop the mark entirely
    Clear(MarkTarget),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config_file.as_deref();
    match cli.command {
        Commands::Decode {
            file,
            chunk,
            coalesce,
        } => commands::decode::run(config_path, &file, chunk, coalesce).await?,
        Commands::Prune {
            file,
            budget,
            apply,
        } => commands::prune::run(config_path, &file, budget, apply).await?,
        Commands::Marks { action } => match action {
            MarksCommand::Show(t) => commands::marks::show(config_path, &t.conversation).await?,
            MarksCommand::Set(e) => {
                commands::marks::edit(config_path, &e.target.conversation, "replace", e.ids, e.preserve_pairs)
                    .await?
            }
            MarksCommand::Append(e) => {
                commands::marks::edit(config_path, &e.target.conversation, "append", e.ids, e.preserve_pairs)
                    .await?
            }
            MarksCommand::Remove(e) => {
                commands::marks::edit(config_path, &e.target.conversation, "remove", e.ids, e.preserve_pairs)
                    .await?
            }
            MarksCommand::Clear(t) => commands::marks::clear(config_path, &t.conversation).await?,
        },
        Commands::Config { action } => match action.unwrap_or(ConfigCommand::Show) {
            ConfigCommand::Show => commands::config_cmd::show(config_path).await?,
            ConfigCommand::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigCommand::Path => commands::config_cmd::path(config_path).await?,
        },
    }

    Ok(())
}
