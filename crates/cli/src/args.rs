//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// linkreply: rule-driven auto-replies for social comments and messages
#[derive(Parser, Debug)]
#[command(name = "linkreply")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate rules against a single event and print the reply
    Evaluate(EvaluateArgs),

    /// Manage reply rules
    Rules(RulesArgs),

    /// Ingest events and dispatch replies
    Run(RunArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Rules file (defaults to general.rules_path)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// JSON file holding the event (use - for stdin)
    #[arg(long)]
    pub event: Option<PathBuf>,

    /// Evaluate only this rule, ignoring account and active flag
    #[arg(long)]
    pub rule_id: Option<String>,

    /// Override the link page URL bound to {linkPageUrl}
    #[arg(long)]
    pub link_page_url: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommands,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommands {
    /// List rules from the configured source
    List {
        /// Read this rules file instead of the configured source
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Only show rules for this account
        #[arg(long)]
        account: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a rules file for rules that can never fire
    Validate {
        /// Rules file (defaults to general.rules_path)
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Copy rules from a TOML file into the SQLite store
    Import {
        /// Rules file (defaults to general.rules_path)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Database path (defaults to general.state_db_path)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Import even if validation reports issues
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSONL file of normalized events (use - for stdin)
    #[arg(long)]
    pub events: PathBuf,

    /// Run in dry-run mode (evaluate and record, no sending)
    #[arg(long)]
    pub dry_run: bool,

    /// Write replies to outbox file for review instead of sending
    #[arg(long)]
    pub require_approval: bool,

    /// Path to outbox file (used with --require-approval)
    #[arg(long)]
    pub outbox: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./linkreply.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}
