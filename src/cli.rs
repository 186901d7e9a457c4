//! Command-line interface argument parsing.
//!
//! Global options select the configuration, the state file and logging;
//! each subcommand maps to one operation of the worker or the service.

use crate::models::PaidTier;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Nullscan - scan-lifecycle orchestrator for autonomous web security scans
///
/// Queues scans against web targets, drives an external scanning engine
/// under a cost budget, and serves results redacted by purchased tier.
///
/// Examples:
///   nullscan worker
///   nullscan submit --email dev@example.com --target https://shop.example --authorized
///   nullscan watch 6f1c...
///   nullscan results 6f1c... --format json
///   nullscan record-payment 6f1c... --tier pro --payment-ref pi_123 --amount-cents 25000
///   nullscan reprocess 6f1c... --dry-run
///   nullscan init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for nullscan.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the shared state file (overrides [storage] path)
    #[arg(long, value_name = "FILE", env = "NULLSCAN_STATE", global = true)]
    pub state: Option<PathBuf>,

    /// API key for the engine's model provider and report extraction
    #[arg(long, env = "NULLSCAN_LLM_API_KEY", hide_env_values = true, global = true)]
    pub llm_api_key: Option<String>,

    /// Webhook receiving notifications as JSON
    #[arg(long, value_name = "URL", env = "NULLSCAN_WEBHOOK_URL", global = true)]
    pub webhook_url: Option<String>,

    /// Key that unlocks the admin listing
    #[arg(long, env = "NULLSCAN_ADMIN_KEY", hide_env_values = true, global = true)]
    pub admin_key: Option<String>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the worker: recover interrupted scans, then process the queue
    Worker {
        /// Process what is pending now and exit
        #[arg(long)]
        once: bool,
    },

    /// Queue a quick scan
    Submit {
        #[arg(long, value_name = "EMAIL")]
        email: String,

        #[arg(long, value_name = "URL")]
        target: String,

        /// Confirm you are authorized to test the target
        #[arg(long)]
        authorized: bool,
    },

    /// Print the status and latest progress snapshot of a scan
    Progress { scan_id: Uuid },

    /// Follow a scan until it finishes
    Watch {
        scan_id: Uuid,

        /// Seconds between polls
        #[arg(long, default_value = "2", value_name = "SECS")]
        interval: u64,
    },

    /// Print the results of a completed scan
    Results {
        scan_id: Uuid,

        /// Output format (markdown, json)
        #[arg(long, default_value = "markdown", value_name = "FORMAT")]
        format: OutputFormat,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Status of the newest upgrade rescan of a scan
    ChildStatus { scan_id: Uuid },

    /// Request cancellation of a scan
    Cancel { scan_id: Uuid },

    /// Check that a tier can be bought for a scan and show its price
    Quote {
        scan_id: Uuid,

        #[arg(long, value_parser = parse_tier)]
        tier: PaidTier,
    },

    /// Record a payment confirmed by the payment processor
    RecordPayment {
        scan_id: Uuid,

        #[arg(long, value_parser = parse_tier)]
        tier: PaidTier,

        #[arg(long, value_name = "REF")]
        payment_ref: String,

        #[arg(long, value_name = "CENTS")]
        amount_cents: u32,
    },

    /// Rebuild a completed scan's results from its run directory
    Reprocess {
        scan_id: Uuid,

        /// Run directory to read (defaults to the scan's last run)
        #[arg(long, value_name = "DIR")]
        run_dir: Option<PathBuf>,

        /// Keep the stored structured report
        #[arg(long)]
        keep_report: bool,

        /// Show what would be stored without storing it
        #[arg(long)]
        dry_run: bool,
    },

    /// List recent scans (requires the admin key)
    Admin {
        /// Key to present; defaults to --admin-key
        #[arg(long, hide_env_values = true)]
        key: Option<String>,
    },

    /// Generate a default nullscan.toml configuration file
    InitConfig,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

fn parse_tier(s: &str) -> Result<PaidTier, String> {
    s.parse()
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Webhook URL must start with 'http://' or 'https://'".to_string());
            }
        }

        match self.command {
            Command::Watch { interval, .. } if interval == 0 => {
                Err("Watch interval must be at least 1 second".to_string())
            }
            Command::Submit { authorized, .. } if !authorized => Err(
                "Pass --authorized to confirm you may test the target".to_string(),
            ),
            _ => Ok(()),
        }
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
