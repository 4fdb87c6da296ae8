//! `pfg` operator CLI.
//!
//! Offline tooling around the guardian: config hashing and validation,
//! snapshot inspection, audit-chain verification and one-shot sizing.
//! Nothing here talks to a venue or to a running daemon.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pfg")]
#[command(about = "Prop-firm guardian CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the layered config hash and print the canonical JSON.
    ConfigHash {
        /// YAML layers, later layers win.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Load, validate and summarize a guardian config.
    ConfigCheck {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Check a persisted account snapshot and re-evaluate its compliance.
    SnapshotCheck {
        /// Config layers the snapshot's account is defined in.
        #[arg(long = "config", required = true, num_args = 1..)]
        config_paths: Vec<String>,

        /// Snapshot JSON file.
        snapshot: String,

        /// Evaluation instant (RFC 3339). Defaults to now.
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Verify the hash chain of a transition audit log.
    AuditVerify {
        path: String,
    },

    /// Size one signal with the Kelly sizer.
    Size(SizeArgs),
}

#[derive(Args)]
pub(crate) struct SizeArgs {
    #[arg(long, default_value = "ES")]
    pub symbol: String,

    /// LONG | SHORT
    #[arg(long, default_value = "LONG")]
    pub direction: String,

    /// Account equity in USD.
    #[arg(long)]
    pub equity: f64,

    #[arg(long)]
    pub entry: f64,

    #[arg(long)]
    pub stop: f64,

    #[arg(long)]
    pub target: f64,

    /// USD per 1.0 price move per contract.
    #[arg(long)]
    pub point_value: f64,

    #[arg(long, default_value_t = 1.0)]
    pub confidence: f64,

    /// Win probability. Defaults to the profile default.
    #[arg(long)]
    pub p: Option<f64>,

    /// Payoff ratio. Defaults to (target - entry) / (entry - stop).
    #[arg(long)]
    pub b: Option<f64>,

    /// Remaining risk budget in [0, 1].
    #[arg(long, default_value_t = 1.0)]
    pub risk_budget: f64,

    /// SAFE | CAUTION | DANGER | LOCKED | VIOLATED | PASSED
    #[arg(long, default_value = "SAFE")]
    pub risk_state: String,

    #[arg(long, default_value_t = 10)]
    pub max_contracts: u32,

    #[arg(long, default_value_t = 0.0)]
    pub minimum_confidence: f64,

    #[arg(long, default_value_t = 1.0)]
    pub aggressiveness: f64,

    /// kelly | half_kelly
    #[arg(long, default_value = "kelly")]
    pub sizer: String,

    /// Print the decision as JSON instead of key=value lines.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    // Logs go to stderr; stdout carries the command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => commands::config::config_hash(&paths),
        Commands::ConfigCheck { paths } => commands::config::config_check(&paths),
        Commands::SnapshotCheck {
            config_paths,
            snapshot,
            as_of,
        } => commands::snapshot::snapshot_check(&config_paths, &snapshot, as_of.as_deref()),
        Commands::AuditVerify { path } => commands::audit::audit_verify(&path),
        Commands::Size(args) => commands::size::size(&args),
    }
}
