//! Operator CLI for the slot gate.
//!
//! Inspects and repairs the shared slot store and edits gate settings.
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use slotgate_ctl::{self as ctl, Gate, GlobalOptions};

#[derive(Parser, Debug)]
#[command(name = "slotgatectl")]
#[command(about = "Operate the distributed slot gate")]
#[command(version)]
struct Args {
    /// Redis holding the shared slot store (e.g. redis://localhost:6379)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Key prefix inside Redis
    #[arg(long, global = true)]
    key_prefix: Option<String>,

    /// Local settings file (TOML); defaults to the settings kept in Redis
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Root directory of the job queue
    #[arg(long, global = true)]
    queue_root: Option<PathBuf>,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn to_global_options(&self) -> GlobalOptions {
        GlobalOptions {
            redis_url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
            config: self.config.clone(),
            queue_root: self.queue_root.clone(),
            json: self.json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show counters, minute window, backoff and counter health
    Inspect,
    /// Force the in-flight counter to zero
    ResetInFlight {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Delete every per-call tracking record
    ClearTracking {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Read or change gate settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start or clear a global backoff
    Backoff {
        #[command(subcommand)]
        action: BackoffAction,
    },
    /// List recorded job failures
    Failures {
        /// Remove the listed failures
        #[arg(long)]
        drain: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print one parameter, or all of them
    Get { name: Option<String> },
    /// Validate and store one parameter
    Set { name: String, value: String },
}

#[derive(Subcommand, Debug)]
enum BackoffAction {
    /// Pause all workers for the given number of seconds
    Set { secs: u64 },
    /// Lift the backoff
    Clear,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let opts = args.to_global_options();
    let gate = Gate::connect(&opts).await?;
    let mut stdout = io::stdout();

    match &args.command {
        Command::Inspect => ctl::inspect(&opts, &gate, &mut stdout).await,
        Command::ResetInFlight { yes } => ctl::reset_in_flight(&opts, &gate, &mut stdout, *yes).await,
        Command::ClearTracking { yes } => ctl::clear_tracking(&opts, &gate, &mut stdout, *yes).await,
        Command::Config { action } => match action {
            ConfigAction::Get { name } => {
                ctl::config_get(&opts, &gate, &mut stdout, name.as_deref()).await
            }
            ConfigAction::Set { name, value } => {
                ctl::config_set(&opts, &gate, &mut stdout, name, value).await
            }
        },
        Command::Backoff { action } => match action {
            BackoffAction::Set { secs } => ctl::backoff_set(&opts, &gate, &mut stdout, *secs).await,
            BackoffAction::Clear => ctl::backoff_clear(&opts, &gate, &mut stdout).await,
        },
        Command::Failures { drain } => ctl::failures(&opts, &gate, &mut stdout, *drain).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
