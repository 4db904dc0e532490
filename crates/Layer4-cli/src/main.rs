//! cache CLI - Main entry point

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cmdcache_core::{CommandCache, Outcome};
use cmdcache_foundation::{BackendKind, CacheConfig, Error, StoreHandle};
use cmdcache_task::{CommandLine, LocalExecutor, LocalExecutorConfig};
use std::ffi::OsString;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LONG_ABOUT: &str = "\
A cache for slow shell commands.

Querying log clusters or curling API endpoints can be slow enough to make
building a pipeline iteratively painful. cache runs the command for you,
stores its output and prints it. Stored output lives for one hour; repeating
the same command within that hour prints the stored result without running
anything. Only successful commands are stored: a non-zero exit status leaves
the cache untouched.

Flags are only read before the command. Everything from the first
non-flag argument on belongs to the command.";

const EXAMPLES: &str = "\
Examples:
  cache curl -X GET example.com
  cache --clear";

/// cache - A cache for slow shell commands
#[derive(Parser, Debug)]
#[command(name = "cache")]
#[command(author, version, about, long_about = LONG_ABOUT, after_help = EXAMPLES)]
struct Args {
    /// Clear the cache
    #[arg(long, visible_alias = "clean")]
    clear: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Storage backend (filesystem, sqlite)
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Remove expired entries before running
    #[arg(long)]
    prune: bool,

    /// Command to run
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        required_unless_present_any = ["clear", "prune"]
    )]
    command: Vec<OsString>,
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging - stdout carries command output
    let log_level = if args.verbose { "debug" } else { "error" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report(&e)),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = CacheConfig::load();
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    debug!("Command: {:?} (backend: {})", args.command, config.backend);

    let store = StoreHandle::open(&config);

    if args.clear {
        info!("Clearing {} cache", store.name());
        return store.wipe().context("Failed to clear cache");
    }

    if args.prune {
        match store.sweep_expired() {
            Ok(removed) => info!("Removed {} expired entries", removed),
            Err(e) => error!("Failed to remove expired entries: {}", e),
        }
        if args.command.is_empty() {
            return Ok(());
        }
    }

    let command = CommandLine::from_args(args.command)?;
    let executor =
        LocalExecutor::with_config(LocalExecutorConfig::default().shell(config.shell.clone()));

    let mut stdout = std::io::stdout();
    let outcome = CommandCache::new(&*store, &executor)
        .run(&command, &mut stdout)
        .await?;

    match outcome {
        Outcome::Hit => debug!("Served from cache"),
        Outcome::Executed { cached } => debug!("Executed (cached: {})", cached),
    }
    Ok(())
}

/// Print `err` where appropriate and pick the exit code
fn report(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        // The command already reported on its own stderr
        Some(e @ (Error::ExitStatus { .. } | Error::Signaled { .. })) => {
            debug!("{}", e);
            u8::try_from(e.exit_code()).unwrap_or(1)
        }
        Some(Error::InvalidInput(message)) => {
            let code = Args::command()
                .error(clap::error::ErrorKind::InvalidValue, message)
                .exit_code();
            eprintln!("Error: {}", message);
            u8::try_from(code).unwrap_or(2)
        }
        _ => {
            eprintln!("Error: {:#}", err);
            1
        }
    }
}
