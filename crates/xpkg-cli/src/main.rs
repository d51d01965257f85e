//! xpkg CLI - Dependency manager for Crossplane packages

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;
mod util;

use error::{CliError, Result};
use util::GlobalOptions;

#[derive(Parser)]
#[command(name = "xpkg")]
#[command(version)]
#[command(
    about = "Dependency manager and package cache for Crossplane packages",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Package cache directory (default: ~/.up/cache)
    #[arg(long, global = true, env = "XPKG_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Configuration file (default: ~/.config/xpkg/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long, global = true, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage package dependencies and the local package cache
    #[command(subcommand, alias = "dependency")]
    Dep(DepCommands),
}

#[derive(Subcommand)]
enum DepCommands {
    /// Fetch a package and its dependencies into the cache
    Add {
        /// Package reference (registry/org/name[:tag|@constraint])
        package: String,

        /// Package type recorded in the project file (provider, configuration, function)
        #[arg(long = "type")]
        package_type: Option<String>,

        /// Project directory holding crossplane.yaml or upbound.yaml
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Fetch every dependency listed in the project file
    UpdateCache {
        /// Project directory holding crossplane.yaml or upbound.yaml
        #[arg(default_value = ".")]
        project: PathBuf,
    },

    /// Remove every cached package
    CleanCache,

    /// Resolve a package and its dependencies from the cache only
    Resolve {
        /// Package reference (registry/org/name[:tag|@constraint])
        package: String,
    },

    /// List cached package versions
    ListCache {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    let code = match run(cli) {
        Ok(()) => exit_codes::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    };
    std::process::exit(code);
}

/// `RUST_LOG` wins; otherwise `-v` and `--debug` pick the level
fn init_tracing(verbose: u8, debug: bool) {
    let level = match (verbose, debug) {
        (0, false) => "warn",
        (1, false) => "info",
        (0..=2, _) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOptions {
        cache_dir: cli.cache_dir.as_deref(),
        config: cli.config.as_deref(),
        timeout: cli.timeout.map(Duration::from_secs),
    };

    let Commands::Dep(command) = cli.command;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::internal(format!("failed to start async runtime: {e}")))?;

    runtime.block_on(async {
        let (ctx, cancel) = util::command_context(opts.timeout);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });

        match command {
            DepCommands::Add {
                package,
                package_type,
                project,
            } => commands::dep::add(&ctx, &opts, &package, package_type.as_deref(), &project).await,
            DepCommands::UpdateCache { project } => {
                commands::dep::update_cache(&ctx, &opts, &project).await
            }
            DepCommands::CleanCache => commands::dep::clean_cache(&opts),
            DepCommands::Resolve { package } => commands::dep::resolve(&ctx, &opts, &package).await,
            DepCommands::ListCache { json } => commands::dep::list_cache(&opts, json),
        }
    })
}
