//! bibsync command-line tool.
//!
//! Three-way merges a git-tracked bibliography library with its remote
//! version, escalates record conflicts for manual resolution, and records
//! the merge with the right commit shape.

mod commands;
mod report;
mod state;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bibsync_core::config::AppConfig;
use bibsync_core::errors::{ConfigError, ErrorKind, SyncError};

use commands::PullStatus;

const DEFAULT_CONFIG: &str = "bibsync.toml";

/// Exit status of a pull that stopped on conflicts.
const EXIT_CONFLICTS: u8 = 2;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// bibsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "bibsync",
    version,
    about = "Semantic three-way sync of a git-tracked bibliography"
)]
struct Cli {
    /// Path to the TOML configuration file (default: ./bibsync.toml if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override: trace, debug, info, warn, error.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Merge three library files and show the plan and conflicts.
    Analyze {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        local: PathBuf,
        #[arg(long)]
        remote: PathBuf,
        /// Print the analysis as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Merge the remote version of the library into the working copy.
    Pull {
        /// Library file (default: `library.path` from the config).
        file: Option<PathBuf>,
        /// Fetch from the configured remote first.
        #[arg(long)]
        fetch: bool,
        /// Ref to merge (default: derived from `git.remote`/`git.branch`).
        #[arg(long)]
        remote_ref: Option<String>,
    },

    /// List the conflicts of the pull waiting for resolution.
    Conflicts {
        /// Library file (default: `library.path` from the config).
        file: Option<PathBuf>,
    },

    /// Apply conflict resolutions and finish the waiting pull.
    Resolve {
        /// Library file (default: `library.path` from the config).
        file: Option<PathBuf>,
        /// JSON file mapping citation keys to resolutions.
        #[arg(long)]
        resolved: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.log_level.as_deref(), &config);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            if let Some(hint) = hint(&e) {
                eprintln!("{}", style::dim(hint));
            }
            ExitCode::FAILURE
        }
    }
}

/// `--log-level`, then `RUST_LOG`, then the config's `log_level`.
fn init_tracing(flag: Option<&str>, config: &AppConfig) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, config: AppConfig) -> Result<ExitCode> {
    let library = |file: Option<PathBuf>| file.unwrap_or_else(|| config.library.path.clone());

    match cli.command {
        Commands::Init { output } => cmd_init(&output)?,
        Commands::Validate => cmd_validate(cli.config.as_deref())?,
        Commands::Analyze {
            base,
            local,
            remote,
            json,
        } => commands::cmd_analyze(&base, &local, &remote, json)?,
        Commands::Pull {
            file,
            fetch,
            remote_ref,
        } => {
            let file = library(file);
            let remote_ref = remote_ref.unwrap_or_else(|| config.git.remote_ref());
            let status = commands::cmd_pull(config.clone(), file, fetch, remote_ref).await?;
            if matches!(status, PullStatus::Conflicts(_)) {
                return Ok(ExitCode::from(EXIT_CONFLICTS));
            }
        }
        Commands::Conflicts { file } => commands::cmd_conflicts(&library(file))?,
        Commands::Resolve { file, resolved } => {
            let file = library(file);
            commands::cmd_resolve(config.clone(), file, resolved).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Follow-up advice for sync failures, by error kind.
fn hint(err: &anyhow::Error) -> Option<&'static str> {
    let sync = err.chain().find_map(|e| e.downcast_ref::<SyncError>())?;
    match sync.kind() {
        ErrorKind::Configuration => {
            Some("hint: the library file must live inside a git working tree (see library.path)")
        }
        ErrorKind::ConcurrentModification => {
            Some("hint: the branch moved while bibsync was working; run `bibsync pull` again")
        }
        ErrorKind::RepositoryIo => None,
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config. An explicit path must exist; the default one may be
/// missing, in which case defaults apply.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (path, explicit) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG), false),
    };
    match AppConfig::load_and_resolve(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) if !explicit => Ok(AppConfig::default()),
        Err(e) => Err(e).with_context(|| format!("failed to load {}", path.display())),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::template()).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Point library.path at your bibliography file");
    println!("  2. Set git.remote / git.branch if they differ from origin/main");
    println!("  3. Validate with: bibsync validate --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let config_path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG));
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Library file : {}", config.library.path.display());
    println!("  Remote       : {}", config.git.remote);
    println!("  Branch       : {}", config.git.branch);
    println!("  Remote ref   : {}", config.git.remote_ref());
    println!(
        "  Fetch token  : {}",
        match (&config.git.token_env, &config.git.token) {
            (None, _) => "not configured",
            (Some(_), Some(_)) => "set",
            (Some(_), None) => "NOT SET",
        }
    );
    println!("  Log level    : {}", config.log_level);
    println!();
    println!("Configuration is valid.");

    Ok(())
}
