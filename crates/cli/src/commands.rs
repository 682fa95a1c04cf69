//! Merge and pull subcommands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use bibsync_core::codec::{JsonLibraryCodec, LibraryCodec};
use bibsync_core::config::AppConfig;
use bibsync_core::conflict::{ConflictResolutionBridge, Resolution, ThreeWayEntryConflict};
use bibsync_core::finalize::{CommitBookkeeper, FinalizeOutcome};
use bibsync_core::git::{Git2Provider, Git2Repository};
use bibsync_core::merge::{MergePlanner, PlanApplier};
use bibsync_core::pull::prepare_pull;

use crate::report;
use crate::state::{self, PullState};
use crate::style;

/// How a pull-type command ended.
#[derive(Debug, PartialEq, Eq)]
pub enum PullStatus {
    UpToDate,
    Finalized(FinalizeOutcome),
    /// Stopped on conflicts; state was saved for `resolve`.
    Conflicts(Vec<ThreeWayEntryConflict>),
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

pub fn cmd_analyze(base: &Path, local: &Path, remote: &Path, json: bool) -> Result<()> {
    let codec = JsonLibraryCodec;
    let read = |path: &Path| {
        codec
            .read_file(path)
            .with_context(|| format!("failed to read {}", path.display()))
    };
    let analysis = MergePlanner::analyze(&read(base)?, &read(local)?, &read(remote)?);

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    report::print_summary(&analysis);
    if !analysis.plan.is_empty() {
        println!();
        println!("{}", report::plan_table(&analysis));
    }
    if analysis.has_conflicts() {
        println!();
        println!("{}", report::conflict_table(&analysis.conflicts));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pull
// ---------------------------------------------------------------------------

fn provider(config: &AppConfig) -> Git2Provider {
    match config.git.fallback_signature() {
        Some((name, email)) => Git2Provider::new().with_fallback_signature(&name, &email),
        None => Git2Provider::new(),
    }
}

fn open_repo(file: &Path) -> Result<Git2Repository> {
    Git2Repository::discover(file)?
        .with_context(|| format!("{} is not inside a git repository", file.display()))
}

/// Absolute form of `file`, so saved state does not depend on the cwd.
fn absolute(file: &Path) -> Result<PathBuf> {
    if file.is_absolute() {
        return Ok(file.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("failed to read current directory")?
        .join(file))
}

/// Blocking part of `pull`.
pub fn pull_blocking(
    config: &AppConfig,
    file: &Path,
    fetch: bool,
    remote_ref: &str,
) -> Result<PullStatus> {
    let file = absolute(file)?;
    let repo = open_repo(&file)?;
    if state::load(repo.git_dir())?.is_some() {
        anyhow::bail!(
            "a pull is already waiting for conflict resolution; run `bibsync resolve` or remove {}",
            state::state_path(repo.git_dir()).display()
        );
    }
    if fetch {
        repo.fetch(&config.git.remote, config.git.token.as_deref())
            .context("fetch failed")?;
    }

    let provider = provider(config);
    let pull = prepare_pull(&provider, &JsonLibraryCodec, &file, remote_ref)?;

    if pull.is_up_to_date() {
        info!("already up to date");
        return Ok(PullStatus::UpToDate);
    }

    let Some(merged) = pull.merged_library() else {
        let conflicts = pull.analysis.conflicts.clone();
        let path = state::save(repo.git_dir(), &PullState::new(file, pull))?;
        debug!(path = %path.display(), "waiting for resolution");
        return Ok(PullStatus::Conflicts(conflicts));
    };

    let original = read_if_exists(&file)?;
    JsonLibraryCodec.write_file(&file, &merged)?;
    match CommitBookkeeper::new(provider).finalize(&file, &pull) {
        Ok(outcome) => Ok(PullStatus::Finalized(outcome)),
        Err(e) => {
            restore(&file, original.as_deref())?;
            Err(anyhow::Error::new(e).context("library restored; nothing was committed"))
        }
    }
}

pub async fn cmd_pull(
    config: AppConfig,
    file: PathBuf,
    fetch: bool,
    remote_ref: String,
) -> Result<PullStatus> {
    let status =
        tokio::task::spawn_blocking(move || pull_blocking(&config, &file, fetch, &remote_ref))
            .await
            .context("pull task panicked")??;

    match &status {
        PullStatus::UpToDate => println!("{}", style::success("Already up to date")),
        PullStatus::Finalized(outcome) => {
            println!("{}", style::success(&format!("Pulled: {outcome}")));
        }
        PullStatus::Conflicts(conflicts) => {
            println!("{}", report::conflict_table(conflicts));
            println!();
            println!(
                "{}",
                style::warn(&format!("{} conflict(s) need resolution", conflicts.len()))
            );
            println!(
                "{}",
                style::dim("Write a resolutions file and run `bibsync resolve --resolved <FILE>`")
            );
        }
    }
    Ok(status)
}

// ---------------------------------------------------------------------------
// conflicts
// ---------------------------------------------------------------------------

pub fn cmd_conflicts(file: &Path) -> Result<()> {
    let repo = open_repo(&absolute(file)?)?;
    let Some(saved) = state::load(repo.git_dir())? else {
        println!("{}", style::success("No pull in progress"));
        return Ok(());
    };

    let conflicts = &saved.pull.analysis.conflicts;
    println!(
        "{}",
        style::header(&format!(
            "Conflicts in {} ({}), saved {}",
            saved.pull.path.display(),
            conflicts.len(),
            saved.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        ))
    );
    println!("{}", report::conflict_table(conflicts));
    Ok(())
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

/// Resolutions file: citation key → resolution.
pub type Resolutions = BTreeMap<String, Resolution>;

pub fn load_resolutions(path: &Path) -> Result<Resolutions> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid resolutions in {}", path.display()))
}

/// Blocking part of `resolve`.
pub fn resolve_blocking(
    config: &AppConfig,
    file: &Path,
    resolved: &Path,
) -> Result<FinalizeOutcome> {
    let file = absolute(file)?;
    let repo = open_repo(&file)?;
    let saved = state::load(repo.git_dir())?.context("no pull is waiting for resolution")?;
    let resolutions = load_resolutions(resolved)?;

    let pull = &saved.pull;
    let entries: Vec<_> = pull
        .analysis
        .conflicts
        .iter()
        .filter_map(|conflict| {
            resolutions
                .get(&conflict.key)
                .map(|r| ConflictResolutionBridge::resolved_entry(conflict, r))
        })
        .collect();

    let plan = ConflictResolutionBridge::resolve_analysis(
        &pull.base_library,
        &pull.local_library,
        &pull.remote_library,
        &entries,
    )?;

    let mut library = pull.local_library.clone();
    PlanApplier::apply_all(&mut library, &plan);
    let original = read_if_exists(&saved.file)?;
    JsonLibraryCodec.write_file(&saved.file, &library)?;

    let outcome = match CommitBookkeeper::new(provider(config)).finalize(&saved.file, pull) {
        Ok(outcome) => outcome,
        Err(e) => {
            restore(&saved.file, original.as_deref())?;
            if e.is_retryable() {
                state::clear(repo.git_dir())?;
                warn!(error = %e, "discarded saved pull after concurrent change");
                return Err(anyhow::Error::new(e)
                    .context("library restored and saved pull discarded; run `bibsync pull` again"));
            }
            return Err(anyhow::Error::new(e).context("library restored; resolutions not applied"));
        }
    };
    state::clear(repo.git_dir())?;
    Ok(outcome)
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Put `path` back to `original`; `None` means it did not exist.
fn restore(path: &Path, original: Option<&[u8]>) -> Result<()> {
    let result = match original {
        Some(bytes) => std::fs::write(path, bytes),
        None => match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    };
    result.with_context(|| format!("failed to restore {}", path.display()))
}

pub async fn cmd_resolve(config: AppConfig, file: PathBuf, resolved: PathBuf) -> Result<()> {
    let outcome =
        tokio::task::spawn_blocking(move || resolve_blocking(&config, &file, &resolved))
            .await
            .context("resolve task panicked")??;
    println!("{}", style::success(&format!("Resolved and committed: {outcome}")));
    Ok(())
}
