//! Commit bookkeeping for a finished pull.
//!
//! Once the merged library has been written to disk, [`CommitBookkeeper`]
//! records it with the right history shape:
//!
//! | local head vs. remote | file equals remote | result                         |
//! |-----------------------|--------------------|--------------------------------|
//! | behind                | yes                | fast-forward to remote         |
//! | behind                | no                 | commit on top of remote        |
//! | diverged              | n/a                | merge commit `[local, remote]` |
//!
//! HEAD must still be where it was when the pull was prepared, and the
//! branch ref is moved with a compare-and-swap so a concurrent writer makes
//! the whole operation fail instead of being overwritten.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::SyncError;
use crate::git::{CommitId, GitRepository, RepositoryProvider};
use crate::pull::{locate, PullComputation};

pub const MERGE_COMMIT_MESSAGE: &str = "semantic merge, GUI-applied";
pub const ON_TOP_COMMIT_MESSAGE: &str = "semantic merge, GUI-applied on top of remote";

/// What finalize did to the branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "commit", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// Branch moved to the remote commit; nothing new was written.
    FastForward,
    NewCommit(CommitId),
}

impl fmt::Display for FinalizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastForward => write!(f, "fast-forward"),
            Self::NewCommit(id) => write!(f, "new commit {id}"),
        }
    }
}

/// Finalizes pulls against whatever repository contains the library file.
pub struct CommitBookkeeper<P> {
    provider: P,
}

impl<P: RepositoryProvider> CommitBookkeeper<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Stage `file` and commit it in the shape dictated by `pull`.
    ///
    /// All-or-nothing: on error the branch ref is untouched and the index
    /// entry for `file` is reset to its state at `pull.local_head`. A commit
    /// object may have been written, but nothing references it.
    #[instrument(skip(self, file, pull), fields(file = %file.display()))]
    pub fn finalize(
        &self,
        file: &Path,
        pull: &PullComputation,
    ) -> Result<FinalizeOutcome, SyncError> {
        let (repo, path) = locate(&self.provider, file)?;

        let head = repo.head()?;
        if head != pull.local_head {
            warn!(expected = %pull.local_head, actual = %head, "HEAD moved since pull was prepared");
            return Err(SyncError::ConcurrentModification {
                expected: pull.local_head.to_string(),
                actual: head.to_string(),
            });
        }
        let branch = repo.head_ref_name()?;

        repo.stage_path(&path)?;
        let result = commit_and_move(&repo, &path, &branch, pull);
        if result.is_err() {
            if let Err(e) = repo.reset_path(&path, &pull.local_head) {
                warn!(error = %e, "failed to unstage library after aborted finalize");
            }
        }
        result
    }
}

/// Write the commit (if any) for an already staged file and move `branch`.
fn commit_and_move<R: GitRepository>(
    repo: &R,
    path: &Path,
    branch: &str,
    pull: &PullComputation,
) -> Result<FinalizeOutcome, SyncError> {
    let behind = repo.is_ancestor(&pull.local_head, &pull.remote)?;
    let (target, outcome) = if behind {
        let on_disk = std::fs::read(repo.workdir().join(path))?;
        let at_remote = repo.read_blob_at_commit(&pull.remote, path)?;
        if at_remote.as_deref() == Some(on_disk.as_slice()) {
            debug!("file matches remote, fast-forwarding");
            (pull.remote.clone(), FinalizeOutcome::FastForward)
        } else {
            let tree = repo.write_tree_from_index()?;
            let commit = repo.write_commit(&tree, &[pull.remote.clone()], ON_TOP_COMMIT_MESSAGE)?;
            (commit.clone(), FinalizeOutcome::NewCommit(commit))
        }
    } else {
        let tree = repo.write_tree_from_index()?;
        let commit = repo.write_commit(
            &tree,
            &[pull.local_head.clone(), pull.remote.clone()],
            MERGE_COMMIT_MESSAGE,
        )?;
        (commit.clone(), FinalizeOutcome::NewCommit(commit))
    };

    let log_message = format!("bibsync: {outcome}");
    let update = repo.update_ref(branch, &pull.local_head, &target, &log_message)?;
    if !update.is_success() {
        warn!(branch = %branch, outcome = %update, "ref update lost a race");
        return Err(SyncError::RefUpdateFailed {
            refname: branch.to_string(),
            outcome: update,
        });
    }

    info!(branch = %branch, result = %outcome, ref_update = %update, "pull finalized");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitError;
    use crate::git::{MemoryProvider, MemoryRepository, RefUpdateOutcome};
    use crate::merge::MergeAnalysis;
    use crate::model::RecordCollection;
    use std::path::PathBuf;

    const MAIN: &str = "refs/heads/main";

    fn pull(local_head: &CommitId, remote: &CommitId) -> PullComputation {
        PullComputation {
            path: PathBuf::from("lib.json"),
            remote_ref: "refs/remotes/origin/main".into(),
            local_head: local_head.clone(),
            remote: remote.clone(),
            base: None,
            base_library: RecordCollection::new(),
            local_library: RecordCollection::new(),
            remote_library: RecordCollection::new(),
            analysis: MergeAnalysis::default(),
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        repo: MemoryRepository,
        base: CommitId,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let repo = MemoryRepository::new(dir.path());
            let base = repo.commit_files(&[], &[("lib.json", b"base".as_slice())], "base");
            repo.checkout(&base).unwrap();
            Self { dir, repo, base }
        }

        fn file(&self) -> PathBuf {
            self.dir.path().join("lib.json")
        }

        fn write(&self, content: &[u8]) {
            std::fs::write(self.file(), content).unwrap();
        }

        fn bookkeeper(&self) -> CommitBookkeeper<MemoryProvider> {
            CommitBookkeeper::new(MemoryProvider::new(self.repo.clone()))
        }
    }

    #[test]
    fn test_fast_forward_when_file_equals_remote() {
        let fx = Fixture::new();
        let remote = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"remote".as_slice())], "r");
        fx.write(b"remote");
        let before = fx.repo.commit_count();

        let outcome = fx.bookkeeper().finalize(&fx.file(), &pull(&fx.base, &remote)).unwrap();

        assert_eq!(outcome, FinalizeOutcome::FastForward);
        assert_eq!(fx.repo.commit_count(), before);
        assert_eq!(fx.repo.ref_target(MAIN), Some(remote));
    }

    #[test]
    fn test_single_parent_commit_when_behind_with_edits() {
        let fx = Fixture::new();
        let remote = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"remote".as_slice())], "r");
        fx.write(b"remote plus edits");

        let outcome = fx.bookkeeper().finalize(&fx.file(), &pull(&fx.base, &remote)).unwrap();

        let FinalizeOutcome::NewCommit(id) = outcome else {
            panic!("expected a new commit");
        };
        assert_eq!(fx.repo.commit_parents(&id).unwrap(), vec![remote]);
        assert_eq!(fx.repo.commit_message(&id).as_deref(), Some(ON_TOP_COMMIT_MESSAGE));
        assert_eq!(fx.repo.file_at(&id, "lib.json"), Some(b"remote plus edits".to_vec()));
        assert_eq!(fx.repo.ref_target(MAIN), Some(id));
    }

    #[test]
    fn test_merge_commit_when_diverged() {
        let fx = Fixture::new();
        let local = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"local".as_slice())], "l");
        let remote = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"remote".as_slice())], "r");
        fx.repo.checkout(&local).unwrap();
        fx.write(b"merged");

        let outcome = fx.bookkeeper().finalize(&fx.file(), &pull(&local, &remote)).unwrap();

        let FinalizeOutcome::NewCommit(id) = outcome else {
            panic!("expected a merge commit");
        };
        assert_eq!(fx.repo.commit_parents(&id).unwrap(), vec![local, remote]);
        assert_eq!(fx.repo.commit_message(&id).as_deref(), Some(MERGE_COMMIT_MESSAGE));
        assert_eq!(fx.repo.file_at(&id, "lib.json"), Some(b"merged".to_vec()));
    }

    #[test]
    fn test_stale_head_is_rejected() {
        let fx = Fixture::new();
        let remote = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"remote".as_slice())], "r");
        let moved = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"other".as_slice())], "m");
        fx.repo.set_ref(MAIN, &moved);
        fx.write(b"remote");

        let err = fx
            .bookkeeper()
            .finalize(&fx.file(), &pull(&fx.base, &remote))
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentModification { .. }));
        assert!(err.is_retryable());
        assert_eq!(fx.repo.ref_target(MAIN), Some(moved));
    }

    #[test]
    fn test_lost_ref_race_fails() {
        let fx = Fixture::new();
        let remote = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"remote".as_slice())], "r");
        let racer = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"racer".as_slice())], "x");
        fx.write(b"edited");
        let racing = racer.clone();
        fx.repo.on_next_ref_update(move |refs| {
            refs.insert(MAIN.into(), racing);
        });

        let err = fx
            .bookkeeper()
            .finalize(&fx.file(), &pull(&fx.base, &remote))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::RefUpdateFailed { outcome: RefUpdateOutcome::LockFailure, .. }
        ));
        assert_eq!(fx.repo.ref_target(MAIN), Some(racer));
        assert_eq!(fx.repo.staged("lib.json"), Some(b"base".to_vec()));
    }

    #[test]
    fn test_detached_head_is_rejected() {
        let fx = Fixture::new();
        let remote = fx
            .repo
            .commit_files(&[fx.base.clone()], &[("lib.json", b"remote".as_slice())], "r");
        fx.repo.detach_head(&fx.base);
        fx.write(b"edited");
        let before = fx.repo.commit_count();

        let err = fx
            .bookkeeper()
            .finalize(&fx.file(), &pull(&fx.base, &remote))
            .unwrap_err();
        assert!(matches!(err, SyncError::Git(GitError::DetachedHead)));
        assert!(!err.is_retryable());
        assert_eq!(fx.repo.ref_target(MAIN), Some(fx.base.clone()));
        assert_eq!(fx.repo.commit_count(), before);
        assert_eq!(fx.repo.staged("lib.json"), Some(b"base".to_vec()));
    }

    #[test]
    fn test_not_a_git_repository() {
        let fx = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("lib.json");
        std::fs::write(&file, b"x").unwrap();

        let err = fx
            .bookkeeper()
            .finalize(&file, &pull(&fx.base, &fx.base))
            .unwrap_err();
        assert!(matches!(err, SyncError::NotAGitRepository { .. }));
    }

    #[test]
    fn test_path_outside_repository() {
        let fx = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("lib.json");
        std::fs::write(&file, b"x").unwrap();

        let bookkeeper = CommitBookkeeper::new(MemoryProvider::for_any_path(fx.repo.clone()));
        let err = bookkeeper
            .finalize(&file, &pull(&fx.base, &fx.base))
            .unwrap_err();
        assert!(matches!(err, SyncError::PathOutsideRepository { .. }));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(FinalizeOutcome::FastForward.to_string(), "fast-forward");
        assert_eq!(
            FinalizeOutcome::NewCommit(CommitId::new("abc")).to_string(),
            "new commit abc"
        );
    }
}
