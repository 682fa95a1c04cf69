//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};

use git2::{Cred, ErrorCode, FetchOptions, Oid, RemoteCallbacks, Repository, Signature};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;

use super::repository::{CommitId, GitRepository, RefUpdateOutcome, RepositoryProvider, TreeId};

const DEFAULT_SIGNATURE: (&str, &str) = ("bibsync", "bibsync@localhost");

/// [`GitRepository`] backed by a `git2::Repository`.
pub struct Git2Repository {
    repo: Repository,
    workdir: PathBuf,
    fallback_signature: Option<(String, String)>,
}

impl Git2Repository {
    /// Open an existing non-bare repository at `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Self::from_repository(repo)
    }

    /// Find the repository containing `path`, walking up parent directories.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Option<Self>, GitError> {
        let path = path.as_ref();
        let start = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        match Repository::discover(start) {
            Ok(repo) => Self::from_repository(repo).map(Some),
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(path = %path.display(), "no repository found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn from_repository(repo: Repository) -> Result<Self, GitError> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::BareRepository(repo.path().display().to_string()))?
            .to_path_buf();
        Ok(Self {
            repo,
            workdir,
            fallback_signature: None,
        })
    }

    /// Identity used when the repository config has no `user.name`/`user.email`.
    pub fn with_fallback_signature(mut self, name: &str, email: &str) -> Self {
        self.fallback_signature = Some((name.to_string(), email.to_string()));
        self
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// The `.git` directory.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Fetch from a named remote.
    #[instrument(skip(self, token))]
    pub fn fetch(&self, remote_name: &str, token: Option<&str>) -> Result<(), GitError> {
        info!(remote = remote_name, "fetching");
        let mut remote = self.repo.find_remote(remote_name)?;
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = token {
            let tok = tok.to_string();
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(e) if e.code() == ErrorCode::NotFound => {
                let (name, email) = match &self.fallback_signature {
                    Some((name, email)) => (name.as_str(), email.as_str()),
                    None => DEFAULT_SIGNATURE,
                };
                debug!(name, email, "no identity in git config, using fallback");
                Ok(Signature::now(name, email)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_commit(&self, id: &CommitId) -> Result<git2::Commit<'_>, GitError> {
        let oid = to_oid(id)?;
        self.repo
            .find_commit(oid)
            .map_err(|_| GitError::ObjectNotFound(id.to_string()))
    }
}

impl GitRepository for Git2Repository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head(&self) -> Result<CommitId, GitError> {
        let head = self.repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(from_oid(commit.id()))
    }

    fn head_ref_name(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(GitError::DetachedHead);
        }
        head.name()
            .map(str::to_string)
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))
    }

    fn resolve_ref(&self, name: &str) -> Result<CommitId, GitError> {
        let commit = self
            .repo
            .revparse_single(name)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| GitError::RefNotFound(name.to_string()))?;
        Ok(from_oid(commit.id()))
    }

    fn stage_path(&self, path: &Path) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_path(path)?;
        index.write()?;
        debug!(path = %path.display(), "staged");
        Ok(())
    }

    fn reset_path(&self, path: &Path, commit: &CommitId) -> Result<(), GitError> {
        let commit = self.find_commit(commit)?;
        self.repo.reset_default(Some(commit.as_object()), [path])?;
        debug!(path = %path.display(), "index entry reset");
        Ok(())
    }

    fn write_tree_from_index(&self) -> Result<TreeId, GitError> {
        let mut index = self.repo.index()?;
        let oid = index.write_tree()?;
        Ok(TreeId::new(oid.to_string()))
    }

    fn write_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId, GitError> {
        let tree_oid = Oid::from_str(tree.as_str())?;
        let tree = self.repo.find_tree(tree_oid)?;
        let parent_commits = parents
            .iter()
            .map(|p| self.find_commit(p))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
        let signature = self.signature()?;
        let oid = self
            .repo
            .commit(None, &signature, &signature, message, &tree, &parent_refs)?;
        info!(sha = %oid, parents = parents.len(), "created commit");
        Ok(from_oid(oid))
    }

    fn update_ref(
        &self,
        name: &str,
        expected_old: &CommitId,
        new: &CommitId,
        log_message: &str,
    ) -> Result<RefUpdateOutcome, GitError> {
        let old_oid = to_oid(expected_old)?;
        let new_oid = to_oid(new)?;
        match self
            .repo
            .reference_matching(name, new_oid, true, old_oid, log_message)
        {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::Modified => {
                warn!(name, expected = %expected_old, "ref moved underneath us");
                return Ok(RefUpdateOutcome::LockFailure);
            }
            Err(e) if e.code() == ErrorCode::Locked => {
                warn!(name, "ref is locked by another process");
                return Ok(RefUpdateOutcome::LockFailure);
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = if old_oid == new_oid {
            RefUpdateOutcome::NoChange
        } else if self.repo.graph_descendant_of(new_oid, old_oid)? {
            RefUpdateOutcome::FastForward
        } else {
            RefUpdateOutcome::Forced
        };
        info!(name, %outcome, target = %new, "ref updated");
        Ok(outcome)
    }

    fn read_blob_at_commit(
        &self,
        commit: &CommitId,
        path: &Path,
    ) -> Result<Option<Vec<u8>>, GitError> {
        let tree = self.find_commit(commit)?.tree()?;
        let entry = match tree.get_path(path) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
        Ok(Some(blob.content().to_vec()))
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self
            .repo
            .graph_descendant_of(to_oid(descendant)?, to_oid(ancestor)?)?)
    }

    fn merge_base(&self, a: &CommitId, b: &CommitId) -> Result<Option<CommitId>, GitError> {
        match self.repo.merge_base(to_oid(a)?, to_oid(b)?) {
            Ok(oid) => Ok(Some(from_oid(oid))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit_parents(&self, commit: &CommitId) -> Result<Vec<CommitId>, GitError> {
        Ok(self.find_commit(commit)?.parent_ids().map(from_oid).collect())
    }

    fn commit_tree(&self, commit: &CommitId) -> Result<TreeId, GitError> {
        Ok(TreeId::new(self.find_commit(commit)?.tree_id().to_string()))
    }
}

fn to_oid(id: &CommitId) -> Result<Oid, GitError> {
    Ok(Oid::from_str(id.as_str())?)
}

fn from_oid(oid: Oid) -> CommitId {
    CommitId::new(oid.to_string())
}

/// Opens [`Git2Repository`]s by discovery.
#[derive(Debug, Clone, Default)]
pub struct Git2Provider {
    fallback_signature: Option<(String, String)>,
}

impl Git2Provider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_signature(mut self, name: &str, email: &str) -> Self {
        self.fallback_signature = Some((name.to_string(), email.to_string()));
        self
    }
}

impl RepositoryProvider for Git2Provider {
    type Repo = Git2Repository;

    fn open_containing(&self, path: &Path) -> Result<Option<Git2Repository>, GitError> {
        let repo = Git2Repository::discover(path)?;
        Ok(repo.map(|repo| match &self.fallback_signature {
            Some((name, email)) => repo.with_fallback_signature(name, email),
            None => repo,
        }))
    }
}
