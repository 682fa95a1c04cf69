//! In-memory [`GitRepository`] for tests and dry runs.
//!
//! Objects are content-addressed with SHA-256 over a simple encoding, the
//! index is a path → bytes map fed from the real working directory, and
//! refs live in a map. Clones share state, so a test can keep a handle
//! while the code under test works on another.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::GitError;

use super::repository::{CommitId, GitRepository, RefUpdateOutcome, RepositoryProvider, TreeId};

type Files = BTreeMap<PathBuf, Vec<u8>>;
type RefHook = Box<dyn FnOnce(&mut BTreeMap<String, CommitId>) + Send>;

#[derive(Debug, Clone)]
struct MemoryCommit {
    tree: TreeId,
    parents: Vec<CommitId>,
    message: String,
}

#[derive(Default)]
struct MemoryState {
    commits: HashMap<CommitId, MemoryCommit>,
    trees: HashMap<TreeId, Files>,
    index: Files,
    refs: BTreeMap<String, CommitId>,
    /// Symbolic target of HEAD; `None` means detached at `detached_head`.
    head_ref: Option<String>,
    detached_head: Option<CommitId>,
    sequence: u64,
    before_ref_update: Option<RefHook>,
}

impl MemoryState {
    fn put_tree(&mut self, files: Files) -> TreeId {
        let mut hasher = Sha256::new();
        for (path, content) in &files {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(content);
        }
        let id = TreeId::new(hex::encode(hasher.finalize()));
        self.trees.entry(id.clone()).or_insert(files);
        id
    }

    fn put_commit(&mut self, tree: TreeId, parents: Vec<CommitId>, message: &str) -> CommitId {
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(tree.as_str());
        for parent in &parents {
            hasher.update(parent.as_str());
        }
        hasher.update(message);
        hasher.update(self.sequence.to_be_bytes());
        let id = CommitId::new(hex::encode(hasher.finalize()));
        self.commits.insert(
            id.clone(),
            MemoryCommit {
                tree,
                parents,
                message: message.to_string(),
            },
        );
        id
    }

    fn commit(&self, id: &CommitId) -> Result<&MemoryCommit, GitError> {
        self.commits
            .get(id)
            .ok_or_else(|| GitError::ObjectNotFound(id.to_string()))
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError> {
        let mut queue = VecDeque::from([descendant.clone()]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if &id == ancestor {
                return Ok(true);
            }
            if seen.insert(id.clone()) {
                queue.extend(self.commit(&id)?.parents.iter().cloned());
            }
        }
        Ok(false)
    }

    fn ancestors(&self, start: &CommitId) -> Result<Vec<CommitId>, GitError> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start.clone()]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.clone()) {
                queue.extend(self.commit(&id)?.parents.iter().cloned());
                order.push(id);
            }
        }
        Ok(order)
    }
}

/// Shared-state in-memory repository rooted at a real working directory.
#[derive(Clone)]
pub struct MemoryRepository {
    workdir: PathBuf,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRepository {
    /// Empty repository with HEAD on `refs/heads/main`.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let state = MemoryState {
            head_ref: Some("refs/heads/main".to_string()),
            ..Default::default()
        };
        Self {
            workdir: workdir.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write a commit whose tree holds exactly `files`.
    pub fn commit_files(
        &self,
        parents: &[CommitId],
        files: &[(&str, &[u8])],
        message: &str,
    ) -> CommitId {
        let mut state = self.lock();
        let files: Files = files
            .iter()
            .map(|(path, content)| (PathBuf::from(path), content.to_vec()))
            .collect();
        let tree = state.put_tree(files);
        state.put_commit(tree, parents.to_vec(), message)
    }

    pub fn set_ref(&self, name: &str, target: &CommitId) {
        self.lock().refs.insert(name.to_string(), target.clone());
    }

    pub fn ref_target(&self, name: &str) -> Option<CommitId> {
        self.lock().refs.get(name).cloned()
    }

    /// Move the current branch to `commit` and load its tree into the index
    /// (the working directory is left alone).
    pub fn checkout(&self, commit: &CommitId) -> Result<(), GitError> {
        let mut state = self.lock();
        let tree = state.commit(commit)?.tree.clone();
        let files = state
            .trees
            .get(&tree)
            .cloned()
            .ok_or_else(|| GitError::ObjectNotFound(tree.to_string()))?;
        state.index = files;
        match state.head_ref.clone() {
            Some(name) => {
                state.refs.insert(name, commit.clone());
            }
            None => state.detached_head = Some(commit.clone()),
        }
        Ok(())
    }

    /// Detach HEAD at `commit`.
    pub fn detach_head(&self, commit: &CommitId) {
        let mut state = self.lock();
        state.head_ref = None;
        state.detached_head = Some(commit.clone());
    }

    /// Run `hook` on the ref table right before the next ref update, to
    /// simulate another writer racing the update.
    pub fn on_next_ref_update(
        &self,
        hook: impl FnOnce(&mut BTreeMap<String, CommitId>) + Send + 'static,
    ) {
        self.lock().before_ref_update = Some(Box::new(hook));
    }

    pub fn commit_count(&self) -> usize {
        self.lock().commits.len()
    }

    pub fn commit_message(&self, commit: &CommitId) -> Option<String> {
        self.lock().commits.get(commit).map(|c| c.message.clone())
    }

    /// Content of `path` in the index.
    pub fn staged(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().index.get(Path::new(path)).cloned()
    }

    /// Content of `path` in `commit`'s tree.
    pub fn file_at(&self, commit: &CommitId, path: &str) -> Option<Vec<u8>> {
        self.read_blob_at_commit(commit, Path::new(path)).ok().flatten()
    }
}

impl GitRepository for MemoryRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head(&self) -> Result<CommitId, GitError> {
        let state = self.lock();
        match &state.head_ref {
            Some(name) => state
                .refs
                .get(name)
                .cloned()
                .ok_or_else(|| GitError::RefNotFound(name.clone())),
            None => state
                .detached_head
                .clone()
                .ok_or_else(|| GitError::RefNotFound("HEAD".into())),
        }
    }

    fn head_ref_name(&self) -> Result<String, GitError> {
        self.lock().head_ref.clone().ok_or(GitError::DetachedHead)
    }

    fn resolve_ref(&self, name: &str) -> Result<CommitId, GitError> {
        if name == "HEAD" {
            return self.head();
        }
        let state = self.lock();
        if let Some(id) = state.refs.get(name) {
            return Ok(id.clone());
        }
        let id = CommitId::new(name);
        if state.commits.contains_key(&id) {
            return Ok(id);
        }
        Err(GitError::RefNotFound(name.to_string()))
    }

    fn stage_path(&self, path: &Path) -> Result<(), GitError> {
        let full = self.workdir.join(path);
        let mut state = self.lock();
        match std::fs::read(&full) {
            Ok(content) => {
                state.index.insert(path.to_path_buf(), content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                state.index.remove(path);
            }
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), "staged");
        Ok(())
    }

    fn reset_path(&self, path: &Path, commit: &CommitId) -> Result<(), GitError> {
        let content = self.read_blob_at_commit(commit, path)?;
        let mut state = self.lock();
        match content {
            Some(content) => {
                state.index.insert(path.to_path_buf(), content);
            }
            None => {
                state.index.remove(path);
            }
        }
        Ok(())
    }

    fn write_tree_from_index(&self) -> Result<TreeId, GitError> {
        let mut state = self.lock();
        let files = state.index.clone();
        Ok(state.put_tree(files))
    }

    fn write_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId, GitError> {
        let mut state = self.lock();
        if !state.trees.contains_key(tree) {
            return Err(GitError::ObjectNotFound(tree.to_string()));
        }
        for parent in parents {
            state.commit(parent)?;
        }
        Ok(state.put_commit(tree.clone(), parents.to_vec(), message))
    }

    fn update_ref(
        &self,
        name: &str,
        expected_old: &CommitId,
        new: &CommitId,
        _log_message: &str,
    ) -> Result<RefUpdateOutcome, GitError> {
        let mut state = self.lock();
        if let Some(hook) = state.before_ref_update.take() {
            hook(&mut state.refs);
        }
        state.commit(new)?;

        if state.refs.get(name) != Some(expected_old) {
            debug!(name, expected = %expected_old, "ref CAS mismatch");
            return Ok(RefUpdateOutcome::LockFailure);
        }

        let outcome = if expected_old == new {
            RefUpdateOutcome::NoChange
        } else if state.is_ancestor(expected_old, new)? {
            RefUpdateOutcome::FastForward
        } else {
            RefUpdateOutcome::Forced
        };
        state.refs.insert(name.to_string(), new.clone());
        Ok(outcome)
    }

    fn read_blob_at_commit(
        &self,
        commit: &CommitId,
        path: &Path,
    ) -> Result<Option<Vec<u8>>, GitError> {
        let state = self.lock();
        let tree = &state.commit(commit)?.tree;
        Ok(state
            .trees
            .get(tree)
            .and_then(|files| files.get(path))
            .cloned())
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError> {
        self.lock().is_ancestor(ancestor, descendant)
    }

    fn merge_base(&self, a: &CommitId, b: &CommitId) -> Result<Option<CommitId>, GitError> {
        let state = self.lock();
        let from_a: HashSet<CommitId> = state.ancestors(a)?.into_iter().collect();
        Ok(state
            .ancestors(b)?
            .into_iter()
            .find(|id| from_a.contains(id)))
    }

    fn commit_parents(&self, commit: &CommitId) -> Result<Vec<CommitId>, GitError> {
        Ok(self.lock().commit(commit)?.parents.clone())
    }

    fn commit_tree(&self, commit: &CommitId) -> Result<TreeId, GitError> {
        Ok(self.lock().commit(commit)?.tree.clone())
    }
}

/// Hands out a [`MemoryRepository`] for paths under its working directory.
#[derive(Clone)]
pub struct MemoryProvider {
    repo: MemoryRepository,
    any_path: bool,
}

impl MemoryProvider {
    pub fn new(repo: MemoryRepository) -> Self {
        Self {
            repo,
            any_path: false,
        }
    }

    /// Return the repository for every path, even ones outside its
    /// working directory.
    pub fn for_any_path(repo: MemoryRepository) -> Self {
        Self {
            repo,
            any_path: true,
        }
    }
}

impl RepositoryProvider for MemoryProvider {
    type Repo = MemoryRepository;

    fn open_containing(&self, path: &Path) -> Result<Option<MemoryRepository>, GitError> {
        if self.any_path || path.starts_with(self.repo.workdir()) {
            Ok(Some(self.repo.clone()))
        } else {
            Ok(None)
        }
    }
}
