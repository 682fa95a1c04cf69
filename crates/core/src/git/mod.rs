//! Git access for pull preparation and commit bookkeeping.

pub mod client;
pub mod memory;
pub mod repository;

pub use client::{Git2Provider, Git2Repository};
pub use memory::{MemoryProvider, MemoryRepository};
pub use repository::{CommitId, GitRepository, RefUpdateOutcome, RepositoryProvider, TreeId};
