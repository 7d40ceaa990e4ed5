//!
//! Node garbage collection.
//!
//! One strategy per store: stale-list pruning for the version-path store,
//! reference counting or mark-and-sweep for the content store. Value-log
//! compaction is separate and shared (`StoreBase::compact_values`).
//!

mod mark_sweep;
mod refcount;
mod stale;

pub use mark_sweep::MarkSweepGc;
pub use refcount::RefCountGc;
pub use stale::{prune_up_to, PruneReport, StalePruneGc};

use crate::commitment::Commitment;
use crate::error::Result;
use crate::storage::{CommitBatch, TrieStore, VersionedRoot};
use crate::trie::NewNode;
use serde::{Deserialize, Serialize};

/// Which versions a GC run must keep readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// The newest `n` versions; the latest one is always kept.
    KeepLatest(usize),
    /// Every version `>= v`, plus the latest one.
    KeepFrom(u64),
}

impl RetentionPolicy {
    /// Split ascending `versions` into (retained, dropped).
    pub fn partition(&self, versions: &[VersionedRoot]) -> (Vec<VersionedRoot>, Vec<VersionedRoot>) {
        let Some(latest) = versions.last().map(|r| r.version) else {
            return (vec![], vec![]);
        };
        let floor = self.floor(versions).unwrap_or(latest);
        versions.iter().copied().partition(|r| r.version >= floor)
    }

    /// Oldest retained version.
    pub fn floor(&self, versions: &[VersionedRoot]) -> Option<u64> {
        let latest = versions.last()?.version;
        Some(match self {
            RetentionPolicy::KeepLatest(n) => {
                let n = (*n).max(1);
                versions[versions.len().saturating_sub(n)].version
            }
            RetentionPolicy::KeepFrom(v) => (*v).min(latest),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Nodes found reachable from retained versions.
    pub marked: u64,
    pub deleted: u64,
    /// Nodes (or stale entries) examined.
    pub total: u64,
    pub duration_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcPhase {
    Mark,
    Sweep,
    Retire,
    Prune,
}

/// Passed to the progress callback after every chunk; a caller that wants
/// to stop early returns from its own loop between runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcProgress {
    pub phase: GcPhase,
    pub completed: u64,
    /// `0` when unknown in advance.
    pub total: u64,
}

pub trait GcStrategy<S: TrieStore>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bookkeeping staged inside the commit batch of a new root.
    fn on_commit(
        &self,
        _store: &S,
        _batch: &mut CommitBatch<'_, S::Key>,
        _root: &Commitment,
        _nodes: &[NewNode],
    ) -> Result<()> {
        Ok(())
    }

    fn run(
        &self,
        store: &S,
        policy: &RetentionPolicy,
        progress: &mut dyn FnMut(&GcProgress),
    ) -> Result<GcReport>;
}

#[cfg(test)]
mod test {
    use super::*;

    fn roots(vs: &[u64]) -> Vec<VersionedRoot> {
        vs.iter()
            .map(|v| VersionedRoot {
                version: *v,
                root: Commitment([*v as u8; 32]),
            })
            .collect()
    }

    #[test]
    fn retention() {
        let vs = roots(&[1, 2, 5, 9]);

        let (keep, drop) = RetentionPolicy::KeepLatest(2).partition(&vs);
        assert_eq!(keep, roots(&[5, 9]));
        assert_eq!(drop, roots(&[1, 2]));

        let (keep, _) = RetentionPolicy::KeepLatest(0).partition(&vs);
        assert_eq!(keep, roots(&[9]));

        let (keep, _) = RetentionPolicy::KeepLatest(10).partition(&vs);
        assert_eq!(keep, vs);

        assert_eq!(RetentionPolicy::KeepFrom(3).floor(&vs), Some(3));
        let (keep, drop) = RetentionPolicy::KeepFrom(3).partition(&vs);
        assert_eq!(keep, roots(&[5, 9]));
        assert_eq!(drop, roots(&[1, 2]));

        let (keep, _) = RetentionPolicy::KeepFrom(100).partition(&vs);
        assert_eq!(keep, roots(&[9]));

        assert_eq!(RetentionPolicy::KeepFrom(1).floor(&[]), None);
    }
}
