//!
//! Instrumentation hook for the trie front-ends.
//!
//! Every method has an empty default, so an implementation only overrides
//! what it exports. Calls happen on the caller's thread after the operation
//! finished; failed operations are not recorded.
//!

use std::time::Duration;

pub trait TrieMetrics: Send + Sync {
    /// `nodes` written and `stale` nodes superseded by the commit.
    fn record_commit(&self, _version: u64, _nodes: usize, _stale: usize, _elapsed: Duration) {}

    fn record_read(&self, _version: u64, _found: bool, _elapsed: Duration) {}

    /// `len` is the number of proof entries (nodes or steps).
    fn record_proof(&self, _version: u64, _len: usize, _elapsed: Duration) {}

    /// Node deletions of a GC or prune run.
    fn record_gc(&self, _deleted: u64, _elapsed: Duration) {}
}

/// Records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl TrieMetrics for NoopMetrics {}
