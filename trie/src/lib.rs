//! # vstrie
//!
//! A persistent, versioned, authenticated key-value trie.
//!
//! Every commit produces a new version with its own root commitment; any
//! retained version can be read, and any key can be proven present or
//! absent against any retained root without access to the store.
//!
//! Two front-ends share the same node model, commitment schemes and proof
//! engine:
//!
//! - [`MerklePatriciaTrie`]: nodes are content-addressed, identical subtrees
//!   are shared, garbage is reclaimed by reference counting or mark-and-sweep
//! - [`VersionedTrie`]: nodes are addressed by `(path, version)`, superseded
//!   nodes are tracked in a stale index, pruned by version and rolled back on
//!   demand
//!
//! # Examples
//!
//! ```
//! use vstrie::{MerklePatriciaTrie, ContentStore, StoreOptions, TrieConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(ContentStore::in_memory(StoreOptions::default()).unwrap());
//! let trie = MerklePatriciaTrie::new(store, TrieConfig::default());
//!
//! let r = trie
//!     .commit(1, vec![(b"alice".to_vec(), Some(b"100".to_vec()))])
//!     .unwrap();
//! assert_eq!(trie.get(b"alice").unwrap(), Some(b"100".to_vec()));
//!
//! let proof = trie.get_proof(b"alice", 1).unwrap().unwrap();
//! assert!(trie.verify_proof(&r.root, b"alice", Some(b"100"), true, &proof));
//! ```
//!

#![deny(warnings)]
#![cfg_attr(test, allow(warnings))]

pub mod commitment;
pub mod error;
pub mod gc;
pub mod jmt;
pub mod metrics;
pub mod mpt;
pub mod nibbles;
pub mod node;
pub mod proof;
pub mod storage;
pub mod trie;

pub use commitment::{Commitment, CommitmentScheme, HashAlgo, SchemeKind};
pub use error::{Result, TrieError};
pub use gc::{
    GcProgress, GcReport, GcStrategy, MarkSweepGc, PruneReport, RefCountGc, RetentionPolicy,
    StalePruneGc,
};
pub use jmt::VersionedTrie;
pub use metrics::{NoopMetrics, TrieMetrics};
pub use mpt::MerklePatriciaTrie;
pub use nibbles::NibblePath;
pub use node::{Node, NodeCodec, NodeHandle};
pub use proof::{Proof, ProofStep};
pub use storage::{
    CommitBatch, CommitConfig, ContentStore, NodeKey, StoreOptions, TrieStore, ValueOp,
    ValuePrunePolicy, VersionedRoot, VersionedStore,
};
pub use trie::{CommitResult, KeyMode, NewNode, Update};

pub use vstrie_core;

use serde::{Deserialize, Serialize};

/// Front-end settings, fixed for the lifetime of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    pub scheme: SchemeKind,
    /// `None` picks the default hash function of `scheme`.
    pub hash: Option<HashAlgo>,
    pub key_mode: KeyMode,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            scheme: SchemeKind::Classic,
            hash: None,
            key_mode: KeyMode::Hashed,
        }
    }
}

impl TrieConfig {
    pub fn compact() -> Self {
        Self {
            scheme: SchemeKind::Compact,
            ..Self::default()
        }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(TrieError::from)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(TrieError::from)
    }
}
