//!
//! Trie operations over any node source: insert / remove with node
//! collapsing, lookup, and sealing of new nodes into commitments.
//!

pub mod mutation;
pub mod query;

pub use mutation::{Sealed, TrieMut};
pub use query::lookup;

use crate::commitment::{Commitment, CommitmentScheme};
use crate::error::{Result, TrieError};
use crate::nibbles::NibblePath;
use crate::node::Node;
use crate::storage::{ContentStore, NodeKey, TrieStore, ValueOp, VersionedStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where persisted nodes are read from while walking a trie.
pub trait NodeSource {
    /// The node at `path` whose commitment is `commitment`.
    fn load(&self, path: &NibblePath, commitment: &Commitment) -> Result<Node>;
}

impl NodeSource for ContentStore {
    fn load(&self, _path: &NibblePath, commitment: &Commitment) -> Result<Node> {
        self.get_node(commitment)?
            .ok_or_else(|| TrieError::MissingNode(commitment.to_string()))
    }
}

/// A version-path store seen as of one version.
pub struct VersionedSource<'a> {
    pub store: &'a VersionedStore,
    pub version: u64,
}

impl NodeSource for VersionedSource<'_> {
    fn load(&self, path: &NibblePath, commitment: &Commitment) -> Result<Node> {
        match self.store.get_node_at(self.version, path)? {
            Some(e) if e.commitment == *commitment => Ok(e.node),
            Some(e) => Err(TrieError::MissingNode(format!(
                "path {} at version {}: expected {}, found {} (version {})",
                path, self.version, commitment, e.commitment, e.key.version
            ))),
            None => Err(TrieError::MissingNode(format!(
                "path {} at version {}",
                path, self.version
            ))),
        }
    }
}

/// How a user key becomes a trie path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMode {
    /// 64 nibbles of the key digest; every key has the same depth and no
    /// value ever sits on a branch.
    #[default]
    Hashed,
    /// The key's own nibbles.
    Raw,
}

pub fn key_path(scheme: &dyn CommitmentScheme, mode: KeyMode, key: &[u8]) -> NibblePath {
    match mode {
        KeyMode::Hashed => NibblePath::from_bytes(scheme.digest(key).as_bytes()),
        KeyMode::Raw => NibblePath::from_bytes(key),
    }
}

/// A node created by one commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewNode {
    pub path: NibblePath,
    pub commitment: Commitment,
    pub node: Node,
}

/// Outcome of one logical mutation batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitResult {
    pub version: u64,
    pub root: Commitment,
    pub nodes: Vec<NewNode>,
    /// Superseded entries of the version-path store; always empty for the
    /// content store, whose old nodes are reclaimed by reachability.
    pub stale: Vec<NodeKey>,
    pub values: Vec<ValueOp>,
}

pub type Update = (Vec<u8>, Option<Vec<u8>>);

/// Run `updates` through `trie`, last update of a key wins.
/// Returns the value-log operations to stage next to the nodes.
pub(crate) fn apply_updates<S: NodeSource + ?Sized>(
    trie: &mut TrieMut<'_, S>,
    scheme: &dyn CommitmentScheme,
    mode: KeyMode,
    updates: impl IntoIterator<Item = Update>,
) -> Result<Vec<ValueOp>> {
    let latest = updates.into_iter().collect::<BTreeMap<_, _>>();

    let mut ops = Vec::with_capacity(latest.len());
    for (key, value) in latest {
        let path = key_path(scheme, mode, &key);
        let key_hash = scheme.digest(&key);
        match value {
            Some(v) => {
                trie.insert(path, v.clone())?;
                ops.push(ValueOp::Put(key_hash, v));
            }
            None => {
                if trie.remove(&path)? {
                    ops.push(ValueOp::Delete(key_hash));
                }
            }
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod test;
