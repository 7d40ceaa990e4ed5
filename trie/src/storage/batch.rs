use super::{schema::*, CommitConfig, StoreBase, StoreKey, VersionedRoot};
use crate::commitment::Commitment;
use crate::error::{Result, TrieError};
use crate::node::{Node, NodeCodec};
use std::marker::PhantomData;
use tracing::debug;
use vstrie_core::Batch;

/// Writes of one version, staged in memory and applied by `commit` as a
/// single atomic engine write.
///
/// After `commit` or `close` every further call fails with
/// `TrieError::AlreadyCommitted`.
pub struct CommitBatch<'a, K: StoreKey> {
    base: &'a StoreBase,
    version: u64,
    sync: bool,
    batch: Batch,
    root: Option<Commitment>,
    finished: bool,

    n_nodes: usize,
    n_stale: usize,
    n_values: usize,

    _key: PhantomData<K>,
}

impl<'a, K: StoreKey> CommitBatch<'a, K> {
    pub(crate) fn new(base: &'a StoreBase, version: u64, config: CommitConfig) -> Result<Self> {
        check_version(base, version)?;
        Ok(Self {
            base,
            version,
            sync: config.sync.unwrap_or(base.options.sync_commits),
            batch: Batch::new(),
            root: None,
            finished: false,
            n_nodes: 0,
            n_stale: 0,
            n_values: 0,
            _key: PhantomData,
        })
    }

    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline(always)]
    fn check_open(&self) -> Result<()> {
        if self.finished {
            Err(TrieError::AlreadyCommitted(self.version))
        } else {
            Ok(())
        }
    }

    /// Staged engine batch, for bookkeeping that must land atomically with
    /// the nodes (reference counters).
    pub(crate) fn raw(&mut self) -> Result<&mut Batch> {
        self.check_open()?;
        Ok(&mut self.batch)
    }

    pub fn put_node(&mut self, key: &K, commitment: &Commitment, node: &Node) -> Result<()> {
        self.check_open()?;
        let encoded = NodeCodec::encode(node)?;
        self.batch.insert(
            NS_NODES,
            &key.node_key_bytes(),
            &key.node_value(commitment, &encoded),
        );
        if self.base.options.version_indices {
            if let Some(idx) = key.version_index_key() {
                self.batch.insert(NS_NODE_VERSIONS, &idx, &[]);
            }
        }
        self.n_nodes += 1;
        Ok(())
    }

    /// Record that `key` was superseded by this version.
    pub fn mark_stale(&mut self, key: &K) -> Result<()> {
        self.check_open()?;
        self.batch
            .insert(NS_STALE, &stale_key(self.version, &key.node_key_bytes()), &[]);
        self.n_stale += 1;
        Ok(())
    }

    pub fn put_value(&mut self, key_hash: &Commitment, value: &[u8]) -> Result<()> {
        self.stage_value(key_hash, Some(value))
    }

    /// Tombstone at this version; older versions keep their value.
    pub fn delete_value(&mut self, key_hash: &Commitment) -> Result<()> {
        self.stage_value(key_hash, None)
    }

    fn stage_value(&mut self, key_hash: &Commitment, value: Option<&[u8]>) -> Result<()> {
        self.check_open()?;
        self.batch.insert(
            NS_VALUES,
            &value_key(key_hash, self.version),
            &encode_value(value),
        );
        if self.base.options.version_indices {
            self.batch.insert(
                NS_VALUE_VERSIONS,
                &value_version_key(self.version, key_hash),
                &[],
            );
        }
        self.n_values += 1;
        Ok(())
    }

    pub fn set_root_hash(&mut self, root: Commitment) -> Result<()> {
        self.check_open()?;
        self.root = Some(root);
        Ok(())
    }

    /// Apply everything staged, plus the root index and the latest
    /// pointers, in one atomic write.
    pub fn commit(&mut self) -> Result<VersionedRoot> {
        self.check_open()?;
        let root = self.root.ok_or_else(|| {
            TrieError::Store(format!("no root staged for version {}", self.version))
        })?;

        let _guard = self.base.lock_writer();
        check_version(self.base, self.version)?;

        let mut batch = std::mem::take(&mut self.batch).with_sync(self.sync);
        batch.insert(NS_ROOTS, &version_key(self.version), root.as_bytes());
        batch.insert(NS_ROOTS, LATEST_ROOT_KEY, root.as_bytes());
        batch.insert(NS_ROOTS, LATEST_VERSION_KEY, &version_key(self.version));

        self.finished = true;
        self.base.engine.write(batch)?;

        debug!(
            version = self.version,
            root = %root,
            nodes = self.n_nodes,
            stale = self.n_stale,
            values = self.n_values,
            sync = self.sync,
            "commit applied"
        );
        Ok(VersionedRoot {
            version: self.version,
            root,
        })
    }

    /// Drop everything staged without writing.
    pub fn close(&mut self) {
        self.batch.clear();
        self.root = None;
        self.finished = true;
    }
}

fn check_version(base: &StoreBase, version: u64) -> Result<()> {
    match base.latest_version()? {
        Some(latest) if version <= latest => Err(TrieError::InvalidVersion { version, latest }),
        _ => Ok(()),
    }
}
