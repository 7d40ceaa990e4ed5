//!
//! Persistent stores.
//!
//! Two flavors share one value log, one root index and one commit protocol:
//!
//! - [`ContentStore`]: a node's key is its own commitment
//! - [`VersionedStore`]: a node's key is `(path, version)`, which answers
//!   point-in-time reads directly and needs explicit pruning
//!

pub mod batch;
pub mod content;
pub mod schema;
pub mod versioned;

pub use batch::CommitBatch;
pub use content::ContentStore;
pub use versioned::{NodeEntry, VersionedStore};

use crate::commitment::{Commitment, HASH_LEN};
use crate::error::{Result, TrieError};
use crate::nibbles::NibblePath;
use parking_lot::{Mutex, MutexGuard};
use schema::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use vstrie_core::{Batch, Engine, Seek};

/////////////////////////////////////////////////////////////////////////////
/////////////////////////////////////////////////////////////////////////////

pub const DEFAULT_GC_BATCH_SIZE: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Maintain the version indices that rollback depends on.
    /// Fixed when the store is created.
    pub version_indices: bool,
    /// fsync every commit before it returns.
    pub sync_commits: bool,
    /// Upper bound of deletions per atomic GC batch.
    pub gc_batch_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            version_indices: true,
            sync_commits: false,
            gc_batch_size: DEFAULT_GC_BATCH_SIZE,
        }
    }
}

impl StoreOptions {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(TrieError::from)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(TrieError::from)
    }
}

/// Per-commit overrides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitConfig {
    /// `None` follows `StoreOptions::sync_commits`.
    pub sync: Option<bool>,
}

impl CommitConfig {
    pub fn durable() -> Self {
        Self { sync: Some(true) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedRoot {
    pub version: u64,
    pub root: Commitment,
}

/// Address of a node in the version-path store.
///
/// Ordered by `(path, version)`; the byte form keeps that order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub path: NibblePath,
    pub version: u64,
}

impl NodeKey {
    pub fn new(path: NibblePath, version: u64) -> Self {
        Self { path, version }
    }

    /// `ordered(path) ++ version`
    pub fn encode(&self) -> Vec<u8> {
        let mut k = self.path.encode_ordered();
        k.extend_from_slice(&self.version.to_be_bytes());
        k
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (path, used) = NibblePath::decode_ordered(bytes)?;
        Ok(Self {
            path,
            version: parse_version(&bytes[used..])?,
        })
    }

    /// `version ++ ordered(path)`, the key of the node version index.
    pub fn index_key(&self) -> Vec<u8> {
        let mut k = version_key(self.version).to_vec();
        k.extend_from_slice(&self.path.encode_ordered());
        k
    }

    pub fn from_index_key(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(TrieError::Codec("node index key too short".into()));
        }
        let (v, p) = bytes.split_at(8);
        let (path, used) = NibblePath::decode_ordered(p)?;
        if used != p.len() {
            return Err(TrieError::Codec("trailing bytes in node index key".into()));
        }
        Ok(Self {
            path,
            version: parse_version(v)?,
        })
    }
}

/// How a node is addressed inside the `nodes` namespace.
pub trait StoreKey: Clone + Send + Sync {
    fn node_key_bytes(&self) -> Vec<u8>;

    /// Entry of the node version index, if this flavor keeps one.
    fn version_index_key(&self) -> Option<Vec<u8>>;

    /// Bytes stored under the node key.
    fn node_value(&self, commitment: &Commitment, encoded: &[u8]) -> Vec<u8>;
}

impl StoreKey for Commitment {
    fn node_key_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn version_index_key(&self) -> Option<Vec<u8>> {
        None
    }

    fn node_value(&self, _commitment: &Commitment, encoded: &[u8]) -> Vec<u8> {
        encoded.to_vec()
    }
}

impl StoreKey for NodeKey {
    fn node_key_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    fn version_index_key(&self) -> Option<Vec<u8>> {
        Some(self.index_key())
    }

    /// `commitment ++ encoded node`
    fn node_value(&self, commitment: &Commitment, encoded: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(HASH_LEN + encoded.len());
        v.extend_from_slice(commitment.as_bytes());
        v.extend_from_slice(encoded);
        v
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueOp {
    Put(Commitment, Vec<u8>),
    Delete(Commitment),
}

/// What value-log compaction keeps at or below the floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValuePrunePolicy {
    /// Keep the newest entry `<= floor` of every key, so reads at any
    /// version `>= floor` still resolve.
    #[default]
    Safe,
    /// Also drop that entry when it is a tombstone or when the key has been
    /// written again after the floor. Reads at the latest version stay
    /// correct; reads in between may lose the value.
    Aggressive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub scanned: u64,
    pub deleted: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Flavor {
    Content,
    Versioned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct StoreMeta {
    flavor: Flavor,
    version_indices: bool,
}

/////////////////////////////////////////////////////////////////////////////
/////////////////////////////////////////////////////////////////////////////

/// State shared by both flavors: the engine handle, the options in effect
/// and the single-writer lock.
pub struct StoreBase {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) options: StoreOptions,
    writer: Mutex<()>,
}

impl StoreBase {
    pub(crate) fn open(engine: Arc<dyn Engine>, flavor: Flavor, mut options: StoreOptions) -> Result<Self> {
        let served = engine.namespaces();
        if let Some(ns) = NAMESPACES.iter().find(|ns| !served.iter().any(|s| s == *ns)) {
            return Err(TrieError::Store(format!("engine does not serve namespace '{}'", ns)));
        }
        if options.gc_batch_size == 0 {
            options.gc_batch_size = DEFAULT_GC_BATCH_SIZE;
        }

        let fresh = StoreMeta {
            flavor,
            version_indices: options.version_indices,
        };
        match engine.get(NS_ROOTS, META_KEY)? {
            Some(raw) => {
                let meta: StoreMeta = serde_json::from_slice(&raw)?;
                if meta.flavor != flavor {
                    return Err(TrieError::Store(format!(
                        "store was created as {:?}, cannot open it as {:?}",
                        meta.flavor, flavor
                    )));
                }
                if meta.version_indices != options.version_indices {
                    warn!(
                        persisted = meta.version_indices,
                        requested = options.version_indices,
                        "version_indices is fixed at creation, keeping the persisted value"
                    );
                    options.version_indices = meta.version_indices;
                }
            }
            None => {
                let mut b = Batch::new().with_sync(options.sync_commits);
                b.insert(NS_ROOTS, META_KEY, &serde_json::to_vec(&fresh)?);
                engine.write(b)?;
                info!(?flavor, version_indices = options.version_indices, "store created");
            }
        }

        Ok(Self {
            engine,
            options,
            writer: Mutex::new(()),
        })
    }

    #[inline(always)]
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub(crate) fn new_batch(&self) -> Batch {
        Batch::new().with_sync(self.options.sync_commits)
    }

    /// Both sentinels are read through one iterator, so they come from the
    /// same engine snapshot even while a commit lands.
    pub fn latest_root(&self) -> Result<Option<VersionedRoot>> {
        let (mut version, mut root) = (None, None);
        for item in self.engine.prefix_iter(NS_ROOTS, LATEST_PREFIX)? {
            let (k, v) = item?;
            if k == LATEST_VERSION_KEY {
                version = Some(parse_version(&v)?);
            } else if k == LATEST_ROOT_KEY {
                root = Some(Commitment::from_slice(&v)?);
            }
        }
        Ok(version
            .zip(root)
            .map(|(version, root)| VersionedRoot { version, root }))
    }

    pub fn latest_version(&self) -> Result<Option<u64>> {
        self.latest_root().map(|r| r.map(|r| r.version))
    }

    pub fn root_hash(&self, version: u64) -> Result<Option<Commitment>> {
        self.engine
            .get(NS_ROOTS, &version_key(version))?
            .map(|r| Commitment::from_slice(&r))
            .transpose()
    }

    /// All committed versions still in the root index, ascending.
    pub fn versions(&self) -> Result<Vec<VersionedRoot>> {
        let mut out = vec![];
        for i in self.engine.iter(NS_ROOTS, Seek::First)? {
            let (k, v) = i?;
            if k.len() == 8 {
                out.push(VersionedRoot {
                    version: parse_version(&k)?,
                    root: Commitment::from_slice(&v)?,
                });
            }
        }
        Ok(out)
    }

    /// Newest root with version `<= version`.
    pub(crate) fn root_at_or_before(&self, version: u64) -> Result<Option<VersionedRoot>> {
        let key = version_key(version);
        for i in self.engine.iter(NS_ROOTS, Seek::Backward(&key))? {
            let (k, v) = i?;
            if k.len() == 8 {
                return Ok(Some(VersionedRoot {
                    version: parse_version(&k)?,
                    root: Commitment::from_slice(&v)?,
                }));
            }
        }
        Ok(None)
    }

    pub fn get_value(&self, key_hash: &Commitment) -> Result<Option<Vec<u8>>> {
        self.get_value_at(key_hash, u64::MAX)
    }

    /// Value of the newest entry with version `<= version`, `None` if that
    /// entry is a tombstone or there is none.
    pub fn get_value_at(&self, key_hash: &Commitment, version: u64) -> Result<Option<Vec<u8>>> {
        let seek = value_key(key_hash, version);
        match self.engine.iter(NS_VALUES, Seek::Backward(&seek))?.next() {
            Some(i) => {
                let (k, v) = i?;
                if k.starts_with(key_hash.as_bytes()) {
                    decode_value(&v)
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Delete value-log entries at or below `floor` that no read at a
    /// retained version can reach, in chunks of `gc_batch_size`.
    pub fn compact_values(&self, floor: u64, policy: ValuePrunePolicy) -> Result<CompactionReport> {
        let _guard = self.lock_writer();
        self.compact_values_locked(floor, policy)
    }

    pub(crate) fn compact_values_locked(
        &self,
        floor: u64,
        policy: ValuePrunePolicy,
    ) -> Result<CompactionReport> {
        let mut report = CompactionReport::default();
        let mut batch = Batch::new();

        // entries of the current key that are `<= floor`, oldest first
        let mut current: Option<Commitment> = None;
        let mut below: Vec<(u64, bool)> = vec![];
        let mut newer = false;

        let flush_key = |hash: &Commitment,
                         below: &mut Vec<(u64, bool)>,
                         newer: bool,
                         batch: &mut Batch| {
            let keep_last = match below.last() {
                Some((_, tombstone)) => match policy {
                    ValuePrunePolicy::Safe => true,
                    ValuePrunePolicy::Aggressive => !(*tombstone || newer),
                },
                None => false,
            };
            let n = if keep_last { below.len() - 1 } else { below.len() };
            for (version, _) in below.drain(..).take(n) {
                batch.remove(NS_VALUES, &value_key(hash, version));
                if self.options.version_indices {
                    batch.remove(NS_VALUE_VERSIONS, &value_version_key(version, hash));
                }
            }
            n as u64
        };

        for i in self.engine.iter(NS_VALUES, Seek::First)? {
            let (k, v) = i?;
            let (hash, version) = split_value_key(&k)?;
            report.scanned += 1;

            if current != Some(hash) {
                if let Some(prev) = current {
                    report.deleted += flush_key(&prev, &mut below, newer, &mut batch);
                }
                current = Some(hash);
                newer = false;
            }

            if version <= floor {
                below.push((version, decode_value(&v)?.is_none()));
            } else {
                newer = true;
            }

            if batch.len() >= self.options.gc_batch_size {
                self.engine.write(std::mem::take(&mut batch))?;
            }
        }
        if let Some(prev) = current {
            report.deleted += flush_key(&prev, &mut below, newer, &mut batch);
        }
        if !batch.is_empty() {
            self.engine.write(batch)?;
        }

        info!(
            floor,
            ?policy,
            scanned = report.scanned,
            deleted = report.deleted,
            "value log compacted"
        );
        Ok(report)
    }
}

/// Read and write surface common to both store flavors.
pub trait TrieStore: Send + Sync {
    type Key: StoreKey;

    fn base(&self) -> &StoreBase;

    /// Start staging the commit of `version`.
    fn begin_commit(&self, version: u64, config: CommitConfig) -> Result<CommitBatch<'_, Self::Key>> {
        CommitBatch::new(self.base(), version, config)
    }

    /// Raw node lookup by its store key.
    fn get_node(&self, key: &Self::Key) -> Result<Option<crate::node::Node>>;

    fn latest_root(&self) -> Result<Option<VersionedRoot>> {
        self.base().latest_root()
    }

    fn root_hash(&self, version: u64) -> Result<Option<Commitment>> {
        self.base().root_hash(version)
    }

    fn versions(&self) -> Result<Vec<VersionedRoot>> {
        self.base().versions()
    }

    fn get_value(&self, key_hash: &Commitment) -> Result<Option<Vec<u8>>> {
        self.base().get_value(key_hash)
    }

    fn get_value_at(&self, key_hash: &Commitment, version: u64) -> Result<Option<Vec<u8>>> {
        self.base().get_value_at(key_hash, version)
    }

    fn compact_values(&self, floor: u64, policy: ValuePrunePolicy) -> Result<CompactionReport> {
        self.base().compact_values(floor, policy)
    }

    /// Remove every version newer than `version`.
    fn truncate_after(&self, version: u64) -> Result<()>;
}
