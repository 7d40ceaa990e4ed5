//!
//! Merkle Patricia trie over the content-addressed store.
//!

use crate::commitment::{Commitment, CommitmentScheme};
use crate::error::Result;
use crate::gc::{GcProgress, GcReport, GcStrategy, MarkSweepGc, RetentionPolicy};
use crate::metrics::{NoopMetrics, TrieMetrics};
use crate::nibbles::NibblePath;
use crate::proof::{self, Proof};
use crate::storage::{
    CommitConfig, CompactionReport, ContentStore, TrieStore, ValueOp, ValuePrunePolicy,
    VersionedRoot,
};
use crate::trie::{apply_updates, key_path, lookup, CommitResult, KeyMode, TrieMut, Update};
use crate::TrieConfig;
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};
use tracing::debug;

/// Content-addressed trie front-end.
///
/// Commits and GC runs are serialized internally; reads never wait.
pub struct MerklePatriciaTrie {
    store: Arc<ContentStore>,
    scheme: Arc<dyn CommitmentScheme>,
    key_mode: KeyMode,
    gc: Arc<dyn GcStrategy<ContentStore>>,
    metrics: Arc<dyn TrieMetrics>,
    writer: Mutex<()>,
}

impl MerklePatriciaTrie {
    /// Reclaims garbage by mark-and-sweep.
    pub fn new(store: Arc<ContentStore>, config: TrieConfig) -> Self {
        Self::with_gc(store, config, Arc::new(MarkSweepGc))
    }

    /// A strategy that keeps counters (`RefCountGc`) must be in place from
    /// the first commit on.
    pub fn with_gc(
        store: Arc<ContentStore>,
        config: TrieConfig,
        gc: Arc<dyn GcStrategy<ContentStore>>,
    ) -> Self {
        Self {
            store,
            scheme: config.scheme.build(config.hash),
            key_mode: config.key_mode,
            gc,
            metrics: Arc::new(NoopMetrics),
            writer: Mutex::new(()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TrieMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn scheme(&self) -> &dyn CommitmentScheme {
        &*self.scheme
    }

    pub fn commit(
        &self,
        version: u64,
        updates: impl IntoIterator<Item = Update>,
    ) -> Result<CommitResult> {
        self.commit_with(version, updates, CommitConfig::default())
    }

    /// Apply `updates` on top of the latest root and commit them as
    /// `version`; a `None` value deletes the key.
    pub fn commit_with(
        &self,
        version: u64,
        updates: impl IntoIterator<Item = Update>,
        config: CommitConfig,
    ) -> Result<CommitResult> {
        let _guard = self.writer.lock();
        let started = Instant::now();
        let mut batch = self.store.begin_commit(version, config)?;

        let mut trie = TrieMut::new(&*self.store, &*self.scheme, self.latest_root_hash()?);
        let values = apply_updates(&mut trie, &*self.scheme, self.key_mode, updates)?;
        let sealed = trie.seal()?;

        for n in sealed.nodes.iter() {
            batch.put_node(&n.commitment, &n.commitment, &n.node)?;
        }
        for op in values.iter() {
            match op {
                ValueOp::Put(h, v) => batch.put_value(h, v)?,
                ValueOp::Delete(h) => batch.delete_value(h)?,
            }
        }
        batch.set_root_hash(sealed.root)?;
        self.gc
            .on_commit(&self.store, &mut batch, &sealed.root, &sealed.nodes)?;
        batch.commit()?;

        debug!(
            version,
            root = %sealed.root,
            retired = sealed.retired.len(),
            gc = self.gc.name(),
            "trie committed"
        );
        self.metrics
            .record_commit(version, sealed.nodes.len(), 0, started.elapsed());
        Ok(CommitResult {
            version,
            root: sealed.root,
            nodes: sealed.nodes,
            stale: vec![],
            values,
        })
    }

    fn latest_root_hash(&self) -> Result<Commitment> {
        Ok(self
            .store
            .latest_root()?
            .map(|r| r.root)
            .unwrap_or_else(|| self.scheme.null_hash()))
    }

    /// Root governing `version`: the newest committed one at or below it.
    fn root_for(&self, version: u64) -> Result<Option<VersionedRoot>> {
        self.store.base().root_at_or_before(version)
    }

    /// Value under `key` at the latest version, read through the trie.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let root = self.latest_root_hash()?;
        lookup(&*self.store, &root, &self.path(key))
    }

    /// Value under `key` as of `version`, read through the trie.
    pub fn get_at(&self, key: &[u8], version: u64) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let value = match self.root_for(version)? {
            Some(r) => lookup(&*self.store, &r.root, &self.path(key))?,
            None => None,
        };
        self.metrics
            .record_read(version, value.is_some(), started.elapsed());
        Ok(value)
    }

    /// Value under `key` as of `version`, read from the value log.
    pub fn value_at(&self, key: &[u8], version: u64) -> Result<Option<Vec<u8>>> {
        self.store.get_value_at(&self.scheme.digest(key), version)
    }

    pub fn root_hash(&self, version: u64) -> Result<Option<Commitment>> {
        self.store.root_hash(version)
    }

    pub fn latest_root(&self) -> Result<Option<VersionedRoot>> {
        self.store.latest_root()
    }

    pub fn versions(&self) -> Result<Vec<VersionedRoot>> {
        self.store.versions()
    }

    /// Proof for `key` against the root governing `version`; `None` if no
    /// root exists at or below `version`.
    pub fn get_proof(&self, key: &[u8], version: u64) -> Result<Option<Proof>> {
        let started = Instant::now();
        let Some(r) = self.root_for(version)? else {
            return Ok(None);
        };
        let proof = proof::prove(&*self.store, &*self.scheme, &r.root, &self.path(key))?;
        self.metrics
            .record_proof(version, proof.len(), started.elapsed());
        Ok(Some(proof))
    }

    /// [`get_proof`](Self::get_proof) in wire form.
    pub fn get_proof_wire(&self, key: &[u8], version: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.get_proof(key, version)?.map(|p| p.to_bytes()))
    }

    pub fn verify_proof(
        &self,
        root: &Commitment,
        key: &[u8],
        value: Option<&[u8]>,
        including: bool,
        proof: &Proof,
    ) -> bool {
        proof::verify(&*self.scheme, root, &self.path(key), value, including, proof)
    }

    /// `false` for bytes that do not decode as a proof.
    pub fn verify_proof_wire(
        &self,
        root: &Commitment,
        key: &[u8],
        value: Option<&[u8]>,
        including: bool,
        bytes: &[u8],
    ) -> bool {
        proof::verify_bytes(&*self.scheme, root, &self.path(key), value, including, bytes)
    }

    pub fn run_gc(
        &self,
        policy: &RetentionPolicy,
        progress: &mut dyn FnMut(&GcProgress),
    ) -> Result<GcReport> {
        let _guard = self.writer.lock();
        let started = Instant::now();
        let report = self.gc.run(&self.store, policy, progress)?;
        self.metrics.record_gc(report.deleted, started.elapsed());
        Ok(report)
    }

    pub fn compact_values(&self, floor: u64, policy: ValuePrunePolicy) -> Result<CompactionReport> {
        let _guard = self.writer.lock();
        self.store.compact_values(floor, policy)
    }

    /// Always `UnsupportedOperation`: content-addressed nodes may be shared
    /// with older versions.
    pub fn truncate_after(&self, version: u64) -> Result<()> {
        let _guard = self.writer.lock();
        self.store.truncate_after(version)
    }

    #[inline(always)]
    fn path(&self, key: &[u8]) -> NibblePath {
        key_path(&*self.scheme, self.key_mode, key)
    }
}

impl std::fmt::Debug for MerklePatriciaTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerklePatriciaTrie")
            .field("scheme", &self.scheme.kind())
            .field("key_mode", &self.key_mode)
            .field("gc", &self.gc.name())
            .finish()
    }
}

