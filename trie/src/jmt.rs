//!
//! Versioned trie over the version-path store.
//!
//! Nodes written by version `v` live under `(path, v)`. A commit records
//! every node it supersedes in the stale index, which is what pruning
//! consumes; the version indices make rollback possible.
//!

use crate::commitment::{Commitment, CommitmentScheme};
use crate::error::{Result, TrieError};
use crate::gc::{
    prune_up_to, GcProgress, GcReport, GcStrategy, PruneReport, RetentionPolicy, StalePruneGc,
};
use crate::metrics::{NoopMetrics, TrieMetrics};
use crate::nibbles::NibblePath;
use crate::proof::{self, Proof};
use crate::storage::{
    CommitConfig, CompactionReport, NodeKey, TrieStore, ValueOp, ValuePrunePolicy, VersionedRoot,
    VersionedStore,
};
use crate::trie::{
    apply_updates, key_path, lookup, CommitResult, KeyMode, TrieMut, Update, VersionedSource,
};
use crate::TrieConfig;
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};
use tracing::debug;

pub struct VersionedTrie {
    store: Arc<VersionedStore>,
    scheme: Arc<dyn CommitmentScheme>,
    gc: Arc<dyn GcStrategy<VersionedStore>>,
    metrics: Arc<dyn TrieMetrics>,
    writer: Mutex<()>,
}

impl VersionedTrie {
    /// Keys are always hashed here; `KeyMode::Raw` is rejected.
    pub fn new(store: Arc<VersionedStore>, config: TrieConfig) -> Result<Self> {
        Self::with_gc(store, config, Arc::new(StalePruneGc::default()))
    }

    pub fn with_gc(
        store: Arc<VersionedStore>,
        config: TrieConfig,
        gc: Arc<dyn GcStrategy<VersionedStore>>,
    ) -> Result<Self> {
        if config.key_mode != KeyMode::Hashed {
            return Err(TrieError::UnsupportedOperation(
                "the versioned trie only supports hashed keys".into(),
            ));
        }
        Ok(Self {
            store,
            scheme: config.scheme.build(config.hash),
            gc,
            metrics: Arc::new(NoopMetrics),
            writer: Mutex::new(()),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TrieMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<VersionedStore> {
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

    pub fn commit_with(
        &self,
        version: u64,
        updates: impl IntoIterator<Item = Update>,
        config: CommitConfig,
    ) -> Result<CommitResult> {
        let _guard = self.writer.lock();
        let started = Instant::now();
        let mut batch = self.store.begin_commit(version, config)?;

        let (base_version, base_root) = match self.store.latest_root()? {
            Some(r) => (r.version, r.root),
            None => (0, self.scheme.null_hash()),
        };
        let source = VersionedSource {
            store: &self.store,
            version: base_version,
        };
        let mut trie = TrieMut::new(&source, &*self.scheme, base_root);
        let values = apply_updates(&mut trie, &*self.scheme, KeyMode::Hashed, updates)?;
        let sealed = trie.seal()?;

        let mut stale = Vec::with_capacity(sealed.retired.len());
        for r in sealed.retired.iter() {
            let key = self
                .store
                .key_at(base_version, &r.path)?
                .ok_or_else(|| {
                    TrieError::MissingNode(format!("path {} at version {}", r.path, base_version))
                })?;
            batch.mark_stale(&key)?;
            stale.push(key);
        }
        for n in sealed.nodes.iter() {
            batch.put_node(&NodeKey::new(n.path.clone(), version), &n.commitment, &n.node)?;
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

        debug!(version, root = %sealed.root, stale = stale.len(), "trie committed");
        self.metrics
            .record_commit(version, sealed.nodes.len(), stale.len(), started.elapsed());
        Ok(CommitResult {
            version,
            root: sealed.root,
            nodes: sealed.nodes,
            stale,
            values,
        })
    }

    fn root_for(&self, version: u64) -> Result<Option<VersionedRoot>> {
        self.store.base().root_at_or_before(version)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_at(key, u64::MAX)
    }

    /// Value under `key` as of `version`, read through the trie.
    pub fn get_at(&self, key: &[u8], version: u64) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let value = match self.root_for(version)? {
            Some(r) => {
                let source = VersionedSource {
                    store: &self.store,
                    version: r.version,
                };
                lookup(&source, &r.root, &self.path(key))?
            }
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

    pub fn get_proof(&self, key: &[u8], version: u64) -> Result<Option<Proof>> {
        let started = Instant::now();
        let Some(r) = self.root_for(version)? else {
            return Ok(None);
        };
        let source = VersionedSource {
            store: &self.store,
            version: r.version,
        };
        let proof = proof::prove(&source, &*self.scheme, &r.root, &self.path(key))?;
        self.metrics
            .record_proof(version, proof.len(), started.elapsed());
        Ok(Some(proof))
    }

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

    /// Drop nodes superseded at or before `floor` and compact the value
    /// log; reads at versions `>= floor` are unaffected.
    pub fn prune_up_to(&self, floor: u64, policy: ValuePrunePolicy) -> Result<PruneReport> {
        let _guard = self.writer.lock();
        let started = Instant::now();
        let report = prune_up_to(&self.store, floor, policy, &mut |_| {})?;
        self.metrics.record_gc(report.nodes_deleted, started.elapsed());
        Ok(report)
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

    /// Forget every version newer than `version`.
    pub fn truncate_after(&self, version: u64) -> Result<()> {
        let _guard = self.writer.lock();
        self.store.truncate_after(version)
    }

    #[inline(always)]
    fn path(&self, key: &[u8]) -> NibblePath {
        key_path(&*self.scheme, KeyMode::Hashed, key)
    }
}

impl std::fmt::Debug for VersionedTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedTrie")
            .field("scheme", &self.scheme.kind())
            .field("gc", &self.gc.name())
            .finish()
    }
}
