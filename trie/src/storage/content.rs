use super::{schema::*, Flavor, StoreBase, StoreOptions, TrieStore};
use crate::commitment::Commitment;
use crate::error::{Result, TrieError};
use crate::node::{Node, NodeCodec};
use std::sync::Arc;
use vstrie_core::{Engine, MemEngine};

/// Content-addressed store: a node is stored under its own commitment, so
/// identical subtrees are shared between versions.
pub struct ContentStore {
    base: StoreBase,
}

impl ContentStore {
    pub fn open(engine: Arc<dyn Engine>, options: StoreOptions) -> Result<Self> {
        StoreBase::open(engine, Flavor::Content, options).map(|base| Self { base })
    }

    pub fn in_memory(options: StoreOptions) -> Result<Self> {
        Self::open(Arc::new(MemEngine::new(&NAMESPACES)), options)
    }

    #[cfg(feature = "rocks_engine")]
    pub fn open_rocks(
        dir: impl AsRef<std::path::Path>,
        config: &vstrie_core::EngineConfig,
        options: StoreOptions,
    ) -> Result<Self> {
        let engine = vstrie_core::RocksEngine::open(dir, config, &NAMESPACES)?;
        Self::open(Arc::new(engine), options)
    }

    pub fn contains_node(&self, hash: &Commitment) -> Result<bool> {
        self.base
            .engine
            .contains_key(NS_NODES, hash.as_bytes())
            .map_err(TrieError::from)
    }

    /// References to `hash` from stored parents and root entries; only
    /// maintained under `RefCountGc`.
    pub fn ref_count(&self, hash: &Commitment) -> Result<u64> {
        match self.base.engine.get(NS_REFS, hash.as_bytes())? {
            Some(raw) => Ok(vstrie_core::common::parse_u64(&raw)?),
            None => Ok(0),
        }
    }
}

impl TrieStore for ContentStore {
    type Key = Commitment;

    #[inline(always)]
    fn base(&self) -> &StoreBase {
        &self.base
    }

    fn get_node(&self, key: &Commitment) -> Result<Option<Node>> {
        self.base
            .engine
            .get(NS_NODES, key.as_bytes())?
            .map(|raw| NodeCodec::decode(&raw))
            .transpose()
    }

    /// Nodes are shared between versions here, they cannot be removed by
    /// version number.
    fn truncate_after(&self, _version: u64) -> Result<()> {
        Err(TrieError::UnsupportedOperation(
            "rollback needs the version-path store".into(),
        ))
    }
}
