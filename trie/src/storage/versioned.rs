use super::{schema::*, Flavor, NodeKey, StoreBase, StoreOptions, TrieStore};
use crate::commitment::{Commitment, HASH_LEN};
use crate::error::{Result, TrieError};
use crate::nibbles::NibblePath;
use crate::node::{Node, NodeCodec};
use std::sync::Arc;
use tracing::info;
use vstrie_core::{Engine, MemEngine, Seek};

/// A node as stored in the version-path store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub key: NodeKey,
    pub commitment: Commitment,
    pub node: Node,
}

/// Version-path store: a node written at version `v` for path `p` lives
/// under `(p, v)` until it is pruned.
pub struct VersionedStore {
    base: StoreBase,
}

impl VersionedStore {
    pub fn open(engine: Arc<dyn Engine>, options: StoreOptions) -> Result<Self> {
        StoreBase::open(engine, Flavor::Versioned, options).map(|base| Self { base })
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

    fn decode_entry(key: &[u8], raw: &[u8]) -> Result<NodeEntry> {
        if raw.len() < HASH_LEN {
            return Err(TrieError::Codec("versioned node entry too short".into()));
        }
        let (c, encoded) = raw.split_at(HASH_LEN);
        Ok(NodeEntry {
            key: NodeKey::decode(key)?,
            commitment: Commitment::from_slice(c)?,
            node: NodeCodec::decode(encoded)?,
        })
    }

    /// The node governing exactly `path` as of `version`: the newest entry
    /// for that path with a version `<= version`.
    pub fn get_node_at(&self, version: u64, path: &NibblePath) -> Result<Option<NodeEntry>> {
        let seek = NodeKey::new(path.clone(), version).encode();
        let prefix = path.encode_ordered();
        match self.base.engine.iter(NS_NODES, Seek::Backward(&seek))?.next() {
            Some(i) => {
                let (k, v) = i?;
                if k.starts_with(&prefix) && k.len() == prefix.len() + 8 {
                    Self::decode_entry(&k, &v).map(Some)
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Greatest entry `<= (path, version)` in key order whose own version
    /// is `<= version`.
    pub fn floor_node(&self, version: u64, path: &NibblePath) -> Result<Option<NodeEntry>> {
        let seek = NodeKey::new(path.clone(), version).encode();
        for i in self.base.engine.iter(NS_NODES, Seek::Backward(&seek))? {
            let (k, v) = i?;
            let key = NodeKey::decode(&k)?;
            if key.version <= version {
                return Self::decode_entry(&k, &v).map(Some);
            }
        }
        Ok(None)
    }

    /// Smallest path `>= path` that has an entry visible at `version`,
    /// together with its newest such entry.
    pub fn ceiling_node(&self, version: u64, path: &NibblePath) -> Result<Option<NodeEntry>> {
        let seek = NodeKey::new(path.clone(), 0).encode();
        for i in self.base.engine.iter(NS_NODES, Seek::Forward(&seek))? {
            let (k, _) = i?;
            let key = NodeKey::decode(&k)?;
            if key.version <= version {
                return self.get_node_at(version, &key.path);
            }
        }
        Ok(None)
    }

    /// Store key of the node governing `path` at `version`, if any.
    pub(crate) fn key_at(&self, version: u64, path: &NibblePath) -> Result<Option<NodeKey>> {
        self.get_node_at(version, path).map(|e| e.map(|e| e.key))
    }

    /// Number of entries in the stale index.
    pub fn stale_len(&self) -> Result<usize> {
        let mut n = 0;
        for i in self.base.engine.iter(NS_STALE, Seek::First)? {
            i?;
            n += 1;
        }
        Ok(n)
    }
}

impl TrieStore for VersionedStore {
    type Key = NodeKey;

    #[inline(always)]
    fn base(&self) -> &StoreBase {
        &self.base
    }

    fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        self.base
            .engine
            .get(NS_NODES, &key.encode())?
            .map(|raw| Self::decode_entry(&key.encode(), &raw).map(|e| e.node))
            .transpose()
    }

    /// Removes, in one atomic batch, every node, value, stale marker and
    /// root written after `version`, then points the latest sentinels at
    /// the newest remaining root.
    fn truncate_after(&self, version: u64) -> Result<()> {
        if !self.base.options.version_indices {
            return Err(TrieError::UnsupportedOperation(
                "rollback needs version indices, enable them when creating the store".into(),
            ));
        }
        let Some(first_gone) = version.checked_add(1) else {
            return Ok(());
        };
        let from = version_key(first_gone);

        let _guard = self.base.lock_writer();
        let engine = &self.base.engine;
        let mut batch = self.base.new_batch();
        let (mut nodes, mut values, mut stale, mut roots) = (0usize, 0usize, 0usize, 0usize);

        for i in engine.iter(NS_NODE_VERSIONS, Seek::Forward(&from))? {
            let (k, _) = i?;
            let key = NodeKey::from_index_key(&k)?;
            batch.remove(NS_NODES, &key.encode());
            batch.remove(NS_NODE_VERSIONS, &k);
            nodes += 1;
        }

        for i in engine.iter(NS_VALUE_VERSIONS, Seek::Forward(&from))? {
            let (k, _) = i?;
            if k.len() != 8 + HASH_LEN {
                return Err(TrieError::Codec("bad value index key".into()));
            }
            let (v, h) = k.split_at(8);
            batch.remove(NS_VALUES, &value_key(&Commitment::from_slice(h)?, parse_version(v)?));
            batch.remove(NS_VALUE_VERSIONS, &k);
            values += 1;
        }

        for i in engine.iter(NS_STALE, Seek::Forward(&from))? {
            let (k, _) = i?;
            batch.remove(NS_STALE, &k);
            stale += 1;
        }

        for i in engine.iter(NS_ROOTS, Seek::Forward(&from))? {
            let (k, _) = i?;
            if k.len() == 8 {
                batch.remove(NS_ROOTS, &k);
                roots += 1;
            }
        }

        let restored = self.base.root_at_or_before(version)?;
        match restored {
            Some(r) => {
                batch.insert(NS_ROOTS, LATEST_ROOT_KEY, r.root.as_bytes());
                batch.insert(NS_ROOTS, LATEST_VERSION_KEY, &version_key(r.version));
            }
            None => {
                batch.remove(NS_ROOTS, LATEST_ROOT_KEY);
                batch.remove(NS_ROOTS, LATEST_VERSION_KEY);
            }
        }

        engine.write(batch)?;

        info!(
            version,
            nodes,
            values,
            stale,
            roots,
            latest = ?restored.map(|r| r.version),
            "rolled back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::CommitConfig;

    fn leaf(v: &[u8]) -> Node {
        Node::leaf(NibblePath::from_nibbles(&[1]).unwrap(), v.to_vec())
    }

    fn path(n: &[u8]) -> NibblePath {
        NibblePath::from_nibbles(n).unwrap()
    }

    fn put(store: &VersionedStore, version: u64, nodes: &[(&[u8], &[u8])]) {
        let mut b = store.begin_commit(version, CommitConfig::default()).unwrap();
        for (p, v) in nodes {
            b.put_node(&NodeKey::new(path(p), version), &Commitment([version as u8; 32]), &leaf(v))
                .unwrap();
        }
        b.set_root_hash(Commitment([version as u8; 32])).unwrap();
        b.commit().unwrap();
    }

    #[test]
    fn floor_and_ceiling() {
        let store = VersionedStore::in_memory(StoreOptions::default()).unwrap();
        put(&store, 1, &[(&[1], b"a1"), (&[1, 2], b"b1"), (&[3], b"c1")]);
        put(&store, 3, &[(&[1], b"a3")]);
        put(&store, 5, &[(&[2], b"d5")]);

        let e = store.get_node_at(2, &path(&[1])).unwrap().unwrap();
        assert_eq!(e.key, NodeKey::new(path(&[1]), 1));
        assert_eq!(e.commitment, Commitment([1; 32]));
        let e = store.get_node_at(9, &path(&[1])).unwrap().unwrap();
        assert_eq!(e.node, leaf(b"a3"));
        assert!(store.get_node_at(0, &path(&[1])).unwrap().is_none());
        assert!(store.get_node_at(4, &path(&[2])).unwrap().is_none());
        // a longer path sharing the prefix is not an exact match
        assert!(store.get_node_at(9, &path(&[1, 2, 3])).unwrap().is_none());

        // floor walks back over versions that are too new
        let e = store.floor_node(4, &path(&[2])).unwrap().unwrap();
        assert_eq!(e.key, NodeKey::new(path(&[1, 2]), 1));
        let e = store.floor_node(5, &path(&[2])).unwrap().unwrap();
        assert_eq!(e.key, NodeKey::new(path(&[2]), 5));

        // ceiling moves forward to the next visible path
        let e = store.ceiling_node(4, &path(&[1, 3])).unwrap().unwrap();
        assert_eq!(e.key, NodeKey::new(path(&[3]), 1));
        let e = store.ceiling_node(4, &path(&[1])).unwrap().unwrap();
        assert_eq!(e.key, NodeKey::new(path(&[1]), 3));
        assert!(store.ceiling_node(4, &path(&[4])).unwrap().is_none());
    }

    #[test]
    fn rollback_needs_indices() {
        let store = VersionedStore::in_memory(StoreOptions {
            version_indices: false,
            ..Default::default()
        })
        .unwrap();
        put(&store, 1, &[(&[1], b"a")]);
        assert!(matches!(
            store.truncate_after(0),
            Err(TrieError::UnsupportedOperation(_))
        ));
        assert_eq!(store.latest_root().unwrap().unwrap().version, 1);
    }

    #[test]
    fn rollback_to_before_everything() {
        let store = VersionedStore::in_memory(StoreOptions::default()).unwrap();
        put(&store, 2, &[(&[1], b"a")]);
        put(&store, 4, &[(&[1], b"b")]);

        store.truncate_after(3).unwrap();
        assert_eq!(store.latest_root().unwrap().unwrap().version, 2);
        assert!(store.get_node(&NodeKey::new(path(&[1]), 4)).unwrap().is_none());

        store.truncate_after(1).unwrap();
        assert!(store.latest_root().unwrap().is_none());
        assert!(store.versions().unwrap().is_empty());

        // the version counter starts over
        put(&store, 1, &[(&[1], b"c")]);
        assert_eq!(store.latest_root().unwrap().unwrap().version, 1);
    }
}
