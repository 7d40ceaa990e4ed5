//!
//! The same stores on top of RocksDB, including reopening from disk.
//!

#![cfg(feature = "rocks_engine")]

use std::sync::Arc;
use vstrie::{
    storage::schema::NAMESPACES,
    vstrie_core::{EngineConfig, RocksEngine},
    ContentStore, MerklePatriciaTrie, RefCountGc, RetentionPolicy, StoreOptions, TrieConfig,
    TrieError, TrieStore, ValuePrunePolicy, VersionedStore, VersionedTrie,
};

fn put(k: &str, v: &str) -> (Vec<u8>, Option<Vec<u8>>) {
    (k.as_bytes().to_vec(), Some(v.as_bytes().to_vec()))
}

#[test]
fn versioned_trie_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::balanced();

    let r2 = {
        let store = VersionedStore::open_rocks(dir.path(), &cfg, StoreOptions::default()).unwrap();
        let t = VersionedTrie::new(Arc::new(store), TrieConfig::compact()).unwrap();
        t.commit(1, vec![put("alice", "100"), put("bob", "50")]).unwrap();
        t.commit(2, vec![put("alice", "90")]).unwrap()
    };

    // a conflicting option is overridden by what the store was created with
    let options = StoreOptions {
        version_indices: false,
        ..StoreOptions::default()
    };
    let store = VersionedStore::open_rocks(dir.path(), &cfg, options).unwrap();
    assert!(store.base().options().version_indices);

    let t = VersionedTrie::new(Arc::new(store), TrieConfig::compact()).unwrap();
    assert_eq!(t.latest_root().unwrap().unwrap().root, r2.root);
    assert_eq!(t.get_at(b"alice", 1).unwrap(), Some(b"100".to_vec()));
    assert_eq!(t.value_at(b"bob", 2).unwrap(), Some(b"50".to_vec()));

    let p = t.get_proof(b"alice", 2).unwrap().unwrap();
    let bytes = p.to_bytes();
    let p = vstrie::Proof::from_bytes(&bytes).unwrap();
    assert!(t.verify_proof(&r2.root, b"alice", Some(b"90"), true, &p));

    t.commit(3, vec![put("alice", "80")]).unwrap();
    t.prune_up_to(2, ValuePrunePolicy::Safe).unwrap();
    assert_eq!(t.get_at(b"bob", 3).unwrap(), Some(b"50".to_vec()));
    assert_eq!(t.get_at(b"alice", 2).unwrap(), Some(b"90".to_vec()));
    t.truncate_after(2).unwrap();
    assert_eq!(t.get(b"alice").unwrap(), Some(b"90".to_vec()));
}

#[test]
fn flavors_do_not_mix() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::default();
    {
        ContentStore::open_rocks(dir.path(), &cfg, StoreOptions::default()).unwrap();
    }
    assert!(matches!(
        VersionedStore::open_rocks(dir.path(), &cfg, StoreOptions::default()),
        Err(TrieError::Store(_))
    ));
}

#[test]
fn refcount_on_an_attached_database() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::low_memory();
    let owner = RocksEngine::open(dir.path(), &cfg, &["app"]).unwrap();
    let db = Arc::clone(owner.db());

    let engine = RocksEngine::attach(db, "trie_", &cfg, &NAMESPACES).unwrap();
    let store = Arc::new(ContentStore::open(Arc::new(engine), StoreOptions::default()).unwrap());
    let t = MerklePatriciaTrie::with_gc(store, TrieConfig::default(), Arc::new(RefCountGc));

    for v in 1..=5u64 {
        t.commit(v, vec![put("counter", &v.to_string())]).unwrap();
    }
    let report = t.run_gc(&RetentionPolicy::KeepLatest(2), &mut |_| {}).unwrap();
    assert_eq!(report.total, 3);
    assert!(report.deleted > 0);
    assert_eq!(t.get_at(b"counter", 4).unwrap(), Some(b"4".to_vec()));
    assert_eq!(t.get(b"counter").unwrap(), Some(b"5".to_vec()));
    assert!(owner.db().cf_handle("trie_nodes").is_some());
}
