/////////////////////////////////////////////////////////////////////////////
/////////////////////////////////////////////////////////////////////////////

mod mem_backend;
#[cfg(feature = "rocks_engine")]
mod rocks_backend;

pub use mem_backend::MemEngine;

#[cfg(feature = "rocks_engine")]
pub use rocks_backend::{RocksDb, RocksEngine};

/////////////////////////////////////////////////////////////////////////////
/////////////////////////////////////////////////////////////////////////////

use crate::common::{RawKey, RawValue};
use ruc::*;

/// Ordered `(key, value)` pairs, each item may carry an engine error.
pub type EngineIter<'a> = Box<dyn Iterator<Item = Result<(RawKey, RawValue)>> + 'a>;

/// Where an iteration starts and in which direction it walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seek<'a> {
    /// Ascending, from the smallest key.
    First,
    /// Descending, from the largest key.
    Last,
    /// Ascending, from the first key `>=` the given one.
    Forward(&'a [u8]),
    /// Descending, from the last key `<=` the given one (seek-for-prev).
    Backward(&'a [u8]),
}

/// Low-level database interface.
///
/// Keys are ordered bytewise inside each namespace. Reads are lock-free with
/// respect to each other; an iterator observes a consistent snapshot taken
/// when it was created.
pub trait Engine: Send + Sync {
    /// Names of all namespaces this engine instance serves.
    fn namespaces(&self) -> Vec<String>;

    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<RawValue>>;

    fn iter(&self, namespace: &str, seek: Seek<'_>) -> Result<EngineIter<'_>>;

    /// Apply all operations of `batch` atomically.
    fn write(&self, batch: Batch) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn contains_key(&self, namespace: &str, key: &[u8]) -> Result<bool> {
        self.get(namespace, key).map(|v| v.is_some())
    }

    /// All entries whose key starts with `prefix`, ascending.
    fn prefix_iter(&self, namespace: &str, prefix: &[u8]) -> Result<EngineIter<'_>> {
        let prefix = prefix.to_vec();
        let it = self.iter(namespace, Seek::Forward(&prefix))?;
        Ok(Box::new(it.take_while(move |i| match i {
            Ok((k, _)) => k.starts_with(&prefix),
            Err(_) => true,
        })))
    }
}

/// One staged write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        namespace: String,
        key: RawKey,
        value: RawValue,
    },
    Delete {
        namespace: String,
        key: RawKey,
    },
}

impl BatchOp {
    pub fn namespace(&self) -> &str {
        match self {
            BatchOp::Put { namespace, .. } | BatchOp::Delete { namespace, .. } => namespace,
        }
    }
}

/// Engine-agnostic write batch, applied atomically by `Engine::write`.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
    sync: bool,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to fsync before `write` returns.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    #[inline(always)]
    pub fn insert(&mut self, namespace: &str, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put {
            namespace: namespace.to_owned(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    #[inline(always)]
    pub fn remove(&mut self, namespace: &str, key: &[u8]) {
        self.ops.push(BatchOp::Delete {
            namespace: namespace.to_owned(),
            key: key.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Discard everything staged so far.
    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
