use super::{Batch, BatchOp, Engine, EngineIter, Seek};
use crate::common::{RawKey, RawValue};
use parking_lot::RwLock;
use ruc::*;
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};

type Space = BTreeMap<RawKey, RawValue>;

/// Ordered in-memory engine.
///
/// Every namespace is a copy-on-write `BTreeMap`: iterators pin the map they
/// started on, so a concurrent batch never shows up half-applied.
pub struct MemEngine {
    spaces: RwLock<HashMap<String, Arc<Space>>>,
}

impl MemEngine {
    pub fn new<S: AsRef<str>>(namespaces: &[S]) -> Self {
        let spaces = namespaces
            .iter()
            .map(|ns| (ns.as_ref().to_owned(), Arc::new(Space::new())))
            .collect();
        Self {
            spaces: RwLock::new(spaces),
        }
    }

    #[inline(always)]
    fn snapshot(&self, namespace: &str) -> Result<Arc<Space>> {
        self.spaces
            .read()
            .get(namespace)
            .cloned()
            .c(d!("unknown namespace: {}", namespace))
    }

    /// Number of entries in one namespace.
    pub fn len(&self, namespace: &str) -> Result<usize> {
        self.snapshot(namespace).map(|s| s.len())
    }
}

impl Engine for MemEngine {
    fn namespaces(&self) -> Vec<String> {
        let mut names = self.spaces.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<RawValue>> {
        self.snapshot(namespace).map(|s| s.get(key).cloned())
    }

    fn iter(&self, namespace: &str, seek: Seek<'_>) -> Result<EngineIter<'_>> {
        let space = self.snapshot(namespace).c(d!())?;
        let (bound, forward) = match seek {
            Seek::First => (Bound::Unbounded, true),
            Seek::Last => (Bound::Unbounded, false),
            Seek::Forward(k) => (Bound::Included(k.to_vec()), true),
            Seek::Backward(k) => (Bound::Included(k.to_vec()), false),
        };
        Ok(Box::new(MemIter {
            space,
            bound: Some(bound),
            forward,
        }))
    }

    fn write(&self, batch: Batch) -> Result<()> {
        let mut spaces = self.spaces.write();

        if let Some(op) = batch.ops().iter().find(|op| !spaces.contains_key(op.namespace())) {
            return Err(eg!("unknown namespace: {}", op.namespace()));
        }

        for op in batch.into_ops() {
            match op {
                BatchOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    let space = spaces.get_mut(&namespace).c(d!())?;
                    Arc::make_mut(space).insert(key, value);
                }
                BatchOp::Delete { namespace, key } => {
                    let space = spaces.get_mut(&namespace).c(d!())?;
                    Arc::make_mut(space).remove(&key);
                }
            }
        }

        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

struct MemIter {
    space: Arc<Space>,
    // `None` once exhausted
    bound: Option<Bound<RawKey>>,
    forward: bool,
}

impl Iterator for MemIter {
    type Item = Result<(RawKey, RawValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        let bound = self.bound.take()?;
        let hit = if self.forward {
            self.space
                .range::<RawKey, _>((bound, Bound::Unbounded))
                .next()
        } else {
            self.space
                .range::<RawKey, _>((Bound::Unbounded, bound))
                .next_back()
        };
        hit.map(|(k, v)| {
            self.bound = Some(Bound::Excluded(k.clone()));
            Ok((k.clone(), v.clone()))
        })
    }
}
