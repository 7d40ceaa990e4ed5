use super::{GcPhase, GcProgress, GcReport, GcStrategy, RetentionPolicy};
use crate::commitment::Commitment;
use crate::error::{Result, TrieError};
use crate::node::Node;
use crate::storage::{schema::*, CommitBatch, ContentStore, TrieStore};
use crate::trie::NewNode;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use vstrie_core::Batch;

/// Reference counting for the content store.
///
/// The counter of a node is the number of references to it: one per slot
/// of a stored parent, one per root-index entry. Counters change inside the
/// commit batch, so a node is never visible without its counter. Retiring a
/// version releases its root and, transitively, every node whose counter
/// drops to zero.
///
/// Commits and `run` must not interleave; the trie front-ends serialize them.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefCountGc;

impl RefCountGc {
    pub fn new() -> Self {
        Self
    }
}

/// Counters read through from the store, with pending changes on top.
struct Counters<'a> {
    store: &'a ContentStore,
    dirty: HashMap<Commitment, u64>,
}

impl<'a> Counters<'a> {
    fn new(store: &'a ContentStore) -> Self {
        Self {
            store,
            dirty: HashMap::new(),
        }
    }

    fn get(&self, h: &Commitment) -> Result<u64> {
        match self.dirty.get(h) {
            Some(c) => Ok(*c),
            None => self.store.ref_count(h),
        }
    }

    /// Returns the previous value.
    fn incr(&mut self, h: &Commitment) -> Result<u64> {
        let c = self.get(h)?;
        self.dirty.insert(*h, c + 1);
        Ok(c)
    }

    /// Returns the new value.
    fn decr(&mut self, h: &Commitment) -> Result<u64> {
        let c = self.get(h)?;
        if c == 0 {
            return Err(TrieError::Store(format!(
                "reference counter of {} underflows",
                h
            )));
        }
        self.dirty.insert(*h, c - 1);
        Ok(c - 1)
    }

    /// Stage the pending counters; a zero counter is removed with its node.
    fn stage(&mut self, batch: &mut Batch) -> u64 {
        let mut freed = 0;
        for (h, c) in self.dirty.drain() {
            if c == 0 {
                batch.remove(NS_REFS, h.as_bytes());
                batch.remove(NS_NODES, h.as_bytes());
                freed += 1;
            } else {
                batch.insert(NS_REFS, h.as_bytes(), &c.to_be_bytes());
            }
        }
        freed
    }
}

impl GcStrategy<ContentStore> for RefCountGc {
    fn name(&self) -> &'static str {
        "refcount"
    }

    fn on_commit(
        &self,
        store: &ContentStore,
        batch: &mut CommitBatch<'_, Commitment>,
        root: &Commitment,
        nodes: &[NewNode],
    ) -> Result<()> {
        if root.is_null() {
            return Ok(());
        }
        let fresh = nodes
            .iter()
            .map(|n| (n.commitment, &n.node))
            .collect::<HashMap<_, _>>();
        let mut counters = Counters::new(store);

        // a node seen for the first time adds one reference to each child
        let mut todo = vec![*root];
        while let Some(h) = todo.pop() {
            if counters.incr(&h)? > 0 {
                continue;
            }
            match fresh.get(&h) {
                Some(n) => todo.extend(n.child_hashes()),
                None => todo.extend(load(store, &h)?.child_hashes()),
            }
        }

        counters.stage(batch.raw()?);
        Ok(())
    }

    fn run(
        &self,
        store: &ContentStore,
        policy: &RetentionPolicy,
        progress: &mut dyn FnMut(&GcProgress),
    ) -> Result<GcReport> {
        let started = Instant::now();
        let base = store.base();
        let _guard = base.lock_writer();

        let (_, dropped) = policy.partition(&base.versions()?);
        let total = dropped.len() as u64;
        let mut deleted = 0;

        for (i, r) in dropped.iter().enumerate() {
            let mut counters = Counters::new(store);
            let mut batch = base.new_batch();

            if !r.root.is_null() {
                let mut todo = vec![r.root];
                while let Some(h) = todo.pop() {
                    if counters.decr(&h)? == 0 {
                        todo.extend(load(store, &h)?.child_hashes());
                    }
                }
            }
            let freed = counters.stage(&mut batch);
            batch.remove(NS_ROOTS, &version_key(r.version));
            base.engine.write(batch)?;

            deleted += freed;
            debug!(version = r.version, freed, "version retired");
            progress(&GcProgress {
                phase: GcPhase::Retire,
                completed: i as u64 + 1,
                total,
            });
        }

        let report = GcReport {
            marked: 0,
            deleted,
            total,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            strategy = self.name(),
            versions = total,
            deleted,
            duration_ms = report.duration_ms,
            "gc finished"
        );
        Ok(report)
    }
}

fn load(store: &ContentStore, h: &Commitment) -> Result<Node> {
    store
        .get_node(h)?
        .ok_or_else(|| TrieError::MissingNode(h.to_string()))
}
