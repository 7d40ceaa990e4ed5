use super::{GcPhase, GcProgress, GcReport, GcStrategy, RetentionPolicy};
use crate::commitment::Commitment;
use crate::error::{Result, TrieError};
use crate::storage::{schema::*, ContentStore, TrieStore};
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;
use vstrie_core::Seek;

/// Mark everything reachable from the retained roots, sweep the rest.
///
/// Holds the writer lock from the first mark to the last delete, so no
/// commit lands in between.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkSweepGc;

impl MarkSweepGc {
    pub fn new() -> Self {
        Self
    }
}

impl GcStrategy<ContentStore> for MarkSweepGc {
    fn name(&self) -> &'static str {
        "mark-sweep"
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
        let chunk = base.options.gc_batch_size;

        let (retained, dropped) = policy.partition(&base.versions()?);

        let mut marked = HashSet::<Commitment>::new();
        let mut todo = retained
            .iter()
            .map(|r| r.root)
            .filter(|h| !h.is_null())
            .collect::<Vec<_>>();
        while let Some(h) = todo.pop() {
            if !marked.insert(h) {
                continue;
            }
            let node = store
                .get_node(&h)?
                .ok_or_else(|| TrieError::MissingNode(h.to_string()))?;
            todo.extend(node.child_hashes());

            if marked.len() % chunk == 0 {
                progress(&GcProgress {
                    phase: GcPhase::Mark,
                    completed: marked.len() as u64,
                    total: 0,
                });
            }
        }

        let mut total = 0u64;
        let mut deleted = 0u64;
        let mut batch = base.new_batch();
        for i in base.engine.iter(NS_NODES, Seek::First)? {
            let (k, _) = i?;
            total += 1;
            if marked.contains(&Commitment::from_slice(&k)?) {
                continue;
            }
            batch.remove(NS_NODES, &k);
            deleted += 1;

            if batch.len() >= chunk {
                base.engine
                    .write(std::mem::replace(&mut batch, base.new_batch()))?;
                progress(&GcProgress {
                    phase: GcPhase::Sweep,
                    completed: deleted,
                    total: 0,
                });
            }
        }
        for r in dropped.iter() {
            batch.remove(NS_ROOTS, &version_key(r.version));
        }
        if !batch.is_empty() {
            base.engine.write(batch)?;
        }
        progress(&GcProgress {
            phase: GcPhase::Sweep,
            completed: deleted,
            total: deleted,
        });

        let report = GcReport {
            marked: marked.len() as u64,
            deleted,
            total,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            strategy = self.name(),
            marked = report.marked,
            deleted,
            total,
            dropped_versions = dropped.len(),
            duration_ms = report.duration_ms,
            "gc finished"
        );
        Ok(report)
    }
}
