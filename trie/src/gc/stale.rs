use super::{GcPhase, GcProgress, GcReport, GcStrategy, RetentionPolicy};
use crate::error::Result;
use crate::storage::{
    schema::*, CompactionReport, NodeKey, TrieStore, ValuePrunePolicy, VersionedStore,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;
use vstrie_core::Seek;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub floor: u64,
    /// Stale markers consumed, one node each.
    pub nodes_deleted: u64,
    pub values_scanned: u64,
    pub values_deleted: u64,
    pub duration_ms: u64,
}

/// Delete every node that went stale at or before `floor`, then compact
/// the value log with `policy`.
///
/// Reads at any version `>= floor` are unaffected. Deletions are written
/// in atomic chunks of `gc_batch_size`, `progress` is called after each.
pub fn prune_up_to(
    store: &VersionedStore,
    floor: u64,
    policy: ValuePrunePolicy,
    progress: &mut dyn FnMut(&GcProgress),
) -> Result<PruneReport> {
    let started = Instant::now();
    let base = store.base();
    let _guard = base.lock_writer();

    let chunk = base.options.gc_batch_size;
    let with_index = base.options.version_indices;
    let mut batch = base.new_batch();
    let mut in_batch = 0;
    let mut deleted = 0u64;

    for i in base.engine.iter(NS_STALE, Seek::First)? {
        let (k, _) = i?;
        let (stale_since, node_key) = split_stale_key(&k)?;
        if stale_since > floor {
            break;
        }

        batch.remove(NS_STALE, &k);
        batch.remove(NS_NODES, node_key);
        if with_index {
            batch.remove(NS_NODE_VERSIONS, &NodeKey::decode(node_key)?.index_key());
        }
        in_batch += 1;
        deleted += 1;

        if in_batch >= chunk {
            base.engine.write(std::mem::replace(&mut batch, base.new_batch()))?;
            in_batch = 0;
            progress(&GcProgress {
                phase: GcPhase::Prune,
                completed: deleted,
                total: 0,
            });
        }
    }
    if in_batch > 0 {
        base.engine.write(batch)?;
        progress(&GcProgress {
            phase: GcPhase::Prune,
            completed: deleted,
            total: deleted,
        });
    }

    let CompactionReport { scanned, deleted: values_deleted } =
        base.compact_values_locked(floor, policy)?;

    let report = PruneReport {
        floor,
        nodes_deleted: deleted,
        values_scanned: scanned,
        values_deleted,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        floor,
        nodes_deleted = report.nodes_deleted,
        values_deleted = report.values_deleted,
        duration_ms = report.duration_ms,
        "stale nodes pruned"
    );
    Ok(report)
}

/// Stale-list pruning for the version-path store; the retention floor is
/// the oldest retained version.
#[derive(Clone, Copy, Debug, Default)]
pub struct StalePruneGc {
    pub values: ValuePrunePolicy,
}

impl StalePruneGc {
    pub fn new(values: ValuePrunePolicy) -> Self {
        Self { values }
    }
}

impl GcStrategy<VersionedStore> for StalePruneGc {
    fn name(&self) -> &'static str {
        "stale-prune"
    }

    fn run(
        &self,
        store: &VersionedStore,
        policy: &RetentionPolicy,
        progress: &mut dyn FnMut(&GcProgress),
    ) -> Result<GcReport> {
        let Some(floor) = policy.floor(&store.versions()?) else {
            return Ok(GcReport::default());
        };
        let r = prune_up_to(store, floor, self.values, progress)?;
        Ok(GcReport {
            marked: 0,
            deleted: r.nodes_deleted,
            total: r.nodes_deleted,
            duration_ms: r.duration_ms,
        })
    }
}
