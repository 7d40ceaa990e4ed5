//!
//! Engine configuration: named presets plus explicit overrides.
//!
//! Resolution order for a namespace is: profile preset, then
//! `EngineConfig::defaults`, then the namespace's own entry, then the
//! `RocksTuning` escape hatch (RocksDB only).
//!

use super::MB;
use ruc::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "rocks_engine")]
use std::{fmt, sync::Arc};

/// Named tuning presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    HighThroughput,
    Balanced,
    LowMemory,
    /// Leave everything at the engine's own defaults.
    #[default]
    Default,
}

/// Per-namespace knobs, `None` means "keep what the profile says".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceTuning {
    pub write_buffer_size: Option<usize>,
    pub max_write_buffer_number: Option<i32>,
    pub min_write_buffer_number_to_merge: Option<i32>,
    pub block_cache_size: Option<usize>,
    pub bloom_filter_bits: Option<f64>,
    pub level_compaction_dynamic_level_bytes: Option<bool>,
}

impl NamespaceTuning {
    /// Fields set in `other` win.
    pub fn merge(&mut self, other: &NamespaceTuning) {
        pick(&mut self.write_buffer_size, other.write_buffer_size);
        pick(&mut self.max_write_buffer_number, other.max_write_buffer_number);
        pick(
            &mut self.min_write_buffer_number_to_merge,
            other.min_write_buffer_number_to_merge,
        );
        pick(&mut self.block_cache_size, other.block_cache_size);
        pick(&mut self.bloom_filter_bits, other.bloom_filter_bits);
        pick(
            &mut self.level_compaction_dynamic_level_bytes,
            other.level_compaction_dynamic_level_bytes,
        );
    }
}

#[inline(always)]
fn pick<T: Copy>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

/// Database-wide knobs derived from the profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbTuning {
    pub max_background_jobs: Option<i32>,
    pub max_subcompactions: Option<u32>,
    pub bytes_per_sync: Option<u64>,
}

impl Profile {
    pub fn namespace_preset(self) -> NamespaceTuning {
        const M: usize = MB as usize;
        match self {
            Profile::HighThroughput => NamespaceTuning {
                write_buffer_size: Some(256 * M),
                max_write_buffer_number: Some(6),
                min_write_buffer_number_to_merge: Some(2),
                block_cache_size: Some(512 * M),
                bloom_filter_bits: Some(10.0),
                level_compaction_dynamic_level_bytes: Some(true),
            },
            Profile::Balanced => NamespaceTuning {
                write_buffer_size: Some(128 * M),
                max_write_buffer_number: Some(3),
                min_write_buffer_number_to_merge: Some(1),
                block_cache_size: Some(256 * M),
                bloom_filter_bits: Some(10.0),
                level_compaction_dynamic_level_bytes: Some(true),
            },
            Profile::LowMemory => NamespaceTuning {
                write_buffer_size: Some(64 * M),
                max_write_buffer_number: Some(2),
                min_write_buffer_number_to_merge: Some(1),
                block_cache_size: Some(32 * M),
                bloom_filter_bits: Some(10.0),
                level_compaction_dynamic_level_bytes: Some(false),
            },
            Profile::Default => NamespaceTuning::default(),
        }
    }

    pub fn db_preset(self) -> DbTuning {
        match self {
            Profile::HighThroughput => DbTuning {
                max_background_jobs: Some(8),
                max_subcompactions: Some(4),
                bytes_per_sync: Some(MB),
            },
            Profile::Balanced => DbTuning {
                max_background_jobs: Some(4),
                max_subcompactions: Some(2),
                bytes_per_sync: Some(MB),
            },
            Profile::LowMemory => DbTuning {
                max_background_jobs: Some(2),
                max_subcompactions: Some(1),
                bytes_per_sync: Some(512 * 1024),
            },
            Profile::Default => DbTuning::default(),
        }
    }
}

/// Arbitrary engine-specific tuning, applied last for every namespace.
#[cfg(feature = "rocks_engine")]
#[derive(Clone)]
pub struct RocksTuning(Arc<dyn Fn(&str, &mut rocksdb::Options) + Send + Sync>);

#[cfg(feature = "rocks_engine")]
impl RocksTuning {
    pub fn new(f: impl Fn(&str, &mut rocksdb::Options) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    #[inline(always)]
    pub(crate) fn apply(&self, namespace: &str, opts: &mut rocksdb::Options) {
        (self.0)(namespace, opts)
    }
}

#[cfg(feature = "rocks_engine")]
impl fmt::Debug for RocksTuning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RocksTuning(..)")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub profile: Profile,
    pub max_background_jobs: Option<i32>,
    pub max_subcompactions: Option<u32>,
    pub bytes_per_sync: Option<u64>,
    /// Only effective with the `compress` feature.
    pub compression: bool,
    /// fsync every batch write.
    pub sync_writes: bool,
    /// Applied to all namespaces, before per-namespace entries.
    pub defaults: NamespaceTuning,
    pub namespaces: BTreeMap<String, NamespaceTuning>,
    #[cfg(feature = "rocks_engine")]
    #[serde(skip)]
    pub tuning: Option<RocksTuning>,
}

impl EngineConfig {
    pub fn with_profile(profile: Profile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    pub fn high_throughput() -> Self {
        Self::with_profile(Profile::HighThroughput)
    }

    pub fn balanced() -> Self {
        Self::with_profile(Profile::Balanced)
    }

    pub fn low_memory() -> Self {
        Self::with_profile(Profile::LowMemory)
    }

    pub fn namespace(mut self, name: &str, tuning: NamespaceTuning) -> Self {
        self.namespaces.insert(name.to_owned(), tuning);
        self
    }

    #[cfg(feature = "rocks_engine")]
    pub fn with_tuning(
        mut self,
        f: impl Fn(&str, &mut rocksdb::Options) + Send + Sync + 'static,
    ) -> Self {
        self.tuning = Some(RocksTuning::new(f));
        self
    }

    /// Effective knobs of one namespace.
    pub fn namespace_tuning(&self, name: &str) -> NamespaceTuning {
        let mut t = self.profile.namespace_preset();
        t.merge(&self.defaults);
        if let Some(ns) = self.namespaces.get(name) {
            t.merge(ns);
        }
        t
    }

    /// Effective database-wide knobs.
    pub fn db_tuning(&self) -> DbTuning {
        let mut t = self.profile.db_preset();
        pick(&mut t.max_background_jobs, self.max_background_jobs);
        pick(&mut t.max_subcompactions, self.max_subcompactions);
        pick(&mut t.bytes_per_sync, self.bytes_per_sync);
        t
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).c(d!())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).c(d!())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn profile_then_overrides() {
        let cfg = EngineConfig {
            defaults: NamespaceTuning {
                bloom_filter_bits: Some(12.0),
                ..Default::default()
            },
            ..EngineConfig::low_memory()
        }
        .namespace(
            "nodes",
            NamespaceTuning {
                write_buffer_size: Some(8 * MB as usize),
                ..Default::default()
            },
        );

        let nodes = cfg.namespace_tuning("nodes");
        assert_eq!(nodes.write_buffer_size, Some(8 * MB as usize));
        assert_eq!(nodes.max_write_buffer_number, Some(2));
        assert_eq!(nodes.bloom_filter_bits, Some(12.0));

        let values = cfg.namespace_tuning("values");
        assert_eq!(values.write_buffer_size, Some(64 * MB as usize));

        assert_eq!(cfg.db_tuning().max_background_jobs, Some(2));
    }

    #[test]
    fn default_profile_leaves_engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.namespace_tuning("roots"), NamespaceTuning::default());
        assert_eq!(cfg.db_tuning(), DbTuning::default());
    }

    #[test]
    fn json_config() {
        let cfg = pnk!(EngineConfig::from_json(
            r#"{"profile":"HighThroughput","sync_writes":true,
                "namespaces":{"stale":{"max_write_buffer_number":1}}}"#
        ));
        assert_eq!(cfg.profile, Profile::HighThroughput);
        assert!(cfg.sync_writes);
        assert_eq!(cfg.namespace_tuning("stale").max_write_buffer_number, Some(1));
        assert_eq!(cfg.namespace_tuning("nodes").max_write_buffer_number, Some(6));

        let back = pnk!(EngineConfig::from_json(&pnk!(cfg.to_json())));
        assert_eq!(back.profile, cfg.profile);
        assert_eq!(back.namespaces, cfg.namespaces);
    }
}
