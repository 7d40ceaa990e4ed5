use super::{Batch, BatchOp, Engine, EngineIter, Seek};
use crate::common::{config::EngineConfig, vstrie_get_base_dir};
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, Cache, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch,
    WriteOptions,
};
use ruc::*;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs,
    path::Path,
    sync::Arc,
    thread::available_parallelism,
};
use tracing::debug;

/// The RocksDB handle type this engine works with, also what callers hand
/// to `RocksEngine::attach`.
pub type RocksDb = DBWithThreadMode<MultiThreaded>;

/// One column family per namespace.
pub struct RocksEngine {
    db: Arc<RocksDb>,
    // namespace => column family name
    cf_names: BTreeMap<String, String>,
    sync_writes: bool,
}

impl RocksEngine {
    /// Open (or create) a store-owned database under `dir`.
    pub fn open<S: AsRef<str>>(
        dir: impl AsRef<Path>,
        cfg: &EngineConfig,
        namespaces: &[S],
    ) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).c(d!())?;

        let opts = db_options(cfg).c(d!())?;

        // every existing column family must be listed when reopening
        let mut names = RocksDb::list_cf(&opts, dir)
            .unwrap_or_default()
            .into_iter()
            .collect::<BTreeSet<_>>();
        names.extend(namespaces.iter().map(|ns| ns.as_ref().to_owned()));

        let cfs = names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, cf_options(cfg, name)))
            .collect::<Vec<_>>();

        let db = RocksDb::open_cf_descriptors(&opts, dir, cfs).c(d!())?;
        debug!(dir = %dir.display(), column_families = names.len(), "rocksdb opened");

        Ok(Self {
            db: Arc::new(db),
            cf_names: namespaces
                .iter()
                .map(|ns| (ns.as_ref().to_owned(), ns.as_ref().to_owned()))
                .collect(),
            sync_writes: cfg.sync_writes,
        })
    }

    /// Open under `${VSTRIE_BASE_DIR}/<name>`.
    pub fn open_default<S: AsRef<str>>(
        name: &str,
        cfg: &EngineConfig,
        namespaces: &[S],
    ) -> Result<Self> {
        Self::open(vstrie_get_base_dir().join(name), cfg, namespaces).c(d!())
    }

    /// Serve `namespaces` out of a database the caller owns.
    ///
    /// Missing column families are created as `<cf_prefix><namespace>`;
    /// the caller's handle is never closed by this engine.
    pub fn attach<S: AsRef<str>>(
        db: Arc<RocksDb>,
        cf_prefix: &str,
        cfg: &EngineConfig,
        namespaces: &[S],
    ) -> Result<Self> {
        let mut cf_names = BTreeMap::new();
        for ns in namespaces.iter().map(|ns| ns.as_ref()) {
            let name = format!("{}{}", cf_prefix, ns);
            if db.cf_handle(&name).is_none() {
                db.create_cf(&name, &cf_options(cfg, ns)).c(d!())?;
            }
            cf_names.insert(ns.to_owned(), name);
        }
        debug!(cf_prefix, namespaces = cf_names.len(), "attached to a caller-owned rocksdb");

        Ok(Self {
            db,
            cf_names,
            sync_writes: cfg.sync_writes,
        })
    }

    pub fn db(&self) -> &Arc<RocksDb> {
        &self.db
    }

    #[inline(always)]
    fn cf(&self, namespace: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        let name = self
            .cf_names
            .get(namespace)
            .c(d!("unknown namespace: {}", namespace))?;
        self.db
            .cf_handle(name)
            .c(d!("column family not opened: {}", name))
    }
}

impl Engine for RocksEngine {
    fn namespaces(&self) -> Vec<String> {
        self.cf_names.keys().cloned().collect()
    }

    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(namespace).c(d!())?;
        self.db.get_cf(&cf, key).c(d!())
    }

    fn iter(&self, namespace: &str, seek: Seek<'_>) -> Result<EngineIter<'_>> {
        let cf = self.cf(namespace).c(d!())?;
        let mode = match seek {
            Seek::First => IteratorMode::Start,
            Seek::Last => IteratorMode::End,
            Seek::Forward(k) => IteratorMode::From(k, Direction::Forward),
            Seek::Backward(k) => IteratorMode::From(k, Direction::Reverse),
        };
        let it = self
            .db
            .iterator_cf(&cf, mode)
            .map(|i| i.map(|(k, v)| (k.into_vec(), v.into_vec())).c(d!()));
        Ok(Box::new(it))
    }

    fn write(&self, batch: Batch) -> Result<()> {
        let sync = batch.sync() || self.sync_writes;

        let mut cfs = HashMap::new();
        let mut wb = WriteBatch::default();
        for op in batch.into_ops() {
            let ns = op.namespace().to_owned();
            if !cfs.contains_key(&ns) {
                let cf = self.cf(&ns).c(d!())?;
                cfs.insert(ns.clone(), cf);
            }
            let cf = cfs.get(&ns).c(d!())?;
            match op {
                BatchOp::Put { key, value, .. } => wb.put_cf(cf, key, value),
                BatchOp::Delete { key, .. } => wb.delete_cf(cf, key),
            }
        }

        let mut wo = WriteOptions::default();
        wo.set_sync(sync);
        self.db.write_opt(wb, &wo).c(d!())
    }

    fn flush(&self) -> Result<()> {
        for ns in self.cf_names.keys() {
            let cf = self.cf(ns).c(d!())?;
            self.db.flush_cf(&cf).c(d!())?;
        }
        Ok(())
    }
}

fn db_options(cfg: &EngineConfig) -> Result<Options> {
    let mut opts = Options::default();

    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let parallelism = available_parallelism().c(d!())?.get() as i32;
    opts.increase_parallelism(parallelism);

    let t = cfg.db_tuning();
    if let Some(n) = t.max_background_jobs {
        opts.set_max_background_jobs(n);
    }
    if let Some(n) = t.max_subcompactions {
        opts.set_max_subcompactions(n);
    }
    if let Some(n) = t.bytes_per_sync {
        opts.set_bytes_per_sync(n);
    }

    Ok(opts)
}

fn cf_options(cfg: &EngineConfig, namespace: &str) -> Options {
    let mut opts = Options::default();
    let t = cfg.namespace_tuning(namespace);

    if let Some(n) = t.write_buffer_size {
        opts.set_write_buffer_size(n);
    }
    if let Some(n) = t.max_write_buffer_number {
        opts.set_max_write_buffer_number(n);
    }
    if let Some(n) = t.min_write_buffer_number_to_merge {
        opts.set_min_write_buffer_number_to_merge(n);
    }
    if let Some(v) = t.level_compaction_dynamic_level_bytes {
        opts.set_level_compaction_dynamic_level_bytes(v);
    }

    if t.block_cache_size.is_some() || t.bloom_filter_bits.is_some() {
        let mut table = BlockBasedOptions::default();
        if let Some(n) = t.block_cache_size {
            table.set_block_cache(&Cache::new_lru_cache(n));
        }
        if let Some(bits) = t.bloom_filter_bits {
            table.set_bloom_filter(bits, false);
        }
        opts.set_block_based_table_factory(&table);
    }

    #[cfg(feature = "rocks_compress")]
    opts.set_compression_type(if cfg.compression {
        DBCompressionType::Lz4
    } else {
        DBCompressionType::None
    });

    #[cfg(not(feature = "rocks_compress"))]
    opts.set_compression_type(DBCompressionType::None);

    if let Some(tuning) = cfg.tuning.as_ref() {
        tuning.apply(namespace, &mut opts);
    }

    opts
}
