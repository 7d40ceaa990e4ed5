//! # vstrie_core
//!
//! `vstrie_core` is the storage layer underneath `vstrie`. It abstracts an
//! embedded, ordered key-value engine split into named namespaces, with
//! point reads, seek / seek-for-prev iteration and atomic write batches that
//! may span several namespaces.
//!
//! Two engines are provided: a RocksDB engine (one column family per
//! namespace, feature `rocks_engine`) and an in-memory engine used by tests
//! and short-lived embedders.

#![deny(warnings)]
#![cfg_attr(test, allow(warnings))]

/// Engine abstraction, engine configuration and shared constants.
pub mod common;

pub use common::{
    config::{EngineConfig, NamespaceTuning, Profile},
    engines::{Batch, BatchOp, Engine, EngineIter, MemEngine, Seek},
    vstrie_get_base_dir, vstrie_set_base_dir, GB, KB, MB, RawBytes, RawKey,
    RawValue,
};

#[cfg(feature = "rocks_engine")]
pub use common::{
    config::RocksTuning,
    engines::{RocksDb, RocksEngine},
};

#[cfg(feature = "rocks_engine")]
pub use rocksdb;
