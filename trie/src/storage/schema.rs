//!
//! Namespaces and key layouts shared by both store flavors.
//!

use crate::commitment::{Commitment, HASH_LEN};
use crate::error::{Result, TrieError};
use vstrie_core::common::U64_SIZE;

pub const NS_NODES: &str = "nodes";
pub const NS_VALUES: &str = "values";
pub const NS_ROOTS: &str = "roots";
pub const NS_STALE: &str = "stale";
pub const NS_NODE_VERSIONS: &str = "node_versions";
pub const NS_VALUE_VERSIONS: &str = "value_versions";
pub const NS_REFS: &str = "refs";

/// Every namespace a store may touch; pass this to the engine constructor.
pub const NAMESPACES: [&str; 7] = [
    NS_NODES,
    NS_VALUES,
    NS_ROOTS,
    NS_STALE,
    NS_NODE_VERSIONS,
    NS_VALUE_VERSIONS,
    NS_REFS,
];

// Sentinels live in `roots`; their lengths differ from a version key.
pub const LATEST_ROOT_KEY: &[u8] = b"\xffLATEST_ROOT";
pub const LATEST_VERSION_KEY: &[u8] = b"\xffLATEST_VERSION";
/// Shared by both `LATEST_*` sentinels, which are read together.
pub const LATEST_PREFIX: &[u8] = b"\xffLATEST_";
pub const META_KEY: &[u8] = b"\xffSTORE_META";

const VALUE_PRESENT: u8 = 1;
const VALUE_TOMBSTONE: u8 = 0;

#[inline(always)]
pub fn version_key(version: u64) -> [u8; U64_SIZE] {
    version.to_be_bytes()
}

pub fn parse_version(bytes: &[u8]) -> Result<u64> {
    vstrie_core::common::parse_u64(bytes).map_err(TrieError::from)
}

/// `keyHash ++ version`
pub fn value_key(key_hash: &Commitment, version: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(HASH_LEN + U64_SIZE);
    k.extend_from_slice(key_hash.as_bytes());
    k.extend_from_slice(&version.to_be_bytes());
    k
}

pub fn split_value_key(key: &[u8]) -> Result<(Commitment, u64)> {
    if key.len() != HASH_LEN + U64_SIZE {
        return Err(TrieError::Codec(format!("bad value key length: {}", key.len())));
    }
    let (h, v) = key.split_at(HASH_LEN);
    Ok((Commitment::from_slice(h)?, parse_version(v)?))
}

/// `version ++ keyHash`
pub fn value_version_key(version: u64, key_hash: &Commitment) -> Vec<u8> {
    let mut k = Vec::with_capacity(U64_SIZE + HASH_LEN);
    k.extend_from_slice(&version.to_be_bytes());
    k.extend_from_slice(key_hash.as_bytes());
    k
}

/// `staleSince ++ nodeKey`
pub fn stale_key(stale_since: u64, node_key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(U64_SIZE + node_key.len());
    k.extend_from_slice(&stale_since.to_be_bytes());
    k.extend_from_slice(node_key);
    k
}

pub fn split_stale_key(key: &[u8]) -> Result<(u64, &[u8])> {
    if key.len() < U64_SIZE {
        return Err(TrieError::Codec("stale key too short".into()));
    }
    let (v, rest) = key.split_at(U64_SIZE);
    Ok((parse_version(v)?, rest))
}

/// `None` is a tombstone.
pub fn encode_value(value: Option<&[u8]>) -> Vec<u8> {
    match value {
        Some(v) => {
            let mut out = Vec::with_capacity(1 + v.len());
            out.push(VALUE_PRESENT);
            out.extend_from_slice(v);
            out
        }
        None => vec![VALUE_TOMBSTONE],
    }
}

pub fn decode_value(raw: &[u8]) -> Result<Option<Vec<u8>>> {
    match raw.split_first() {
        Some((&VALUE_PRESENT, v)) => Ok(Some(v.to_vec())),
        Some((&VALUE_TOMBSTONE, [])) => Ok(None),
        _ => Err(TrieError::Codec("malformed stored value".into())),
    }
}
