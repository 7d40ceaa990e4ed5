//!
//! Commitment schemes: how a node's content turns into a 32-byte hash.
//!
//! Both schemes hash leaves and extensions the same way; they differ in how
//! a branch is committed. Traversal code only ever talks to the
//! [`CommitmentScheme`] trait.
//!

mod classic;
mod compact;

pub use classic::Classic;
pub use compact::Compact;

use crate::error::{Result, TrieError};
use crate::nibbles::NibblePath;
use crate::node::{Node, NodeHandle};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::{fmt, sync::Arc};

pub const HASH_LEN: usize = 32;

const TAG_LEAF: u8 = 0x00;
const TAG_EXTENSION: u8 = 0x01;
const TAG_BRANCH: u8 = 0x02;

/// HP-packed path preceded by its byte length (u32 BE). Every preimage
/// carries its path this way so that it splits into fields in one way only.
fn framed_path(path: &NibblePath, leaf: bool) -> Vec<u8> {
    let hp = path.pack_hp(leaf);
    let mut buf = Vec::with_capacity(4 + hp.len());
    buf.extend_from_slice(&(hp.len() as u32).to_be_bytes());
    buf.extend_from_slice(&hp);
    buf
}

/// Fixed-size summary of a node or of a whole subtree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Commitment(pub [u8; HASH_LEN]);

impl Commitment {
    /// Commitment of the empty subtree.
    pub const NULL: Commitment = Commitment([0; HASH_LEN]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            TrieError::Codec(format!("commitment must be {} bytes, got {}", HASH_LEN, bytes.len()))
        })?;
        Ok(Commitment(array))
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The 32-byte hash function underneath a scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgo {
    Blake3,
    Keccak256,
}

impl HashAlgo {
    /// Hash of the concatenation of `parts`.
    pub fn hash(&self, parts: &[&[u8]]) -> Commitment {
        let mut out = [0u8; HASH_LEN];
        match self {
            HashAlgo::Blake3 => {
                let mut h = blake3::Hasher::new();
                for p in parts {
                    h.update(p);
                }
                out.copy_from_slice(h.finalize().as_bytes());
            }
            HashAlgo::Keccak256 => {
                let mut h = Keccak256::new();
                for p in parts {
                    h.update(p);
                }
                out.copy_from_slice(&h.finalize());
            }
        }
        Commitment(out)
    }

    #[inline(always)]
    pub fn digest(&self, data: &[u8]) -> Commitment {
        self.hash(&[data])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeKind {
    Classic,
    Compact,
}

impl SchemeKind {
    /// `None` picks the scheme's default hash function.
    pub fn build(self, algo: Option<HashAlgo>) -> Arc<dyn CommitmentScheme> {
        match self {
            SchemeKind::Classic => Arc::new(Classic::new(algo.unwrap_or(HashAlgo::Keccak256))),
            SchemeKind::Compact => Arc::new(Compact::new(algo.unwrap_or(HashAlgo::Blake3))),
        }
    }
}

/// Pure function from node content to commitment; never touches a store.
pub trait CommitmentScheme: Send + Sync {
    fn kind(&self) -> SchemeKind;

    fn algo(&self) -> HashAlgo;

    /// Whether `commit_branch` depends on the branch's own value.
    fn encodes_branch_value(&self) -> bool;

    /// Hash of a value or of a key.
    fn digest(&self, data: &[u8]) -> Commitment {
        self.algo().digest(data)
    }

    fn null_hash(&self) -> Commitment {
        Commitment::NULL
    }

    fn commit_leaf(&self, suffix: &NibblePath, value_hash: &Commitment) -> Commitment {
        self.algo()
            .hash(&[&[TAG_LEAF], &framed_path(suffix, true), value_hash.as_bytes()])
    }

    fn commit_extension(&self, path: &NibblePath, child: &Commitment) -> Commitment {
        self.algo()
            .hash(&[&[TAG_EXTENSION], &framed_path(path, false), child.as_bytes()])
    }

    /// `prefix` is the extension path flattened into this branch, if any.
    fn commit_branch(
        &self,
        prefix: &NibblePath,
        children: &[Option<Commitment>; 16],
        value_hash: Option<&Commitment>,
    ) -> Commitment;
}

/// What a parent needs to know about a sealed child in order to flatten an
/// extension into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    Leaf {
        suffix: NibblePath,
        value_hash: Commitment,
    },
    Branch {
        children: [Option<Commitment>; 16],
        value_hash: Option<Commitment>,
    },
}

impl Shape {
    /// Shape of a node whose children are all sealed; `None` for an
    /// extension, which has to be resolved through its child.
    pub fn of(scheme: &dyn CommitmentScheme, node: &Node) -> Result<Option<Self>> {
        match node {
            Node::Leaf { path, value } => Ok(Some(Shape::Leaf {
                suffix: path.clone(),
                value_hash: scheme.digest(value),
            })),
            Node::Extension { .. } => Ok(None),
            Node::Branch { children, value } => {
                let mut hashes = [None; 16];
                for (slot, child) in hashes.iter_mut().zip(children.iter()) {
                    *slot = match child {
                        None => None,
                        Some(NodeHandle::Hash(h)) => Some(*h),
                        Some(NodeHandle::InMemory(_)) => {
                            return Err(TrieError::Codec("unsealed branch child".into()));
                        }
                    };
                }
                Ok(Some(Shape::Branch {
                    children: hashes,
                    value_hash: value.as_deref().map(|v| scheme.digest(v)),
                }))
            }
        }
    }

    /// Commitment of this shape when reached through `prefix` extra nibbles.
    pub fn commit(&self, scheme: &dyn CommitmentScheme, prefix: &NibblePath) -> Commitment {
        match self {
            Shape::Leaf { suffix, value_hash } => {
                scheme.commit_leaf(&prefix.concat(suffix), value_hash)
            }
            Shape::Branch {
                children,
                value_hash,
            } => scheme.commit_branch(prefix, children, value_hash.as_ref()),
        }
    }
}
