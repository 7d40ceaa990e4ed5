//!
//! Inclusion / non-inclusion proofs.
//!
//! Generation walks the key path through a node source. Verification needs
//! nothing but the commitment scheme, and reports failure as `false`.
//!

mod verify;
mod wire;

pub use verify::verify;

/// [`verify`] over the wire form of a proof; bytes that do not decode
/// verify as `false`.
pub fn verify_bytes(
    scheme: &dyn CommitmentScheme,
    root: &Commitment,
    path: &NibblePath,
    value: Option<&[u8]>,
    including: bool,
    bytes: &[u8],
) -> bool {
    Proof::from_bytes(bytes)
        .map(|proof| verify(scheme, root, path, value, including, &proof))
        .unwrap_or(false)
}

use crate::commitment::{Commitment, CommitmentScheme, Compact, SchemeKind};
use crate::error::{Result, TrieError};
use crate::nibbles::NibblePath;
use crate::node::{Node, NodeCodec};
use crate::trie::NodeSource;

/// One level of a compact proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofStep {
    /// The key passes through a branch: `skip` is the extension path folded
    /// into it, `neighbors` the sibling hashes of the taken slot.
    Branch {
        skip: NibblePath,
        neighbors: [Commitment; 4],
    },
    /// A different leaf sits where the key would go.
    Leaf {
        suffix: NibblePath,
        value_hash: Commitment,
    },
    /// The key leaves the path of an extension.
    Fork {
        prefix: NibblePath,
        children_root: Commitment,
    },
    /// The key ends on a branch; its value hash is carried unauthenticated.
    Value {
        skip: NibblePath,
        children_root: Commitment,
        value_hash: Option<Commitment>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proof {
    /// Encoded nodes from the root along the key path (classic scheme).
    Nodes(Vec<Vec<u8>>),
    /// Typed steps from the root down (compact scheme).
    Steps(Vec<ProofStep>),
}

impl Proof {
    pub fn len(&self) -> usize {
        match self {
            Proof::Nodes(n) => n.len(),
            Proof::Steps(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof for `path` in the trie rooted at `root`.
pub fn prove<S: NodeSource + ?Sized>(
    source: &S,
    scheme: &dyn CommitmentScheme,
    root: &Commitment,
    path: &NibblePath,
) -> Result<Proof> {
    match scheme.kind() {
        SchemeKind::Classic => prove_nodes(source, root, path).map(Proof::Nodes),
        SchemeKind::Compact => {
            prove_steps(source, &Compact::new(scheme.algo()), root, path).map(Proof::Steps)
        }
    }
}

fn prove_nodes<S: NodeSource + ?Sized>(
    source: &S,
    root: &Commitment,
    path: &NibblePath,
) -> Result<Vec<Vec<u8>>> {
    let mut out = vec![];
    if root.is_null() {
        return Ok(out);
    }

    let mut at = NibblePath::new();
    let mut rest = path.clone();
    let mut hash = *root;

    loop {
        let node = source.load(&at, &hash)?;
        out.push(NodeCodec::encode(&node)?);

        let next = match &node {
            Node::Leaf { .. } => None,
            Node::Extension { path: ext, child } => {
                let child = *child
                    .hash()
                    .ok_or_else(|| TrieError::Codec("unsealed child in a stored node".into()))?;
                let child_at = at.concat(ext);
                if rest.starts_with(ext) {
                    rest = rest.suffix(ext.len());
                    Some((child_at, child))
                } else {
                    // the verifier flattens the extension through its child
                    out.push(NodeCodec::encode(&source.load(&child_at, &child)?)?);
                    None
                }
            }
            Node::Branch { children, .. } => {
                if rest.is_empty() {
                    None
                } else {
                    let idx = rest.at(0);
                    match children[idx as usize].as_ref().and_then(|c| c.hash()) {
                        Some(c) => {
                            rest = rest.suffix(1);
                            Some((at.child(idx), *c))
                        }
                        None => None,
                    }
                }
            }
        };

        match next {
            Some((next_at, next_hash)) => {
                at = next_at;
                hash = next_hash;
            }
            None => return Ok(out),
        }
    }
}

fn slot_hashes(node: &Node) -> [Option<Commitment>; 16] {
    let mut out = [None; 16];
    if let Node::Branch { children, .. } = node {
        for (slot, c) in out.iter_mut().zip(children.iter()) {
            *slot = c.as_ref().and_then(|c| c.hash()).copied();
        }
    }
    out
}

fn prove_steps<S: NodeSource + ?Sized>(
    source: &S,
    compact: &Compact,
    root: &Commitment,
    path: &NibblePath,
) -> Result<Vec<ProofStep>> {
    let mut steps = vec![];
    if root.is_null() {
        return Ok(steps);
    }

    let mut at = NibblePath::new();
    let mut rest = path.clone();
    let mut node = source.load(&at, root)?;
    // extension path waiting to be folded into the next branch
    let mut skip = NibblePath::new();

    loop {
        match node {
            Node::Leaf { path: suffix, value } => {
                if suffix != rest {
                    steps.push(ProofStep::Leaf {
                        suffix,
                        value_hash: compact.algo().digest(&value),
                    });
                }
                return Ok(steps);
            }
            Node::Extension { path: ext, child } => {
                let child = *child
                    .hash()
                    .ok_or_else(|| TrieError::Codec("unsealed child in a stored node".into()))?;
                let child_at = at.concat(&ext);
                let child_node = source.load(&child_at, &child)?;
                if !child_node.is_branch() {
                    return Err(TrieError::Codec(format!(
                        "extension at {} does not lead to a branch",
                        at
                    )));
                }

                if rest.starts_with(&ext) {
                    rest = rest.suffix(ext.len());
                    at = child_at;
                    skip = ext;
                    node = child_node;
                } else {
                    steps.push(ProofStep::Fork {
                        prefix: ext,
                        children_root: compact.merkle_root(&slot_hashes(&child_node)),
                    });
                    return Ok(steps);
                }
            }
            Node::Branch { ref children, ref value } => {
                let slots = slot_hashes(&node);
                let skip = std::mem::take(&mut skip);

                if rest.is_empty() {
                    steps.push(ProofStep::Value {
                        skip,
                        children_root: compact.merkle_root(&slots),
                        value_hash: value.as_deref().map(|v| compact.algo().digest(v)),
                    });
                    return Ok(steps);
                }

                let idx = rest.at(0);
                steps.push(ProofStep::Branch {
                    skip,
                    neighbors: compact.neighbors(&slots, idx),
                });

                let Some(next) = children[idx as usize].as_ref().and_then(|c| c.hash()).copied()
                else {
                    return Ok(steps);
                };
                at = at.child(idx);
                rest = rest.suffix(1);
                node = source.load(&at, &next)?;
            }
        }
    }
}

#[cfg(test)]
mod test;
