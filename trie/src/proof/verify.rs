use super::{Proof, ProofStep};
use crate::commitment::{Commitment, CommitmentScheme, Compact, SchemeKind, Shape};
use crate::nibbles::NibblePath;
use crate::node::{Node, NodeCodec};

/// Check `proof` for `path` against `root`.
///
/// `including == true` asks whether `path` maps to `value`;
/// `including == false` asks whether `path` is absent.
pub fn verify(
    scheme: &dyn CommitmentScheme,
    root: &Commitment,
    path: &NibblePath,
    value: Option<&[u8]>,
    including: bool,
    proof: &Proof,
) -> bool {
    if including && value.is_none() {
        return false;
    }
    let found = match (scheme.kind(), proof) {
        (SchemeKind::Classic, Proof::Nodes(nodes)) => verify_nodes(scheme, root, path, nodes),
        (SchemeKind::Compact, Proof::Steps(steps)) => {
            return verify_steps(&Compact::new(scheme.algo()), root, path, value, including, steps);
        }
        _ => return false,
    };
    match found {
        Some(found) if including => found.as_deref() == value,
        Some(found) => found.is_none(),
        None => false,
    }
}

/// `None` if the proof does not hold together, else the value it shows
/// for `path`.
fn verify_nodes(
    scheme: &dyn CommitmentScheme,
    root: &Commitment,
    path: &NibblePath,
    raw: &[Vec<u8>],
) -> Option<Option<Vec<u8>>> {
    if root.is_null() {
        return raw.is_empty().then_some(None);
    }

    let nodes = raw
        .iter()
        .map(|n| NodeCodec::decode(n).ok())
        .collect::<Option<Vec<_>>>()?;
    if flat(scheme, &nodes, 0, &NibblePath::new())? != *root {
        return None;
    }

    let mut rest = path.clone();
    let mut i = 0;
    loop {
        let walk = match nodes.get(i)? {
            Node::Leaf { path, value } => Walk::Done {
                found: (*path == rest).then(|| value.clone()),
                last: i,
            },
            Node::Extension { path: ext, child } => {
                if flat(scheme, &nodes, i + 1, &NibblePath::new())? != *child.hash()? {
                    return None;
                }
                if rest.starts_with(ext) {
                    rest = rest.suffix(ext.len());
                    Walk::Next(i + 1)
                } else {
                    // the child was appended for flattening only
                    Walk::Done {
                        found: None,
                        last: i + 1,
                    }
                }
            }
            Node::Branch { children, value } => {
                if rest.is_empty() {
                    Walk::Done {
                        found: value.clone(),
                        last: i,
                    }
                } else {
                    match &children[rest.at(0) as usize] {
                        None => Walk::Done {
                            found: None,
                            last: i,
                        },
                        Some(c) => {
                            if flat(scheme, &nodes, i + 1, &NibblePath::new())? != *c.hash()? {
                                return None;
                            }
                            rest = rest.suffix(1);
                            Walk::Next(i + 1)
                        }
                    }
                }
            }
        };

        match walk {
            Walk::Next(n) => i = n,
            // nothing may follow the terminal node
            Walk::Done { found, last } => return (last + 1 == nodes.len()).then_some(found),
        }
    }
}

enum Walk {
    Next(usize),
    Done { found: Option<Vec<u8>>, last: usize },
}

/// Commitment of node `i` reached through `prefix`, following extensions
/// into the next node of the chain.
fn flat(
    scheme: &dyn CommitmentScheme,
    nodes: &[Node],
    i: usize,
    prefix: &NibblePath,
) -> Option<Commitment> {
    match nodes.get(i)? {
        Node::Extension { path, child } => {
            let prefix = prefix.concat(path);
            match nodes.get(i + 1) {
                Some(_) => flat(scheme, nodes, i + 1, &prefix),
                None => Some(scheme.commit_extension(&prefix, child.hash()?)),
            }
        }
        node => Shape::of(scheme, node).ok()?.map(|s| s.commit(scheme, prefix)),
    }
}

fn verify_steps(
    compact: &Compact,
    root: &Commitment,
    path: &NibblePath,
    value: Option<&[u8]>,
    including: bool,
    steps: &[ProofStep],
) -> bool {
    // walk down: which slot each branch step takes
    let mut pos = 0;
    let mut slots = vec![];
    let mut terminal = None;

    for (n, step) in steps.iter().enumerate() {
        match step {
            ProofStep::Branch { skip, neighbors } => {
                let end = pos + skip.len();
                if end >= path.len() || path.slice(pos, end) != *skip {
                    return false;
                }
                slots.push((skip, path.at(end), neighbors));
                pos = end + 1;
            }
            other => {
                if n + 1 != steps.len() {
                    return false;
                }
                terminal = Some(other);
            }
        }
    }
    let rest = path.suffix(pos);

    let mut acc = match terminal {
        None => {
            if including {
                let Some(v) = value else { return false };
                compact.commit_leaf(&rest, &compact.algo().digest(v))
            } else {
                compact.null_hash()
            }
        }
        Some(ProofStep::Leaf { suffix, value_hash }) => {
            if including || *suffix == rest {
                return false;
            }
            compact.commit_leaf(suffix, value_hash)
        }
        Some(ProofStep::Fork {
            prefix,
            children_root,
        }) => {
            if including || prefix.is_empty() || rest.starts_with(prefix) {
                return false;
            }
            compact.branch_from_root(prefix, children_root)
        }
        Some(ProofStep::Value {
            skip,
            children_root,
            value_hash,
        }) => {
            if *skip != rest {
                return false;
            }
            let matches = match (including, value_hash, value) {
                (true, Some(h), Some(v)) => *h == compact.algo().digest(v),
                (false, None, _) => true,
                _ => false,
            };
            if !matches {
                return false;
            }
            compact.branch_from_root(skip, children_root)
        }
        Some(ProofStep::Branch { .. }) => return false,
    };

    for (skip, idx, neighbors) in slots.into_iter().rev() {
        acc = compact.branch_from_root(skip, &compact.root_from_neighbors(idx, &acc, neighbors));
    }
    acc == *root
}
