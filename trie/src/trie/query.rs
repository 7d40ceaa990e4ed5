use super::NodeSource;
use crate::commitment::Commitment;
use crate::error::Result;
use crate::nibbles::NibblePath;
use crate::node::{Children, Node, NodeHandle};

enum Step {
    Found(Option<Vec<u8>>),
    Descend(NibblePath, Commitment, NibblePath),
}

/// Value stored under `path` in the trie rooted at `root`.
pub fn lookup<S: NodeSource + ?Sized>(
    source: &S,
    root: &Commitment,
    path: &NibblePath,
) -> Result<Option<Vec<u8>>> {
    if root.is_null() {
        return Ok(None);
    }

    let mut at = NibblePath::new();
    let mut hash = *root;
    let mut rest = path.clone();

    loop {
        let node = source.load(&at, &hash)?;
        let step = match node {
            Node::Leaf { path, value } => step_leaf(path, value, &rest),
            Node::Extension { path, child } => step_extension(&path, &child, &at, &rest),
            Node::Branch { children, value } => step_branch(&children, value, &at, &rest),
        };

        match step {
            Step::Found(v) => return Ok(v),
            Step::Descend(next_at, next_hash, next_rest) => {
                at = next_at;
                hash = next_hash;
                rest = next_rest;
            }
        }
    }
}

fn step_leaf(path: NibblePath, value: Vec<u8>, rest: &NibblePath) -> Step {
    if path == *rest {
        Step::Found(Some(value))
    } else {
        Step::Found(None)
    }
}

fn step_extension(
    path: &NibblePath,
    child: &NodeHandle,
    at: &NibblePath,
    rest: &NibblePath,
) -> Step {
    match child.hash() {
        Some(c) if rest.starts_with(path) => {
            Step::Descend(at.concat(path), *c, rest.suffix(path.len()))
        }
        _ => Step::Found(None),
    }
}

fn step_branch(
    children: &Children,
    value: Option<Vec<u8>>,
    at: &NibblePath,
    rest: &NibblePath,
) -> Step {
    if rest.is_empty() {
        return Step::Found(value);
    }
    let idx = rest.at(0);
    match children[idx as usize].as_ref().and_then(|c| c.hash()) {
        Some(c) => Step::Descend(at.child(idx), *c, rest.suffix(1)),
        None => Step::Found(None),
    }
}
