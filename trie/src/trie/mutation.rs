use super::{NewNode, NodeSource};
use crate::commitment::{Commitment, CommitmentScheme, Shape};
use crate::error::Result;
use crate::nibbles::NibblePath;
use crate::node::{empty_children, Children, Node, NodeHandle};

/// A persisted node that the mutation replaced or dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retired {
    pub path: NibblePath,
    pub commitment: Commitment,
}

/// Everything a commit needs to stage.
#[derive(Clone, Debug, Default)]
pub struct Sealed {
    pub root: Commitment,
    /// Children always precede their parents.
    pub nodes: Vec<NewNode>,
    pub retired: Vec<Retired>,
}

enum Removed {
    /// Key absent, the subtree is handed back untouched.
    Unchanged(NodeHandle),
    Changed(Option<NodeHandle>),
}

/// Copy-on-write editing session over one root.
///
/// Persisted nodes are never modified: every node on a touched path is
/// loaded, rebuilt in memory and re-sealed by `seal`.
pub struct TrieMut<'a, S: NodeSource + ?Sized> {
    source: &'a S,
    scheme: &'a dyn CommitmentScheme,
    root: Option<NodeHandle>,
    retired: Vec<Retired>,
}

impl<'a, S: NodeSource + ?Sized> TrieMut<'a, S> {
    pub fn new(source: &'a S, scheme: &'a dyn CommitmentScheme, root: Commitment) -> Self {
        let root = if root == scheme.null_hash() {
            None
        } else {
            Some(NodeHandle::Hash(root))
        };
        Self {
            source,
            scheme,
            root,
            retired: vec![],
        }
    }

    pub fn insert(&mut self, path: NibblePath, value: Vec<u8>) -> Result<()> {
        let root = self.root.take();
        self.root = Some(self.insert_at(root, NibblePath::new(), path, value)?);
        Ok(())
    }

    /// `false` if the key was not present.
    pub fn remove(&mut self, path: &NibblePath) -> Result<bool> {
        let Some(root) = self.root.take() else {
            return Ok(false);
        };
        match self.remove_at(root, NibblePath::new(), path.clone())? {
            Removed::Unchanged(h) => {
                self.root = Some(h);
                Ok(false)
            }
            Removed::Changed(h) => {
                self.root = h;
                Ok(true)
            }
        }
    }

    /// Compute commitments bottom-up and collect the new nodes.
    pub fn seal(mut self) -> Result<Sealed> {
        let mut nodes = vec![];
        let root = match self.root.take() {
            Some(h) => self.seal_at(h, NibblePath::new(), &mut nodes)?.0,
            None => self.scheme.null_hash(),
        };
        Ok(Sealed {
            root,
            nodes,
            retired: self.retired,
        })
    }

    // --- Helpers ---

    /// Materialize a handle; the commitment comes back for persisted nodes.
    fn take(&self, handle: NodeHandle, at: &NibblePath) -> Result<(Node, Option<Commitment>)> {
        match handle {
            NodeHandle::InMemory(n) => Ok((*n, None)),
            NodeHandle::Hash(c) => Ok((self.source.load(at, &c)?, Some(c))),
        }
    }

    fn retire(&mut self, at: &NibblePath, origin: Option<Commitment>) {
        if let Some(commitment) = origin {
            self.retired.push(Retired {
                path: at.clone(),
                commitment,
            });
        }
    }

    fn restore(node: Node, origin: Option<Commitment>) -> NodeHandle {
        match origin {
            Some(c) => NodeHandle::Hash(c),
            None => NodeHandle::new(node),
        }
    }

    // --- Insert ---

    fn insert_at(
        &mut self,
        handle: Option<NodeHandle>,
        at: NibblePath,
        rest: NibblePath,
        value: Vec<u8>,
    ) -> Result<NodeHandle> {
        let Some(handle) = handle else {
            return Ok(NodeHandle::new(Node::leaf(rest, value)));
        };

        let (node, origin) = self.take(handle, &at)?;
        self.retire(&at, origin);

        match node {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => Ok(Self::insert_into_leaf(leaf_path, leaf_value, rest, value)),
            Node::Extension { path, child } => self.insert_into_extension(path, child, at, rest, value),
            Node::Branch { children, value: b_value } => {
                self.insert_into_branch(children, b_value, at, rest, value)
            }
        }
    }

    fn insert_into_leaf(
        leaf_path: NibblePath,
        leaf_value: Vec<u8>,
        rest: NibblePath,
        value: Vec<u8>,
    ) -> NodeHandle {
        let common = rest.common_prefix(&leaf_path);
        if common == rest.len() && common == leaf_path.len() {
            return NodeHandle::new(Node::leaf(rest, value));
        }

        let mut children = empty_children();
        let mut branch_value = None;

        if common == leaf_path.len() {
            branch_value = Some(leaf_value);
        } else {
            children[leaf_path.at(common) as usize] = Some(NodeHandle::new(Node::leaf(
                leaf_path.suffix(common + 1),
                leaf_value,
            )));
        }

        if common == rest.len() {
            branch_value = Some(value);
        } else {
            children[rest.at(common) as usize] =
                Some(NodeHandle::new(Node::leaf(rest.suffix(common + 1), value)));
        }

        Self::wrap(rest.slice(0, common), Node::branch(children, branch_value))
    }

    fn insert_into_extension(
        &mut self,
        ext_path: NibblePath,
        child: NodeHandle,
        at: NibblePath,
        rest: NibblePath,
        value: Vec<u8>,
    ) -> Result<NodeHandle> {
        let common = rest.common_prefix(&ext_path);

        if common == ext_path.len() {
            let new_child =
                self.insert_at(Some(child), at.concat(&ext_path), rest.suffix(common), value)?;
            return Ok(NodeHandle::new(Node::extension(ext_path, new_child)));
        }

        let mut children = empty_children();
        let mut branch_value = None;

        // the old child keeps its absolute path, only the edge above it changes
        children[ext_path.at(common) as usize] = Some(if common + 1 == ext_path.len() {
            child
        } else {
            NodeHandle::new(Node::extension(ext_path.suffix(common + 1), child))
        });

        if common == rest.len() {
            branch_value = Some(value);
        } else {
            children[rest.at(common) as usize] =
                Some(NodeHandle::new(Node::leaf(rest.suffix(common + 1), value)));
        }

        Ok(Self::wrap(
            ext_path.slice(0, common),
            Node::branch(children, branch_value),
        ))
    }

    fn insert_into_branch(
        &mut self,
        mut children: Box<Children>,
        b_value: Option<Vec<u8>>,
        at: NibblePath,
        rest: NibblePath,
        value: Vec<u8>,
    ) -> Result<NodeHandle> {
        if rest.is_empty() {
            return Ok(NodeHandle::new(Node::branch(children, Some(value))));
        }

        let idx = rest.at(0);
        let child = children[idx as usize].take();
        children[idx as usize] = Some(self.insert_at(child, at.child(idx), rest.suffix(1), value)?);
        Ok(NodeHandle::new(Node::branch(children, b_value)))
    }

    fn wrap(prefix: NibblePath, branch: Node) -> NodeHandle {
        if prefix.is_empty() {
            NodeHandle::new(branch)
        } else {
            NodeHandle::new(Node::extension(prefix, NodeHandle::new(branch)))
        }
    }

    // --- Remove ---

    fn remove_at(&mut self, handle: NodeHandle, at: NibblePath, rest: NibblePath) -> Result<Removed> {
        let (node, origin) = self.take(handle, &at)?;

        match node {
            Node::Leaf { path, value } => {
                if path == rest {
                    self.retire(&at, origin);
                    Ok(Removed::Changed(None))
                } else {
                    Ok(Removed::Unchanged(Self::restore(Node::leaf(path, value), origin)))
                }
            }
            Node::Extension { path, child } => self.remove_from_extension(path, child, at, rest, origin),
            Node::Branch { children, value } => {
                self.remove_from_branch(children, value, at, rest, origin)
            }
        }
    }

    fn remove_from_extension(
        &mut self,
        ext_path: NibblePath,
        child: NodeHandle,
        at: NibblePath,
        rest: NibblePath,
        origin: Option<Commitment>,
    ) -> Result<Removed> {
        if !rest.starts_with(&ext_path) {
            return Ok(Removed::Unchanged(Self::restore(
                Node::extension(ext_path, child),
                origin,
            )));
        }

        let child_at = at.concat(&ext_path);
        match self.remove_at(child, child_at.clone(), rest.suffix(ext_path.len()))? {
            Removed::Unchanged(c) => Ok(Removed::Unchanged(Self::restore(
                Node::extension(ext_path, c),
                origin,
            ))),
            Removed::Changed(None) => {
                self.retire(&at, origin);
                Ok(Removed::Changed(None))
            }
            Removed::Changed(Some(c)) => {
                self.retire(&at, origin);
                let merged = self.merge_extension(ext_path, c, &child_at)?;
                Ok(Removed::Changed(Some(merged)))
            }
        }
    }

    fn remove_from_branch(
        &mut self,
        mut children: Box<Children>,
        value: Option<Vec<u8>>,
        at: NibblePath,
        rest: NibblePath,
        origin: Option<Commitment>,
    ) -> Result<Removed> {
        if rest.is_empty() {
            if value.is_none() {
                return Ok(Removed::Unchanged(Self::restore(
                    Node::branch(children, value),
                    origin,
                )));
            }
            self.retire(&at, origin);
            return self.collapse_branch(children, None, &at).map(Removed::Changed);
        }

        let idx = rest.at(0);
        let Some(child) = children[idx as usize].take() else {
            return Ok(Removed::Unchanged(Self::restore(
                Node::branch(children, value),
                origin,
            )));
        };

        match self.remove_at(child, at.child(idx), rest.suffix(1))? {
            Removed::Unchanged(c) => {
                children[idx as usize] = Some(c);
                Ok(Removed::Unchanged(Self::restore(
                    Node::branch(children, value),
                    origin,
                )))
            }
            Removed::Changed(c) => {
                children[idx as usize] = c;
                self.retire(&at, origin);
                self.collapse_branch(children, value, &at).map(Removed::Changed)
            }
        }
    }

    /// Restore the branch invariants after a child or the value went away.
    fn collapse_branch(
        &mut self,
        mut children: Box<Children>,
        value: Option<Vec<u8>>,
        at: &NibblePath,
    ) -> Result<Option<NodeHandle>> {
        let mut occupied = children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| i);
        let first = occupied.next();
        let more = occupied.next().is_some();

        match (first, more, value) {
            (None, _, None) => Ok(None),
            (None, _, Some(v)) => Ok(Some(NodeHandle::new(Node::leaf(NibblePath::new(), v)))),
            (Some(i), false, None) => {
                let Some(only) = children[i].take() else {
                    return Ok(None);
                };
                let prefix = NibblePath::new().child(i as u8);
                self.merge_extension(prefix, only, &at.child(i as u8)).map(Some)
            }
            (_, _, value) => Ok(Some(NodeHandle::new(Node::branch(children, value)))),
        }
    }

    /// Put `prefix` in front of `child`, merging it into a leaf or an
    /// extension child so that no extension ever leads to either.
    fn merge_extension(
        &mut self,
        prefix: NibblePath,
        child: NodeHandle,
        child_at: &NibblePath,
    ) -> Result<NodeHandle> {
        let (node, origin) = self.take(child, child_at)?;
        match node {
            Node::Leaf { path, value } => {
                self.retire(child_at, origin);
                Ok(NodeHandle::new(Node::leaf(prefix.concat(&path), value)))
            }
            Node::Extension { path, child } => {
                self.retire(child_at, origin);
                Ok(NodeHandle::new(Node::extension(prefix.concat(&path), child)))
            }
            branch @ Node::Branch { .. } => Ok(NodeHandle::new(Node::extension(
                prefix,
                Self::restore(branch, origin),
            ))),
        }
    }

    // --- Seal ---

    fn seal_at(
        &self,
        handle: NodeHandle,
        at: NibblePath,
        out: &mut Vec<NewNode>,
    ) -> Result<(Commitment, Option<Shape>)> {
        let node = match handle {
            NodeHandle::Hash(c) => return Ok((c, None)),
            NodeHandle::InMemory(n) => *n,
        };

        let (node, commitment, shape) = match node {
            Node::Leaf { .. } | Node::Branch { .. } => {
                let node = self.seal_children(node, &at, out)?;
                let shape = Shape::of(self.scheme, &node)?;
                let commitment = match &shape {
                    Some(s) => s.commit(self.scheme, &NibblePath::new()),
                    None => self.scheme.null_hash(),
                };
                (node, commitment, shape)
            }
            Node::Extension { path, child } => {
                let child_at = at.concat(&path);
                let (child_c, child_shape) = self.seal_at(child, child_at.clone(), out)?;
                let child_shape = match child_shape {
                    Some(s) => Some(s),
                    None => Shape::of(self.scheme, &self.source.load(&child_at, &child_c)?)?,
                };
                let commitment = match &child_shape {
                    Some(s) => s.commit(self.scheme, &path),
                    None => self.scheme.commit_extension(&path, &child_c),
                };
                (Node::extension(path, NodeHandle::Hash(child_c)), commitment, None)
            }
        };

        out.push(NewNode {
            path: at,
            commitment,
            node,
        });
        Ok((commitment, shape))
    }

    fn seal_children(&self, node: Node, at: &NibblePath, out: &mut Vec<NewNode>) -> Result<Node> {
        match node {
            Node::Branch { children, value } => {
                let mut sealed = empty_children();
                for (i, child) in (*children).into_iter().enumerate() {
                    if let Some(c) = child {
                        let (h, _) = self.seal_at(c, at.child(i as u8), out)?;
                        sealed[i] = Some(NodeHandle::Hash(h));
                    }
                }
                Ok(Node::branch(sealed, value))
            }
            other => Ok(other),
        }
    }
}
