mod codec;
pub use codec::NodeCodec;
pub(crate) use codec::{
    decode_bytes, decode_hash, decode_path, decode_varint, encode_bytes, encode_path, encode_varint,
};

use crate::commitment::Commitment;
use crate::nibbles::NibblePath;

pub type Children = [Option<NodeHandle>; 16];

#[inline(always)]
pub fn empty_children() -> Box<Children> {
    Box::default()
}

/// Reference from a parent to a child node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeHandle {
    /// Created by the current mutation, not yet sealed.
    InMemory(Box<Node>),
    /// Persisted node, identified by its commitment.
    Hash(Commitment),
}

impl NodeHandle {
    pub fn hash(&self) -> Option<&Commitment> {
        match self {
            NodeHandle::Hash(h) => Some(h),
            NodeHandle::InMemory(_) => None,
        }
    }

    #[inline(always)]
    pub(crate) fn new(node: Node) -> Self {
        NodeHandle::InMemory(Box::new(node))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Leaf {
        path: NibblePath,
        value: Vec<u8>,
    },
    Extension {
        path: NibblePath,
        child: NodeHandle,
    },
    Branch {
        children: Box<Children>,
        value: Option<Vec<u8>>,
    },
}

impl Node {
    pub fn leaf(path: NibblePath, value: Vec<u8>) -> Self {
        Node::Leaf { path, value }
    }

    pub fn extension(path: NibblePath, child: NodeHandle) -> Self {
        Node::Extension { path, child }
    }

    pub fn branch(children: Box<Children>, value: Option<Vec<u8>>) -> Self {
        Node::Branch { children, value }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Node::Branch { .. })
    }

    /// Commitments of all persisted children, in slot order.
    pub fn child_hashes(&self) -> Vec<Commitment> {
        match self {
            Node::Leaf { .. } => vec![],
            Node::Extension { child, .. } => child.hash().copied().into_iter().collect(),
            Node::Branch { children, .. } => children
                .iter()
                .flatten()
                .filter_map(|c| c.hash().copied())
                .collect(),
        }
    }
}
