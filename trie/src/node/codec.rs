use super::{empty_children, Node, NodeHandle};
use crate::commitment::{Commitment, HASH_LEN};
use crate::error::{Result, TrieError};
use crate::nibbles::NibblePath;

const TAG_LEAF: u8 = 0x01;
const TAG_EXTENSION: u8 = 0x02;
const TAG_BRANCH: u8 = 0x03;

/// Canonical binary form of a node.
///
/// ```text
/// leaf      = 0x01 | varint(len) HP(path, leaf) | varint(len) value
/// extension = 0x02 | varint(len) HP(path, ext)  | child hash
/// branch    = 0x03 | u16 LE bitmap | 0x00 / 0x01 varint(len) value | child hashes
/// ```
pub struct NodeCodec;

impl NodeCodec {
    /// Fails if a child has not been sealed yet.
    pub fn encode(node: &Node) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match node {
            Node::Leaf { path, value } => {
                buf.push(TAG_LEAF);
                encode_path(&mut buf, path, true);
                encode_bytes(&mut buf, value);
            }
            Node::Extension { path, child } => {
                buf.push(TAG_EXTENSION);
                encode_path(&mut buf, path, false);
                buf.extend_from_slice(sealed(child)?.as_bytes());
            }
            Node::Branch { children, value } => {
                buf.push(TAG_BRANCH);

                let mut bitmap: u16 = 0;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                buf.extend_from_slice(&bitmap.to_le_bytes());

                if let Some(v) = value {
                    buf.push(1);
                    encode_bytes(&mut buf, v);
                } else {
                    buf.push(0);
                }

                for child in children.iter().flatten() {
                    buf.extend_from_slice(sealed(child)?.as_bytes());
                }
            }
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Node> {
        let tag = *data
            .first()
            .ok_or_else(|| TrieError::Codec("empty node".into()))?;
        let mut cursor = 1;

        let node = match tag {
            TAG_LEAF => {
                let path = decode_path(data, &mut cursor, true)?;
                let value = decode_bytes(data, &mut cursor)?;
                Node::Leaf { path, value }
            }
            TAG_EXTENSION => {
                let path = decode_path(data, &mut cursor, false)?;
                if path.is_empty() {
                    return Err(TrieError::Codec("extension with an empty path".into()));
                }
                let child = decode_hash(data, &mut cursor)?;
                Node::Extension {
                    path,
                    child: NodeHandle::Hash(child),
                }
            }
            TAG_BRANCH => {
                let raw = take(data, &mut cursor, 2)?;
                let bitmap = u16::from_le_bytes([raw[0], raw[1]]);

                let value = match take(data, &mut cursor, 1)?[0] {
                    0 => None,
                    1 => Some(decode_bytes(data, &mut cursor)?),
                    f => {
                        return Err(TrieError::Codec(format!("invalid branch value flag: {}", f)));
                    }
                };

                let n = bitmap.count_ones();
                if n == 0 || (n == 1 && value.is_none()) {
                    return Err(TrieError::Codec(format!(
                        "uncollapsed branch: {} children, value: {}",
                        n,
                        value.is_some()
                    )));
                }

                let mut children = empty_children();
                for (i, slot) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        *slot = Some(NodeHandle::Hash(decode_hash(data, &mut cursor)?));
                    }
                }
                Node::Branch { children, value }
            }
            _ => return Err(TrieError::Codec(format!("unknown node tag: {}", tag))),
        };

        if cursor != data.len() {
            return Err(TrieError::Codec(format!(
                "{} trailing bytes after node",
                data.len() - cursor
            )));
        }
        Ok(node)
    }
}

fn sealed(child: &NodeHandle) -> Result<&Commitment> {
    child
        .hash()
        .ok_or_else(|| TrieError::Codec("child must be sealed before encoding".into()))
}

// Helpers, shared with the proof wire format

fn take<'a>(data: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(n)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| TrieError::Codec("unexpected end of input".into()))?;
    let out = &data[*cursor..end];
    *cursor = end;
    Ok(out)
}

pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut n: usize) {
    while n >= 0x80 {
        buf.push((n as u8) | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

pub(crate) fn decode_varint(data: &[u8], cursor: &mut usize) -> Result<usize> {
    let mut n: usize = 0;
    let mut shift = 0;
    loop {
        if shift > 63 {
            return Err(TrieError::Codec("varint overflow".into()));
        }
        let b = take(data, cursor, 1)?[0];
        n |= ((b & 0x7F) as usize) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(n)
}

pub(crate) fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_varint(buf, bytes.len());
    buf.extend_from_slice(bytes);
}

pub(crate) fn decode_bytes(data: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    let len = decode_varint(data, cursor)?;
    take(data, cursor, len).map(|b| b.to_vec())
}

pub(crate) fn encode_path(buf: &mut Vec<u8>, path: &NibblePath, is_leaf: bool) {
    encode_bytes(buf, &path.pack_hp(is_leaf));
}

/// Reads an HP path and checks its leaf flag.
pub(crate) fn decode_path(data: &[u8], cursor: &mut usize, is_leaf: bool) -> Result<NibblePath> {
    let hp = decode_bytes(data, cursor)?;
    let (leaf, path) = NibblePath::unpack_hp(&hp)?;
    if leaf != is_leaf {
        return Err(TrieError::Codec(format!(
            "hex-prefix flag mismatch, expected leaf: {}",
            is_leaf
        )));
    }
    Ok(path)
}

pub(crate) fn decode_hash(data: &[u8], cursor: &mut usize) -> Result<Commitment> {
    Commitment::from_slice(take(data, cursor, HASH_LEN)?)
}
