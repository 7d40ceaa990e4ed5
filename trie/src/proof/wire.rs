use super::{Proof, ProofStep};
use crate::commitment::Commitment;
use crate::error::{Result, TrieError};
use crate::node::{
    decode_bytes, decode_hash, decode_path, decode_varint, encode_bytes, encode_path, encode_varint,
};

const FORMAT_NODES: u8 = 0x01;
const FORMAT_STEPS: u8 = 0x02;

const STEP_BRANCH: u8 = 0x01;
const STEP_LEAF: u8 = 0x02;
const STEP_FORK: u8 = 0x03;
const STEP_VALUE: u8 = 0x04;

impl Proof {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        match self {
            Proof::Nodes(nodes) => {
                buf.push(FORMAT_NODES);
                encode_varint(&mut buf, nodes.len());
                for n in nodes {
                    encode_bytes(&mut buf, n);
                }
            }
            Proof::Steps(steps) => {
                buf.push(FORMAT_STEPS);
                encode_varint(&mut buf, steps.len());
                for s in steps {
                    encode_step(&mut buf, s);
                }
            }
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let format = *data
            .first()
            .ok_or_else(|| TrieError::Codec("empty proof".into()))?;
        let mut cursor = 1;
        let n = decode_varint(data, &mut cursor)?;
        // every entry takes at least one byte
        if n > data.len() {
            return Err(TrieError::Codec(format!("proof claims {} entries", n)));
        }

        let proof = match format {
            FORMAT_NODES => Proof::Nodes(
                (0..n)
                    .map(|_| decode_bytes(data, &mut cursor))
                    .collect::<Result<_>>()?,
            ),
            FORMAT_STEPS => Proof::Steps(
                (0..n)
                    .map(|_| decode_step(data, &mut cursor))
                    .collect::<Result<_>>()?,
            ),
            f => return Err(TrieError::Codec(format!("unknown proof format: {}", f))),
        };

        if cursor != data.len() {
            return Err(TrieError::Codec("trailing bytes after proof".into()));
        }
        Ok(proof)
    }
}

fn encode_step(buf: &mut Vec<u8>, step: &ProofStep) {
    match step {
        ProofStep::Branch { skip, neighbors } => {
            buf.push(STEP_BRANCH);
            encode_path(buf, skip, false);
            for n in neighbors {
                buf.extend_from_slice(n.as_bytes());
            }
        }
        ProofStep::Leaf { suffix, value_hash } => {
            buf.push(STEP_LEAF);
            encode_path(buf, suffix, true);
            buf.extend_from_slice(value_hash.as_bytes());
        }
        ProofStep::Fork {
            prefix,
            children_root,
        } => {
            buf.push(STEP_FORK);
            encode_path(buf, prefix, false);
            buf.extend_from_slice(children_root.as_bytes());
        }
        ProofStep::Value {
            skip,
            children_root,
            value_hash,
        } => {
            buf.push(STEP_VALUE);
            encode_path(buf, skip, false);
            buf.extend_from_slice(children_root.as_bytes());
            match value_hash {
                Some(h) => {
                    buf.push(1);
                    buf.extend_from_slice(h.as_bytes());
                }
                None => buf.push(0),
            }
        }
    }
}

fn decode_step(data: &[u8], cursor: &mut usize) -> Result<ProofStep> {
    let tag = *data
        .get(*cursor)
        .ok_or_else(|| TrieError::Codec("truncated proof step".into()))?;
    *cursor += 1;

    let step = match tag {
        STEP_BRANCH => {
            let skip = decode_path(data, cursor, false)?;
            let mut neighbors = [Commitment::NULL; 4];
            for n in neighbors.iter_mut() {
                *n = decode_hash(data, cursor)?;
            }
            ProofStep::Branch { skip, neighbors }
        }
        STEP_LEAF => ProofStep::Leaf {
            suffix: decode_path(data, cursor, true)?,
            value_hash: decode_hash(data, cursor)?,
        },
        STEP_FORK => ProofStep::Fork {
            prefix: decode_path(data, cursor, false)?,
            children_root: decode_hash(data, cursor)?,
        },
        STEP_VALUE => {
            let skip = decode_path(data, cursor, false)?;
            let children_root = decode_hash(data, cursor)?;
            let flag = *data
                .get(*cursor)
                .ok_or_else(|| TrieError::Codec("truncated proof step".into()))?;
            *cursor += 1;
            let value_hash = match flag {
                0 => None,
                1 => Some(decode_hash(data, cursor)?),
                f => return Err(TrieError::Codec(format!("invalid value flag: {}", f))),
            };
            ProofStep::Value {
                skip,
                children_root,
                value_hash,
            }
        }
        t => return Err(TrieError::Codec(format!("unknown proof step: {}", t))),
    };
    Ok(step)
}
