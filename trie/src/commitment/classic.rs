use super::{framed_path, Commitment, CommitmentScheme, HashAlgo, SchemeKind, TAG_BRANCH};
use crate::nibbles::NibblePath;

/// Ethereum-style: a branch commits to all 16 slots and to its own value.
#[derive(Clone, Copy, Debug)]
pub struct Classic {
    algo: HashAlgo,
}

impl Classic {
    pub fn new(algo: HashAlgo) -> Self {
        Self { algo }
    }
}

impl Default for Classic {
    fn default() -> Self {
        Self::new(HashAlgo::Keccak256)
    }
}

impl CommitmentScheme for Classic {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Classic
    }

    fn algo(&self) -> HashAlgo {
        self.algo
    }

    fn encodes_branch_value(&self) -> bool {
        true
    }

    fn commit_branch(
        &self,
        prefix: &NibblePath,
        children: &[Option<Commitment>; 16],
        value_hash: Option<&Commitment>,
    ) -> Commitment {
        let path = framed_path(prefix, false);
        let mut buf = Vec::with_capacity(1 + path.len() + 17 * 32 + 1);
        buf.push(TAG_BRANCH);
        buf.extend_from_slice(&path);
        for c in children {
            buf.extend_from_slice(c.unwrap_or(Commitment::NULL).as_bytes());
        }
        match value_hash {
            Some(vh) => {
                buf.push(1);
                buf.extend_from_slice(vh.as_bytes());
            }
            None => buf.push(0),
        }
        self.algo.digest(&buf)
    }
}
