use super::{framed_path, Commitment, CommitmentScheme, HashAlgo, SchemeKind, TAG_BRANCH};
use crate::nibbles::NibblePath;

/// Proof-size oriented: the 16 slots of a branch are folded through a
/// binary merkle tree, so a proof step needs 4 sibling hashes instead of 15.
/// The branch value is not part of the commitment.
#[derive(Clone, Copy, Debug)]
pub struct Compact {
    algo: HashAlgo,
}

impl Compact {
    pub fn new(algo: HashAlgo) -> Self {
        Self { algo }
    }

    fn combine(&self, left: &Commitment, right: &Commitment) -> Commitment {
        if left.is_null() && right.is_null() {
            Commitment::NULL
        } else {
            self.algo.hash(&[left.as_bytes(), right.as_bytes()])
        }
    }

    fn levels(&self, children: &[Option<Commitment>; 16]) -> Vec<Vec<Commitment>> {
        let mut levels = vec![children
            .iter()
            .map(|c| c.unwrap_or(Commitment::NULL))
            .collect::<Vec<_>>()];
        while levels[levels.len() - 1].len() > 1 {
            let next = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| self.combine(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }
        levels
    }

    pub fn merkle_root(&self, children: &[Option<Commitment>; 16]) -> Commitment {
        let levels = self.levels(children);
        levels[levels.len() - 1][0]
    }

    /// Sibling hashes on the way from slot `index` to the merkle root,
    /// lowest level first.
    pub fn neighbors(&self, children: &[Option<Commitment>; 16], index: u8) -> [Commitment; 4] {
        let levels = self.levels(children);
        let mut out = [Commitment::NULL; 4];
        let mut idx = index as usize;
        for (slot, level) in out.iter_mut().zip(levels.iter()) {
            *slot = level[idx ^ 1];
            idx >>= 1;
        }
        out
    }

    pub fn root_from_neighbors(
        &self,
        index: u8,
        child: &Commitment,
        neighbors: &[Commitment; 4],
    ) -> Commitment {
        let mut acc = *child;
        let mut idx = index;
        for n in neighbors {
            acc = if idx & 1 == 0 {
                self.combine(&acc, n)
            } else {
                self.combine(n, &acc)
            };
            idx >>= 1;
        }
        acc
    }

    pub fn branch_from_root(&self, prefix: &NibblePath, children_root: &Commitment) -> Commitment {
        self.algo.hash(&[
            &[TAG_BRANCH],
            &framed_path(prefix, false),
            children_root.as_bytes(),
        ])
    }
}

impl Default for Compact {
    fn default() -> Self {
        Self::new(HashAlgo::Blake3)
    }
}

impl CommitmentScheme for Compact {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Compact
    }

    fn algo(&self) -> HashAlgo {
        self.algo
    }

    fn encodes_branch_value(&self) -> bool {
        false
    }

    fn commit_branch(
        &self,
        prefix: &NibblePath,
        children: &[Option<Commitment>; 16],
        _value_hash: Option<&Commitment>,
    ) -> Commitment {
        self.branch_from_root(prefix, &self.merkle_root(children))
    }
}
