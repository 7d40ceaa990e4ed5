use crate::error::{Result, TrieError};
use std::fmt;

const HP_LEAF: u8 = 0x2;
const HP_ODD: u8 = 0x1;

/// Ordered sequence of 4-bit values.
///
/// The derived `Ord` is lexicographic with a proper prefix sorting first,
/// which is also the order of `encode_ordered`.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NibblePath {
    // one nibble per byte (0x00..0x0F)
    data: Vec<u8>,
}

impl NibblePath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two nibbles per byte, high nibble first.
    pub fn from_bytes(key: &[u8]) -> Self {
        let mut data = Vec::with_capacity(key.len() * 2);
        for &b in key {
            data.push(b >> 4);
            data.push(b & 0x0F);
        }
        Self { data }
    }

    pub fn from_nibbles(nibbles: &[u8]) -> Result<Self> {
        if let Some(n) = nibbles.iter().find(|n| **n > 0x0F) {
            return Err(TrieError::Codec(format!("invalid nibble: {:#x}", n)));
        }
        Ok(Self {
            data: nibbles.to_vec(),
        })
    }

    #[inline(always)]
    #[allow(dead_code)]
    pub(crate) fn from_nibbles_unchecked(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Panics if `index` is out of range.
    #[inline(always)]
    pub fn at(&self, index: usize) -> u8 {
        self.data[index]
    }

    pub fn common_prefix(&self, other: &NibblePath) -> usize {
        self.data
            .iter()
            .zip(other.data.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    pub fn starts_with(&self, other: &NibblePath) -> bool {
        self.data.starts_with(&other.data)
    }

    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let (a, b) = self.data.split_at(idx);
        (Self { data: a.to_vec() }, Self { data: b.to_vec() })
    }

    /// Nibbles in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            data: self.data[start..end].to_vec(),
        }
    }

    /// Nibbles from `start` to the end.
    pub fn suffix(&self, start: usize) -> Self {
        Self {
            data: self.data[start..].to_vec(),
        }
    }

    pub fn concat(&self, other: &NibblePath) -> Self {
        let mut data = Vec::with_capacity(self.len() + other.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Self { data }
    }

    /// A copy of `self` with `nibble` appended.
    pub fn child(&self, nibble: u8) -> Self {
        debug_assert!(nibble < 16);
        let mut data = Vec::with_capacity(self.len() + 1);
        data.extend_from_slice(&self.data);
        data.push(nibble);
        Self { data }
    }

    pub fn push(&mut self, nibble: u8) {
        debug_assert!(nibble < 16);
        self.data.push(nibble);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Back to bytes, `None` for an odd number of nibbles.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if self.data.len() % 2 != 0 {
            return None;
        }
        Some(
            self.data
                .chunks(2)
                .map(|pair| (pair[0] << 4) | pair[1])
                .collect(),
        )
    }

    /// Hex-prefix encoding: the first nibble carries the leaf flag and the
    /// parity of the length.
    pub fn pack_hp(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.data.len() % 2 == 1;
        let mut flag = if is_leaf { HP_LEAF } else { 0 };
        let mut out = Vec::with_capacity(1 + self.data.len() / 2);

        let rest = if odd {
            flag |= HP_ODD;
            out.push((flag << 4) | self.data[0]);
            &self.data[1..]
        } else {
            out.push(flag << 4);
            &self.data[..]
        };

        for pair in rest.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
        out
    }

    pub fn unpack_hp(bytes: &[u8]) -> Result<(bool, Self)> {
        let first = *bytes
            .first()
            .ok_or_else(|| TrieError::Codec("empty hex-prefix path".into()))?;

        let flag = first >> 4;
        if flag > (HP_LEAF | HP_ODD) {
            return Err(TrieError::Codec(format!("invalid hex-prefix flag: {}", flag)));
        }
        let odd = flag & HP_ODD != 0;
        if !odd && first & 0x0F != 0 {
            return Err(TrieError::Codec("non-zero padding in hex-prefix path".into()));
        }

        let mut data = Vec::with_capacity(bytes.len() * 2);
        if odd {
            data.push(first & 0x0F);
        }
        for &b in &bytes[1..] {
            data.push(b >> 4);
            data.push(b & 0x0F);
        }

        Ok((flag & HP_LEAF != 0, Self { data }))
    }

    /// Order-preserving, self-delimiting form used inside store keys:
    /// one byte per nibble (`nibble + 1`) and a `0x00` terminator.
    pub fn encode_ordered(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 1);
        out.extend(self.data.iter().map(|n| n + 1));
        out.push(0);
        out
    }

    /// Returns the path and the number of bytes consumed.
    pub fn decode_ordered(bytes: &[u8]) -> Result<(Self, usize)> {
        let end = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| TrieError::Codec("unterminated path".into()))?;

        let data = bytes[..end]
            .iter()
            .map(|b| {
                if *b > 0x10 {
                    Err(TrieError::Codec(format!("invalid path byte: {:#x}", b)))
                } else {
                    Ok(b - 1)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((Self { data }, end + 1))
    }
}

impl fmt::Debug for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NibblePath({})", self)
    }
}

impl fmt::Display for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in &self.data {
            write!(f, "{:x}", n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn path(n: &[u8]) -> NibblePath {
        NibblePath::from_nibbles(n).unwrap()
    }

    #[test]
    fn bytes_and_back() {
        let p = NibblePath::from_bytes(&[0xab, 0x01]);
        assert_eq!(p.as_slice(), &[0xa, 0xb, 0x0, 0x1]);
        assert_eq!(p.to_bytes().unwrap(), vec![0xab, 0x01]);
        assert!(path(&[1, 2, 3]).to_bytes().is_none());
        assert!(NibblePath::from_nibbles(&[1, 16]).is_err());
    }

    #[test]
    fn prefix_ops() {
        let a = path(&[1, 2, 3, 4]);
        let b = path(&[1, 2, 5]);
        assert_eq!(a.common_prefix(&b), 2);
        assert!(a.starts_with(&path(&[1, 2])));
        assert!(!b.starts_with(&a));
        assert_eq!(a.suffix(2), path(&[3, 4]));
        assert_eq!(a.slice(1, 3), path(&[2, 3]));
        assert_eq!(path(&[1]).concat(&path(&[2])).child(3), path(&[1, 2, 3]));

        let (l, r) = a.split_at(1);
        assert_eq!((l, r), (path(&[1]), path(&[2, 3, 4])));
    }

    #[test]
    fn hp_known_vectors() {
        assert_eq!(path(&[1, 2, 3, 4, 5]).pack_hp(false), vec![0x11, 0x23, 0x45]);
        assert_eq!(path(&[0, 1, 2, 3, 4, 5]).pack_hp(false), vec![0x00, 0x01, 0x23, 0x45]);
        assert_eq!(path(&[0xf, 1, 0xc, 0xb, 8]).pack_hp(true), vec![0x3f, 0x1c, 0xb8]);
        assert_eq!(path(&[]).pack_hp(true), vec![0x20]);
        assert_eq!(path(&[]).pack_hp(false), vec![0x00]);
    }

    #[test]
    fn hp_rejects_bad_flags() {
        assert!(NibblePath::unpack_hp(&[]).is_err());
        assert!(NibblePath::unpack_hp(&[0x40]).is_err());
        assert!(NibblePath::unpack_hp(&[0x05, 0x12]).is_err());
        assert!(NibblePath::unpack_hp(&[0x25]).is_err());
    }

    #[test]
    fn ordered_encoding_layout() {
        assert_eq!(path(&[0, 0xf]).encode_ordered(), vec![1, 0x10, 0]);
        assert_eq!(
            NibblePath::decode_ordered(&[1, 0x10, 0, 0xff]).unwrap(),
            (path(&[0, 0xf]), 3)
        );
        assert!(NibblePath::decode_ordered(&[1, 2]).is_err());
        assert!(NibblePath::decode_ordered(&[0x11, 0]).is_err());
    }

    proptest! {
        #[test]
        fn hp_round_trip(nibbles in prop::collection::vec(0u8..16, 0..40), leaf in any::<bool>()) {
            let p = path(&nibbles);
            let (is_leaf, back) = NibblePath::unpack_hp(&p.pack_hp(leaf)).unwrap();
            prop_assert_eq!(is_leaf, leaf);
            prop_assert_eq!(back, p);
        }

        #[test]
        fn ordered_encoding_keeps_order(
            a in prop::collection::vec(0u8..16, 0..12),
            b in prop::collection::vec(0u8..16, 0..12),
            va in any::<u64>(),
            vb in any::<u64>(),
        ) {
            let (pa, pb) = (path(&a), path(&b));
            let mut ka = pa.encode_ordered();
            ka.extend_from_slice(&va.to_be_bytes());
            let mut kb = pb.encode_ordered();
            kb.extend_from_slice(&vb.to_be_bytes());
            prop_assert_eq!(ka.cmp(&kb), (pa, va).cmp(&(pb, vb)));
        }
    }
}
