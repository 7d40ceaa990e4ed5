use super::*;
use crate::commitment::{SchemeKind, Shape};
use crate::node::{empty_children, NodeHandle};
use crate::trie::TrieMut;
use rand::{Rng, SeedableRng};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
};

#[derive(Default)]
struct MemSource {
    nodes: RefCell<HashMap<Commitment, Node>>,
}

impl NodeSource for MemSource {
    fn load(&self, _path: &NibblePath, commitment: &Commitment) -> Result<Node> {
        self.nodes
            .borrow()
            .get(commitment)
            .cloned()
            .ok_or_else(|| TrieError::MissingNode(commitment.to_string()))
    }
}

fn raw(key: &[u8]) -> NibblePath {
    NibblePath::from_bytes(key)
}

fn build(src: &MemSource, scheme: &dyn CommitmentScheme, kvs: &[(&[u8], &[u8])]) -> Commitment {
    let mut t = TrieMut::new(src, scheme, Commitment::NULL);
    for (k, v) in kvs {
        t.insert(raw(k), v.to_vec()).unwrap();
    }
    let sealed = t.seal().unwrap();
    for n in sealed.nodes {
        src.nodes.borrow_mut().insert(n.commitment, n.node);
    }
    sealed.root
}

fn holds(
    src: &MemSource,
    scheme: &dyn CommitmentScheme,
    root: &Commitment,
    key: &[u8],
    value: Option<&[u8]>,
) -> bool {
    let proof = prove(src, scheme, root, &raw(key)).unwrap();
    match value {
        Some(v) => verify(scheme, root, &raw(key), Some(v), true, &proof),
        None => verify(scheme, root, &raw(key), None, false, &proof),
    }
}

const WORDS: [(&[u8], &[u8]); 4] = [
    (b"do", b"verb"),
    (b"dog", b"puppy"),
    (b"doge", b"coin"),
    (b"horse", b"stallion"),
];

#[test]
fn classic_inclusion_and_absence() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let root = build(&src, scheme.as_ref(), &WORDS);

    for (k, v) in WORDS {
        assert!(holds(&src, scheme.as_ref(), &root, k, Some(v)));
        assert!(!holds(&src, scheme.as_ref(), &root, k, Some(b"other")));
        assert!(!holds(&src, scheme.as_ref(), &root, k, None));
    }

    // empty slot, key ending on a value-less branch, diverging leaf
    for k in [b"cat".as_ref(), b"d", b"dogs", b"hors", b"horsa"] {
        assert!(holds(&src, scheme.as_ref(), &root, k, None), "{:?}", k);
        assert!(!holds(&src, scheme.as_ref(), &root, k, Some(b"verb")));
    }
}

#[test]
fn classic_extension_divergence_carries_the_child() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let root = build(&src, scheme.as_ref(), &[(b"abcd", b"1"), (b"abce", b"2")]);

    let Proof::Nodes(nodes) = prove(&src, scheme.as_ref(), &root, &raw(b"ax")).unwrap() else {
        panic!("classic proofs are node lists");
    };
    assert_eq!(nodes.len(), 2);
    assert!(matches!(
        NodeCodec::decode(&nodes[0]).unwrap(),
        Node::Extension { .. }
    ));
    assert!(holds(&src, scheme.as_ref(), &root, b"ax", None));
    assert!(holds(&src, scheme.as_ref(), &root, b"abcd", Some(b"1")));
}

// Root branch holding a value whose hash ends in a zero byte. Without a
// length on the path, its preimage equals that of an extension over 64 zero
// nibbles followed by a branch whose last slot is `0x01 ++ vh[..31]`.
#[test]
fn branch_preimage_does_not_reparse_as_extension() {
    let scheme = SchemeKind::Classic.build(None);
    let s = scheme.as_ref();

    let value = (0u32..)
        .map(|i| i.to_be_bytes().to_vec())
        .find(|v| s.digest(v).as_bytes()[31] == 0)
        .unwrap();
    let vh = s.digest(&value);

    let src = MemSource::default();
    let kvs: [(&[u8], &[u8]); 3] = [
        (b"", value.as_slice()),
        (&[0x10], b"one"),
        (&[0x20], b"two"),
    ];
    let root = build(&src, s, &kvs);

    let tail = NibblePath::from_nibbles(&[0]).unwrap();
    let one = Node::leaf(tail.clone(), b"one".to_vec());
    let h1 = s.commit_leaf(&tail, &s.digest(b"one"));
    let h2 = s.commit_leaf(&tail, &s.digest(b"two"));
    let mut children = [None; 16];
    children[1] = Some(h1);
    children[2] = Some(h2);
    assert_eq!(root, s.commit_branch(&NibblePath::new(), &children, Some(&vh)));

    let mut last = [0u8; 32];
    last[0] = 1;
    last[1..].copy_from_slice(&vh.as_bytes()[..31]);
    let mut fake = empty_children();
    fake[0] = Some(NodeHandle::Hash(h1));
    fake[1] = Some(NodeHandle::Hash(h2));
    fake[15] = Some(NodeHandle::Hash(Commitment(last)));
    let fake = Node::branch(fake, None);
    let fake_shape = Shape::of(s, &fake).unwrap().unwrap();
    let zeros = NibblePath::from_nibbles(&[0; 64]).unwrap();
    assert_ne!(fake_shape.commit(s, &zeros), root);

    let ext = Node::extension(zeros, NodeHandle::Hash(fake_shape.commit(s, &NibblePath::new())));
    let forged = Proof::Nodes(
        [ext, fake, one]
            .iter()
            .map(|n| NodeCodec::encode(n).unwrap())
            .collect(),
    );
    let key = [0u8; 33];
    assert!(!verify(s, &root, &raw(&key), Some(b"one"), true, &forged));

    assert!(holds(&src, s, &root, &key, None));
    assert!(holds(&src, s, &root, b"", Some(value.as_slice())));
    assert!(holds(&src, s, &root, &[0x10], Some(b"one")));
}

#[test]
fn compact_inclusion_and_absence() {
    let scheme = SchemeKind::Compact.build(None);
    let src = MemSource::default();
    let kvs: [(&[u8], &[u8]); 4] = [
        (b"abcd", b"1"),
        (b"abce", b"2"),
        (b"abff", b"3"),
        (b"zzzz", b"4"),
    ];
    let root = build(&src, scheme.as_ref(), &kvs);

    for (k, v) in kvs {
        assert!(holds(&src, scheme.as_ref(), &root, k, Some(v)));
        assert!(!holds(&src, scheme.as_ref(), &root, k, Some(b"5")));
        assert!(!holds(&src, scheme.as_ref(), &root, k, None));
    }
    // empty slot, different leaf, fork inside an extension
    for k in [b"0000".as_ref(), b"zzzy", b"abxx", b"abcf"] {
        assert!(holds(&src, scheme.as_ref(), &root, k, None), "{:?}", k);
        assert!(!holds(&src, scheme.as_ref(), &root, k, Some(b"1")));
    }

    let Proof::Steps(steps) = prove(&src, scheme.as_ref(), &root, &raw(b"abxx")).unwrap() else {
        panic!("compact proofs are step lists");
    };
    assert!(matches!(steps.last(), Some(ProofStep::Fork { .. })));
}

#[test]
fn compact_branch_value_is_a_side_channel() {
    let scheme = SchemeKind::Compact.build(None);
    let src = MemSource::default();
    let root = build(&src, scheme.as_ref(), &[(b"ab", b"1"), (b"abcd", b"2"), (b"abce", b"3")]);

    assert!(holds(&src, scheme.as_ref(), &root, b"ab", Some(b"1")));
    assert!(!holds(&src, scheme.as_ref(), &root, b"ab", Some(b"2")));
    assert!(!holds(&src, scheme.as_ref(), &root, b"ab", None));

    let Proof::Steps(steps) = prove(&src, scheme.as_ref(), &root, &raw(b"ab")).unwrap() else {
        panic!("compact proofs are step lists");
    };
    assert!(matches!(
        steps.last(),
        Some(ProofStep::Value { value_hash: Some(_), .. })
    ));
}

#[test]
fn empty_trie() {
    for kind in [SchemeKind::Classic, SchemeKind::Compact] {
        let scheme = kind.build(None);
        let src = MemSource::default();
        let proof = prove(&src, scheme.as_ref(), &Commitment::NULL, &raw(b"k")).unwrap();
        assert!(proof.is_empty());
        assert!(verify(scheme.as_ref(), &Commitment::NULL, &raw(b"k"), None, false, &proof));
        assert!(!verify(scheme.as_ref(), &Commitment::NULL, &raw(b"k"), Some(b"v"), true, &proof));
    }
}

#[test]
fn wrong_root_or_scheme() {
    let classic = SchemeKind::Classic.build(None);
    let compact = SchemeKind::Compact.build(None);
    let src = MemSource::default();
    let root = build(&src, classic.as_ref(), &WORDS);
    let other = build(&src, classic.as_ref(), &WORDS[..3]);

    let proof = prove(&src, classic.as_ref(), &root, &raw(b"dog")).unwrap();
    assert!(verify(classic.as_ref(), &root, &raw(b"dog"), Some(b"puppy"), true, &proof));
    assert!(!verify(classic.as_ref(), &other, &raw(b"dog"), Some(b"puppy"), true, &proof));
    assert!(!verify(compact.as_ref(), &root, &raw(b"dog"), Some(b"puppy"), true, &proof));
    // including without a value
    assert!(!verify(classic.as_ref(), &root, &raw(b"dog"), None, true, &proof));
    // a proof for one key says nothing about another
    assert!(!verify(classic.as_ref(), &root, &raw(b"doge"), Some(b"puppy"), true, &proof));
}

#[test]
fn wire_format() {
    for kind in [SchemeKind::Classic, SchemeKind::Compact] {
        let scheme = kind.build(None);
        let src = MemSource::default();
        let kvs: [(&[u8], &[u8]); 3] = [(b"abcd", b"1"), (b"abce", b"2"), (b"zzzz", b"3")];
        let root = build(&src, scheme.as_ref(), &kvs);

        for k in [b"abcd".as_ref(), b"abxx", b"zzzy", b"0000"] {
            let proof = prove(&src, scheme.as_ref(), &root, &raw(k)).unwrap();
            let bytes = proof.to_bytes();
            assert_eq!(Proof::from_bytes(&bytes).unwrap(), proof);

            let mut trailing = bytes.clone();
            trailing.push(0);
            assert!(Proof::from_bytes(&trailing).is_err());
            assert!(Proof::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        }
    }
    assert!(Proof::from_bytes(&[]).is_err());
    assert!(Proof::from_bytes(&[0x09, 0x00]).is_err());
    assert!(Proof::from_bytes(&[0x01, 0xff, 0xff, 0x03]).is_err());
}

fn tamper_check(scheme: &dyn CommitmentScheme, src: &MemSource, root: &Commitment, key: &[u8], value: Option<&[u8]>) {
    let proof = prove(src, scheme, root, &raw(key)).unwrap();
    let bytes = proof.to_bytes();
    assert!(verify(scheme, root, &raw(key), value, value.is_some(), &proof));

    for i in 0..bytes.len() {
        for mask in [0x01u8, 0x80] {
            let mut bad = bytes.clone();
            bad[i] ^= mask;
            if let Ok(p) = Proof::from_bytes(&bad) {
                assert!(
                    !verify(scheme, root, &raw(key), value, value.is_some(), &p),
                    "byte {} mask {:#x} of the proof for {:?}",
                    i,
                    mask,
                    key
                );
            }
        }
    }
}

#[test]
fn single_byte_tamper() {
    let classic = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let root = build(&src, classic.as_ref(), &WORDS);
    for (k, v) in WORDS {
        tamper_check(classic.as_ref(), &src, &root, k, Some(v));
    }
    for k in [b"cat".as_ref(), b"dogs", b"horsa"] {
        tamper_check(classic.as_ref(), &src, &root, k, None);
    }

    // fixed-length keys, nothing travels outside the commitment
    let compact = SchemeKind::Compact.build(None);
    let src = MemSource::default();
    let kvs: [(&[u8], &[u8]); 3] = [(b"abcd", b"1"), (b"abce", b"2"), (b"zzzz", b"3")];
    let root = build(&src, compact.as_ref(), &kvs);
    for (k, v) in kvs {
        tamper_check(compact.as_ref(), &src, &root, k, Some(v));
    }
    for k in [b"abxx".as_ref(), b"zzzy", b"0000"] {
        tamper_check(compact.as_ref(), &src, &root, k, None);
    }
}

// verify(including) holds iff the key maps to the value; verify(absent)
// holds iff the key is missing.
#[test]
fn soundness_under_random_workloads() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for kind in [SchemeKind::Classic, SchemeKind::Compact] {
        let scheme = kind.build(None);
        for _ in 0..10 {
            let src = MemSource::default();
            let mut model = BTreeMap::new();
            let mut t = TrieMut::new(&src, scheme.as_ref(), Commitment::NULL);
            for _ in 0..rng.gen_range(1..40) {
                let key = (0..3).map(|_| rng.gen_range(0..3u8) * 0x21).collect::<Vec<u8>>();
                let value = vec![rng.gen::<u8>()];
                t.insert(raw(&key), value.clone()).unwrap();
                model.insert(key, value);
            }
            let sealed = t.seal().unwrap();
            for n in sealed.nodes {
                src.nodes.borrow_mut().insert(n.commitment, n.node);
            }
            let root = sealed.root;

            for _ in 0..30 {
                let key = (0..3).map(|_| rng.gen_range(0..3u8) * 0x21).collect::<Vec<u8>>();
                let guess = vec![rng.gen::<u8>()];
                let proof = prove(&src, scheme.as_ref(), &root, &raw(&key)).unwrap();
                let actual = model.get(&key);

                assert_eq!(
                    verify(scheme.as_ref(), &root, &raw(&key), None, false, &proof),
                    actual.is_none()
                );
                if let Some(v) = actual {
                    assert!(verify(scheme.as_ref(), &root, &raw(&key), Some(v.as_slice()), true, &proof));
                }
                assert_eq!(
                    verify(scheme.as_ref(), &root, &raw(&key), Some(guess.as_slice()), true, &proof),
                    actual == Some(&guess)
                );
            }
        }
    }
}
