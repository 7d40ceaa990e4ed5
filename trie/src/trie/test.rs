use super::*;
use crate::commitment::{SchemeKind, Shape};
use crate::node::NodeHandle;
use rand::{seq::SliceRandom, Rng, SeedableRng};
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

fn apply(
    src: &MemSource,
    scheme: &dyn CommitmentScheme,
    root: Commitment,
    ops: &[(&[u8], Option<&[u8]>)],
) -> Sealed {
    let mut t = TrieMut::new(src, scheme, root);
    for (k, v) in ops {
        match v {
            Some(v) => t.insert(raw(k), v.to_vec()).unwrap(),
            None => {
                t.remove(&raw(k)).unwrap();
            }
        }
    }
    let sealed = t.seal().unwrap();
    for n in &sealed.nodes {
        src.nodes.borrow_mut().insert(n.commitment, n.node.clone());
    }
    sealed
}

/// Walks the whole trie checking the persisted shape rules and that every
/// stored commitment matches its content.
fn check_shape(src: &MemSource, scheme: &dyn CommitmentScheme, root: &Commitment) -> usize {
    if root.is_null() {
        return 0;
    }
    let node = src.load(&NibblePath::new(), root).unwrap();
    let bytes = crate::node::NodeCodec::encode(&node).unwrap();
    assert_eq!(crate::node::NodeCodec::decode(&bytes).unwrap(), node);

    match &node {
        Node::Leaf { .. } => {
            let shape = Shape::of(scheme, &node).unwrap().unwrap();
            assert_eq!(shape.commit(scheme, &NibblePath::new()), *root);
            1
        }
        Node::Extension { path, child } => {
            assert!(!path.is_empty());
            let c = child.hash().unwrap();
            let child_node = src.load(&NibblePath::new(), c).unwrap();
            assert!(child_node.is_branch(), "extension must lead to a branch");
            let shape = Shape::of(scheme, &child_node).unwrap().unwrap();
            assert_eq!(shape.commit(scheme, path), *root);
            check_shape(src, scheme, c)
        }
        Node::Branch { children, value } => {
            let n = children.iter().flatten().count();
            assert!(n >= 2 || (n == 1 && value.is_some()));
            let shape = Shape::of(scheme, &node).unwrap().unwrap();
            assert_eq!(shape.commit(scheme, &NibblePath::new()), *root);
            value.iter().count()
                + children
                    .iter()
                    .flatten()
                    .map(|c| check_shape(src, scheme, c.hash().unwrap()))
                    .sum::<usize>()
        }
    }
}

fn build(scheme: &dyn CommitmentScheme, map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Commitment {
    let src = MemSource::default();
    let ops = map
        .iter()
        .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
        .collect::<Vec<_>>();
    apply(&src, scheme, Commitment::NULL, &ops).root
}

#[test]
fn test_simple_insert_get() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let s = apply(&src, scheme.as_ref(), Commitment::NULL, &[(b"key", Some(b"value"))]);

    assert_eq!(lookup(&src, &s.root, &raw(b"key")).unwrap(), Some(b"value".to_vec()));
    assert_eq!(lookup(&src, &s.root, &raw(b"kez")).unwrap(), None);
    assert_eq!(lookup(&src, &Commitment::NULL, &raw(b"key")).unwrap(), None);
    assert_eq!(s.nodes.len(), 1);
    assert!(s.retired.is_empty());
}

#[test]
fn test_branch_split() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let s = apply(
        &src,
        scheme.as_ref(),
        Commitment::NULL,
        &[(b"\x10", Some(b"a")), (b"\x20", Some(b"b")), (b"\x2f", Some(b"c"))],
    );

    let root = src.load(&NibblePath::new(), &s.root).unwrap();
    assert!(root.is_branch());
    assert_eq!(check_shape(&src, scheme.as_ref(), &s.root), 3);
    assert_eq!(lookup(&src, &s.root, &raw(b"\x2f")).unwrap(), Some(b"c".to_vec()));
}

#[test]
fn test_extension_split() {
    let scheme = SchemeKind::Compact.build(None);
    let src = MemSource::default();
    let s1 = apply(
        &src,
        scheme.as_ref(),
        Commitment::NULL,
        &[(b"abcd", Some(b"1")), (b"abce", Some(b"2"))],
    );
    let root = src.load(&NibblePath::new(), &s1.root).unwrap();
    assert!(matches!(root, Node::Extension { .. }));

    // diverges inside the extension path
    let s2 = apply(&src, scheme.as_ref(), s1.root, &[(b"ab", Some(b"3"))]);
    assert_eq!(check_shape(&src, scheme.as_ref(), &s2.root), 3);
    assert_eq!(s2.retired.len(), 1);
    assert_eq!(s2.retired[0].path, NibblePath::new());

    for (k, v) in [
        (b"abcd".as_ref(), b"1"),
        (b"abce".as_ref(), b"2"),
        (b"ab".as_ref(), b"3"),
    ] {
        assert_eq!(lookup(&src, &s2.root, &raw(k)).unwrap(), Some(v.to_vec()));
    }
    // the old root still answers
    assert_eq!(lookup(&src, &s1.root, &raw(b"ab")).unwrap(), None);
}

#[test]
fn test_remove_collapses() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let s1 = apply(
        &src,
        scheme.as_ref(),
        Commitment::NULL,
        &[(b"abcd", Some(b"1")), (b"abce", Some(b"2")), (b"ab", Some(b"3"))],
    );
    let s2 = apply(&src, scheme.as_ref(), s1.root, &[(b"ab", None), (b"abce", None)]);

    // a single leaf is left
    let root = src.load(&NibblePath::new(), &s2.root).unwrap();
    assert!(root.is_leaf());
    assert_eq!(s2.root, build(scheme.as_ref(), &BTreeMap::from([(b"abcd".to_vec(), b"1".to_vec())])));
}

#[test]
fn test_remove_missing_key_is_a_noop() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let s1 = apply(
        &src,
        scheme.as_ref(),
        Commitment::NULL,
        &[(b"abcd", Some(b"1")), (b"abce", Some(b"2"))],
    );

    let mut t = TrieMut::new(&src, scheme.as_ref(), s1.root);
    assert!(!t.remove(&raw(b"abcf")).unwrap());
    assert!(!t.remove(&raw(b"zz")).unwrap());
    assert!(!t.remove(&raw(b"abc")).unwrap());
    let s2 = t.seal().unwrap();
    assert_eq!(s2.root, s1.root);
    assert!(s2.nodes.is_empty());
    assert!(s2.retired.is_empty());
}

#[test]
fn test_remove_all_keys() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let keys: Vec<&[u8]> = vec![b"a", b"ab", b"abc", b"b", b"ba"];
    let ops = keys.iter().map(|k| (*k, Some(b"v".as_ref()))).collect::<Vec<_>>();
    let s1 = apply(&src, scheme.as_ref(), Commitment::NULL, &ops);
    assert_eq!(check_shape(&src, scheme.as_ref(), &s1.root), 5);

    let ops = keys.iter().map(|k| (*k, None)).collect::<Vec<_>>();
    let s2 = apply(&src, scheme.as_ref(), s1.root, &ops);
    assert!(s2.root.is_null());
    assert!(s2.nodes.is_empty());
}

#[test]
fn last_update_wins() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let mut t = TrieMut::new(&src, scheme.as_ref(), Commitment::NULL);
    let ops = apply_updates(
        &mut t,
        scheme.as_ref(),
        KeyMode::Hashed,
        vec![
            (b"k".to_vec(), Some(b"1".to_vec())),
            (b"k".to_vec(), Some(b"2".to_vec())),
            (b"gone".to_vec(), None),
        ],
    )
    .unwrap();
    assert_eq!(ops, vec![ValueOp::Put(scheme.digest(b"k"), b"2".to_vec())]);

    let root = t.seal().unwrap().root;
    let other = build(
        scheme.as_ref(),
        &BTreeMap::from([(scheme.digest(b"k").as_bytes().to_vec(), b"2".to_vec())]),
    );
    assert_eq!(root, other);
}

// Same final contents, same root, whatever the history.
#[test]
fn history_independence() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    for kind in [SchemeKind::Classic, SchemeKind::Compact] {
        let scheme = kind.build(None);
        for round in 0..20 {
            let src = MemSource::default();
            let mut model = BTreeMap::new();
            let mut root = Commitment::NULL;

            for _ in 0..8 {
                let mut ops = vec![];
                for _ in 0..rng.gen_range(1..20) {
                    let len = rng.gen_range(0..4);
                    let key: Vec<u8> = (0..len).map(|_| rng.gen_range(0..4u8) * 0x11).collect();
                    if rng.gen_bool(0.3) {
                        model.remove(&key);
                        ops.push((key, None));
                    } else {
                        let v = vec![rng.gen::<u8>()];
                        model.insert(key.clone(), v.clone());
                        ops.push((key, Some(v)));
                    }
                }
                let refs = ops
                    .iter()
                    .map(|(k, v)| (k.as_slice(), v.as_deref()))
                    .collect::<Vec<_>>();
                root = apply(&src, scheme.as_ref(), root, &refs).root;

                assert_eq!(check_shape(&src, scheme.as_ref(), &root), model.len());
                for (k, v) in &model {
                    assert_eq!(lookup(&src, &root, &raw(k)).unwrap().as_ref(), Some(v));
                }
            }

            let mut shuffled = model.iter().collect::<Vec<_>>();
            shuffled.shuffle(&mut rng);
            let fresh_src = MemSource::default();
            let ops = shuffled
                .iter()
                .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
                .collect::<Vec<_>>();
            let fresh = apply(&fresh_src, scheme.as_ref(), Commitment::NULL, &ops).root;
            assert_eq!(root, fresh, "round {}", round);
        }
    }
}

#[test]
fn unsealed_children_are_sealed_first() {
    let scheme = SchemeKind::Classic.build(None);
    let src = MemSource::default();
    let s = apply(
        &src,
        scheme.as_ref(),
        Commitment::NULL,
        &[(b"\x01", Some(b"a")), (b"\x02", Some(b"b"))],
    );
    let root_pos = s.nodes.iter().position(|n| n.commitment == s.root).unwrap();
    assert_eq!(root_pos, s.nodes.len() - 1);
    for n in &s.nodes {
        for c in n.node.child_hashes() {
            assert!(src.nodes.borrow().contains_key(&c));
        }
        if let Node::Branch { children, .. } = &n.node {
            assert!(children
                .iter()
                .flatten()
                .all(|c| matches!(c, NodeHandle::Hash(_))));
        }
    }
}
