use std::rc::Rc;

use crate::header::HashCache;
use crate::specifier::{Specifier, hash_of};

/// Children per tuple tree node.
pub const TUPLE_FANOUT: usize = 32;
const TUPLE_SHIFT: u32 = 5;
const TUPLE_MASK: usize = TUPLE_FANOUT - 1;

#[derive(Debug, Clone)]
enum Node {
    /// Up to [`TUPLE_FANOUT`] cells; missing trailing cells are omega.
    Leaf(Vec<Specifier>),
    /// Up to [`TUPLE_FANOUT`] children; `None` is an all-omega subtree.
    Inner(Vec<Option<Rc<Node>>>),
}

impl Node {
    fn empty(level: u32) -> Self {
        if level == 0 {
            Node::Leaf(Vec::new())
        } else {
            Node::Inner(Vec::new())
        }
    }
}

/// Elements a tree of `height` can address: `fanout^(height+1)`.
fn capacity(height: u32) -> usize {
    TUPLE_FANOUT.saturating_pow(height + 1)
}

/// Smallest height whose capacity covers `length` elements.
pub fn height_for(length: usize) -> u32 {
    let mut height = 0;
    while capacity(height) < length {
        height += 1;
    }
    height
}

/// Tuple body: a 32-way tree with copy-on-write nodes.
///
/// Indexing is zero-based here; the language's one-based indices are
/// translated by the operators. A tuple never ends with omega.
#[derive(Debug, Clone)]
pub struct Tuple {
    root: Rc<Node>,
    length: usize,
    height: u32,
    pub(crate) hash: HashCache,
}

impl Default for Tuple {
    fn default() -> Self {
        Self::new()
    }
}

impl Tuple {
    pub fn new() -> Self {
        Self {
            root: Rc::new(Node::empty(0)),
            length: 0,
            height: 0,
            hash: HashCache::new(),
        }
    }

    pub fn from_vec(items: Vec<Specifier>) -> Self {
        let mut tuple = Self::new();
        for (i, item) in items.into_iter().enumerate() {
            tuple.set(i, item);
        }
        tuple
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, index: usize) -> Specifier {
        if index >= self.length {
            return Specifier::Omega;
        }
        let mut node = &*self.root;
        let mut level = self.height;
        loop {
            match node {
                Node::Leaf(cells) => {
                    return cells
                        .get(index & TUPLE_MASK)
                        .cloned()
                        .unwrap_or(Specifier::Omega);
                }
                Node::Inner(children) => {
                    let k = (index >> (TUPLE_SHIFT * level)) & TUPLE_MASK;
                    match children.get(k) {
                        Some(Some(child)) => {
                            node = child;
                            level -= 1;
                        }
                        _ => return Specifier::Omega,
                    }
                }
            }
        }
    }

    /// Store `value` at `index`, growing the tree as needed. Storing omega
    /// at the end shortens the tuple past every trailing omega.
    pub fn set(&mut self, index: usize, value: Specifier) {
        let is_omega = value.is_omega();
        if is_omega && index >= self.length {
            return;
        }
        self.hash.invalidate();
        while capacity(self.height) < index + 1 {
            let old = std::mem::replace(&mut self.root, Rc::new(Node::Inner(Vec::new())));
            self.root = Rc::new(Node::Inner(vec![Some(old)]));
            self.height += 1;
        }
        set_in(Rc::make_mut(&mut self.root), self.height, index, value);
        if index >= self.length {
            self.length = index + 1;
        }
        if is_omega && index + 1 == self.length {
            let mut keep = index;
            while keep > 0 && self.get(keep - 1).is_omega() {
                keep -= 1;
            }
            self.truncate(keep);
        }
    }

    pub fn push(&mut self, value: Specifier) {
        let at = self.length;
        self.set(at, value);
    }

    /// Drop every element at or past `length`.
    pub fn truncate(&mut self, length: usize) {
        if length >= self.length {
            return;
        }
        self.hash.invalidate();
        truncate_node(Rc::make_mut(&mut self.root), self.height, length);
        let mut length = length;
        while length > 0 && self.get(length - 1).is_omega() {
            length -= 1;
        }
        self.length = length;
        let target = height_for(length);
        while self.height > target {
            let child = match &*self.root {
                Node::Inner(children) => children.first().cloned().flatten(),
                Node::Leaf(_) => None,
            };
            self.height -= 1;
            self.root = child.unwrap_or_else(|| Rc::new(Node::empty(self.height)));
        }
    }

    pub fn iter(&self) -> TupleIter<'_> {
        TupleIter {
            tuple: self,
            index: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<Specifier> {
        self.iter().collect()
    }

    /// Elements `lo..hi`, zero-based and clamped to the length.
    pub fn slice(&self, lo: usize, hi: usize) -> Tuple {
        let hi = hi.min(self.length);
        Tuple::from_vec((lo..hi).map(|i| self.get(i)).collect())
    }

    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut out = self.clone();
        let base = out.length;
        for (i, item) in other.iter().enumerate() {
            out.set(base + i, item);
        }
        out
    }

    /// Remove and return the first element.
    pub fn take_first(&mut self) -> Specifier {
        let first = self.get(0);
        let rest: Vec<Specifier> = self.iter().skip(1).collect();
        *self = Tuple::from_vec(rest);
        first
    }

    /// Remove and return the last element.
    pub fn take_last(&mut self) -> Specifier {
        if self.length == 0 {
            return Specifier::Omega;
        }
        let last = self.get(self.length - 1);
        self.truncate(self.length - 1);
        last
    }

    pub fn hash_code(&self) -> i32 {
        self.hash.get_or_compute(|| {
            let mut h: u32 = self.length as u32;
            for item in self.iter() {
                h = h.wrapping_mul(31).wrapping_add(hash_of(&item) as u32);
            }
            (h & 0x7fff_ffff) as i32
        })
    }
}

fn set_in(node: &mut Node, level: u32, index: usize, value: Specifier) {
    match node {
        Node::Leaf(cells) => {
            let k = index & TUPLE_MASK;
            if cells.len() <= k {
                cells.resize(k + 1, Specifier::Omega);
            }
            cells[k] = value;
        }
        Node::Inner(children) => {
            let k = (index >> (TUPLE_SHIFT * level)) & TUPLE_MASK;
            if children.len() <= k {
                children.resize(k + 1, None);
            }
            let child = children[k].get_or_insert_with(|| Rc::new(Node::empty(level - 1)));
            set_in(Rc::make_mut(child), level - 1, index, value);
        }
    }
}

/// Keep the first `keep` elements of the subtree rooted at `node`.
fn truncate_node(node: &mut Node, level: u32, keep: usize) {
    match node {
        Node::Leaf(cells) => cells.truncate(keep),
        Node::Inner(children) => {
            let span = TUPLE_FANOUT.pow(level);
            let full = keep / span;
            let part = keep % span;
            if part == 0 {
                children.truncate(full);
            } else {
                children.truncate(full + 1);
                if let Some(Some(child)) = children.get_mut(full) {
                    truncate_node(Rc::make_mut(child), level - 1, part);
                }
            }
        }
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for Tuple {}

pub struct TupleIter<'a> {
    tuple: &'a Tuple,
    index: usize,
}

impl Iterator for TupleIter<'_> {
    type Item = Specifier;

    fn next(&mut self) -> Option<Specifier> {
        if self.index >= self.tuple.length {
            return None;
        }
        let item = self.tuple.get(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.tuple.length - self.index;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(n: usize) -> Tuple {
        Tuple::from_vec((1..=n as i64).map(Specifier::Short).collect())
    }

    #[test]
    fn boundary_lengths_have_minimal_height() {
        for (len, height) in [(0, 0), (1, 0), (32, 0), (1024, 1), (1025, 2)] {
            let t = ints(len);
            assert_eq!(t.len(), len);
            assert_eq!(t.height(), height, "length {len}");
            for i in 0..len {
                assert_eq!(t.get(i), Specifier::Short(i as i64 + 1));
            }
            assert!(t.get(len).is_omega());
        }
    }

    #[test]
    fn trailing_omega_shortens() {
        let mut t = ints(5);
        t.set(4, Specifier::Omega);
        assert_eq!(t.len(), 4);
        t.set(1, Specifier::Omega);
        t.set(2, Specifier::Omega);
        t.set(3, Specifier::Omega);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn sparse_store_grows_and_fills_with_omega() {
        let mut t = Tuple::new();
        t.set(2000, Specifier::Short(7));
        assert_eq!(t.len(), 2001);
        assert_eq!(t.height(), height_for(2001));
        assert!(t.get(5).is_omega());
        t.set(2000, Specifier::Omega);
        assert_eq!(t.len(), 0);
        assert_eq!(t.height(), 0);
    }

    #[test]
    fn clones_are_independent() {
        let a = ints(100);
        let mut b = a.clone();
        b.set(50, Specifier::Short(-1));
        assert_eq!(a.get(50), Specifier::Short(51));
        assert_eq!(b.get(50), Specifier::Short(-1));
        assert_ne!(a, b);
    }

    #[test]
    fn truncate_then_regrow_sees_omega() {
        let mut t = ints(1100);
        t.truncate(10);
        assert_eq!(t.len(), 10);
        assert_eq!(t.height(), 0);
        t.set(1099, Specifier::Short(0));
        assert!(t.get(500).is_omega());
    }

    #[test]
    fn from_and_take_ends() {
        let mut t = ints(3);
        assert_eq!(t.take_first(), Specifier::Short(1));
        assert_eq!(t.take_last(), Specifier::Short(3));
        assert_eq!(t.to_vec(), vec![Specifier::Short(2)]);
    }
}
