//! B-tree over segment start indices
//!
//! The tree never owns segments. Each key is the `left` of the segment
//! stored next to it, and keys appear in the same order as the chain. Only
//! insertion and in-place replacement are supported; any change that would
//! need removal discards the whole tree instead.

use std::cell::Cell;
use std::mem;

use crate::segment::SegmentId;

#[derive(Clone, Debug, Default)]
struct Node {
    keys: Vec<u32>,
    segments: Vec<SegmentId>,
    // Empty for leaves, `keys.len() + 1` otherwise
    children: Vec<Node>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn split_child(&mut self, i: usize, min_degree: usize) {
        let child = &mut self.children[i];
        let right = Node {
            keys: child.keys.split_off(min_degree),
            segments: child.segments.split_off(min_degree),
            children: if child.is_leaf() {
                Vec::new()
            } else {
                child.children.split_off(min_degree)
            },
        };
        let median = min_degree - 1;
        let key = child.keys[median];
        let segment = child.segments[median];
        child.keys.truncate(median);
        child.segments.truncate(median);

        self.keys.insert(i, key);
        self.segments.insert(i, segment);
        self.children.insert(i + 1, right);
    }

    fn insert_non_full(&mut self, key: u32, segment: SegmentId, min_degree: usize) {
        let mut i = self.keys.partition_point(|k| *k < key);
        if self.is_leaf() {
            self.keys.insert(i, key);
            self.segments.insert(i, segment);
            return;
        }
        if self.children[i].keys.len() == 2 * min_degree - 1 {
            self.split_child(i, min_degree);
            if key > self.keys[i] {
                i += 1;
            }
        }
        self.children[i].insert_non_full(key, segment, min_degree);
    }

    fn walk(&self, f: &mut impl FnMut(u32, SegmentId)) {
        for i in 0..self.keys.len() {
            if !self.is_leaf() {
                self.children[i].walk(f);
            }
            f(self.keys[i], self.segments[i]);
        }
        if let Some(last) = self.children.last() {
            last.walk(f);
        }
    }

    fn depth(&self) -> usize {
        1 + self.children.first().map_or(0, Node::depth)
    }
}

/// Logarithmic lookup of segments by start index.
#[derive(Clone, Debug)]
pub(crate) struct SegmentIndex {
    root: Node,
    min_degree: usize,
    len: usize,
    pub(crate) last_used: Cell<SegmentId>,
}

impl SegmentIndex {
    pub(crate) fn new(min_degree: usize, last_used: SegmentId) -> Self {
        Self {
            root: Node::default(),
            min_degree: min_degree.max(2),
            len: 0,
            last_used: Cell::new(last_used),
        }
    }

    /// Builds an index from `(left, segment)` pairs in chain order.
    pub(crate) fn build(
        min_degree: usize,
        last_used: SegmentId,
        segments: impl IntoIterator<Item = (u32, SegmentId)>,
    ) -> Self {
        let mut res = Self::new(min_degree, last_used);
        for (key, segment) in segments {
            res.insert(key, segment);
        }
        res
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Top-down insertion, splitting full nodes on the way down.
    pub(crate) fn insert(&mut self, key: u32, segment: SegmentId) {
        let t = self.min_degree;
        if self.root.keys.len() == 2 * t - 1 {
            let old_root = mem::take(&mut self.root);
            self.root.children.push(old_root);
            self.root.split_child(0, t);
        }
        self.root.insert_non_full(key, segment, t);
        self.len += 1;
    }

    /// The segment with the greatest key not above `index`.
    pub(crate) fn floor(&self, index: u32) -> Option<(u32, SegmentId)> {
        let mut best = None;
        let mut node = &self.root;
        loop {
            let i = node.keys.partition_point(|k| *k <= index);
            if i > 0 {
                best = Some((node.keys[i - 1], node.segments[i - 1]));
                if node.keys[i - 1] == index {
                    return best;
                }
            }
            if node.is_leaf() {
                return best;
            }
            node = &node.children[i];
        }
    }

    /// The segment with the smallest key above `index`.
    fn ceiling_above(&self, index: u32) -> Option<SegmentId> {
        let mut best = None;
        let mut node = &self.root;
        loop {
            let i = node.keys.partition_point(|k| *k <= index);
            if i < node.keys.len() {
                best = Some(node.segments[i]);
            }
            if node.is_leaf() {
                return best;
            }
            node = &node.children[i];
        }
    }

    /// Resolves `index` to `(prev, match_or_next)`.
    ///
    /// A segment matches when `index` equals its key or falls inside its
    /// populated length; zero-length segments match only at their key.
    /// `prev` is the segment immediately before `match_or_next` in chain
    /// order.
    pub(crate) fn find(
        &self,
        index: u32,
        length_of: impl Fn(SegmentId) -> u32,
    ) -> (Option<SegmentId>, Option<SegmentId>) {
        match self.floor(index) {
            Some((key, segment)) if index == key || index - key < length_of(segment) => {
                let prev = key
                    .checked_sub(1)
                    .and_then(|below| self.floor(below))
                    .map(|(_, prev)| prev);
                (prev, Some(segment))
            }
            floor => (floor.map(|(_, prev)| prev), self.ceiling_above(index)),
        }
    }

    /// Replaces the segment stored under `original_key`, re-keying it if the
    /// segment moved. The new key must keep the tree ordered.
    pub(crate) fn swap(
        &mut self,
        original_key: u32,
        old: SegmentId,
        new: SegmentId,
        new_key: u32,
    ) {
        let mut node = &mut self.root;
        loop {
            let i = node.keys.partition_point(|k| *k < original_key);
            if i < node.keys.len() && node.keys[i] == original_key {
                if node.segments[i] != old {
                    fatal_invariant!(
                        "segment index holds {:?} at key {}, expected {:?}",
                        node.segments[i],
                        original_key,
                        old
                    );
                }
                node.keys[i] = new_key;
                node.segments[i] = new;
                break;
            }
            if node.is_leaf() {
                fatal_invariant!("segment index has no key {}", original_key);
            }
            node = &mut node.children[i];
        }
        if self.last_used.get() == old {
            self.last_used.set(new);
        }
    }

    /// Visits every `(key, segment)` pair in ascending key order.
    pub(crate) fn walk(&self, mut f: impl FnMut(u32, SegmentId)) {
        self.root.walk(&mut f);
    }
}
