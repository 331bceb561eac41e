//! Arena-backed skiplist.
//!
//! Nodes live in a `Vec` and link to each other by index, so the structure
//! holds no per-node heap pointers. Each node carries a fixed-size array of
//! forward links; only the first `height` slots are meaningful.

use super::OrderedStore;
use crate::record::Record;
use rand::Rng;

/// Upper bound on tower height.
pub const MAX_HEIGHT: usize = 32;

/// End-of-list marker.
const NIL: u32 = u32::MAX;

/// Index of the head sentinel.
const HEAD: u32 = 0;

struct Node {
    record: Record,
    next: [u32; MAX_HEIGHT],
}

impl Node {
    fn new(record: Record) -> Self {
        Self { record, next: [NIL; MAX_HEIGHT] }
    }
}

/// Probabilistic ordered map from key to record.
pub struct SkipList {
    /// `nodes[0]` is the head sentinel; its record is never read.
    nodes: Vec<Node>,
    /// Tallest tower currently in use.
    height: usize,
    max_height: usize,
}

impl SkipList {
    /// Create an empty skiplist whose towers never exceed `max_height`.
    pub fn new(max_height: usize) -> Self {
        Self {
            nodes: vec![Node::new(Record::new(String::new(), Vec::new(), 0))],
            height: 1,
            max_height: max_height.clamp(1, MAX_HEIGHT),
        }
    }

    /// Geometric coin flips, capped at `max_height`.
    fn random_height(&self) -> usize {
        let mut rng = rand::rng();
        let mut height = 1;
        while height < self.max_height && rng.random_bool(0.5) {
            height += 1;
        }
        height
    }

    fn key_at(&self, index: u32) -> &str {
        &self.nodes[index as usize].record.key
    }

    /// Rightmost node with key < `key` at every level in use.
    fn predecessors(&self, key: &str) -> [u32; MAX_HEIGHT] {
        let mut update = [HEAD; MAX_HEIGHT];
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            loop {
                let next = self.nodes[x as usize].next[level];
                if next != NIL && self.key_at(next) < key {
                    x = next;
                } else {
                    break;
                }
            }
            update[level] = x;
        }
        update
    }

    fn find_index(&self, key: &str) -> Option<u32> {
        let update = self.predecessors(key);
        let candidate = self.nodes[update[0] as usize].next[0];
        (candidate != NIL && self.key_at(candidate) == key).then_some(candidate)
    }

    /// Number of levels currently linked.
    pub fn height(&self) -> usize {
        self.height
    }

    fn iter(&self) -> impl Iterator<Item = &Record> {
        let mut cursor = self.nodes[HEAD as usize].next[0];
        std::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let node = &self.nodes[cursor as usize];
            cursor = node.next[0];
            Some(&node.record)
        })
    }
}

impl OrderedStore for SkipList {
    fn get(&self, key: &str) -> Option<&Record> {
        self.find_index(key).map(|i| &self.nodes[i as usize].record)
    }

    fn put(&mut self, record: Record) {
        // Slots above the current height already point at the head.
        let update = self.predecessors(&record.key);
        let candidate = self.nodes[update[0] as usize].next[0];
        if candidate != NIL && self.key_at(candidate) == record.key {
            self.nodes[candidate as usize].record = record;
            return;
        }

        let height = self.random_height();
        self.height = self.height.max(height);

        let index = self.nodes.len() as u32;
        let mut node = Node::new(record);
        for level in 0..height {
            let prev = update[level] as usize;
            node.next[level] = self.nodes[prev].next[level];
            self.nodes[prev].next[level] = index;
        }
        self.nodes.push(node);
    }

    fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    fn sorted(&self) -> Vec<Record> {
        self.iter().cloned().collect()
    }

    fn drain(&mut self) -> Vec<Record> {
        let mut order = Vec::with_capacity(self.len());
        let mut cursor = self.nodes[HEAD as usize].next[0];
        while cursor != NIL {
            order.push(cursor);
            cursor = self.nodes[cursor as usize].next[0];
        }

        let mut slots: Vec<Option<Record>> =
            self.nodes.drain(..).map(|node| Some(node.record)).collect();
        let records = order.into_iter().filter_map(|i| slots[i as usize].take()).collect();

        *self = SkipList::new(self.max_height);
        records
    }
}
