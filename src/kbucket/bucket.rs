// Copyright 2019 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The internal API for a single `KBucket` in a `KBucketsTable`.
//!
//! Unlike the upstream Kademlia bucket this is modelled on, promotion of a
//! pending entry is never time-based: the reactor decides the outcome by
//! PINGing the eviction candidate and calling [`KBucket::apply_pending`] only
//! once that PING has succeeded or failed.

use super::key::Key;
use enr::NodeId;
use smallvec::SmallVec;

/// The fixed `k` parameter: the maximum number of entries held by a single bucket.
pub const MAX_NODES_PER_BUCKET: usize = 16;

/// The status of a node in a bucket.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum NodeStatus {
    /// The node has an established session with us.
    Connected,
    /// The node has no established session, or its session failed.
    Disconnected,
}

/// A node together with its associated value, stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<TVal> {
    pub key: Key<NodeId>,
    pub value: TVal,
    pub status: NodeStatus,
}

/// A node awaiting a verdict on whether it displaces the least-recently-seen
/// occupant of a full bucket.
#[derive(Debug, Clone)]
pub struct PendingNode<TVal> {
    node: Node<TVal>,
    status: NodeStatus,
}

impl<TVal> PendingNode<TVal> {
    pub fn key(&self) -> &Key<NodeId> {
        &self.node.key
    }

    pub fn value(&self) -> &TVal {
        &self.node.value
    }

    pub fn value_mut(&mut self) -> &mut TVal {
        &mut self.node.value
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }
}

/// The position of a node within a bucket's internal ordering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Position(usize);

/// The result of attempting to apply a pending node to a (previously full) bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPending<TVal> {
    pub inserted: Key<NodeId>,
    pub evicted: Option<Node<TVal>>,
}

/// The result of inserting an entry into a bucket.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// The entry has been inserted directly into the bucket.
    Inserted,
    /// The bucket is full; the entry has been placed in the single pending
    /// slot, displacing nobody yet. `disconnected` names the existing entry
    /// that the reactor should PING to decide the verdict.
    Pending { disconnected: Key<NodeId> },
    /// The bucket and pending slot are both occupied; the entry is dropped.
    Full,
}

/// A `KBucket` holds up to [`MAX_NODES_PER_BUCKET`] entries at one log2-distance
/// shell, ordered least-recently-seen-first, plus a single pending slot used
/// while an eviction candidate is being challenged.
#[derive(Debug, Clone)]
pub struct KBucket<TVal> {
    nodes: SmallVec<[Node<TVal>; MAX_NODES_PER_BUCKET]>,
    pending: Option<PendingNode<TVal>>,
}

impl<TVal> Default for KBucket<TVal> {
    fn default() -> Self {
        KBucket {
            nodes: SmallVec::with_capacity(MAX_NODES_PER_BUCKET),
            pending: None,
        }
    }
}

impl<TVal> KBucket<TVal> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= MAX_NODES_PER_BUCKET
    }

    pub fn num_entries(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node<TVal>> {
        self.nodes.iter()
    }

    pub fn pending(&self) -> Option<&PendingNode<TVal>> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingNode<TVal>> {
        self.pending.as_mut()
    }

    fn position(&self, key: &Key<NodeId>) -> Option<Position> {
        self.nodes.iter().position(|n| &n.key == key).map(Position)
    }

    pub fn get(&self, key: &Key<NodeId>) -> Option<&Node<TVal>> {
        self.position(key).map(|p| &self.nodes[p.0])
    }

    pub fn get_mut(&mut self, key: &Key<NodeId>) -> Option<&mut Node<TVal>> {
        self.nodes.iter_mut().find(|n| &n.key == key)
    }

    /// Marks the entry at `key` with `status`, moving it to the tail
    /// (most-recently-seen).
    pub fn update_status(&mut self, key: &Key<NodeId>, status: NodeStatus) {
        if let Some(pos) = self.position(key) {
            let mut node = self.nodes.remove(pos.0);
            node.status = status;
            self.nodes.push(node);
        }
    }

    /// Attempts to insert a new node into the bucket.
    pub fn insert(&mut self, mut node: Node<TVal>, status: NodeStatus) -> InsertResult {
        node.status = status;
        if self.is_full() {
            if self.pending.is_some() {
                return InsertResult::Full;
            }
            let disconnected = self.nodes[0].key.clone();
            self.pending = Some(PendingNode { node, status });
            InsertResult::Pending { disconnected }
        } else {
            self.nodes.push(node);
            InsertResult::Inserted
        }
    }

    /// Resolves the pending slot, if any: the least-recently-seen occupant is
    /// evicted and the pending entry promoted. Called by the reactor once the
    /// eviction PING has failed. Returns `None` if there is no pending entry.
    pub fn apply_pending(&mut self) -> Option<AppliedPending<TVal>> {
        let pending = self.pending.take()?;
        let evicted = if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes.remove(0))
        };
        let inserted = pending.node.key.clone();
        self.nodes.push(pending.node);
        Some(AppliedPending { inserted, evicted })
    }

    /// Discards the pending entry without touching the bucket. Called by the
    /// reactor once the eviction PING has succeeded (the incumbent survives).
    pub fn discard_pending(&mut self) {
        self.pending = None;
    }

    pub fn remove(&mut self, key: &Key<NodeId>) -> Option<Node<TVal>> {
        let pos = self.position(key)?;
        Some(self.nodes.remove(pos.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(byte: u8) -> Node<()> {
        Node {
            key: Key::from(NodeId::new(&[byte; 32])),
            value: (),
            status: NodeStatus::Disconnected,
        }
    }

    #[test]
    fn fills_up_to_capacity() {
        let mut bucket = KBucket::<()>::new();
        for i in 0..MAX_NODES_PER_BUCKET as u8 {
            assert_eq!(
                bucket.insert(node(i), NodeStatus::Connected),
                InsertResult::Inserted
            );
        }
        assert!(bucket.is_full());
        assert_eq!(bucket.num_entries(), MAX_NODES_PER_BUCKET);
    }

    #[test]
    fn overflow_goes_pending_then_applies() {
        let mut bucket = KBucket::<()>::new();
        for i in 0..MAX_NODES_PER_BUCKET as u8 {
            bucket.insert(node(i), NodeStatus::Connected);
        }
        let victim = bucket.get(&Key::from(NodeId::new(&[0u8; 32]))).unwrap().key.clone();
        match bucket.insert(node(200), NodeStatus::Disconnected) {
            InsertResult::Pending { disconnected } => assert_eq!(disconnected, victim),
            other => panic!("expected Pending, got {:?}", other),
        }
        assert_eq!(bucket.num_entries(), MAX_NODES_PER_BUCKET);

        let applied = bucket.apply_pending().expect("pending entry present");
        assert_eq!(applied.inserted, Key::from(NodeId::new(&[200u8; 32])));
        assert_eq!(applied.evicted.unwrap().key, victim);
        assert!(bucket.get(&victim).is_none());
        assert!(bucket.get(&Key::from(NodeId::new(&[200u8; 32]))).is_some());
    }

    #[test]
    fn pending_slot_is_exclusive() {
        let mut bucket = KBucket::<()>::new();
        for i in 0..MAX_NODES_PER_BUCKET as u8 {
            bucket.insert(node(i), NodeStatus::Connected);
        }
        bucket.insert(node(200), NodeStatus::Disconnected);
        assert_eq!(
            bucket.insert(node(201), NodeStatus::Disconnected),
            InsertResult::Full
        );
    }

    #[test]
    fn discard_pending_keeps_incumbent() {
        let mut bucket = KBucket::<()>::new();
        for i in 0..MAX_NODES_PER_BUCKET as u8 {
            bucket.insert(node(i), NodeStatus::Connected);
        }
        bucket.insert(node(200), NodeStatus::Disconnected);
        bucket.discard_pending();
        assert!(bucket.pending().is_none());
        assert_eq!(bucket.num_entries(), MAX_NODES_PER_BUCKET);
        assert!(bucket.get(&Key::from(NodeId::new(&[0u8; 32]))).is_some());
    }
}
