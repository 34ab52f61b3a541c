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

//! An iterative Kademlia lookup towards a target [`NodeId`], pulled forward
//! by the reactor rather than driven by internal timers: the reactor calls
//! [`Lookup::next`] to learn which peer (if any) to probe next, and reports
//! outcomes back through [`Lookup::on_success`]/[`Lookup::on_failure`].

use crate::kbucket::{Distance, Key};
use enr::NodeId;
use std::collections::btree_map::{BTreeMap, Entry};

/// Bounded-parallelism / result-count knobs for a [`Lookup`].
#[derive(Debug, Clone, Copy)]
pub struct LookupConfig {
    /// The `alpha` parameter: at most this many peers are probed in parallel.
    pub parallelism: usize,
    /// The number of closest successfully-contacted peers the lookup
    /// converges on before finishing.
    pub num_results: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        LookupConfig { parallelism: 3, num_results: 16 }
    }
}

/// A 32-bit identifier for a live lookup. Starts at 1, increments per
/// [`LookupIdGenerator::next`], and wraps back to 1 (skipping 0) rather than
/// overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupId(u32);

impl LookupId {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Hands out [`LookupId`]s in strictly increasing order modulo 2^32.
pub struct LookupIdGenerator {
    next: u32,
}

impl Default for LookupIdGenerator {
    fn default() -> Self {
        LookupIdGenerator { next: 1 }
    }
}

impl LookupIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> LookupId {
        let id = LookupId(self.next);
        self.next = match self.next.checked_add(1) {
            Some(n) if n != 0 => n,
            _ => 1,
        };
        id
    }
}

/// What the reactor should do next for a [`Lookup`].
#[derive(Debug, PartialEq, Eq)]
pub enum LookupState {
    /// Probe `node_id` now.
    Waiting(NodeId),
    /// Nothing new to probe, but the lookup is still waiting on in-flight
    /// probes.
    WaitingAtCapacity,
    /// The lookup has converged; call [`Lookup::into_result`].
    Finished,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
enum Progress {
    Iterating { no_progress: usize },
    Stalled,
    Finished,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PeerState {
    NotContacted,
    Waiting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
struct LookupPeer {
    key: Key<NodeId>,
    state: PeerState,
}

impl LookupPeer {
    fn new(key: Key<NodeId>) -> Self {
        LookupPeer { key, state: PeerState::NotContacted }
    }
}

/// A single iterative lookup towards `target`.
pub struct Lookup {
    target_key: Key<NodeId>,
    progress: Progress,
    closest: BTreeMap<Distance, LookupPeer>,
    num_waiting: usize,
    config: LookupConfig,
}

impl Lookup {
    /// Starts a new lookup. `known_closest_peers` should be
    /// `kbuckets.nearest(target, num_results)`; peers beyond `num_results`
    /// are discarded immediately, matching invariant #6 (no duplicate
    /// NodeIds, bounded working set).
    pub fn new(
        target: NodeId,
        known_closest_peers: impl IntoIterator<Item = NodeId>,
        config: LookupConfig,
    ) -> Self {
        let target_key = Key::from(target);
        let closest = known_closest_peers
            .into_iter()
            .map(Key::from)
            .map(|key| (key.distance(&target_key), LookupPeer::new(key)))
            .take(config.num_results)
            .collect();
        Lookup {
            target_key,
            progress: Progress::Iterating { no_progress: 0 },
            closest,
            num_waiting: 0,
            config,
        }
    }

    /// Reports that `peer` returned `closer_peers` in answer to a probe.
    /// A peer whose computed distance to the target is zero (it *is* the
    /// target) is never probed in the first place; callers that discover a
    /// zero-distance candidate should report it via [`Lookup::on_failure`]
    /// instead, per §4.3.
    pub fn on_success(&mut self, peer: &NodeId, closer_peers: Vec<NodeId>) {
        if self.progress == Progress::Finished {
            return;
        }
        let key = Key::from(*peer);
        let distance = key.distance(&self.target_key);
        let num_closest = self.closest.len();

        match self.closest.entry(distance) {
            Entry::Vacant(_) => return,
            Entry::Occupied(mut e) => match e.get().state {
                PeerState::Waiting => {
                    self.num_waiting = self.num_waiting.saturating_sub(1);
                    e.get_mut().state = PeerState::Succeeded;
                }
                PeerState::NotContacted | PeerState::Failed | PeerState::Succeeded => return,
            },
        }

        let mut made_progress = false;
        for candidate in closer_peers {
            let key = Key::from(candidate);
            let distance = self.target_key.distance(&key);
            if let Entry::Vacant(e) = self.closest.entry(distance) {
                e.insert(LookupPeer::new(key));
                made_progress = true;
            } else if num_closest < self.config.num_results {
                made_progress = true;
            }
        }

        self.progress = match self.progress {
            Progress::Iterating { no_progress } => {
                let no_progress = if made_progress { 0 } else { no_progress + 1 };
                if no_progress >= self.config.parallelism {
                    Progress::Stalled
                } else {
                    Progress::Iterating { no_progress }
                }
            }
            Progress::Stalled => {
                if made_progress {
                    Progress::Iterating { no_progress: 0 }
                } else {
                    Progress::Stalled
                }
            }
            Progress::Finished => Progress::Finished,
        };
    }

    /// Reports that probing `peer` failed (request timeout, session drop,
    /// or the peer's computed distance to the target was zero).
    pub fn on_failure(&mut self, peer: &NodeId) {
        if self.progress == Progress::Finished {
            return;
        }
        let key = Key::from(*peer);
        let distance = key.distance(&self.target_key);
        if let Entry::Occupied(mut e) = self.closest.entry(distance) {
            if e.get().state == PeerState::Waiting {
                self.num_waiting = self.num_waiting.saturating_sub(1);
                e.get_mut().state = PeerState::Failed;
            }
        }
    }

    fn at_capacity(&self) -> bool {
        match self.progress {
            Progress::Stalled => self.num_waiting >= self.config.num_results,
            Progress::Iterating { .. } => self.num_waiting >= self.config.parallelism,
            Progress::Finished => true,
        }
    }

    /// Advances the lookup, returning the next action for the reactor.
    pub fn next(&mut self) -> LookupState {
        if self.progress == Progress::Finished {
            return LookupState::Finished;
        }

        let mut succeeded = 0usize;
        let at_capacity = self.at_capacity();

        for peer in self.closest.values_mut() {
            match peer.state {
                PeerState::NotContacted => {
                    if at_capacity {
                        return LookupState::WaitingAtCapacity;
                    }
                    peer.state = PeerState::Waiting;
                    self.num_waiting += 1;
                    return LookupState::Waiting(*peer.key.preimage());
                }
                PeerState::Waiting => {
                    if at_capacity {
                        return LookupState::WaitingAtCapacity;
                    }
                }
                PeerState::Succeeded => {
                    succeeded += 1;
                    if succeeded >= self.config.num_results {
                        self.progress = Progress::Finished;
                        return LookupState::Finished;
                    }
                }
                PeerState::Failed => {}
            }
        }

        if self.num_waiting > 0 {
            LookupState::WaitingAtCapacity
        } else {
            self.progress = Progress::Finished;
            LookupState::Finished
        }
    }

    /// Consumes the lookup, returning the closest successfully-contacted
    /// NodeIds, ascending by distance to the target.
    pub fn into_result(self) -> Vec<NodeId> {
        self.closest
            .into_values()
            .filter(|p| p.state == PeerState::Succeeded)
            .map(|p| *p.key.preimage())
            .take(self.config.num_results)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(byte: u8) -> NodeId {
        NodeId::new(&[byte; 32])
    }

    #[test]
    fn lookup_id_wraps_skipping_zero() {
        let mut gen = LookupIdGenerator::new();
        assert_eq!(gen.next().get(), 1);
        assert_eq!(gen.next().get(), 2);
        let mut gen_at_max = LookupIdGenerator { next: u32::MAX };
        assert_eq!(gen_at_max.next().get(), u32::MAX);
        assert_eq!(gen_at_max.next().get(), 1);
    }

    #[test]
    fn empty_lookup_finishes_immediately() {
        let mut lookup = Lookup::new(node(0), vec![], LookupConfig::default());
        assert_eq!(lookup.next(), LookupState::Finished);
        assert!(lookup.into_result().is_empty());
    }

    #[test]
    fn respects_parallelism_cap() {
        let target = node(0);
        let peers = vec![node(1), node(2), node(3), node(4), node(5)];
        let config = LookupConfig { parallelism: 2, num_results: 16 };
        let mut lookup = Lookup::new(target, peers, config);

        let mut probed = vec![];
        for _ in 0..2 {
            match lookup.next() {
                LookupState::Waiting(id) => probed.push(id),
                other => panic!("expected Waiting, got {:?}", other),
            }
        }
        assert_eq!(lookup.next(), LookupState::WaitingAtCapacity);
        assert_eq!(probed.len(), 2);
    }

    #[test]
    fn converges_and_reports_successes_in_order() {
        let target = node(0);
        let peers = vec![node(10), node(20)];
        let config = LookupConfig { parallelism: 3, num_results: 16 };
        let mut lookup = Lookup::new(target, peers.clone(), config);

        let mut in_flight = vec![];
        loop {
            match lookup.next() {
                LookupState::Waiting(id) => in_flight.push(id),
                LookupState::WaitingAtCapacity => break,
                LookupState::Finished => break,
            }
        }
        for id in &in_flight {
            lookup.on_success(id, vec![]);
        }
        assert_eq!(lookup.next(), LookupState::Finished);
        let result = lookup.into_result();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn failure_does_not_block_termination() {
        let target = node(0);
        let mut lookup = Lookup::new(target, vec![node(1)], LookupConfig::default());
        match lookup.next() {
            LookupState::Waiting(id) => lookup.on_failure(&id),
            other => panic!("expected Waiting, got {:?}", other),
        }
        assert_eq!(lookup.next(), LookupState::Finished);
        assert!(lookup.into_result().is_empty());
    }
}
