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

//! Expiring collections backing the reactor's keep-alive pings and IP-vote
//! bookkeeping. Replaces the teacher's opaque per-peer timer handles with an
//! explicit, cancellable [`TimerSet`].

use futures::StreamExt;
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::time::{delay_queue, DelayQueue};

/// A set of named, independently cancellable periodic timers, keyed by `K`
/// (a [`enr::NodeId`] for ping intervals). Firing does not re-arm: the
/// reactor calls [`TimerSet::arm`] again after handling the tick, matching
/// the "no internal timers beyond what's explicitly armed" requirement.
pub struct TimerSet<K> {
    keys: HashMap<K, delay_queue::Key>,
    queue: DelayQueue<K>,
}

impl<K: Eq + Hash + Clone> Default for TimerSet<K> {
    fn default() -> Self {
        TimerSet { keys: HashMap::new(), queue: DelayQueue::new() }
    }
}

impl<K: Eq + Hash + Clone> TimerSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the timer for `key`, firing after `period`.
    pub fn arm(&mut self, key: K, period: Duration) {
        if let Some(existing) = self.keys.get(&key) {
            self.queue.reset(existing, period);
        } else {
            let delay_key = self.queue.insert(key.clone(), period);
            self.keys.insert(key, delay_key);
        }
    }

    /// Cancels the timer for `key`, if armed.
    pub fn cancel(&mut self, key: &K) {
        if let Some(delay_key) = self.keys.remove(key) {
            self.queue.remove(&delay_key);
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Cancels every armed timer.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.queue.clear();
    }

    /// Awaits the next fired timer, removing its bookkeeping entry. Returns
    /// `None` once every armed timer has fired and none remain.
    pub async fn next_expired(&mut self) -> Option<K> {
        loop {
            let expired = self.queue.next().await?;
            let key = expired.into_inner();
            self.keys.remove(&key);
            return Some(key);
        }
    }
}

/// A peer's assertion of our own externally observed address, forgotten
/// after [`Discv5Config::ip_vote_timeout`](crate::config::Discv5Config).
/// Only ingestion is implemented; majority aggregation is intentionally
/// left unbuilt (see the crate's design notes on IP-vote aggregation).
pub struct IpVotes<K> {
    votes: HashMap<K, (IpAddr, delay_queue::Key)>,
    expirations: DelayQueue<K>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone> IpVotes<K> {
    pub fn new(ttl: Duration) -> Self {
        IpVotes { votes: HashMap::new(), expirations: DelayQueue::new(), ttl }
    }

    /// Records `addr` as `voter`'s current assertion of our address,
    /// resetting its TTL.
    pub fn record(&mut self, voter: K, addr: IpAddr) {
        if let Some((value, delay_key)) = self.votes.get_mut(&voter) {
            *value = addr;
            self.expirations.reset(delay_key, self.ttl);
        } else {
            let delay_key = self.expirations.insert(voter.clone(), self.ttl);
            self.votes.insert(voter, (addr, delay_key));
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Drops any votes whose TTL has elapsed. Call periodically; a vote
    /// store with nobody polling it simply grows until this is called.
    pub fn expire(&mut self) {
        while let Some(Some(expired)) = self.expirations.next().now_or_never() {
            self.votes.remove(expired.get_ref());
        }
    }
}

use futures::FutureExt;

#[cfg(test)]
mod tests {
    use super::*;
    use enr::NodeId;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn arm_then_cancel_never_fires() {
        let mut timers: TimerSet<NodeId> = TimerSet::new();
        let id = NodeId::new(&[1u8; 32]);
        timers.arm(id, Duration::from_secs(300));
        timers.cancel(&id);
        assert!(!timers.is_armed(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_after_period() {
        let mut timers: TimerSet<NodeId> = TimerSet::new();
        let id = NodeId::new(&[2u8; 32]);
        timers.arm(id, Duration::from_millis(10));
        advance(Duration::from_millis(11)).await;
        assert_eq!(timers.next_expired().await, Some(id));
        assert!(!timers.is_armed(&id));
    }

    #[tokio::test]
    async fn ip_votes_records_latest_address() {
        let mut votes: IpVotes<NodeId> = IpVotes::new(Duration::from_secs(120));
        let peer = NodeId::new(&[3u8; 32]);
        votes.record(peer, "127.0.0.1".parse().unwrap());
        votes.record(peer, "10.0.0.1".parse().unwrap());
        assert_eq!(votes.len(), 1);
    }
}
