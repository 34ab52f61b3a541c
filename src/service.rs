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

//! The reactor: the single place that correlates outbound requests with
//! inbound responses, drives the routing table's eviction protocol, and
//! steps active lookups forward. Everything it touches outside this crate
//! goes through [`SessionService`].

use crate::config::Discv5Config;
use crate::error::Discv5Error;
use crate::kbucket::{Entry as KEntry, InsertResult, Key, KBucketsTable, NodeStatus};
use crate::query::{Lookup, LookupConfig, LookupId, LookupIdGenerator, LookupState};
use crate::rpc::{kinds_match, Message, RequestBody, RequestId, ResponseBody};
use crate::session::{AuthTag, SessionEvent, SessionService};
use crate::timers::{IpVotes, TimerSet};
use enr::{CombinedKey, Enr, NodeId};
use fnv::FnvHashMap;
use log::{error, warn};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::select;

/// The maximum number of NODES packets accepted in answer to a single
/// FINDNODE before the accumulated ENRs are delivered regardless of `total`.
const MAX_NODES_PACKETS: u64 = 5;

/// An outstanding request, tagged with enough context to route its answer.
/// Replaces the two separate maps (`active_rpc_requests`, keyed by request,
/// and `active_nodes_responses`, keyed by sender) that this crate's upstream
/// grounding splits the same job across.
enum ActiveRequest {
    /// Awaiting the first (and possibly only) answer to `request`.
    Single {
        node_id: NodeId,
        request: RequestBody,
        lookup_id: Option<LookupId>,
        /// `true` if this PING is the eviction challenge for a full bucket's
        /// pending candidate, rather than an ordinary keep-alive or ENR probe.
        eviction_challenge: bool,
    },
    /// A FINDNODE answer is arriving across more than one NODES packet.
    PartialNodes {
        node_id: NodeId,
        request: RequestBody,
        lookup_id: Option<LookupId>,
        total: u64,
        count: u64,
        enrs: Vec<Enr<CombinedKey>>,
    },
}

impl ActiveRequest {
    fn request_body(&self) -> &RequestBody {
        match self {
            ActiveRequest::Single { request, .. } => request,
            ActiveRequest::PartialNodes { request, .. } => request,
        }
    }
}

/// Events the core hands to the application. Deliberately narrower than the
/// upstream crate's event set: `NodeInserted` and `FindNodeResult` have no
/// counterpart here because the routing-table-churn and lookup-completion
/// information they carried is already available from [`Discv5::find_node`]'s
/// return value and from `EnrAdded` at the point an entry actually lands.
#[derive(Debug, Clone)]
pub enum Discv5Event {
    /// `inserted` has joined the routing table; `evicted` is set if this
    /// resolved a pending eviction challenge that displaced an incumbent.
    EnrAdded {
        inserted: Enr<CombinedKey>,
        evicted: Option<Enr<CombinedKey>>,
    },
    /// An ENR was observed (via a lookup or an unsolicited NODES packet)
    /// that is not necessarily destined for the routing table.
    Discovered(Enr<CombinedKey>),
    /// Reserved extension point for application-level TALKREQ messages;
    /// this crate has no such message kind of its own.
    TalkRequestReceived,
}

/// The routing table, lookup engine and request/response reactor for a
/// single discv5 node. Generic over the session/encryption layer so that
/// tests can drive it with an in-memory double.
pub struct Discv5<S: SessionService> {
    local_enr: Enr<CombinedKey>,
    kbuckets: KBucketsTable<CombinedKey>,
    session: S,
    config: Discv5Config,
    active_requests: FnvHashMap<RequestId, ActiveRequest>,
    connected_peers: HashSet<NodeId>,
    ping_timers: TimerSet<NodeId>,
    ip_votes: IpVotes<NodeId>,
    lookups: FnvHashMap<LookupId, Lookup>,
    lookup_untrusted: FnvHashMap<LookupId, Vec<Enr<CombinedKey>>>,
    lookup_targets: FnvHashMap<LookupId, NodeId>,
    finished_lookup_results: FnvHashMap<LookupId, Vec<NodeId>>,
    next_lookup_id: LookupIdGenerator,
    events: SmallVec<[Discv5Event; 8]>,
    started: bool,
}

impl<S: SessionService> Discv5<S> {
    pub fn new(local_enr: Enr<CombinedKey>, session: S, config: Discv5Config) -> Self {
        let kbuckets = KBucketsTable::new(local_enr.node_id());
        let ip_votes = IpVotes::new(config.ip_vote_timeout);
        Discv5 {
            local_enr,
            kbuckets,
            session,
            config,
            active_requests: FnvHashMap::default(),
            connected_peers: HashSet::new(),
            ping_timers: TimerSet::new(),
            ip_votes,
            lookups: FnvHashMap::default(),
            lookup_untrusted: FnvHashMap::default(),
            lookup_targets: FnvHashMap::default(),
            finished_lookup_results: FnvHashMap::default(),
            next_lookup_id: LookupIdGenerator::new(),
            events: SmallVec::new(),
            started: false,
        }
    }

    pub fn local_enr(&self) -> &Enr<CombinedKey> {
        &self.local_enr
    }

    pub fn kbuckets(&self) -> &KBucketsTable<CombinedKey> {
        &self.kbuckets
    }

    /// Starts the underlying session service. Must be called before any
    /// other method.
    pub async fn start(&mut self) -> Result<(), Discv5Error> {
        self.session.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the underlying session service and resets all reactor state, so
    /// a subsequent `start()` begins cold: the request registry, response
    /// accumulators, lookups and their buffers, ping timers and connected
    /// peers are all cleared.
    pub async fn stop(&mut self) {
        self.session.stop().await;
        self.started = false;
        self.active_requests.clear();
        self.lookups.clear();
        self.lookup_untrusted.clear();
        self.lookup_targets.clear();
        self.finished_lookup_results.clear();
        self.ping_timers.clear();
        self.connected_peers.clear();
    }

    /// Inserts or refreshes `enr` in the routing table as a disconnected
    /// contact (e.g. from a bootstrap list), emitting `EnrAdded` on success.
    pub fn add_enr(&mut self, enr: Enr<CombinedKey>) -> Result<(), Discv5Error> {
        if enr.node_id() == self.local_enr.node_id() {
            return Ok(());
        }
        if !(self.config.table_filter)(&enr) {
            return Ok(());
        }
        match self.kbuckets.entry(&enr.node_id()) {
            KEntry::Present(value, _) | KEntry::Pending(value, _) => {
                *value = enr;
            }
            KEntry::Absent => {
                let cloned = enr.clone();
                if let InsertResult::Inserted = self.kbuckets.add(enr, NodeStatus::Disconnected) {
                    self.push_event(Discv5Event::EnrAdded { inserted: cloned, evicted: None });
                }
            }
            KEntry::SelfEntry => {}
        }
        Ok(())
    }

    /// Runs an iterative FINDNODE lookup towards `target`, returning the
    /// closest ENRs discovered, ordered nearest-first. Drives the reactor's
    /// own dispatch loop internally; the caller does not need to interleave
    /// calls with [`Discv5::next_event`] for the lookup to make progress.
    pub async fn find_node(&mut self, target: NodeId) -> Result<Vec<Enr<CombinedKey>>, Discv5Error> {
        if !self.started {
            return Err(Discv5Error::ServiceNotStarted);
        }
        if target == self.local_enr.node_id() {
            return Err(Discv5Error::SearchForLocalIdForbidden);
        }

        let config = LookupConfig {
            parallelism: self.config.query_parallelism,
            num_results: self.config.query_num_results,
        };
        let known_closest = self
            .kbuckets
            .nearest(&target, config.num_results)
            .into_iter()
            .map(|enr| enr.node_id());
        let lookup = Lookup::new(target, known_closest, config);
        let id = self.next_lookup_id.next();
        self.lookups.insert(id, lookup);
        self.lookup_untrusted.insert(id, Vec::new());
        self.lookup_targets.insert(id, target);

        loop {
            self.advance_lookup(id);
            if !self.lookups.contains_key(&id) {
                break;
            }
            if !self.pump().await {
                break;
            }
        }

        self.lookup_targets.remove(&id);
        let mut result: Vec<Enr<CombinedKey>> = Vec::new();
        if let Some(ids) = self.finished_lookup_results.remove(&id) {
            for node_id in ids {
                if let Some(enr) = self.find_enr(Some(id), &node_id) {
                    result.push(enr);
                }
            }
        }
        self.lookup_untrusted.remove(&id);
        Ok(result)
    }

    /// Pulls `id`'s lookup forward until it either needs the reactor to wait
    /// on more network traffic or has finished, in which case its result is
    /// stashed in `finished_lookup_results` and the lookup is removed.
    fn advance_lookup(&mut self, id: LookupId) {
        loop {
            let state = match self.lookups.get_mut(&id) {
                Some(lookup) => lookup.next(),
                None => return,
            };
            match state {
                LookupState::Waiting(peer) => self.send_find_node_to(id, peer),
                LookupState::WaitingAtCapacity => return,
                LookupState::Finished => {
                    let lookup = self.lookups.remove(&id).expect("checked Some above");
                    let ids = lookup.into_result();
                    self.finished_lookup_results.insert(id, ids);
                    return;
                }
            }
        }
    }

    fn send_find_node_to(&mut self, id: LookupId, peer: NodeId) {
        let target = match self.lookup_targets.get(&id) {
            Some(t) => *t,
            None => return,
        };
        let distance = match Key::from(target).log2_distance(&Key::from(peer)) {
            Some(d) => d as u64,
            None => {
                // `peer` is the target itself; nothing to ask it.
                if let Some(lookup) = self.lookups.get_mut(&id) {
                    lookup.on_failure(&peer);
                }
                return;
            }
        };
        let dest = match self.find_enr(Some(id), &peer) {
            Some(enr) => enr,
            None => {
                warn!("lookup candidate {:?} has no known address", peer);
                if let Some(lookup) = self.lookups.get_mut(&id) {
                    lookup.on_failure(&peer);
                }
                return;
            }
        };
        let rpc_id = self.next_request_id();
        let body = RequestBody::FindNode { distance };
        match self.session.send_request(&dest, Message::Request { id: rpc_id, body: body.clone() }) {
            Ok(()) => {
                self.active_requests.insert(
                    rpc_id,
                    ActiveRequest::Single {
                        node_id: peer,
                        request: body,
                        lookup_id: Some(id),
                        eviction_challenge: false,
                    },
                );
            }
            Err(e) => {
                error!("failed to send FINDNODE to lookup candidate: {}", e);
                if let Some(lookup) = self.lookups.get_mut(&id) {
                    lookup.on_failure(&peer);
                }
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        rand::random()
    }

    fn push_event(&mut self, event: Discv5Event) {
        self.events.push(event);
    }

    /// Awaits and dispatches the next application-visible event, draining
    /// any already-buffered events first. `None` once the session service
    /// has permanently stopped producing events.
    pub async fn next_event(&mut self) -> Option<Discv5Event> {
        loop {
            if !self.events.is_empty() {
                return Some(self.events.remove(0));
            }
            if !self.pump().await {
                return None;
            }
        }
    }

    /// Advances the reactor by one tick: either an inbound session event or
    /// a fired keep-alive ping timer, whichever comes first. Returns `false`
    /// once the session service has permanently stopped producing events.
    async fn pump(&mut self) -> bool {
        if self.ping_timers.is_empty() {
            return match self.session.next_event().await {
                Some(event) => {
                    self.handle_session_event(event);
                    true
                }
                None => false,
            };
        }
        select! {
            event = self.session.next_event() => match event {
                Some(event) => {
                    self.handle_session_event(event);
                    true
                }
                None => false,
            },
            Some(node_id) = self.ping_timers.next_expired() => {
                self.on_ping_timer(node_id);
                true
            }
        }
    }

    /// Fires on a connected peer's keep-alive interval: re-pings and
    /// re-arms, and piggybacks the periodic tick to expire stale IP votes.
    fn on_ping_timer(&mut self, node_id: NodeId) {
        self.ip_votes.expire();
        if !self.connected_peers.contains(&node_id) {
            return;
        }
        if let Some(enr) = self.kbuckets.get_with_pending(&node_id).cloned() {
            self.send_ping(&enr, false);
            self.ping_timers.arm(node_id, self.config.ping_interval);
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Established(enr) => self.on_established(enr),
            SessionEvent::Message { src_id, src, message } => match *message {
                Message::Request { id, body } => self.handle_rpc_request(src, src_id, id, body),
                Message::Response { id, body } => self.handle_rpc_response(src_id, id, body),
            },
            SessionEvent::WhoAreYouRequest { src_id, src, auth_tag } => {
                self.on_who_are_you_request(src_id, src, auth_tag)
            }
            SessionEvent::RequestFailed { src_id, rpc_id } => self.on_request_failed(src_id, rpc_id),
        }
    }

    fn on_established(&mut self, enr: Enr<CombinedKey>) {
        let node_id = enr.node_id();
        self.connection_updated(node_id, Some(enr.clone()), NodeStatus::Connected);
        self.connected_peers.insert(node_id);
        self.ping_timers.arm(node_id, self.config.ping_interval);
        self.send_ping(&enr, false);
    }

    fn send_ping(&mut self, dest: &Enr<CombinedKey>, eviction_challenge: bool) {
        let id = self.next_request_id();
        let body = RequestBody::Ping { enr_seq: self.local_enr.seq() };
        match self.session.send_request(dest, Message::Request { id, body: body.clone() }) {
            Ok(()) => {
                self.active_requests.insert(
                    id,
                    ActiveRequest::Single {
                        node_id: dest.node_id(),
                        request: body,
                        lookup_id: None,
                        eviction_challenge,
                    },
                );
            }
            Err(e) => error!("failed to send keep-alive ping: {}", e),
        }
    }

    fn handle_rpc_request(&mut self, src: SocketAddr, src_id: NodeId, rpc_id: RequestId, body: RequestBody) {
        match body {
            RequestBody::Ping { enr_seq } => self.handle_ping_request(src, src_id, rpc_id, enr_seq),
            RequestBody::FindNode { distance } => self.handle_find_node_request(src, src_id, rpc_id, distance),
        }
    }

    fn handle_ping_request(&mut self, src: SocketAddr, src_id: NodeId, rpc_id: RequestId, enr_seq: u64) {
        let known = self.kbuckets.get_with_pending(&src_id).cloned();
        let needs_enr = match &known {
            Some(enr) => enr.seq() < enr_seq,
            None => true,
        };
        if needs_enr {
            let fresh_id = self.next_request_id();
            let body = RequestBody::FindNode { distance: 0 };
            match self.session.send_request_unknown_enr(
                src,
                &src_id,
                Message::Request { id: fresh_id, body: body.clone() },
            ) {
                Ok(()) => {
                    self.active_requests.insert(
                        fresh_id,
                        ActiveRequest::Single {
                            node_id: src_id,
                            request: body,
                            lookup_id: None,
                            eviction_challenge: false,
                        },
                    );
                }
                Err(e) => warn!("could not request ENR from unknown PING sender: {}", e),
            }
        }
        let pong = ResponseBody::Pong { enr_seq: self.local_enr.seq(), ip: src.ip(), port: src.port() };
        if let Err(e) = self.session.send_response(src, &src_id, Message::Response { id: rpc_id, body: pong }) {
            error!("failed to send PONG: {}", e);
        }
    }

    fn handle_find_node_request(&mut self, src: SocketAddr, _src_id: NodeId, rpc_id: RequestId, distance: u64) {
        if distance == 0 {
            self.send_nodes_response(src, rpc_id, vec![self.local_enr.clone()]);
            return;
        }
        let nodes = self.kbuckets.values_of_distance(distance as usize);
        self.send_nodes_response(src, rpc_id, nodes);
    }

    fn send_nodes_response(&mut self, dst: SocketAddr, rpc_id: RequestId, nodes: Vec<Enr<CombinedKey>>) {
        let chunk_size = self.config.max_nodes_response.max(1);
        let chunks: Vec<Vec<Enr<CombinedKey>>> = if nodes.is_empty() {
            vec![Vec::new()]
        } else {
            nodes.chunks(chunk_size).map(|c| c.to_vec()).collect()
        };
        let total = chunks.len() as u64;
        let local_id = self.local_enr.node_id();
        for chunk in chunks {
            let body = ResponseBody::Nodes { total, nodes: chunk };
            if let Err(e) =
                self.session.send_response(dst, &local_id, Message::Response { id: rpc_id, body })
            {
                error!("failed to send NODES response: {}", e);
            }
        }
    }

    fn handle_rpc_response(&mut self, src_id: NodeId, rpc_id: RequestId, body: ResponseBody) {
        let kind_ok = match self.active_requests.get(&rpc_id) {
            Some(active) => kinds_match(active.request_body(), &body),
            None => {
                warn!("response for unknown or already-resolved request {}", rpc_id);
                return;
            }
        };
        if !kind_ok {
            warn!("response kind does not match outstanding request; discarding");
            self.active_requests.remove(&rpc_id);
            return;
        }
        match body {
            ResponseBody::Pong { enr_seq, ip, port } => {
                if let Some(ActiveRequest::Single { eviction_challenge, .. }) =
                    self.active_requests.remove(&rpc_id)
                {
                    if eviction_challenge {
                        self.kbuckets.discard_pending(&src_id);
                    }
                }
                self.handle_pong(src_id, enr_seq, ip, port);
            }
            ResponseBody::Nodes { total, nodes } => self.handle_nodes_response(rpc_id, src_id, total, nodes),
        }
    }

    fn handle_pong(&mut self, src_id: NodeId, enr_seq: u64, ip: std::net::IpAddr, _port: u16) {
        self.ip_votes.record(src_id, ip);
        let needs_refresh = self
            .kbuckets
            .get_value(&src_id)
            .map(|enr| enr.seq() < enr_seq)
            .unwrap_or(false);
        if needs_refresh {
            if let Some(dest) = self.kbuckets.get_value(&src_id).cloned() {
                let id = self.next_request_id();
                let body = RequestBody::FindNode { distance: 0 };
                if let Ok(()) = self.session.send_request(&dest, Message::Request { id, body: body.clone() }) {
                    self.active_requests.insert(
                        id,
                        ActiveRequest::Single {
                            node_id: src_id,
                            request: body,
                            lookup_id: None,
                            eviction_challenge: false,
                        },
                    );
                }
            }
        }
        self.connection_updated(src_id, None, NodeStatus::Connected);
    }

    fn handle_nodes_response(&mut self, rpc_id: RequestId, src_id: NodeId, total: u64, nodes: Vec<Enr<CombinedKey>>) {
        let active = match self.active_requests.remove(&rpc_id) {
            Some(a) => a,
            None => return,
        };
        match active {
            ActiveRequest::Single { node_id, request, lookup_id, .. } => {
                if node_id != src_id {
                    warn!("NODES response for request {} arrived from an unexpected sender", rpc_id);
                }
                let nodes = self.filter_by_requested_distance(&request, nodes);
                if total > 1 {
                    self.active_requests.insert(
                        rpc_id,
                        ActiveRequest::PartialNodes {
                            node_id,
                            request,
                            lookup_id,
                            total,
                            count: 1,
                            enrs: nodes,
                        },
                    );
                    return;
                }
                self.finalize_discovered(node_id, lookup_id, nodes);
            }
            ActiveRequest::PartialNodes { node_id, request, lookup_id, total, mut count, mut enrs } => {
                if node_id != src_id {
                    warn!("NODES response for request {} arrived from an unexpected sender", rpc_id);
                }
                enrs.extend(self.filter_by_requested_distance(&request, nodes));
                count += 1;
                if count < total.min(MAX_NODES_PACKETS) {
                    self.active_requests.insert(
                        rpc_id,
                        ActiveRequest::PartialNodes { node_id, request, lookup_id, total, count, enrs },
                    );
                    return;
                }
                self.finalize_discovered(node_id, lookup_id, enrs);
            }
        }
    }

    /// Drops every ENR whose log2-distance from the local id does not match
    /// the distance named by the originating FINDNODE, per the NODES
    /// accumulation rule that distance-mismatched entries are silently
    /// filtered. A `distance` of 0 (the "my own ENR" probe) is exempt: the
    /// single entry a FINDNODE-0 expects is the responder's own record, not
    /// something at log2-distance 0 from us.
    fn filter_by_requested_distance(&self, request: &RequestBody, nodes: Vec<Enr<CombinedKey>>) -> Vec<Enr<CombinedKey>> {
        let distance = match request {
            RequestBody::FindNode { distance } => *distance,
            RequestBody::Ping { .. } => return nodes,
        };
        if distance == 0 {
            return nodes;
        }
        let local = Key::from(self.local_enr.node_id());
        nodes
            .into_iter()
            .filter(|enr| {
                let matches = Key::from(enr.node_id()).log2_distance(&local) == Some(distance as usize);
                if !matches {
                    warn!("dropping ENR {:?} at unexpected distance from requested {}", enr.node_id(), distance);
                }
                matches
            })
            .collect()
    }

    /// Ingests a batch of ENRs learned from `node_id` (a FINDNODE answer),
    /// emitting `discovered`, refreshing known entries, and feeding fresh
    /// node ids back into the originating lookup, if any.
    fn finalize_discovered(&mut self, node_id: NodeId, lookup_id: Option<LookupId>, enrs: Vec<Enr<CombinedKey>>) {
        let local_id = self.local_enr.node_id();
        let mut fresh_ids = Vec::new();
        for enr in enrs {
            if enr.node_id() == local_id {
                continue;
            }
            if self.config.report_discovered_peers {
                self.push_event(Discv5Event::Discovered(enr.clone()));
            }
            let mut already_known = false;
            match self.kbuckets.entry(&enr.node_id()) {
                KEntry::Present(value, _) | KEntry::Pending(value, _) => {
                    already_known = true;
                    if value.seq() < enr.seq() {
                        *value = enr.clone();
                    }
                }
                KEntry::Absent | KEntry::SelfEntry => {}
            }
            self.session.update_enr(enr.clone());
            if let Some(id) = lookup_id {
                fresh_ids.push(enr.node_id());
                if !already_known {
                    if let Some(buf) = self.lookup_untrusted.get_mut(&id) {
                        if !buf.iter().any(|seen| seen.node_id() == enr.node_id()) {
                            buf.push(enr);
                        }
                    }
                }
            }
        }
        if let Some(id) = lookup_id {
            if let Some(lookup) = self.lookups.get_mut(&id) {
                lookup.on_success(&node_id, fresh_ids);
            }
        }
    }

    fn on_who_are_you_request(&mut self, src_id: NodeId, src: SocketAddr, auth_tag: AuthTag) {
        let enr = self.find_enr(None, &src_id);
        let enr_seq = enr.as_ref().map(|e| e.seq()).unwrap_or(0);
        self.session.send_who_are_you(src, &src_id, enr_seq, enr, auth_tag);
    }

    fn on_request_failed(&mut self, src_id: NodeId, rpc_id: RequestId) {
        match self.active_requests.remove(&rpc_id) {
            Some(ActiveRequest::PartialNodes { node_id, lookup_id, enrs, .. }) if !enrs.is_empty() => {
                self.finalize_discovered(node_id, lookup_id, enrs);
            }
            Some(ActiveRequest::PartialNodes { lookup_id, .. }) => {
                if let Some(id) = lookup_id {
                    if let Some(lookup) = self.lookups.get_mut(&id) {
                        lookup.on_failure(&src_id);
                    }
                }
            }
            Some(ActiveRequest::Single { lookup_id, eviction_challenge, .. }) => {
                if eviction_challenge {
                    if let Some(applied) = self.kbuckets.apply_pending(&src_id) {
                        if let Some(inserted_enr) = self.kbuckets.get_value(applied.inserted.preimage()).cloned() {
                            self.push_event(Discv5Event::EnrAdded {
                                inserted: inserted_enr,
                                evicted: applied.evicted.map(|n| n.value),
                            });
                        }
                    }
                }
                if let Some(id) = lookup_id {
                    if let Some(lookup) = self.lookups.get_mut(&id) {
                        lookup.on_failure(&src_id);
                    }
                }
            }
            None => {}
        }
        self.connection_updated(src_id, None, NodeStatus::Disconnected);
        self.ping_timers.cancel(&src_id);
        self.connected_peers.remove(&src_id);
    }

    /// Writes `enr` (if given) into an existing entry and always moves it to
    /// most-recently-seen under `status`; a brand new `Connected` entry is
    /// inserted directly, triggering the eviction protocol if its bucket is
    /// full.
    fn connection_updated(&mut self, node_id: NodeId, enr: Option<Enr<CombinedKey>>, status: NodeStatus) {
        match self.kbuckets.entry(&node_id) {
            KEntry::Present(value, _) | KEntry::Pending(value, _) => {
                if let Some(e) = enr {
                    *value = e;
                }
            }
            KEntry::Absent => {
                if status == NodeStatus::Connected {
                    if let Some(e) = enr {
                        if (self.config.table_filter)(&e) {
                            let cloned = e.clone();
                            match self.kbuckets.add(e, status) {
                                InsertResult::Inserted => {
                                    self.push_event(Discv5Event::EnrAdded { inserted: cloned, evicted: None });
                                }
                                InsertResult::Pending { disconnected } => {
                                    if let Some(victim) =
                                        self.kbuckets.get_value(disconnected.preimage()).cloned()
                                    {
                                        self.send_ping(&victim, true);
                                    }
                                }
                                InsertResult::Full => {}
                            }
                        }
                    }
                }
                return;
            }
            KEntry::SelfEntry => return,
        }
        self.kbuckets.update_status(&node_id, status);
    }

    /// Resolves `node_id` to an ENR via the routing table, falling back to a
    /// lookup's untrusted buffer (or, with no lookup named, every lookup's
    /// buffer) when the table has nothing.
    fn find_enr(&self, lookup_id: Option<LookupId>, node_id: &NodeId) -> Option<Enr<CombinedKey>> {
        if let Some(enr) = self.kbuckets.get_with_pending(node_id) {
            return Some(enr.clone());
        }
        match lookup_id {
            Some(id) => self
                .lookup_untrusted
                .get(&id)
                .and_then(|buf| buf.iter().find(|e| e.node_id() == *node_id))
                .cloned(),
            None => self
                .lookup_untrusted
                .values()
                .flatten()
                .find(|e| e.node_id() == *node_id)
                .cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockSession;

    fn make_enr() -> Enr<CombinedKey> {
        let key = CombinedKey::generate_secp256k1();
        Enr::builder().build(&key).unwrap()
    }

    fn make_service() -> Discv5<MockSession> {
        let local_enr = make_enr();
        let session = MockSession::new(local_enr.clone());
        Discv5::new(local_enr, session, Discv5Config::default())
    }

    #[tokio::test]
    async fn add_enr_inserts_disconnected_and_emits_event() {
        let mut service = make_service();
        let enr = make_enr();
        service.add_enr(enr.clone()).unwrap();
        assert_eq!(service.kbuckets().get_value(&enr.node_id()), Some(&enr));
        let event = service.next_event().await;
        assert!(matches!(event, Some(Discv5Event::EnrAdded { .. })));
    }

    #[tokio::test]
    async fn find_node_rejects_local_target() {
        let mut service = make_service();
        service.started = true;
        let local_id = service.local_enr().node_id();
        let err = service.find_node(local_id).await.unwrap_err();
        assert!(matches!(err, Discv5Error::SearchForLocalIdForbidden));
    }
}
