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

//! A set of configuration parameters to tune the reactor and lookup engine.

use enr::{CombinedKey, Enr};
use std::time::Duration;

/// Accepts every ENR; the default `table_filter`.
fn accept_all(_enr: &Enr<CombinedKey>) -> bool {
    true
}

/// Tunable parameters for the reactor and lookup engine, built once via
/// [`Discv5ConfigBuilder`] and immutable for the lifetime of the service.
#[derive(Clone)]
pub struct Discv5Config {
    /// How long to wait for a response before the session service reports
    /// `requestFailed`. Default: 1 second.
    pub request_timeout: Duration,

    /// The interval between keep-alive pings to a connected peer. Default:
    /// 300 seconds.
    pub ping_interval: Duration,

    /// The maximum number of ENRs returned per NODES packet; used to compute
    /// how a FINDNODE answer is split across packets. Default: 3 (matching
    /// `nodesPerPacket` at the wire-visible packet/record size constants).
    pub max_nodes_response: usize,

    /// The number of peers probed in parallel during a lookup. Default: 3.
    pub query_parallelism: usize,

    /// The number of closest peers a lookup converges on. Default: 16.
    pub query_num_results: usize,

    /// How long an IP vote is remembered before expiring. Default: 2 minutes.
    pub ip_vote_timeout: Duration,

    /// The number of peers who must agree on an external address before it
    /// would be adopted into the local ENR. Stored for forward
    /// compatibility; the aggregation path that would consume it is not
    /// implemented (see the crate's design notes on IP-vote aggregation).
    pub enr_peer_update_min: usize,

    /// Whether `discovered` events are emitted for ENRs seen while servicing
    /// lookups. Default: true.
    pub report_discovered_peers: bool,

    /// A filter deciding whether a candidate ENR may enter the routing
    /// table. Default: accepts everything.
    pub table_filter: fn(&Enr<CombinedKey>) -> bool,
}

impl Default for Discv5Config {
    fn default() -> Self {
        Discv5Config {
            request_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(300),
            max_nodes_response: 3,
            query_parallelism: 3,
            query_num_results: 16,
            ip_vote_timeout: Duration::from_secs(120),
            enr_peer_update_min: 10,
            report_discovered_peers: true,
            table_filter: accept_all,
        }
    }
}

/// Fluent builder for [`Discv5Config`].
#[derive(Clone, Default)]
pub struct Discv5ConfigBuilder {
    config: Discv5Config,
}

impl Discv5ConfigBuilder {
    pub fn new() -> Self {
        Discv5ConfigBuilder { config: Discv5Config::default() }
    }

    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn ping_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn max_nodes_response(&mut self, max: usize) -> &mut Self {
        self.config.max_nodes_response = max;
        self
    }

    pub fn query_parallelism(&mut self, parallelism: usize) -> &mut Self {
        self.config.query_parallelism = parallelism;
        self
    }

    pub fn query_num_results(&mut self, num_results: usize) -> &mut Self {
        self.config.query_num_results = num_results;
        self
    }

    pub fn ip_vote_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.ip_vote_timeout = timeout;
        self
    }

    pub fn enr_peer_update_min(&mut self, min: usize) -> &mut Self {
        self.config.enr_peer_update_min = min;
        self
    }

    pub fn report_discovered_peers(&mut self, report: bool) -> &mut Self {
        self.config.report_discovered_peers = report;
        self
    }

    pub fn table_filter(&mut self, filter: fn(&Enr<CombinedKey>) -> bool) -> &mut Self {
        self.config.table_filter = filter;
        self
    }

    pub fn build(&self) -> Discv5Config {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_visible_constants() {
        let config = Discv5Config::default();
        assert_eq!(config.query_parallelism, 3);
        assert_eq!(config.query_num_results, 16);
        assert_eq!(config.ping_interval, Duration::from_secs(300));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Discv5ConfigBuilder::new()
            .query_num_results(8)
            .request_timeout(Duration::from_millis(500))
            .build();
        assert_eq!(config.query_num_results, 8);
        assert_eq!(config.request_timeout, Duration::from_millis(500));
    }
}
