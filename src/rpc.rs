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

//! Plain in-memory request/response values exchanged with the session
//! service. Encoding, signing and encryption are the session service's job;
//! this crate never serializes a [`Message`].

use enr::{CombinedKey, Enr};
use std::net::IpAddr;

/// Identifies an outbound request and the response(s) that answer it. Chosen
/// by the sender; the session service is trusted to keep it unique among
/// requests in flight to a given peer.
pub type RequestId = u64;

/// The body of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// A liveness probe, carrying the sender's own ENR sequence number.
    Ping { enr_seq: u64 },
    /// A request for peers at the given log2-distance from the recipient.
    /// `distance == 0` asks the recipient for its own record.
    FindNode { distance: u64 },
}

/// The body of an inbound response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Answers a `Ping`, carrying the responder's ENR sequence number and
    /// its view of the caller's externally observed address.
    Pong {
        enr_seq: u64,
        ip: IpAddr,
        port: u16,
    },
    /// Answers a `FindNode`, possibly split across several packets sharing
    /// the same request id; `total` names how many packets make up the
    /// complete answer.
    Nodes {
        total: u64,
        nodes: Vec<Enr<CombinedKey>>,
    },
}

/// A decoded message as delivered by the session service, already matched to
/// a direction (request we must answer, or response to a request we sent).
#[derive(Debug, Clone)]
pub enum Message {
    Request { id: RequestId, body: RequestBody },
    Response { id: RequestId, body: ResponseBody },
}

impl Message {
    pub fn id(&self) -> RequestId {
        match self {
            Message::Request { id, .. } => *id,
            Message::Response { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request { body: RequestBody::Ping { .. }, .. } => MessageKind::Ping,
            Message::Request { body: RequestBody::FindNode { .. }, .. } => MessageKind::FindNode,
            Message::Response { body: ResponseBody::Pong { .. }, .. } => MessageKind::Pong,
            Message::Response { body: ResponseBody::Nodes { .. }, .. } => MessageKind::Nodes,
        }
    }
}

/// The four message kinds named by the wire protocol. Used to check that an
/// inbound response answers the request kind it claims to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Ping,
    Pong,
    FindNode,
    Nodes,
}

/// `true` iff `response` is a legal answer to `request`: PING↔PONG,
/// FINDNODE↔NODES. Any other pairing is a mismatch and the caller should
/// discard the response without further action.
pub fn kinds_match(request: &RequestBody, response: &ResponseBody) -> bool {
    matches!(
        (request, response),
        (RequestBody::Ping { .. }, ResponseBody::Pong { .. })
            | (RequestBody::FindNode { .. }, ResponseBody::Nodes { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_only_matches_pong() {
        let ping = RequestBody::Ping { enr_seq: 1 };
        let pong = ResponseBody::Pong { enr_seq: 1, ip: "127.0.0.1".parse().unwrap(), port: 9000 };
        let nodes = ResponseBody::Nodes { total: 1, nodes: vec![] };
        assert!(kinds_match(&ping, &pong));
        assert!(!kinds_match(&ping, &nodes));
    }

    #[test]
    fn findnode_only_matches_nodes() {
        let find = RequestBody::FindNode { distance: 250 };
        let nodes = ResponseBody::Nodes { total: 1, nodes: vec![] };
        let pong = ResponseBody::Pong { enr_seq: 1, ip: "127.0.0.1".parse().unwrap(), port: 9000 };
        assert!(kinds_match(&find, &nodes));
        assert!(!kinds_match(&find, &pong));
    }
}
