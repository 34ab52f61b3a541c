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

//! A Kademlia-style routing table, iterative lookup engine and
//! request/response reactor for the discv5 peer discovery protocol.
//!
//! This crate owns none of the wire format, cryptography or UDP I/O: a host
//! application wires up a [`session::SessionService`] implementation that
//! performs the WHOAREYOU handshake and packet encryption/decryption, and
//! drives the [`service::Discv5`] reactor against it.

mod config;
mod error;
mod kbucket;
mod query;
mod rpc;
mod service;
mod session;
mod timers;

pub use config::{Discv5Config, Discv5ConfigBuilder};
pub use error::Discv5Error;
pub use kbucket::{Key as NodeKey, KBucketsTable, NodeStatus};
pub use query::{LookupConfig, LookupId};
pub use rpc::{Message, MessageKind, RequestBody, RequestId, ResponseBody};
pub use service::{Discv5, Discv5Event};
pub use session::{AuthTag, SessionEvent, SessionService};

pub use enr::{CombinedKey, Enr, NodeId};
