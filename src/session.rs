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

//! The interface to the session/encryption layer. This crate never implements
//! a handshake, an AEAD, or UDP I/O itself: it only ever talks to something
//! shaped like [`SessionService`].

use crate::error::Discv5Error;
use crate::rpc::Message;
use async_trait::async_trait;
use enr::{CombinedKey, Enr, NodeId};
use std::net::SocketAddr;

/// A 12-byte nonce identifying an encrypted session frame, carried by a
/// WHOAREYOU challenge so the challenged peer can prove knowledge of the
/// session it names.
pub type AuthTag = [u8; 12];

/// The five event streams the session service emits to the core reactor.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session with `enr` has been established.
    Established(Enr<CombinedKey>),
    /// A decrypted message has arrived from `src_id` at `src`.
    Message {
        src_id: NodeId,
        src: SocketAddr,
        message: Box<Message>,
    },
    /// `src_id` has sent a frame the session layer could not decrypt; the
    /// core is asked to hand back its best known ENR for a WHOAREYOU reply.
    WhoAreYouRequest {
        src_id: NodeId,
        src: SocketAddr,
        auth_tag: AuthTag,
    },
    /// The outbound request tagged `rpc_id` to `src_id` could not be
    /// completed (timeout, or the underlying session dropped).
    RequestFailed { src_id: NodeId, rpc_id: u64 },
}

/// The session/encryption layer, as seen by the core. A real implementation
/// performs the WHOAREYOU handshake and AEAD sealing; this crate only ever
/// calls the methods below and consumes [`SessionEvent`]s via
/// [`SessionService::next_event`].
#[async_trait]
pub trait SessionService: Send {
    /// Begins accepting and processing session traffic.
    async fn start(&mut self) -> Result<(), Discv5Error>;

    /// Stops accepting traffic; idempotent.
    async fn stop(&mut self);

    /// Awaits the next event. Returns `None` once the service has shut down
    /// and no further events will be produced.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Sends `request` to `dest`, over an established session if one exists.
    /// May fail synchronously if the session layer cannot hand off the send.
    fn send_request(&mut self, dest: &Enr<CombinedKey>, request: Message) -> Result<(), Discv5Error>;

    /// Sends `response` to `src_id` at `src`, over the session that produced
    /// the originating request.
    fn send_response(
        &mut self,
        src: SocketAddr,
        src_id: &NodeId,
        response: Message,
    ) -> Result<(), Discv5Error>;

    /// Sends `request` to a peer with no prior ENR (and therefore no prior
    /// session), e.g. to recover an ENR for an unknown PING sender.
    fn send_request_unknown_enr(
        &mut self,
        src: SocketAddr,
        node_id: &NodeId,
        request: Message,
    ) -> Result<(), Discv5Error>;

    /// Answers a [`SessionEvent::WhoAreYouRequest`] with the core's best
    /// known ENR for `src_id` (`None` if unknown).
    fn send_who_are_you(
        &mut self,
        src: SocketAddr,
        src_id: &NodeId,
        enr_seq: u64,
        enr: Option<Enr<CombinedKey>>,
        auth_tag: AuthTag,
    );

    /// Informs the session layer of a newer ENR for a peer, so any live
    /// session can refresh its address/key material.
    fn update_enr(&mut self, enr: Enr<CombinedKey>);

    /// The local node's own record.
    fn enr(&self) -> &Enr<CombinedKey>;

    /// Replaces the local node's own record.
    fn set_enr(&mut self, enr: Enr<CombinedKey>);
}

#[cfg(test)]
pub mod mock {
    //! An in-memory [`SessionService`] test double. No socket, no
    //! cryptography: a test drives it by pushing [`SessionEvent`]s through
    //! [`MockSession::push_event`] and inspects [`MockSession::sent`] for
    //! what the core handed it to send.

    use super::*;
    use tokio::sync::mpsc;

    /// A request or response the core asked the mock to deliver.
    #[derive(Debug, Clone)]
    pub enum SentItem {
        Request { dest: Enr<CombinedKey>, message: Message },
        Response { src_id: NodeId, message: Message },
        RequestUnknownEnr { node_id: NodeId, message: Message },
        WhoAreYou { src_id: NodeId, enr_seq: u64, enr: Option<Enr<CombinedKey>> },
    }

    pub struct MockSession {
        enr: Enr<CombinedKey>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        sent: Vec<SentItem>,
        fail_sends: bool,
    }

    impl MockSession {
        pub fn new(enr: Enr<CombinedKey>) -> Self {
            let (event_tx, events) = mpsc::unbounded_channel();
            MockSession { enr, events, event_tx, sent: vec![], fail_sends: false }
        }

        /// Feeds `event` to the core as if it had arrived from the network.
        pub fn push_event(&self, event: SessionEvent) {
            let _ = self.event_tx.send(event);
        }

        /// Everything the core has asked this mock to send, in order.
        pub fn sent(&self) -> &[SentItem] {
            &self.sent
        }

        /// Makes every subsequent send-path call fail synchronously, to
        /// exercise the `Discv5Error::SessionServiceError` path.
        pub fn fail_sends(&mut self, fail: bool) {
            self.fail_sends = fail;
        }
    }

    #[async_trait]
    impl SessionService for MockSession {
        async fn start(&mut self) -> Result<(), Discv5Error> {
            Ok(())
        }

        async fn stop(&mut self) {
            self.events.close();
        }

        async fn next_event(&mut self) -> Option<SessionEvent> {
            self.events.recv().await
        }

        fn send_request(&mut self, dest: &Enr<CombinedKey>, request: Message) -> Result<(), Discv5Error> {
            if self.fail_sends {
                return Err(Discv5Error::SessionServiceError("mock send failure".into()));
            }
            self.sent.push(SentItem::Request { dest: dest.clone(), message: request });
            Ok(())
        }

        fn send_response(
            &mut self,
            _src: SocketAddr,
            src_id: &NodeId,
            response: Message,
        ) -> Result<(), Discv5Error> {
            if self.fail_sends {
                return Err(Discv5Error::SessionServiceError("mock send failure".into()));
            }
            self.sent.push(SentItem::Response { src_id: *src_id, message: response });
            Ok(())
        }

        fn send_request_unknown_enr(
            &mut self,
            _src: SocketAddr,
            node_id: &NodeId,
            request: Message,
        ) -> Result<(), Discv5Error> {
            if self.fail_sends {
                return Err(Discv5Error::SessionServiceError("mock send failure".into()));
            }
            self.sent.push(SentItem::RequestUnknownEnr { node_id: *node_id, message: request });
            Ok(())
        }

        fn send_who_are_you(
            &mut self,
            _src: SocketAddr,
            src_id: &NodeId,
            enr_seq: u64,
            enr: Option<Enr<CombinedKey>>,
            _auth_tag: AuthTag,
        ) {
            self.sent.push(SentItem::WhoAreYou { src_id: *src_id, enr_seq, enr });
        }

        fn update_enr(&mut self, _enr: Enr<CombinedKey>) {}

        fn enr(&self) -> &Enr<CombinedKey> {
            &self.enr
        }

        fn set_enr(&mut self, enr: Enr<CombinedKey>) {
            self.enr = enr;
        }
    }

    #[tokio::test]
    async fn push_event_round_trips_through_next_event() {
        let key = CombinedKey::generate_secp256k1();
        let enr = Enr::builder().build(&key).unwrap();
        let mut mock = MockSession::new(enr.clone());
        mock.push_event(SessionEvent::Established(enr.clone()));
        match mock.next_event().await {
            Some(SessionEvent::Established(got)) => assert_eq!(got, enr),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_sends_surface_as_session_service_error() {
        let key = CombinedKey::generate_secp256k1();
        let enr = Enr::builder().build(&key).unwrap();
        let mut mock = MockSession::new(enr.clone());
        mock.fail_sends(true);
        let ping = Message::Request { id: 1, body: crate::rpc::RequestBody::Ping { enr_seq: 1 } };
        assert!(mock.send_request(&enr, ping).is_err());
        assert!(mock.sent().is_empty());
    }
}
