// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! One TCP stream to one switch: framing, send queue, pending requests.

use crate::{ControllerError, DatapathId};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use wire::messages::{
    BarrierRequest, Echo, FeaturesRequest, FlowMod, GetConfigRequest, GroupMod, MultipartRequest,
    PacketOut, SetConfig, SwitchConfig, SwitchFeatures, pack_barrier_request, pack_echo_request,
    pack_features_request, pack_flow_mod, pack_get_config_request, pack_group_mod,
    pack_multipart_request, pack_packet_out, pack_set_config,
};
use wire::{Buffer, Header, Message, OFP_HEADER_LEN, WireError, XidGen};

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// TCP established, nothing sent yet.
    Connected,
    /// Our `hello` is queued.
    HelloSent,
    /// Peer `hello` seen and version agreed.
    HelloReceived,
    /// Our `features_request` is queued.
    FeaturesRequested,
    /// `features_reply` stored; the datapath is usable.
    Ready,
    /// Fatal error or EOF; being torn down.
    Closing,
}

/// Why a pending request's continuation fired without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
}

/// What kind of reply a pending request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Features,
    GetConfig,
    Multipart,
    Barrier,
    Echo,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Pending {
    pub(crate) kind: PendingKind,
    pub(crate) deadline: Instant,
}

/// What reading produced; messages are dispatched one at a time in wire
/// order by the controller.
pub(crate) enum ReadOutcome {
    Messages(Vec<Message>),
    /// Peer closed or the stream failed; tear the connection down.
    Closed,
}

/// A connection to one switch, owned by the controller run loop.
///
/// Application handlers reach it through [`crate::AppCtx::switch`] and use
/// the `send_*`/`request_*` methods; everything else is driven by the run
/// loop.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    stage: HandshakeStage,
    dpid: Option<DatapathId>,
    features: Option<SwitchFeatures>,
    read_buf: Vec<u8>,
    send_queue: VecDeque<Buffer>,
    /// Bytes of the queue head already written.
    write_cursor: usize,
    max_send_queue: usize,
    request_timeout: Duration,
    xids: XidGen,
    pending: ahash::AHashMap<u32, Pending>,
    last_activity: Instant,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        max_send_queue: usize,
        request_timeout: Duration,
    ) -> Connection {
        Connection {
            stream,
            peer,
            stage: HandshakeStage::Connected,
            dpid: None,
            features: None,
            read_buf: Vec::with_capacity(4096),
            send_queue: VecDeque::new(),
            write_cursor: 0,
            max_send_queue,
            request_timeout,
            xids: XidGen::new(),
            pending: ahash::AHashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// Peer address, for logs.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Datapath id, known once the handshake completed.
    #[must_use]
    pub fn dpid(&self) -> Option<DatapathId> {
        self.dpid
    }

    /// Switch features from the handshake's `features_reply`.
    #[must_use]
    pub fn features(&self) -> Option<SwitchFeatures> {
        self.features
    }

    /// Current handshake stage.
    #[must_use]
    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    /// Instant of the last byte received.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn set_stage(&mut self, stage: HandshakeStage) {
        trace!(peer = %self.peer, ?stage, "handshake stage");
        self.stage = stage;
    }

    pub(crate) fn set_identity(&mut self, dpid: DatapathId, features: SwitchFeatures) {
        self.dpid = Some(dpid);
        self.features = Some(features);
    }

    pub(crate) fn xids_mut(&mut self) -> &mut XidGen {
        &mut self.xids
    }

    // --- send path -----------------------------------------------------

    /// Enqueue a prebuilt message buffer.
    ///
    /// Bytes appear on the wire in enqueue order; the write happens
    /// opportunistically here and resumes on WRITABLE readiness.
    ///
    /// # Errors
    ///
    /// [`ControllerError::SendQueueFull`] when the bounded queue is full —
    /// the run loop treats that as fatal for this connection — and
    /// [`ControllerError::Closing`] once teardown started.
    pub fn send_raw(&mut self, buf: Buffer) -> Result<(), ControllerError> {
        if self.stage == HandshakeStage::Closing {
            return Err(ControllerError::Closing);
        }
        if self.send_queue.len() >= self.max_send_queue {
            return Err(ControllerError::SendQueueFull(self.max_send_queue));
        }
        self.send_queue.push_back(buf);
        // opportunistic flush; a WouldBlock simply leaves bytes queued
        let _ = self.flush();
        Ok(())
    }

    /// Build and enqueue a `flow_mod`.
    pub fn send_flow_mod(&mut self, options: &FlowMod) -> Result<u32, ControllerError> {
        let buf = pack_flow_mod(options, &mut self.xids);
        let xid = header_xid(&buf);
        self.send_raw(buf)?;
        Ok(xid)
    }

    /// Build and enqueue a `group_mod`.
    pub fn send_group_mod(&mut self, options: &GroupMod) -> Result<u32, ControllerError> {
        let buf = pack_group_mod(options, &mut self.xids);
        let xid = header_xid(&buf);
        self.send_raw(buf)?;
        Ok(xid)
    }

    /// Build and enqueue a `packet_out`.
    pub fn send_packet_out(&mut self, options: &PacketOut) -> Result<u32, ControllerError> {
        let buf = pack_packet_out(options, &mut self.xids);
        let xid = header_xid(&buf);
        self.send_raw(buf)?;
        Ok(xid)
    }

    /// Build and enqueue a `set_config`.
    pub fn send_set_config(&mut self, config: SwitchConfig) -> Result<u32, ControllerError> {
        let buf = pack_set_config(&SetConfig { xid: None, config }, &mut self.xids);
        let xid = header_xid(&buf);
        self.send_raw(buf)?;
        Ok(xid)
    }

    /// Send a `features_request` and track the reply.
    pub fn request_features(&mut self) -> Result<u32, ControllerError> {
        let buf = pack_features_request(&FeaturesRequest { xid: None }, &mut self.xids);
        self.send_tracked(buf, PendingKind::Features)
    }

    /// Send a `get_config_request` and track the reply.
    pub fn request_get_config(&mut self) -> Result<u32, ControllerError> {
        let buf = pack_get_config_request(&GetConfigRequest { xid: None }, &mut self.xids);
        self.send_tracked(buf, PendingKind::GetConfig)
    }

    /// Send a `multipart_request` and track the reply.
    pub fn request_multipart(
        &mut self,
        options: &MultipartRequest,
    ) -> Result<u32, ControllerError> {
        let buf = pack_multipart_request(options, &mut self.xids);
        self.send_tracked(buf, PendingKind::Multipart)
    }

    /// Send a `barrier_request` and track the reply.
    pub fn request_barrier(&mut self) -> Result<u32, ControllerError> {
        let buf = pack_barrier_request(&BarrierRequest { xid: None }, &mut self.xids);
        self.send_tracked(buf, PendingKind::Barrier)
    }

    /// Send an `echo_request` and track the reply.
    pub fn request_echo(&mut self, data: Vec<u8>) -> Result<u32, ControllerError> {
        let buf = pack_echo_request(&Echo { xid: None, data }, &mut self.xids);
        self.send_tracked(buf, PendingKind::Echo)
    }

    fn send_tracked(&mut self, buf: Buffer, kind: PendingKind) -> Result<u32, ControllerError> {
        let xid = header_xid(&buf);
        self.send_raw(buf)?;
        self.pending.insert(
            xid,
            Pending {
                kind,
                deadline: Instant::now() + self.request_timeout,
            },
        );
        Ok(xid)
    }

    /// Write queued buffers until empty or the socket would block.
    ///
    /// # Errors
    ///
    /// A genuine write error is fatal for the connection.
    pub(crate) fn flush(&mut self) -> Result<(), std::io::Error> {
        while let Some(front) = self.send_queue.front() {
            let bytes = front.as_ref();
            match self.stream.write(&bytes[self.write_cursor..]) {
                Ok(written) => {
                    self.write_cursor += written;
                    if self.write_cursor == bytes.len() {
                        self.send_queue.pop_front();
                        self.write_cursor = 0;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// True when unsent bytes remain and WRITABLE interest is needed.
    pub(crate) fn wants_write(&self) -> bool {
        !self.send_queue.is_empty()
    }

    // --- receive path --------------------------------------------------

    /// Read until the socket would block and peel complete messages.
    ///
    /// A message that fails to decode is skipped (its wire length is
    /// trusted for resynchronization) and reported via `bad`; the caller
    /// answers with an error message. Header-level garbage closes the
    /// connection.
    pub(crate) fn handle_readable(&mut self, bad: &mut Vec<(u32, WireError)>) -> ReadOutcome {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed");
                    return ReadOutcome::Closed;
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(peer = %self.peer, %err, "read failed");
                    return ReadOutcome::Closed;
                }
            }
        }

        let mut messages = Vec::new();
        let mut at = 0;
        while let Some(length) = Header::peek_length(&self.read_buf[at..]) {
            let length = usize::from(length);
            if length < OFP_HEADER_LEN {
                warn!(peer = %self.peer, length, "header length below minimum");
                return ReadOutcome::Closed;
            }
            if self.read_buf.len() - at < length {
                break;
            }
            let frame = &self.read_buf[at..at + length];
            match Message::decode(frame) {
                Ok((message, _)) => messages.push(message),
                Err(err) => {
                    warn!(peer = %self.peer, %err, "dropping malformed message");
                    let xid = Header::decode(frame).map(|h| h.xid).unwrap_or(0);
                    bad.push((xid, err));
                }
            }
            at += length;
        }
        self.read_buf.drain(..at);
        ReadOutcome::Messages(messages)
    }

    // --- pending-request table -----------------------------------------

    pub(crate) fn take_pending(&mut self, xid: u32) -> Option<Pending> {
        self.pending.remove(&xid)
    }

    pub(crate) fn touch_pending(&mut self, xid: u32) {
        let deadline = Instant::now() + self.request_timeout;
        if let Some(pending) = self.pending.get_mut(&xid) {
            pending.deadline = deadline;
        }
    }

    /// Remove and return entries whose deadline passed.
    pub(crate) fn sweep_pending(&mut self, now: Instant) -> Vec<(u32, PendingKind)> {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(&xid, _)| xid)
            .collect();
        expired
            .into_iter()
            .filter_map(|xid| self.pending.remove(&xid).map(|p| (xid, p.kind)))
            .collect()
    }

    /// Drop every pending entry; used at teardown to fire
    /// [`RequestError::ConnectionClosed`] continuations.
    pub(crate) fn drain_pending(&mut self) -> Vec<(u32, PendingKind)> {
        self.pending.drain().map(|(xid, p)| (xid, p.kind)).collect()
    }
}

fn header_xid(buf: &Buffer) -> u32 {
    // builders always produce a valid header
    Header::decode(buf.as_ref()).map(|h| h.xid).unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};

    fn socketpair() -> (TcpStream, StdStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn test_connection() -> (Connection, StdStream) {
        let (stream, peer) = socketpair();
        let addr = peer.local_addr().unwrap();
        (
            Connection::new(stream, addr, 4, Duration::from_secs(5)),
            peer,
        )
    }

    #[test]
    fn send_queue_overflow_is_reported() {
        let (mut conn, _peer) = test_connection();
        // stuff the queue with more than max_send_queue large unsendable buffers
        let big = Buffer::from_slice(&vec![0u8; 1 << 20]);
        let mut overflowed = false;
        for _ in 0..64 {
            if let Err(ControllerError::SendQueueFull(4)) = conn.send_raw(big.clone()) {
                overflowed = true;
                break;
            }
        }
        assert!(overflowed);
    }

    #[test]
    fn reassembles_partial_reads() {
        let (mut conn, mut peer) = test_connection();
        let mut xids = XidGen::new();
        let msg = wire::messages::pack_echo_request(
            &Echo {
                xid: Some(9),
                data: b"abcdef".to_vec(),
            },
            &mut xids,
        );
        let bytes = msg.as_ref();

        // first half, then the rest
        peer.write_all(&bytes[..5]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let mut bad = Vec::new();
        let ReadOutcome::Messages(first) = conn.handle_readable(&mut bad) else {
            panic!("unexpected close");
        };
        assert!(first.is_empty());

        peer.write_all(&bytes[5..]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let ReadOutcome::Messages(second) = conn.handle_readable(&mut bad) else {
            panic!("unexpected close");
        };
        assert_eq!(second.len(), 1);
        assert!(bad.is_empty());
        assert!(matches!(&second[0], Message::EchoRequest(echo) if echo.data == b"abcdef"));
    }

    #[test]
    fn malformed_message_is_skipped_and_reported() {
        let (mut conn, mut peer) = test_connection();
        // unknown type 99, then a valid echo request
        peer.write_all(&[4, 99, 0, 8, 0, 0, 0, 7]).unwrap();
        let mut xids = XidGen::new();
        let good = pack_echo_request(
            &Echo {
                xid: Some(8),
                data: Vec::new(),
            },
            &mut xids,
        );
        peer.write_all(good.as_ref()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let mut bad = Vec::new();
        let ReadOutcome::Messages(messages) = conn.handle_readable(&mut bad) else {
            panic!("unexpected close");
        };
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].0, 7);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn eof_reports_closed() {
        let (mut conn, peer) = test_connection();
        drop(peer);
        std::thread::sleep(Duration::from_millis(20));
        let mut bad = Vec::new();
        assert!(matches!(
            conn.handle_readable(&mut bad),
            ReadOutcome::Closed
        ));
    }

    #[test]
    fn pending_sweep_times_out_requests() {
        let (mut conn, _peer) = test_connection();
        conn.request_timeout = Duration::from_millis(0);
        let xid = conn.request_barrier().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let expired = conn.sweep_pending(Instant::now());
        assert_eq!(expired, vec![(xid, PendingKind::Barrier)]);
        assert!(conn.take_pending(xid).is_none());
    }

    #[test]
    fn tracked_request_clears_on_reply_xid() {
        let (mut conn, _peer) = test_connection();
        let xid = conn.request_features().unwrap();
        let pending = conn.take_pending(xid).unwrap();
        assert_eq!(pending.kind, PendingKind::Features);
        assert!(conn.take_pending(xid).is_none());
    }
}
