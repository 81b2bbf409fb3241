// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-datapath state machine, dispatch, and the controller run loop.

use crate::connection::{Connection, HandshakeStage, PendingKind, ReadOutcome, RequestError};
use crate::{ControllerError, DatapathId};
use event::{Expired, Scheduler, WAKER_TOKEN};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Token};
use ordermap::OrderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use wire::error::{ErrorKind, HelloFailedCode};
use wire::messages::{
    Echo, ErrorMsg, FlowRemoved, GetConfigReply, Hello, MultipartReply, PacketIn, PortStatus,
    pack_echo_reply, pack_error, pack_hello,
};
use wire::{Message, OFP_VERSION};

/// Application event handlers.
///
/// Every method has a default (ignore) body; implement the events the
/// application cares about. Handlers run to completion on the scheduler
/// thread and must not block; sending from inside a handler only enqueues.
#[allow(unused_variables)]
pub trait ControllerApp {
    /// The handshake with a switch completed; its flow table may be
    /// programmed from here on. Delivered exactly once per connection.
    fn switch_ready(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId) {}

    /// A ready switch's connection went away.
    fn switch_disconnected(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId) {}

    fn packet_in(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: PacketIn) {}

    fn flow_removed(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: FlowRemoved) {}

    fn port_status(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: PortStatus) {}

    /// An error message arrived. The runtime has already logged it.
    fn error_received(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: ErrorMsg) {}

    fn multipart_reply(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: MultipartReply) {}

    fn barrier_reply(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, xid: u32) {}

    /// An echo reply arrived. The pending-request entry is already
    /// cleared whether or not this is implemented.
    fn echo_reply(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: Echo) {}

    fn get_config_reply(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: GetConfigReply) {}

    /// A `features_reply` outside the handshake (the handshake's own reply
    /// surfaces as [`ControllerApp::switch_ready`]).
    fn features_reply(&mut self, ctx: &mut AppCtx<'_>, dpid: DatapathId, xid: u32) {}

    /// 1 Hz housekeeping tick.
    fn timer_event(&mut self, ctx: &mut AppCtx<'_>) {}

    /// A tracked request will never get its reply.
    fn request_failed(
        &mut self,
        ctx: &mut AppCtx<'_>,
        dpid: DatapathId,
        xid: u32,
        error: RequestError,
    ) {
    }
}

/// Capabilities handed to application handlers.
pub struct AppCtx<'a> {
    connections: &'a mut OrderMap<usize, Connection>,
    by_dpid: &'a mut ahash::AHashMap<DatapathId, usize>,
    stop: &'a Arc<AtomicBool>,
}

impl AppCtx<'_> {
    /// The connection of a ready datapath.
    ///
    /// # Errors
    ///
    /// [`ControllerError::UnknownDatapath`] when no ready connection has
    /// this id.
    pub fn switch(&mut self, dpid: DatapathId) -> Result<&mut Connection, ControllerError> {
        self.by_dpid
            .get(&dpid)
            .and_then(|token| self.connections.get_mut(token))
            .ok_or(ControllerError::UnknownDatapath(dpid))
    }

    /// Datapath ids of all ready switches, in connection order.
    #[must_use]
    pub fn dpids(&self) -> Vec<DatapathId> {
        self.connections
            .values()
            .filter_map(Connection::dpid)
            .collect()
    }

    /// Ask the run loop to exit after this callback returns.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Tunables of a controller instance.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Bound on each connection's send queue, in messages.
    pub max_send_queue: usize,
    /// Deadline for tracked requests.
    pub request_timeout: Duration,
    /// Idle interval after which the runtime probes a switch with an echo
    /// request.
    pub echo_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            max_send_queue: 128,
            request_timeout: Duration::from_secs(10),
            echo_interval: Duration::from_secs(15),
        }
    }
}

/// Stops a running controller from another thread or a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
}

impl StopHandle {
    /// Ask the run loop to exit; safe from any context.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    UserTick,
    PendingSweep,
    EchoProbe,
    /// Bounds a single [`Controller::run_once`] poll; never dispatched.
    Idle,
}

const LISTENER_TOKEN: Token = Token(0);
const FIRST_CONNECTION_TOKEN: usize = 1;

/// The controller runtime: listener, connections, scheduler, dispatch.
pub struct Controller<A: ControllerApp> {
    app: A,
    sched: Scheduler<TimerKind>,
    listener: Option<TcpListener>,
    connections: OrderMap<usize, Connection>,
    by_dpid: ahash::AHashMap<DatapathId, usize>,
    /// Tokens currently registered with WRITABLE interest.
    write_interest: ahash::AHashSet<usize>,
    next_token: usize,
    config: ControllerConfig,
    stop: Arc<AtomicBool>,
}

impl<A: ControllerApp> Controller<A> {
    /// Create a controller with default configuration.
    ///
    /// # Errors
    ///
    /// Fails when the scheduler's poll instance cannot be created.
    pub fn new(app: A) -> Result<Controller<A>, ControllerError> {
        Controller::with_config(app, ControllerConfig::default())
    }

    /// Create a controller with explicit configuration.
    ///
    /// # Errors
    ///
    /// Fails when the scheduler's poll instance cannot be created.
    pub fn with_config(app: A, config: ControllerConfig) -> Result<Controller<A>, ControllerError> {
        Ok(Controller {
            app,
            sched: Scheduler::new()?,
            listener: None,
            connections: OrderMap::new(),
            by_dpid: ahash::AHashMap::new(),
            write_interest: ahash::AHashSet::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The wrapped application.
    pub fn app(&self) -> &A {
        &self.app
    }

    /// The wrapped application, mutably.
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// A handle that stops [`Controller::run`] from another context.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop.clone(),
            waker: self.sched.waker(),
        }
    }

    /// Accept switch connections on `addr` (conventionally port 6653).
    ///
    /// # Errors
    ///
    /// Propagates bind/registration failures.
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), ControllerError> {
        let mut listener = TcpListener::bind(addr)?;
        self.sched
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        info!(%addr, "listening for switches");
        self.listener = Some(listener);
        Ok(())
    }

    /// The listener's local address, once bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Actively open a connection to a switch at `addr`.
    ///
    /// # Errors
    ///
    /// Propagates connect/registration failures; the handshake itself is
    /// asynchronous.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), ControllerError> {
        let stream = TcpStream::connect(addr)?;
        self.install_connection(stream, addr, false)?;
        Ok(())
    }

    /// Send a prebuilt message to a ready datapath.
    ///
    /// # Errors
    ///
    /// [`ControllerError::UnknownDatapath`] when the datapath is not
    /// connected, or the connection's enqueue errors.
    pub fn send(&mut self, dpid: DatapathId, buf: wire::Buffer) -> Result<(), ControllerError> {
        let token = *self
            .by_dpid
            .get(&dpid)
            .ok_or(ControllerError::UnknownDatapath(dpid))?;
        let conn = self
            .connections
            .get_mut(&token)
            .ok_or(ControllerError::UnknownDatapath(dpid))?;
        conn.send_raw(buf)
    }

    /// Drive the scheduler until [`StopHandle::stop`] or
    /// [`AppCtx::stop`] is called.
    ///
    /// # Errors
    ///
    /// Propagates scheduler failures. Individual connection failures are
    /// handled internally by closing that connection.
    pub fn run(&mut self) -> Result<(), ControllerError> {
        self.sched.every(Duration::from_secs(1), TimerKind::UserTick);
        self.sched
            .every(Duration::from_secs(1), TimerKind::PendingSweep);
        self.sched
            .every(self.config.echo_interval, TimerKind::EchoProbe);

        let mut events = Events::with_capacity(256);
        let mut expired: Vec<Expired<TimerKind>> = Vec::new();
        while !self.stop.load(Ordering::Acquire) {
            self.sched.turn(&mut events, &mut expired)?;

            let ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            for (token, readable, writable) in ready {
                match token {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => self.accept_pending()?,
                    Token(token) => self.handle_connection_event(token, readable, writable),
                }
            }
            for timer in expired.drain(..) {
                self.handle_timer(timer.payload);
            }
            self.update_write_interest();
        }
        info!("controller stopping");
        Ok(())
    }

    /// One scheduler iteration; exposed for tests driving the loop
    /// manually.
    ///
    /// # Errors
    ///
    /// Propagates scheduler failures.
    pub fn run_once(&mut self) -> Result<(), ControllerError> {
        let mut events = Events::with_capacity(256);
        let mut expired: Vec<Expired<TimerKind>> = Vec::new();
        let guard = self.sched.after(Duration::from_millis(50), TimerKind::Idle);
        self.sched.turn(&mut events, &mut expired)?;
        self.sched.cancel(guard);
        let ready: Vec<(Token, bool, bool)> = events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();
        for (token, readable, writable) in ready {
            match token {
                WAKER_TOKEN => {}
                LISTENER_TOKEN => self.accept_pending()?,
                Token(token) => self.handle_connection_event(token, readable, writable),
            }
        }
        for timer in expired.drain(..) {
            self.handle_timer(timer.payload);
        }
        self.update_write_interest();
        Ok(())
    }

    // --- connection management -----------------------------------------

    fn accept_pending(&mut self) -> Result<(), ControllerError> {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return Ok(());
            };
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "switch connected");
                    self.install_connection(stream, peer, true)?;
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(ControllerError::Io(err)),
            }
        }
    }

    fn install_connection(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        established: bool,
    ) -> Result<(), ControllerError> {
        let token = self.next_token;
        self.next_token += 1;
        self.sched.register(
            &mut stream,
            Token(token),
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.write_interest.insert(token);
        let mut conn = Connection::new(
            stream,
            peer,
            self.config.max_send_queue,
            self.config.request_timeout,
        );
        if established {
            send_hello(&mut conn);
        }
        self.connections.insert(token, conn);
        Ok(())
    }

    fn handle_connection_event(&mut self, token: usize, readable: bool, writable: bool) {
        if writable {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            if conn.stage() == HandshakeStage::Connected {
                // active connect completed
                send_hello(conn);
            }
            if let Err(err) = conn.flush() {
                warn!(peer = %conn.peer_addr(), %err, "write failed");
                self.close_connection(token);
                return;
            }
        }
        if readable {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            let mut bad = Vec::new();
            match conn.handle_readable(&mut bad) {
                ReadOutcome::Closed => {
                    self.close_connection(token);
                }
                ReadOutcome::Messages(messages) => {
                    for (xid, err) in bad {
                        self.answer_decode_error(token, xid, &err);
                    }
                    for message in messages {
                        if !self.connections.contains_key(&token) {
                            break;
                        }
                        self.dispatch(token, message);
                    }
                }
            }
        }
    }

    fn answer_decode_error(&mut self, token: usize, xid: u32, err: &wire::WireError) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let options = ErrorMsg {
            xid: Some(xid),
            kind: err.to_error_kind(),
            data: Vec::new(),
        };
        let buf = pack_error(&options, conn.xids_mut());
        if conn.send_raw(buf).is_err() {
            self.close_connection(token);
        }
    }

    fn close_connection(&mut self, token: usize) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        let _ = self.sched.deregister(conn.stream_mut());
        self.write_interest.remove(&token);
        let was_ready = conn.stage() == HandshakeStage::Ready;
        conn.set_stage(HandshakeStage::Closing);
        let dpid = conn.dpid().unwrap_or(0);
        if let Some(id) = conn.dpid() {
            self.by_dpid.remove(&id);
        }
        let orphaned = conn.drain_pending();
        debug!(peer = %conn.peer_addr(), dpid, "connection closed");
        drop(conn);

        let Controller {
            app,
            connections,
            by_dpid,
            stop,
            ..
        } = self;
        let mut ctx = AppCtx {
            connections,
            by_dpid,
            stop,
        };
        for (xid, _kind) in orphaned {
            app.request_failed(&mut ctx, dpid, xid, RequestError::ConnectionClosed);
        }
        if was_ready {
            app.switch_disconnected(&mut ctx, dpid);
        }
    }

    /// Re-register connections whose WRITABLE interest changed.
    fn update_write_interest(&mut self) {
        let mut failed = Vec::new();
        for (&token, conn) in &mut self.connections {
            let wants = conn.wants_write() || conn.stage() == HandshakeStage::Connected;
            let has = self.write_interest.contains(&token);
            if wants == has {
                continue;
            }
            let interests = if wants {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if self
                .sched
                .reregister(conn.stream_mut(), Token(token), interests)
                .is_err()
            {
                failed.push(token);
                continue;
            }
            if wants {
                self.write_interest.insert(token);
            } else {
                self.write_interest.remove(&token);
            }
        }
        for token in failed {
            self.close_connection(token);
        }
    }

    // --- timers --------------------------------------------------------

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::UserTick => {
                let Controller {
                    app,
                    connections,
                    by_dpid,
                    stop,
                    ..
                } = self;
                let mut ctx = AppCtx {
                    connections,
                    by_dpid,
                    stop,
                };
                app.timer_event(&mut ctx);
            }
            TimerKind::PendingSweep => self.sweep_pending(),
            TimerKind::EchoProbe => self.probe_idle(),
            TimerKind::Idle => {}
        }
    }

    fn sweep_pending(&mut self) {
        let now = Instant::now();
        let mut dead = Vec::new();
        let mut timed_out = Vec::new();
        for (&token, conn) in &mut self.connections {
            for (xid, kind) in conn.sweep_pending(now) {
                if kind == PendingKind::Echo {
                    // unanswered keepalive: the peer is gone
                    dead.push(token);
                } else {
                    timed_out.push((conn.dpid().unwrap_or(0), xid));
                }
            }
        }
        {
            let Controller {
                app,
                connections,
                by_dpid,
                stop,
                ..
            } = self;
            let mut ctx = AppCtx {
                connections,
                by_dpid,
                stop,
            };
            for (dpid, xid) in timed_out {
                app.request_failed(&mut ctx, dpid, xid, RequestError::Timeout);
            }
        }
        for token in dead {
            warn!(token, "echo probe timed out, dropping connection");
            self.close_connection(token);
        }
    }

    fn probe_idle(&mut self) {
        let now = Instant::now();
        let idle_after = self.config.echo_interval;
        let mut failed = Vec::new();
        for (&token, conn) in &mut self.connections {
            if conn.stage() != HandshakeStage::Ready {
                continue;
            }
            if now.duration_since(conn.last_activity()) < idle_after {
                continue;
            }
            trace!(peer = %conn.peer_addr(), "probing idle switch");
            if conn.request_echo(Vec::new()).is_err() {
                failed.push(token);
            }
        }
        for token in failed {
            self.close_connection(token);
        }
    }

    // --- dispatch ------------------------------------------------------

    fn dispatch(&mut self, token: usize, message: Message) {
        match message {
            Message::Hello(hello) => self.on_hello(token, &hello),
            Message::EchoRequest(echo) => self.on_echo_request(token, echo),
            Message::FeaturesReply(reply) => {
                let xid = reply.xid.unwrap_or(0);
                self.on_features_reply(token, xid, reply.features);
            }
            Message::EchoReply(echo) => {
                self.clear_pending(token, echo.xid);
                self.deliver(token, |app, ctx, dpid| app.echo_reply(ctx, dpid, echo));
            }
            Message::Error(error) => {
                warn!(
                    token,
                    error_type = error.kind.error_type(),
                    code = error.kind.code(),
                    "error from switch"
                );
                self.deliver(token, |app, ctx, dpid| app.error_received(ctx, dpid, error));
            }
            Message::GetConfigReply(reply) => {
                self.clear_pending(token, reply.xid);
                self.deliver(token, |app, ctx, dpid| app.get_config_reply(ctx, dpid, reply));
            }
            Message::MultipartReply(reply) => {
                if reply.flags.contains(wire::messages::MultipartFlags::MORE) {
                    // keep the pending entry alive for the rest of the reply
                    if let (Some(xid), Some(conn)) = (reply.xid, self.connections.get_mut(&token))
                    {
                        conn.touch_pending(xid);
                    }
                } else {
                    self.clear_pending(token, reply.xid);
                }
                self.deliver(token, |app, ctx, dpid| app.multipart_reply(ctx, dpid, reply));
            }
            Message::BarrierReply(reply) => {
                self.clear_pending(token, reply.xid);
                let xid = reply.xid.unwrap_or(0);
                self.deliver(token, |app, ctx, dpid| app.barrier_reply(ctx, dpid, xid));
            }
            Message::PacketIn(packet_in) => {
                self.deliver(token, |app, ctx, dpid| app.packet_in(ctx, dpid, packet_in));
            }
            Message::FlowRemoved(removed) => {
                self.deliver(token, |app, ctx, dpid| app.flow_removed(ctx, dpid, removed));
            }
            Message::PortStatus(status) => {
                self.deliver(token, |app, ctx, dpid| app.port_status(ctx, dpid, status));
            }
            other => {
                debug!(token, ?other, "ignoring message");
            }
        }
    }

    /// Invoke an app handler for a ready connection; silently ignored
    /// before the handshake completes.
    fn deliver(
        &mut self,
        token: usize,
        f: impl FnOnce(&mut A, &mut AppCtx<'_>, DatapathId),
    ) {
        let Some(conn) = self.connections.get(&token) else {
            return;
        };
        let Some(dpid) = conn.dpid() else {
            return;
        };
        let Controller {
            app,
            connections,
            by_dpid,
            stop,
            ..
        } = self;
        let mut ctx = AppCtx {
            connections,
            by_dpid,
            stop,
        };
        f(app, &mut ctx, dpid);
    }

    fn clear_pending(&mut self, token: usize, xid: Option<u32>) {
        if let (Some(xid), Some(conn)) = (xid, self.connections.get_mut(&token)) {
            conn.take_pending(xid);
        }
    }

    fn on_hello(&mut self, token: usize, hello: &Hello) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if conn.stage() != HandshakeStage::HelloSent
            && conn.stage() != HandshakeStage::Connected
        {
            debug!(peer = %conn.peer_addr(), "unexpected hello ignored");
            return;
        }
        if hello.agreed_version(OFP_VERSION).is_none() {
            warn!(
                peer = %conn.peer_addr(),
                offered = ?hello.versions,
                "incompatible protocol version"
            );
            let options = ErrorMsg {
                xid: hello.xid,
                kind: ErrorKind::HelloFailed(HelloFailedCode::Incompatible),
                data: Vec::new(),
            };
            let buf = pack_error(&options, conn.xids_mut());
            let _ = conn.send_raw(buf);
            let _ = conn.flush();
            self.close_connection(token);
            return;
        }
        if conn.stage() == HandshakeStage::Connected {
            // peer's hello beat our first writable event; ours goes first
            send_hello(conn);
        }
        conn.set_stage(HandshakeStage::HelloReceived);
        if conn.request_features().is_err() {
            self.close_connection(token);
            return;
        }
        conn.set_stage(HandshakeStage::FeaturesRequested);
    }

    fn on_echo_request(&mut self, token: usize, echo: Echo) {
        // automatic and independent of handler registration
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let buf = pack_echo_reply(
            &Echo {
                xid: echo.xid,
                data: echo.data,
            },
            conn.xids_mut(),
        );
        if conn.send_raw(buf).is_err() {
            self.close_connection(token);
        }
    }

    fn on_features_reply(
        &mut self,
        token: usize,
        xid: u32,
        features: wire::messages::SwitchFeatures,
    ) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        conn.take_pending(xid);
        if conn.stage() == HandshakeStage::Ready {
            self.deliver(token, |app, ctx, dpid| app.features_reply(ctx, dpid, xid));
            return;
        }
        if conn.stage() != HandshakeStage::FeaturesRequested {
            debug!(peer = %conn.peer_addr(), "unexpected features_reply ignored");
            return;
        }
        let dpid = features.datapath_id;
        conn.set_identity(dpid, features);
        conn.set_stage(HandshakeStage::Ready);
        info!(peer = %conn.peer_addr(), dpid = format_args!("{dpid:#018x}"), "switch ready");
        self.by_dpid.insert(dpid, token);
        let Controller {
            app,
            connections,
            by_dpid,
            stop,
            ..
        } = self;
        let mut ctx = AppCtx {
            connections,
            by_dpid,
            stop,
        };
        app.switch_ready(&mut ctx, dpid);
    }
}

fn send_hello(conn: &mut Connection) {
    let buf = pack_hello(&Hello::default(), conn.xids_mut());
    if conn.send_raw(buf).is_ok() {
        conn.set_stage(HandshakeStage::HelloSent);
    }
}
