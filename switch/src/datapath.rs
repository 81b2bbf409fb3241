// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The switch object: controller channel, ports, tables, and the message
//! handlers that tie them together.

use crate::flow_table::FlowTable;
use crate::frame::{FrameError, PacketContext, ParsedFrame};
use crate::frame_io::{FrameIO, FrameIoError};
use crate::group_table::GroupTable;
use crate::pipeline::{self, Effect, PacketInEffect};
use event::{Expired, Scheduler, WAKER_TOKEN};
use mio::net::TcpStream;
use mio::{Events, Interest, Token};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use wire::error::{BadRequestCode, ErrorKind, FlowModFailedCode};
use wire::error::BadInstructionCode;
use wire::instructions::Instruction;
use wire::messages::{
    AggregateStats, BarrierReply, DescStats, Echo, ErrorMsg, FeaturesReply, FlowMod,
    FlowModCommand, FlowRemoved, GetConfigReply, GroupMod, Hello, MpReplyBody, MpRequestBody,
    MultipartFlags, MultipartReply, MultipartRequest, PacketIn, PacketOut, PortStats, PortStatus,
    PortStatusReason, SwitchConfig, SwitchFeatures, TableStats, pack_barrier_reply,
    pack_echo_reply, pack_error, pack_features_reply, pack_flow_removed, pack_get_config_reply,
    pack_hello, pack_multipart_reply, pack_packet_in, pack_port_status,
};
use wire::messages::Capabilities;
use wire::oxm::{Match, MatchField};
use wire::port::{CONTROLLER_MAX_LEN_NO_BUFFER, NO_BUFFER, PortDesc, PortState, port_no};
use wire::{Buffer, Header, Message, OFP_HEADER_LEN, OFP_VERSION, XidGen};

/// `OFPTT_ALL`: table wildcard in flow-mod deletes and flow-stats.
const TABLE_ALL: u8 = 0xff;

/// Error surfaced by datapath operations.
#[derive(Debug, thiserror::Error)]
pub enum DatapathError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scheduler(#[from] event::SchedulerError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    FrameIo(#[from] FrameIoError),
    #[error("no port {0}")]
    UnknownPort(u32),
    #[error("send queue full ({0} messages)")]
    SendQueueFull(usize),
    #[error("controller channel is down")]
    NotConnected,
}

/// Construction-time settings of a [`Datapath`].
#[derive(Debug, Clone)]
pub struct DatapathConfig {
    pub datapath_id: u64,
    /// Controller endpoint to dial.
    pub controller: SocketAddr,
    /// Packet-in buffering capacity; 0 disables buffering.
    pub n_buffers: u32,
    /// Number of flow tables (at most 64).
    pub n_tables: u8,
    pub max_flow_entries: usize,
    pub max_send_queue: usize,
    /// Bound on frames drained from one port per poll.
    pub max_recv_queue: usize,
    /// Free-form description reported by the DESC multipart.
    pub description: String,
}

impl DatapathConfig {
    /// Defaults for everything but the identity and controller address.
    #[must_use]
    pub fn new(datapath_id: u64, controller: SocketAddr) -> DatapathConfig {
        DatapathConfig {
            datapath_id,
            controller,
            n_buffers: 256,
            n_tables: 8,
            max_flow_entries: 1024,
            max_send_queue: 128,
            max_recv_queue: 256,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelStage {
    Connecting,
    HelloSent,
    Ready,
}

/// The switch side of the control channel.
struct Channel {
    stream: TcpStream,
    stage: ChannelStage,
    read_buf: Vec<u8>,
    send_queue: VecDeque<Buffer>,
    write_cursor: usize,
    max_send_queue: usize,
}

impl Channel {
    fn new(stream: TcpStream, max_send_queue: usize) -> Channel {
        Channel {
            stream,
            stage: ChannelStage::Connecting,
            read_buf: Vec::with_capacity(4096),
            send_queue: VecDeque::new(),
            write_cursor: 0,
            max_send_queue,
        }
    }

    fn send(&mut self, buf: Buffer) -> Result<(), DatapathError> {
        if self.send_queue.len() >= self.max_send_queue {
            return Err(DatapathError::SendQueueFull(self.max_send_queue));
        }
        self.send_queue.push_back(buf);
        let _ = self.flush();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
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

    fn wants_write(&self) -> bool {
        !self.send_queue.is_empty()
    }

    /// Read available bytes; `Ok(false)` means the peer closed.
    fn fill(&mut self) -> Result<bool, std::io::Error> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Peel the next complete frame off the read buffer.
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let length = usize::from(Header::peek_length(&self.read_buf)?);
        if length < OFP_HEADER_LEN || self.read_buf.len() < length {
            return (length < OFP_HEADER_LEN).then(|| {
                // resynchronization is hopeless below the minimum length
                warn!(length, "bad header length from controller");
                Vec::new()
            });
        }
        Some(self.read_buf.drain(..length).collect())
    }
}

struct Port {
    port_no: u32,
    device: Box<dyn FrameIO>,
    up: bool,
    rx_packets: u64,
    rx_bytes: u64,
    tx_packets: u64,
    tx_bytes: u64,
    added_at: Instant,
}

impl Port {
    fn desc(&self) -> PortDesc {
        let state = if self.up {
            PortState::LIVE
        } else {
            PortState::LINK_DOWN
        };
        #[allow(clippy::cast_possible_truncation)] // port numbers are small
        let low = (self.port_no & 0xff) as u8;
        PortDesc {
            port_no: self.port_no,
            hw_addr: [0x02, 0, 0, 0, 0, low],
            name: self.device.name().to_string(),
            state,
            ..PortDesc::default()
        }
    }

    fn stats(&self, now: Instant) -> PortStats {
        let duration = now.duration_since(self.added_at);
        PortStats {
            port_no: self.port_no,
            rx_packets: self.rx_packets,
            tx_packets: self.tx_packets,
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
            #[allow(clippy::cast_possible_truncation)] // stats wrap by contract
            duration_sec: duration.as_secs() as u32,
            duration_nsec: duration.subsec_nanos(),
            ..PortStats::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DpTimer {
    Eviction,
    PortPoll,
    PortScan,
    /// Bounds a single [`Datapath::run_once`] poll; never dispatched.
    Idle,
}

const CHANNEL_TOKEN: Token = Token(1);

/// Stops a running datapath from another thread or a signal handler.
#[derive(Clone)]
pub struct DatapathStopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
}

impl DatapathStopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }
}

/// A software OpenFlow switch with an explicit lifecycle:
/// [`Datapath::new`], [`Datapath::run`] (or manual stepping), drop.
pub struct Datapath {
    config: DatapathConfig,
    switch_config: SwitchConfig,
    sched: Scheduler<DpTimer>,
    channel: Option<Channel>,
    xids: XidGen,
    tables: Vec<FlowTable>,
    groups: GroupTable,
    ports: Vec<Port>,
    buffered: ahash::AHashMap<u32, (u32, Vec<u8>)>,
    buffer_order: VecDeque<u32>,
    buffer_seq: u32,
    stop: Arc<AtomicBool>,
}

impl Datapath {
    /// Create a datapath; no connection is made until [`Datapath::start`].
    ///
    /// # Errors
    ///
    /// Fails when the scheduler's poll instance cannot be created.
    pub fn new(config: DatapathConfig) -> Result<Datapath, DatapathError> {
        let n_tables = config.n_tables.min(64);
        let tables = (0..n_tables)
            .map(|id| FlowTable::new(id, config.max_flow_entries))
            .collect();
        Ok(Datapath {
            switch_config: SwitchConfig::default(),
            sched: Scheduler::new()?,
            channel: None,
            xids: XidGen::new(),
            tables,
            groups: GroupTable::new(),
            ports: Vec::new(),
            buffered: ahash::AHashMap::new(),
            buffer_order: VecDeque::new(),
            buffer_seq: 0,
            stop: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// The features advertised in the handshake.
    #[must_use]
    pub fn features(&self) -> SwitchFeatures {
        SwitchFeatures {
            datapath_id: self.config.datapath_id,
            n_buffers: self.config.n_buffers,
            #[allow(clippy::cast_possible_truncation)] // clamped to 64 in new()
            n_tables: self.tables.len() as u8,
            auxiliary_id: 0,
            capabilities: Capabilities::FLOW_STATS
                | Capabilities::TABLE_STATS
                | Capabilities::PORT_STATS
                | Capabilities::GROUP_STATS,
        }
    }

    /// The mutable switch configuration.
    #[must_use]
    pub fn switch_config(&self) -> SwitchConfig {
        self.switch_config
    }

    /// Replace the mutable switch configuration (also reachable via
    /// `set_config` from the controller).
    pub fn set_switch_config(&mut self, config: SwitchConfig) {
        self.switch_config = config;
    }

    /// A handle that stops [`Datapath::run`] from another context.
    #[must_use]
    pub fn stop_handle(&self) -> DatapathStopHandle {
        DatapathStopHandle {
            flag: self.stop.clone(),
            waker: self.sched.waker(),
        }
    }

    /// Attach a port backend; returns the assigned port number.
    /// A `port_status(ADD)` is emitted when the channel is up.
    pub fn add_port(&mut self, device: Box<dyn FrameIO>) -> u32 {
        #[allow(clippy::cast_possible_truncation)] // port counts are small
        let port_no = (self.ports.len() + 1) as u32;
        let up = device.is_up();
        self.ports.push(Port {
            port_no,
            device,
            up,
            rx_packets: 0,
            rx_bytes: 0,
            tx_packets: 0,
            tx_bytes: 0,
            added_at: Instant::now(),
        });
        let desc = self.ports[port_no as usize - 1].desc();
        self.emit_port_status(PortStatusReason::Add, desc);
        info!(port_no, "port added");
        port_no
    }

    /// Dial the controller; the handshake proceeds asynchronously.
    ///
    /// # Errors
    ///
    /// Propagates connect/registration failures.
    pub fn start(&mut self) -> Result<(), DatapathError> {
        let mut stream = TcpStream::connect(self.config.controller)?;
        self.sched.register(
            &mut stream,
            CHANNEL_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        info!(controller = %self.config.controller, "dialing controller");
        self.channel = Some(Channel::new(stream, self.config.max_send_queue));
        Ok(())
    }

    /// Drive the datapath until [`DatapathStopHandle::stop`].
    ///
    /// # Errors
    ///
    /// Propagates scheduler failures; channel failures tear the channel
    /// down and are not fatal to the loop.
    pub fn run(&mut self) -> Result<(), DatapathError> {
        self.sched.every(Duration::from_secs(1), DpTimer::Eviction);
        self.sched
            .every(Duration::from_millis(10), DpTimer::PortPoll);
        self.sched.every(Duration::from_secs(1), DpTimer::PortScan);

        let mut events = Events::with_capacity(64);
        let mut expired: Vec<Expired<DpTimer>> = Vec::new();
        while !self.stop.load(Ordering::Acquire) {
            self.sched.turn(&mut events, &mut expired)?;
            let ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            for (token, readable, writable) in ready {
                if token == CHANNEL_TOKEN {
                    self.handle_channel_event(readable, writable);
                } else if token == WAKER_TOKEN {
                    // stop flag checked at the top of the loop
                }
            }
            for timer in expired.drain(..) {
                self.handle_timer(timer.payload);
            }
            self.update_write_interest();
        }
        info!("datapath stopping");
        Ok(())
    }

    /// One scheduler iteration; exposed for tests driving the loop
    /// manually.
    ///
    /// # Errors
    ///
    /// Propagates scheduler failures.
    pub fn run_once(&mut self) -> Result<(), DatapathError> {
        let mut events = Events::with_capacity(64);
        let mut expired: Vec<Expired<DpTimer>> = Vec::new();
        let guard = self.sched.after(Duration::from_millis(50), DpTimer::Idle);
        self.sched.turn(&mut events, &mut expired)?;
        self.sched.cancel(guard);
        let ready: Vec<(Token, bool, bool)> = events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();
        for (token, readable, writable) in ready {
            if token == CHANNEL_TOKEN {
                self.handle_channel_event(readable, writable);
            }
        }
        for timer in expired.drain(..) {
            self.handle_timer(timer.payload);
        }
        self.poll_ports();
        self.update_write_interest();
        Ok(())
    }

    fn handle_timer(&mut self, kind: DpTimer) {
        match kind {
            DpTimer::Eviction => self.expire_flows(Instant::now()),
            DpTimer::PortPoll => self.poll_ports(),
            DpTimer::PortScan => self.scan_port_state(),
            DpTimer::Idle => {}
        }
    }

    fn update_write_interest(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let interests = if channel.wants_write() || channel.stage == ChannelStage::Connecting {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let _ = self
            .sched
            .reregister(&mut channel.stream, CHANNEL_TOKEN, interests);
    }

    fn handle_channel_event(&mut self, readable: bool, writable: bool) {
        if writable {
            let Some(channel) = self.channel.as_mut() else {
                return;
            };
            if channel.stage == ChannelStage::Connecting {
                let hello = pack_hello(&Hello::default(), &mut self.xids);
                if channel.send(hello).is_ok() {
                    channel.stage = ChannelStage::HelloSent;
                    debug!("hello sent to controller");
                }
            }
            if let Err(err) = channel.flush() {
                warn!(%err, "channel write failed");
                self.teardown_channel();
                return;
            }
        }
        if readable {
            let Some(channel) = self.channel.as_mut() else {
                return;
            };
            match channel.fill() {
                Ok(true) => {}
                Ok(false) => {
                    info!("controller closed the channel");
                    self.teardown_channel();
                    return;
                }
                Err(err) => {
                    warn!(%err, "channel read failed");
                    self.teardown_channel();
                    return;
                }
            }
            loop {
                let Some(channel) = self.channel.as_mut() else {
                    return;
                };
                let Some(frame) = channel.next_frame() else {
                    break;
                };
                if frame.is_empty() {
                    self.teardown_channel();
                    return;
                }
                self.handle_frame(&frame);
            }
        }
    }

    fn teardown_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            let _ = self.sched.deregister(&mut channel.stream);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        match Message::decode(frame) {
            Ok((message, _)) => self.handle_message(message),
            Err(err) => {
                warn!(%err, "malformed message from controller");
                let xid = Header::decode(frame).map(|h| h.xid).unwrap_or(0);
                self.send_error(xid, err.to_error_kind(), frame);
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Hello(hello) => self.on_hello(&hello),
            Message::EchoRequest(echo) => {
                let reply = pack_echo_reply(
                    &Echo {
                        xid: echo.xid,
                        data: echo.data,
                    },
                    &mut self.xids,
                );
                self.send_msg(reply);
            }
            Message::FeaturesRequest(request) => {
                let reply = pack_features_reply(
                    &FeaturesReply {
                        xid: request.xid,
                        features: self.features(),
                    },
                    &mut self.xids,
                );
                self.send_msg(reply);
            }
            Message::GetConfigRequest(request) => {
                let reply = pack_get_config_reply(
                    &GetConfigReply {
                        xid: request.xid,
                        config: self.switch_config,
                    },
                    &mut self.xids,
                );
                self.send_msg(reply);
            }
            Message::SetConfig(set_config) => {
                debug!(config = ?set_config.config, "set_config");
                self.switch_config = set_config.config;
            }
            Message::FlowMod(flow_mod) => self.on_flow_mod(&flow_mod),
            Message::GroupMod(group_mod) => self.on_group_mod(&group_mod),
            Message::PacketOut(packet_out) => self.on_packet_out(packet_out),
            Message::BarrierRequest(request) => {
                // single-threaded: everything before the barrier is done
                let reply = pack_barrier_reply(
                    &BarrierReply { xid: request.xid },
                    &mut self.xids,
                );
                self.send_msg(reply);
            }
            Message::MultipartRequest(request) => self.on_multipart(&request),
            Message::EchoReply(_) => {}
            other => {
                debug!(?other, "unsupported message type");
                let xid = other.xid().unwrap_or(0);
                self.send_error(
                    xid,
                    ErrorKind::BadRequest(BadRequestCode::BadType),
                    &[],
                );
            }
        }
    }

    fn on_hello(&mut self, hello: &Hello) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if hello.agreed_version(OFP_VERSION).is_none() {
            warn!(offered = ?hello.versions, "controller speaks no common version");
            let error = pack_error(
                &ErrorMsg {
                    xid: hello.xid,
                    kind: ErrorKind::HelloFailed(wire::error::HelloFailedCode::Incompatible),
                    data: Vec::new(),
                },
                &mut self.xids,
            );
            let _ = channel.send(error);
            let _ = channel.flush();
            self.teardown_channel();
            return;
        }
        if channel.stage == ChannelStage::Connecting {
            // controller's hello beat our first writable event
            let hello = pack_hello(&Hello::default(), &mut self.xids);
            let _ = channel.send(hello);
        }
        channel.stage = ChannelStage::Ready;
        debug!("control channel ready");
    }

    // --- flow / group mods ---------------------------------------------

    fn validate_instructions(&self, flow_mod: &FlowMod) -> Result<(), ErrorKind> {
        for instruction in &flow_mod.instructions {
            if let Instruction::GotoTable(next) = instruction {
                let in_range = usize::from(*next) < self.tables.len();
                if *next <= flow_mod.table_id || !in_range {
                    return Err(ErrorKind::BadInstruction(BadInstructionCode::BadTableId));
                }
            }
        }
        Ok(())
    }

    fn on_flow_mod(&mut self, flow_mod: &FlowMod) {
        let xid = flow_mod.xid.unwrap_or(0);
        let now = Instant::now();
        match flow_mod.command {
            FlowModCommand::Add => {
                if usize::from(flow_mod.table_id) >= self.tables.len() {
                    self.send_error(
                        xid,
                        ErrorKind::FlowModFailed(FlowModFailedCode::BadTableId),
                        &[],
                    );
                    return;
                }
                if let Err(kind) = self.validate_instructions(flow_mod) {
                    self.send_error(xid, kind, &[]);
                    return;
                }
                let table = &mut self.tables[usize::from(flow_mod.table_id)];
                if let Err(kind) = table.add(flow_mod, now) {
                    self.send_error(xid, kind, &[]);
                    return;
                }
                trace!(table_id = flow_mod.table_id, priority = flow_mod.priority, "flow added");
                if flow_mod.buffer_id != NO_BUFFER {
                    self.release_buffered(flow_mod.buffer_id, xid);
                }
            }
            FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                if let Err(kind) = self.validate_instructions(flow_mod) {
                    self.send_error(xid, kind, &[]);
                    return;
                }
                let strict = flow_mod.command == FlowModCommand::ModifyStrict;
                for table in self.selected_tables(flow_mod.table_id) {
                    table.modify(flow_mod, strict);
                }
            }
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => {
                let strict = flow_mod.command == FlowModCommand::DeleteStrict;
                let mut evicted = Vec::new();
                for table in self.selected_tables(flow_mod.table_id) {
                    let table_id = table.table_id();
                    for entry in table.delete(flow_mod, strict) {
                        evicted.push((table_id, entry));
                    }
                }
                for (table_id, evicted_entry) in evicted {
                    self.send_flow_removed(table_id, &evicted_entry, now);
                }
            }
        }
    }

    fn selected_tables(&mut self, table_id: u8) -> impl Iterator<Item = &mut FlowTable> {
        let range = if table_id == TABLE_ALL {
            0..self.tables.len()
        } else {
            let at = usize::from(table_id).min(self.tables.len());
            at..(at + 1).min(self.tables.len())
        };
        self.tables[range].iter_mut()
    }

    fn on_group_mod(&mut self, group_mod: &GroupMod) {
        let xid = group_mod.xid.unwrap_or(0);
        let now = Instant::now();
        match self.groups.apply(group_mod, now) {
            Ok(deleted) => {
                for group_id in deleted {
                    let mut evicted = Vec::new();
                    for table in &mut self.tables {
                        let table_id = table.table_id();
                        for entry in table.delete_referencing_group(group_id) {
                            evicted.push((table_id, entry));
                        }
                    }
                    for (table_id, evicted_entry) in evicted {
                        self.send_flow_removed(table_id, &evicted_entry, now);
                    }
                }
            }
            Err(kind) => self.send_error(xid, kind, &[]),
        }
    }

    fn on_packet_out(&mut self, packet_out: PacketOut) {
        let xid = packet_out.xid.unwrap_or(0);
        let bytes = if packet_out.buffer_id == NO_BUFFER {
            packet_out.data
        } else {
            match self.take_buffered(packet_out.buffer_id) {
                Some((_, bytes)) => bytes,
                None => {
                    self.send_error(
                        xid,
                        ErrorKind::BadRequest(BadRequestCode::BufferUnknown),
                        &[],
                    );
                    return;
                }
            }
        };
        let frame = match ParsedFrame::parse(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "unparseable packet_out frame");
                self.send_error(xid, ErrorKind::BadRequest(BadRequestCode::BadPacket), &[]);
                return;
            }
        };
        let mut ctx = PacketContext::new(frame, packet_out.in_port);
        let live = self.live_ports();
        let mut executor = pipeline::ActionExecutor::new(&mut self.groups, &live);
        match executor.apply_list(&packet_out.actions, &mut ctx) {
            Ok(()) => {
                let effects = executor.into_effects();
                self.resolve_effects(effects, packet_out.in_port);
            }
            Err(err) => {
                self.send_error(xid, err.to_error_kind(), &[]);
            }
        }
    }

    fn on_multipart(&mut self, request: &MultipartRequest) {
        let now = Instant::now();
        let xid = request.xid;
        let body = match &request.body {
            MpRequestBody::Desc => MpReplyBody::Desc(DescStats {
                mfr_desc: "ofstack".to_string(),
                hw_desc: "software datapath".to_string(),
                sw_desc: env!("CARGO_PKG_VERSION").to_string(),
                serial_num: "none".to_string(),
                dp_desc: self.config.description.clone(),
            }),
            MpRequestBody::Flow(filter) => {
                let mut entries = Vec::new();
                for table in &self.tables {
                    if filter.table_id != TABLE_ALL && filter.table_id != table.table_id() {
                        continue;
                    }
                    entries.extend(table.stats(filter, now));
                }
                MpReplyBody::Flow(entries)
            }
            MpRequestBody::Aggregate(filter) => {
                let mut stats = AggregateStats::default();
                for table in &self.tables {
                    if filter.table_id != TABLE_ALL && filter.table_id != table.table_id() {
                        continue;
                    }
                    for entry in table.stats(filter, now) {
                        stats.packet_count += entry.packet_count;
                        stats.byte_count += entry.byte_count;
                        stats.flow_count += 1;
                    }
                }
                MpReplyBody::Aggregate(stats)
            }
            MpRequestBody::Table => MpReplyBody::Table(
                self.tables
                    .iter()
                    .map(|table| TableStats {
                        table_id: table.table_id(),
                        #[allow(clippy::cast_possible_truncation)] // bounded by capacity
                        active_count: table.len() as u32,
                        lookup_count: table.lookup_count(),
                        matched_count: table.matched_count(),
                    })
                    .collect(),
            ),
            MpRequestBody::Port { port_no: filter } => MpReplyBody::Port(
                self.ports
                    .iter()
                    .filter(|p| *filter == port_no::ANY || p.port_no == *filter)
                    .map(|p| p.stats(now))
                    .collect(),
            ),
            MpRequestBody::Group { group_id } => {
                let filter = (*group_id != crate::group_table::GROUP_ALL).then_some(*group_id);
                MpReplyBody::Group(self.groups.stats(filter, now))
            }
            MpRequestBody::GroupDesc => MpReplyBody::GroupDesc(self.groups.descriptions()),
            MpRequestBody::PortDesc => {
                MpReplyBody::PortDesc(self.ports.iter().map(Port::desc).collect())
            }
            other => {
                debug!(?other, "unsupported multipart request");
                self.send_error(
                    xid.unwrap_or(0),
                    ErrorKind::BadRequest(BadRequestCode::BadMultipart),
                    &[],
                );
                return;
            }
        };
        let reply = pack_multipart_reply(
            &MultipartReply {
                xid,
                flags: MultipartFlags::empty(),
                body,
            },
            &mut self.xids,
        );
        self.send_msg(reply);
    }

    // --- frame path ----------------------------------------------------

    /// Drain received frames from every port into the pipeline.
    pub fn poll_ports(&mut self) {
        let mut batches = Vec::new();
        for (index, port) in self.ports.iter_mut().enumerate() {
            let mut received = Vec::new();
            if let Err(err) = port.device.poll_received(&mut received) {
                warn!(port_no = port.port_no, %err, "port receive failed");
                continue;
            }
            received.truncate(self.config.max_recv_queue);
            if !received.is_empty() {
                batches.push((index, received));
            }
        }
        for (index, frames) in batches {
            let port_no = self.ports[index].port_no;
            for bytes in frames {
                self.ports[index].rx_packets += 1;
                self.ports[index].rx_bytes += bytes.len() as u64;
                self.process_frame(port_no, bytes);
            }
        }
    }

    /// Run one received frame through the pipeline and resolve the
    /// resulting effects.
    pub fn process_frame(&mut self, in_port: u32, bytes: Vec<u8>) {
        let frame = match ParsedFrame::parse(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(in_port, %err, "dropping unparseable frame");
                return;
            }
        };
        let ctx = PacketContext::new(frame, in_port);
        let live = self.live_ports();
        let result = pipeline::run(
            &mut self.tables,
            &mut self.groups,
            &live,
            ctx,
            self.switch_config.miss_send_len,
            Instant::now(),
        );
        match result {
            Ok(effects) => self.resolve_effects(effects, in_port),
            Err(err) => {
                warn!(%err, "pipeline execution failed");
                self.send_error(0, err.to_error_kind(), &[]);
            }
        }
    }

    fn live_ports(&self) -> ahash::AHashSet<u32> {
        self.ports
            .iter()
            .filter(|p| p.up)
            .map(|p| p.port_no)
            .collect()
    }

    fn resolve_effects(&mut self, effects: Vec<Effect>, in_port: u32) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::PacketIn(packet_in) => self.emit_packet_in(packet_in),
                Effect::Output { port, frame } => match port {
                    port_no::ALL | port_no::FLOOD => {
                        let targets: Vec<u32> = self
                            .ports
                            .iter()
                            .filter(|p| p.up && p.port_no != in_port)
                            .map(|p| p.port_no)
                            .collect();
                        for target in targets {
                            self.transmit(target, &frame);
                        }
                    }
                    port_no::IN_PORT => self.transmit(in_port, &frame),
                    port_no::TABLE => {
                        // packet_out re-entry into the pipeline
                        self.process_frame(in_port, frame);
                    }
                    port_no::CONTROLLER | port_no::ANY => {
                        trace!(port, "unresolvable output port");
                    }
                    port_no::NORMAL | port_no::LOCAL => {
                        trace!(port, "normal/local forwarding is not modeled");
                    }
                    concrete => self.transmit(concrete, &frame),
                },
            }
        }
    }

    fn transmit(&mut self, target: u32, frame: &[u8]) {
        let Some(port) = self.ports.iter_mut().find(|p| p.port_no == target) else {
            debug!(target, "output to unknown port");
            return;
        };
        match port.device.send_frame(frame) {
            Ok(()) => {
                port.tx_packets += 1;
                port.tx_bytes += frame.len() as u64;
            }
            Err(err) => debug!(target, %err, "transmit failed"),
        }
    }

    fn emit_packet_in(&mut self, effect: PacketInEffect) {
        let mut matches = Match::new();
        let _ = matches.append(MatchField::InPort(effect.in_port));
        if effect.in_phy_port != effect.in_port {
            let _ = matches.append(MatchField::InPhyPort(effect.in_phy_port));
        }
        if effect.metadata != 0 {
            let _ = matches.append(MatchField::Metadata {
                value: effect.metadata,
                mask: None,
            });
        }
        if effect.tunnel_id != 0 {
            let _ = matches.append(MatchField::TunnelId {
                id: effect.tunnel_id,
                mask: None,
            });
        }

        #[allow(clippy::cast_possible_truncation)] // frames are < 64k
        let total_len = effect.frame.len() as u16;
        let max_len = usize::from(effect.max_len);
        let wants_buffering = effect.max_len != CONTROLLER_MAX_LEN_NO_BUFFER
            && self.config.n_buffers > 0
            && effect.frame.len() > max_len;
        let (buffer_id, data) = if wants_buffering {
            let data = effect.frame[..max_len].to_vec();
            let buffer_id = self.store_buffered(effect.in_port, effect.frame);
            (buffer_id, data)
        } else {
            (NO_BUFFER, effect.frame)
        };

        let message = pack_packet_in(
            &PacketIn {
                xid: None,
                buffer_id,
                total_len,
                reason: effect.reason,
                table_id: effect.table_id,
                cookie: effect.cookie,
                matches,
                data,
            },
            &mut self.xids,
        );
        self.send_msg(message);
    }

    // --- packet buffering ----------------------------------------------

    fn store_buffered(&mut self, in_port: u32, frame: Vec<u8>) -> u32 {
        while self.buffered.len() >= self.config.n_buffers as usize {
            let Some(oldest) = self.buffer_order.pop_front() else {
                break;
            };
            self.buffered.remove(&oldest);
        }
        self.buffer_seq = self.buffer_seq.wrapping_add(1);
        if self.buffer_seq == NO_BUFFER {
            self.buffer_seq = 0;
        }
        let buffer_id = self.buffer_seq;
        self.buffered.insert(buffer_id, (in_port, frame));
        self.buffer_order.push_back(buffer_id);
        buffer_id
    }

    fn take_buffered(&mut self, buffer_id: u32) -> Option<(u32, Vec<u8>)> {
        self.buffer_order.retain(|&id| id != buffer_id);
        self.buffered.remove(&buffer_id)
    }

    fn release_buffered(&mut self, buffer_id: u32, xid: u32) {
        match self.take_buffered(buffer_id) {
            Some((in_port, frame)) => self.process_frame(in_port, frame),
            None => self.send_error(
                xid,
                ErrorKind::BadRequest(BadRequestCode::BufferUnknown),
                &[],
            ),
        }
    }

    // --- housekeeping --------------------------------------------------

    /// Evict timed-out flows as of `now`, emitting `flow_removed` where
    /// flagged. Public so tests can fast-forward the clock.
    pub fn expire_flows(&mut self, now: Instant) {
        let mut evicted = Vec::new();
        for table in &mut self.tables {
            let table_id = table.table_id();
            for entry in table.expire(now) {
                evicted.push((table_id, entry));
            }
        }
        for (table_id, evicted_entry) in evicted {
            self.send_flow_removed(table_id, &evicted_entry, now);
        }
    }

    fn scan_port_state(&mut self) {
        let mut changes = Vec::new();
        for port in &mut self.ports {
            let up = port.device.is_up();
            if up != port.up {
                port.up = up;
                changes.push(port.desc());
            }
        }
        for desc in changes {
            self.emit_port_status(PortStatusReason::Modify, desc);
        }
    }

    fn send_flow_removed(
        &mut self,
        table_id: u8,
        evicted: &crate::flow_table::Evicted,
        now: Instant,
    ) {
        let entry = &evicted.entry;
        let duration = entry.duration(now);
        let message = pack_flow_removed(
            &FlowRemoved {
                xid: None,
                cookie: entry.cookie,
                priority: entry.priority,
                reason: evicted.reason,
                table_id,
                #[allow(clippy::cast_possible_truncation)] // stats wrap by contract
                duration_sec: duration.as_secs() as u32,
                duration_nsec: duration.subsec_nanos(),
                idle_timeout: entry.idle_timeout,
                hard_timeout: entry.hard_timeout,
                packet_count: entry.packet_count(),
                byte_count: entry.byte_count(),
                matches: entry.matches.clone(),
            },
            &mut self.xids,
        );
        self.send_msg(message);
    }

    fn emit_port_status(&mut self, reason: PortStatusReason, desc: PortDesc) {
        let message = pack_port_status(
            &PortStatus {
                xid: None,
                reason,
                desc,
            },
            &mut self.xids,
        );
        self.send_msg(message);
    }

    fn send_error(&mut self, xid: u32, kind: ErrorKind, offending: &[u8]) {
        let message = pack_error(
            &ErrorMsg {
                xid: Some(xid),
                kind,
                data: offending.to_vec(),
            },
            &mut self.xids,
        );
        self.send_msg(message);
    }

    /// Queue a message to the controller; silently dropped while the
    /// channel is down, fatal to the channel on queue overflow.
    fn send_msg(&mut self, buf: Buffer) {
        let Some(channel) = self.channel.as_mut() else {
            trace!("dropping control message, channel down");
            return;
        };
        if channel.stage != ChannelStage::Ready {
            // handshake replies still flow before Ready
            if channel.stage == ChannelStage::Connecting {
                trace!("dropping control message, channel not established");
                return;
            }
        }
        if let Err(err) = channel.send(buf) {
            warn!(%err, "send queue overflow, closing channel");
            self.teardown_channel();
        }
    }
}
