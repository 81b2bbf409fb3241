// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Builders and parsers for every OpenFlow 1.3 message the core exchanges.
//!
//! Each message has an options struct with public fields and a `Default`
//! impl; `pack_*` builders turn options into a freshly allocated
//! [`Buffer`], allocating the transaction id from the caller's [`XidGen`]
//! when `xid` is `None`. [`Message::decode`] is the single entry point for
//! incoming bytes and yields the same structs with `xid` filled in.

mod flow_mod;
mod flow_removed;
mod group_mod;
mod multipart;
mod packet;
mod port_status;

pub use flow_mod::{FlowMod, FlowModCommand, FlowModFlags, pack_flow_mod};
pub use flow_removed::{FlowRemoved, FlowRemovedReason, pack_flow_removed};
pub use group_mod::{Bucket, GroupMod, GroupModCommand, GroupType, pack_group_mod};
pub use multipart::{
    AggregateStats, DescStats, FlowStatsEntry, FlowStatsRequest, GroupDescEntry, GroupStats,
    MpReplyBody, MpRequestBody, MultipartFlags, MultipartReply, MultipartRequest, MultipartType,
    PortStats, TableStats, pack_multipart_reply, pack_multipart_request,
};
pub use packet::{PacketIn, PacketInReason, PacketOut, pack_packet_in, pack_packet_out};
pub use port_status::{PortStatus, PortStatusReason, pack_port_status};

use crate::buffer::Buffer;
use crate::error::{ErrorKind, WireError};
use crate::header::{Header, MsgType, OFP_HEADER_LEN, OFP_VERSION, begin_message, finish_message};
use crate::xid::XidGen;
use byteorder::{ByteOrder, NetworkEndian};

/// A decoded OpenFlow message.
///
/// Types the core never processes (port-mod, table-mod, role, meter, queue
/// and async-config messages, experimenter) are surfaced as
/// [`Message::Unhandled`] so the router can answer `BAD_REQUEST/BAD_TYPE`
/// or hand them to a generic handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Error(ErrorMsg),
    EchoRequest(Echo),
    EchoReply(Echo),
    FeaturesRequest(FeaturesRequest),
    FeaturesReply(FeaturesReply),
    GetConfigRequest(GetConfigRequest),
    GetConfigReply(GetConfigReply),
    SetConfig(SetConfig),
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    GroupMod(GroupMod),
    MultipartRequest(MultipartRequest),
    MultipartReply(MultipartReply),
    BarrierRequest(BarrierRequest),
    BarrierReply(BarrierReply),
    Unhandled { header: Header, body: Vec<u8> },
}

impl Message {
    /// Decode one complete message from the front of `buf`, returning it
    /// and the bytes consumed (the header's `length`).
    ///
    /// # Errors
    ///
    /// Fails when the header is malformed, the buffer is shorter than the
    /// header's `length`, or the typed body fails to parse.
    pub fn decode(buf: &[u8]) -> Result<(Message, usize), WireError> {
        let header = Header::decode(buf)?;
        let total = usize::from(header.length);
        if buf.len() < total {
            return Err(WireError::Truncated {
                what: "message body",
                needed: total,
                got: buf.len(),
            });
        }
        let body = &buf[OFP_HEADER_LEN..total];
        let xid = Some(header.xid);
        let message = match header.msg_type {
            MsgType::Hello => Message::Hello(Hello::decode_body(xid, header.version, body)?),
            MsgType::Error => Message::Error(ErrorMsg::decode_body(xid, body)?),
            MsgType::EchoRequest => Message::EchoRequest(Echo {
                xid,
                data: body.to_vec(),
            }),
            MsgType::EchoReply => Message::EchoReply(Echo {
                xid,
                data: body.to_vec(),
            }),
            MsgType::FeaturesRequest => Message::FeaturesRequest(FeaturesRequest { xid }),
            MsgType::FeaturesReply => {
                Message::FeaturesReply(FeaturesReply::decode_body(xid, body)?)
            }
            MsgType::GetConfigRequest => Message::GetConfigRequest(GetConfigRequest { xid }),
            MsgType::GetConfigReply => Message::GetConfigReply(GetConfigReply {
                xid,
                config: SwitchConfig::decode_body(body)?,
            }),
            MsgType::SetConfig => Message::SetConfig(SetConfig {
                xid,
                config: SwitchConfig::decode_body(body)?,
            }),
            MsgType::PacketIn => Message::PacketIn(PacketIn::decode_body(xid, body)?),
            MsgType::FlowRemoved => Message::FlowRemoved(FlowRemoved::decode_body(xid, body)?),
            MsgType::PortStatus => Message::PortStatus(PortStatus::decode_body(xid, body)?),
            MsgType::PacketOut => Message::PacketOut(PacketOut::decode_body(xid, body)?),
            MsgType::FlowMod => Message::FlowMod(FlowMod::decode_body(xid, body)?),
            MsgType::GroupMod => Message::GroupMod(GroupMod::decode_body(xid, body)?),
            MsgType::MultipartRequest => {
                Message::MultipartRequest(MultipartRequest::decode_body(xid, body)?)
            }
            MsgType::MultipartReply => {
                Message::MultipartReply(MultipartReply::decode_body(xid, body)?)
            }
            MsgType::BarrierRequest => Message::BarrierRequest(BarrierRequest { xid }),
            MsgType::BarrierReply => Message::BarrierReply(BarrierReply { xid }),
            _ => Message::Unhandled {
                header,
                body: body.to_vec(),
            },
        };
        Ok((message, total))
    }

    /// The transaction id the message arrived with, when decoded.
    #[must_use]
    pub fn xid(&self) -> Option<u32> {
        match self {
            Message::Hello(m) => m.xid,
            Message::Error(m) => m.xid,
            Message::EchoRequest(m) | Message::EchoReply(m) => m.xid,
            Message::FeaturesRequest(m) => m.xid,
            Message::FeaturesReply(m) => m.xid,
            Message::GetConfigRequest(m) => m.xid,
            Message::GetConfigReply(m) => m.xid,
            Message::SetConfig(m) => m.xid,
            Message::PacketIn(m) => m.xid,
            Message::FlowRemoved(m) => m.xid,
            Message::PortStatus(m) => m.xid,
            Message::PacketOut(m) => m.xid,
            Message::FlowMod(m) => m.xid,
            Message::GroupMod(m) => m.xid,
            Message::MultipartRequest(m) => m.xid,
            Message::MultipartReply(m) => m.xid,
            Message::BarrierRequest(m) => m.xid,
            Message::BarrierReply(m) => m.xid,
            Message::Unhandled { header, .. } => Some(header.xid),
        }
    }
}

bitflags::bitflags! {
    /// `ofp_capabilities` of a features reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        const FLOW_STATS = 1 << 0;
        const TABLE_STATS = 1 << 1;
        const PORT_STATS = 1 << 2;
        const GROUP_STATS = 1 << 3;
        const IP_REASM = 1 << 5;
        const QUEUE_STATS = 1 << 6;
        const PORT_BLOCKED = 1 << 8;
    }
}

bitflags::bitflags! {
    /// `ofp_config_flags`: fragment handling policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u16 {
        const FRAG_DROP = 1 << 0;
        const FRAG_REASM = 1 << 1;
    }
}

/// `hello`, with the version bitmap element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    pub xid: Option<u32>,
    /// Protocol versions offered. Empty means "header version only", the
    /// element-free form older peers send.
    pub versions: Vec<u8>,
    /// The version byte of the message header itself.
    pub header_version: u8,
}

impl Hello {
    /// The highest version both peers offer, if any.
    #[must_use]
    pub fn agreed_version(&self, ours: u8) -> Option<u8> {
        if self.versions.is_empty() {
            (self.header_version == ours).then_some(ours)
        } else {
            self.versions.iter().copied().filter(|&v| v == ours).max()
        }
    }

    fn decode_body(xid: Option<u32>, version: u8, body: &[u8]) -> Result<Hello, WireError> {
        let mut versions = Vec::new();
        let mut at = 0;
        while at + 4 <= body.len() {
            let elem_type = NetworkEndian::read_u16(&body[at..at + 2]);
            let elem_len = usize::from(NetworkEndian::read_u16(&body[at + 2..at + 4]));
            if elem_len < 4 || body.len() - at < elem_len {
                return Err(WireError::Truncated {
                    what: "hello element",
                    needed: elem_len.max(4),
                    got: body.len() - at,
                });
            }
            // VERSIONBITMAP is the only element type defined by OF 1.3
            if elem_type == 1 {
                for (word_index, word) in body[at + 4..at + elem_len].chunks_exact(4).enumerate() {
                    let bitmap = NetworkEndian::read_u32(word);
                    for bit in 0..32 {
                        if bitmap & (1 << bit) != 0 {
                            #[allow(clippy::cast_possible_truncation)] // < 64
                            versions.push((word_index * 32 + bit) as u8);
                        }
                    }
                }
            }
            at += elem_len.div_ceil(8) * 8;
        }
        Ok(Hello {
            xid,
            versions,
            header_version: version,
        })
    }
}

/// Build a `hello` carrying a one-word version bitmap.
pub fn pack_hello(options: &Hello, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::Hello, xids.resolve(options.xid));
    let versions: &[u8] = if options.versions.is_empty() {
        &[OFP_VERSION]
    } else {
        &options.versions
    };
    let mut bitmap = 0u32;
    for &version in versions {
        debug_assert!(version < 32, "single bitmap word supported");
        bitmap |= 1 << version;
    }
    let elem = buf.append_zeroed(8);
    NetworkEndian::write_u16(&mut elem[0..2], 1); // VERSIONBITMAP
    NetworkEndian::write_u16(&mut elem[2..4], 8);
    NetworkEndian::write_u32(&mut elem[4..8], bitmap);
    finish_message(&mut buf);
    buf
}

/// `echo_request` / `echo_reply` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Echo {
    pub xid: Option<u32>,
    pub data: Vec<u8>,
}

/// Build an `echo_request`.
pub fn pack_echo_request(options: &Echo, xids: &mut XidGen) -> Buffer {
    pack_echo(MsgType::EchoRequest, options, xids)
}

/// Build an `echo_reply`; `xid` and `data` must mirror the request.
pub fn pack_echo_reply(options: &Echo, xids: &mut XidGen) -> Buffer {
    pack_echo(MsgType::EchoReply, options, xids)
}

fn pack_echo(msg_type: MsgType, options: &Echo, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, msg_type, xids.resolve(options.xid));
    buf.append(&options.data);
    finish_message(&mut buf);
    buf
}

/// `features_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeaturesRequest {
    pub xid: Option<u32>,
}

/// Build a `features_request`.
pub fn pack_features_request(options: &FeaturesRequest, xids: &mut XidGen) -> Buffer {
    pack_header_only(MsgType::FeaturesRequest, options.xid, xids)
}

/// The immutable per-connection switch description of a features reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub auxiliary_id: u8,
    pub capabilities: Capabilities,
}

/// `features_reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeaturesReply {
    pub xid: Option<u32>,
    pub features: SwitchFeatures,
}

impl FeaturesReply {
    fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<FeaturesReply, WireError> {
        if body.len() < 24 {
            return Err(WireError::Truncated {
                what: "ofp_switch_features",
                needed: 24,
                got: body.len(),
            });
        }
        Ok(FeaturesReply {
            xid,
            features: SwitchFeatures {
                datapath_id: NetworkEndian::read_u64(&body[0..8]),
                n_buffers: NetworkEndian::read_u32(&body[8..12]),
                n_tables: body[12],
                auxiliary_id: body[13],
                capabilities: Capabilities::from_bits_truncate(NetworkEndian::read_u32(
                    &body[16..20],
                )),
            },
        })
    }
}

/// Build a `features_reply`.
pub fn pack_features_reply(options: &FeaturesReply, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::FeaturesReply, xids.resolve(options.xid));
    let out = buf.append_zeroed(24);
    NetworkEndian::write_u64(&mut out[0..8], options.features.datapath_id);
    NetworkEndian::write_u32(&mut out[8..12], options.features.n_buffers);
    out[12] = options.features.n_tables;
    out[13] = options.features.auxiliary_id;
    NetworkEndian::write_u32(&mut out[16..20], options.features.capabilities.bits());
    // 4 reserved bytes
    finish_message(&mut buf);
    buf
}

/// `get_config_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetConfigRequest {
    pub xid: Option<u32>,
}

/// Build a `get_config_request`.
pub fn pack_get_config_request(options: &GetConfigRequest, xids: &mut XidGen) -> Buffer {
    pack_header_only(MsgType::GetConfigRequest, options.xid, xids)
}

/// The mutable switch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    pub flags: ConfigFlags,
    /// Bytes of a miss packet sent to the controller.
    pub miss_send_len: u16,
}

impl Default for SwitchConfig {
    fn default() -> SwitchConfig {
        SwitchConfig {
            flags: ConfigFlags::empty(),
            miss_send_len: 128,
        }
    }
}

impl SwitchConfig {
    fn decode_body(body: &[u8]) -> Result<SwitchConfig, WireError> {
        if body.len() < 4 {
            return Err(WireError::Truncated {
                what: "ofp_switch_config",
                needed: 4,
                got: body.len(),
            });
        }
        Ok(SwitchConfig {
            flags: ConfigFlags::from_bits_truncate(NetworkEndian::read_u16(&body[0..2])),
            miss_send_len: NetworkEndian::read_u16(&body[2..4]),
        })
    }

    fn encode_body(self, buf: &mut Buffer) {
        let out = buf.append_zeroed(4);
        NetworkEndian::write_u16(&mut out[0..2], self.flags.bits());
        NetworkEndian::write_u16(&mut out[2..4], self.miss_send_len);
    }
}

/// `get_config_reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetConfigReply {
    pub xid: Option<u32>,
    pub config: SwitchConfig,
}

/// Build a `get_config_reply`.
pub fn pack_get_config_reply(options: &GetConfigReply, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::GetConfigReply, xids.resolve(options.xid));
    options.config.encode_body(&mut buf);
    finish_message(&mut buf);
    buf
}

/// `set_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetConfig {
    pub xid: Option<u32>,
    pub config: SwitchConfig,
}

/// Build a `set_config`.
pub fn pack_set_config(options: &SetConfig, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::SetConfig, xids.resolve(options.xid));
    options.config.encode_body(&mut buf);
    finish_message(&mut buf);
    buf
}

/// `barrier_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarrierRequest {
    pub xid: Option<u32>,
}

/// Build a `barrier_request`.
pub fn pack_barrier_request(options: &BarrierRequest, xids: &mut XidGen) -> Buffer {
    pack_header_only(MsgType::BarrierRequest, options.xid, xids)
}

/// `barrier_reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarrierReply {
    pub xid: Option<u32>,
}

/// Build a `barrier_reply`; `xid` must mirror the request.
pub fn pack_barrier_reply(options: &BarrierReply, xids: &mut XidGen) -> Buffer {
    pack_header_only(MsgType::BarrierReply, options.xid, xids)
}

/// `error` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub xid: Option<u32>,
    pub kind: ErrorKind,
    /// At least the first 64 bytes of the offending request.
    pub data: Vec<u8>,
}

impl ErrorMsg {
    fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<ErrorMsg, WireError> {
        if body.len() < 4 {
            return Err(WireError::Truncated {
                what: "ofp_error_msg",
                needed: 4,
                got: body.len(),
            });
        }
        Ok(ErrorMsg {
            xid,
            kind: ErrorKind::from_wire(
                NetworkEndian::read_u16(&body[0..2]),
                NetworkEndian::read_u16(&body[2..4]),
            ),
            data: body[4..].to_vec(),
        })
    }
}

/// Build an `error`; `xid` should mirror the offending request.
pub fn pack_error(options: &ErrorMsg, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::Error, xids.resolve(options.xid));
    let out = buf.append_zeroed(4);
    NetworkEndian::write_u16(&mut out[0..2], options.kind.error_type());
    NetworkEndian::write_u16(&mut out[2..4], options.kind.code());
    let clamp = options.data.len().min(64);
    buf.append(&options.data[..clamp]);
    finish_message(&mut buf);
    buf
}

fn pack_header_only(msg_type: MsgType, xid: Option<u32>, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, msg_type, xids.resolve(xid));
    finish_message(&mut buf);
    buf
}
