// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Multipart request/reply build and parse.
//!
//! The bodies this core originates or consumes (DESC, FLOW, AGGREGATE,
//! TABLE, PORT, GROUP, GROUP_DESC, PORT_DESC and the fixed-shape request
//! bodies) are fully typed; the remaining body families round-trip as raw
//! bytes so nothing on the wire is ever dropped.

use crate::buffer::Buffer;
use crate::error::WireError;
use crate::header::{MsgType, begin_message, finish_message};
use crate::instructions::{self, Instruction};
use crate::messages::flow_mod::FlowModFlags;
use crate::messages::group_mod::{Bucket, GroupType, decode_buckets};
use crate::oxm::Match;
use crate::port::{PORT_DESC_LEN, PortDesc, port_no};
use crate::xid::XidGen;
use byteorder::{ByteOrder, NetworkEndian};

/// `ofp_multipart_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MultipartType {
    Desc = 0,
    Flow = 1,
    Aggregate = 2,
    Table = 3,
    Port = 4,
    Queue = 5,
    Group = 6,
    GroupDesc = 7,
    GroupFeatures = 8,
    Meter = 9,
    MeterConfig = 10,
    MeterFeatures = 11,
    TableFeatures = 12,
    PortDesc = 13,
    Experimenter = 0xffff,
}

impl MultipartType {
    fn from_wire(raw: u16) -> Result<MultipartType, WireError> {
        Ok(match raw {
            0 => MultipartType::Desc,
            1 => MultipartType::Flow,
            2 => MultipartType::Aggregate,
            3 => MultipartType::Table,
            4 => MultipartType::Port,
            5 => MultipartType::Queue,
            6 => MultipartType::Group,
            7 => MultipartType::GroupDesc,
            8 => MultipartType::GroupFeatures,
            9 => MultipartType::Meter,
            10 => MultipartType::MeterConfig,
            11 => MultipartType::MeterFeatures,
            12 => MultipartType::TableFeatures,
            13 => MultipartType::PortDesc,
            0xffff => MultipartType::Experimenter,
            other => return Err(WireError::UnknownMultipartType(other)),
        })
    }
}

bitflags::bitflags! {
    /// `ofp_multipart_request_flags` / `ofp_multipart_reply_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MultipartFlags: u16 {
        /// More fragments of this reply/request follow.
        const MORE = 1 << 0;
    }
}

/// Filter carried by FLOW and AGGREGATE requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStatsRequest {
    pub table_id: u8,
    pub out_port: u32,
    pub out_group: u32,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub matches: Match,
}

impl Default for FlowStatsRequest {
    fn default() -> FlowStatsRequest {
        FlowStatsRequest {
            table_id: 0xff, // OFPTT_ALL
            out_port: port_no::ANY,
            out_group: 0xffff_ffff, // OFPG_ANY
            cookie: 0,
            cookie_mask: 0,
            matches: Match::new(),
        }
    }
}

impl FlowStatsRequest {
    fn encode_body(&self, buf: &mut Buffer) {
        {
            let out = buf.append_zeroed(32);
            out[0] = self.table_id;
            // 3 pad bytes
            NetworkEndian::write_u32(&mut out[4..8], self.out_port);
            NetworkEndian::write_u32(&mut out[8..12], self.out_group);
            // 4 pad bytes
            NetworkEndian::write_u64(&mut out[16..24], self.cookie);
            NetworkEndian::write_u64(&mut out[24..32], self.cookie_mask);
        }
        self.matches.encode(buf);
    }

    fn decode_body(body: &[u8]) -> Result<FlowStatsRequest, WireError> {
        if body.len() < 32 {
            return Err(WireError::Truncated {
                what: "flow stats request",
                needed: 32,
                got: body.len(),
            });
        }
        let (matches, _) = Match::decode(&body[32..])?;
        Ok(FlowStatsRequest {
            table_id: body[0],
            out_port: NetworkEndian::read_u32(&body[4..8]),
            out_group: NetworkEndian::read_u32(&body[8..12]),
            cookie: NetworkEndian::read_u64(&body[16..24]),
            cookie_mask: NetworkEndian::read_u64(&body[24..32]),
            matches,
        })
    }
}

/// Typed multipart request bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpRequestBody {
    Desc,
    Flow(FlowStatsRequest),
    Aggregate(FlowStatsRequest),
    Table,
    Port { port_no: u32 },
    Queue { port_no: u32, queue_id: u32 },
    Group { group_id: u32 },
    GroupDesc,
    GroupFeatures,
    Meter { meter_id: u32 },
    MeterConfig { meter_id: u32 },
    MeterFeatures,
    TableFeatures(Vec<u8>),
    PortDesc,
    Experimenter(Vec<u8>),
}

impl MpRequestBody {
    /// The multipart type this body belongs to.
    #[must_use]
    pub fn mp_type(&self) -> MultipartType {
        use MpRequestBody as B;
        match self {
            B::Desc => MultipartType::Desc,
            B::Flow(_) => MultipartType::Flow,
            B::Aggregate(_) => MultipartType::Aggregate,
            B::Table => MultipartType::Table,
            B::Port { .. } => MultipartType::Port,
            B::Queue { .. } => MultipartType::Queue,
            B::Group { .. } => MultipartType::Group,
            B::GroupDesc => MultipartType::GroupDesc,
            B::GroupFeatures => MultipartType::GroupFeatures,
            B::Meter { .. } => MultipartType::Meter,
            B::MeterConfig { .. } => MultipartType::MeterConfig,
            B::MeterFeatures => MultipartType::MeterFeatures,
            B::TableFeatures(_) => MultipartType::TableFeatures,
            B::PortDesc => MultipartType::PortDesc,
            B::Experimenter(_) => MultipartType::Experimenter,
        }
    }
}

/// `multipart_request` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartRequest {
    pub xid: Option<u32>,
    pub flags: MultipartFlags,
    pub body: MpRequestBody,
}

impl Default for MultipartRequest {
    fn default() -> MultipartRequest {
        MultipartRequest {
            xid: None,
            flags: MultipartFlags::empty(),
            body: MpRequestBody::Desc,
        }
    }
}

impl MultipartRequest {
    pub(crate) fn decode_body(
        xid: Option<u32>,
        body: &[u8],
    ) -> Result<MultipartRequest, WireError> {
        if body.len() < 8 {
            return Err(WireError::Truncated {
                what: "ofp_multipart_request",
                needed: 8,
                got: body.len(),
            });
        }
        let mp_type = MultipartType::from_wire(NetworkEndian::read_u16(&body[0..2]))?;
        let flags = MultipartFlags::from_bits_truncate(NetworkEndian::read_u16(&body[2..4]));
        let rest = &body[8..];
        let fixed_u32 = |what: &'static str| -> Result<u32, WireError> {
            if rest.len() < 8 {
                return Err(WireError::Truncated {
                    what,
                    needed: 8,
                    got: rest.len(),
                });
            }
            Ok(NetworkEndian::read_u32(&rest[0..4]))
        };
        use MpRequestBody as B;
        let parsed = match mp_type {
            MultipartType::Desc => B::Desc,
            MultipartType::Flow => B::Flow(FlowStatsRequest::decode_body(rest)?),
            MultipartType::Aggregate => B::Aggregate(FlowStatsRequest::decode_body(rest)?),
            MultipartType::Table => B::Table,
            MultipartType::Port => B::Port {
                port_no: fixed_u32("port stats request")?,
            },
            MultipartType::Queue => {
                if rest.len() < 8 {
                    return Err(WireError::Truncated {
                        what: "queue stats request",
                        needed: 8,
                        got: rest.len(),
                    });
                }
                B::Queue {
                    port_no: NetworkEndian::read_u32(&rest[0..4]),
                    queue_id: NetworkEndian::read_u32(&rest[4..8]),
                }
            }
            MultipartType::Group => B::Group {
                group_id: fixed_u32("group stats request")?,
            },
            MultipartType::GroupDesc => B::GroupDesc,
            MultipartType::GroupFeatures => B::GroupFeatures,
            MultipartType::Meter => B::Meter {
                meter_id: fixed_u32("meter stats request")?,
            },
            MultipartType::MeterConfig => B::MeterConfig {
                meter_id: fixed_u32("meter config request")?,
            },
            MultipartType::MeterFeatures => B::MeterFeatures,
            MultipartType::TableFeatures => B::TableFeatures(rest.to_vec()),
            MultipartType::PortDesc => B::PortDesc,
            MultipartType::Experimenter => B::Experimenter(rest.to_vec()),
        };
        Ok(MultipartRequest {
            xid,
            flags,
            body: parsed,
        })
    }
}

/// Build a `multipart_request`.
pub fn pack_multipart_request(options: &MultipartRequest, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::MultipartRequest, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(8);
        NetworkEndian::write_u16(&mut out[0..2], options.body.mp_type() as u16);
        NetworkEndian::write_u16(&mut out[2..4], options.flags.bits());
        // 4 pad bytes
    }
    use MpRequestBody as B;
    match &options.body {
        B::Desc | B::Table | B::GroupDesc | B::GroupFeatures | B::MeterFeatures | B::PortDesc => {}
        B::Flow(filter) | B::Aggregate(filter) => filter.encode_body(&mut buf),
        B::Port { port_no } => {
            let out = buf.append_zeroed(8);
            NetworkEndian::write_u32(&mut out[0..4], *port_no);
        }
        B::Queue { port_no, queue_id } => {
            let out = buf.append_zeroed(8);
            NetworkEndian::write_u32(&mut out[0..4], *port_no);
            NetworkEndian::write_u32(&mut out[4..8], *queue_id);
        }
        B::Group { group_id } => {
            let out = buf.append_zeroed(8);
            NetworkEndian::write_u32(&mut out[0..4], *group_id);
        }
        B::Meter { meter_id } | B::MeterConfig { meter_id } => {
            let out = buf.append_zeroed(8);
            NetworkEndian::write_u32(&mut out[0..4], *meter_id);
        }
        B::TableFeatures(raw) | B::Experimenter(raw) => buf.append(raw),
    }
    finish_message(&mut buf);
    buf
}

const DESC_STR_LEN: usize = 256;
const SERIAL_NUM_LEN: usize = 32;

/// DESC reply body: four 256-byte strings and a 32-byte serial number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescStats {
    pub mfr_desc: String,
    pub hw_desc: String,
    pub sw_desc: String,
    pub serial_num: String,
    pub dp_desc: String,
}

fn write_padded_str(out: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(out.len() - 1);
    out[..n].copy_from_slice(&bytes[..n]);
}

fn read_padded_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl DescStats {
    const WIRE_LEN: usize = DESC_STR_LEN * 4 + SERIAL_NUM_LEN;

    fn encode_body(&self, buf: &mut Buffer) {
        let out = buf.append_zeroed(Self::WIRE_LEN);
        write_padded_str(&mut out[0..DESC_STR_LEN], &self.mfr_desc);
        write_padded_str(&mut out[DESC_STR_LEN..2 * DESC_STR_LEN], &self.hw_desc);
        write_padded_str(&mut out[2 * DESC_STR_LEN..3 * DESC_STR_LEN], &self.sw_desc);
        write_padded_str(
            &mut out[3 * DESC_STR_LEN..3 * DESC_STR_LEN + SERIAL_NUM_LEN],
            &self.serial_num,
        );
        write_padded_str(&mut out[3 * DESC_STR_LEN + SERIAL_NUM_LEN..], &self.dp_desc);
    }

    fn decode_body(body: &[u8]) -> Result<DescStats, WireError> {
        if body.len() < Self::WIRE_LEN {
            return Err(WireError::Truncated {
                what: "desc stats",
                needed: Self::WIRE_LEN,
                got: body.len(),
            });
        }
        Ok(DescStats {
            mfr_desc: read_padded_str(&body[0..DESC_STR_LEN]),
            hw_desc: read_padded_str(&body[DESC_STR_LEN..2 * DESC_STR_LEN]),
            sw_desc: read_padded_str(&body[2 * DESC_STR_LEN..3 * DESC_STR_LEN]),
            serial_num: read_padded_str(
                &body[3 * DESC_STR_LEN..3 * DESC_STR_LEN + SERIAL_NUM_LEN],
            ),
            dp_desc: read_padded_str(&body[3 * DESC_STR_LEN + SERIAL_NUM_LEN..Self::WIRE_LEN]),
        })
    }
}

/// One `ofp_flow_stats` entry of a FLOW reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowStatsEntry {
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    pub matches: Match,
    pub instructions: Vec<Instruction>,
}

impl FlowStatsEntry {
    fn encode(&self, buf: &mut Buffer) {
        let len = 48 + self.matches.encoded_len() + instructions::set_len(&self.instructions);
        {
            let out = buf.append_zeroed(48);
            debug_assert!(len <= usize::from(u16::MAX));
            #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
            NetworkEndian::write_u16(&mut out[0..2], len as u16);
            out[2] = self.table_id;
            // 1 pad byte
            NetworkEndian::write_u32(&mut out[4..8], self.duration_sec);
            NetworkEndian::write_u32(&mut out[8..12], self.duration_nsec);
            NetworkEndian::write_u16(&mut out[12..14], self.priority);
            NetworkEndian::write_u16(&mut out[14..16], self.idle_timeout);
            NetworkEndian::write_u16(&mut out[16..18], self.hard_timeout);
            NetworkEndian::write_u16(&mut out[18..20], self.flags.bits());
            // 4 pad bytes
            NetworkEndian::write_u64(&mut out[24..32], self.cookie);
            NetworkEndian::write_u64(&mut out[32..40], self.packet_count);
            NetworkEndian::write_u64(&mut out[40..48], self.byte_count);
        }
        self.matches.encode(buf);
        instructions::encode_set(&self.instructions, buf);
    }

    fn decode(buf: &[u8]) -> Result<(FlowStatsEntry, usize), WireError> {
        if buf.len() < 48 {
            return Err(WireError::Truncated {
                what: "ofp_flow_stats",
                needed: 48,
                got: buf.len(),
            });
        }
        let len = usize::from(NetworkEndian::read_u16(&buf[0..2]));
        if len < 48 || buf.len() < len {
            return Err(WireError::Truncated {
                what: "ofp_flow_stats body",
                needed: len.max(48),
                got: buf.len(),
            });
        }
        let (matches, match_len) = Match::decode(&buf[48..len])?;
        let instructions = instructions::decode_set(&buf[48 + match_len..len])?;
        Ok((
            FlowStatsEntry {
                table_id: buf[2],
                duration_sec: NetworkEndian::read_u32(&buf[4..8]),
                duration_nsec: NetworkEndian::read_u32(&buf[8..12]),
                priority: NetworkEndian::read_u16(&buf[12..14]),
                idle_timeout: NetworkEndian::read_u16(&buf[14..16]),
                hard_timeout: NetworkEndian::read_u16(&buf[16..18]),
                flags: FlowModFlags::from_bits_truncate(NetworkEndian::read_u16(&buf[18..20])),
                cookie: NetworkEndian::read_u64(&buf[24..32]),
                packet_count: NetworkEndian::read_u64(&buf[32..40]),
                byte_count: NetworkEndian::read_u64(&buf[40..48]),
                matches,
                instructions,
            },
            len,
        ))
    }
}

/// AGGREGATE reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregateStats {
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_count: u32,
}

/// One `ofp_table_stats` entry of a TABLE reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    pub table_id: u8,
    pub active_count: u32,
    pub lookup_count: u64,
    pub matched_count: u64,
}

/// One `ofp_port_stats` entry of a PORT reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStats {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_frame_err: u64,
    pub rx_over_err: u64,
    pub rx_crc_err: u64,
    pub collisions: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
}

impl PortStats {
    const WIRE_LEN: usize = 112;

    fn encode(&self, buf: &mut Buffer) {
        let out = buf.append_zeroed(Self::WIRE_LEN);
        NetworkEndian::write_u32(&mut out[0..4], self.port_no);
        // 4 pad bytes
        let counters = [
            self.rx_packets,
            self.tx_packets,
            self.rx_bytes,
            self.tx_bytes,
            self.rx_dropped,
            self.tx_dropped,
            self.rx_errors,
            self.tx_errors,
            self.rx_frame_err,
            self.rx_over_err,
            self.rx_crc_err,
            self.collisions,
        ];
        for (i, counter) in counters.iter().enumerate() {
            NetworkEndian::write_u64(&mut out[8 + i * 8..16 + i * 8], *counter);
        }
        NetworkEndian::write_u32(&mut out[104..108], self.duration_sec);
        NetworkEndian::write_u32(&mut out[108..112], self.duration_nsec);
    }

    fn decode(buf: &[u8]) -> Result<PortStats, WireError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(WireError::Truncated {
                what: "ofp_port_stats",
                needed: Self::WIRE_LEN,
                got: buf.len(),
            });
        }
        let counter = |i: usize| NetworkEndian::read_u64(&buf[8 + i * 8..16 + i * 8]);
        Ok(PortStats {
            port_no: NetworkEndian::read_u32(&buf[0..4]),
            rx_packets: counter(0),
            tx_packets: counter(1),
            rx_bytes: counter(2),
            tx_bytes: counter(3),
            rx_dropped: counter(4),
            tx_dropped: counter(5),
            rx_errors: counter(6),
            tx_errors: counter(7),
            rx_frame_err: counter(8),
            rx_over_err: counter(9),
            rx_crc_err: counter(10),
            collisions: counter(11),
            duration_sec: NetworkEndian::read_u32(&buf[104..108]),
            duration_nsec: NetworkEndian::read_u32(&buf[108..112]),
        })
    }
}

/// One `ofp_group_stats` entry of a GROUP reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupStats {
    pub group_id: u32,
    pub ref_count: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    /// Per-bucket (packet_count, byte_count) pairs.
    pub bucket_stats: Vec<(u64, u64)>,
}

impl GroupStats {
    fn wire_len(&self) -> usize {
        40 + self.bucket_stats.len() * 16
    }

    fn encode(&self, buf: &mut Buffer) {
        let len = self.wire_len();
        let out = buf.append_zeroed(len);
        debug_assert!(len <= usize::from(u16::MAX));
        #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
        NetworkEndian::write_u16(&mut out[0..2], len as u16);
        // 2 pad bytes
        NetworkEndian::write_u32(&mut out[4..8], self.group_id);
        NetworkEndian::write_u32(&mut out[8..12], self.ref_count);
        // 4 pad bytes
        NetworkEndian::write_u64(&mut out[16..24], self.packet_count);
        NetworkEndian::write_u64(&mut out[24..32], self.byte_count);
        NetworkEndian::write_u32(&mut out[32..36], self.duration_sec);
        NetworkEndian::write_u32(&mut out[36..40], self.duration_nsec);
        for (i, (packets, bytes)) in self.bucket_stats.iter().enumerate() {
            NetworkEndian::write_u64(&mut out[40 + i * 16..48 + i * 16], *packets);
            NetworkEndian::write_u64(&mut out[48 + i * 16..56 + i * 16], *bytes);
        }
    }

    fn decode(buf: &[u8]) -> Result<(GroupStats, usize), WireError> {
        if buf.len() < 40 {
            return Err(WireError::Truncated {
                what: "ofp_group_stats",
                needed: 40,
                got: buf.len(),
            });
        }
        let len = usize::from(NetworkEndian::read_u16(&buf[0..2]));
        if len < 40 || (len - 40) % 16 != 0 || buf.len() < len {
            return Err(WireError::Truncated {
                what: "ofp_group_stats body",
                needed: len.max(40),
                got: buf.len(),
            });
        }
        let bucket_stats = buf[40..len]
            .chunks_exact(16)
            .map(|pair| {
                (
                    NetworkEndian::read_u64(&pair[0..8]),
                    NetworkEndian::read_u64(&pair[8..16]),
                )
            })
            .collect();
        Ok((
            GroupStats {
                group_id: NetworkEndian::read_u32(&buf[4..8]),
                ref_count: NetworkEndian::read_u32(&buf[8..12]),
                packet_count: NetworkEndian::read_u64(&buf[16..24]),
                byte_count: NetworkEndian::read_u64(&buf[24..32]),
                duration_sec: NetworkEndian::read_u32(&buf[32..36]),
                duration_nsec: NetworkEndian::read_u32(&buf[36..40]),
                bucket_stats,
            },
            len,
        ))
    }
}

/// One `ofp_group_desc` entry of a GROUP_DESC reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupDescEntry {
    pub group_type: GroupType,
    pub group_id: u32,
    pub buckets: Vec<Bucket>,
}

impl GroupDescEntry {
    fn wire_len(&self) -> usize {
        8 + self.buckets.iter().map(Bucket::len).sum::<usize>()
    }

    fn encode(&self, buf: &mut Buffer) {
        let len = self.wire_len();
        {
            let out = buf.append_zeroed(8);
            debug_assert!(len <= usize::from(u16::MAX));
            #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
            NetworkEndian::write_u16(&mut out[0..2], len as u16);
            out[2] = self.group_type as u8;
            // 1 pad byte
            NetworkEndian::write_u32(&mut out[4..8], self.group_id);
        }
        for bucket in &self.buckets {
            bucket.encode(buf);
        }
    }

    fn decode(buf: &[u8]) -> Result<(GroupDescEntry, usize), WireError> {
        if buf.len() < 8 {
            return Err(WireError::Truncated {
                what: "ofp_group_desc",
                needed: 8,
                got: buf.len(),
            });
        }
        let len = usize::from(NetworkEndian::read_u16(&buf[0..2]));
        if len < 8 || buf.len() < len {
            return Err(WireError::Truncated {
                what: "ofp_group_desc body",
                needed: len.max(8),
                got: buf.len(),
            });
        }
        Ok((
            GroupDescEntry {
                group_type: GroupType::from_wire(buf[2]),
                group_id: NetworkEndian::read_u32(&buf[4..8]),
                buckets: decode_buckets(&buf[8..len])?,
            },
            len,
        ))
    }
}

/// Typed multipart reply bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpReplyBody {
    Desc(DescStats),
    Flow(Vec<FlowStatsEntry>),
    Aggregate(AggregateStats),
    Table(Vec<TableStats>),
    Port(Vec<PortStats>),
    Group(Vec<GroupStats>),
    GroupDesc(Vec<GroupDescEntry>),
    PortDesc(Vec<PortDesc>),
    /// Body families the core neither builds nor interprets.
    Raw { mp_type: MultipartType, body: Vec<u8> },
}

impl MpReplyBody {
    /// The multipart type this body belongs to.
    #[must_use]
    pub fn mp_type(&self) -> MultipartType {
        use MpReplyBody as B;
        match self {
            B::Desc(_) => MultipartType::Desc,
            B::Flow(_) => MultipartType::Flow,
            B::Aggregate(_) => MultipartType::Aggregate,
            B::Table(_) => MultipartType::Table,
            B::Port(_) => MultipartType::Port,
            B::Group(_) => MultipartType::Group,
            B::GroupDesc(_) => MultipartType::GroupDesc,
            B::PortDesc(_) => MultipartType::PortDesc,
            B::Raw { mp_type, .. } => *mp_type,
        }
    }
}

/// `multipart_reply` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartReply {
    pub xid: Option<u32>,
    pub flags: MultipartFlags,
    pub body: MpReplyBody,
}

impl MultipartReply {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<MultipartReply, WireError> {
        if body.len() < 8 {
            return Err(WireError::Truncated {
                what: "ofp_multipart_reply",
                needed: 8,
                got: body.len(),
            });
        }
        let mp_type = MultipartType::from_wire(NetworkEndian::read_u16(&body[0..2]))?;
        let flags = MultipartFlags::from_bits_truncate(NetworkEndian::read_u16(&body[2..4]));
        let rest = &body[8..];
        use MpReplyBody as B;
        let parsed = match mp_type {
            MultipartType::Desc => B::Desc(DescStats::decode_body(rest)?),
            MultipartType::Flow => {
                let mut entries = Vec::new();
                let mut at = 0;
                while at < rest.len() {
                    let (entry, consumed) = FlowStatsEntry::decode(&rest[at..])?;
                    entries.push(entry);
                    at += consumed;
                }
                B::Flow(entries)
            }
            MultipartType::Aggregate => {
                if rest.len() < 24 {
                    return Err(WireError::Truncated {
                        what: "aggregate stats",
                        needed: 24,
                        got: rest.len(),
                    });
                }
                B::Aggregate(AggregateStats {
                    packet_count: NetworkEndian::read_u64(&rest[0..8]),
                    byte_count: NetworkEndian::read_u64(&rest[8..16]),
                    flow_count: NetworkEndian::read_u32(&rest[16..20]),
                })
            }
            MultipartType::Table => {
                let mut entries = Vec::new();
                for chunk in rest.chunks_exact(24) {
                    entries.push(TableStats {
                        table_id: chunk[0],
                        active_count: NetworkEndian::read_u32(&chunk[4..8]),
                        lookup_count: NetworkEndian::read_u64(&chunk[8..16]),
                        matched_count: NetworkEndian::read_u64(&chunk[16..24]),
                    });
                }
                B::Table(entries)
            }
            MultipartType::Port => {
                let mut entries = Vec::new();
                let mut at = 0;
                while at + PortStats::WIRE_LEN <= rest.len() {
                    entries.push(PortStats::decode(&rest[at..])?);
                    at += PortStats::WIRE_LEN;
                }
                B::Port(entries)
            }
            MultipartType::Group => {
                let mut entries = Vec::new();
                let mut at = 0;
                while at < rest.len() {
                    let (entry, consumed) = GroupStats::decode(&rest[at..])?;
                    entries.push(entry);
                    at += consumed;
                }
                B::Group(entries)
            }
            MultipartType::GroupDesc => {
                let mut entries = Vec::new();
                let mut at = 0;
                while at < rest.len() {
                    let (entry, consumed) = GroupDescEntry::decode(&rest[at..])?;
                    entries.push(entry);
                    at += consumed;
                }
                B::GroupDesc(entries)
            }
            MultipartType::PortDesc => {
                let mut entries = Vec::new();
                let mut at = 0;
                while at + PORT_DESC_LEN <= rest.len() {
                    entries.push(PortDesc::decode(&rest[at..])?);
                    at += PORT_DESC_LEN;
                }
                B::PortDesc(entries)
            }
            other => B::Raw {
                mp_type: other,
                body: rest.to_vec(),
            },
        };
        Ok(MultipartReply {
            xid,
            flags,
            body: parsed,
        })
    }
}

/// Build a `multipart_reply`.
pub fn pack_multipart_reply(options: &MultipartReply, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::MultipartReply, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(8);
        NetworkEndian::write_u16(&mut out[0..2], options.body.mp_type() as u16);
        NetworkEndian::write_u16(&mut out[2..4], options.flags.bits());
        // 4 pad bytes
    }
    use MpReplyBody as B;
    match &options.body {
        B::Desc(desc) => desc.encode_body(&mut buf),
        B::Flow(entries) => {
            for entry in entries {
                entry.encode(&mut buf);
            }
        }
        B::Aggregate(stats) => {
            let out = buf.append_zeroed(24);
            NetworkEndian::write_u64(&mut out[0..8], stats.packet_count);
            NetworkEndian::write_u64(&mut out[8..16], stats.byte_count);
            NetworkEndian::write_u32(&mut out[16..20], stats.flow_count);
            // 4 pad bytes
        }
        B::Table(entries) => {
            for entry in entries {
                let out = buf.append_zeroed(24);
                out[0] = entry.table_id;
                // 3 pad bytes
                NetworkEndian::write_u32(&mut out[4..8], entry.active_count);
                NetworkEndian::write_u64(&mut out[8..16], entry.lookup_count);
                NetworkEndian::write_u64(&mut out[16..24], entry.matched_count);
            }
        }
        B::Port(entries) => {
            for entry in entries {
                entry.encode(&mut buf);
            }
        }
        B::Group(entries) => {
            for entry in entries {
                entry.encode(&mut buf);
            }
        }
        B::GroupDesc(entries) => {
            for entry in entries {
                entry.encode(&mut buf);
            }
        }
        B::PortDesc(entries) => {
            for entry in entries {
                let out = buf.append_zeroed(PORT_DESC_LEN);
                entry.encode_into(out);
            }
        }
        B::Raw { body, .. } => buf.append(body),
    }
    finish_message(&mut buf);
    buf
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::actions::Action;
    use crate::messages::Message;
    use crate::oxm::MatchField;
    use pretty_assertions::assert_eq;

    fn roundtrip(buf: &Buffer) -> Message {
        let (message, consumed) = Message::decode(buf.as_ref()).unwrap();
        assert_eq!(consumed, buf.len());
        message
    }

    #[test]
    fn desc_request_is_body_free() {
        let mut xids = XidGen::new();
        let buf = pack_multipart_request(&MultipartRequest::default(), &mut xids);
        assert_eq!(buf.len(), 16);
        let Message::MultipartRequest(back) = roundtrip(&buf) else {
            panic!("expected multipart request");
        };
        assert_eq!(back.body, MpRequestBody::Desc);
    }

    #[test]
    fn flow_request_roundtrip() {
        let mut matches = Match::new();
        matches.append(MatchField::EthType(0x0800)).unwrap();
        let options = MultipartRequest {
            xid: Some(21),
            flags: MultipartFlags::empty(),
            body: MpRequestBody::Flow(FlowStatsRequest {
                table_id: 2,
                matches,
                ..FlowStatsRequest::default()
            }),
        };
        let mut xids = XidGen::new();
        let buf = pack_multipart_request(&options, &mut xids);
        let Message::MultipartRequest(back) = roundtrip(&buf) else {
            panic!("expected multipart request");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn desc_reply_roundtrip() {
        let options = MultipartReply {
            xid: Some(1),
            flags: MultipartFlags::empty(),
            body: MpReplyBody::Desc(DescStats {
                mfr_desc: "ofstack".to_string(),
                hw_desc: "software".to_string(),
                sw_desc: "0.1.0".to_string(),
                serial_num: "none".to_string(),
                dp_desc: "test datapath".to_string(),
            }),
        };
        let mut xids = XidGen::new();
        let buf = pack_multipart_reply(&options, &mut xids);
        assert_eq!(buf.len(), 16 + 1056);
        let Message::MultipartReply(back) = roundtrip(&buf) else {
            panic!("expected multipart reply");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn flow_stats_reply_roundtrip() {
        let mut matches = Match::new();
        matches.append(MatchField::InPort(1)).unwrap();
        let options = MultipartReply {
            xid: Some(2),
            flags: MultipartFlags::MORE,
            body: MpReplyBody::Flow(vec![FlowStatsEntry {
                table_id: 0,
                duration_sec: 10,
                priority: 100,
                packet_count: 42,
                byte_count: 4200,
                matches,
                instructions: vec![Instruction::ApplyActions(vec![Action::Output {
                    port: 2,
                    max_len: 0xffff,
                }])],
                ..FlowStatsEntry::default()
            }]),
        };
        let mut xids = XidGen::new();
        let buf = pack_multipart_reply(&options, &mut xids);
        let Message::MultipartReply(back) = roundtrip(&buf) else {
            panic!("expected multipart reply");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn group_stats_reply_roundtrip() {
        let options = MultipartReply {
            xid: Some(3),
            flags: MultipartFlags::empty(),
            body: MpReplyBody::Group(vec![GroupStats {
                group_id: 7,
                ref_count: 1,
                packet_count: 5,
                byte_count: 500,
                duration_sec: 1,
                duration_nsec: 0,
                bucket_stats: vec![(3, 300), (2, 200)],
            }]),
        };
        let mut xids = XidGen::new();
        let buf = pack_multipart_reply(&options, &mut xids);
        let Message::MultipartReply(back) = roundtrip(&buf) else {
            panic!("expected multipart reply");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn unknown_reply_family_rides_raw() {
        let options = MultipartReply {
            xid: Some(4),
            flags: MultipartFlags::empty(),
            body: MpReplyBody::Raw {
                mp_type: MultipartType::MeterFeatures,
                body: vec![0; 16],
            },
        };
        let mut xids = XidGen::new();
        let buf = pack_multipart_reply(&options, &mut xids);
        let Message::MultipartReply(back) = roundtrip(&buf) else {
            panic!("expected multipart reply");
        };
        assert_eq!(back, options);
    }
}
