// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `flow_removed` build and parse.

use crate::buffer::Buffer;
use crate::error::WireError;
use crate::header::{MsgType, begin_message, finish_message};
use crate::oxm::Match;
use crate::xid::XidGen;
use byteorder::{ByteOrder, NetworkEndian};

/// `ofp_flow_removed_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FlowRemovedReason {
    #[default]
    IdleTimeout = 0,
    HardTimeout = 1,
    Delete = 2,
    GroupDelete = 3,
}

impl FlowRemovedReason {
    fn from_wire(raw: u8) -> FlowRemovedReason {
        match raw {
            1 => FlowRemovedReason::HardTimeout,
            2 => FlowRemovedReason::Delete,
            3 => FlowRemovedReason::GroupDelete,
            _ => FlowRemovedReason::IdleTimeout,
        }
    }
}

/// `flow_removed` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowRemoved {
    pub xid: Option<u32>,
    pub cookie: u64,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub matches: Match,
}

impl FlowRemoved {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<FlowRemoved, WireError> {
        if body.len() < 40 {
            return Err(WireError::Truncated {
                what: "ofp_flow_removed",
                needed: 40,
                got: body.len(),
            });
        }
        let (matches, _) = Match::decode(&body[40..])?;
        Ok(FlowRemoved {
            xid,
            cookie: NetworkEndian::read_u64(&body[0..8]),
            priority: NetworkEndian::read_u16(&body[8..10]),
            reason: FlowRemovedReason::from_wire(body[10]),
            table_id: body[11],
            duration_sec: NetworkEndian::read_u32(&body[12..16]),
            duration_nsec: NetworkEndian::read_u32(&body[16..20]),
            idle_timeout: NetworkEndian::read_u16(&body[20..22]),
            hard_timeout: NetworkEndian::read_u16(&body[22..24]),
            packet_count: NetworkEndian::read_u64(&body[24..32]),
            byte_count: NetworkEndian::read_u64(&body[32..40]),
            matches,
        })
    }
}

/// Build a `flow_removed`.
pub fn pack_flow_removed(options: &FlowRemoved, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::FlowRemoved, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(40);
        NetworkEndian::write_u64(&mut out[0..8], options.cookie);
        NetworkEndian::write_u16(&mut out[8..10], options.priority);
        out[10] = options.reason as u8;
        out[11] = options.table_id;
        NetworkEndian::write_u32(&mut out[12..16], options.duration_sec);
        NetworkEndian::write_u32(&mut out[16..20], options.duration_nsec);
        NetworkEndian::write_u16(&mut out[20..22], options.idle_timeout);
        NetworkEndian::write_u16(&mut out[22..24], options.hard_timeout);
        NetworkEndian::write_u64(&mut out[24..32], options.packet_count);
        NetworkEndian::write_u64(&mut out[32..40], options.byte_count);
    }
    options.matches.encode(&mut buf);
    finish_message(&mut buf);
    buf
}
