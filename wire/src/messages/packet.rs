// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `packet_in` and `packet_out` build and parse.

use crate::actions::{self, Action};
use crate::buffer::Buffer;
use crate::error::WireError;
use crate::header::{MsgType, begin_message, finish_message};
use crate::oxm::Match;
use crate::port::{NO_BUFFER, port_no};
use crate::xid::XidGen;
use byteorder::{ByteOrder, NetworkEndian};

/// `ofp_packet_in_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PacketInReason {
    /// No matching flow; the table-miss path.
    #[default]
    NoMatch = 0,
    /// An `output(CONTROLLER)` action.
    Action = 1,
    InvalidTtl = 2,
}

impl PacketInReason {
    fn from_wire(raw: u8) -> PacketInReason {
        match raw {
            1 => PacketInReason::Action,
            2 => PacketInReason::InvalidTtl,
            _ => PacketInReason::NoMatch,
        }
    }
}

/// `packet_in` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub xid: Option<u32>,
    pub buffer_id: u32,
    /// Full length of the frame, of which `data` may be a truncation.
    pub total_len: u16,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
    pub matches: Match,
    pub data: Vec<u8>,
}

impl Default for PacketIn {
    fn default() -> PacketIn {
        PacketIn {
            xid: None,
            buffer_id: NO_BUFFER,
            total_len: 0,
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0,
            matches: Match::new(),
            data: Vec::new(),
        }
    }
}

impl PacketIn {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<PacketIn, WireError> {
        if body.len() < 16 {
            return Err(WireError::Truncated {
                what: "ofp_packet_in",
                needed: 16,
                got: body.len(),
            });
        }
        let (matches, match_len) = Match::decode(&body[16..])?;
        let rest = &body[16 + match_len..];
        if rest.len() < 2 {
            return Err(WireError::Truncated {
                what: "ofp_packet_in pad",
                needed: 2,
                got: rest.len(),
            });
        }
        Ok(PacketIn {
            xid,
            buffer_id: NetworkEndian::read_u32(&body[0..4]),
            total_len: NetworkEndian::read_u16(&body[4..6]),
            reason: PacketInReason::from_wire(body[6]),
            table_id: body[7],
            cookie: NetworkEndian::read_u64(&body[8..16]),
            matches,
            data: rest[2..].to_vec(),
        })
    }
}

/// Build a `packet_in`.
pub fn pack_packet_in(options: &PacketIn, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::PacketIn, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(16);
        NetworkEndian::write_u32(&mut out[0..4], options.buffer_id);
        NetworkEndian::write_u16(&mut out[4..6], options.total_len);
        out[6] = options.reason as u8;
        out[7] = options.table_id;
        NetworkEndian::write_u64(&mut out[8..16], options.cookie);
    }
    options.matches.encode(&mut buf);
    buf.append_zeroed(2);
    buf.append(&options.data);
    finish_message(&mut buf);
    buf
}

/// `packet_out` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub xid: Option<u32>,
    /// Switch buffer to release, or [`NO_BUFFER`] when `data` carries the
    /// frame inline.
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: Vec<Action>,
    pub data: Vec<u8>,
}

impl Default for PacketOut {
    fn default() -> PacketOut {
        PacketOut {
            xid: None,
            buffer_id: NO_BUFFER,
            in_port: port_no::CONTROLLER,
            actions: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl PacketOut {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<PacketOut, WireError> {
        if body.len() < 16 {
            return Err(WireError::Truncated {
                what: "ofp_packet_out",
                needed: 16,
                got: body.len(),
            });
        }
        let actions_len = usize::from(NetworkEndian::read_u16(&body[8..10]));
        if body.len() - 16 < actions_len {
            return Err(WireError::Truncated {
                what: "ofp_packet_out actions",
                needed: actions_len,
                got: body.len() - 16,
            });
        }
        Ok(PacketOut {
            xid,
            buffer_id: NetworkEndian::read_u32(&body[0..4]),
            in_port: NetworkEndian::read_u32(&body[4..8]),
            actions: actions::decode_list(&body[16..16 + actions_len])?,
            data: body[16 + actions_len..].to_vec(),
        })
    }
}

/// Build a `packet_out`. `data` is only emitted when `buffer_id` is
/// [`NO_BUFFER`].
pub fn pack_packet_out(options: &PacketOut, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::PacketOut, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(16);
        NetworkEndian::write_u32(&mut out[0..4], options.buffer_id);
        NetworkEndian::write_u32(&mut out[4..8], options.in_port);
        let actions_len = actions::list_len(&options.actions);
        debug_assert!(actions_len <= usize::from(u16::MAX));
        #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
        NetworkEndian::write_u16(&mut out[8..10], actions_len as u16);
        // 6 pad bytes
    }
    actions::encode_list(&options.actions, &mut buf);
    if options.buffer_id == NO_BUFFER {
        buf.append(&options.data);
    }
    finish_message(&mut buf);
    buf
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::Message;
    use crate::oxm::MatchField;
    use pretty_assertions::assert_eq;

    #[test]
    fn packet_in_roundtrip() {
        let mut matches = Match::new();
        matches.append(MatchField::InPort(4)).unwrap();
        let options = PacketIn {
            xid: Some(3),
            buffer_id: NO_BUFFER,
            total_len: 1500,
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0xffff_ffff_ffff_ffff,
            matches,
            data: vec![0xaa; 128],
        };
        let mut xids = XidGen::new();
        let buf = pack_packet_in(&options, &mut xids);
        let (message, consumed) = Message::decode(buf.as_ref()).unwrap();
        assert_eq!(consumed, buf.len());
        let Message::PacketIn(back) = message else {
            panic!("expected packet in");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn packet_out_inline_data_roundtrip() {
        let options = PacketOut {
            xid: None,
            buffer_id: NO_BUFFER,
            in_port: port_no::CONTROLLER,
            actions: vec![Action::Output {
                port: 1,
                max_len: 0,
            }],
            data: vec![1, 2, 3, 4],
        };
        let mut xids = XidGen::new();
        let buf = pack_packet_out(&options, &mut xids);
        let (message, _) = Message::decode(buf.as_ref()).unwrap();
        let Message::PacketOut(back) = message else {
            panic!("expected packet out");
        };
        assert_eq!(back.actions, options.actions);
        assert_eq!(back.data, options.data);
    }

    #[test]
    fn buffered_packet_out_omits_data() {
        let options = PacketOut {
            buffer_id: 77,
            data: vec![9; 100],
            ..PacketOut::default()
        };
        let mut xids = XidGen::new();
        let buf = pack_packet_out(&options, &mut xids);
        // header + fixed part only, no actions, no data
        assert_eq!(buf.len(), 24);
        let (message, _) = Message::decode(buf.as_ref()).unwrap();
        let Message::PacketOut(back) = message else {
            panic!("expected packet out");
        };
        assert_eq!(back.buffer_id, 77);
        assert!(back.data.is_empty());
    }
}
