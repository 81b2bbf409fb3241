// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `flow_mod` build and parse.

use crate::buffer::Buffer;
use crate::error::WireError;
use crate::header::{MsgType, begin_message, finish_message};
use crate::instructions::{self, Instruction};
use crate::oxm::Match;
use crate::port::{NO_BUFFER, port_no};
use crate::xid::XidGen;
use byteorder::{ByteOrder, NetworkEndian};

/// `ofp_flow_mod_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FlowModCommand {
    #[default]
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

impl FlowModCommand {
    fn from_wire(raw: u8) -> Result<FlowModCommand, WireError> {
        use FlowModCommand::*;
        Ok(match raw {
            0 => Add,
            1 => Modify,
            2 => ModifyStrict,
            3 => Delete,
            4 => DeleteStrict,
            other => return Err(WireError::UnknownFlowModCommand(other)),
        })
    }
}

bitflags::bitflags! {
    /// `ofp_flow_mod_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlowModFlags: u16 {
        const SEND_FLOW_REM = 1 << 0;
        const CHECK_OVERLAP = 1 << 1;
        const RESET_COUNTS = 1 << 2;
        const NO_PKT_COUNTS = 1 << 3;
        const NO_BYT_COUNTS = 1 << 4;
    }
}

/// `flow_mod` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub xid: Option<u32>,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u32,
    pub out_group: u32,
    pub flags: FlowModFlags,
    pub matches: Match,
    pub instructions: Vec<Instruction>,
}

impl Default for FlowMod {
    fn default() -> FlowMod {
        FlowMod {
            xid: None,
            cookie: 0,
            cookie_mask: 0,
            table_id: 0,
            command: FlowModCommand::Add,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: 0,
            buffer_id: NO_BUFFER,
            out_port: port_no::ANY,
            out_group: 0xffff_ffff, // OFPG_ANY
            flags: FlowModFlags::empty(),
            matches: Match::new(),
            instructions: Vec::new(),
        }
    }
}

impl FlowMod {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<FlowMod, WireError> {
        // fixed part after the message header, up to ofp_match
        if body.len() < 40 {
            return Err(WireError::Truncated {
                what: "ofp_flow_mod",
                needed: 40,
                got: body.len(),
            });
        }
        let (matches, match_len) = Match::decode(&body[40..])?;
        let instructions = instructions::decode_set(&body[40 + match_len..])?;
        Ok(FlowMod {
            xid,
            cookie: NetworkEndian::read_u64(&body[0..8]),
            cookie_mask: NetworkEndian::read_u64(&body[8..16]),
            table_id: body[16],
            command: FlowModCommand::from_wire(body[17])?,
            idle_timeout: NetworkEndian::read_u16(&body[18..20]),
            hard_timeout: NetworkEndian::read_u16(&body[20..22]),
            priority: NetworkEndian::read_u16(&body[22..24]),
            buffer_id: NetworkEndian::read_u32(&body[24..28]),
            out_port: NetworkEndian::read_u32(&body[28..32]),
            out_group: NetworkEndian::read_u32(&body[32..36]),
            flags: FlowModFlags::from_bits_truncate(NetworkEndian::read_u16(&body[36..38])),
            matches,
            instructions,
        })
    }
}

/// Build a `flow_mod`.
pub fn pack_flow_mod(options: &FlowMod, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::FlowMod, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(40);
        NetworkEndian::write_u64(&mut out[0..8], options.cookie);
        NetworkEndian::write_u64(&mut out[8..16], options.cookie_mask);
        out[16] = options.table_id;
        out[17] = options.command as u8;
        NetworkEndian::write_u16(&mut out[18..20], options.idle_timeout);
        NetworkEndian::write_u16(&mut out[20..22], options.hard_timeout);
        NetworkEndian::write_u16(&mut out[22..24], options.priority);
        NetworkEndian::write_u32(&mut out[24..28], options.buffer_id);
        NetworkEndian::write_u32(&mut out[28..32], options.out_port);
        NetworkEndian::write_u32(&mut out[32..36], options.out_group);
        NetworkEndian::write_u16(&mut out[36..38], options.flags.bits());
        // 2 pad bytes
    }
    options.matches.encode(&mut buf);
    instructions::encode_set(&options.instructions, &mut buf);
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

    #[test]
    fn roundtrip_with_match_and_instructions() {
        let mut matches = Match::new();
        matches.append(MatchField::InPort(1)).unwrap();
        matches.append(MatchField::EthType(0x0800)).unwrap();

        let options = FlowMod {
            xid: Some(7),
            cookie: 0xdead_beef,
            table_id: 0,
            command: FlowModCommand::Add,
            idle_timeout: 30,
            priority: 100,
            flags: FlowModFlags::SEND_FLOW_REM,
            matches,
            instructions: vec![Instruction::ApplyActions(vec![Action::Output {
                port: 2,
                max_len: 0xffff,
            }])],
            ..FlowMod::default()
        };
        let mut xids = XidGen::new();
        let buf = pack_flow_mod(&options, &mut xids);
        let (message, consumed) = Message::decode(buf.as_ref()).unwrap();
        assert_eq!(consumed, buf.len());
        let Message::FlowMod(back) = message else {
            panic!("expected flow mod");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn delete_all_is_forty_eight_bytes_of_body() {
        // delete with an empty match: 8 header + 40 fixed + 8 padded match
        let options = FlowMod {
            command: FlowModCommand::Delete,
            table_id: 0xff, // OFPTT_ALL
            ..FlowMod::default()
        };
        let mut xids = XidGen::new();
        let buf = pack_flow_mod(&options, &mut xids);
        assert_eq!(buf.len(), 56);
    }

    #[test]
    fn bad_command_is_rejected() {
        let options = FlowMod::default();
        let mut xids = XidGen::new();
        let mut buf = pack_flow_mod(&options, &mut xids);
        buf.as_mut()[8 + 17] = 9; // command byte
        assert!(matches!(
            Message::decode(buf.as_ref()),
            Err(WireError::UnknownFlowModCommand(9))
        ));
    }
}
