// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `group_mod` build and parse, plus the bucket codec shared with the
//! group-description multipart body.

use crate::actions::{self, Action};
use crate::buffer::Buffer;
use crate::error::WireError;
use crate::header::{MsgType, begin_message, finish_message};
use crate::xid::XidGen;
use byteorder::{ByteOrder, NetworkEndian};

/// `ofp_group_mod_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum GroupModCommand {
    #[default]
    Add = 0,
    Modify = 1,
    Delete = 2,
}

impl GroupModCommand {
    fn from_wire(raw: u16) -> Result<GroupModCommand, WireError> {
        Ok(match raw {
            0 => GroupModCommand::Add,
            1 => GroupModCommand::Modify,
            2 => GroupModCommand::Delete,
            other => return Err(WireError::UnknownGroupCommand(other)),
        })
    }
}

/// `ofp_group_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum GroupType {
    #[default]
    All = 0,
    Select = 1,
    Indirect = 2,
    FastFailover = 3,
}

impl GroupType {
    pub(crate) fn from_wire(raw: u8) -> GroupType {
        match raw {
            1 => GroupType::Select,
            2 => GroupType::Indirect,
            3 => GroupType::FastFailover,
            _ => GroupType::All,
        }
    }
}

/// One alternative within a group entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bucket {
    /// Relative share for SELECT groups.
    pub weight: u16,
    /// Port whose liveness gates this bucket in FAST_FAILOVER groups.
    pub watch_port: u32,
    /// Group whose liveness gates this bucket in FAST_FAILOVER groups.
    pub watch_group: u32,
    pub actions: Vec<Action>,
}

impl Bucket {
    /// Serialized length: 16-byte fixed part plus the action list.
    #[must_use]
    pub fn len(&self) -> usize {
        16 + actions::list_len(&self.actions)
    }

    pub(crate) fn encode(&self, buf: &mut Buffer) {
        let len = self.len();
        {
            let out = buf.append_zeroed(16);
            debug_assert!(len <= usize::from(u16::MAX));
            #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
            NetworkEndian::write_u16(&mut out[0..2], len as u16);
            NetworkEndian::write_u16(&mut out[2..4], self.weight);
            NetworkEndian::write_u32(&mut out[4..8], self.watch_port);
            NetworkEndian::write_u32(&mut out[8..12], self.watch_group);
            // 4 pad bytes
        }
        actions::encode_list(&self.actions, buf);
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<(Bucket, usize), WireError> {
        if buf.len() < 16 {
            return Err(WireError::Truncated {
                what: "ofp_bucket",
                needed: 16,
                got: buf.len(),
            });
        }
        let len = usize::from(NetworkEndian::read_u16(&buf[0..2]));
        if len < 16 || len % 8 != 0 || buf.len() < len {
            return Err(WireError::Truncated {
                what: "ofp_bucket body",
                needed: len.max(16),
                got: buf.len(),
            });
        }
        Ok((
            Bucket {
                weight: NetworkEndian::read_u16(&buf[2..4]),
                watch_port: NetworkEndian::read_u32(&buf[4..8]),
                watch_group: NetworkEndian::read_u32(&buf[8..12]),
                actions: actions::decode_list(&buf[16..len])?,
            },
            len,
        ))
    }
}

pub(crate) fn decode_buckets(buf: &[u8]) -> Result<Vec<Bucket>, WireError> {
    let mut buckets = Vec::new();
    let mut at = 0;
    while at < buf.len() {
        let (bucket, consumed) = Bucket::decode(&buf[at..])?;
        buckets.push(bucket);
        at += consumed;
    }
    Ok(buckets)
}

/// `group_mod` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupMod {
    pub xid: Option<u32>,
    pub command: GroupModCommand,
    pub group_type: GroupType,
    pub group_id: u32,
    pub buckets: Vec<Bucket>,
}

impl GroupMod {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<GroupMod, WireError> {
        if body.len() < 8 {
            return Err(WireError::Truncated {
                what: "ofp_group_mod",
                needed: 8,
                got: body.len(),
            });
        }
        Ok(GroupMod {
            xid,
            command: GroupModCommand::from_wire(NetworkEndian::read_u16(&body[0..2]))?,
            group_type: GroupType::from_wire(body[2]),
            group_id: NetworkEndian::read_u32(&body[4..8]),
            buckets: decode_buckets(&body[8..])?,
        })
    }
}

/// Build a `group_mod`.
pub fn pack_group_mod(options: &GroupMod, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::GroupMod, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(8);
        NetworkEndian::write_u16(&mut out[0..2], options.command as u16);
        out[2] = options.group_type as u8;
        // 1 pad byte
        NetworkEndian::write_u32(&mut out[4..8], options.group_id);
    }
    for bucket in &options.buckets {
        bucket.encode(&mut buf);
    }
    finish_message(&mut buf);
    buf
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::Message;
    use crate::port::port_no;
    use pretty_assertions::assert_eq;

    #[test]
    fn roundtrip_select_group() {
        let options = GroupMod {
            xid: Some(11),
            command: GroupModCommand::Add,
            group_type: GroupType::Select,
            group_id: 5,
            buckets: vec![
                Bucket {
                    weight: 2,
                    watch_port: port_no::ANY,
                    watch_group: 0xffff_ffff,
                    actions: vec![Action::Output {
                        port: 1,
                        max_len: 0,
                    }],
                },
                Bucket {
                    weight: 1,
                    watch_port: port_no::ANY,
                    watch_group: 0xffff_ffff,
                    actions: vec![Action::Output {
                        port: 2,
                        max_len: 0,
                    }],
                },
            ],
        };
        let mut xids = XidGen::new();
        let buf = pack_group_mod(&options, &mut xids);
        let (message, consumed) = Message::decode(buf.as_ref()).unwrap();
        assert_eq!(consumed, buf.len());
        let Message::GroupMod(back) = message else {
            panic!("expected group mod");
        };
        assert_eq!(back, options);
    }

    #[test]
    fn bucket_length_spans_its_actions() {
        let bucket = Bucket {
            weight: 0,
            watch_port: 0,
            watch_group: 0,
            actions: vec![Action::Output {
                port: 3,
                max_len: 0,
            }],
        };
        assert_eq!(bucket.len(), 32);
        let mut buf = Buffer::new();
        bucket.encode(&mut buf);
        let (back, consumed) = Bucket::decode(buf.as_ref()).unwrap();
        assert_eq!(consumed, 32);
        assert_eq!(back, bucket);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let raw_body = [0u8, 7, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            GroupMod::decode_body(Some(1), &raw_body),
            Err(WireError::UnknownGroupCommand(7))
        ));
    }
}
