// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Action TLV codec.
//!
//! Every action serializes to a 64-bit-aligned TLV: 2-byte type, 2-byte
//! length (header included), then a type-specific body padded to 8 bytes.
//! `SET_FIELD` embeds a single OXM entry and pads the total to 8.

use crate::buffer::Buffer;
use crate::error::WireError;
use crate::oxm::MatchField;
use byteorder::{ByteOrder, NetworkEndian};

mod action_type {
    pub const OUTPUT: u16 = 0;
    pub const COPY_TTL_OUT: u16 = 11;
    pub const COPY_TTL_IN: u16 = 12;
    pub const SET_MPLS_TTL: u16 = 15;
    pub const DEC_MPLS_TTL: u16 = 16;
    pub const PUSH_VLAN: u16 = 17;
    pub const POP_VLAN: u16 = 18;
    pub const PUSH_MPLS: u16 = 19;
    pub const POP_MPLS: u16 = 20;
    pub const SET_QUEUE: u16 = 21;
    pub const GROUP: u16 = 22;
    pub const SET_NW_TTL: u16 = 23;
    pub const DEC_NW_TTL: u16 = 24;
    pub const SET_FIELD: u16 = 25;
    pub const PUSH_PBB: u16 = 26;
    pub const POP_PBB: u16 = 27;
    pub const EXPERIMENTER: u16 = 0xffff;
}

/// One OpenFlow action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the packet out `port`; `max_len` bounds the bytes sent to the
    /// controller when `port` is `CONTROLLER`.
    Output { port: u32, max_len: u16 },
    CopyTtlOut,
    CopyTtlIn,
    SetMplsTtl(u8),
    DecMplsTtl,
    PushVlan(u16),
    PopVlan,
    PushMpls(u16),
    /// Pop the outermost MPLS shim; `ethertype` names the payload that is
    /// uncovered.
    PopMpls(u16),
    SetQueue(u32),
    Group(u32),
    SetNwTtl(u8),
    DecNwTtl,
    SetField(MatchField),
    PushPbb(u16),
    PopPbb,
    Experimenter(u32),
}

impl Action {
    /// Wire type discriminant.
    #[must_use]
    pub fn type_code(&self) -> u16 {
        use Action::*;
        match self {
            Output { .. } => action_type::OUTPUT,
            CopyTtlOut => action_type::COPY_TTL_OUT,
            CopyTtlIn => action_type::COPY_TTL_IN,
            SetMplsTtl(_) => action_type::SET_MPLS_TTL,
            DecMplsTtl => action_type::DEC_MPLS_TTL,
            PushVlan(_) => action_type::PUSH_VLAN,
            PopVlan => action_type::POP_VLAN,
            PushMpls(_) => action_type::PUSH_MPLS,
            PopMpls(_) => action_type::POP_MPLS,
            SetQueue(_) => action_type::SET_QUEUE,
            Group(_) => action_type::GROUP,
            SetNwTtl(_) => action_type::SET_NW_TTL,
            DecNwTtl => action_type::DEC_NW_TTL,
            SetField(_) => action_type::SET_FIELD,
            PushPbb(_) => action_type::PUSH_PBB,
            PopPbb => action_type::POP_PBB,
            Experimenter(_) => action_type::EXPERIMENTER,
        }
    }

    /// Serialized length, always a multiple of 8.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Action::Output { .. } => 16,
            Action::SetField(field) => (4 + field.entry_len()).div_ceil(8) * 8,
            _ => 8,
        }
    }

    /// Append the wire form to `buf`.
    pub fn encode(&self, buf: &mut Buffer) {
        use Action::*;
        let len = self.len();
        let out = buf.append_zeroed(len);
        NetworkEndian::write_u16(&mut out[0..2], self.type_code());
        debug_assert!(len <= usize::from(u16::MAX));
        #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
        NetworkEndian::write_u16(&mut out[2..4], len as u16);
        match self {
            Output { port, max_len } => {
                NetworkEndian::write_u32(&mut out[4..8], *port);
                NetworkEndian::write_u16(&mut out[8..10], *max_len);
                // 6 pad bytes
            }
            SetMplsTtl(ttl) | SetNwTtl(ttl) => out[4] = *ttl,
            PushVlan(ethertype) | PushMpls(ethertype) | PopMpls(ethertype)
            | PushPbb(ethertype) => {
                NetworkEndian::write_u16(&mut out[4..6], *ethertype);
            }
            SetQueue(id) | Group(id) | Experimenter(id) => {
                NetworkEndian::write_u32(&mut out[4..8], *id);
            }
            SetField(field) => {
                NetworkEndian::write_u32(&mut out[4..8], field.header());
                let mut scratch = [0u8; crate::oxm::field::MAX_FIELD_WIDTH];
                let mut at = 8;
                if let MatchField::Unknown { body, .. } = field {
                    out[at..at + body.len()].copy_from_slice(body);
                } else {
                    let width = field.value_bits(&mut scratch);
                    out[at..at + width].copy_from_slice(&scratch[..width]);
                    at += width;
                    if field.mask_bits(&mut scratch) {
                        out[at..at + width].copy_from_slice(&scratch[..width]);
                    }
                }
            }
            CopyTtlOut | CopyTtlIn | DecMplsTtl | PopVlan | DecNwTtl | PopPbb => {}
        }
    }

    /// Decode one action from the front of `buf`, returning it and the
    /// bytes consumed.
    ///
    /// # Errors
    ///
    /// Fails on truncation, an unknown type code, or a length field that
    /// does not fit the type.
    pub fn decode(buf: &[u8]) -> Result<(Action, usize), WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated {
                what: "ofp_action_header",
                needed: 4,
                got: buf.len(),
            });
        }
        let type_code = NetworkEndian::read_u16(&buf[0..2]);
        let len = NetworkEndian::read_u16(&buf[2..4]);
        let len_usize = usize::from(len);
        if len_usize < 8 || len_usize % 8 != 0 {
            return Err(WireError::BadActionLength {
                action: type_code,
                len,
            });
        }
        if buf.len() < len_usize {
            return Err(WireError::Truncated {
                what: "ofp_action body",
                needed: len_usize,
                got: buf.len(),
            });
        }
        let body = &buf[..len_usize];
        let fixed = |expected: usize| -> Result<(), WireError> {
            if len_usize == expected {
                Ok(())
            } else {
                Err(WireError::BadActionLength {
                    action: type_code,
                    len,
                })
            }
        };

        use Action::*;
        let action = match type_code {
            action_type::OUTPUT => {
                fixed(16)?;
                Output {
                    port: NetworkEndian::read_u32(&body[4..8]),
                    max_len: NetworkEndian::read_u16(&body[8..10]),
                }
            }
            action_type::COPY_TTL_OUT => {
                fixed(8)?;
                CopyTtlOut
            }
            action_type::COPY_TTL_IN => {
                fixed(8)?;
                CopyTtlIn
            }
            action_type::SET_MPLS_TTL => {
                fixed(8)?;
                SetMplsTtl(body[4])
            }
            action_type::DEC_MPLS_TTL => {
                fixed(8)?;
                DecMplsTtl
            }
            action_type::PUSH_VLAN => {
                fixed(8)?;
                PushVlan(NetworkEndian::read_u16(&body[4..6]))
            }
            action_type::POP_VLAN => {
                fixed(8)?;
                PopVlan
            }
            action_type::PUSH_MPLS => {
                fixed(8)?;
                PushMpls(NetworkEndian::read_u16(&body[4..6]))
            }
            action_type::POP_MPLS => {
                fixed(8)?;
                PopMpls(NetworkEndian::read_u16(&body[4..6]))
            }
            action_type::SET_QUEUE => {
                fixed(8)?;
                SetQueue(NetworkEndian::read_u32(&body[4..8]))
            }
            action_type::GROUP => {
                fixed(8)?;
                Group(NetworkEndian::read_u32(&body[4..8]))
            }
            action_type::SET_NW_TTL => {
                fixed(8)?;
                SetNwTtl(body[4])
            }
            action_type::DEC_NW_TTL => {
                fixed(8)?;
                DecNwTtl
            }
            action_type::SET_FIELD => {
                if len_usize < 16 {
                    return Err(WireError::BadActionLength {
                        action: type_code,
                        len,
                    });
                }
                let header = NetworkEndian::read_u32(&body[4..8]);
                let payload_len = (header & 0xff) as usize;
                if 8 + payload_len > len_usize {
                    return Err(WireError::BadActionLength {
                        action: type_code,
                        len,
                    });
                }
                SetField(MatchField::decode(header, &body[8..8 + payload_len])?)
            }
            action_type::PUSH_PBB => {
                fixed(8)?;
                PushPbb(NetworkEndian::read_u16(&body[4..6]))
            }
            action_type::POP_PBB => {
                fixed(8)?;
                PopPbb
            }
            action_type::EXPERIMENTER => {
                Experimenter(NetworkEndian::read_u32(&body[4..8]))
            }
            other => return Err(WireError::UnknownAction(other)),
        };
        Ok((action, len_usize))
    }
}

/// Serialized length of an action list.
#[must_use]
pub fn list_len(actions: &[Action]) -> usize {
    actions.iter().map(Action::len).sum()
}

/// Append every action in `actions` to `buf`, in order.
pub fn encode_list(actions: &[Action], buf: &mut Buffer) {
    for action in actions {
        action.encode(buf);
    }
}

/// Parse a complete action list occupying all of `buf`.
///
/// # Errors
///
/// Fails when any entry fails to decode; the list is all-or-nothing.
pub fn decode_list(buf: &[u8]) -> Result<Vec<Action>, WireError> {
    let mut actions = Vec::new();
    let mut at = 0;
    while at < buf.len() {
        let (action, consumed) = Action::decode(&buf[at..])?;
        actions.push(action);
        at += consumed;
    }
    Ok(actions)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn sample_list() -> Vec<Action> {
        vec![
            Action::Output {
                port: 2,
                max_len: 0xffff,
            },
            Action::PushVlan(0x8100),
            Action::SetField(MatchField::VlanVid {
                vid: crate::oxm::VLAN_VID_PRESENT | 7,
                mask: None,
            }),
            Action::SetField(MatchField::Ipv4Src {
                addr: Ipv4Addr::new(10, 1, 2, 3),
                mask: None,
            }),
            Action::Group(9),
            Action::DecNwTtl,
            Action::Experimenter(0x00cafe00),
        ]
    }

    #[test]
    fn list_roundtrip() {
        let actions = sample_list();
        let mut buf = Buffer::new();
        encode_list(&actions, &mut buf);
        assert_eq!(buf.len(), list_len(&actions));
        assert_eq!(buf.len() % 8, 0);
        assert_eq!(decode_list(buf.as_ref()).unwrap(), actions);
    }

    #[test]
    fn set_field_length_includes_oxm_and_pad() {
        // vlan_vid: 4 hdr + 4 oxm hdr + 2 value = 10, padded to 16
        let action = Action::SetField(MatchField::VlanVid { vid: 1, mask: None });
        assert_eq!(action.len(), 16);
        let mut buf = Buffer::new();
        action.encode(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(NetworkEndian::read_u16(&buf.as_ref()[2..4]), 16);
    }

    #[test]
    fn output_layout_is_bit_exact() {
        let action = Action::Output {
            port: 0xfffffffd,
            max_len: 128,
        };
        let mut buf = Buffer::new();
        action.encode(&mut buf);
        assert_eq!(
            buf.as_ref(),
            &[0, 0, 0, 16, 0xff, 0xff, 0xff, 0xfd, 0, 128, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = [0u8, 99, 0, 8, 0, 0, 0, 0];
        assert!(matches!(
            Action::decode(&raw),
            Err(WireError::UnknownAction(99))
        ));
    }

    #[test]
    fn unaligned_length_is_rejected() {
        let raw = [0u8, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Action::decode(&raw),
            Err(WireError::BadActionLength { action: 0, len: 12 })
        ));
    }
}
