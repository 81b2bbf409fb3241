// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Instruction TLV codec.
//!
//! Instructions are 64-bit-aligned TLVs like actions; the two action-list
//! instructions embed an action list whose length is spanned by the
//! instruction's own length field.

use crate::actions::{self, Action};
use crate::buffer::Buffer;
use crate::error::WireError;
use byteorder::{ByteOrder, NetworkEndian};

mod instruction_type {
    pub const GOTO_TABLE: u16 = 1;
    pub const WRITE_METADATA: u16 = 2;
    pub const WRITE_ACTIONS: u16 = 3;
    pub const APPLY_ACTIONS: u16 = 4;
    pub const CLEAR_ACTIONS: u16 = 5;
    pub const METER: u16 = 6;
    pub const EXPERIMENTER: u16 = 0xffff;
}

/// One instruction of a flow entry's instruction set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    GotoTable(u8),
    WriteMetadata { value: u64, mask: u64 },
    WriteActions(Vec<Action>),
    ApplyActions(Vec<Action>),
    ClearActions,
    Meter(u32),
    Experimenter(u32),
}

impl Instruction {
    /// Wire type discriminant.
    #[must_use]
    pub fn type_code(&self) -> u16 {
        use Instruction::*;
        match self {
            GotoTable(_) => instruction_type::GOTO_TABLE,
            WriteMetadata { .. } => instruction_type::WRITE_METADATA,
            WriteActions(_) => instruction_type::WRITE_ACTIONS,
            ApplyActions(_) => instruction_type::APPLY_ACTIONS,
            ClearActions => instruction_type::CLEAR_ACTIONS,
            Meter(_) => instruction_type::METER,
            Experimenter(_) => instruction_type::EXPERIMENTER,
        }
    }

    /// Serialized length, always a multiple of 8.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Instruction::WriteMetadata { .. } => 24,
            Instruction::WriteActions(list) | Instruction::ApplyActions(list) => {
                8 + actions::list_len(list)
            }
            _ => 8,
        }
    }

    /// Append the wire form to `buf`.
    pub fn encode(&self, buf: &mut Buffer) {
        use Instruction::*;
        let len = self.len();
        {
            let out = buf.append_zeroed(8);
            NetworkEndian::write_u16(&mut out[0..2], self.type_code());
            debug_assert!(len <= usize::from(u16::MAX));
            #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
            NetworkEndian::write_u16(&mut out[2..4], len as u16);
            match self {
                GotoTable(table_id) => out[4] = *table_id,
                Meter(id) | Experimenter(id) => NetworkEndian::write_u32(&mut out[4..8], *id),
                _ => {}
            }
        }
        match self {
            WriteMetadata { value, mask } => {
                let out = buf.append_zeroed(16);
                NetworkEndian::write_u64(&mut out[0..8], *value);
                NetworkEndian::write_u64(&mut out[8..16], *mask);
            }
            WriteActions(list) | ApplyActions(list) => actions::encode_list(list, buf),
            _ => {}
        }
    }

    /// Decode one instruction from the front of `buf`, returning it and the
    /// bytes consumed.
    ///
    /// # Errors
    ///
    /// Fails on truncation, an unknown type code, a misfit length, or a bad
    /// embedded action list.
    pub fn decode(buf: &[u8]) -> Result<(Instruction, usize), WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated {
                what: "ofp_instruction header",
                needed: 4,
                got: buf.len(),
            });
        }
        let type_code = NetworkEndian::read_u16(&buf[0..2]);
        let len = NetworkEndian::read_u16(&buf[2..4]);
        let len_usize = usize::from(len);
        if len_usize < 8 || len_usize % 8 != 0 {
            return Err(WireError::BadInstructionLength {
                instruction: type_code,
                len,
            });
        }
        if buf.len() < len_usize {
            return Err(WireError::Truncated {
                what: "ofp_instruction body",
                needed: len_usize,
                got: buf.len(),
            });
        }
        let body = &buf[..len_usize];
        let fixed = |expected: usize| -> Result<(), WireError> {
            if len_usize == expected {
                Ok(())
            } else {
                Err(WireError::BadInstructionLength {
                    instruction: type_code,
                    len,
                })
            }
        };

        use Instruction::*;
        let instruction = match type_code {
            instruction_type::GOTO_TABLE => {
                fixed(8)?;
                GotoTable(body[4])
            }
            instruction_type::WRITE_METADATA => {
                fixed(24)?;
                WriteMetadata {
                    value: NetworkEndian::read_u64(&body[8..16]),
                    mask: NetworkEndian::read_u64(&body[16..24]),
                }
            }
            instruction_type::WRITE_ACTIONS => {
                WriteActions(actions::decode_list(&body[8..])?)
            }
            instruction_type::APPLY_ACTIONS => {
                ApplyActions(actions::decode_list(&body[8..])?)
            }
            instruction_type::CLEAR_ACTIONS => {
                fixed(8)?;
                ClearActions
            }
            instruction_type::METER => {
                fixed(8)?;
                Meter(NetworkEndian::read_u32(&body[4..8]))
            }
            instruction_type::EXPERIMENTER => {
                Experimenter(NetworkEndian::read_u32(&body[4..8]))
            }
            other => return Err(WireError::UnknownInstruction(other)),
        };
        Ok((instruction, len_usize))
    }
}

/// Serialized length of an instruction set.
#[must_use]
pub fn set_len(instructions: &[Instruction]) -> usize {
    instructions.iter().map(Instruction::len).sum()
}

/// Append every instruction in `instructions` to `buf`, in order.
pub fn encode_set(instructions: &[Instruction], buf: &mut Buffer) {
    for instruction in instructions {
        instruction.encode(buf);
    }
}

/// Parse a complete instruction set occupying all of `buf`.
///
/// # Errors
///
/// Fails when any entry fails to decode; the set is all-or-nothing.
pub fn decode_set(buf: &[u8]) -> Result<Vec<Instruction>, WireError> {
    let mut instructions = Vec::new();
    let mut at = 0;
    while at < buf.len() {
        let (instruction, consumed) = Instruction::decode(&buf[at..])?;
        instructions.push(instruction);
        at += consumed;
    }
    Ok(instructions)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_set() -> Vec<Instruction> {
        vec![
            Instruction::ApplyActions(vec![
                Action::Output {
                    port: 2,
                    max_len: 0xffff,
                },
                Action::DecNwTtl,
            ]),
            Instruction::WriteMetadata {
                value: 0x1122_3344_5566_7788,
                mask: 0xffff_0000_ffff_0000,
            },
            Instruction::GotoTable(3),
        ]
    }

    #[test]
    fn set_roundtrip() {
        let set = sample_set();
        let mut buf = Buffer::new();
        encode_set(&set, &mut buf);
        assert_eq!(buf.len(), set_len(&set));
        assert_eq!(buf.len() % 8, 0);
        assert_eq!(decode_set(buf.as_ref()).unwrap(), set);
    }

    #[test]
    fn instruction_length_spans_embedded_actions() {
        let instruction = Instruction::WriteActions(vec![
            Action::Group(1),
            Action::Output {
                port: 1,
                max_len: 0,
            },
        ]);
        // 8 header + 8 group + 16 output
        assert_eq!(instruction.len(), 32);
        let mut buf = Buffer::new();
        instruction.encode(&mut buf);
        assert_eq!(NetworkEndian::read_u16(&buf.as_ref()[2..4]), 32);
    }

    #[test]
    fn empty_action_list_is_a_bare_header() {
        let instruction = Instruction::ApplyActions(Vec::new());
        let mut buf = Buffer::new();
        instruction.encode(&mut buf);
        assert_eq!(buf.as_ref(), &[0, 4, 0, 8, 0, 0, 0, 0]);
        let (back, consumed) = Instruction::decode(buf.as_ref()).unwrap();
        assert_eq!(back, instruction);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = [0u8, 9, 0, 8, 0, 0, 0, 0];
        assert!(matches!(
            Instruction::decode(&raw),
            Err(WireError::UnknownInstruction(9))
        ));
    }

    #[test]
    fn goto_table_layout_is_bit_exact() {
        let mut buf = Buffer::new();
        Instruction::GotoTable(5).encode(&mut buf);
        assert_eq!(buf.as_ref(), &[0, 1, 0, 8, 5, 0, 0, 0]);
    }
}
